//! Per-object measurements on the original image.
//!
//! Pixels are grouped by final object id. Each object is measured on its
//! original values (NaN read as 0) floored at the object's minimum, so that
//! flux, moments and light radii describe the light above the level at which
//! the object was cut out.


use std::f64::consts::{FRAC_PI_2, PI};
use std::io::Write;

use common::Buffer2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::BACKGROUND;
use crate::math::median_f64_mut;

/// Column names of the parameter table, in output order.
pub const HEADER: [&str; 14] = [
    "ID",
    "X",
    "Y",
    "A",
    "B",
    "theta",
    "total_flux",
    "mu_max",
    "mu_median",
    "mu_mean",
    "R_fwhm",
    "R_e",
    "R10",
    "R90",
];

/// Flux fractions of the light radii, in output order.
const LIGHT_FRACTIONS: [f64; 3] = [0.5, 0.1, 0.9];

/// Measurements of one object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectParameters {
    pub id: i64,
    /// Flux-weighted centroid column.
    pub x: f64,
    /// Flux-weighted centroid row.
    pub y: f64,
    /// Semi-major axis from second moments.
    pub a: f64,
    /// Semi-minor axis from second moments.
    pub b: f64,
    /// Major axis angle in radians, between -π/2 and π/2.
    pub theta: f64,
    pub total_flux: f64,
    pub mu_max: f64,
    pub mu_median: f64,
    pub mu_mean: f64,
    /// Radius of the circle with the area of pixels at or above half the peak.
    pub r_fwhm: f64,
    /// Radius of the circle with the area of the brightest pixels holding half the flux.
    pub r_e: f64,
    pub r10: f64,
    pub r90: f64,
}

impl ObjectParameters {
    /// Row values in [`HEADER`] order, id excluded.
    pub fn values(&self) -> [f64; 13] {
        [
            self.x,
            self.y,
            self.a,
            self.b,
            self.theta,
            self.total_flux,
            self.mu_max,
            self.mu_median,
            self.mu_mean,
            self.r_fwhm,
            self.r_e,
            self.r10,
            self.r90,
        ]
    }
}

/// Measure every object of `ids` on `image`, in ascending id order.
pub fn extract(image: &Buffer2<f64>, ids: &Buffer2<i64>) -> Result<Vec<ObjectParameters>> {
    if !image.same_shape(ids) {
        return Err(Error::fatal_input(format!(
            "id map is {}x{} but image is {}x{}",
            ids.width(),
            ids.height(),
            image.width(),
            image.height()
        )));
    }

    let groups = group_pixels(ids);
    let parameters: Vec<ObjectParameters> = groups
        .par_iter()
        .map(|(id, pixels)| measure(image, *id, pixels))
        .collect();

    tracing::info!("Measured {} objects", parameters.len());
    Ok(parameters)
}

/// Pixel indices per object id, ids ascending, indices in raster order.
fn group_pixels(ids: &Buffer2<i64>) -> Vec<(i64, Vec<usize>)> {
    let mut pairs: Vec<(i64, usize)> = ids
        .iter()
        .enumerate()
        .filter(|&(_, &id)| id != BACKGROUND)
        .map(|(i, &id)| (id, i))
        .collect();
    pairs.sort_unstable();

    pairs
        .chunk_by(|a, b| a.0 == b.0)
        .map(|chunk| (chunk[0].0, chunk.iter().map(|&(_, i)| i).collect()))
        .collect()
}

/// Measure one object from its pixel indices. `pixels` must be non-empty.
pub fn measure(image: &Buffer2<f64>, id: i64, pixels: &[usize]) -> ObjectParameters {
    let mut values: Vec<f64> = pixels
        .iter()
        .map(|&i| if image[i].is_nan() { 0.0 } else { image[i] })
        .collect();

    let floor = values.iter().copied().fold(f64::INFINITY, f64::min).max(0.0);
    for v in values.iter_mut() {
        *v -= floor;
    }

    let mut total_flux: f64 = values.iter().sum();
    if total_flux == 0.0 {
        let tiny = f64::from_bits(1);
        for v in values.iter_mut().filter(|v| **v == 0.0) {
            *v = tiny;
        }
        // Uniform weights: the centroid is the mean pixel position.
        total_flux = values.iter().sum::<f64>().max(tiny);
        tracing::debug!(id, "Object has no flux above its minimum");
    }

    let coords: Vec<(f64, f64)> = pixels
        .iter()
        .map(|&i| {
            let (x, y) = image.coords(i);
            (x as f64, y as f64)
        })
        .collect();

    let (x, y) = centroid(&coords, &values, total_flux);
    let shape = shape(&coords, &values, total_flux, x, y);

    let mut sorted = values.clone();
    sorted.sort_unstable_by(f64::total_cmp);
    let mu_max = sorted.last().copied().unwrap_or(0.0);
    let mu_mean = values.iter().sum::<f64>() / values.len() as f64;
    let mu_median = median_f64_mut(&mut values);

    let r_fwhm = half_max_radius(&sorted, mu_max);
    let [r_e, r10, r90] = LIGHT_FRACTIONS.map(|f| light_radius(&sorted, f * total_flux));

    ObjectParameters {
        id,
        x,
        y,
        a: shape.a,
        b: shape.b,
        theta: shape.theta,
        total_flux,
        mu_max,
        mu_median,
        mu_mean,
        r_fwhm,
        r_e,
        r10,
        r90,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Shape {
    a: f64,
    b: f64,
    theta: f64,
}

fn centroid(coords: &[(f64, f64)], values: &[f64], flux: f64) -> (f64, f64) {
    let (sx, sy) = coords
        .iter()
        .zip(values)
        .fold((0.0, 0.0), |(sx, sy), (&(x, y), &v)| (sx + x * v, sy + y * v));
    (sx / flux, sy / flux)
}

/// Axes and orientation from the second central moments.
fn shape(coords: &[(f64, f64)], values: &[f64], flux: f64, x: f64, y: f64) -> Shape {
    let (sxx, syy, sxy) = coords.iter().zip(values).fold(
        (0.0, 0.0, 0.0),
        |(sxx, syy, sxy), (&(px, py), &v)| (sxx + px * px * v, syy + py * py * v, sxy + px * py * v),
    );
    let x2 = sxx / flux - x * x;
    let y2 = syy / flux - y * y;
    let xy = sxy / flux - x * y;

    let lhs = (x2 + y2) / 2.0;
    let rhs = (((x2 - y2) / 2.0).powi(2) + xy * xy).sqrt();

    // Collinear and single-pixel objects give a negative radicand.
    let axis = |radicand: f64| {
        let r = radicand.sqrt();
        if r.is_nan() { 0.0 } else { r }
    };

    let t = if x2 != y2 {
        (2.0 * xy / (x2 - y2)).atan()
    } else if xy > 0.0 {
        FRAC_PI_2
    } else if xy < 0.0 {
        -FRAC_PI_2
    } else {
        0.0
    };

    let theta = if xy < 0.0 && t > 0.0 {
        (t - PI) / 2.0
    } else if t < 0.0 && xy > 0.0 {
        (t + PI) / 2.0
    } else {
        t / 2.0
    };

    Shape {
        a: axis(lhs + rhs),
        b: axis(lhs - rhs),
        theta,
    }
}

/// Radius of a circle of `area` pixels.
#[inline]
fn equivalent_radius(area: usize) -> f64 {
    (area as f64 / PI).sqrt()
}

/// `sorted` ascending.
fn half_max_radius(sorted: &[f64], max: f64) -> f64 {
    let half = max * 0.5;
    let below = sorted.partition_point(|&v| v < half);
    equivalent_radius(sorted.len() - below)
}

/// Radius of the brightest pixels summed before the running flux reaches `target`.
///
/// `sorted` ascending.
fn light_radius(sorted: &[f64], target: f64) -> f64 {
    let mut sum = 0.0;
    let mut area = sorted.len();
    for (i, &v) in sorted.iter().rev().enumerate() {
        sum += v;
        if sum >= target {
            area = i;
            break;
        }
    }
    equivalent_radius(area)
}

/// Write `rows` as CSV with a [`HEADER`] line.
pub fn write_csv<W: Write>(mut writer: W, rows: &[ObjectParameters]) -> Result<()> {
    writeln!(writer, "{}", HEADER.join(","))?;
    for row in rows {
        write!(writer, "{}", row.id)?;
        for value in row.values() {
            write!(writer, ",{value}")?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}
