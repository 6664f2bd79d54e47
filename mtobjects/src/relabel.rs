//! Renumbering of object id maps and the levelled view.

use common::Buffer2;
use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::{Error, Result};
use crate::filter::BACKGROUND;

/// Sorted distinct non-background ids of `ids`.
pub fn distinct_ids(ids: &[i64]) -> Vec<i64> {
    let mut distinct: Vec<i64> = ids.iter().copied().filter(|&id| id != BACKGROUND).collect();
    distinct.sort_unstable();
    distinct.dedup();
    distinct
}

/// Renumber the objects of `ids` in place to `1..=k`, in ascending order of the
/// original id or, with `shuffle`, in random order. Returns `k`.
pub fn relabel(ids: &mut Buffer2<i64>, shuffle: bool) -> usize {
    relabel_with_rng(ids, shuffle, &mut rand::rng())
}

/// [`relabel`] with a caller-supplied random source.
pub fn relabel_with_rng<R: Rng + ?Sized>(ids: &mut Buffer2<i64>, shuffle: bool, rng: &mut R) -> usize {
    let distinct = distinct_ids(ids);
    let mut labels: Vec<i64> = (1..=distinct.len() as i64).collect();
    if shuffle {
        labels.shuffle(rng);
    }

    for id in ids.iter_mut() {
        if let Ok(pos) = distinct.binary_search(id) {
            *id = labels[pos];
        }
    }

    tracing::debug!(objects = distinct.len(), shuffle, "Relabelled object map");
    distinct.len()
}

/// Replace every object pixel with the lowest value of its object in `image`.
///
/// NaN pixels are ignored when taking the minimum; an object made only of NaN
/// keeps NaN. Background pixels are 0.
pub fn levelled(image: &Buffer2<f64>, ids: &Buffer2<i64>) -> Result<Buffer2<f64>> {
    if !image.same_shape(ids) {
        return Err(Error::fatal_input(format!(
            "id map is {}x{} but image is {}x{}",
            ids.width(),
            ids.height(),
            image.width(),
            image.height()
        )));
    }

    let distinct = distinct_ids(ids);
    let mut minima: Vec<Option<f64>> = vec![None; distinct.len()];
    for (&id, &value) in ids.iter().zip(image.iter()) {
        let Ok(pos) = distinct.binary_search(&id) else {
            continue;
        };
        if value.is_nan() {
            continue;
        }
        let min = minima[pos].get_or_insert(value);
        if value < *min {
            *min = value;
        }
    }

    let values: Vec<f64> = ids
        .iter()
        .map(|id| match distinct.binary_search(id) {
            Ok(pos) => minima[pos].unwrap_or(f64::NAN),
            Err(_) => 0.0,
        })
        .collect();

    Ok(Buffer2::new(image.width(), image.height(), values))
}
