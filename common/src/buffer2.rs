//! Row-major 2D grid used for images, label maps and per-pixel tree data.
//!
//! Elements are addressed either by `(x, y)` (column, row) or by the flattened
//! index `y * width + x`. The flattened index is the identity shared by every
//! per-pixel structure in the workspace, so a pixel, its tree node and its label
//! all live at the same position.

use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::slice;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer2<T> {
    pixels: Vec<T>,
    width: usize,
    height: usize,
}

impl<T> Buffer2<T> {
    pub fn new(width: usize, height: usize, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Build a grid by evaluating `f(x, y)` for every position in raster order.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Flattened index of `(x, y)`.
    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    /// `(x, y)` of a flattened index.
    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize) {
        (idx % self.width, idx / self.width)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    /// Iterate the values of the rectangle `[x0, x0 + w) × [y0, y0 + h)` in raster order.
    ///
    /// The rectangle must lie inside the grid.
    pub fn region(&self, x0: usize, y0: usize, w: usize, h: usize) -> impl Iterator<Item = &T> {
        assert!(
            x0 + w <= self.width && y0 + h <= self.height,
            "region {}x{} at ({}, {}) exceeds {}x{} grid",
            w,
            h,
            x0,
            y0,
            self.width,
            self.height
        );
        (y0..y0 + h).flat_map(move |y| {
            let start = y * self.width + x0;
            self.pixels[start..start + w].iter()
        })
    }

    /// Apply `f` to every element, producing a grid of the same shape.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Buffer2<U> {
        Buffer2 {
            pixels: self.pixels.iter().map(f).collect(),
            width: self.width,
            height: self.height,
        }
    }

    #[inline]
    pub fn same_shape<U>(&self, other: &Buffer2<U>) -> bool {
        self.width == other.width && self.height == other.height
    }
}

impl<T: Clone> Buffer2<T> {
    pub fn new_filled(width: usize, height: usize, value: T) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }
}

impl<T> Index<(usize, usize)> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.pixels[y * self.width + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[y * self.width + x]
    }
}

impl<T> Index<usize> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, idx: usize) -> &Self::Output {
        &self.pixels[idx]
    }
}

impl<T> IndexMut<usize> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut Self::Output {
        &mut self.pixels[idx]
    }
}

impl<T> Deref for Buffer2<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.pixels
    }
}

impl<T> DerefMut for Buffer2<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.pixels
    }
}

impl<'a, T> IntoIterator for &'a Buffer2<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.pixels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stores_dimensions() {
        let buf = Buffer2::new(3, 2, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(buf.width(), 3);
        assert_eq!(buf.height(), 2);
        assert_eq!(buf.len(), 6);
    }

    #[test]
    #[should_panic(expected = "pixels length must equal width * height")]
    fn test_new_panics_on_size_mismatch() {
        Buffer2::new(3, 2, vec![1, 2, 3]);
    }

    #[test]
    fn test_from_fn_is_raster_order() {
        let buf = Buffer2::from_fn(3, 2, |x, y| 10 * y + x);
        assert_eq!(buf.pixels(), &[0, 1, 2, 10, 11, 12]);
    }

    #[test]
    fn test_index_and_coords_roundtrip() {
        let buf = Buffer2::new_filled(5, 3, 0u8);
        assert_eq!(buf.index(3, 2), 13);
        assert_eq!(buf.coords(13), (3, 2));
        assert_eq!(buf.coords(4), (4, 0));
    }

    #[test]
    fn test_region_iterates_rectangle() {
        let buf = Buffer2::from_fn(4, 4, |x, y| 10 * y + x);
        let values: Vec<_> = buf.region(1, 2, 2, 2).copied().collect();
        assert_eq!(values, vec![21, 22, 31, 32]);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_region_out_of_bounds_panics() {
        let buf = Buffer2::new_filled(4, 4, 0u8);
        let _ = buf.region(3, 0, 2, 1).count();
    }

    #[test]
    fn test_map_preserves_shape() {
        let buf = Buffer2::new(2, 2, vec![1, 2, 3, 4]);
        let doubled = buf.map(|&v| v as f64 * 2.0);
        assert!(doubled.same_shape(&buf));
        assert_eq!(doubled[(1, 1)], 8.0);
    }
}
