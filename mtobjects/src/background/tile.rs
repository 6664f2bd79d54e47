//! Square tiles laid over the image for background sampling.

use common::Buffer2;

/// A `size × size` square with its top-left corner at `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: usize,
    pub y: usize,
    pub size: usize,
}

impl Tile {
    /// All values inside the tile, raster order.
    pub fn values(&self, image: &Buffer2<f64>) -> Vec<f64> {
        image
            .region(self.x, self.y, self.size, self.size)
            .copied()
            .collect()
    }

    /// Top and bottom halves. An odd row count puts the extra row in the bottom half.
    pub fn top_bottom(&self, image: &Buffer2<f64>) -> (Vec<f64>, Vec<f64>) {
        let half = self.size / 2;
        let top = image.region(self.x, self.y, self.size, half).copied().collect();
        let bottom = image
            .region(self.x, self.y + half, self.size, self.size - half)
            .copied()
            .collect();
        (top, bottom)
    }

    /// Left and right halves. An odd column count puts the extra column in the right half.
    pub fn left_right(&self, image: &Buffer2<f64>) -> (Vec<f64>, Vec<f64>) {
        let half = self.size / 2;
        let left = image.region(self.x, self.y, half, self.size).copied().collect();
        let right = image
            .region(self.x + half, self.y, self.size - half, self.size)
            .copied()
            .collect();
        (left, right)
    }
}

/// Every full, non-overlapping tile of side `size`, raster order.
///
/// Partial tiles at the right and bottom edges are skipped.
pub fn tile_grid(width: usize, height: usize, size: usize) -> Vec<Tile> {
    if size == 0 {
        return Vec::new();
    }
    let tiles_x = width / size;
    let tiles_y = height / size;

    (0..tiles_y)
        .flat_map(|ty| {
            (0..tiles_x).map(move |tx| Tile {
                x: tx * size,
                y: ty * size,
                size,
            })
        })
        .collect()
}
