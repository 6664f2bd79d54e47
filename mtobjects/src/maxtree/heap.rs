//! Array-backed binary max-heap of pixel indices keyed by pixel value.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: f64,
    index: usize,
}

impl Entry {
    /// Higher value first; equal values pop in raster order.
    #[inline]
    fn outranks(&self, other: &Entry) -> bool {
        match self.value.total_cmp(&other.value) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.index < other.index,
        }
    }
}

#[derive(Debug, Default)]
pub struct PixelHeap {
    entries: Vec<Entry>,
}

impl PixelHeap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, value: f64, index: usize) {
        self.entries.push(Entry { value, index });
        self.sift_up(self.entries.len() - 1);
    }

    /// Remove the brightest pixel, returning its index.
    pub fn pop(&mut self) -> Option<usize> {
        let last = self.entries.len().checked_sub(1)?;
        self.entries.swap(0, last);
        let top = self.entries.pop()?;
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Some(top.index)
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.entries[pos].outranks(&self.entries[parent]) {
                break;
            }
            self.entries.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut best = pos;
            if left < len && self.entries[left].outranks(&self.entries[best]) {
                best = left;
            }
            if right < len && self.entries[right].outranks(&self.entries[best]) {
                best = right;
            }
            if best == pos {
                break;
            }
            self.entries.swap(pos, best);
            pos = best;
        }
    }
}
