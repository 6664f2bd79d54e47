//! Max-tree (component tree) construction by flooding.
//!
//! Every pixel is a node addressed by its flattened index. A connected set of
//! pixels at one grey level is represented by a single *level root*; the other
//! pixels of that set point to it. A level root points to the level root of the
//! enclosing component at the next lower level. The root is the global minimum
//! and represents the whole image.
//!
//! Node attributes are kept relative to the node's own level:
//! - `area`: pixel count of the subtree
//! - `volume`: Σ (value − level) over the subtree
//! - `power`: Σ (value − level)² over the subtree
//!
//! [`MaxTree::volume_above`] and [`MaxTree::power_above`] shift them to any
//! reference level.
//!
//! A component at a non-finite level (masked pixels replaced by `+∞`) keeps its
//! own attributes but is not folded into its parent, so every finite node
//! describes its finite pixels only.

mod heap;

#[cfg(test)]
mod tests;

pub use heap::PixelHeap;

use common::Buffer2;
use serde::{Deserialize, Serialize};

use crate::config::Connectivity;
use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Per-pixel tree node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaxTreeNode {
    /// Index of the direct ancestor. The root points to itself.
    pub parent: usize,
    /// Pixel count of the component rooted here, masked components excluded.
    pub area: usize,
    /// Σ (value − own level) over the component.
    pub volume: f64,
    /// Σ (value − own level)² over the component.
    pub power: f64,
}

impl MaxTreeNode {
    fn leaf(index: usize) -> Self {
        Self {
            parent: index,
            area: 1,
            volume: 0.0,
            power: 0.0,
        }
    }
}

/// A max-tree over a preprocessed image. Owns the image it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxTree {
    image: Buffer2<f64>,
    nodes: Vec<MaxTreeNode>,
    root: usize,
}

impl MaxTree {
    #[inline]
    pub fn root(&self) -> usize {
        self.root
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn image(&self) -> &Buffer2<f64> {
        &self.image
    }

    #[inline]
    pub fn nodes(&self) -> &[MaxTreeNode] {
        &self.nodes
    }

    #[inline]
    pub fn node(&self, index: usize) -> &MaxTreeNode {
        &self.nodes[index]
    }

    #[inline]
    pub fn parent(&self, index: usize) -> usize {
        self.nodes[index].parent
    }

    #[inline]
    pub fn area(&self, index: usize) -> usize {
        self.nodes[index].area
    }

    /// Grey level of a node.
    #[inline]
    pub fn level(&self, index: usize) -> f64 {
        self.image[index]
    }

    #[inline]
    pub fn is_root(&self, index: usize) -> bool {
        index == self.root
    }

    /// A node whose parent lies at a strictly lower level. The root is not a level root.
    #[inline]
    pub fn is_level_root(&self, index: usize) -> bool {
        let parent = self.nodes[index].parent;
        parent != index && self.image[parent] < self.image[index]
    }

    /// Σ (value − `reference`) over the component.
    #[inline]
    pub fn volume_above(&self, index: usize, reference: f64) -> f64 {
        let node = &self.nodes[index];
        let d = self.image[index] - reference;
        node.volume + d * node.area as f64
    }

    /// Σ (value − `reference`)² over the component.
    #[inline]
    pub fn power_above(&self, index: usize, reference: f64) -> f64 {
        let node = &self.nodes[index];
        let d = self.image[index] - reference;
        node.power + d * (2.0 * node.volume + d * node.area as f64)
    }

    /// Level roots sorted by ascending level (ties in index order).
    ///
    /// Every parent precedes its children, so iterating forward is a root-to-leaves
    /// traversal and iterating backward is leaves-to-root.
    pub fn relevant_nodes(&self) -> Vec<usize> {
        let mut relevant: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| self.is_level_root(i))
            .collect();
        relevant.sort_by(|&a, &b| self.image[a].total_cmp(&self.image[b]).then(a.cmp(&b)));
        relevant
    }
}

// ============================================================================
// Construction
// ============================================================================

/// Builds a [`MaxTree`] by flooding from the global minimum.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxTreeBuilder {
    pub connectivity: Connectivity,
}

/// Build a max-tree under 8-connectivity.
pub fn build(image: Buffer2<f64>) -> Result<MaxTree> {
    MaxTreeBuilder::default().build(image)
}

impl MaxTreeBuilder {
    pub fn new(connectivity: Connectivity) -> Self {
        Self { connectivity }
    }

    /// Flood `image` into a max-tree.
    ///
    /// Rejects zero-size images and images containing NaN.
    pub fn build(&self, image: Buffer2<f64>) -> Result<MaxTree> {
        if image.is_empty() {
            return Err(Error::fatal_input("image has zero size"));
        }
        if let Some(i) = image.iter().position(|v| v.is_nan()) {
            let (x, y) = image.coords(i);
            return Err(Error::fatal_input(format!(
                "NaN at ({x}, {y}) reached max-tree construction"
            )));
        }

        tracing::debug!(
            "{} neighbors connectivity",
            self.connectivity.offsets().len()
        );

        let mut flood = Flood::new(&image, self.connectivity);
        flood.run();
        let Flood { nodes, root, .. } = flood;

        Ok(MaxTree { image, nodes, root })
    }
}

/// Flooding state. The stack holds the level roots of the current path from
/// the root up to the component being filled.
struct Flood<'a> {
    image: &'a Buffer2<f64>,
    offsets: &'static [(isize, isize)],
    nodes: Vec<MaxTreeNode>,
    visited: Vec<bool>,
    heap: PixelHeap,
    stack: Vec<usize>,
    root: usize,
}

impl<'a> Flood<'a> {
    fn new(image: &'a Buffer2<f64>, connectivity: Connectivity) -> Self {
        let n = image.len();
        let root = (0..n)
            .reduce(|best, i| if image[i] < image[best] { i } else { best })
            .unwrap_or(0);

        Self {
            image,
            offsets: connectivity.offsets(),
            nodes: (0..n).map(MaxTreeNode::leaf).collect(),
            visited: vec![false; n],
            heap: PixelHeap::with_capacity(n.min(1 << 16)),
            stack: Vec::new(),
            root,
        }
    }

    fn run(&mut self) {
        let mut current = self.root;
        self.visited[current] = true;
        self.stack.push(current);

        loop {
            if let Some(brighter) = self.queue_neighbours(current) {
                // Revisit `current` once the brighter component is complete.
                self.heap.push(self.image[current], current);
                self.stack.push(brighter);
                current = brighter;
                continue;
            }

            let top = self.stack_top();
            if current != top {
                self.nodes[current].parent = top;
                self.nodes[top].area += 1;
            }

            let Some(next) = self.heap.pop() else {
                break;
            };
            self.descend_to(next);
            current = next;
        }

        while self.stack.len() > 1 {
            self.close_top(None);
        }
        self.nodes[self.root].parent = self.root;
    }

    #[inline]
    fn stack_top(&self) -> usize {
        self.stack[self.stack.len() - 1]
    }

    /// Queue the unvisited neighbours of `index`, stopping at the first one brighter than it.
    fn queue_neighbours(&mut self, index: usize) -> Option<usize> {
        let (x, y) = self.image.coords(index);
        let width = self.image.width() as isize;
        let height = self.image.height() as isize;
        let value = self.image[index];

        for &(dx, dy) in self.offsets {
            let nx = x as isize + dx;
            let ny = y as isize + dy;
            if nx < 0 || ny < 0 || nx >= width || ny >= height {
                continue;
            }
            let neighbour = ny as usize * self.image.width() + nx as usize;
            if self.visited[neighbour] {
                continue;
            }
            self.visited[neighbour] = true;

            let neighbour_value = self.image[neighbour];
            if neighbour_value > value {
                return Some(neighbour);
            }
            self.heap.push(neighbour_value, neighbour);
        }
        None
    }

    /// Close every component on the stack brighter than `next`.
    fn descend_to(&mut self, next: usize) {
        let level = self.image[next];
        while level < self.image[self.stack_top()] {
            self.close_top(Some(next));
        }
    }

    /// Pop the top level root and merge it into the component below.
    ///
    /// If `next` lies strictly between the two levels it becomes a new level root.
    fn close_top(&mut self, next: Option<usize>) {
        let Some(old) = self.stack.pop() else {
            return;
        };
        if let Some(next) = next {
            let below = self.stack.last().copied();
            if below.is_none_or(|b| self.image[next] > self.image[b]) {
                self.stack.push(next);
            }
        }
        let top = self.stack_top();
        self.nodes[old].parent = top;
        self.merge(top, old);
    }

    /// Fold the attributes of `from` into `to`, shifting them to `to`'s level.
    fn merge(&mut self, to: usize, from: usize) {
        if !self.image[from].is_finite() || !self.image[to].is_finite() {
            return;
        }
        let d = self.image[from] - self.image[to];
        let from_node = self.nodes[from];
        let to_node = &mut self.nodes[to];
        to_node.area += from_node.area;
        to_node.volume += from_node.volume + d * from_node.area as f64;
        to_node.power += from_node.power + d * (2.0 * from_node.volume + d * from_node.area as f64);
    }
}
