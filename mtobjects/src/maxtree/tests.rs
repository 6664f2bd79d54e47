use std::collections::VecDeque;

use super::*;
use crate::testing::{GaussianRng, flat};

fn row(values: &[f64]) -> Buffer2<f64> {
    Buffer2::new(values.len(), 1, values.to_vec())
}

/// Quantized noise so the tree has plateaus as well as single-pixel peaks.
fn quantized_noise(width: usize, height: usize, seed: u64) -> Buffer2<f64> {
    let mut rng = GaussianRng::new(seed);
    Buffer2::from_fn(width, height, |_, _| (rng.next_gaussian() * 2.0).round())
}

fn is_ancestor_or_self(tree: &MaxTree, ancestor: usize, mut node: usize) -> bool {
    loop {
        if node == ancestor {
            return true;
        }
        if tree.is_root(node) {
            return false;
        }
        node = tree.parent(node);
    }
}

/// Pixels connected to `seed` through values ≥ `level`.
fn component(image: &Buffer2<f64>, seed: usize, level: f64, connectivity: Connectivity) -> Vec<usize> {
    let mut seen = vec![false; image.len()];
    let mut queue = VecDeque::from([seed]);
    seen[seed] = true;
    let mut members = Vec::new();
    while let Some(i) = queue.pop_front() {
        members.push(i);
        let (x, y) = image.coords(i);
        for &(dx, dy) in connectivity.offsets() {
            let nx = x as isize + dx;
            let ny = y as isize + dy;
            if nx < 0 || ny < 0 || nx >= image.width() as isize || ny >= image.height() as isize {
                continue;
            }
            let j = image.index(nx as usize, ny as usize);
            if !seen[j] && image[j] >= level {
                seen[j] = true;
                queue.push_back(j);
            }
        }
    }
    members.sort_unstable();
    members
}

#[test]
fn test_zero_size_image_rejected() {
    let image = Buffer2::<f64>::new(0, 0, Vec::new());
    assert!(matches!(build(image), Err(Error::FatalInput { .. })));
}

#[test]
fn test_nan_image_rejected() {
    let mut image = flat(4, 4, 1.0);
    image[(2, 1)] = f64::NAN;
    let err = build(image).unwrap_err();
    assert!(err.to_string().contains("(2, 1)"));
}

#[test]
fn test_single_pixel() {
    let tree = build(row(&[3.0])).unwrap();
    assert_eq!(tree.root(), 0);
    assert_eq!(tree.parent(0), 0);
    assert_eq!(tree.area(0), 1);
    assert!(tree.relevant_nodes().is_empty());
}

#[test]
fn test_flat_image_is_single_component() {
    let tree = build(flat(5, 4, 7.0)).unwrap();
    assert_eq!(tree.root(), 0);
    assert_eq!(tree.area(0), 20);
    assert!(tree.nodes().iter().all(|n| n.parent == 0));
    assert!(tree.relevant_nodes().is_empty());
    assert_eq!(tree.volume_above(0, 7.0), 0.0);
}

#[test]
fn test_profile_attributes() {
    let tree = build(row(&[0.0, 1.0, 2.0, 1.0, 0.0])).unwrap();

    let parents: Vec<usize> = tree.nodes().iter().map(|n| n.parent).collect();
    assert_eq!(parents, vec![0, 0, 1, 1, 0]);

    assert_eq!(tree.area(0), 5);
    assert_eq!(tree.area(1), 3);
    assert_eq!(tree.area(2), 1);

    assert_eq!(tree.node(0).volume, 4.0);
    assert_eq!(tree.node(0).power, 6.0);
    assert_eq!(tree.node(1).volume, 1.0);
    assert_eq!(tree.node(1).power, 1.0);

    assert_eq!(tree.power_above(1, 0.0), 6.0);
    assert_eq!(tree.volume_above(2, 0.0), 2.0);
    assert_eq!(tree.relevant_nodes(), vec![1, 2]);
}

#[test]
fn test_root_is_first_global_minimum() {
    let tree = build(row(&[4.0, -1.0, 3.0, -1.0])).unwrap();
    assert_eq!(tree.root(), 1);
    assert_eq!(tree.parent(3), 1);
    assert_eq!(tree.area(1), 4);
}

#[test]
fn test_diagonal_peaks_depend_on_connectivity() {
    #[rustfmt::skip]
    let image = Buffer2::new(3, 3, vec![
        5.0, 0.0, 0.0,
        0.0, 5.0, 0.0,
        0.0, 0.0, 0.0,
    ]);

    let eight = MaxTreeBuilder::new(Connectivity::Eight).build(image.clone()).unwrap();
    assert_eq!(eight.relevant_nodes().len(), 1);
    assert_eq!(eight.area(eight.relevant_nodes()[0]), 2);

    let four = MaxTreeBuilder::new(Connectivity::Four).build(image).unwrap();
    assert_eq!(four.relevant_nodes().len(), 2);
}

#[test]
fn test_infinite_pixels_are_brightest_leaf() {
    let tree = build(row(&[0.0, f64::INFINITY, 1.0])).unwrap();
    assert_eq!(tree.parent(1), 2);
    assert!(tree.is_level_root(1));
    assert_eq!(tree.relevant_nodes(), vec![2, 1]);
}

#[test]
fn test_infinite_component_not_folded_into_parent() {
    let tree = build(row(&[0.0, 2.0, f64::INFINITY, f64::INFINITY, 2.0, 0.0])).unwrap();
    let masked = 2;
    let rim = tree.parent(masked);
    assert_eq!(tree.level(rim), 2.0);
    assert_eq!(tree.parent(3), masked);

    assert_eq!(tree.area(masked), 2);
    assert_eq!(tree.area(rim), 2);
    assert_eq!(tree.node(rim).volume, 0.0);
    assert_eq!(tree.node(rim).power, 0.0);
    assert_eq!(tree.power_above(rim, 0.0), 8.0);

    assert_eq!(tree.area(tree.root()), 4);
    assert!(tree.node(tree.root()).volume.is_finite());
    assert!(tree.node(tree.root()).power.is_finite());
}

#[test]
fn test_components_match_threshold_sets() {
    for connectivity in [Connectivity::Four, Connectivity::Eight] {
        let image = quantized_noise(12, 10, 5);
        let tree = MaxTreeBuilder::new(connectivity).build(image.clone()).unwrap();

        for r in (0..tree.len()).filter(|&i| tree.is_level_root(i) || tree.is_root(i)) {
            let mut descendants: Vec<usize> = (0..tree.len())
                .filter(|&p| is_ancestor_or_self(&tree, r, p))
                .collect();
            descendants.sort_unstable();

            let expected = component(&image, r, image[r], connectivity);
            assert_eq!(descendants, expected, "level root {r} ({connectivity:?})");
            assert_eq!(tree.area(r), expected.len());

            let volume: f64 = expected.iter().map(|&p| image[p] - image[r]).sum();
            let power: f64 = expected.iter().map(|&p| (image[p] - image[r]).powi(2)).sum();
            assert!((tree.node(r).volume - volume).abs() < 1e-9);
            assert!((tree.node(r).power - power).abs() < 1e-9);
        }
    }
}

#[test]
fn test_tree_invariants_on_noise() {
    let mut rng = GaussianRng::new(17);
    let image = Buffer2::from_fn(32, 32, |_, _| 10.0 + rng.next_gaussian());
    let tree = build(image).unwrap();

    assert_eq!(tree.area(tree.root()), 32 * 32);
    for i in 0..tree.len() {
        let parent = tree.parent(i);
        if tree.is_root(i) {
            assert_eq!(parent, i);
            continue;
        }
        assert!(tree.level(parent) <= tree.level(i));
        assert!(tree.area(parent) >= tree.area(i));
        assert!(tree.is_level_root(parent) || tree.is_root(parent));
    }

    let relevant = tree.relevant_nodes();
    assert!(relevant.windows(2).all(|w| tree.level(w[0]) <= tree.level(w[1])));
    assert!(!relevant.contains(&tree.root()));
}

#[test]
fn test_non_level_root_points_to_same_level() {
    let image = quantized_noise(16, 16, 9);
    let tree = build(image).unwrap();
    for i in 0..tree.len() {
        if !tree.is_level_root(i) && !tree.is_root(i) {
            let parent = tree.parent(i);
            assert_eq!(tree.level(parent), tree.level(i));
            assert!(tree.is_level_root(parent) || tree.is_root(parent));
        }
    }
}

#[test]
fn test_tree_serializes() {
    let tree = build(row(&[0.0, 2.0, 1.0])).unwrap();
    let yaml = serde_yml::to_string(&tree).unwrap();
    let restored: MaxTree = serde_yml::from_str(&yaml).unwrap();
    assert_eq!(restored.nodes(), tree.nodes());
    assert_eq!(restored.root(), tree.root());
}
