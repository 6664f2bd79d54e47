use super::*;
use crate::testing::{fill_block, flat, init_tracing, noisy_background};

fn estimator() -> BackgroundEstimator {
    BackgroundEstimator::new(0.05, TileExponents::default())
}

#[test]
fn test_noise_image_estimate() {
    init_tracing();
    let image = noisy_background(256, 256, 100.0, 2.0, 11);

    let estimate = estimator().estimate(&image).unwrap();

    assert_eq!(estimate.tile_size, 128);
    assert!(estimate.flat_tiles >= 1 && estimate.flat_tiles <= 4);
    assert!((estimate.mean - 100.0).abs() < 0.1, "mean = {}", estimate.mean);
    assert!(
        (estimate.variance - 4.0).abs() < 0.3,
        "variance = {}",
        estimate.variance
    );
}

#[test]
fn test_free_function_matches_estimator() {
    let image = noisy_background(128, 128, 50.0, 1.0, 3);
    let (mean, variance) = estimate(&image, 0.05).unwrap();
    let full = estimator().estimate(&image).unwrap();
    assert_eq!(mean, full.mean);
    assert_eq!(variance, full.variance);
}

#[test]
fn test_all_nan_image_has_no_usable_tile() {
    let image = flat(128, 128, f64::NAN);
    let err = estimator().estimate(&image).unwrap_err();
    assert!(matches!(
        err,
        Error::NoUsableTile {
            min_size: 16,
            max_size: 128
        }
    ));
}

#[test]
fn test_all_zero_image_has_no_usable_tile() {
    let image = flat(128, 128, 0.0);
    assert!(estimator().estimate(&image).is_err());
}

#[test]
fn test_zero_and_nan_tiles_always_rejected() {
    let mut image = noisy_background(64, 64, 10.0, 1.0, 5);
    fill_block(&mut image, 0, 0, 16, 16, 0.0);
    fill_block(&mut image, 16, 0, 16, 16, f64::NAN);

    for rate in [1e-9, 0.05, 0.5, 0.999] {
        let estimator = BackgroundEstimator::new(rate, TileExponents::default());
        assert!(!estimator.is_flat(&image, &Tile { x: 0, y: 0, size: 16 }));
        assert!(!estimator.is_flat(&image, &Tile { x: 16, y: 0, size: 16 }));
    }
}

#[test]
fn test_flat_constant_tile_accepted() {
    let image = flat(32, 32, 100.0);
    assert!(estimator().is_flat(&image, &Tile { x: 0, y: 0, size: 32 }));
}

#[test]
fn test_gradient_tile_rejected() {
    let mut image = noisy_background(64, 64, 0.0, 0.1, 9);
    for y in 0..64 {
        for x in 0..64 {
            image[(x, y)] += 10.0 * y as f64;
        }
    }
    assert!(!estimator().is_flat(&image, &Tile { x: 0, y: 0, size: 32 }));
    assert!(estimator().estimate(&image).is_err());
}

#[test]
fn test_scale_search_halves_past_central_source() {
    let mut image = noisy_background(64, 64, 100.0, 1.0, 21);
    fill_block(&mut image, 30, 30, 5, 5, 1000.0);

    let est = estimator();
    assert!(!est.has_flat_tile(&image, 64));
    assert!(!est.has_flat_tile(&image, 32));
    assert_eq!(est.largest_flat_tile(&image), Some(16));
}

#[test]
fn test_scale_within_configured_bounds() {
    let exponents = TileExponents {
        start: 5,
        min: 4,
        max: 6,
    };
    let est = BackgroundEstimator::new(0.05, exponents);
    let image = noisy_background(256, 256, 10.0, 1.0, 4);

    let size = est.largest_flat_tile(&image).unwrap();
    assert_eq!(size, 64);
}

#[test]
fn test_flat_tiles_excludes_source_tile() {
    let mut image = noisy_background(64, 64, 100.0, 1.0, 8);
    fill_block(&mut image, 2, 2, 4, 4, 500.0);

    let flat = estimator().flat_tiles(&image, 16);
    assert!(!flat.contains(&Tile { x: 0, y: 0, size: 16 }));
    assert!(flat.windows(2).all(|w| (w[0].y, w[0].x) < (w[1].y, w[1].x)));
}

#[test]
fn test_gain_from_background() {
    let image = flat(8, 8, 100.0);
    let gain = estimate_gain(&image, 100.0, 4.0, 0.0);
    assert!((gain - 25.0).abs() < 1e-12);
}

#[test]
fn test_negative_minimum_replaces_soft_bias() {
    let mut image = flat(8, 8, 100.0);
    image[(3, 3)] = -10.0;
    image[(4, 4)] = f64::NAN;
    let gain = estimate_gain(&image, 100.0, 4.0, 5.0);
    assert!((gain - 27.5).abs() < 1e-12);
}

#[test]
fn test_non_positive_gain_falls_back() {
    let image = flat(8, 8, 1.0);
    assert_eq!(estimate_gain(&image, 1.0, 4.0, 10.0), f64::MAX);
    assert_eq!(estimate_gain(&image, 1.0, 0.0, 1.0), f64::MAX);
}

#[test]
fn test_zero_variance_clamped_positive() {
    assert_eq!(positive_variance(2.5, 100.0), 2.5);
    let clamped = positive_variance(0.0, 100.0);
    assert!(clamped > 0.0);
    assert!(clamped < 1e-6);
}
