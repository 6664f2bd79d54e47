//! mtobjects - Max-tree source detection for astronomical images.
//!
//! Sources are found by flooding the image into a max-tree (component tree)
//! and keeping the nodes whose power above their surroundings is statistically
//! significant given the background noise. The library provides:
//! - Background estimation from flat tiles
//! - Max-tree construction with area, volume and power attributes
//! - Significance filtering into a labelled object map
//! - Per-object flux, shape and light-radius measurements
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mtobjects::{Config, Detector};
//!
//! let config = Config {
//!     min_distance: 2.0,
//!     ..Default::default()
//! };
//! let result = Detector::from_config(config).detect(&image)?;
//!
//! println!("Found {} objects", result.diagnostics.object_count);
//! mtobjects::write_csv(std::fs::File::create("parameters.csv")?, &result.parameters)?;
//! ```

pub mod background;
pub mod config;
pub mod detector;
pub mod error;
pub mod filter;
pub(crate) mod math;
pub mod maxtree;
pub mod parameters;
pub mod preprocess;
pub mod relabel;

#[cfg(test)]
pub mod testing;

pub use common::Buffer2;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{Config, Connectivity, SignificanceTestKind, TileExponents, Traversal};
pub use error::{Error, Result};

// ============================================================================
// Pipeline stages
// ============================================================================

pub use background::{BackgroundEstimate, BackgroundEstimator, BackgroundStats, estimate_gain};
pub use filter::{
    BACKGROUND, ChiSquaredPower, FilterOutput, FilterParameters, FilterStats, NO_NODE, PowerGivenArea,
    SignificanceFilter, SignificanceTest, TreeContext,
};
pub use maxtree::{MaxTree, MaxTreeBuilder, MaxTreeNode};
pub use preprocess::{Preprocessor, preprocess};
pub use relabel::{levelled, relabel};

// ============================================================================
// Detection and measurement
// ============================================================================

pub use detector::{DetectionResult, Detector, Diagnostics};
pub use parameters::{HEADER, ObjectParameters, extract, write_csv};
