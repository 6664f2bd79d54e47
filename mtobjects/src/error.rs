//! Error types for the detection pipeline.

use thiserror::Error;

/// Errors that stop a detection run.
///
/// Numeric degeneracies inside a single object (zero flux, collinear pixels) are
/// not errors; they resolve to fallback values where they occur.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed input image: {reason}")]
    FatalInput { reason: String },

    #[error("No usable background tiles between {min_size}px and {max_size}px")]
    NoUsableTile { min_size: usize, max_size: usize },

    #[error("Parameter '{name}' = {value} is out of range: expected {expected}")]
    ParameterRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("Significance boundary is only tabulated for alpha = 1e-6, got {alpha}")]
    UnsupportedSignificanceLevel { alpha: f64 },

    #[error("Failed to write parameter table: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn fatal_input(reason: impl Into<String>) -> Self {
        Self::FatalInput {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
