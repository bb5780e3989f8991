//! Error types for rustpad-core.

use thiserror::Error;

/// Result type alias for rustpad operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A position or index pair that does not map to a pad.
///
/// Non-fatal: callers log it and skip the pad or pixel in question.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum GeometryLookupFailure {
    /// Continuous position outside every zone of the segmentation.
    #[error("no pad at position ({x:.4}, {y:.4})")]
    OutsideSegmentation { x: f64, y: f64 },

    /// Discrete indices outside the segmentation's index space.
    #[error("no pad with indices ({ix}, {iy})")]
    InvalidIndices { ix: i32, iy: i32 },
}

/// Conditions that are recovered locally and only ever logged.
///
/// These are never returned to a caller; they exist so that log lines and
/// statistics share one vocabulary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Degeneracy {
    /// Precluster charge or multiplicity below threshold, discarded.
    #[error("degenerate precluster: {multiplicity} pads, charge {charge:.2}")]
    DegenerateCluster { multiplicity: usize, charge: f64 },

    /// Zero or near-zero denominator, clamped to a safe default.
    #[error("numerical degeneracy in {context}, clamped")]
    NumericalDegeneracy { context: &'static str },
}

/// Hard failures surfaced to the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Plateau resolution visited an implausibly large connected region.
    #[error("plateau of {visited} pixels exceeds budget of {budget}")]
    RecursionBudgetExceeded { visited: usize, budget: usize },

    /// Segmentation or pixel grid is inconsistent.
    #[error("malformed geometry: {0}")]
    MalformedGeometry(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    InvalidConfig(String),

    /// Geometry lookup that the caller could not recover from.
    #[error(transparent)]
    Geometry(#[from] GeometryLookupFailure),
}
