//! Error types for the overlay engine.

use crate::dataset::FeatureId;
use thiserror::Error;

/// Overlay engine errors.
///
/// All variants are raised eagerly where they are detected and propagate to
/// the caller; the engine never retries or returns partial results.
#[derive(Error, Debug)]
pub enum OverlayError {
    /// The two datasets (or a requested measure kind) cannot be overlaid.
    #[error("Incompatible geometry types: {0}")]
    IncompatibleTypes(String),

    /// The designated id field repeats a value within one dataset.
    #[error("Duplicate value {value} in id field `{field}`")]
    DuplicateFieldId { field: String, value: FeatureId },

    /// A dataset's geometry kind cannot be classified.
    #[error("Unknown dataset type: {0}")]
    UnknownDatasetType(String),

    /// Dataset metadata (CRS, id field) is missing or inconsistent with the data.
    #[error("Malformed metadata: {0}")]
    MalformedMeta(String),

    /// Failure raised inside a worker chunk.
    #[error("Worker task failed in chunk {chunk}{}: {source}", feature_context(.feature))]
    PoolTask {
        chunk: usize,
        feature: Option<FeatureId>,
        #[source]
        source: Box<OverlayError>,
    },

    /// Coordinate transformation failed.
    #[error("Projection from `{from}` to `{to}` failed: {message}")]
    Projection {
        from: String,
        to: String,
        message: String,
    },

    /// Exact geometric computation failed for a feature pair.
    #[error("Invalid geometry (a={id_a}{}): {message}", feature_context(.id_b))]
    InvalidGeometry {
        id_a: FeatureId,
        id_b: Option<FeatureId>,
        message: String,
    },

    /// WKT parsing error.
    #[error("WKT parse error: {0}")]
    WktParse(String),

    /// The same key was produced by two chunks.
    #[error("Duplicate result key: {0}")]
    DuplicateResultKey(String),

    /// The worker pool could not be started.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

fn feature_context(id: &Option<FeatureId>) -> String {
    match id {
        Some(id) => format!(", feature {}", id),
        None => String::new(),
    }
}

impl OverlayError {
    /// Create an incompatible types error
    pub fn incompatible(msg: impl Into<String>) -> Self {
        Self::IncompatibleTypes(msg.into())
    }

    /// Create an unknown dataset type error
    pub fn unknown_type(msg: impl Into<String>) -> Self {
        Self::UnknownDatasetType(msg.into())
    }

    /// Create a malformed metadata error
    pub fn malformed_meta(msg: impl Into<String>) -> Self {
        Self::MalformedMeta(msg.into())
    }

    /// Wrap a failure raised while a chunk was processing `feature`.
    pub fn pool_task(chunk: usize, feature: Option<FeatureId>, source: OverlayError) -> Self {
        Self::PoolTask {
            chunk,
            feature,
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through `PoolTask` wrappers.
    pub fn root_cause(&self) -> &OverlayError {
        match self {
            Self::PoolTask { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type for overlay operations.
pub type Result<T> = std::result::Result<T, OverlayError>;
