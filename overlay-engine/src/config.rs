//! Overlay engine configuration types.

use crate::geometry::GeometryKind;
use crate::projection::MOLLWEIDE;
use serde::{Deserialize, Serialize};

/// Chunk sizing for the parallel dispatcher.
///
/// The planner aims for chunks of at least `min_chunk_size` features and at
/// most `max_chunks` chunks, but never plans fewer chunks than there are
/// workers (unless there are fewer features than workers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Upper bound on the number of chunks.
    /// Default: 200
    pub max_chunks: usize,

    /// Preferred lower bound on features per chunk.
    /// Default: 20
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunks: 200,
            min_chunk_size: 20,
        }
    }
}

/// Configuration for an overlay run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Number of worker threads. `0` or `1` runs every chunk on the
    /// calling thread.
    /// Default: number of logical CPUs.
    pub workers: usize,

    /// Chunk sizing.
    pub chunking: ChunkingConfig,

    /// Requested measure semantics. When set, it must match the kind of the
    /// first dataset.
    pub measure_kind: Option<GeometryKind>,

    /// Keep intersection geometries in the output.
    /// Default: false
    pub retain_geometries: bool,

    /// CRS definition measures are expressed in.
    /// Default: Mollweide
    pub equal_area_crs: String,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            chunking: ChunkingConfig::default(),
            measure_kind: None,
            retain_geometries: false,
            equal_area_crs: MOLLWEIDE.to_string(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl OverlayConfig {
    /// Set the number of worker threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set chunk sizing.
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// Request a measure kind.
    pub fn with_measure_kind(mut self, kind: GeometryKind) -> Self {
        self.measure_kind = Some(kind);
        self
    }

    /// Keep intersection geometries in the output.
    pub fn with_retain_geometries(mut self, retain: bool) -> Self {
        self.retain_geometries = retain;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OverlayConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.chunking.max_chunks, 200);
        assert_eq!(config.chunking.min_chunk_size, 20);
        assert!(!config.retain_geometries);
        assert_eq!(config.equal_area_crs, MOLLWEIDE);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: OverlayConfig =
            serde_json::from_str(r#"{"workers": 3, "measure_kind": "line"}"#).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.measure_kind, Some(GeometryKind::Line));
        assert_eq!(config.chunking, ChunkingConfig::default());
    }
}
