//! Spatial overlay of two vector datasets.
//!
//! Given a first dataset (polygons, lines or points) and a second, polygonal
//! dataset, this crate computes:
//!
//! - **Intersection measures** for every intersecting feature pair: area,
//!   length or point count of the intersection, in an equal-area CRS
//! - **Remaining measures** for every first-dataset feature: the part lying
//!   outside all second-dataset features, corrected for line segments and
//!   points shared by neighbouring polygons
//!
//! Loading files, projection math and output encoding are left to the
//! caller. Projection is plugged in through the [`Projector`] trait.
//!
//! # Architecture
//!
//! ```text
//!   Dataset A            Dataset B
//!       │                    │
//!       ▼                    ▼
//!   PreparedLayer       PreparedLayer        shared native CRS, or WGS 84
//!       │                    │
//!       │                    ▼
//!       │              SpatialIndex          R-tree of bounding boxes
//!       │                    │
//!       └──────────┬─────────┘
//!                  ▼
//!          ParallelDispatcher                contiguous chunks of A
//!                  │
//!        ┌─────────┼─────────┐
//!        ▼         ▼         ▼
//!     chunk 0   chunk 1 … chunk n            per feature:
//!        │         │         │                 bbox prefilter
//!        │         │         │                 exact overlay (geo)
//!        │         │         │                 equal-area measure
//!        │         │         │                 remaining measure
//!        └─────────┼─────────┘
//!                  ▼
//!          ResultAggregator                  disjoint-key merge
//!                  │
//!                  ▼
//!   IntersectionRecord + RemainingRecord
//! ```
//!
//! # Modules
//!
//! - [`config`]: Engine configuration
//! - [`dataset`]: Features, identifiers and datasets
//! - [`geometry`]: Geometry kinds, normalised shapes and measures
//! - [`projection`]: CRS handling and the projection service boundary
//! - [`index`]: Bounding-box spatial index
//! - [`worker`]: Exact overlay of one feature against its candidates
//! - [`remaining`]: Remaining measure calculation
//! - [`dispatch`]: Chunk planning and parallel fan-out
//! - [`aggregate`]: Result records and merging
//! - [`engine`]: Engine facade
//! - [`error`]: Error types

pub mod aggregate;
pub mod config;
pub mod dataset;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod index;
pub mod projection;
pub mod remaining;
pub mod worker;

// Re-export key types
pub use aggregate::{IntersectionRecord, RemainingRecord, ResultAggregator, RetainedPiece};
pub use config::{ChunkingConfig, OverlayConfig};
pub use dataset::{Attributes, Dataset, DatasetBuilder, DatasetMetadata, Feature, FeatureId};
pub use dispatch::{ChunkPlan, ParallelDispatcher};
pub use engine::{DerivedRecord, OverlayEngine, OverlayOutput};
pub use error::{OverlayError, Result};
pub use geometry::{parse_wkt, BBox, GeometryKind, Shape};
pub use index::SpatialIndex;
pub use projection::{
    CoordTransform, Crs, IdentityProjector, ProjectionContext, Projector, Transform, MOLLWEIDE,
    WGS84,
};
pub use remaining::{remaining_measure, RemainingMeasureCalculator};
pub use worker::{IntersectionPiece, OverlayWorker, PreparedLayer};
