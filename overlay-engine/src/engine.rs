//! Engine facade: one call from two datasets to the final records.

use crate::aggregate::{IntersectionRecord, RemainingRecord, RetainedPiece};
use crate::config::OverlayConfig;
use crate::dataset::{Dataset, DatasetMetadata, FeatureId};
use crate::dispatch::ParallelDispatcher;
use crate::error::{OverlayError, Result};
use crate::geometry::GeometryKind;
use crate::index::SpatialIndex;
use crate::projection::{Crs, Projector, ProjectionContext};
use crate::worker::PreparedLayer;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;

/// Result of one overlay run.
#[derive(Debug, Clone)]
pub struct OverlayOutput {
    pub intersections: IntersectionRecord,
    pub remaining: RemainingRecord,
    /// Intersection geometries, when retained.
    pub pieces: Option<Vec<RetainedPiece>>,
    pub first: DatasetMetadata,
    pub second: DatasetMetadata,
    /// CRS the overlay itself was computed in.
    pub working_crs: Crs,
}

/// Row linking a retained intersection piece to one of its source features.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedRecord {
    pub piece_id: usize,
    pub feature: FeatureId,
    pub measure: f64,
}

impl OverlayOutput {
    /// Records relating each retained piece to its first- and
    /// second-dataset features, as `(first_rows, second_rows)`.
    ///
    /// Empty when geometries were not retained.
    pub fn derived_records(&self) -> (Vec<DerivedRecord>, Vec<DerivedRecord>) {
        let Some(pieces) = &self.pieces else {
            return (Vec::new(), Vec::new());
        };
        pieces
            .iter()
            .map(|p| {
                (
                    DerivedRecord {
                        piece_id: p.piece_id,
                        feature: p.id_a.clone(),
                        measure: p.measure,
                    },
                    DerivedRecord {
                        piece_id: p.piece_id,
                        feature: p.id_b.clone(),
                        measure: p.measure,
                    },
                )
            })
            .unzip()
    }
}

/// Spatial overlay engine.
///
/// Holds configuration and the projection context; no state is kept
/// between runs.
#[derive(Debug, Clone)]
pub struct OverlayEngine {
    config: OverlayConfig,
    projection: ProjectionContext,
}

impl OverlayEngine {
    /// Engine measuring with `projector` into the configured equal-area CRS.
    pub fn new(config: OverlayConfig, projector: Arc<dyn Projector>) -> Self {
        let equal_area = Crs::new(&config.equal_area_crs);
        Self {
            config,
            projection: ProjectionContext::new(projector, equal_area),
        }
    }

    /// Engine with an explicit projection context.
    pub fn with_projection(config: OverlayConfig, projection: ProjectionContext) -> Self {
        Self { config, projection }
    }

    pub fn projection(&self) -> &ProjectionContext {
        &self.projection
    }

    /// Overlay `first` against the polygons of `second`.
    pub fn run(&self, first: &Dataset, second: &Dataset) -> Result<OverlayOutput> {
        let span = tracing::info_span!(
            "overlay_run",
            first_features = first.len(),
            second_features = second.len(),
            first_kind = %first.kind(),
            second_kind = %second.kind(),
        );
        let _guard = span.enter();

        let kind = self.resolve_kind(first, second)?;

        let working_crs = if first.crs() == second.crs() {
            first.crs().clone()
        } else {
            Crs::wgs84()
        };
        tracing::debug!(working_crs = %working_crs, "working CRS selected");

        let first_layer = PreparedLayer::prepare(first, &working_crs, &self.projection)?;
        let second_layer = PreparedLayer::prepare(second, &working_crs, &self.projection)?;
        let index = SpatialIndex::build(second_layer.shapes());
        let measure = self.projection.to_equal_area(&working_crs)?;

        let dispatcher = ParallelDispatcher::new(self.config.workers, self.config.chunking.clone())
            .with_retain_geometries(self.config.retain_geometries);
        let results = dispatcher.dispatch(&first_layer, &index, &second_layer, kind, &measure)?;

        tracing::info!(
            intersections = results.intersections.len(),
            remaining = results.remaining.len(),
            "overlay complete"
        );

        Ok(OverlayOutput {
            intersections: results.intersections,
            remaining: results.remaining,
            pieces: results.pieces,
            first: first.metadata(),
            second: second.metadata(),
            working_crs,
        })
    }

    /// Equal-area measure of every feature of `dataset`.
    pub fn feature_measures(&self, dataset: &Dataset) -> Result<FxHashMap<FeatureId, f64>> {
        let measure = self.projection.to_equal_area(dataset.crs())?;
        dataset
            .iter()
            .zip(dataset.shapes())
            .map(|(feature, shape)| {
                measure
                    .measure(shape)
                    .map(|m| (feature.id.clone(), m))
                    .map_err(|e| OverlayError::InvalidGeometry {
                        id_a: feature.id.clone(),
                        id_b: None,
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    fn resolve_kind(&self, first: &Dataset, second: &Dataset) -> Result<GeometryKind> {
        let kind = first.kind();
        if kind == GeometryKind::Mixed {
            return Err(OverlayError::incompatible(
                "first dataset mixes geometry kinds",
            ));
        }
        if second.kind() != GeometryKind::Polygon {
            return Err(OverlayError::incompatible(format!(
                "second dataset must be polygonal, found {}",
                second.kind()
            )));
        }
        if let Some(requested) = self.config.measure_kind {
            if requested != kind {
                return Err(OverlayError::incompatible(format!(
                    "{} measure requested for a {} dataset",
                    requested, kind
                )));
            }
        }
        Ok(kind)
    }
}
