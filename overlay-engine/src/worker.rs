//! Exact overlay of one feature against its candidates.
//!
//! # Pipeline
//!
//! ```text
//! candidate positions (from SpatialIndex)
//!        │
//!        ▼
//! ┌──────────────────────┐
//! │ exact intersects?    │  drop index false positives
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │ boolean op in the    │  polygon: intersection
//! │ working CRS          │  line: clip, point: containment
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │ keep parts of the    │  degenerate results are discarded
//! │ overlay kind         │
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │ project to equal     │  lazily, one piece at a time
//! │ area and measure     │
//! └──────────────────────┘
//! ```
//!
//! The second dataset is always polygonal. The first dataset's kind decides
//! which boolean operation runs and which parts of its result are kept.

use crate::dataset::{Dataset, FeatureId};
use crate::error::{OverlayError, Result};
use crate::geometry::{GeometryKind, Shape};
use crate::projection::{Crs, ProjectionContext, Transform};
use geo::{BooleanOps, Euclidean, Intersects, Length};
use geo_types::{LineString, MultiLineString, MultiPoint, MultiPolygon};
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A dataset with its shapes expressed in the run's working CRS.
///
/// Borrows the dataset's own shapes when no reprojection is needed.
#[derive(Debug)]
pub struct PreparedLayer<'a> {
    dataset: &'a Dataset,
    shapes: Cow<'a, [Shape]>,
}

impl<'a> PreparedLayer<'a> {
    /// Express `dataset` in `working`.
    pub fn prepare(dataset: &'a Dataset, working: &Crs, ctx: &ProjectionContext) -> Result<Self> {
        let transform = ctx.between(dataset.crs(), working)?;
        let shapes = if transform.is_identity() {
            Cow::Borrowed(dataset.shapes())
        } else {
            tracing::debug!(
                from = %dataset.crs(),
                to = %working,
                features = dataset.len(),
                "reprojecting layer into working CRS"
            );
            let projected = dataset
                .shapes()
                .iter()
                .map(|shape| transform.apply(shape).map(Cow::into_owned))
                .collect::<Result<Vec<_>>>()?;
            Cow::Owned(projected)
        };
        Ok(Self { dataset, shapes })
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Identifier of the feature at `position`.
    pub fn id(&self, position: usize) -> Option<&'a FeatureId> {
        self.dataset.get(position).map(|f| &f.id)
    }
}

/// One non-empty intersection of a first-layer feature with a
/// second-layer feature.
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionPiece {
    /// Load-order position of the second-layer feature.
    pub position_b: usize,
    pub id_b: FeatureId,
    /// Intersection geometry in the working CRS.
    pub geometry: Shape,
    /// Equal-area measure of `geometry`.
    pub measure: f64,
}

/// Computes exact intersections against the second layer.
///
/// Holds only shared references; one worker is created per chunk and used
/// from a single thread.
#[derive(Debug, Clone, Copy)]
pub struct OverlayWorker<'a> {
    kind: GeometryKind,
    second: &'a PreparedLayer<'a>,
    measure: &'a Transform,
}

impl<'a> OverlayWorker<'a> {
    /// Create a worker overlaying features of `kind` against `second`.
    ///
    /// `measure` maps the working CRS into the equal-area CRS.
    pub fn new(
        kind: GeometryKind,
        second: &'a PreparedLayer<'a>,
        measure: &'a Transform,
    ) -> Result<Self> {
        if kind == GeometryKind::Mixed {
            return Err(OverlayError::incompatible(
                "cannot overlay a dataset of mixed geometry kinds",
            ));
        }
        let second_kind = second.dataset().kind();
        if second_kind != GeometryKind::Polygon {
            return Err(OverlayError::incompatible(format!(
                "second dataset must be polygonal, found {}",
                second_kind
            )));
        }
        Ok(Self {
            kind,
            second,
            measure,
        })
    }

    /// Intersect one feature with each candidate, in candidate order.
    pub fn overlay(
        &self,
        id_a: &FeatureId,
        shape_a: &Shape,
        candidates: &[usize],
    ) -> Result<Vec<IntersectionPiece>> {
        if shape_a.kind() != self.kind {
            return Err(OverlayError::incompatible(format!(
                "feature {} is a {} in a {} overlay",
                id_a,
                shape_a.kind(),
                self.kind
            )));
        }

        let mut pieces = Vec::new();
        for &position_b in candidates {
            let id_b = self.second.id(position_b).ok_or_else(|| {
                OverlayError::InvalidGeometry {
                    id_a: id_a.clone(),
                    id_b: None,
                    message: format!("candidate position {} is out of range", position_b),
                }
            })?;
            let polygons = match self.second.shapes().get(position_b) {
                Some(Shape::Polygons(mp)) => mp,
                Some(other) => {
                    return Err(OverlayError::incompatible(format!(
                        "feature {} of the second dataset is a {}",
                        id_b,
                        other.kind()
                    )))
                }
                None => {
                    return Err(OverlayError::InvalidGeometry {
                        id_a: id_a.clone(),
                        id_b: Some(id_b.clone()),
                        message: "candidate has no geometry".to_string(),
                    })
                }
            };

            let Some(geometry) = intersect(shape_a, polygons).map_err(|message| {
                OverlayError::InvalidGeometry {
                    id_a: id_a.clone(),
                    id_b: Some(id_b.clone()),
                    message,
                }
            })?
            else {
                continue;
            };

            let measure = self.measure.measure(&geometry).map_err(|e| {
                OverlayError::InvalidGeometry {
                    id_a: id_a.clone(),
                    id_b: Some(id_b.clone()),
                    message: e.to_string(),
                }
            })?;
            pieces.push(IntersectionPiece {
                position_b,
                id_b: id_b.clone(),
                geometry,
                measure,
            });
        }
        Ok(pieces)
    }
}

/// Exact intersection of `shape` with `polygons`, restricted to the kind of
/// `shape`. `Ok(None)` when the two do not overlap in a non-degenerate way.
fn intersect(
    shape: &Shape,
    polygons: &MultiPolygon<f64>,
) -> std::result::Result<Option<Shape>, String> {
    let result = catch_geometry_panic(|| {
        if !shape.intersects_polygons(polygons) {
            return None;
        }
        Some(match shape {
            Shape::Polygons(mp) => Shape::Polygons(mp.intersection(polygons)),
            Shape::Lines(mls) => {
                let clipped = polygons.clip(mls, false);
                Shape::Lines(MultiLineString::new(
                    clipped
                        .0
                        .into_iter()
                        .filter(|ls: &LineString<f64>| ls.length::<Euclidean>() > 0.0)
                        .collect(),
                ))
            }
            Shape::Points(mp) => Shape::Points(MultiPoint::new(
                mp.0.iter().filter(|p| polygons.intersects(*p)).copied().collect(),
            )),
        })
    })?;

    Ok(result.filter(|shape| !shape.is_degenerate()))
}

/// Run `f`, turning a panic into an error message.
///
/// Predicates and boolean operations on invalid input can panic inside the
/// geometry library.
pub(crate) fn catch_geometry_panic<T>(f: impl FnOnce() -> T) -> std::result::Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("geometry operation panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("geometry operation panicked: {}", s)
    } else {
        "geometry operation panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Attributes;
    use crate::geometry::parse_wkt;

    fn dataset(wkts: &[&str]) -> Dataset {
        let mut builder = Dataset::builder();
        for wkt in wkts {
            builder.push(parse_wkt(wkt).unwrap(), Attributes::new());
        }
        builder.build().unwrap()
    }

    fn shape(wkt: &str) -> Shape {
        Shape::from_geometry(&parse_wkt(wkt).unwrap()).unwrap()
    }

    fn cells() -> Dataset {
        dataset(&[
            "POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))",
            "POLYGON((1 0, 2 0, 2 1, 1 1, 1 0))",
        ])
    }

    #[test]
    fn test_polygon_overlay_measures_each_candidate() {
        let b = cells();
        let ctx = ProjectionContext::identity();
        let layer = PreparedLayer::prepare(&b, b.crs(), &ctx).unwrap();
        let measure = Transform::identity(b.crs().clone());
        let worker = OverlayWorker::new(GeometryKind::Polygon, &layer, &measure).unwrap();

        let a = shape("POLYGON((0.5 0.5, 1.5 0.5, 1.5 1.5, 0.5 1.5, 0.5 0.5))");
        let pieces = worker.overlay(&FeatureId::Index(0), &a, &[0, 1]).unwrap();

        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].id_b, FeatureId::Index(0));
        assert_eq!(pieces[1].id_b, FeatureId::Index(1));
        for piece in &pieces {
            assert!((piece.measure - 0.25).abs() < 1e-9, "{:?}", piece);
        }
    }

    #[test]
    fn test_false_positive_and_touching_candidates_are_dropped() {
        let b = cells();
        let ctx = ProjectionContext::identity();
        let layer = PreparedLayer::prepare(&b, b.crs(), &ctx).unwrap();
        let measure = Transform::identity(b.crs().clone());
        let worker = OverlayWorker::new(GeometryKind::Polygon, &layer, &measure).unwrap();

        // Shares an edge with cell 0 and is disjoint from cell 1.
        let a = shape("POLYGON((-1 0, 0 0, 0 1, -1 1, -1 0))");
        let pieces = worker.overlay(&FeatureId::Index(0), &a, &[0, 1]).unwrap();
        assert!(pieces.is_empty());
    }

    #[test]
    fn test_line_overlay_clips_to_each_cell() {
        let b = cells();
        let ctx = ProjectionContext::identity();
        let layer = PreparedLayer::prepare(&b, b.crs(), &ctx).unwrap();
        let measure = Transform::identity(b.crs().clone());
        let worker = OverlayWorker::new(GeometryKind::Line, &layer, &measure).unwrap();

        let a = shape("LINESTRING(-0.5 0.5, 1.5 0.5)");
        let pieces = worker.overlay(&FeatureId::Index(0), &a, &[0, 1]).unwrap();

        assert_eq!(pieces.len(), 2);
        assert!((pieces[0].measure - 1.0).abs() < 1e-9);
        assert!((pieces[1].measure - 0.5).abs() < 1e-9);
        assert_eq!(pieces[0].geometry.kind(), GeometryKind::Line);
    }

    #[test]
    fn test_point_overlay_counts_boundary_points_for_both_cells() {
        let b = cells();
        let ctx = ProjectionContext::identity();
        let layer = PreparedLayer::prepare(&b, b.crs(), &ctx).unwrap();
        let measure = Transform::identity(b.crs().clone());
        let worker = OverlayWorker::new(GeometryKind::Point, &layer, &measure).unwrap();

        let a = shape("MULTIPOINT((0.5 0.5), (1 0.5), (5 5))");
        let pieces = worker.overlay(&FeatureId::Index(0), &a, &[0, 1]).unwrap();

        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].measure, 2.0);
        assert_eq!(pieces[1].measure, 1.0);
    }

    #[test]
    fn test_non_polygonal_second_layer_is_incompatible() {
        let b = dataset(&["LINESTRING(0 0, 1 1)"]);
        let ctx = ProjectionContext::identity();
        let layer = PreparedLayer::prepare(&b, b.crs(), &ctx).unwrap();
        let measure = Transform::identity(b.crs().clone());

        let err = OverlayWorker::new(GeometryKind::Point, &layer, &measure).unwrap_err();
        assert!(matches!(err, OverlayError::IncompatibleTypes(_)));
    }

    #[test]
    fn test_feature_kind_must_match_worker_kind() {
        let b = cells();
        let ctx = ProjectionContext::identity();
        let layer = PreparedLayer::prepare(&b, b.crs(), &ctx).unwrap();
        let measure = Transform::identity(b.crs().clone());
        let worker = OverlayWorker::new(GeometryKind::Line, &layer, &measure).unwrap();

        let a = shape("POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))");
        let err = worker.overlay(&FeatureId::Index(0), &a, &[0]).unwrap_err();
        assert!(matches!(err, OverlayError::IncompatibleTypes(_)));
    }

    #[test]
    fn test_piece_measure_failure_names_both_features() {
        struct Reject;
        impl crate::projection::CoordTransform for Reject {
            fn transform_coord(
                &self,
                _c: geo_types::Coord<f64>,
            ) -> std::result::Result<geo_types::Coord<f64>, String> {
                Err("no inverse".to_string())
            }
        }
        struct RejectProjector;
        impl crate::projection::Projector for RejectProjector {
            fn transformer(
                &self,
                _from: &Crs,
                _to: &Crs,
            ) -> Result<Option<std::sync::Arc<dyn crate::projection::CoordTransform>>> {
                Ok(Some(std::sync::Arc::new(Reject)))
            }
        }

        let b = cells();
        let ctx = ProjectionContext::new(std::sync::Arc::new(RejectProjector), Crs::mollweide());
        let layer = PreparedLayer::prepare(&b, b.crs(), &ctx).unwrap();
        let measure = ctx.to_equal_area(b.crs()).unwrap();
        let worker = OverlayWorker::new(GeometryKind::Polygon, &layer, &measure).unwrap();

        let a = shape("POLYGON((0.5 0.5, 1.5 0.5, 1.5 1.5, 0.5 1.5, 0.5 0.5))");
        let err = worker
            .overlay(&FeatureId::Text("a".into()), &a, &[1])
            .unwrap_err();
        match err {
            OverlayError::InvalidGeometry { id_a, id_b, message } => {
                assert_eq!(id_a, FeatureId::Text("a".into()));
                assert_eq!(id_b, Some(FeatureId::Index(1)));
                assert!(message.contains("no inverse"), "{message}");
            }
            other => panic!("expected InvalidGeometry, got {:?}", other),
        }
    }

    #[test]
    fn test_geometry_panics_become_messages() {
        assert_eq!(catch_geometry_panic(|| 7), Ok(7));
        let err = catch_geometry_panic(|| -> u8 { panic!("ring self-intersects") }).unwrap_err();
        assert_eq!(err, "geometry operation panicked: ring self-intersects");
        let err =
            catch_geometry_panic(|| -> u8 { panic!("edge {} is degenerate", 3) }).unwrap_err();
        assert_eq!(err, "geometry operation panicked: edge 3 is degenerate");
    }

    #[test]
    fn test_prepare_borrows_when_crs_matches() {
        let b = cells();
        let ctx = ProjectionContext::identity();
        let layer = PreparedLayer::prepare(&b, b.crs(), &ctx).unwrap();
        assert!(matches!(layer.shapes, Cow::Borrowed(_)));
        assert_eq!(layer.id(1), Some(&FeatureId::Index(1)));
        assert_eq!(layer.id(2), None);
    }
}
