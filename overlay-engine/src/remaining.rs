//! Remaining (outside-intersection) measure.
//!
//! For a feature with total measure `T`, individual intersection measures
//! `m_1 … m_k` and union measure `U` of all intersection geometries:
//!
//! - polygons: `T − U`
//! - lines and points: `(T − U) · Σm / U`, or `T` when `U = 0`
//!
//! Neighbouring polygons of the second dataset may both claim a line
//! segment (or point) lying on their shared boundary, so `Σm` can exceed
//! `U` for lines and points. The rescaling keeps the relative allocation
//! of the naive remainder in line with the double-counted individual
//! measures. Polygonal intersections of a planar partition never overlap
//! and need no correction.
//!
//! The union is computed in the working CRS and measured in the
//! equal-area frame, like the pieces themselves.

use crate::error::{OverlayError, Result};
use crate::geometry::{GeometryKind, Shape};
use crate::projection::Transform;
use crate::worker::IntersectionPiece;
use geo::BooleanOps;
use geo_types::{Coord, Line, LineString, MultiLineString, MultiPoint, MultiPolygon};
use rustc_hash::FxHashSet;

/// Relative tolerance for matching intersection segments to the segments
/// of the original line.
const SEGMENT_EPSILON: f64 = 1e-9;

/// Remaining measure from total, individual sum, and union measures.
pub fn remaining_measure(kind: GeometryKind, total: f64, sum: f64, union: f64) -> Result<f64> {
    let remaining = match kind {
        GeometryKind::Polygon => total - union,
        GeometryKind::Line | GeometryKind::Point => {
            if union > 0.0 {
                (total - union) * (sum / union)
            } else {
                total
            }
        }
        GeometryKind::Mixed => {
            return Err(OverlayError::incompatible(
                "remaining measure is undefined for mixed geometries",
            ))
        }
    };
    // Rounding can leave a tiny negative remainder for fully covered features.
    Ok(remaining.max(0.0))
}

/// Computes remaining measures for features of one kind.
#[derive(Debug, Clone, Copy)]
pub struct RemainingMeasureCalculator<'a> {
    kind: GeometryKind,
    measure: &'a Transform,
}

impl<'a> RemainingMeasureCalculator<'a> {
    /// `measure` maps the working CRS into the equal-area CRS.
    pub fn new(kind: GeometryKind, measure: &'a Transform) -> Self {
        Self { kind, measure }
    }

    /// Remaining measure of `original` given its intersection pieces.
    pub fn remaining(&self, original: &Shape, pieces: &[IntersectionPiece]) -> Result<f64> {
        self.check_kind(original)?;
        for piece in pieces {
            self.check_kind(&piece.geometry)?;
        }
        let total = self.measure.measure(original)?;
        if pieces.is_empty() {
            return Ok(total);
        }
        let sum: f64 = pieces.iter().map(|p| p.measure).sum();
        let union = self.union_measure(original, pieces.iter().map(|p| &p.geometry))?;
        remaining_measure(self.kind, total, sum, union)
    }

    /// Remaining measure of `original` given bare intersection geometries,
    /// such as those retained from an earlier run.
    pub fn remaining_for_geometries(&self, original: &Shape, pieces: &[Shape]) -> Result<f64> {
        self.check_kind(original)?;
        let mut sum = 0.0;
        for piece in pieces {
            self.check_kind(piece)?;
            sum += self.measure.measure(piece)?;
        }
        let total = self.measure.measure(original)?;
        if pieces.is_empty() {
            return Ok(total);
        }
        let union = self.union_measure(original, pieces.iter())?;
        remaining_measure(self.kind, total, sum, union)
    }

    fn check_kind(&self, shape: &Shape) -> Result<()> {
        if shape.kind() == self.kind {
            Ok(())
        } else {
            Err(OverlayError::incompatible(format!(
                "{} geometry in a {} remaining-measure calculation",
                shape.kind(),
                self.kind
            )))
        }
    }

    fn union_measure<'s>(
        &self,
        original: &Shape,
        pieces: impl Iterator<Item = &'s Shape>,
    ) -> Result<f64> {
        let union = match original {
            Shape::Polygons(_) => Shape::Polygons(union_polygons(pieces)),
            Shape::Lines(base) => Shape::Lines(union_lines(base, pieces)),
            Shape::Points(_) => Shape::Points(union_points(pieces)),
        };
        self.measure.measure(&union)
    }
}

fn union_polygons<'s>(pieces: impl Iterator<Item = &'s Shape>) -> MultiPolygon<f64> {
    let mut acc: Option<MultiPolygon<f64>> = None;
    for piece in pieces {
        if let Shape::Polygons(mp) = piece {
            acc = Some(match acc {
                None => mp.clone(),
                Some(prev) => prev.union(mp),
            });
        }
    }
    acc.unwrap_or_else(|| MultiPolygon::new(vec![]))
}

/// Distinct points across all pieces.
fn union_points<'s>(pieces: impl Iterator<Item = &'s Shape>) -> MultiPoint<f64> {
    let mut seen: FxHashSet<(u64, u64)> = FxHashSet::default();
    let mut points = Vec::new();
    for piece in pieces {
        if let Shape::Points(mp) = piece {
            for p in &mp.0 {
                if seen.insert((p.x().to_bits(), p.y().to_bits())) {
                    points.push(*p);
                }
            }
        }
    }
    MultiPoint::new(points)
}

/// Union of line pieces cut from `base`.
///
/// Every piece segment lies on one segment of the original line. Pieces
/// are mapped to parameter intervals on those segments, the intervals are
/// merged, and each merged interval becomes one output segment. A piece
/// segment that matches no base segment is kept unchanged.
fn union_lines<'s>(
    base: &MultiLineString<f64>,
    pieces: impl Iterator<Item = &'s Shape>,
) -> MultiLineString<f64> {
    let base_segments: Vec<Line<f64>> = base.0.iter().flat_map(|ls| ls.lines()).collect();
    let mut intervals: Vec<Vec<(f64, f64)>> = vec![Vec::new(); base_segments.len()];
    let mut unmatched: Vec<LineString<f64>> = Vec::new();

    for piece in pieces {
        let Shape::Lines(mls) = piece else { continue };
        for segment in mls.0.iter().flat_map(|ls| ls.lines()) {
            let hit = base_segments
                .iter()
                .enumerate()
                .find_map(|(i, b)| segment_interval(b, &segment).map(|iv| (i, iv)));
            match hit {
                Some((i, iv)) => intervals[i].push(iv),
                None => unmatched.push(LineString::new(vec![segment.start, segment.end])),
            }
        }
    }

    let mut merged: Vec<LineString<f64>> = Vec::new();
    for (segment, mut ivs) in base_segments.iter().zip(intervals) {
        if ivs.is_empty() {
            continue;
        }
        ivs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut current = ivs[0];
        for &(start, end) in &ivs[1..] {
            if start <= current.1 {
                current.1 = current.1.max(end);
            } else {
                merged.push(sub_segment(segment, current));
                current = (start, end);
            }
        }
        merged.push(sub_segment(segment, current));
    }
    merged.extend(unmatched);
    MultiLineString::new(merged)
}

/// Parameter interval `[t0, t1]` covered by `piece` on `base`, if `piece`
/// is collinear with and lies on `base`.
fn segment_interval(base: &Line<f64>, piece: &Line<f64>) -> Option<(f64, f64)> {
    let d = base.delta();
    let len2 = d.x * d.x + d.y * d.y;
    if len2 == 0.0 {
        return None;
    }
    let len = len2.sqrt();
    let tol = SEGMENT_EPSILON * len.max(1.0);

    let param = |c: Coord<f64>| -> Option<f64> {
        let v = c - base.start;
        let cross = d.x * v.y - d.y * v.x;
        if (cross / len).abs() > tol {
            return None;
        }
        let t = (v.x * d.x + v.y * d.y) / len2;
        let t_tol = tol / len;
        if t < -t_tol || t > 1.0 + t_tol {
            return None;
        }
        Some(t.clamp(0.0, 1.0))
    };

    let t0 = param(piece.start)?;
    let t1 = param(piece.end)?;
    Some((t0.min(t1), t0.max(t1)))
}

fn sub_segment(base: &Line<f64>, (t0, t1): (f64, f64)) -> LineString<f64> {
    let d = base.delta();
    let at = |t: f64| Coord {
        x: base.start.x + d.x * t,
        y: base.start.y + d.y * t,
    };
    LineString::new(vec![at(t0), at(t1)])
}
