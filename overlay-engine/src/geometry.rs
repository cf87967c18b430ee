//! Geometry classification, flattening, and measures.
//!
//! This module provides:
//! - [`GeometryKind`]: the closed set of overlay kinds (polygon, line, point, mixed)
//! - [`Shape`]: a feature geometry normalised to a single multi-part kind
//! - Iterative flattening of nested geometry collections
//! - Planar measures (area, length, point count)
//!
//! # Design
//!
//! Input geometries arrive as `geo_types::Geometry`, which also admits
//! `Line`, `Rect`, `Triangle` and arbitrarily nested collections. Everything
//! is flattened once into a [`Shape`] so the overlay code only ever matches
//! on three variants. Flattening walks an explicit stack so that deeply
//! nested collections cannot exhaust the call stack.

use crate::error::{OverlayError, Result};
use geo::{Area, BoundingRect, Euclidean, Intersects, Length};
use geo_types::{
    Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of geometry a dataset (or a requested measure) deals in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    Polygon,
    Line,
    Point,
    Mixed,
}

impl GeometryKind {
    /// Classify a geometry by the kinds of its simple parts.
    ///
    /// Returns `None` for empty geometries (no simple parts at all).
    pub fn of(geom: &Geometry<f64>) -> Option<Self> {
        let mut found: Option<GeometryKind> = None;
        let mut stack = vec![geom];

        while let Some(g) = stack.pop() {
            let kind = match g {
                Geometry::GeometryCollection(gc) => {
                    stack.extend(gc.0.iter());
                    continue;
                }
                Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
                    GeometryKind::Polygon
                }
                Geometry::MultiPolygon(mp) if !mp.0.is_empty() => GeometryKind::Polygon,
                Geometry::LineString(_) | Geometry::Line(_) => GeometryKind::Line,
                Geometry::MultiLineString(mls) if !mls.0.is_empty() => GeometryKind::Line,
                Geometry::Point(_) => GeometryKind::Point,
                Geometry::MultiPoint(mp) if !mp.0.is_empty() => GeometryKind::Point,
                Geometry::MultiPolygon(_)
                | Geometry::MultiLineString(_)
                | Geometry::MultiPoint(_) => continue,
            };
            found = Some(match found {
                None => kind,
                Some(prev) if prev == kind => kind,
                Some(_) => GeometryKind::Mixed,
            });
        }

        found
    }

    /// Combine two kinds: equal kinds stay, anything else is mixed.
    pub fn merge(self, other: GeometryKind) -> GeometryKind {
        if self == other {
            self
        } else {
            GeometryKind::Mixed
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GeometryKind::Polygon => "polygon",
            GeometryKind::Line => "line",
            GeometryKind::Point => "point",
            GeometryKind::Mixed => "mixed",
        };
        f.write_str(s)
    }
}

/// A geometry normalised to one multi-part kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Polygons(MultiPolygon<f64>),
    Lines(MultiLineString<f64>),
    Points(MultiPoint<f64>),
}

impl Shape {
    /// Normalise a geometry whose parts are all of one kind.
    ///
    /// Returns `None` when the geometry is empty or mixes kinds.
    pub fn from_geometry(geom: &Geometry<f64>) -> Option<Self> {
        match GeometryKind::of(geom)? {
            GeometryKind::Mixed => None,
            kind => flatten_kind(geom, kind),
        }
    }

    /// Kind of this shape (never `Mixed`).
    pub fn kind(&self) -> GeometryKind {
        match self {
            Shape::Polygons(_) => GeometryKind::Polygon,
            Shape::Lines(_) => GeometryKind::Line,
            Shape::Points(_) => GeometryKind::Point,
        }
    }

    /// Planar measure: area, length, or number of points.
    pub fn measure(&self) -> f64 {
        match self {
            Shape::Polygons(mp) => mp.unsigned_area(),
            Shape::Lines(mls) => mls.length::<Euclidean>(),
            Shape::Points(mp) => mp.0.len() as f64,
        }
    }

    /// True when the shape has no parts or a zero measure.
    pub fn is_degenerate(&self) -> bool {
        match self {
            Shape::Points(mp) => mp.0.is_empty(),
            _ => self.measure() <= 0.0,
        }
    }

    /// Axis-aligned bounding box, `None` for empty shapes.
    pub fn bbox(&self) -> Option<BBox> {
        let rect = match self {
            Shape::Polygons(mp) => mp.bounding_rect(),
            Shape::Lines(mls) => mls.bounding_rect(),
            Shape::Points(mp) => mp.bounding_rect(),
        }?;
        Some(BBox {
            min_x: rect.min().x,
            min_y: rect.min().y,
            max_x: rect.max().x,
            max_y: rect.max().y,
        })
    }

    /// Exact intersection predicate against a polygonal shape.
    pub fn intersects_polygons(&self, polygons: &MultiPolygon<f64>) -> bool {
        match self {
            Shape::Polygons(mp) => mp.intersects(polygons),
            Shape::Lines(mls) => mls.intersects(polygons),
            Shape::Points(mp) => mp.intersects(polygons),
        }
    }
}

/// Extract all simple parts of `kind` from a geometry, descending into
/// collections.
///
/// Parts of other kinds are dropped. Returns `None` when nothing of `kind`
/// is found, or when `kind` is `Mixed`.
pub fn flatten_kind(geom: &Geometry<f64>, kind: GeometryKind) -> Option<Shape> {
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    let mut lines: Vec<LineString<f64>> = Vec::new();
    let mut points: Vec<Point<f64>> = Vec::new();
    let mut stack = vec![geom];

    while let Some(g) = stack.pop() {
        match g {
            // Reversed so parts come out in document order.
            Geometry::GeometryCollection(gc) => stack.extend(gc.0.iter().rev()),
            Geometry::Polygon(p) => polygons.push(p.clone()),
            Geometry::MultiPolygon(mp) => polygons.extend(mp.0.iter().cloned()),
            Geometry::Rect(r) => polygons.push(r.to_polygon()),
            Geometry::Triangle(t) => polygons.push(t.to_polygon()),
            Geometry::LineString(ls) => lines.push(ls.clone()),
            Geometry::MultiLineString(mls) => lines.extend(mls.0.iter().cloned()),
            Geometry::Line(l) => lines.push(LineString::new(vec![l.start, l.end])),
            Geometry::Point(p) => points.push(*p),
            Geometry::MultiPoint(mp) => points.extend(mp.0.iter().copied()),
        }
    }

    match kind {
        GeometryKind::Polygon if !polygons.is_empty() => {
            Some(Shape::Polygons(MultiPolygon::new(polygons)))
        }
        GeometryKind::Line if !lines.is_empty() => Some(Shape::Lines(MultiLineString::new(lines))),
        GeometryKind::Point if !points.is_empty() => Some(Shape::Points(MultiPoint::new(points))),
        _ => None,
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    /// Create a new bounding box.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Check if this bbox intersects another (touching edges count).
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }
}

/// Parse WKT string to geo-types Geometry.
pub fn parse_wkt(wkt: &str) -> Result<Geometry<f64>> {
    use std::str::FromStr;
    wkt::Wkt::from_str(wkt)
        .map_err(|e| OverlayError::WktParse(format!("{:?}", e)))
        .and_then(|w| {
            w.try_into()
                .map_err(|e: wkt::conversion::Error| OverlayError::WktParse(format!("{:?}", e)))
        })
}
