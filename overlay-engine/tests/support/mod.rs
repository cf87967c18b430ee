//! Shared fixtures for overlay-engine integration tests.

// Not every test crate uses every helper.
#![allow(dead_code)]

pub mod span_capture;

use geo_types::{Coord, Geometry};
use overlay_engine::{
    parse_wkt, Attributes, CoordTransform, Crs, Dataset, DatasetBuilder, OverlayConfig,
    OverlayEngine, Projector, Result,
};
use serde_json::{json, Value};
use std::sync::Arc;

// =============================================================================
// Geometry fixtures
// =============================================================================

/// Axis-aligned square with lower-left corner `(x, y)`.
pub fn square(x: f64, y: f64, size: f64) -> Geometry<f64> {
    parse_wkt(&format!(
        "POLYGON(({x0} {y0}, {x1} {y0}, {x1} {y1}, {x0} {y1}, {x0} {y0}))",
        x0 = x,
        y0 = y,
        x1 = x + size,
        y1 = y + size
    ))
    .unwrap()
}

pub fn wkt(s: &str) -> Geometry<f64> {
    parse_wkt(s).unwrap()
}

pub fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        _ => panic!("attributes must be a JSON object"),
    }
}

/// `nx` × `ny` grid of unit squares starting at `(x0, y0)`, row by row.
/// Features carry a `cell` attribute `"r{row}c{col}"`.
pub fn grid_builder(x0: f64, y0: f64, nx: usize, ny: usize) -> DatasetBuilder {
    let mut builder = Dataset::builder();
    for row in 0..ny {
        for col in 0..nx {
            builder.push(
                square(x0 + col as f64, y0 + row as f64, 1.0),
                attrs(json!({ "cell": format!("r{}c{}", row, col) })),
            );
        }
    }
    builder
}

/// Unit-square grid with positional ids.
pub fn grid(x0: f64, y0: f64, nx: usize, ny: usize) -> Dataset {
    grid_builder(x0, y0, nx, ny).build().unwrap()
}

/// Dataset of one feature per WKT string, positional ids.
pub fn dataset(wkts: &[&str]) -> Dataset {
    let mut builder = Dataset::builder();
    for s in wkts {
        builder.push(wkt(s), Attributes::new());
    }
    builder.build().unwrap()
}

// =============================================================================
// Engines and mock projections
// =============================================================================

/// Engine measuring in native units.
pub fn engine(config: OverlayConfig) -> OverlayEngine {
    OverlayEngine::new(config, Arc::new(overlay_engine::IdentityProjector))
}

pub fn engine_with(config: OverlayConfig, projector: impl Projector + 'static) -> OverlayEngine {
    OverlayEngine::new(config, Arc::new(projector))
}

/// Uniform scaling, so projected areas grow by `factor²`.
pub struct Scale(pub f64);

impl CoordTransform for Scale {
    fn transform_coord(&self, c: Coord<f64>) -> std::result::Result<Coord<f64>, String> {
        Ok(Coord {
            x: c.x * self.0,
            y: c.y * self.0,
        })
    }
}

pub struct ScaleProjector(pub f64);

impl Projector for ScaleProjector {
    fn transformer(
        &self,
        _from: &Crs,
        _to: &Crs,
    ) -> Result<Option<Arc<dyn CoordTransform>>> {
        Ok(Some(Arc::new(Scale(self.0))))
    }
}

/// Identity transform that rejects coordinates with `x > max_x`.
pub struct BoundedDomain {
    pub max_x: f64,
}

impl CoordTransform for BoundedDomain {
    fn transform_coord(&self, c: Coord<f64>) -> std::result::Result<Coord<f64>, String> {
        if c.x > self.max_x {
            Err(format!("x={} outside projection domain", c.x))
        } else {
            Ok(c)
        }
    }
}

pub struct BoundedProjector {
    pub max_x: f64,
}

impl Projector for BoundedProjector {
    fn transformer(
        &self,
        _from: &Crs,
        _to: &Crs,
    ) -> Result<Option<Arc<dyn CoordTransform>>> {
        Ok(Some(Arc::new(BoundedDomain { max_x: self.max_x })))
    }
}

/// Identity transform that panics on coordinates with `x > max_x`.
pub struct PanicBeyond {
    pub max_x: f64,
}

impl CoordTransform for PanicBeyond {
    fn transform_coord(&self, c: Coord<f64>) -> std::result::Result<Coord<f64>, String> {
        assert!(c.x <= self.max_x, "x={} cannot be transformed", c.x);
        Ok(c)
    }
}

pub struct PanickingProjector {
    pub max_x: f64,
}

impl Projector for PanickingProjector {
    fn transformer(
        &self,
        _from: &Crs,
        _to: &Crs,
    ) -> Result<Option<Arc<dyn CoordTransform>>> {
        Ok(Some(Arc::new(PanicBeyond { max_x: self.max_x })))
    }
}

/// A projected (non-geographic) CRS for fixtures that need a real transform
/// into the equal-area frame.
pub const LAEA_EUROPE: &str =
    "+proj=laea +lat_0=52 +lon_0=10 +x_0=4321000 +y_0=3210000 +ellps=GRS80 +units=m +no_defs";

pub fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {} ± {}, got {}",
        expected,
        tol,
        actual
    );
}
