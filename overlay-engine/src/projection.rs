//! Coordinate reference systems and the projection service boundary.
//!
//! Projection math lives outside this crate. Callers plug in a [`Projector`]
//! that hands out [`CoordTransform`]s for a CRS pair; the engine resolves
//! every transform it needs once per run into an immutable [`Transform`]
//! that workers share without locking.
//!
//! Transforms into the equal-area frame are applied lazily: the overlay
//! itself runs in the working frame and only the finished intersection
//! geometry is projected, right before it is measured.

use crate::error::{OverlayError, Result};
use crate::geometry::Shape;
use geo::MapCoords;
use geo_types::Coord;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// PROJ definition of WGS 84 geographic coordinates.
pub const WGS84: &str = "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs";

/// PROJ definition of the Mollweide equal-area projection (ESRI:54009).
pub const MOLLWEIDE: &str =
    "+proj=moll +lon_0=0 +x_0=0 +y_0=0 +ellps=WGS84 +datum=WGS84 +units=m +no_defs";

/// A coordinate reference system, identified by its definition string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(String);

impl Crs {
    /// Create a CRS from a definition string.
    ///
    /// Loaders often report an absent CRS as an empty string or a bare
    /// `+no_defs`; both mean WGS 84.
    pub fn new(definition: impl AsRef<str>) -> Self {
        let trimmed = definition.as_ref().trim();
        if trimmed.is_empty() || trimmed == "+no_defs" {
            Self::wgs84()
        } else {
            Crs(trimmed.to_string())
        }
    }

    pub fn wgs84() -> Self {
        Crs(WGS84.to_string())
    }

    pub fn mollweide() -> Self {
        Crs(MOLLWEIDE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this CRS is in geographic (longitude/latitude) degrees.
    pub fn is_geographic(&self) -> bool {
        let s = self.0.to_ascii_lowercase();
        s.contains("+proj=longlat") || s.contains("+proj=latlong") || s == "epsg:4326"
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pointwise coordinate transformation between two CRSs.
pub trait CoordTransform: Send + Sync {
    /// Transform one coordinate. Errors are reported as plain messages and
    /// wrapped with the CRS pair by [`Transform`].
    fn transform_coord(&self, coord: Coord<f64>) -> std::result::Result<Coord<f64>, String>;
}

/// Source of coordinate transforms (the external projection service).
pub trait Projector: Send + Sync {
    /// Resolve the transform from `from` to `to`.
    ///
    /// `Ok(None)` means the two systems share coordinates and no
    /// transformation is needed.
    fn transformer(&self, from: &Crs, to: &Crs) -> Result<Option<Arc<dyn CoordTransform>>>;
}

/// Projector that treats every CRS pair as coordinate-identical.
///
/// Suitable when the input data is already in an equal-area planar frame,
/// and for tests that measure in native units.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProjector;

impl Projector for IdentityProjector {
    fn transformer(&self, _from: &Crs, _to: &Crs) -> Result<Option<Arc<dyn CoordTransform>>> {
        Ok(None)
    }
}

/// A resolved, immutable transform between two CRSs.
#[derive(Clone)]
pub struct Transform {
    from: Crs,
    to: Crs,
    inner: Option<Arc<dyn CoordTransform>>,
}

impl Transform {
    /// Transform that leaves coordinates of `crs` untouched.
    pub fn identity(crs: Crs) -> Self {
        Self {
            from: crs.clone(),
            to: crs,
            inner: None,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.inner.is_none()
    }

    /// Project a shape. Identity transforms borrow the input.
    pub fn apply<'a>(&self, shape: &'a Shape) -> Result<Cow<'a, Shape>> {
        let Some(inner) = &self.inner else {
            return Ok(Cow::Borrowed(shape));
        };
        let t: &dyn CoordTransform = inner.as_ref();
        let projected = match shape {
            Shape::Polygons(mp) => mp.try_map_coords(|c| t.transform_coord(c)).map(Shape::Polygons),
            Shape::Lines(mls) => mls.try_map_coords(|c| t.transform_coord(c)).map(Shape::Lines),
            Shape::Points(mp) => mp.try_map_coords(|c| t.transform_coord(c)).map(Shape::Points),
        };
        projected
            .map(Cow::Owned)
            .map_err(|message| OverlayError::Projection {
                from: self.from.to_string(),
                to: self.to.to_string(),
                message,
            })
    }

    /// Measure a shape in this transform's target frame.
    ///
    /// Point counts do not depend on the frame and are never projected.
    pub fn measure(&self, shape: &Shape) -> Result<f64> {
        match shape {
            Shape::Points(mp) => Ok(mp.0.len() as f64),
            _ => Ok(self.apply(shape)?.measure()),
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("identity", &self.is_identity())
            .finish()
    }
}

/// Projection context for one engine instance.
///
/// Holds the projector and the equal-area target. Transforms resolved from
/// it live as long as the run that asked for them.
#[derive(Clone)]
pub struct ProjectionContext {
    projector: Arc<dyn Projector>,
    equal_area: Crs,
}

impl ProjectionContext {
    pub fn new(projector: Arc<dyn Projector>, equal_area: Crs) -> Self {
        Self {
            projector,
            equal_area,
        }
    }

    /// Context with no coordinate transformation at all.
    pub fn identity() -> Self {
        Self::new(Arc::new(IdentityProjector), Crs::mollweide())
    }

    /// Resolve the transform from `from` to `to`.
    ///
    /// Equal systems, and pairs of geographic systems, need no transform.
    pub fn between(&self, from: &Crs, to: &Crs) -> Result<Transform> {
        if from == to || (from.is_geographic() && to.is_geographic()) {
            return Ok(Transform::identity(from.clone()));
        }
        let inner = self.projector.transformer(from, to)?;
        Ok(Transform {
            from: from.clone(),
            to: to.clone(),
            inner,
        })
    }

    /// Resolve the transform from `from` into the equal-area frame.
    pub fn to_equal_area(&self, from: &Crs) -> Result<Transform> {
        self.between(from, &self.equal_area)
    }
}

impl Default for ProjectionContext {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for ProjectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionContext")
            .field("equal_area", &self.equal_area)
            .finish_non_exhaustive()
    }
}
