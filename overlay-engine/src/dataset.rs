//! Feature datasets.
//!
//! A [`Dataset`] is an immutable, ordered collection of features with a
//! declared CRS. Identifiers are assigned once at build time: either the
//! zero-based position of the feature in load order, or the value of a
//! designated unique attribute field.
//!
//! All validation happens in [`DatasetBuilder::build`], before any
//! geometric work: id uniqueness, id field presence, and geometry
//! classification.

use crate::error::{OverlayError, Result};
use crate::geometry::{GeometryKind, Shape};
use crate::projection::Crs;
use geo::CoordsIter;
use geo_types::Geometry;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Attribute mapping of a feature.
pub type Attributes = Map<String, Value>;

/// Feature identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureId {
    /// Zero-based position in load order.
    Index(u64),
    /// Integer value of the id field.
    Int(i64),
    /// Integer value of the id field above `i64::MAX`.
    UInt(u64),
    /// String value of the id field.
    Text(String),
}

impl FeatureId {
    /// Interpret an attribute value as an identifier.
    ///
    /// Only strings and integers are accepted; floats, booleans, nulls and
    /// nested values cannot serve as stable identifiers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(FeatureId::Text(s.clone())),
            Value::Number(n) => n
                .as_i64()
                .map(FeatureId::Int)
                .or_else(|| n.as_u64().map(FeatureId::UInt)),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureId::Index(i) => write!(f, "{}", i),
            FeatureId::Int(i) => write!(f, "{}", i),
            FeatureId::UInt(i) => write!(f, "{}", i),
            FeatureId::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for FeatureId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FeatureId::Index(i) => serializer.serialize_u64(*i),
            FeatureId::Int(i) => serializer.serialize_i64(*i),
            FeatureId::UInt(i) => serializer.serialize_u64(*i),
            FeatureId::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl From<&str> for FeatureId {
    fn from(s: &str) -> Self {
        FeatureId::Text(s.to_string())
    }
}

/// A single feature: identifier, geometry, attributes.
#[derive(Debug, Clone)]
pub struct Feature {
    pub id: FeatureId,
    pub geometry: Geometry<f64>,
    pub attributes: Attributes,
}

/// Dataset metadata handed to serialization collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// CRS definition the features are stored in.
    pub crs: String,

    /// Geometry kind of the dataset.
    pub kind: GeometryKind,

    /// Name of the unique id field, if ids are not positional.
    pub id_field: Option<String>,

    /// Content hash (hex SHA-256 unless supplied by the loader).
    pub content_hash: String,

    /// Number of features.
    pub feature_count: usize,
}

/// Immutable collection of features.
#[derive(Debug, Clone)]
pub struct Dataset {
    features: Vec<Feature>,
    /// Normalised geometry per feature, same order as `features`.
    shapes: Vec<Shape>,
    crs: Crs,
    kind: GeometryKind,
    id_field: Option<String>,
    content_hash: String,
    positions: FxHashMap<FeatureId, usize>,
}

impl Dataset {
    /// Start building a dataset.
    pub fn builder() -> DatasetBuilder {
        DatasetBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Feature at a load-order position.
    pub fn get(&self, position: usize) -> Option<&Feature> {
        self.features.get(position)
    }

    /// Feature with the given identifier.
    pub fn feature(&self, id: &FeatureId) -> Option<&Feature> {
        self.position(id).and_then(|p| self.features.get(p))
    }

    /// Load-order position of an identifier.
    pub fn position(&self, id: &FeatureId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Iterate features in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Normalised shapes, in load order.
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn metadata(&self) -> DatasetMetadata {
        DatasetMetadata {
            crs: self.crs.to_string(),
            kind: self.kind,
            id_field: self.id_field.clone(),
            content_hash: self.content_hash.clone(),
            feature_count: self.features.len(),
        }
    }
}

/// Builder for [`Dataset`].
///
/// Loaders push raw geometries and attributes in file iteration order.
#[derive(Debug, Default)]
pub struct DatasetBuilder {
    crs: Option<String>,
    id_field: Option<String>,
    content_hash: Option<String>,
    entries: Vec<(Geometry<f64>, Attributes)>,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CRS definition. Absent or empty means WGS 84.
    pub fn crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    /// Use the values of `field` as feature identifiers.
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    /// Use a loader-computed hash (e.g. of the source file) instead of
    /// hashing the features.
    pub fn content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Append a feature.
    pub fn push(&mut self, geometry: Geometry<f64>, attributes: Attributes) {
        self.entries.push((geometry, attributes));
    }

    /// Append a feature, builder style.
    pub fn with_feature(mut self, geometry: Geometry<f64>, attributes: Attributes) -> Self {
        self.push(geometry, attributes);
        self
    }

    /// Validate and freeze the dataset.
    ///
    /// Identifier checks run first so that duplicate ids are reported
    /// before any geometry is inspected.
    pub fn build(self) -> Result<Dataset> {
        if self.entries.is_empty() {
            return Err(OverlayError::unknown_type("dataset has no features"));
        }

        let crs = match &self.crs {
            Some(def) => Crs::new(def),
            None => Crs::wgs84(),
        };

        let ids = assign_ids(&self.entries, self.id_field.as_deref())?;

        let mut shapes = Vec::with_capacity(self.entries.len());
        let mut kind: Option<GeometryKind> = None;
        for ((geometry, _), id) in self.entries.iter().zip(&ids) {
            let shape = match GeometryKind::of(geometry) {
                None => {
                    return Err(OverlayError::unknown_type(format!(
                        "feature {} has an empty geometry",
                        id
                    )))
                }
                Some(GeometryKind::Mixed) => {
                    return Err(OverlayError::unknown_type(format!(
                        "feature {} mixes geometry kinds in one collection",
                        id
                    )))
                }
                Some(_) => Shape::from_geometry(geometry).ok_or_else(|| {
                    OverlayError::unknown_type(format!("feature {} could not be normalised", id))
                })?,
            };
            kind = Some(match kind {
                None => shape.kind(),
                Some(k) => k.merge(shape.kind()),
            });
            shapes.push(shape);
        }
        let kind = kind.ok_or_else(|| OverlayError::unknown_type("dataset has no features"))?;

        let content_hash = match self.content_hash {
            Some(h) => h,
            None => content_digest(&ids, &self.entries),
        };

        let positions = ids
            .iter()
            .enumerate()
            .map(|(pos, id)| (id.clone(), pos))
            .collect();

        let features = self
            .entries
            .into_iter()
            .zip(ids)
            .map(|((geometry, attributes), id)| Feature {
                id,
                geometry,
                attributes,
            })
            .collect();

        tracing::debug!(
            kind = %kind,
            crs = %crs,
            id_field = ?self.id_field,
            "dataset built"
        );

        Ok(Dataset {
            features,
            shapes,
            crs,
            kind,
            id_field: self.id_field,
            content_hash,
            positions,
        })
    }
}

fn assign_ids(
    entries: &[(Geometry<f64>, Attributes)],
    field: Option<&str>,
) -> Result<Vec<FeatureId>> {
    let Some(field) = field else {
        return Ok((0..entries.len() as u64).map(FeatureId::Index).collect());
    };

    if !entries.iter().any(|(_, attrs)| attrs.contains_key(field)) {
        return Err(OverlayError::malformed_meta(format!(
            "id field `{}` is not present in the dataset",
            field
        )));
    }

    let mut seen: FxHashMap<FeatureId, usize> = FxHashMap::default();
    let mut ids = Vec::with_capacity(entries.len());
    for (pos, (_, attrs)) in entries.iter().enumerate() {
        let value = attrs.get(field).ok_or_else(|| {
            OverlayError::malformed_meta(format!(
                "feature at position {} has no value for id field `{}`",
                pos, field
            ))
        })?;
        let id = FeatureId::from_value(value).ok_or_else(|| {
            OverlayError::malformed_meta(format!(
                "feature at position {} has a non-identifier value {} in field `{}`",
                pos, value, field
            ))
        })?;
        if seen.insert(id.clone(), pos).is_some() {
            return Err(OverlayError::DuplicateFieldId {
                field: field.to_string(),
                value: id,
            });
        }
        ids.push(id);
    }
    Ok(ids)
}

/// SHA-256 over identifiers and raw coordinates, in load order.
fn content_digest(ids: &[FeatureId], entries: &[(Geometry<f64>, Attributes)]) -> String {
    let mut hasher = Sha256::new();
    for (id, (geometry, _)) in ids.iter().zip(entries) {
        hasher.update(id.to_string().as_bytes());
        hasher.update([0u8]);
        for c in geometry.coords_iter() {
            hasher.update(c.x.to_le_bytes());
            hasher.update(c.y.to_le_bytes());
        }
        hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
}
