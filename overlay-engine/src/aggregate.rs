//! Merging of per-chunk results.
//!
//! Chunks partition the first dataset, so keys from different chunks never
//! collide. A collision means the partition is broken and is reported as
//! an error instead of overwriting the earlier value.

use crate::dataset::FeatureId;
use crate::error::{OverlayError, Result};
use crate::geometry::Shape;
use rustc_hash::FxHashMap;
use serde::Serialize;

/// `(id_a, id_b) -> measure` for every non-empty intersection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntersectionRecord {
    entries: FxHashMap<(FeatureId, FeatureId), f64>,
}

impl IntersectionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a measure; an existing key is an error.
    pub fn insert(&mut self, id_a: FeatureId, id_b: FeatureId, measure: f64) -> Result<()> {
        use std::collections::hash_map::Entry;
        match self.entries.entry((id_a, id_b)) {
            Entry::Occupied(e) => Err(OverlayError::DuplicateResultKey(format!(
                "intersection ({}, {})",
                e.key().0,
                e.key().1
            ))),
            Entry::Vacant(e) => {
                e.insert(measure);
                Ok(())
            }
        }
    }

    pub fn get(&self, id_a: &FeatureId, id_b: &FeatureId) -> Option<f64> {
        // Tuple keys cannot be borrowed piecewise; clone for the lookup.
        self.entries.get(&(id_a.clone(), id_b.clone())).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&FeatureId, &FeatureId, f64)> {
        self.entries.iter().map(|((a, b), m)| (a, b, *m))
    }

    /// Rows ordered by `(id_a, id_b)`, for stable presentation.
    pub fn sorted_rows(&self) -> Vec<(FeatureId, FeatureId, f64)> {
        let mut rows: Vec<_> = self
            .entries
            .iter()
            .map(|((a, b), m)| (a.clone(), b.clone(), *m))
            .collect();
        rows.sort_by(|x, y| (&x.0, &x.1).cmp(&(&y.0, &y.1)));
        rows
    }

    fn absorb(&mut self, other: IntersectionRecord) -> Result<()> {
        for ((a, b), m) in other.entries {
            self.insert(a, b, m)?;
        }
        Ok(())
    }
}

/// `id_a -> remaining measure` for every feature of the first dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemainingRecord {
    entries: FxHashMap<FeatureId, f64>,
}

impl RemainingRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a remaining measure; an existing key is an error.
    pub fn insert(&mut self, id_a: FeatureId, measure: f64) -> Result<()> {
        use std::collections::hash_map::Entry;
        match self.entries.entry(id_a) {
            Entry::Occupied(e) => Err(OverlayError::DuplicateResultKey(format!(
                "remaining {}",
                e.key()
            ))),
            Entry::Vacant(e) => {
                e.insert(measure);
                Ok(())
            }
        }
    }

    pub fn get(&self, id_a: &FeatureId) -> Option<f64> {
        self.entries.get(id_a).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FeatureId, f64)> {
        self.entries.iter().map(|(a, m)| (a, *m))
    }

    /// Rows ordered by id.
    pub fn sorted_rows(&self) -> Vec<(FeatureId, f64)> {
        let mut rows: Vec<_> = self.entries.iter().map(|(a, m)| (a.clone(), *m)).collect();
        rows.sort_by(|x, y| x.0.cmp(&y.0));
        rows
    }

    fn absorb(&mut self, other: RemainingRecord) -> Result<()> {
        for (a, m) in other.entries {
            self.insert(a, m)?;
        }
        Ok(())
    }
}

/// An intersection geometry kept for downstream use.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetainedPiece {
    /// Sequential piece number, assigned in `(id_a, id_b)` order.
    pub piece_id: usize,
    pub id_a: FeatureId,
    pub id_b: FeatureId,
    #[serde(skip)]
    pub geometry: Shape,
    pub measure: f64,
}

/// Output of one chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkResult {
    pub chunk: usize,
    pub intersections: IntersectionRecord,
    pub remaining: RemainingRecord,
    /// `(id_a, id_b, geometry, measure)`; empty unless geometries are retained.
    pub pieces: Vec<(FeatureId, FeatureId, Shape, f64)>,
}

/// Merged output of all chunks.
#[derive(Debug, Clone, Default)]
pub struct AggregatedResults {
    pub intersections: IntersectionRecord,
    pub remaining: RemainingRecord,
    pub pieces: Option<Vec<RetainedPiece>>,
}

/// Disjoint-key union of chunk results.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    intersections: IntersectionRecord,
    remaining: RemainingRecord,
    pieces: Vec<(FeatureId, FeatureId, Shape, f64)>,
    retain: bool,
    chunks: usize,
}

impl ResultAggregator {
    pub fn new(retain_geometries: bool) -> Self {
        Self {
            retain: retain_geometries,
            ..Default::default()
        }
    }

    /// Merge one chunk. Fails on the first key already present.
    pub fn absorb(&mut self, chunk: ChunkResult) -> Result<()> {
        self.intersections.absorb(chunk.intersections)?;
        self.remaining.absorb(chunk.remaining)?;
        if self.retain {
            self.pieces.extend(chunk.pieces);
        }
        self.chunks += 1;
        Ok(())
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn finish(self) -> AggregatedResults {
        let pieces = if self.retain {
            let mut pieces = self.pieces;
            pieces.sort_by(|x, y| (&x.0, &x.1).cmp(&(&y.0, &y.1)));
            Some(
                pieces
                    .into_iter()
                    .enumerate()
                    .map(|(piece_id, (id_a, id_b, geometry, measure))| RetainedPiece {
                        piece_id,
                        id_a,
                        id_b,
                        geometry,
                        measure,
                    })
                    .collect(),
            )
        } else {
            None
        };
        AggregatedResults {
            intersections: self.intersections,
            remaining: self.remaining,
            pieces,
        }
    }
}
