//! Bounding-box index over the second dataset.
//!
//! An R-tree of per-feature bounding boxes. Multi-part geometries get one
//! box covering all parts. Queries return a superset of the features whose
//! geometry intersects the query box; callers always refine candidates with
//! an exact geometric test.
//!
//! The index is immutable once built and is shared by reference across
//! worker threads.

use crate::geometry::{BBox, Shape};
use rstar::{RTree, RTreeObject, AABB};

/// Bounding box of one indexed feature, keyed by load-order position.
#[derive(Debug, Clone)]
struct IndexedBox {
    position: usize,
    bbox: BBox,
}

impl RTreeObject for IndexedBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min_x, self.bbox.min_y],
            [self.bbox.max_x, self.bbox.max_y],
        )
    }
}

/// Coarse spatial filter over a set of shapes.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    tree: RTree<IndexedBox>,
}

impl SpatialIndex {
    /// Build an index over `shapes`; positions in the slice are the keys
    /// returned by [`query`](Self::query).
    pub fn build(shapes: &[Shape]) -> Self {
        let boxes: Vec<IndexedBox> = shapes
            .iter()
            .enumerate()
            .filter_map(|(position, shape)| {
                shape.bbox().map(|bbox| IndexedBox { position, bbox })
            })
            .collect();

        tracing::trace!(entries = boxes.len(), "spatial index bulk load");

        Self {
            tree: RTree::bulk_load(boxes),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Positions of all indexed features whose box intersects `bbox`
    /// (touching counts), in ascending order.
    pub fn query(&self, bbox: &BBox) -> Vec<usize> {
        let envelope = AABB::from_corners([bbox.min_x, bbox.min_y], [bbox.max_x, bbox.max_y]);
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.position)
            .collect();
        hits.sort_unstable();
        hits
    }
}
