//! Parallel fan-out over the first dataset.
//!
//! The first dataset is split into contiguous chunks of load-order
//! positions. Each chunk runs sequentially on one worker thread: candidate
//! lookup, exact overlay and remaining measure per feature. Chunk results
//! are gathered once all chunks have finished and merged in chunk order.
//!
//! # Failure policy
//!
//! The first failing chunk sets a shared flag; chunks that have not
//! started yet are skipped, chunks already running finish and their output
//! is discarded. The error reported is the failure of the lowest-numbered
//! failing chunk, wrapped in [`OverlayError::PoolTask`] with the feature it
//! was processing. Nothing partial is returned. A panic while processing a
//! feature is reported the same way, as [`OverlayError::InvalidGeometry`]
//! for that feature.

use crate::aggregate::{AggregatedResults, ChunkResult, ResultAggregator};
use crate::config::ChunkingConfig;
use crate::dataset::FeatureId;
use crate::error::{OverlayError, Result};
use crate::geometry::{GeometryKind, Shape};
use crate::index::SpatialIndex;
use crate::projection::Transform;
use crate::remaining::RemainingMeasureCalculator;
use crate::worker::{catch_geometry_panic, OverlayWorker, PreparedLayer};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

/// Contiguous chunk boundaries over `0..len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    ranges: Vec<Range<usize>>,
}

impl ChunkPlan {
    /// Plan chunks for `len` features and `workers` threads.
    ///
    /// Aims for `len / min_chunk_size` chunks, capped at `max_chunks`, but
    /// never fewer than `workers` (nor more than `len`). Chunk sizes differ
    /// by at most one.
    pub fn new(len: usize, workers: usize, config: &ChunkingConfig) -> Self {
        if len == 0 {
            return Self { ranges: Vec::new() };
        }
        let count = (len / config.min_chunk_size.max(1))
            .min(config.max_chunks.max(1))
            .max(workers)
            .clamp(1, len);

        let base = len / count;
        let extra = len % count;
        let mut ranges = Vec::with_capacity(count);
        let mut start = 0;
        for i in 0..count {
            let size = base + usize::from(i < extra);
            ranges.push(start..start + size);
            start += size;
        }
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Size of the largest chunk.
    pub fn max_chunk_size(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }
}

/// Runs the overlay over all chunks of the first dataset.
#[derive(Debug, Clone)]
pub struct ParallelDispatcher {
    workers: usize,
    chunking: ChunkingConfig,
    retain_geometries: bool,
}

impl ParallelDispatcher {
    pub fn new(workers: usize, chunking: ChunkingConfig) -> Self {
        Self {
            workers,
            chunking,
            retain_geometries: false,
        }
    }

    /// Keep intersection geometries in the aggregated output.
    pub fn with_retain_geometries(mut self, retain: bool) -> Self {
        self.retain_geometries = retain;
        self
    }

    /// Overlay every feature of `first` against `second`.
    ///
    /// `index` must have been built over `second`'s shapes. `measure` maps
    /// the working CRS into the equal-area CRS.
    pub fn dispatch(
        &self,
        first: &PreparedLayer<'_>,
        index: &SpatialIndex,
        second: &PreparedLayer<'_>,
        kind: GeometryKind,
        measure: &Transform,
    ) -> Result<AggregatedResults> {
        let worker = OverlayWorker::new(kind, second, measure)?;
        let calculator = RemainingMeasureCalculator::new(kind, measure);
        let plan = ChunkPlan::new(first.len(), self.workers, &self.chunking);

        let span = tracing::debug_span!(
            "overlay_dispatch",
            features = first.len(),
            chunks = plan.len(),
            chunk_size = plan.max_chunk_size(),
            workers = self.workers,
        );
        let _guard = span.enter();

        let run = ChunkRun {
            first,
            index,
            worker,
            calculator,
            retain: self.retain_geometries,
        };

        let results: Vec<Result<Option<ChunkResult>>> = if self.workers <= 1 {
            let mut results = Vec::with_capacity(plan.len());
            for (chunk, range) in plan.ranges().iter().enumerate() {
                let result = run.run(chunk, range.clone());
                let failed = result.is_err();
                results.push(result.map(Some));
                if failed {
                    break;
                }
            }
            results
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .thread_name(|i| format!("overlay-worker-{}", i))
                .build()
                .map_err(|e| OverlayError::ThreadPool(e.to_string()))?;

            let failed = AtomicBool::new(false);
            let parent = tracing::Span::current();
            pool.install(|| {
                plan.ranges()
                    .par_iter()
                    .enumerate()
                    .map(|(chunk, range)| {
                        let _p = parent.enter();
                        if failed.load(Ordering::Acquire) {
                            tracing::trace!(chunk, "skipping chunk after failure");
                            return Ok(None);
                        }
                        let result = run.run(chunk, range.clone());
                        if result.is_err() {
                            failed.store(true, Ordering::Release);
                        }
                        result.map(Some)
                    })
                    .collect()
            })
        };

        let mut aggregator = ResultAggregator::new(self.retain_geometries);
        for result in results {
            if let Some(chunk) = result? {
                aggregator.absorb(chunk)?;
            }
        }
        tracing::debug!(chunks = aggregator.chunks(), "overlay dispatch complete");
        Ok(aggregator.finish())
    }
}

/// Shared, read-only inputs of every chunk.
struct ChunkRun<'r, 'a> {
    first: &'r PreparedLayer<'a>,
    index: &'r SpatialIndex,
    worker: OverlayWorker<'r>,
    calculator: RemainingMeasureCalculator<'r>,
    retain: bool,
}

impl ChunkRun<'_, '_> {
    fn run(&self, chunk: usize, range: Range<usize>) -> Result<ChunkResult> {
        let span = tracing::trace_span!(
            "overlay_chunk",
            chunk,
            start = range.start,
            len = range.len()
        );
        let _guard = span.enter();
        tracing::debug!(chunk, start = range.start, len = range.len(), "chunk started");

        let mut out = ChunkResult {
            chunk,
            ..Default::default()
        };
        for position in range {
            let Some(id_a) = self.first.id(position) else {
                continue;
            };
            let shape = &self.first.shapes()[position];
            catch_geometry_panic(|| self.feature(id_a, shape, &mut out))
                .unwrap_or_else(|message| {
                    Err(OverlayError::InvalidGeometry {
                        id_a: id_a.clone(),
                        id_b: None,
                        message,
                    })
                })
                .map_err(|e| OverlayError::pool_task(chunk, Some(id_a.clone()), e))?;
        }

        tracing::debug!(
            chunk,
            intersections = out.intersections.len(),
            "chunk finished"
        );
        Ok(out)
    }

    /// Overlay one feature and record its rows in `out`.
    fn feature(&self, id_a: &FeatureId, shape: &Shape, out: &mut ChunkResult) -> Result<()> {
        let candidates = match shape.bbox() {
            Some(bbox) => self.index.query(&bbox),
            None => Vec::new(),
        };
        let pieces = self.worker.overlay(id_a, shape, &candidates)?;
        let remaining = self.calculator.remaining(shape, &pieces)?;

        out.remaining.insert(id_a.clone(), remaining)?;
        for piece in pieces {
            out.intersections
                .insert(id_a.clone(), piece.id_b.clone(), piece.measure)?;
            if self.retain {
                out.pieces
                    .push((id_a.clone(), piece.id_b, piece.geometry, piece.measure));
            }
        }
        Ok(())
    }
}
