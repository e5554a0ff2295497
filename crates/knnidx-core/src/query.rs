//! k-nearest-neighbor queries and result marshaling.
//!
//! The engine hands back a max-heap (farthest hit on top). [`drain_into`]
//! pops it into caller-owned buffers from the last slot to the first, which
//! leaves the buffers in ascending-distance order.

use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{Candidate, GraphEngine, Label};
use crate::error::{KnnError, KnnResult};
use crate::index::Index;

/// A single query result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    /// Label of the matched vector.
    pub label: Label,
    /// Distance to the query (lower is closer).
    pub distance: f32,
}

/// Drain `heap` into `labels` and `distances` in ascending-distance order.
///
/// Returns the number of entries written. Both buffers must hold at least
/// `heap.len()` entries.
pub fn drain_into(
    mut heap: BinaryHeap<Candidate>,
    labels: &mut [Label],
    distances: &mut [f32],
) -> KnnResult<usize> {
    let count = heap.len();
    let room = labels.len().min(distances.len());
    if room < count {
        return Err(KnnError::BufferTooSmall {
            needed: count,
            actual: room,
        });
    }

    for slot in (0..count).rev() {
        let Some(candidate) = heap.pop() else {
            return Err(KnnError::internal("result heap drained early"));
        };
        labels[slot] = candidate.label;
        distances[slot] = candidate.distance;
    }

    Ok(count)
}

impl<E: GraphEngine> Index<E> {
    /// Write the `k` nearest neighbors of `vector` into caller buffers.
    ///
    /// Results are in ascending distance. Returns `min(k, element_count)`;
    /// fewer results than `k` is not an error.
    ///
    /// # Errors
    ///
    /// - `UninitializedAccess` without an engine
    /// - `InvalidParameter` if `k == 0`
    /// - `BufferTooSmall` if either buffer is shorter than `k`
    /// - `DimensionMismatch` for a wrong-length query
    pub fn query_into(
        &self,
        vector: &[f32],
        k: usize,
        labels: &mut [Label],
        distances: &mut [f32],
    ) -> KnnResult<usize> {
        let engine = self.engine()?;
        if k == 0 {
            return Err(KnnError::invalid_parameter("k", "must be at least 1"));
        }
        let room = labels.len().min(distances.len());
        if room < k {
            return Err(KnnError::BufferTooSmall {
                needed: k,
                actual: room,
            });
        }

        let prepared = self.space().prepare(vector)?;
        let heap = engine.search_knn(&prepared, k);
        let written = drain_into(heap, labels, distances)?;

        if written < k {
            debug!(
                "Retrieved {} items instead of {}. Items in the index: {}",
                written,
                k,
                engine.element_count()
            );
        }
        Ok(written)
    }

    /// The `k` nearest neighbors of `vector`, closest first.
    pub fn query(&self, vector: &[f32], k: usize) -> KnnResult<Vec<QueryHit>> {
        let mut labels = vec![0; k];
        let mut distances = vec![0.0; k];
        let written = self.query_into(vector, k, &mut labels, &mut distances)?;

        Ok(labels
            .into_iter()
            .zip(distances)
            .take(written)
            .map(|(label, distance)| QueryHit { label, distance })
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
