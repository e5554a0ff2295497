//! Graph engine abstraction.
//!
//! The index wrapper never builds or walks the navigable graph itself. It
//! talks to an engine through [`GraphEngine`], which mirrors the classic
//! HNSW library surface: add a point, search k nearest, save, construct from
//! a saved file, label lookup, raw data by internal id, `ef` tuning, element
//! count and the raw distance function.
//!
//! ## Available Engines
//!
//! - [`HnswEngine`]: backed by the `hnsw_rs` crate, persisted with bincode.

mod hnsw;

pub use hnsw::{inspect_index_file, HnswEngine, IndexFileInfo, SNAPSHOT_FORMAT_VERSION};

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KnnError, KnnResult};
use crate::metric::MetricSpace;

// ============================================================================
// Identifiers
// ============================================================================

/// Caller-supplied vector identifier.
pub type Label = u64;

/// Engine-assigned dense storage slot.
pub type InternalId = usize;

// ============================================================================
// EngineParams
// ============================================================================

/// Default graph fan-out.
pub const DEFAULT_M: usize = 50;

/// Default construction-time search breadth.
pub const DEFAULT_EF_CONSTRUCTION: usize = 50;

/// Default random seed.
pub const DEFAULT_SEED: u64 = 42;

/// Default query-time search breadth.
pub const DEFAULT_EF_SEARCH: usize = 10;

/// Largest graph fan-out `hnsw_rs` accepts. Beyond it the library exits the
/// process instead of returning an error.
pub const MAX_M: usize = 256;

/// Parameters for an empty engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineParams {
    /// Maximum number of elements.
    pub capacity: usize,
    /// Graph fan-out (neighbors per node per layer), at most [`MAX_M`].
    pub m: usize,
    /// Search breadth used while inserting.
    pub ef_construction: usize,
    /// Seed recorded with the index.
    ///
    /// It is validated, persisted and reported, but `hnsw_rs` draws levels
    /// from its own fixed-seed generator and never receives it. Changing the
    /// seed does not change the graph, and builds are not guaranteed to be
    /// reproducible across `hnsw_rs` versions.
    pub seed: u64,
}

impl EngineParams {
    /// Parameters for `capacity` elements with default graph shape.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            seed: DEFAULT_SEED,
        }
    }

    /// Set the graph fan-out.
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    /// Set the construction-time search breadth.
    pub fn with_ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject zero capacity or construction effort, and a fan-out outside
    /// `1..=MAX_M`.
    pub fn validate(&self) -> KnnResult<()> {
        if self.capacity == 0 {
            return Err(KnnError::invalid_parameter("capacity", "must be positive"));
        }
        if self.m == 0 {
            return Err(KnnError::invalid_parameter("m", "must be positive"));
        }
        if self.m > MAX_M {
            return Err(KnnError::invalid_parameter(
                "m",
                format!("must be at most {}, got {}", MAX_M, self.m),
            ));
        }
        if self.ef_construction == 0 {
            return Err(KnnError::invalid_parameter(
                "ef_construction",
                "must be positive",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Candidate
// ============================================================================

/// One search hit as produced by the engine.
///
/// Ordered by distance so that a `BinaryHeap<Candidate>` keeps the farthest
/// hit on top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub distance: f32,
    pub label: Label,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.label.cmp(&other.label))
    }
}

// ============================================================================
// GraphEngine Trait
// ============================================================================

/// Interface the index wrapper consumes.
///
/// Vectors handed to an engine are already prepared (dimension checked and
/// normalized when the space requires it).
pub trait GraphEngine: Send + Sync + Sized {
    /// Allocate an empty engine.
    fn create(space: MetricSpace, params: &EngineParams) -> KnnResult<Self>;

    /// Rebuild an engine from a file written by [`GraphEngine::save_index`].
    fn construct_from_path(space: MetricSpace, path: &Path) -> KnnResult<Self>;

    /// Insert `vector` under `label`.
    fn add_point(&mut self, vector: &[f32], label: Label) -> KnnResult<()>;

    /// Up to `k` nearest stored vectors, farthest on top of the heap.
    fn search_knn(&self, vector: &[f32], k: usize) -> BinaryHeap<Candidate>;

    /// Persist to `path`.
    fn save_index(&self, path: &Path) -> KnnResult<()>;

    /// Internal id backing `label`.
    fn label_lookup(&self, label: Label) -> Option<InternalId>;

    /// Stored vector at `id`.
    fn data_by_internal_id(&self, id: InternalId) -> Option<&[f32]>;

    /// Every stored label, in no particular order.
    fn labels(&self) -> Vec<Label>;

    /// Set the query-time search breadth.
    fn set_ef(&mut self, ef: usize);

    /// Current query-time search breadth.
    fn ef(&self) -> usize;

    /// Number of stored vectors.
    fn element_count(&self) -> usize;

    /// Maximum number of stored vectors.
    fn capacity(&self) -> usize;

    /// Engine parameters, including the seed.
    fn params(&self) -> EngineParams;

    /// Raw distance function of the engine's space.
    fn distance(&self, a: &[f32], b: &[f32]) -> f32;
}
