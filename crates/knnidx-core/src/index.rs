//! Index lifecycle.
//!
//! An [`Index`] owns its metric descriptor and, once initialized or loaded,
//! exactly one graph engine. The lifecycle is:
//!
//! ```text
//!                initialize_empty                 load_from_path
//! Uninitialized ─────────────────> Initialized ─────────────────┐
//!       │                                                       v
//!       └──────────── load_from_path ──────────────────────>  Loaded ─┐
//!                                                               ^     │ load_from_path
//!                                                               └─────┘ (Replaced)
//! ```
//!
//! There is no way back to `Uninitialized`; dropping the index releases the
//! descriptor and the engine.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::engine::{inspect_index_file, EngineParams, GraphEngine, HnswEngine, Label};
use crate::error::{KnnError, KnnResult};
use crate::metric::{MetricKind, MetricSpace};

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of an [`Index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No engine yet.
    Uninitialized,
    /// Engine created empty by `initialize_empty`.
    Initialized,
    /// Engine rebuilt from a persisted file.
    Loaded,
}

impl IndexState {
    /// Get the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Uninitialized => "uninitialized",
            IndexState::Initialized => "initialized",
            IndexState::Loaded => "loaded",
        }
    }
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of [`Index::load_from_path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The index had no engine before the load.
    Fresh,
    /// A previous engine was discarded and replaced by the loaded one.
    Replaced,
}

impl LoadOutcome {
    /// Whether a prior engine was discarded.
    pub fn replaced_previous(&self) -> bool {
        matches!(self, LoadOutcome::Replaced)
    }
}

// ============================================================================
// Index
// ============================================================================

/// Vector index: metric descriptor plus an optional graph engine.
pub struct Index<E: GraphEngine = HnswEngine> {
    space: MetricSpace,
    engine: Option<E>,
    state: IndexState,
}

impl<E: GraphEngine + std::fmt::Debug> std::fmt::Debug for Index<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("space", &self.space)
            .field("state", &self.state)
            .field("engine", &self.engine)
            .finish()
    }
}

impl<E: GraphEngine> Index<E> {
    /// Create an uninitialized index; normalization only for Angular.
    pub fn new(kind: MetricKind, dimension: usize) -> KnnResult<Self> {
        Self::with_normalize(kind, dimension, false)
    }

    /// Create an uninitialized index with an explicit normalize default.
    ///
    /// Angular ignores `normalize` and always normalizes.
    pub fn with_normalize(kind: MetricKind, dimension: usize, normalize: bool) -> KnnResult<Self> {
        let space = MetricSpace::select(kind, dimension, normalize)?;
        debug!(
            "Created index: metric={}, dim={}, normalize={}",
            space.kind(),
            space.dimension(),
            space.normalize()
        );
        Ok(Self {
            space,
            engine: None,
            state: IndexState::Uninitialized,
        })
    }

    /// Create and initialize an empty index from `config`.
    pub fn from_config(config: &IndexConfig) -> KnnResult<Self> {
        for warning in config.validate()? {
            warn!("Config warning: {}", warning);
        }
        let mut index = Self::with_normalize(config.metric, config.dimension, config.normalize)?;
        index.initialize_empty(&config.engine_params())?;
        index.set_search_breadth(config.ef_search)?;
        Ok(index)
    }

    /// Create an index from `config` and load `path` into it.
    ///
    /// `config.ef_search` overrides the value stored in the file.
    pub fn open_with_config(config: &IndexConfig, path: impl AsRef<Path>) -> KnnResult<Self> {
        for warning in config.validate()? {
            warn!("Config warning: {}", warning);
        }
        let mut index = Self::with_normalize(config.metric, config.dimension, config.normalize)?;
        index.load_from_path(path)?;
        index.set_search_breadth(config.ef_search)?;
        Ok(index)
    }

    /// Metric descriptor.
    pub fn space(&self) -> &MetricSpace {
        &self.space
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.space.dimension()
    }

    /// Metric family.
    pub fn metric(&self) -> MetricKind {
        self.space.kind()
    }

    /// Resolved normalize flag.
    pub fn normalize(&self) -> bool {
        self.space.normalize()
    }

    /// Lifecycle state.
    pub fn state(&self) -> IndexState {
        self.state
    }

    /// True once an engine exists.
    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    /// Allocate an empty engine.
    ///
    /// # Errors
    ///
    /// `AlreadyInitialized` if an engine exists; the index is left untouched.
    pub fn initialize_empty(&mut self, params: &EngineParams) -> KnnResult<()> {
        if self.engine.is_some() {
            return Err(KnnError::AlreadyInitialized);
        }

        let engine = E::create(self.space, params)?;
        self.engine = Some(engine);
        self.state = IndexState::Initialized;

        info!(
            "Initialized empty index: capacity={}, m={}, ef_construction={}, seed={}",
            params.capacity, params.m, params.ef_construction, params.seed
        );
        Ok(())
    }

    /// Replace the engine with one rebuilt from `path`.
    ///
    /// When an engine already exists it is dropped first and the call returns
    /// [`LoadOutcome::Replaced`]. If the file cannot be read the current engine
    /// is kept.
    pub fn load_from_path(&mut self, path: impl AsRef<Path>) -> KnnResult<LoadOutcome> {
        let path = path.as_ref();
        let loaded = E::construct_from_path(self.space, path)?;

        let outcome = match self.engine.take() {
            Some(previous) => {
                warn!(
                    "Loading {:?} into an already initialized index; discarding {} existing elements",
                    path,
                    previous.element_count()
                );
                drop(previous);
                LoadOutcome::Replaced
            }
            None => LoadOutcome::Fresh,
        };

        info!(
            "Loaded index from {:?}: {} elements",
            path,
            loaded.element_count()
        );
        self.engine = Some(loaded);
        self.state = IndexState::Loaded;
        Ok(outcome)
    }

    /// Persist the engine to `path`.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> KnnResult<()> {
        self.engine()?.save_index(path.as_ref())
    }

    /// Set the query-time search breadth.
    pub fn set_search_breadth(&mut self, ef: usize) -> KnnResult<()> {
        if ef == 0 {
            return Err(KnnError::invalid_parameter("ef", "must be positive"));
        }
        self.engine_mut()?.set_ef(ef);
        debug!("Search breadth set to {}", ef);
        Ok(())
    }

    /// Current query-time search breadth.
    pub fn search_breadth(&self) -> KnnResult<usize> {
        Ok(self.engine()?.ef())
    }

    /// Number of stored vectors.
    pub fn element_count(&self) -> KnnResult<usize> {
        Ok(self.engine()?.element_count())
    }

    /// Maximum number of stored vectors.
    pub fn capacity(&self) -> KnnResult<usize> {
        Ok(self.engine()?.capacity())
    }

    /// Engine parameters of the live engine.
    pub fn engine_params(&self) -> KnnResult<EngineParams> {
        Ok(self.engine()?.params())
    }

    /// Insert `vector` under `label`, normalizing it if the metric requires it.
    ///
    /// # Errors
    ///
    /// - `UninitializedAccess` without an engine
    /// - `DimensionMismatch` for a wrong-length vector
    /// - `DuplicateLabel` if `label` is already stored
    /// - `CapacityExceeded` when the engine is full
    pub fn insert(&mut self, vector: &[f32], label: Label) -> KnnResult<()> {
        let space = self.space;
        let engine = self.engine_mut()?;
        let prepared = space.prepare(vector)?;
        engine.add_point(&prepared, label)
    }

    /// Insert several vectors in order, stopping at the first failure.
    ///
    /// Returns the number of vectors inserted.
    pub fn insert_batch<'a, I>(&mut self, items: I) -> KnnResult<usize>
    where
        I: IntoIterator<Item = (Label, &'a [f32])>,
    {
        let mut inserted = 0;
        for (label, vector) in items {
            self.insert(vector, label)?;
            inserted += 1;
        }
        debug!("Inserted batch of {} vectors", inserted);
        Ok(inserted)
    }

    pub(crate) fn engine(&self) -> KnnResult<&E> {
        self.engine.as_ref().ok_or(KnnError::UninitializedAccess)
    }

    fn engine_mut(&mut self) -> KnnResult<&mut E> {
        self.engine.as_mut().ok_or(KnnError::UninitializedAccess)
    }
}

impl Index<HnswEngine> {
    /// Open a saved index, taking metric, dimension and normalize flag from
    /// the file header.
    pub fn open(path: impl AsRef<Path>) -> KnnResult<Self> {
        let path = path.as_ref();
        let info = inspect_index_file(path)?;
        let mut index = Self::with_normalize(info.metric, info.dimension, info.normalize)?;
        index.load_from_path(path)?;
        Ok(index)
    }
}

// ============================================================================
// Tests
// ============================================================================
