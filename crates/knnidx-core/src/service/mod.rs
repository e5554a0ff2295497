//! Partitioned k-NN service.
//!
//! A [`KnnService`] serves many independent partitions, for example one per
//! catalog owner. Each partition is made of index parts:
//!
//! - searchable parts, queried together and merged into one top-k list
//! - extra parts, whose vectors can be fetched and used to compose queries
//!   but never appear in search results
//!
//! Every part in a service shares one metric, dimension and normalize flag.
//! [`KnnService::get_closest_items`] builds a query from stored labels with a
//! registered [`QueryModel`] and searches one partition with it.
//!
//! ## Modules
//!
//! - `loader`: part file naming and [`KnnService::load_dir`]
//! - `model`: query models ([`AverageModel`])
//! - `region`: [`RegionRouter`], one service per region directory

mod loader;
mod model;
mod region;

pub use loader::{PartFile, PartKind, PART_EXTENSION};
pub use model::{AverageModel, ComposedQuery, QueryModel, AVERAGE_MODEL};
pub use region::{RegionRouter, REGION_DIR_PREFIX};

use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::str::FromStr;

use tracing::debug;

use crate::engine::{Candidate, Label};
use crate::error::{KnnError, KnnResult};
use crate::index::Index;
use crate::metric::{MetricKind, MetricSpace};
use crate::query::QueryHit;

/// Partition identifier.
pub type PartitionId = i32;

// ============================================================================
// LabelRef
// ============================================================================

/// A label qualified by the partition that stores it.
///
/// Parses from and prints as `partition:label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelRef {
    pub partition: PartitionId,
    pub label: Label,
}

impl LabelRef {
    pub fn new(partition: PartitionId, label: Label) -> Self {
        Self { partition, label }
    }
}

impl std::fmt::Display for LabelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.partition, self.label)
    }
}

impl FromStr for LabelRef {
    type Err = KnnError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            KnnError::invalid_parameter(
                "label",
                format!("expected <partition>:<label>, got '{}'", value),
            )
        };
        let (partition, label) = value.trim().split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            partition: partition.trim().parse().map_err(|_| invalid())?,
            label: label.trim().parse().map_err(|_| invalid())?,
        })
    }
}

// ============================================================================
// Partition
// ============================================================================

/// Index parts served under one partition id.
#[derive(Debug, Default)]
pub struct Partition {
    searchable: Vec<Index>,
    extra: Vec<Index>,
}

impl Partition {
    /// Number of searchable parts.
    pub fn searchable_parts(&self) -> usize {
        self.searchable.len()
    }

    /// Number of extra-item parts.
    pub fn extra_parts(&self) -> usize {
        self.extra.len()
    }

    /// Stored vectors across every part.
    pub fn element_count(&self) -> KnnResult<usize> {
        self.parts().map(|part| part.element_count()).sum()
    }

    /// The `k` nearest vectors across the searchable parts, closest first.
    ///
    /// Extra parts are never searched.
    pub fn search(&self, vector: &[f32], k: usize) -> KnnResult<Vec<QueryHit>> {
        if k == 0 {
            return Err(KnnError::invalid_parameter("k", "must be at least 1"));
        }

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        for part in &self.searchable {
            for hit in part.query(vector, k)? {
                heap.push(Candidate {
                    distance: hit.distance,
                    label: hit.label,
                });
                if heap.len() > k {
                    heap.pop();
                }
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| QueryHit {
                label: c.label,
                distance: c.distance,
            })
            .collect())
    }

    /// Stored vector for `label`, searchable parts first, then extra parts.
    pub fn get_item(&self, label: Label) -> KnnResult<Option<Vec<f32>>> {
        for part in self.parts() {
            if let Some(vector) = part.catalog()?.lookup_vector(label) {
                return Ok(Some(vector));
            }
        }
        Ok(None)
    }

    /// Whether any part stores `label`.
    pub fn contains(&self, label: Label) -> KnnResult<bool> {
        for part in self.parts() {
            if part.catalog()?.contains(label) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Every stored label across all parts, sorted and deduplicated.
    pub fn list_labels(&self) -> KnnResult<Vec<Label>> {
        let mut labels = Vec::new();
        for part in self.parts() {
            labels.extend(part.catalog()?.list_labels());
        }
        labels.sort_unstable();
        labels.dedup();
        Ok(labels)
    }

    fn parts(&self) -> impl Iterator<Item = &Index> {
        self.searchable.iter().chain(self.extra.iter())
    }

    fn parts_mut(&mut self) -> impl Iterator<Item = &mut Index> {
        self.searchable.iter_mut().chain(self.extra.iter_mut())
    }
}

// ============================================================================
// KnnService
// ============================================================================

/// Partition id to index parts, plus the query models.
pub struct KnnService {
    space: Option<MetricSpace>,
    ef_search: Option<usize>,
    partitions: BTreeMap<PartitionId, Partition>,
    models: HashMap<String, Box<dyn QueryModel>>,
    default_model: Option<String>,
}

impl std::fmt::Debug for KnnService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut models: Vec<&String> = self.models.keys().collect();
        models.sort();
        f.debug_struct("KnnService")
            .field("space", &self.space)
            .field("ef_search", &self.ef_search)
            .field("partitions", &self.partitions)
            .field("models", &models)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl Default for KnnService {
    fn default() -> Self {
        Self::new()
    }
}

impl KnnService {
    /// Empty service with [`AverageModel`] registered as the default model.
    pub fn new() -> Self {
        let mut service = Self {
            space: None,
            ef_search: None,
            partitions: BTreeMap::new(),
            models: HashMap::new(),
            default_model: None,
        };
        service.register_model(AVERAGE_MODEL, Box::new(AverageModel), true);
        service
    }

    /// Metric shared by every part, once a part has been added.
    pub fn metric(&self) -> Option<MetricKind> {
        self.space.map(|space| space.kind())
    }

    /// Dimension shared by every part, once a part has been added.
    pub fn dimension(&self) -> Option<usize> {
        self.space.map(|space| space.dimension())
    }

    /// Loaded partition ids, ascending.
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.keys().copied().collect()
    }

    /// The partition stored under `id`.
    pub fn partition(&self, id: PartitionId) -> KnnResult<&Partition> {
        self.partitions
            .get(&id)
            .ok_or(KnnError::PartitionNotFound(id))
    }

    /// Add a ready index as a part of `partition`.
    ///
    /// # Errors
    ///
    /// - `UninitializedAccess` if `index` has no engine
    /// - `IncompatiblePart` if its metric, dimension or normalize flag
    ///   differs from the parts already added
    pub fn add_part(
        &mut self,
        partition: PartitionId,
        kind: PartKind,
        mut index: Index,
    ) -> KnnResult<()> {
        if !index.is_ready() {
            return Err(KnnError::UninitializedAccess);
        }

        let space = *index.space();
        match self.space {
            Some(expected) if expected != space => {
                return Err(KnnError::IncompatiblePart(format!(
                    "partition {} part has metric={} dimension={} normalize={}, service expects metric={} dimension={} normalize={}",
                    partition,
                    space.kind(),
                    space.dimension(),
                    space.normalize(),
                    expected.kind(),
                    expected.dimension(),
                    expected.normalize()
                )));
            }
            Some(_) => {}
            None => self.space = Some(space),
        }

        if let Some(ef) = self.ef_search {
            index.set_search_breadth(ef)?;
        }

        let entry = self.partitions.entry(partition).or_default();
        match kind {
            PartKind::Searchable => entry.searchable.push(index),
            PartKind::Extra => entry.extra.push(index),
        }
        debug!("Added {} part to partition {}", kind, partition);
        Ok(())
    }

    /// Set the search breadth of every part, current and future.
    pub fn set_search_breadth(&mut self, ef: usize) -> KnnResult<()> {
        if ef == 0 {
            return Err(KnnError::invalid_parameter("ef", "must be positive"));
        }
        for partition in self.partitions.values_mut() {
            for part in partition.parts_mut() {
                part.set_search_breadth(ef)?;
            }
        }
        self.ef_search = Some(ef);
        Ok(())
    }

    /// Register `model` under `name`, replacing any model of that name.
    pub fn register_model(
        &mut self,
        name: impl Into<String>,
        model: Box<dyn QueryModel>,
        make_default: bool,
    ) {
        let name = name.into();
        if make_default {
            self.default_model = Some(name.clone());
        }
        self.models.insert(name, model);
    }

    /// Name of the model used when a caller names none.
    pub fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    /// The `k` nearest vectors in `partition`, closest first.
    pub fn search(
        &self,
        partition: PartitionId,
        vector: &[f32],
        k: usize,
    ) -> KnnResult<Vec<QueryHit>> {
        self.partition(partition)?.search(vector, k)
    }

    /// Stored vector for `label` in `partition`.
    ///
    /// An unknown partition stores nothing and yields `Ok(None)`.
    pub fn get_item(&self, partition: PartitionId, label: Label) -> KnnResult<Option<Vec<f32>>> {
        match self.partitions.get(&partition) {
            Some(p) => p.get_item(label),
            None => Ok(None),
        }
    }

    /// Whether `partition` stores `label`.
    pub fn has_item(&self, partition: PartitionId, label: Label) -> KnnResult<bool> {
        match self.partitions.get(&partition) {
            Some(p) => p.contains(label),
            None => Ok(false),
        }
    }

    /// Every label stored in `partition`, sorted.
    pub fn list_labels(&self, partition: PartitionId) -> KnnResult<Vec<Label>> {
        self.partition(partition)?.list_labels()
    }

    /// Compose a query vector from `labels` with the named or default model.
    pub fn compose_query(
        &self,
        labels: &[LabelRef],
        model: Option<&str>,
    ) -> KnnResult<ComposedQuery> {
        let name = model
            .or(self.default_model.as_deref())
            .ok_or_else(|| KnnError::ModelNotFound("<default>".to_string()))?;
        let model = self
            .models
            .get(name)
            .ok_or_else(|| KnnError::ModelNotFound(name.to_string()))?;
        model.compose(self, labels)
    }

    /// Items of `query_partition` closest to the query composed from `labels`.
    ///
    /// Returns an empty list when none of `labels` is stored.
    ///
    /// # Errors
    ///
    /// - `PartitionNotFound` if `query_partition` is not loaded
    /// - `ModelNotFound` for an unknown model name
    pub fn get_closest_items(
        &self,
        labels: &[LabelRef],
        query_partition: PartitionId,
        k: usize,
        model: Option<&str>,
    ) -> KnnResult<Vec<QueryHit>> {
        let partition = self.partition(query_partition)?;
        let query = self.compose_query(labels, model)?;
        if query.used == 0 {
            debug!(
                "None of {} labels is stored; no query for partition {}",
                labels.len(),
                query_partition
            );
            return Ok(Vec::new());
        }
        partition.search(&query.vector, k)
    }
}

// ============================================================================
// Tests
// ============================================================================
