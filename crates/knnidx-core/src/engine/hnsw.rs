//! HNSW engine backed by `hnsw_rs`.
//!
//! `hnsw_rs` owns the navigable graph. This module keeps the label map and a
//! copy of every stored vector next to it, so label lookups and raw-vector
//! export never have to reach into the graph.
//!
//! Persistence writes a single file:
//!
//! ```text
//! <path>
//! ├── 8-byte magic  "KNNIDX\0\0"
//! └── bincode(EngineSnapshot)   # params, metric, dimension, entries
//! ```
//!
//! Loading replays the entries in internal-id order to rebuild the graph.
//! [`inspect_index_file`] reads only the leading fields.

use std::collections::{BinaryHeap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bincode::{config, Decode, Encode};
use hnsw_rs::prelude::{Distance, Hnsw};
use serde::Serialize;
use tracing::{debug, trace};

use super::{Candidate, EngineParams, GraphEngine, InternalId, Label, DEFAULT_EF_SEARCH};
use crate::error::{KnnError, KnnResult};
use crate::metric::{self, MetricKind, MetricSpace};

/// Highest layer count `hnsw_rs` accepts.
const MAX_LAYER: usize = 16;

/// Leading bytes of every saved index file.
const SNAPSHOT_MAGIC: &[u8; 8] = b"KNNIDX\0\0";

/// Current snapshot layout version.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Distance adapter
// ============================================================================

/// Feeds the space's distance kernel to `hnsw_rs`.
///
/// `hnsw_rs` asserts that every distance is non-negative, while the inner
/// product distance `1 - <a, b>` goes below zero as soon as a dot product
/// exceeds one. Inner product distances are therefore passed through
/// [`to_graph_distance`], an order-preserving map onto `[0, inf)`, and
/// mapped back with [`from_graph_distance`] before they leave the engine.
#[derive(Debug, Clone, Copy)]
struct SpaceDistance {
    kind: MetricKind,
}

impl SpaceDistance {
    /// Caller-facing distance for a distance reported by the graph.
    fn reported(&self, graph_distance: f32) -> f32 {
        match self.kind {
            MetricKind::InnerProduct => from_graph_distance(graph_distance),
            MetricKind::Euclidean | MetricKind::Angular => graph_distance,
        }
    }
}

impl Distance<f32> for SpaceDistance {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        let raw = metric::distance(self.kind, va, vb);
        let mapped = match self.kind {
            MetricKind::InnerProduct => to_graph_distance(raw),
            MetricKind::Euclidean | MetricKind::Angular => raw,
        };
        // hnsw_rs panics on NaN; an overflowing kernel sorts last instead.
        if mapped.is_nan() {
            f32::INFINITY
        } else {
            mapped
        }
    }
}

/// Strictly increasing map from `(-inf, inf)` onto `(0, inf)`.
fn to_graph_distance(distance: f32) -> f32 {
    if distance >= 0.0 {
        1.0 + distance
    } else {
        1.0 / (1.0 - distance)
    }
}

/// Inverse of [`to_graph_distance`].
fn from_graph_distance(graph_distance: f32) -> f32 {
    if graph_distance >= 1.0 {
        graph_distance - 1.0
    } else {
        1.0 - 1.0 / graph_distance
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// On-disk form of an engine.
#[derive(Debug, Encode, Decode)]
struct EngineSnapshot {
    format_version: u32,
    metric: MetricKind,
    dimension: usize,
    normalize: bool,
    capacity: usize,
    m: usize,
    ef_construction: usize,
    seed: u64,
    ef: usize,
    /// Unix epoch seconds.
    saved_at: u64,
    /// `(label, vector)` in internal-id order.
    entries: Vec<(Label, Vec<f32>)>,
}

/// Leading fields of [`EngineSnapshot`], plus the entry count.
///
/// Field order must match `EngineSnapshot`: bincode writes a `Vec` as its
/// length followed by the items, so decoding this struct reads the header
/// and stops right after the entry count.
#[derive(Debug, Decode)]
struct SnapshotHeader {
    format_version: u32,
    metric: MetricKind,
    dimension: usize,
    normalize: bool,
    capacity: usize,
    m: usize,
    ef_construction: usize,
    seed: u64,
    ef: usize,
    saved_at: u64,
    entry_count: u64,
}

/// Summary of a saved index file, read without rebuilding the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFileInfo {
    pub format_version: u32,
    pub metric: MetricKind,
    pub dimension: usize,
    pub normalize: bool,
    pub element_count: usize,
    pub capacity: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub seed: u64,
    pub ef_search: usize,
    /// Unix epoch seconds.
    pub saved_at: u64,
}

/// Open `path` and check the magic bytes.
fn open_snapshot(path: &Path) -> KnnResult<BufReader<File>> {
    let file = File::open(path).map_err(|e| {
        KnnError::persistence_io(path, format!("Failed to open index file: {}", e))
    })?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).map_err(|e| {
        KnnError::persistence_format(path, format!("Failed to read index header: {}", e))
    })?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(KnnError::persistence_format(
            path,
            "not a knnidx index file",
        ));
    }
    Ok(reader)
}

/// Read the header of a saved index file.
pub fn inspect_index_file(path: impl AsRef<Path>) -> KnnResult<IndexFileInfo> {
    let path = path.as_ref();
    let mut reader = open_snapshot(path)?;

    let header: SnapshotHeader = bincode::decode_from_std_read(&mut reader, config::standard())
        .map_err(|e| {
            KnnError::persistence_format(path, format!("Failed to read index header: {}", e))
        })?;
    if header.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(KnnError::persistence_format(
            path,
            format!(
                "unsupported format version {} (expected {})",
                header.format_version, SNAPSHOT_FORMAT_VERSION
            ),
        ));
    }

    Ok(IndexFileInfo {
        format_version: header.format_version,
        metric: header.metric,
        dimension: header.dimension,
        normalize: header.normalize,
        element_count: usize::try_from(header.entry_count).map_err(|e| {
            KnnError::persistence_format(path, format!("Invalid entry count: {}", e))
        })?,
        capacity: header.capacity,
        m: header.m,
        ef_construction: header.ef_construction,
        seed: header.seed,
        ef_search: header.ef,
        saved_at: header.saved_at,
    })
}

impl EngineSnapshot {
    fn check_compatible(&self, space: &MetricSpace, path: &Path) -> KnnResult<()> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(KnnError::persistence_format(
                path,
                format!(
                    "unsupported format version {} (expected {})",
                    self.format_version, SNAPSHOT_FORMAT_VERSION
                ),
            ));
        }
        if self.dimension != space.dimension() {
            return Err(KnnError::persistence_format(
                path,
                format!(
                    "dimension mismatch: file has {}, index expects {}",
                    self.dimension,
                    space.dimension()
                ),
            ));
        }
        if self.metric != space.kind() {
            return Err(KnnError::persistence_format(
                path,
                format!(
                    "metric mismatch: file has {}, index expects {}",
                    self.metric,
                    space.kind()
                ),
            ));
        }
        if self.normalize != space.normalize() {
            return Err(KnnError::persistence_format(
                path,
                format!(
                    "normalize mismatch: file has {}, index expects {}",
                    self.normalize,
                    space.normalize()
                ),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// HnswEngine
// ============================================================================

/// Navigable-graph engine.
pub struct HnswEngine {
    space: MetricSpace,
    params: EngineParams,
    ef: usize,
    metric: SpaceDistance,
    graph: Hnsw<'static, f32, SpaceDistance>,
    /// Stored vectors, indexed by internal id.
    vectors: Vec<Vec<f32>>,
    /// Label of each internal id.
    labels_by_id: Vec<Label>,
    label_lookup: HashMap<Label, InternalId>,
}

impl std::fmt::Debug for HnswEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswEngine")
            .field("space", &self.space)
            .field("params", &self.params)
            .field("ef", &self.ef)
            .field("points", &self.graph.get_nb_point())
            .finish()
    }
}

impl HnswEngine {
    fn with_graph(space: MetricSpace, params: EngineParams, ef: usize) -> Self {
        let metric = SpaceDistance { kind: space.kind() };
        let graph = Hnsw::new(
            params.m,
            params.capacity,
            MAX_LAYER,
            params.ef_construction,
            metric,
        );

        Self {
            space,
            params,
            ef,
            metric,
            graph,
            vectors: Vec::new(),
            labels_by_id: Vec::new(),
            label_lookup: HashMap::new(),
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        let saved_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        EngineSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            metric: self.space.kind(),
            dimension: self.space.dimension(),
            normalize: self.space.normalize(),
            capacity: self.params.capacity,
            m: self.params.m,
            ef_construction: self.params.ef_construction,
            seed: self.params.seed,
            ef: self.ef,
            saved_at,
            entries: self
                .labels_by_id
                .iter()
                .copied()
                .zip(self.vectors.iter().cloned())
                .collect(),
        }
    }
}

impl GraphEngine for HnswEngine {
    fn create(space: MetricSpace, params: &EngineParams) -> KnnResult<Self> {
        params.validate()?;
        debug!(
            "Creating HNSW engine: metric={}, dim={}, capacity={}, m={}, ef_construction={}",
            space.kind(),
            space.dimension(),
            params.capacity,
            params.m,
            params.ef_construction
        );
        Ok(Self::with_graph(space, *params, DEFAULT_EF_SEARCH))
    }

    fn construct_from_path(space: MetricSpace, path: &Path) -> KnnResult<Self> {
        debug!("Loading HNSW engine from {:?}", path);

        let mut reader = open_snapshot(path)?;
        let snapshot: EngineSnapshot =
            bincode::decode_from_std_read(&mut reader, config::standard()).map_err(|e| {
                KnnError::persistence_format(path, format!("Failed to deserialize index: {}", e))
            })?;
        snapshot.check_compatible(&space, path)?;

        let params = EngineParams {
            capacity: snapshot.capacity.max(snapshot.entries.len()),
            m: snapshot.m,
            ef_construction: snapshot.ef_construction,
            seed: snapshot.seed,
        };
        params
            .validate()
            .map_err(|e| KnnError::persistence_format(path, e.to_string()))?;

        let mut engine = Self::with_graph(space, params, snapshot.ef.max(1));
        for (label, vector) in &snapshot.entries {
            engine
                .add_point(vector, *label)
                .map_err(|e| KnnError::persistence_format(path, e.to_string()))?;
        }

        debug!(
            "Loaded HNSW engine from {:?}: {} elements (saved at {})",
            path,
            engine.element_count(),
            snapshot.saved_at
        );
        Ok(engine)
    }

    fn add_point(&mut self, vector: &[f32], label: Label) -> KnnResult<()> {
        self.space.check_dimension(vector)?;
        if self.label_lookup.contains_key(&label) {
            return Err(KnnError::DuplicateLabel(label));
        }
        if self.vectors.len() >= self.params.capacity {
            return Err(KnnError::CapacityExceeded {
                capacity: self.params.capacity,
            });
        }

        let id = self.vectors.len();
        let data = vector.to_vec();
        self.graph.insert_slice((data.as_slice(), id));
        self.vectors.push(data);
        self.labels_by_id.push(label);
        self.label_lookup.insert(label, id);

        trace!("Inserted label {} as internal id {}", label, id);
        Ok(())
    }

    fn search_knn(&self, vector: &[f32], k: usize) -> BinaryHeap<Candidate> {
        if k == 0 || self.vectors.is_empty() {
            return BinaryHeap::new();
        }

        self.graph
            .search(vector, k, self.ef.max(k))
            .into_iter()
            .take(k)
            .filter_map(|neighbour| {
                self.labels_by_id
                    .get(neighbour.d_id)
                    .map(|&label| Candidate {
                        distance: self.metric.reported(neighbour.distance),
                        label,
                    })
            })
            .collect()
    }

    fn save_index(&self, path: &Path) -> KnnResult<()> {
        debug!("Saving HNSW engine to {:?}", path);

        let file = File::create(path).map_err(|e| {
            KnnError::persistence_io(path, format!("Failed to create index file: {}", e))
        })?;
        let mut writer = BufWriter::new(file);

        writer.write_all(SNAPSHOT_MAGIC).map_err(|e| {
            KnnError::persistence_io(path, format!("Failed to write index header: {}", e))
        })?;
        bincode::encode_into_std_write(self.snapshot(), &mut writer, config::standard())
            .map_err(|e| {
                KnnError::persistence_format(path, format!("Failed to serialize index: {}", e))
            })?;
        writer.flush().map_err(|e| {
            KnnError::persistence_io(path, format!("Failed to flush index file: {}", e))
        })?;

        debug!("Saved {} elements to {:?}", self.element_count(), path);
        Ok(())
    }

    fn label_lookup(&self, label: Label) -> Option<InternalId> {
        self.label_lookup.get(&label).copied()
    }

    fn data_by_internal_id(&self, id: InternalId) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    fn labels(&self) -> Vec<Label> {
        self.label_lookup.keys().copied().collect()
    }

    fn set_ef(&mut self, ef: usize) {
        self.ef = ef;
    }

    fn ef(&self) -> usize {
        self.ef
    }

    fn element_count(&self) -> usize {
        self.vectors.len()
    }

    fn capacity(&self) -> usize {
        self.params.capacity
    }

    fn params(&self) -> EngineParams {
        self.params
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.space.distance(a, b)
    }
}

// ============================================================================
// Tests
// ============================================================================
