//! # knnidx-core
//!
//! Approximate nearest-neighbor index over dense `f32` vectors.
//!
//! This crate wraps a navigable-graph engine (`hnsw_rs`) with the parts a
//! caller actually needs: metric selection, normalization for angular
//! comparison, lifecycle state, label-keyed lookups and result marshaling
//! into caller-owned buffers.
//!
//! ## Architecture
//!
//! ```text
//! knnidx-cli ─┐
//!             ├→ knnidx-core: Index ──→ GraphEngine (trait)
//! knnidx-ffi ─┘      ↑                      ↑
//!                    │          HnswEngine (hnsw_rs + bincode)
//!        KnnService (partitions of Index parts)
//! ```
//!
//! ## Modules
//!
//! - `metric`: metric kinds, boundary tags and the metric space descriptor
//! - `normalize`: L2 normalization
//! - `engine`: the graph engine trait and its `hnsw_rs` implementation
//! - `index`: lifecycle (uninitialized, initialized, loaded)
//! - `query`: k-NN queries written into caller buffers
//! - `catalog`: label lookups, enumeration and pairwise distance
//! - `config`: YAML index configuration
//! - `service`: partitioned service over many index parts, directory
//!   loading, label-composed queries and region routing
//!
//! ## Usage
//!
//! ```ignore
//! use knnidx_core::{EngineParams, Index, MetricKind};
//!
//! let mut index: Index = Index::new(MetricKind::Angular, 3)?;
//! index.initialize_empty(&EngineParams::new(1000))?;
//! index.insert(&[1.0, 0.0, 0.0], 7)?;
//!
//! let hits = index.query(&[0.9, 0.1, 0.0], 5)?;
//! assert_eq!(hits[0].label, 7);
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod metric;
pub mod normalize;
pub mod query;
pub mod service;

pub use catalog::LabelCatalog;
pub use config::IndexConfig;
pub use engine::{inspect_index_file, EngineParams, GraphEngine, HnswEngine, IndexFileInfo, Label};
pub use error::{KnnError, KnnResult};
pub use index::{Index, IndexState, LoadOutcome};
pub use metric::{MetricKind, MetricSpace};
pub use query::QueryHit;
pub use service::{
    AverageModel, ComposedQuery, KnnService, LabelRef, PartFile, PartKind, Partition,
    PartitionId, QueryModel, RegionRouter,
};
