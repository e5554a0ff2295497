//! # knnidx-ffi
//!
//! C ABI for `knnidx-core`.
//!
//! Indexes live in a process-wide, generation-checked handle table. Callers
//! receive an opaque non-zero `u64` from `knn_create` and pass it to every
//! other call; destroyed or never-issued handles are rejected instead of
//! being dereferenced.
//!
//! ## Modules
//!
//! - `handle`: the handle table
//! - `ffi`: the `extern "C"` functions
//! - `error`: boundary error type
//!
//! ## Usage (C)
//!
//! ```c
//! char err[256];
//! uint64_t h = knn_create(2, 128, err, sizeof err);
//! knn_init_new_index(h, 10000, 50, 50, 42, err, sizeof err);
//! knn_add_item(h, vec, 128, 7, err, sizeof err);
//! int64_t n = knn_query(h, q, 128, 10, labels, dists, 10, err, sizeof err);
//! knn_destroy(h, err, sizeof err);
//! ```

pub mod error;
pub mod ffi;
pub mod handle;

pub use error::{BoundaryError, BoundaryResult};
