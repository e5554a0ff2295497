//! C ABI over index handles.
//!
//! Conventions shared by every function:
//!
//! - The last two arguments are an optional error buffer and its length. On
//!   failure a NUL-terminated message is written there (truncated to fit)
//!   and the function returns its failure value (`-1`, or `0` for
//!   `knn_create`).
//! - Panics never cross the boundary; they are caught and reported like any
//!   other error.
//! - Vector arguments are `f32` arrays whose length is passed alongside.
//!
//! Mutating calls take the index write lock; everything else takes the read
//! lock, so queries on one handle run concurrently.

use std::any::Any;
use std::ffi::{c_char, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::ptr;
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use knnidx_core::{EngineParams, Index, LoadOutcome, MetricKind};
use tracing::warn;

use crate::error::{BoundaryError, BoundaryResult};
use crate::handle::{self, SharedIndex};

// ========================================
// Buffer-based helpers
// ========================================

/// Write a NUL-terminated error message into the caller's buffer.
/// Truncates if msg is longer than buf_len - 1.
unsafe fn write_err(buf: *mut c_char, buf_len: i32, msg: &str) {
    if buf.is_null() || buf_len <= 0 {
        return;
    }
    let max = (buf_len - 1) as usize;
    let bytes = msg.as_bytes();
    let copy_len = bytes.len().min(max);
    ptr::copy_nonoverlapping(bytes.as_ptr(), buf as *mut u8, copy_len);
    *buf.add(copy_len) = 0;
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `body`, converting errors and panics into `on_error` plus a message.
unsafe fn guarded<T>(
    err_buf: *mut c_char,
    err_buf_len: i32,
    on_error: T,
    body: impl FnOnce() -> BoundaryResult<T>,
) -> T {
    let error = match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => return value,
        Ok(Err(e)) => e,
        Err(payload) => BoundaryError::Panicked(panic_message(payload.as_ref())),
    };

    if matches!(error, BoundaryError::Panicked(_)) {
        warn!("Caught panic at C boundary: {}", error);
    }
    write_err(err_buf, err_buf_len, &error.to_string());
    on_error
}

unsafe fn path_arg<'a>(p: *const c_char) -> BoundaryResult<&'a Path> {
    if p.is_null() {
        return Err(BoundaryError::NullPointer("path"));
    }
    CStr::from_ptr(p)
        .to_str()
        .map(Path::new)
        .map_err(|e| BoundaryError::invalid_argument("path", e.to_string()))
}

unsafe fn slice_arg<'a, T>(p: *const T, len: i32, name: &'static str) -> BoundaryResult<&'a [T]> {
    if p.is_null() {
        return Err(BoundaryError::NullPointer(name));
    }
    let len = positive(len, name)?;
    Ok(std::slice::from_raw_parts(p, len))
}

unsafe fn slice_arg_mut<'a, T>(
    p: *mut T,
    len: i32,
    name: &'static str,
) -> BoundaryResult<&'a mut [T]> {
    if p.is_null() {
        return Err(BoundaryError::NullPointer(name));
    }
    let len = positive(len, name)?;
    Ok(std::slice::from_raw_parts_mut(p, len))
}

fn positive(value: i32, name: &'static str) -> BoundaryResult<usize> {
    if value <= 0 {
        return Err(BoundaryError::invalid_argument(
            name,
            format!("must be positive, got {}", value),
        ));
    }
    Ok(value as usize)
}

fn read(shared: &SharedIndex) -> BoundaryResult<RwLockReadGuard<'_, Index>> {
    shared.read().map_err(|_| BoundaryError::Poisoned)
}

fn write(shared: &SharedIndex) -> BoundaryResult<RwLockWriteGuard<'_, Index>> {
    shared.write().map_err(|_| BoundaryError::Poisoned)
}

// ========================================
// Lifecycle
// ========================================

/// Create an uninitialized index.
///
/// `metric` is 1 (euclidean), 2 (angular) or 3 (inner product).
/// Returns a non-zero handle, or 0 on error.
#[no_mangle]
pub unsafe extern "C" fn knn_create(
    metric: i32,
    dimension: i32,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> u64 {
    knn_create_normalized(metric, dimension, 0, err_buf, err_buf_len)
}

/// Create an uninitialized index with an explicit normalize default.
///
/// `normalize` is ignored for angular, which always normalizes.
/// Returns a non-zero handle, or 0 on error.
#[no_mangle]
pub unsafe extern "C" fn knn_create_normalized(
    metric: i32,
    dimension: i32,
    normalize: i32,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> u64 {
    guarded(err_buf, err_buf_len, 0, || {
        let kind = MetricKind::from_tag(metric)?;
        let dimension = positive(dimension, "dimension")?;
        let index = Index::with_normalize(kind, dimension, normalize != 0)?;
        handle::register(index)
    })
}

/// Allocate an empty engine. Returns 0, or -1 on error.
///
/// `m` must lie in `1..=256`. `seed` is stored with the index and reported
/// back, but the graph engine does not consume it: two builds with
/// different seeds produce the same graph, and builds are not guaranteed to
/// be reproducible across engine versions.
#[no_mangle]
pub unsafe extern "C" fn knn_init_new_index(
    handle: u64,
    capacity: u64,
    m: i32,
    ef_construction: i32,
    seed: u64,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i32 {
    guarded(err_buf, err_buf_len, -1, || {
        let capacity = usize::try_from(capacity)
            .map_err(|e| BoundaryError::invalid_argument("capacity", e.to_string()))?;
        let params = EngineParams::new(capacity)
            .with_m(positive(m, "m")?)
            .with_ef_construction(positive(ef_construction, "ef_construction")?)
            .with_seed(seed);

        let shared = handle::resolve(handle)?;
        write(&shared)?.initialize_empty(&params)?;
        Ok(0)
    })
}

/// Save to `path`. Returns 0, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn knn_save_index(
    handle: u64,
    path: *const c_char,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i32 {
    guarded(err_buf, err_buf_len, -1, || {
        let path = path_arg(path)?;
        let shared = handle::resolve(handle)?;
        read(&shared)?.save_to_path(path)?;
        Ok(0)
    })
}

/// Load from `path`, replacing any existing engine.
///
/// Returns 0 for a fresh load, 1 when a previous engine was replaced, -1 on
/// error.
#[no_mangle]
pub unsafe extern "C" fn knn_load_index(
    handle: u64,
    path: *const c_char,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i32 {
    guarded(err_buf, err_buf_len, -1, || {
        let path = path_arg(path)?;
        let shared = handle::resolve(handle)?;
        let outcome = write(&shared)?.load_from_path(path)?;
        Ok(match outcome {
            LoadOutcome::Fresh => 0,
            LoadOutcome::Replaced => 1,
        })
    })
}

/// Set the query-time search breadth. Returns 0, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn knn_set_ef(
    handle: u64,
    ef: i32,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i32 {
    guarded(err_buf, err_buf_len, -1, || {
        let ef = positive(ef, "ef")?;
        let shared = handle::resolve(handle)?;
        write(&shared)?.set_search_breadth(ef)?;
        Ok(0)
    })
}

/// Destroy the index. Returns 0, or -1 for an unknown or stale handle.
#[no_mangle]
pub unsafe extern "C" fn knn_destroy(
    handle: u64,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i32 {
    guarded(err_buf, err_buf_len, -1, || {
        handle::release(handle)?;
        Ok(0)
    })
}

// ========================================
// Data
// ========================================

/// Insert `vector` under `label`. Returns 0, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn knn_add_item(
    handle: u64,
    vector: *const f32,
    dimension: i32,
    label: u64,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i32 {
    guarded(err_buf, err_buf_len, -1, || {
        let vector = slice_arg(vector, dimension, "vector")?;
        let shared = handle::resolve(handle)?;
        write(&shared)?.insert(vector, label)?;
        Ok(0)
    })
}

/// Number of stored vectors, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn knn_element_count(
    handle: u64,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i64 {
    guarded(err_buf, err_buf_len, -1, || {
        let shared = handle::resolve(handle)?;
        let count = read(&shared)?.element_count()?;
        Ok(count as i64)
    })
}

/// Copy the stored vector for `label` into `out`.
///
/// Returns 1 if found, 0 if the label is unknown (`out` untouched), -1 on
/// error.
#[no_mangle]
pub unsafe extern "C" fn knn_get_item(
    handle: u64,
    label: u64,
    out: *mut f32,
    out_len: i32,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i32 {
    guarded(err_buf, err_buf_len, -1, || {
        let out = slice_arg_mut(out, out_len, "out")?;
        let shared = handle::resolve(handle)?;
        let index = read(&shared)?;
        let found = index.catalog()?.lookup_vector_into(label, out)?;
        Ok(i32::from(found))
    })
}

/// Whether `label` is stored: 1 yes, 0 no, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn knn_has_item(
    handle: u64,
    label: u64,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i32 {
    guarded(err_buf, err_buf_len, -1, || {
        let shared = handle::resolve(handle)?;
        let index = read(&shared)?;
        let found = index.catalog()?.contains(label);
        Ok(i32::from(found))
    })
}

/// k nearest neighbors of `vector`, closest first.
///
/// `out_labels` and `out_distances` must each hold `out_len >= k` entries.
/// Returns the number of results written (`min(k, element_count)`), or -1 on
/// error.
#[no_mangle]
pub unsafe extern "C" fn knn_query(
    handle: u64,
    vector: *const f32,
    dimension: i32,
    k: i32,
    out_labels: *mut u64,
    out_distances: *mut f32,
    out_len: i32,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i64 {
    guarded(err_buf, err_buf_len, -1, || {
        let vector = slice_arg(vector, dimension, "vector")?;
        let k = positive(k, "k")?;
        let labels = slice_arg_mut(out_labels, out_len, "out_labels")?;
        let distances = slice_arg_mut(out_distances, out_len, "out_distances")?;

        let shared = handle::resolve(handle)?;
        let written = read(&shared)?.query_into(vector, k, labels, distances)?;
        Ok(written as i64)
    })
}

/// Copy every stored label into `out`, in no particular order.
///
/// With a null `out` only the count is returned. Otherwise `out_len` must
/// be at least the count. Returns the count, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn knn_list_labels(
    handle: u64,
    out: *mut u64,
    out_len: i64,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i64 {
    guarded(err_buf, err_buf_len, -1, || {
        let shared = handle::resolve(handle)?;
        let index = read(&shared)?;
        let labels = index.catalog()?.list_labels();
        if out.is_null() {
            return Ok(labels.len() as i64);
        }

        let room = usize::try_from(out_len).unwrap_or(0);
        if room < labels.len() {
            return Err(knnidx_core::KnnError::BufferTooSmall {
                needed: labels.len(),
                actual: room,
            }
            .into());
        }
        for (i, label) in labels.iter().enumerate() {
            *out.add(i) = *label;
        }
        Ok(labels.len() as i64)
    })
}

/// Raw distance between two stored labels, written to `out`.
/// Returns 0, or -1 on error (including an unknown label).
#[no_mangle]
pub unsafe extern "C" fn knn_distance(
    handle: u64,
    first: u64,
    second: u64,
    out: *mut f32,
    err_buf: *mut c_char,
    err_buf_len: i32,
) -> i32 {
    guarded(err_buf, err_buf_len, -1, || {
        if out.is_null() {
            return Err(BoundaryError::NullPointer("out"));
        }
        let shared = handle::resolve(handle)?;
        let index = read(&shared)?;
        *out = index.catalog()?.distance_between(first, second)?;
        Ok(0)
    })
}

// ========================================
// Logging
// ========================================

/// Install a stderr `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose != 0` selects debug and
/// anything else warn. Returns 0 when installed, 1 if a subscriber already
/// exists.
#[no_mangle]
pub extern "C" fn knnidx_init_logging(verbose: i32) -> i32 {
    let level = if verbose != 0 { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("knnidx_core={},knnidx_ffi={}", level, level))
    });

    match tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
    {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_err_truncates() {
        let mut buf = [0x7f as c_char; 6];
        unsafe { write_err(buf.as_mut_ptr(), buf.len() as i32, "overflowing") };
        let text = unsafe { CStr::from_ptr(buf.as_ptr()) };
        assert_eq!(text.to_str().unwrap(), "overf");
    }

    #[test]
    fn test_write_err_ignores_null() {
        unsafe { write_err(ptr::null_mut(), 16, "ignored") };
    }

    #[test]
    fn test_guarded_catches_panic() {
        let mut buf = [0 as c_char; 64];
        let value = unsafe {
            guarded(buf.as_mut_ptr(), buf.len() as i32, -1, || -> BoundaryResult<i32> {
                panic!("boom")
            })
        };
        assert_eq!(value, -1);
        let text = unsafe { CStr::from_ptr(buf.as_ptr()) }.to_str().unwrap();
        assert_eq!(text, "Internal panic: boom");
    }

    #[test]
    fn test_positive() {
        assert_eq!(positive(3, "k").unwrap(), 3);
        assert!(positive(0, "k").is_err());
        assert!(positive(-1, "k").is_err());
    }
}
