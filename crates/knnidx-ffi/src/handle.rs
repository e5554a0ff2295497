//! Generation-checked handle table.
//!
//! A handle packs a slot position and the slot's generation into one `u64`:
//!
//! ```text
//! 63            32 31             0
//! ┌──────────────┬────────────────┐
//! │  generation  │   slot + 1     │
//! └──────────────┴────────────────┘
//! ```
//!
//! The low half is never zero, so `0` is never a valid handle and can be used
//! as the failure value of `knn_create`. Destroying a handle bumps the slot's
//! generation, so a stale copy of the old handle no longer resolves even after
//! the slot is reused.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use knnidx_core::Index;
use tracing::debug;

use crate::error::{BoundaryError, BoundaryResult};

/// Index shared between the table and in-flight calls.
pub type SharedIndex = Arc<RwLock<Index>>;

static HANDLES: Mutex<HandleTable> = Mutex::new(HandleTable::new());

#[derive(Debug)]
struct Slot {
    generation: u32,
    index: Option<SharedIndex>,
}

/// Slot table mapping handles to live indexes.
#[derive(Debug, Default)]
pub struct HandleTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl HandleTable {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Store `index` and issue a handle for it.
    pub fn insert(&mut self, index: Index) -> BoundaryResult<u64> {
        let shared = Arc::new(RwLock::new(index));

        let position = match self.free.pop() {
            Some(position) => position,
            None => {
                if self.slots.len() >= u32::MAX as usize {
                    return Err(BoundaryError::invalid_argument(
                        "handle",
                        "handle table is full",
                    ));
                }
                self.slots.push(Slot {
                    generation: 0,
                    index: None,
                });
                self.slots.len() - 1
            }
        };

        let slot = &mut self.slots[position];
        slot.index = Some(shared);
        Ok(encode(position, slot.generation))
    }

    /// Resolve `handle` to its index.
    pub fn get(&self, handle: u64) -> BoundaryResult<SharedIndex> {
        let (position, generation) = decode(handle).ok_or(BoundaryError::InvalidHandle(handle))?;
        self.slots
            .get(position)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.index.clone())
            .ok_or(BoundaryError::InvalidHandle(handle))
    }

    /// Invalidate `handle` and hand back its index.
    pub fn remove(&mut self, handle: u64) -> BoundaryResult<SharedIndex> {
        let (position, generation) = decode(handle).ok_or(BoundaryError::InvalidHandle(handle))?;
        let slot = self
            .slots
            .get_mut(position)
            .filter(|slot| slot.generation == generation)
            .ok_or(BoundaryError::InvalidHandle(handle))?;
        let index = slot
            .index
            .take()
            .ok_or(BoundaryError::InvalidHandle(handle))?;

        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(position);
        Ok(index)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn encode(position: usize, generation: u32) -> u64 {
    (u64::from(generation) << 32) | (position as u64 + 1)
}

fn decode(handle: u64) -> Option<(usize, u32)> {
    let low = handle & 0xFFFF_FFFF;
    if low == 0 {
        return None;
    }
    Some(((low - 1) as usize, (handle >> 32) as u32))
}

// ============================================================================
// Process-wide table
// ============================================================================

/// Register `index` in the process-wide table.
pub fn register(index: Index) -> BoundaryResult<u64> {
    let handle = HANDLES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(index)?;
    debug!("Registered index handle {:#x}", handle);
    Ok(handle)
}

/// Resolve `handle`; the table lock is released before returning.
pub fn resolve(handle: u64) -> BoundaryResult<SharedIndex> {
    HANDLES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(handle)
}

/// Invalidate `handle`.
///
/// The index is dropped here unless another call still holds it, in which
/// case it is dropped when that call finishes.
pub fn release(handle: u64) -> BoundaryResult<()> {
    let index = HANDLES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(handle)?;
    drop(index);
    debug!("Released index handle {:#x}", handle);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use knnidx_core::MetricKind;

    fn index() -> Index {
        Index::new(MetricKind::Euclidean, 2).unwrap()
    }

    #[test]
    fn test_handles_are_never_zero() {
        let mut table = HandleTable::new();
        for _ in 0..4 {
            assert_ne!(table.insert(index()).unwrap(), 0);
        }
        assert!(matches!(table.get(0), Err(BoundaryError::InvalidHandle(0))));
    }

    #[test]
    fn test_insert_get_remove() {
        let mut table = HandleTable::new();
        let handle = table.insert(index()).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get(handle).is_ok());

        table.remove(handle).unwrap();
        assert!(table.is_empty());
        assert!(matches!(
            table.get(handle),
            Err(BoundaryError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_double_remove_rejected() {
        let mut table = HandleTable::new();
        let handle = table.insert(index()).unwrap();
        table.remove(handle).unwrap();
        assert!(matches!(
            table.remove(handle),
            Err(BoundaryError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_reused_slot_rejects_stale_handle() {
        let mut table = HandleTable::new();
        let stale = table.insert(index()).unwrap();
        table.remove(stale).unwrap();

        let fresh = table.insert(index()).unwrap();
        assert_ne!(stale, fresh);
        assert_eq!(stale & 0xFFFF_FFFF, fresh & 0xFFFF_FFFF);
        assert!(table.get(stale).is_err());
        assert!(table.get(fresh).is_ok());
    }

    #[test]
    fn test_unknown_slot_rejected() {
        let table = HandleTable::new();
        assert!(table.get(encode(7, 0)).is_err());
    }

    #[test]
    fn test_global_register_and_release() {
        let handle = register(index()).unwrap();
        let shared = resolve(handle).unwrap();
        release(handle).unwrap();

        // In-flight holder keeps the index alive after release.
        assert_eq!(shared.read().unwrap().dimension(), 2);
        assert!(resolve(handle).is_err());
    }
}
