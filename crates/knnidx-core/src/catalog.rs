//! Label-keyed reads over a live index.

use crate::engine::{GraphEngine, HnswEngine, Label};
use crate::error::{KnnError, KnnResult};
use crate::index::Index;

/// Read-only view of the labels stored in an index.
///
/// Obtained from [`Index::catalog`], which fails with `UninitializedAccess`
/// when no engine exists, so every method here can assume one.
#[derive(Debug)]
pub struct LabelCatalog<'a, E: GraphEngine = HnswEngine> {
    engine: &'a E,
}

impl<'a, E: GraphEngine> LabelCatalog<'a, E> {
    /// Copy of the stored vector for `label`.
    ///
    /// The copy is the stored form, i.e. normalized when the index
    /// normalizes.
    pub fn lookup_vector(&self, label: Label) -> Option<Vec<f32>> {
        self.stored(label).map(<[f32]>::to_vec)
    }

    /// Copy the stored vector for `label` into `out`.
    ///
    /// Returns `Ok(false)` when the label is unknown; `out` is left untouched.
    pub fn lookup_vector_into(&self, label: Label, out: &mut [f32]) -> KnnResult<bool> {
        let Some(stored) = self.stored(label) else {
            return Ok(false);
        };
        if out.len() < stored.len() {
            return Err(KnnError::BufferTooSmall {
                needed: stored.len(),
                actual: out.len(),
            });
        }
        out[..stored.len()].copy_from_slice(stored);
        Ok(true)
    }

    /// Whether `label` is stored.
    pub fn contains(&self, label: Label) -> bool {
        self.engine.label_lookup(label).is_some()
    }

    /// Every stored label, in no particular order.
    pub fn list_labels(&self) -> Vec<Label> {
        self.engine.labels()
    }

    /// Raw engine distance between two stored vectors.
    pub fn distance_between(&self, first: Label, second: Label) -> KnnResult<f32> {
        let a = self.stored(first).ok_or(KnnError::LabelNotFound(first))?;
        let b = self.stored(second).ok_or(KnnError::LabelNotFound(second))?;
        Ok(self.engine.distance(a, b))
    }

    fn stored(&self, label: Label) -> Option<&'a [f32]> {
        let id = self.engine.label_lookup(label)?;
        self.engine.data_by_internal_id(id)
    }
}

impl<E: GraphEngine> Index<E> {
    /// Label-keyed view of the engine.
    pub fn catalog(&self) -> KnnResult<LabelCatalog<'_, E>> {
        Ok(LabelCatalog {
            engine: self.engine()?,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
