//! Query vectors composed from stored labels.

use super::{KnnService, LabelRef};
use crate::error::KnnResult;

/// Name the [`AverageModel`] is registered under in every new service.
pub const AVERAGE_MODEL: &str = "average";

/// Query vector built by a [`QueryModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedQuery {
    pub vector: Vec<f32>,
    /// Number of input labels that resolved to a stored vector.
    pub used: usize,
}

/// Turns a set of stored labels into one query vector.
pub trait QueryModel: Send + Sync {
    /// Compose a query from the vectors stored under `labels`.
    ///
    /// Labels that are not stored are skipped; when none resolves,
    /// `used` is zero.
    fn compose(&self, service: &KnnService, labels: &[LabelRef]) -> KnnResult<ComposedQuery>;
}

/// Component-wise mean of the stored vectors.
#[derive(Debug, Default, Clone, Copy)]
pub struct AverageModel;

impl QueryModel for AverageModel {
    fn compose(&self, service: &KnnService, labels: &[LabelRef]) -> KnnResult<ComposedQuery> {
        let mut vector = vec![0.0f32; service.dimension().unwrap_or(0)];
        let mut used = 0usize;

        for label in labels {
            if let Some(stored) = service.get_item(label.partition, label.label)? {
                for (acc, x) in vector.iter_mut().zip(&stored) {
                    *acc += x;
                }
                used += 1;
            }
        }

        if used > 0 {
            let count = used as f32;
            vector.iter_mut().for_each(|x| *x /= count);
        }

        Ok(ComposedQuery { vector, used })
    }
}
