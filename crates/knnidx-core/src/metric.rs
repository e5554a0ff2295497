//! Metric selection and the metric space descriptor.
//!
//! A [`MetricSpace`] is resolved once when an index is constructed. It fixes
//! the dimension, the distance kernel and whether vectors are normalized, and
//! every vector entering the engine goes through [`MetricSpace::prepare`].

use std::borrow::Cow;
use std::str::FromStr;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::{KnnError, KnnResult};
use crate::normalize::normalize;

// ============================================================================
// MetricKind
// ============================================================================

/// Distance family selected at construction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Encode, Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Squared L2 distance.
    #[default]
    #[serde(alias = "l2")]
    Euclidean,
    /// Cosine distance: `max(0, 1 - <a, b>)` over normalized vectors.
    #[serde(alias = "cosine")]
    Angular,
    /// `1 - <a, b>`; negative once the dot product exceeds one.
    #[serde(alias = "dotproduct", alias = "ip")]
    InnerProduct,
}

impl MetricKind {
    /// Numeric tag used for Euclidean at the C boundary.
    pub const TAG_EUCLIDEAN: i32 = 1;
    /// Numeric tag used for Angular at the C boundary.
    pub const TAG_ANGULAR: i32 = 2;
    /// Numeric tag used for InnerProduct at the C boundary.
    pub const TAG_INNER_PRODUCT: i32 = 3;

    /// Resolve a numeric boundary tag.
    pub fn from_tag(tag: i32) -> KnnResult<Self> {
        match tag {
            Self::TAG_EUCLIDEAN => Ok(MetricKind::Euclidean),
            Self::TAG_ANGULAR => Ok(MetricKind::Angular),
            Self::TAG_INNER_PRODUCT => Ok(MetricKind::InnerProduct),
            other => Err(KnnError::UnsupportedMetric(format!("tag {}", other))),
        }
    }

    /// Numeric boundary tag for this metric.
    pub fn tag(&self) -> i32 {
        match self {
            MetricKind::Euclidean => Self::TAG_EUCLIDEAN,
            MetricKind::Angular => Self::TAG_ANGULAR,
            MetricKind::InnerProduct => Self::TAG_INNER_PRODUCT,
        }
    }

    /// Get the metric name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Euclidean => "euclidean",
            MetricKind::Angular => "angular",
            MetricKind::InnerProduct => "innerproduct",
        }
    }

    /// Whether this metric forces normalization regardless of caller choice.
    pub fn requires_normalization(&self) -> bool {
        matches!(self, MetricKind::Angular)
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = KnnError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "euclidean" | "l2" => Ok(MetricKind::Euclidean),
            "angular" | "cosine" => Ok(MetricKind::Angular),
            "innerproduct" | "dotproduct" | "ip" => Ok(MetricKind::InnerProduct),
            _ => Err(KnnError::UnsupportedMetric(value.to_string())),
        }
    }
}

// ============================================================================
// MetricSpace
// ============================================================================

/// Metric descriptor owned by an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSpace {
    kind: MetricKind,
    dimension: usize,
    normalize: bool,
}

impl MetricSpace {
    /// Build the descriptor for `kind`.
    ///
    /// Angular always resolves `normalize = true`; the other metrics take
    /// `normalize_default`.
    pub fn select(kind: MetricKind, dimension: usize, normalize_default: bool) -> KnnResult<Self> {
        if dimension == 0 {
            return Err(KnnError::invalid_parameter(
                "dimension",
                "must be greater than zero",
            ));
        }

        Ok(Self {
            kind,
            dimension,
            normalize: kind.requires_normalization() || normalize_default,
        })
    }

    /// Metric family.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Resolved normalize flag.
    pub fn normalize(&self) -> bool {
        self.normalize
    }

    /// Check the length of `vector` and normalize it if this space requires it.
    ///
    /// Inserts and queries both go through here, so a stored vector and the
    /// query compared against it always receive the same treatment.
    ///
    /// # Errors
    ///
    /// - `DimensionMismatch` for a wrong-length vector
    /// - `InvalidParameter` if any component is NaN or infinite
    pub fn prepare<'a>(&self, vector: &'a [f32]) -> KnnResult<Cow<'a, [f32]>> {
        self.check_dimension(vector)?;
        check_finite(vector)?;
        if self.normalize {
            Ok(Cow::Owned(normalize(vector)))
        } else {
            Ok(Cow::Borrowed(vector))
        }
    }

    /// Fail with `DimensionMismatch` unless `vector.len() == dimension`.
    pub fn check_dimension(&self, vector: &[f32]) -> KnnResult<()> {
        if vector.len() != self.dimension {
            return Err(KnnError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Raw distance between two stored vectors.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        distance(self.kind, a, b)
    }
}

/// Fail with `InvalidParameter` if any component is NaN or infinite.
pub fn check_finite(vector: &[f32]) -> KnnResult<()> {
    match vector.iter().position(|x| !x.is_finite()) {
        Some(position) => Err(KnnError::invalid_parameter(
            "vector",
            format!(
                "component {} is not a finite number ({})",
                position, vector[position]
            ),
        )),
        None => Ok(()),
    }
}

// ============================================================================
// Distance kernels
// ============================================================================

/// Distance for `kind`; lower is closer.
pub fn distance(kind: MetricKind, a: &[f32], b: &[f32]) -> f32 {
    match kind {
        MetricKind::Euclidean => l2_squared(a, b),
        MetricKind::Angular => cosine_distance(a, b),
        MetricKind::InnerProduct => inner_product_distance(a, b),
    }
}

/// Squared Euclidean distance.
fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// `1 - <a, b>` clamped at zero; rounding can push the dot product of two
/// unit vectors just past one.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - dot(a, b)).max(0.0)
}

/// `1 - <a, b>`.
fn inner_product_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - dot(a, b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_kind_tags() {
        assert_eq!(MetricKind::from_tag(1).unwrap(), MetricKind::Euclidean);
        assert_eq!(MetricKind::from_tag(2).unwrap(), MetricKind::Angular);
        assert_eq!(MetricKind::from_tag(3).unwrap(), MetricKind::InnerProduct);
        assert!(matches!(
            MetricKind::from_tag(7),
            Err(KnnError::UnsupportedMetric(_))
        ));
        assert_eq!(MetricKind::InnerProduct.tag(), 3);
    }

    #[test]
    fn test_metric_kind_from_str() {
        assert_eq!("Euclidean".parse::<MetricKind>().unwrap(), MetricKind::Euclidean);
        assert_eq!("cosine".parse::<MetricKind>().unwrap(), MetricKind::Angular);
        assert_eq!("dotproduct".parse::<MetricKind>().unwrap(), MetricKind::InnerProduct);
        assert!("manhattan".parse::<MetricKind>().is_err());
        assert_eq!(MetricKind::Angular.to_string(), "angular");
        assert_eq!(MetricKind::default(), MetricKind::Euclidean);
    }

    #[test]
    fn test_select_resolves_normalize() {
        let angular = MetricSpace::select(MetricKind::Angular, 8, false).unwrap();
        assert!(angular.normalize());

        let l2 = MetricSpace::select(MetricKind::Euclidean, 8, false).unwrap();
        assert!(!l2.normalize());

        let ip = MetricSpace::select(MetricKind::InnerProduct, 8, true).unwrap();
        assert!(ip.normalize());
    }

    #[test]
    fn test_select_rejects_zero_dimension() {
        assert!(matches!(
            MetricSpace::select(MetricKind::Euclidean, 0, false),
            Err(KnnError::InvalidParameter { name: "dimension", .. })
        ));
    }

    #[test]
    fn test_prepare() {
        let space = MetricSpace::select(MetricKind::Angular, 2, false).unwrap();
        let prepared = space.prepare(&[0.0, 5.0]).unwrap();
        assert!(matches!(prepared, Cow::Owned(_)));
        assert!((prepared[1] - 1.0).abs() < 1e-6);

        let space = MetricSpace::select(MetricKind::Euclidean, 2, false).unwrap();
        let prepared = space.prepare(&[0.0, 5.0]).unwrap();
        assert!(matches!(prepared, Cow::Borrowed(_)));

        assert!(matches!(
            space.prepare(&[1.0]),
            Err(KnnError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_distance_kernels() {
        let a = [1.0, 0.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0, 0.0];
        assert_eq!(distance(MetricKind::Euclidean, &a, &b), 2.0);
        assert_eq!(distance(MetricKind::Euclidean, &a, &a), 0.0);
        assert_eq!(distance(MetricKind::InnerProduct, &a, &b), 1.0);
        assert_eq!(distance(MetricKind::Angular, &a, &a), 0.0);
    }

    #[test]
    fn test_angular_never_negative() {
        // Dot product slightly above one after rounding.
        let a = [1.0 + f32::EPSILON, 0.0];
        assert!(dot(&a, &a) > 1.0);
        assert_eq!(distance(MetricKind::Angular, &a, &a), 0.0);
    }

    #[test]
    fn test_inner_product_keeps_sign() {
        let a = [2.0, 0.0];
        let b = [3.0, 0.0];
        assert_eq!(distance(MetricKind::InnerProduct, &a, &b), -5.0);
        assert_eq!(distance(MetricKind::InnerProduct, &a, &[0.0, 4.0]), 1.0);
    }

    #[test]
    fn test_prepare_rejects_non_finite() {
        let space = MetricSpace::select(MetricKind::Euclidean, 2, false).unwrap();
        for bad in [[f32::NAN, 0.0], [0.0, f32::INFINITY], [f32::NEG_INFINITY, 1.0]] {
            assert!(matches!(
                space.prepare(&bad),
                Err(KnnError::InvalidParameter { name: "vector", .. })
            ));
        }

        let angular = MetricSpace::select(MetricKind::Angular, 2, false).unwrap();
        assert!(angular.prepare(&[f32::NAN, 1.0]).is_err());
        assert!(angular.prepare(&[3.0, 4.0]).is_ok());
    }

    #[test]
    fn test_metric_kind_serde() {
        let kind: MetricKind = serde_yaml::from_str("cosine").unwrap();
        assert_eq!(kind, MetricKind::Angular);
        assert_eq!(serde_yaml::to_string(&MetricKind::InnerProduct).unwrap().trim(), "innerproduct");
    }
}
