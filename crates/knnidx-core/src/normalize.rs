//! L2 normalization for angular comparison.

/// Added to the norm so an all-zero vector maps to zeros instead of NaN.
pub const NORM_EPSILON: f32 = 1e-30;

/// Return a unit-length copy of `vector`.
///
/// Uses `1 / (sqrt(sum of squares) + NORM_EPSILON)` as the scale factor.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum();
    let scale = 1.0 / (norm.sqrt() + NORM_EPSILON);
    vector.iter().map(|x| x * scale).collect()
}

/// L2 norm of `vector`.
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let v = normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = normalize(&[0.2, -1.5, 3.3, 0.7]);
        let twice = normalize(&once);
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_normalize_zero_vector() {
        let v = normalize(&[0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_normalize_does_not_touch_input() {
        let input = vec![2.0, 0.0];
        let out = normalize(&input);
        assert_eq!(input, vec![2.0, 0.0]);
        assert_eq!(out, vec![1.0, 0.0]);
    }
}
