//! RANSAC (Random Sample Consensus) for geometric verification
//!
//! Robust homography estimation from putative point correspondences.

use crate::{FeatureError, Result};
use cv_core::{is_finite_matrix, Ransac, RobustConfig, RobustModel};
use nalgebra::{DMatrix, Matrix3, Vector3};
use tracing::debug;

pub type RansacConfig = RobustConfig;

/// Correspondence mapping `src` onto `dst`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchPair {
    pub src: (f64, f64),
    pub dst: (f64, f64),
}

impl MatchPair {
    pub fn new(src: (f64, f64), dst: (f64, f64)) -> Self {
        Self { src, dst }
    }
}

pub struct HomographyEstimator;

impl RobustModel<MatchPair> for HomographyEstimator {
    type Model = Matrix3<f64>;

    fn min_sample_size(&self) -> usize {
        4
    }

    fn estimate(&self, data: &[&MatchPair]) -> Option<Self::Model> {
        if data.len() < 4 {
            return None;
        }
        let src: Vec<(f64, f64)> = data.iter().map(|m| m.src).collect();
        let dst: Vec<(f64, f64)> = data.iter().map(|m| m.dst).collect();
        let t_src = normalizing_transform(&src)?;
        let t_dst = normalizing_transform(&dst)?;
        if data.len() == 4 && (has_collinear_triple(&t_src, &src) || has_collinear_triple(&t_dst, &dst)) {
            return None;
        }

        let mut a = vec![0.0f64; data.len() * 2 * 9];
        for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
            let (x1, y1) = apply(&t_src, *s);
            let (x2, y2) = apply(&t_dst, *d);
            let row1 = i * 2;
            let row2 = i * 2 + 1;
            a[row1 * 9] = -x1;
            a[row1 * 9 + 1] = -y1;
            a[row1 * 9 + 2] = -1.0;
            a[row1 * 9 + 6] = x2 * x1;
            a[row1 * 9 + 7] = x2 * y1;
            a[row1 * 9 + 8] = x2;
            a[row2 * 9 + 3] = -x1;
            a[row2 * 9 + 4] = -y1;
            a[row2 * 9 + 5] = -1.0;
            a[row2 * 9 + 6] = y2 * x1;
            a[row2 * 9 + 7] = y2 * y1;
            a[row2 * 9 + 8] = y2;
        }

        let hn = solve_dlt_homography(&a, data.len() * 2)?;
        let h = t_dst.try_inverse()? * hn * t_src;
        normalize_homography(h)
    }

    fn compute_error(&self, model: &Self::Model, data: &MatchPair) -> f64 {
        let p1 = Vector3::new(data.src.0, data.src.1, 1.0);
        let p2_pred = model * p1;
        if p2_pred[2].abs() > 1e-10 {
            let x2_pred = p2_pred[0] / p2_pred[2];
            let y2_pred = p2_pred[1] / p2_pred[2];
            ((x2_pred - data.dst.0).powi(2) + (y2_pred - data.dst.1).powi(2)).sqrt()
        } else {
            f64::INFINITY
        }
    }
}

/// Similarity moving the centroid to the origin with mean distance sqrt(2).
fn normalizing_transform(points: &[(f64, f64)]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-9 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// Minimal samples with three collinear points do not constrain a homography.
fn has_collinear_triple(t: &Matrix3<f64>, points: &[(f64, f64)]) -> bool {
    let p: Vec<(f64, f64)> = points.iter().map(|&q| apply(t, q)).collect();
    for i in 0..p.len() {
        for j in i + 1..p.len() {
            for k in j + 1..p.len() {
                let cross = (p[j].0 - p[i].0) * (p[k].1 - p[i].1) - (p[j].1 - p[i].1) * (p[k].0 - p[i].0);
                if cross.abs() < 1e-6 {
                    return true;
                }
            }
        }
    }
    false
}

fn apply(t: &Matrix3<f64>, p: (f64, f64)) -> (f64, f64) {
    (t[(0, 0)] * p.0 + t[(0, 2)], t[(1, 1)] * p.1 + t[(1, 2)])
}

/// Solve DLT for homography using SVD
fn solve_dlt_homography(a: &[f64], n_rows: usize) -> Option<Matrix3<f64>> {
    let mut matrix = DMatrix::from_row_slice(n_rows, 9, a);

    // If underdetermined, pad with zeros to ensure we get 9 singular vectors
    if n_rows < 9 {
        let mut padded = DMatrix::zeros(9, 9);
        padded.view_mut((0, 0), (n_rows, 9)).copy_from(&matrix);
        matrix = padded;
    }

    let svd = matrix.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h_vec = v_t.row(min_idx);

    Some(Matrix3::new(
        h_vec[0], h_vec[1], h_vec[2], h_vec[3], h_vec[4], h_vec[5], h_vec[6], h_vec[7], h_vec[8],
    ))
}

/// Scale so `h[(2, 2)] == 1` and reject degenerate solutions.
fn normalize_homography(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let h22 = h[(2, 2)];
    if h22.abs() < 1e-12 {
        return None;
    }
    let h = h / h22;
    if !is_finite_matrix(&h) || h.determinant().abs() < 1e-9 {
        return None;
    }
    Some(h)
}

#[derive(Debug, Clone)]
pub struct HomographyResult {
    pub homography: Matrix3<f64>,
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
    /// Mean reprojection error over the inliers.
    pub residual: f64,
}

/// Robustly fit a homography mapping `src` points onto `dst` points, then
/// refit on the consensus set.
pub fn find_homography(pairs: &[MatchPair], config: &RansacConfig) -> Result<HomographyResult> {
    let estimator = HomographyEstimator;
    if pairs.len() < estimator.min_sample_size() {
        return Err(FeatureError::EstimationFailed(format!(
            "need at least 4 correspondences, got {}",
            pairs.len()
        )));
    }

    let ransac = Ransac::new(config.clone());
    let result = ransac.run(&estimator, pairs);
    let Some(model) = result.model else {
        return Err(FeatureError::EstimationFailed(
            "no homography consistent with the correspondences".to_string(),
        ));
    };

    let mut best = HomographyResult {
        homography: model,
        inliers: result.inliers,
        num_inliers: result.num_inliers,
        residual: result.residual,
    };

    let consensus: Vec<&MatchPair> = pairs
        .iter()
        .zip(best.inliers.iter())
        .filter_map(|(p, &keep)| keep.then_some(p))
        .collect();
    if consensus.len() > estimator.min_sample_size() {
        if let Some(refined) = estimator.estimate(&consensus) {
            let (inliers, num_inliers, residual) = ransac.score(&estimator, &refined, pairs);
            if num_inliers >= best.num_inliers {
                best = HomographyResult {
                    homography: refined,
                    inliers,
                    num_inliers,
                    residual,
                };
            }
        }
    }

    debug!(
        correspondences = pairs.len(),
        inliers = best.num_inliers,
        residual = best.residual,
        "homography estimated"
    );
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project(h: &Matrix3<f64>, p: (f64, f64)) -> (f64, f64) {
        let v = h * Vector3::new(p.0, p.1, 1.0);
        (v[0] / v[2], v[1] / v[2])
    }

    fn grid_pairs(h: &Matrix3<f64>) -> Vec<MatchPair> {
        let mut pairs = Vec::new();
        for i in 0..6 {
            for j in 0..5 {
                let src = (10.0 + 25.0 * i as f64, 5.0 + 30.0 * j as f64);
                pairs.push(MatchPair::new(src, project(h, src)));
            }
        }
        pairs
    }

    #[test]
    fn minimal_sample_recovers_homography() {
        let h = Matrix3::new(1.02, 0.01, 230.0, -0.005, 0.99, 3.0, 1e-5, -2e-5, 1.0);
        let pairs = grid_pairs(&h);
        let refs: Vec<&MatchPair> = vec![&pairs[0], &pairs[5], &pairs[24], &pairs[29]];
        let est = HomographyEstimator.estimate(&refs).unwrap();
        for (a, b) in est.iter().zip(h.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6, max_relative = 1e-6);
        }
    }

    #[test]
    fn collinear_sample_is_rejected() {
        let pairs: Vec<MatchPair> = (0..4)
            .map(|i| MatchPair::new((i as f64, 2.0 * i as f64), (i as f64 + 5.0, 2.0 * i as f64)))
            .collect();
        let refs: Vec<&MatchPair> = pairs.iter().collect();
        assert!(HomographyEstimator.estimate(&refs).is_none());
    }

    #[test]
    fn ransac_rejects_outliers() {
        let h = Matrix3::new(1.0, 0.0, 280.0, 0.0, 1.0, -2.0, 0.0, 0.0, 1.0);
        let mut pairs = grid_pairs(&h);
        pairs[3].dst = (0.0, 0.0);
        pairs[11].dst = (500.0, 40.0);
        pairs[17].dst.0 += 30.0;

        let config = RansacConfig::default().with_threshold(5.0);
        let result = find_homography(&pairs, &config).unwrap();
        assert_eq!(result.num_inliers, pairs.len() - 3);
        assert!(!result.inliers[3] && !result.inliers[11] && !result.inliers[17]);
        assert_relative_eq!(result.homography[(0, 2)], 280.0, epsilon = 1e-6);
        assert_relative_eq!(result.homography[(1, 2)], -2.0, epsilon = 1e-6);
    }

    #[test]
    fn too_few_pairs_fail() {
        let pairs = vec![MatchPair::new((0.0, 0.0), (1.0, 1.0)); 3];
        assert!(matches!(
            find_homography(&pairs, &RansacConfig::default()),
            Err(FeatureError::EstimationFailed(_))
        ));
    }
}
