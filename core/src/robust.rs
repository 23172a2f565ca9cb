//! Robust Estimation Module
//!
//! Generic RANSAC usable for any model estimation task. Sampling is driven by
//! a seeded RNG so a given input always produces the same model.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Configuration for robust estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustConfig {
    /// Maximum error for a datum to count as an inlier.
    pub threshold: f64,
    pub max_iterations: usize,
    /// Probability of having drawn at least one outlier-free sample, used to
    /// stop sampling early.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RobustConfig {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0x5eed_cafe,
        }
    }
}

impl RobustConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Result of robust estimation
#[derive(Debug, Clone)]
pub struct RobustResult<M> {
    pub model: Option<M>,
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
    /// Mean error over the inliers.
    pub residual: f64,
}

impl<M> RobustResult<M> {
    fn empty(n: usize) -> Self {
        Self {
            model: None,
            inliers: vec![false; n],
            num_inliers: 0,
            residual: f64::INFINITY,
        }
    }
}

/// Trait for models that can be estimated robustly
pub trait RobustModel<D> {
    type Model: Clone;

    /// Minimum number of data points required to estimate the model
    fn min_sample_size(&self) -> usize;

    /// Estimate model from a sample (minimal or larger)
    fn estimate(&self, data: &[&D]) -> Option<Self::Model>;

    /// Compute error for a single data point against the model
    fn compute_error(&self, model: &Self::Model, data: &D) -> f64;
}

/// Generic RANSAC engine
pub struct Ransac<D, M: RobustModel<D>> {
    config: RobustConfig,
    _phantom: PhantomData<(D, M)>,
}

impl<D, M: RobustModel<D>> Ransac<D, M> {
    pub fn new(config: RobustConfig) -> Self {
        Self {
            config,
            _phantom: PhantomData,
        }
    }

    pub fn config(&self) -> &RobustConfig {
        &self.config
    }

    pub fn run(&self, estimator: &M, data: &[D]) -> RobustResult<M::Model> {
        let n = data.len();
        let k = estimator.min_sample_size();

        if n < k || k == 0 {
            return RobustResult::empty(n);
        }

        let mut best = RobustResult::empty(n);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut required = self.config.max_iterations;
        let mut iteration = 0;

        while iteration < required.min(self.config.max_iterations) {
            iteration += 1;

            // 1. Sample
            let picked = sample(&mut rng, n, k);
            let subset: Vec<&D> = picked.iter().map(|i| &data[i]).collect();

            // 2. Estimate
            let Some(model) = estimator.estimate(&subset) else {
                continue;
            };

            // 3. Score
            let (inliers, num_inliers, residual) = self.score(estimator, &model, data);
            if num_inliers > best.num_inliers
                || (num_inliers == best.num_inliers && num_inliers > 0 && residual < best.residual)
            {
                best = RobustResult {
                    model: Some(model),
                    inliers,
                    num_inliers,
                    residual,
                };
                required = adaptive_iterations(self.config.confidence, num_inliers, n, k)
                    .unwrap_or(required);
            }
        }

        best
    }

    /// Inlier mask, inlier count and mean inlier error of `model` over `data`.
    pub fn score(&self, estimator: &M, model: &M::Model, data: &[D]) -> (Vec<bool>, usize, f64) {
        let mut inliers = vec![false; data.len()];
        let mut num_inliers = 0;
        let mut total_error = 0.0;

        for (j, d) in data.iter().enumerate() {
            let err = estimator.compute_error(model, d);
            if err < self.config.threshold {
                inliers[j] = true;
                num_inliers += 1;
                total_error += err;
            }
        }

        let residual = if num_inliers > 0 {
            total_error / num_inliers as f64
        } else {
            f64::INFINITY
        };
        (inliers, num_inliers, residual)
    }
}

/// Number of draws needed to hit an all-inlier sample with the configured
/// confidence, given the current inlier ratio.
fn adaptive_iterations(confidence: f64, num_inliers: usize, n: usize, k: usize) -> Option<usize> {
    let w = num_inliers as f64 / n as f64;
    let p_good = w.powi(k as i32);
    if p_good >= 1.0 {
        return Some(1);
    }
    if p_good <= f64::EPSILON {
        return None;
    }
    let needed = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if needed.is_finite() {
        Some(needed.ceil().max(1.0) as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1D line fit `y = a*x + b` used to exercise the engine.
    struct LineModel;

    impl RobustModel<(f64, f64)> for LineModel {
        type Model = (f64, f64);

        fn min_sample_size(&self) -> usize {
            2
        }

        fn estimate(&self, data: &[&(f64, f64)]) -> Option<Self::Model> {
            let (x0, y0) = *data[0];
            let (x1, y1) = *data[1];
            if (x1 - x0).abs() < 1e-9 {
                return None;
            }
            let a = (y1 - y0) / (x1 - x0);
            Some((a, y0 - a * x0))
        }

        fn compute_error(&self, model: &Self::Model, data: &(f64, f64)) -> f64 {
            (model.0 * data.0 + model.1 - data.1).abs()
        }
    }

    fn line_with_outliers() -> Vec<(f64, f64)> {
        let mut data: Vec<(f64, f64)> = (0..40).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        data.extend([(3.0, 50.0), (7.0, -20.0), (11.0, 4.0), (20.0, 0.0), (33.0, 1.0)]);
        data
    }

    #[test]
    fn recovers_line_despite_outliers() {
        let ransac = Ransac::new(RobustConfig::default().with_threshold(0.5));
        let result = ransac.run(&LineModel, &line_with_outliers());
        let (a, b) = result.model.unwrap();
        assert!((a - 2.0).abs() < 1e-9);
        assert!((b - 1.0).abs() < 1e-9);
        assert_eq!(result.num_inliers, 40);
        assert!(!result.inliers[40]);
    }

    #[test]
    fn same_seed_same_result() {
        let data = line_with_outliers();
        let ransac = Ransac::new(RobustConfig::default().with_threshold(0.5).with_seed(7));
        let a = ransac.run(&LineModel, &data);
        let b = ransac.run(&LineModel, &data);
        assert_eq!(a.model, b.model);
        assert_eq!(a.inliers, b.inliers);
    }

    #[test]
    fn too_few_points_gives_no_model() {
        let ransac = Ransac::new(RobustConfig::default());
        let result = ransac.run(&LineModel, &[(0.0, 0.0)]);
        assert!(result.model.is_none());
        assert_eq!(result.num_inliers, 0);
    }

    #[test]
    fn adaptive_iterations_shrink_with_inlier_ratio() {
        let low = adaptive_iterations(0.99, 20, 100, 4).unwrap();
        let high = adaptive_iterations(0.99, 90, 100, 4).unwrap();
        assert!(high < low);
        assert_eq!(adaptive_iterations(0.99, 100, 100, 4), Some(1));
    }
}
