use crate::descriptor::Descriptors;
use cv_core::{FeatureMatch, Matches};
use rayon::prelude::*;

/// Lowe's ratio used when none is configured.
pub const DEFAULT_RATIO: f32 = 0.75;

/// Brute-force L2 matcher.
#[derive(Debug, Clone)]
pub struct Matcher {
    cross_check: bool,
    ratio_threshold: Option<f32>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            cross_check: false,
            ratio_threshold: None,
        }
    }

    pub fn with_cross_check(mut self) -> Self {
        self.cross_check = true;
        self
    }

    pub fn with_ratio_test(mut self, threshold: f32) -> Self {
        self.ratio_threshold = Some(threshold);
        self
    }

    pub fn match_descriptors(&self, query: &Descriptors, train: &Descriptors) -> Matches {
        let candidates = knn_match(query, train, 2);

        let mut matches: Matches = match self.ratio_threshold {
            Some(ratio) => filter_matches_by_ratio_test(&candidates, ratio).into_iter().collect(),
            None => candidates.iter().filter_map(|knn| knn.first().copied()).collect(),
        };

        if self.cross_check {
            let reverse = knn_match(train, query, 1);
            matches.matches.retain(|m| {
                reverse[m.train_idx]
                    .first()
                    .is_some_and(|r| r.train_idx == m.query_idx)
            });
        }

        matches
    }
}

/// The `k` nearest train descriptors for every query descriptor, closest first.
pub fn knn_match(query: &Descriptors, train: &Descriptors, k: usize) -> Vec<Vec<FeatureMatch>> {
    query
        .descriptors
        .par_iter()
        .enumerate()
        .map(|(query_idx, q_desc)| {
            let mut best: Vec<(usize, f32)> = Vec::with_capacity(k + 1);
            for (train_idx, t_desc) in train.iter().enumerate() {
                let d = q_desc.l2_distance_squared(t_desc);
                if best.len() == k && best.last().is_some_and(|&(_, worst)| d >= worst) {
                    continue;
                }
                let pos = best.partition_point(|&(_, bd)| bd <= d);
                best.insert(pos, (train_idx, d));
                best.truncate(k);
            }
            best.into_iter()
                .map(|(train_idx, d)| FeatureMatch::new(query_idx, train_idx, d.sqrt()))
                .collect()
        })
        .collect()
}

/// Keep the best neighbour when it is clearly closer than the runner-up.
/// Queries with fewer than two neighbours are dropped.
pub fn filter_matches_by_ratio_test(matches: &[Vec<FeatureMatch>], ratio: f32) -> Vec<FeatureMatch> {
    let mut good_matches = Vec::new();

    for knn in matches {
        if knn.len() >= 2 {
            let best = &knn[0];
            let second = &knn[1];

            if best.distance < ratio * second.distance {
                good_matches.push(*best);
            }
        }
    }

    good_matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;
    use cv_core::KeyPoint;

    fn descs(vectors: &[[f32; 3]]) -> Descriptors {
        vectors
            .iter()
            .map(|v| Descriptor::new(v.to_vec(), KeyPoint::default()))
            .collect()
    }

    #[test]
    fn knn_orders_by_distance() {
        let q = descs(&[[0.0, 0.0, 0.0]]);
        let t = descs(&[[3.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        let knn = knn_match(&q, &t, 2);
        assert_eq!(knn[0].len(), 2);
        assert_eq!(knn[0][0].train_idx, 1);
        assert_eq!(knn[0][1].train_idx, 2);
        assert!((knn[0][0].distance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ratio_test_rejects_ambiguous() {
        let q = descs(&[[0.0, 0.0, 0.0], [10.0, 10.0, 0.0]]);
        let t = descs(&[[0.1, 0.0, 0.0], [5.0, 5.0, 5.0], [10.0, 10.0, 1.0], [10.0, 10.0, -1.05]]);
        let matches = Matcher::new().with_ratio_test(DEFAULT_RATIO).match_descriptors(&q, &t);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches.matches[0].query_idx, 0);
        assert_eq!(matches.matches[0].train_idx, 0);
    }

    #[test]
    fn single_train_descriptor_yields_no_ratio_matches() {
        let q = descs(&[[0.0, 0.0, 0.0]]);
        let t = descs(&[[0.0, 0.0, 0.0]]);
        let matches = Matcher::new().with_ratio_test(DEFAULT_RATIO).match_descriptors(&q, &t);
        assert!(matches.is_empty());
    }

    #[test]
    fn cross_check_keeps_mutual_matches() {
        let q = descs(&[[0.0, 0.0, 0.0], [0.25, 0.0, 0.0]]);
        let t = descs(&[[0.1, 0.0, 0.0], [9.0, 0.0, 0.0]]);
        let matches = Matcher::new().with_cross_check().match_descriptors(&q, &t);
        // Both queries pick train 0, only one is its mutual nearest.
        assert_eq!(matches.len(), 1);
    }
}
