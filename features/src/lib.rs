//! Local features for panorama registration
//!
//! SIFT keypoints and descriptors, ratio-test matching and robust homography
//! estimation.

pub mod descriptor;
pub mod matcher;
pub mod ransac;
pub mod sift;

pub use descriptor::{Descriptor, Descriptors};
pub use matcher::{filter_matches_by_ratio_test, knn_match, Matcher, DEFAULT_RATIO};
pub use ransac::{find_homography, HomographyEstimator, HomographyResult, MatchPair, RansacConfig};
pub use sift::{ScaleSpace, Sift};

pub type Result<T> = std::result::Result<T, FeatureError>;

#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("Detection error: {0}")]
    DetectionError(String),

    #[error("Matching error: {0}")]
    MatchingError(String),

    #[error("Only {found} good matches found (need {required})")]
    InsufficientMatches { found: usize, required: usize },

    #[error("Homography estimation failed: {0}")]
    EstimationFailed(String),
}
