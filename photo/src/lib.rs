//! Panorama calibration and stitching
//!
//! A calibration pass estimates the homography between the two cameras and
//! derives a fixed output canvas with a blend band over the overlap. The
//! resulting [`CalibrationRecord`] is persisted as JSON, validated once into
//! a [`StitchGeometry`] and then applied to every frame pair.
//!
//! # Example
//!
//! ```no_run
//! # use cv_photo::{calibrate_files, stitch_frame, CalibrationConfig};
//! # fn main() -> cv_photo::Result<()> {
//! let record = calibrate_files("left.png", "right.png", 0, &CalibrationConfig::default())?;
//! let geometry = record.validate()?;
//! let left = image::open("left.png").map_err(cv_videoio::VideoError::from)?.to_rgb8();
//! let right = image::open("right.png").map_err(cv_videoio::VideoError::from)?.to_rgb8();
//! let panorama = stitch_frame(&left, &right, &geometry)?;
//! # let _ = panorama;
//! # Ok(())
//! # }
//! ```

/// Frame-sequence stitching with sync offsets
pub mod batch;
/// Feature-based pair calibration and canvas layout
pub mod calibrate;
/// Persisted calibration artifact and its validated form
pub mod calibration;
/// Calibration over several candidate frames
pub mod multi;
/// Per-frame compositing
pub mod stitcher;

pub use batch::{stitch_sources, stitch_videos, StitchOptions, StitchReport, Termination};
pub use calibrate::{calibrate_and_save, calibrate_files, calibrate_pair, canvas_layout, CalibrationConfig, CanvasLayout};
pub use calibration::{calibration_path, CalibrationRecord, StitchGeometry, REQUIRED_KEYS};
pub use multi::{calibrate_candidates, calibrate_multi, candidate_indices, CandidateCalibration, CANDIDATE_POSITIONS};
pub use stitcher::stitch_frame;

use cv_features::FeatureError;
use cv_imgproc::ImgprocError;
use cv_videoio::VideoError;

pub type Result<T> = std::result::Result<T, StitchError>;

#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    #[error("Calibration is missing required keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("All candidate frames failed calibration")]
    AllCandidatesFailed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error("Video error: {0}")]
    Video(#[from] VideoError),

    #[error("Image processing error: {0}")]
    Imgproc(#[from] ImgprocError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] cv_core::Error),
}

impl StitchError {
    /// Registration failed on this particular frame pair. Another frame of
    /// the same recording may still calibrate.
    pub fn is_frame_failure(&self) -> bool {
        matches!(
            self,
            Self::Feature(_) | Self::InvalidCalibration(_) | Self::Geometry(_)
        )
    }
}
