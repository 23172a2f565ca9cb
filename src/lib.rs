//! Two-camera panorama stitching
//!
//! Aligns two recordings in time (embedded timecode or audio
//! cross-correlation), calibrates the right camera onto the left one from
//! matched SIFT features, and stitches every synchronized frame pair onto a
//! fixed canvas.

pub use cv_core as core;
pub use cv_features as features;
pub use cv_imgproc as imgproc;
pub use cv_photo as photo;
pub use cv_sync as sync;
pub use cv_videoio as videoio;

pub mod config;
pub mod pipeline;

pub use config::{ConfigError, OutputConfig, PipelineConfig};
pub use pipeline::{resolve_frame_offset, stitch_synchronized, PipelineError, PipelineReport, StitchRequest};

/// Initialize a single global Rayon thread pool for all CPU-parallel routines.
///
/// Call this once at application startup before stitching. Repeated calls
/// are idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `PANO_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    cv_core::init_global_thread_pool(num_threads)
}
