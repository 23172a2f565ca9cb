//! End-to-end run: sync offset, calibration, batch stitch.

use crate::config::PipelineConfig;
use chrono::NaiveDate;
use cv_photo::{stitch_videos, StitchError, StitchOptions, StitchReport};
use cv_sync::{detect_offset, SyncError, SyncOutcome};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Stitch(#[from] StitchError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    /// `None` when the frame offset was given explicitly.
    pub sync: Option<SyncOutcome>,
    pub frame_offset: i64,
    pub stitch: StitchReport,
}

/// Frame offset between the sources: `explicit` when given, otherwise
/// detected and converted at the left source's frame rate (or the
/// configured default when the source reports none).
pub fn resolve_frame_offset(
    left: &Path,
    right: &Path,
    explicit: Option<i64>,
    config: &PipelineConfig,
) -> Result<(i64, Option<SyncOutcome>), PipelineError> {
    if let Some(offset) = explicit {
        return Ok((offset, None));
    }
    let outcome = detect_offset(left, right, &config.sync)?;
    let fps = cv_videoio::probe(left)
        .ok()
        .and_then(|info| info.fps)
        .filter(|f| f.is_finite() && *f > 0.0)
        .unwrap_or(config.output.default_fps);
    let frames = outcome.frames(fps);
    info!(method = %outcome.method, seconds = outcome.seconds, fps, frames, "sources synchronized");
    Ok((frames, Some(outcome)))
}

/// Inputs of one stitching run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StitchRequest {
    pub left: PathBuf,
    pub right: PathBuf,
    /// Video file, or a directory of PNG frames when it has no extension.
    pub output: PathBuf,
    pub calibration: Option<PathBuf>,
    pub date: Option<NaiveDate>,
    /// Skips sync detection when set.
    pub frame_offset: Option<i64>,
}

/// Synchronize, calibrate when needed, and stitch the request's sources.
pub fn stitch_synchronized(
    request: &StitchRequest,
    config: &PipelineConfig,
    progress: Option<&mut dyn FnMut(u64, Option<u64>)>,
) -> Result<PipelineReport, PipelineError> {
    let (frame_offset, sync) = resolve_frame_offset(&request.left, &request.right, request.frame_offset, config)?;

    let options = StitchOptions {
        calibration: request.calibration.clone(),
        calibration_dir: config.output.calibration_dir.clone(),
        date: request.date,
        frame_offset,
        default_fps: config.output.default_fps,
        calibration_config: config.calibration.clone(),
    };
    let stitch = stitch_videos(&request.left, &request.right, &request.output, &options, progress)?;

    Ok(PipelineReport {
        sync,
        frame_offset,
        stitch,
    })
}
