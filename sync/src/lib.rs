//! Time alignment of two independently started recordings
//!
//! Embedded timecode is preferred when both sources carry it; otherwise the
//! offset comes from cross-correlating the two audio tracks.

pub mod audio;
pub mod timecode;

pub use audio::{cross_correlate_offset, extract_audio, load_wav, normalize, sync_audio, AudioTrack};
pub use timecode::{detect_timecode_offset, parse_timecode};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Audio extraction failed for {}: {reason}", .path.display())]
    AudioExtraction { path: PathBuf, reason: String },

    #[error("Sample rate mismatch: left {left} Hz, right {right} Hz")]
    SampleRateMismatch { left: u32, right: u32 },

    #[error("Audio track is empty")]
    EmptyAudio,

    #[error("Invalid sync parameters: {0}")]
    InvalidParameters(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rate audio is extracted at from video containers.
    pub sample_rate: u32,
    /// Leading seconds of audio considered for correlation.
    pub analysis_window_s: f64,
    /// Largest offset searched, in either direction.
    pub max_offset_s: f64,
    /// Frame rate used to read the frame field of `HH:MM:SS:FF` timecodes.
    pub timecode_fps: f64,
    pub use_timecode: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            analysis_window_s: 60.0,
            max_offset_s: 30.0,
            timecode_fps: timecode::DEFAULT_TIMECODE_FPS,
            use_timecode: true,
        }
    }
}

impl SyncConfig {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_max_offset(mut self, seconds: f64) -> Self {
        self.max_offset_s = seconds;
        self
    }

    pub fn with_analysis_window(mut self, seconds: f64) -> Self {
        self.analysis_window_s = seconds;
        self
    }

    pub fn with_timecode(mut self, enabled: bool) -> Self {
        self.use_timecode = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMethod {
    Timecode,
    Audio,
}

impl std::fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMethod::Timecode => write!(f, "timecode"),
            SyncMethod::Audio => write!(f, "audio"),
        }
    }
}

/// Offset between the two recordings. Positive `seconds` means the right
/// camera started first, so its leading material is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub method: SyncMethod,
    pub seconds: f64,
}

impl SyncOutcome {
    pub fn frames(&self, fps: f64) -> i64 {
        seconds_to_frames(self.seconds, fps)
    }
}

/// Nearest whole frame, halves rounded away from zero.
pub fn seconds_to_frames(seconds: f64, fps: f64) -> i64 {
    (seconds * fps).round() as i64
}

/// Timecode first, audio cross-correlation when timecode is unavailable.
/// Audio failures are errors: there is nothing left to fall back to.
pub fn detect_offset<P: AsRef<Path>, Q: AsRef<Path>>(left: P, right: Q, config: &SyncConfig) -> Result<SyncOutcome> {
    let (left, right) = (left.as_ref(), right.as_ref());

    if config.use_timecode {
        if let Some(tc_delta) = detect_timecode_offset(left, right, config.timecode_fps) {
            // A later right timecode means the right camera started later.
            let seconds = -tc_delta;
            info!(seconds, "offset from embedded timecode");
            return Ok(SyncOutcome {
                method: SyncMethod::Timecode,
                seconds,
            });
        }
        info!("no usable timecode, falling back to audio sync");
    }

    let seconds = sync_audio(left, right, config)?;
    info!(seconds, "offset from audio cross-correlation");
    Ok(SyncOutcome {
        method: SyncMethod::Audio,
        seconds,
    })
}
