use crate::calibrate::{calibrate_and_save, CalibrationConfig};
use crate::calibration::{calibration_path, CalibrationRecord, StitchGeometry};
use crate::stitcher::stitch_frame;
use crate::Result;
use chrono::NaiveDate;
use cv_videoio::{open_sink, open_source, FrameSink, FrameSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Why the frame loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    LeftExhausted,
    RightExhausted,
    LeftDecodeFailed,
    RightDecodeFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchReport {
    pub frames_written: u64,
    /// Frames both sources should yield after the offset, when known.
    pub expected_frames: Option<u64>,
    pub skipped_left: u64,
    pub skipped_right: u64,
    pub termination: Termination,
}

/// Aborts the sink unless the run completes.
struct SinkGuard<'a> {
    sink: &'a mut dyn FrameSink,
    armed: bool,
}

impl Drop for SinkGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(frames = self.sink.frames_written(), "aborting partial output");
            self.sink.abort();
        }
    }
}

enum Pull {
    Frame(image::RgbImage),
    Stop(Termination),
}

fn pull(source: &mut dyn FrameSource, exhausted: Termination, failed: Termination, side: &str) -> Pull {
    match source.read() {
        Ok(Some(frame)) => Pull::Frame(frame),
        Ok(None) => {
            info!(side, "source exhausted");
            Pull::Stop(exhausted)
        }
        Err(e) => {
            warn!(side, error = %e, "decode failed, truncating output");
            Pull::Stop(failed)
        }
    }
}

/// Stitch frame pairs from two sources into `sink`.
///
/// A positive `frame_offset` drops that many leading right frames, a
/// negative one drops leading left frames. Pairs are processed strictly in
/// order until either side runs out. A failed write aborts the sink.
pub fn stitch_sources(
    left: &mut dyn FrameSource,
    right: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    geometry: &StitchGeometry,
    frame_offset: i64,
    mut progress: Option<&mut dyn FnMut(u64, Option<u64>)>,
) -> Result<StitchReport> {
    let mut guard = SinkGuard { sink, armed: true };

    let (skipped_left, skipped_right) = if frame_offset > 0 {
        (0, right.skip(frame_offset.unsigned_abs())?)
    } else if frame_offset < 0 {
        (left.skip(frame_offset.unsigned_abs())?, 0)
    } else {
        (0, 0)
    };
    if frame_offset != 0 {
        info!(frame_offset, skipped_left, skipped_right, "applied sync offset");
    }

    let remaining = |total: Option<u64>, skipped: u64| total.map(|t| t.saturating_sub(skipped));
    let expected_frames = match (
        remaining(left.frame_count(), skipped_left),
        remaining(right.frame_count(), skipped_right),
    ) {
        (Some(l), Some(r)) => Some(l.min(r)),
        _ => None,
    };

    let mut written = 0u64;
    let termination = loop {
        let l = match pull(left, Termination::LeftExhausted, Termination::LeftDecodeFailed, "left") {
            Pull::Frame(f) => f,
            Pull::Stop(t) => break t,
        };
        let r = match pull(right, Termination::RightExhausted, Termination::RightDecodeFailed, "right") {
            Pull::Frame(f) => f,
            Pull::Stop(t) => break t,
        };

        let frame = stitch_frame(&l, &r, geometry)?;
        guard.sink.write(&frame)?;
        written += 1;

        match progress.as_mut() {
            Some(report) => (**report)(written, expected_frames),
            None if written % PROGRESS_LOG_INTERVAL == 0 => {
                info!(written, expected = ?expected_frames, "stitching");
            }
            None => {}
        }
    };

    guard.sink.finish()?;
    guard.armed = false;

    info!(frames = written, ?termination, "stitching finished");
    Ok(StitchReport {
        frames_written: written,
        expected_frames,
        skipped_left,
        skipped_right,
        termination,
    })
}

/// Everything [`stitch_videos`] needs besides the media paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchOptions {
    /// Explicit calibration file. Falls back to the dated file in
    /// `calibration_dir`, then to calibrating frame 0.
    pub calibration: Option<PathBuf>,
    pub calibration_dir: PathBuf,
    pub date: Option<NaiveDate>,
    pub frame_offset: i64,
    /// Output rate when the left source does not report one.
    pub default_fps: f64,
    pub calibration_config: CalibrationConfig,
}

impl Default for StitchOptions {
    fn default() -> Self {
        Self {
            calibration: None,
            calibration_dir: PathBuf::from("calibrations"),
            date: None,
            frame_offset: 0,
            default_fps: 30.0,
            calibration_config: CalibrationConfig::default(),
        }
    }
}

impl StitchOptions {
    pub fn with_calibration<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.calibration = Some(path.into());
        self
    }

    pub fn with_calibration_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.calibration_dir = dir.into();
        self
    }

    pub fn with_frame_offset(mut self, frame_offset: i64) -> Self {
        self.frame_offset = frame_offset;
        self
    }
}

fn resolve_calibration(left: &Path, right: &Path, options: &StitchOptions) -> Result<CalibrationRecord> {
    if let Some(path) = &options.calibration {
        return CalibrationRecord::load(path);
    }
    let dated = calibration_path(&options.calibration_dir, options.date);
    if dated.exists() {
        info!(path = %dated.display(), "using existing calibration");
        return CalibrationRecord::load(&dated);
    }
    info!("no calibration found, calibrating on frame 0");
    let (record, _) = calibrate_and_save(
        left,
        right,
        0,
        &options.calibration_dir,
        options.date,
        &options.calibration_config,
    )?;
    Ok(record)
}

/// Stitch two recordings into `output` (a video file, or a directory of
/// PNG frames when the path has no extension).
///
/// The calibration is validated before either source is opened.
pub fn stitch_videos<P: AsRef<Path>, Q: AsRef<Path>, O: AsRef<Path>>(
    left: P,
    right: Q,
    output: O,
    options: &StitchOptions,
    progress: Option<&mut dyn FnMut(u64, Option<u64>)>,
) -> Result<StitchReport> {
    let (left, right, output) = (left.as_ref(), right.as_ref(), output.as_ref());
    let geometry = resolve_calibration(left, right, options)?.validate()?;

    let mut left_source = open_source(left)?;
    let mut right_source = open_source(right)?;
    let fps = left_source
        .frame_rate()
        .filter(|f| f.is_finite() && *f > 0.0)
        .unwrap_or(options.default_fps);

    let mut sink = open_sink(output, geometry.canvas_width, geometry.canvas_height, fps)?;
    info!(
        output = %output.display(),
        width = geometry.canvas_width,
        height = geometry.canvas_height,
        fps,
        frame_offset = options.frame_offset,
        "stitching"
    );

    stitch_sources(
        left_source.as_mut(),
        right_source.as_mut(),
        sink.as_mut(),
        &geometry,
        options.frame_offset,
        progress,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_videoio::{StillImageSource, VideoError};
    use image::{Rgb, RgbImage};

    /// Source that yields `ok` frames, then a decode error.
    struct Flaky {
        ok: u64,
        read: u64,
    }

    impl FrameSource for Flaky {
        fn read(&mut self) -> cv_videoio::Result<Option<RgbImage>> {
            self.read += 1;
            if self.read > self.ok {
                return Err(VideoError::Backend("corrupt packet".into()));
            }
            Ok(Some(RgbImage::from_pixel(8, 4, Rgb([60, 60, 60]))))
        }
        fn frame_count(&self) -> Option<u64> {
            None
        }
        fn frame_rate(&self) -> Option<f64> {
            Some(25.0)
        }
        fn dimensions(&self) -> (u32, u32) {
            (8, 4)
        }
    }

    /// In-memory sink that can be told to fail.
    #[derive(Default)]
    struct Collect {
        frames: Vec<RgbImage>,
        fail_at: Option<usize>,
        finished: bool,
        aborted: bool,
    }

    impl FrameSink for Collect {
        fn write(&mut self, frame: &RgbImage) -> cv_videoio::Result<()> {
            if Some(self.frames.len()) == self.fail_at {
                return Err(VideoError::Backend("disk full".into()));
            }
            self.frames.push(frame.clone());
            Ok(())
        }
        fn frames_written(&self) -> u64 {
            self.frames.len() as u64
        }
        fn finish(&mut self) -> cv_videoio::Result<()> {
            self.finished = true;
            Ok(())
        }
        fn abort(&mut self) {
            self.aborted = true;
            self.frames.clear();
        }
    }

    fn geometry() -> StitchGeometry {
        StitchGeometry {
            homography: cv_core::translation_matrix(4.0, 0.0),
            canvas_width: 12,
            canvas_height: 4,
            offset_x: 0,
            offset_y: 0,
            blend: Some(4..8),
        }
    }

    #[test]
    fn decode_failure_truncates_cleanly() {
        let mut left = Flaky { ok: 3, read: 0 };
        let mut right = Flaky { ok: 10, read: 0 };
        let mut sink = Collect::default();
        let report = stitch_sources(&mut left, &mut right, &mut sink, &geometry(), 0, None).unwrap();
        assert_eq!(report.frames_written, 3);
        assert_eq!(report.termination, Termination::LeftDecodeFailed);
        assert!(sink.finished);
        assert!(!sink.aborted);
    }

    #[test]
    fn write_failure_aborts_sink() {
        let mut left = Flaky { ok: 10, read: 0 };
        let mut right = Flaky { ok: 10, read: 0 };
        let mut sink = Collect {
            fail_at: Some(2),
            ..Default::default()
        };
        let result = stitch_sources(&mut left, &mut right, &mut sink, &geometry(), 0, None);
        assert!(result.is_err());
        assert!(sink.aborted);
        assert!(sink.frames.is_empty());
        assert!(!sink.finished);
    }

    #[test]
    fn progress_callback_sees_every_frame() {
        let mut left = Flaky { ok: 5, read: 0 };
        let mut right = Flaky { ok: 7, read: 0 };
        let mut sink = Collect::default();
        let mut seen = Vec::new();
        let mut record = |written: u64, _total: Option<u64>| seen.push(written);
        stitch_sources(&mut left, &mut right, &mut sink, &geometry(), -1, Some(&mut record)).unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn still_sources_stitch_once() {
        let img = RgbImage::from_pixel(8, 4, Rgb([1, 2, 3]));
        let mut left = StillImageSource::from_image(img.clone());
        let mut right = StillImageSource::from_image(img);
        let mut sink = Collect::default();
        let report = stitch_sources(&mut left, &mut right, &mut sink, &geometry(), 0, None).unwrap();
        assert_eq!(report.frames_written, 1);
        assert_eq!(report.expected_frames, Some(1));
        assert_eq!(report.termination, Termination::LeftExhausted);
    }

    #[test]
    fn options_carry_the_match_date_through_json() {
        let json = r#"{"date": "2024-03-09", "frame_offset": -12}"#;
        let options: StitchOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.date, NaiveDate::from_ymd_opt(2024, 3, 9));
        assert_eq!(options.frame_offset, -12);
        assert_eq!(options.calibration_dir, PathBuf::from("calibrations"));

        let text = serde_json::to_string(&options).unwrap();
        assert!(text.contains("\"2024-03-09\""));
        let back: StitchOptions = serde_json::from_str(&text).unwrap();
        assert_eq!(back, options);
    }
}
