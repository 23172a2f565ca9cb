use crate::calibration::{calibration_path, CalibrationRecord};
use crate::{Result, StitchError};
use chrono::NaiveDate;
use cv_core::{image_corners, warp_corners, Bounds, Matches};
use cv_features::{find_homography, FeatureError, MatchPair, Matcher, RansacConfig, Sift, DEFAULT_RATIO};
use cv_imgproc::{crop_columns, rgb_to_luma_f32};
use image::RgbImage;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Canvases wider or taller than this are treated as a failed estimate.
const MAX_CANVAS_SIDE: i64 = 32_768;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Fraction of each frame's width searched for features, at the left
    /// frame's right edge and the right frame's left edge.
    pub overlap_fraction: f64,
    pub min_matches: usize,
    pub ratio: f32,
    /// Frames tried by multi-candidate calibration.
    pub candidates: usize,
    pub ransac: RansacConfig,
    pub sift: Sift,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            overlap_fraction: 0.35,
            min_matches: 10,
            ratio: DEFAULT_RATIO,
            candidates: 4,
            ransac: RansacConfig::default().with_threshold(5.0),
            sift: Sift::default(),
        }
    }
}

impl CalibrationConfig {
    pub fn with_overlap_fraction(mut self, fraction: f64) -> Self {
        self.overlap_fraction = fraction;
        self
    }

    pub fn with_min_matches(mut self, min_matches: usize) -> Self {
        self.min_matches = min_matches;
        self
    }

    pub fn with_candidates(mut self, candidates: usize) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_ransac(mut self, ransac: RansacConfig) -> Self {
        self.ransac = ransac;
        self
    }

    fn check(&self) -> Result<()> {
        if !(self.overlap_fraction > 0.0 && self.overlap_fraction <= 1.0) {
            return Err(StitchError::InvalidParameters(format!(
                "overlap_fraction must be in (0, 1], got {}",
                self.overlap_fraction
            )));
        }
        if self.min_matches < 4 {
            return Err(StitchError::InvalidParameters(format!(
                "min_matches must be at least 4, got {}",
                self.min_matches
            )));
        }
        Ok(())
    }
}

/// Canvas placement derived from a homography.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasLayout {
    pub canvas_width: i64,
    pub canvas_height: i64,
    pub offset_x: i64,
    pub offset_y: i64,
    pub blend_x_start: i64,
    pub blend_x_end: i64,
}

/// Smallest integer canvas holding the left frame and the warped right
/// frame, with the blend band spanning their horizontal overlap.
pub fn canvas_layout(homography: &Matrix3<f64>, left: (u32, u32), right: (u32, u32)) -> Result<CanvasLayout> {
    let left_bounds = Bounds::from_points(&image_corners(left.0, left.1))
        .ok_or_else(|| StitchError::InvalidParameters("empty left frame".to_string()))?;
    let warped = warp_corners(homography, right.0, right.1)?;
    let right_bounds = Bounds::from_points(&warped)
        .ok_or_else(|| StitchError::InvalidParameters("empty right frame".to_string()))?;
    let all = left_bounds.union(&right_bounds);

    let x_min = all.x_min.floor() as i64;
    let y_min = all.y_min.floor() as i64;
    let x_max = all.x_max.ceil() as i64;
    let y_max = all.y_max.ceil() as i64;
    let canvas_width = x_max - x_min;
    let canvas_height = y_max - y_min;
    if !(1..=MAX_CANVAS_SIDE).contains(&canvas_width) || !(1..=MAX_CANVAS_SIDE).contains(&canvas_height) {
        return Err(StitchError::InvalidCalibration(format!(
            "implausible canvas {canvas_width}x{canvas_height} from homography"
        )));
    }

    let warped_x_min = right_bounds.x_min.floor() as i64;
    let warped_x_max = right_bounds.x_max.ceil() as i64;

    Ok(CanvasLayout {
        canvas_width,
        canvas_height,
        offset_x: x_min,
        offset_y: y_min,
        blend_x_start: (warped_x_min - x_min).max(0),
        blend_x_end: (left.0 as i64 - x_min).min(warped_x_max - x_min),
    })
}

/// Estimate the right→left homography of one frame pair and lay out the
/// output canvas.
pub fn calibrate_pair(left: &RgbImage, right: &RgbImage, config: &CalibrationConfig) -> Result<CalibrationRecord> {
    config.check()?;
    let (wl, hl) = left.dimensions();
    let (wr, hr) = right.dimensions();
    if wl == 0 || hl == 0 || wr == 0 || hr == 0 {
        return Err(StitchError::InvalidParameters("frames must be non-empty".to_string()));
    }

    let left_start = (wl as f64 * (1.0 - config.overlap_fraction)) as u32;
    let right_width = ((wr as f64 * config.overlap_fraction) as u32).max(1);
    let left_roi = crop_columns(left, left_start, wl - left_start);
    let right_roi = crop_columns(right, 0, right_width);

    let mut left_desc = config.sift.detect_and_compute(&rgb_to_luma_f32(&left_roi))?;
    let right_desc = config.sift.detect_and_compute(&rgb_to_luma_f32(&right_roi))?;
    left_desc.translate(left_start as f64, 0.0);
    debug!(
        left_features = left_desc.len(),
        right_features = right_desc.len(),
        "features in overlap bands"
    );

    let mut matches: Matches = if left_desc.len() < 2 || right_desc.len() < 2 {
        Matches::default()
    } else {
        Matcher::new()
            .with_ratio_test(config.ratio)
            .match_descriptors(&left_desc, &right_desc)
    };
    if matches.len() < config.min_matches {
        return Err(FeatureError::InsufficientMatches {
            found: matches.len(),
            required: config.min_matches,
        }
        .into());
    }

    let pairs: Vec<MatchPair> = matches
        .iter()
        .map(|m| {
            let l = left_desc.descriptors[m.query_idx].keypoint;
            let r = right_desc.descriptors[m.train_idx].keypoint;
            MatchPair::new((r.x, r.y), (l.x, l.y))
        })
        .collect();
    let estimate = find_homography(&pairs, &config.ransac)?;
    matches.mask = Some(estimate.inliers);
    let inliers = matches.num_inliers();
    let layout = canvas_layout(&estimate.homography, (wl, hl), (wr, hr))?;

    let h = estimate.homography;
    let record = CalibrationRecord {
        homography: [
            [h[(0, 0)], h[(0, 1)], h[(0, 2)]],
            [h[(1, 0)], h[(1, 1)], h[(1, 2)]],
            [h[(2, 0)], h[(2, 1)], h[(2, 2)]],
        ],
        canvas_width: layout.canvas_width,
        canvas_height: layout.canvas_height,
        offset_x: layout.offset_x,
        offset_y: layout.offset_y,
        blend_x_start: layout.blend_x_start,
        blend_x_end: layout.blend_x_end,
        num_matches: Some(matches.len()),
        num_inliers: Some(inliers),
        left_resolution: Some([hl, wl]),
        right_resolution: Some([hr, wr]),
        timecode_offset: 0.0,
        frame_index: None,
        inlier_ratio: Some(inliers as f64 / matches.len().max(1) as f64),
    };

    info!(
        matches = matches.len(),
        inliers,
        canvas_width = layout.canvas_width,
        canvas_height = layout.canvas_height,
        blend = ?(layout.blend_x_start..layout.blend_x_end),
        "pair calibrated"
    );
    Ok(record)
}

/// Calibrate on frame `frame_index` of both sources.
pub fn calibrate_files<P: AsRef<Path>, Q: AsRef<Path>>(
    left: P,
    right: Q,
    frame_index: u64,
    config: &CalibrationConfig,
) -> Result<CalibrationRecord> {
    let left_frame = cv_videoio::extract_frame(left, frame_index)?;
    let right_frame = cv_videoio::extract_frame(right, frame_index)?;
    calibrate_pair(&left_frame, &right_frame, config)
}

/// [`calibrate_files`], then persist to the dated path under `dir`.
pub fn calibrate_and_save<P: AsRef<Path>, Q: AsRef<Path>, D: AsRef<Path>>(
    left: P,
    right: Q,
    frame_index: u64,
    dir: D,
    date: Option<NaiveDate>,
    config: &CalibrationConfig,
) -> Result<(CalibrationRecord, PathBuf)> {
    let record = calibrate_files(left, right, frame_index, config)?;
    let path = calibration_path(dir, date);
    record.save(&path)?;
    info!(path = %path.display(), "calibration written");
    Ok((record, path))
}
