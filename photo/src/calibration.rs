use crate::{Result, StitchError};
use chrono::{Local, NaiveDate};
use cv_core::{is_finite_matrix, translation_matrix};
use nalgebra::{Matrix2, Matrix3};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Keys without which a calibration cannot drive stitching.
pub const REQUIRED_KEYS: [&str; 7] = [
    "homography",
    "canvas_width",
    "canvas_height",
    "offset_x",
    "offset_y",
    "blend_x_start",
    "blend_x_end",
];

/// Largest deviation of the homography's linear block from identity before
/// the calibration is reported as suspicious.
const LINEAR_BLOCK_TOLERANCE: f64 = 0.5;

/// Persisted result of calibrating one camera pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Maps right-frame pixels into left-frame coordinates.
    pub homography: [[f64; 3]; 3],
    pub canvas_width: i64,
    pub canvas_height: i64,
    /// Canvas origin in left-frame coordinates.
    pub offset_x: i64,
    pub offset_y: i64,
    pub blend_x_start: i64,
    pub blend_x_end: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_matches: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_inliers: Option<usize>,
    /// `[height, width]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_resolution: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_resolution: Option<[u32; 2]>,
    #[serde(default)]
    pub timecode_offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inlier_ratio: Option<f64>,
}

impl CalibrationRecord {
    pub fn homography_matrix(&self) -> Matrix3<f64> {
        let h = &self.homography;
        Matrix3::new(
            h[0][0], h[0][1], h[0][2], h[1][0], h[1][1], h[1][2], h[2][0], h[2][1], h[2][2],
        )
    }

    /// Parse a calibration, reporting every missing required key at once.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let object = value
            .as_object()
            .ok_or_else(|| StitchError::InvalidCalibration("top level must be a JSON object".to_string()))?;

        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|key| !object.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(StitchError::MissingKeys(missing));
        }

        check_matrix_shape(&object["homography"])?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let record = Self::from_json_str(&text)?;
        debug!(path = %path.display(), "calibration loaded");
        Ok(record)
    }

    /// Write pretty-printed JSON, creating parent directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "calibration saved");
        Ok(())
    }

    /// Check the record and freeze it into the form the stitcher consumes.
    pub fn validate(&self) -> Result<StitchGeometry> {
        let homography = self.homography_matrix();
        if !is_finite_matrix(&homography) {
            return Err(StitchError::InvalidCalibration(
                "homography contains NaN or infinite values".to_string(),
            ));
        }
        if homography.try_inverse().is_none() {
            return Err(StitchError::InvalidCalibration("homography is singular".to_string()));
        }

        let canvas_width = positive_dimension("canvas_width", self.canvas_width)?;
        let canvas_height = positive_dimension("canvas_height", self.canvas_height)?;

        let start = self.blend_x_start.clamp(0, canvas_width as i64);
        let end = self.blend_x_end.clamp(0, canvas_width as i64);
        let blend = (start < end).then(|| start as u32..end as u32);
        if blend.is_none() {
            debug!(
                blend_x_start = self.blend_x_start,
                blend_x_end = self.blend_x_end,
                "no blend band"
            );
        }

        let deviation = (homography.fixed_view::<2, 2>(0, 0) - Matrix2::identity()).amax();
        if deviation > LINEAR_BLOCK_TOLERANCE {
            warn!(deviation, "homography is far from a pure translation, check the calibration");
        }

        Ok(StitchGeometry {
            homography,
            canvas_width,
            canvas_height,
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            blend,
        })
    }
}

fn check_matrix_shape(value: &Value) -> Result<()> {
    let rows = value
        .as_array()
        .ok_or_else(|| StitchError::InvalidCalibration("homography must be a 3x3 array".to_string()))?;
    let well_formed = rows.len() == 3
        && rows
            .iter()
            .all(|row| row.as_array().is_some_and(|r| r.len() == 3 && r.iter().all(Value::is_number)));
    if !well_formed {
        return Err(StitchError::InvalidCalibration(format!(
            "homography must be a 3x3 array of numbers, got {value}"
        )));
    }
    Ok(())
}

fn positive_dimension(name: &str, value: i64) -> Result<u32> {
    match u32::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(StitchError::InvalidCalibration(format!("{name} must be positive, got {value}"))),
    }
}

/// Validated calibration, ready to be applied to every frame pair.
#[derive(Debug, Clone, PartialEq)]
pub struct StitchGeometry {
    pub homography: Matrix3<f64>,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub offset_x: i64,
    pub offset_y: i64,
    /// Canvas columns where the two views are cross-faded.
    pub blend: Option<Range<u32>>,
}

impl StitchGeometry {
    /// Right-frame pixels to canvas pixels.
    pub fn canvas_transform(&self) -> Matrix3<f64> {
        translation_matrix(-self.offset_x as f64, -self.offset_y as f64) * self.homography
    }

    /// Where the left frame's origin lands on the canvas.
    pub fn left_origin(&self) -> (i64, i64) {
        (-self.offset_x, -self.offset_y)
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.canvas_width, self.canvas_height)
    }
}

/// `{dir}/{YYYY-MM-DD}_cal.json`, dated today in local time unless given.
pub fn calibration_path<P: AsRef<Path>>(dir: P, date: Option<NaiveDate>) -> PathBuf {
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    dir.as_ref().join(format!("{}_cal.json", date.format("%Y-%m-%d")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_record() -> CalibrationRecord {
        CalibrationRecord {
            homography: [[1.0, 0.0, 280.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            canvas_width: 680,
            canvas_height: 300,
            offset_x: 0,
            offset_y: 0,
            blend_x_start: 280,
            blend_x_end: 400,
            num_matches: Some(120),
            num_inliers: Some(110),
            left_resolution: Some([300, 400]),
            right_resolution: Some([300, 400]),
            timecode_offset: 0.0,
            frame_index: None,
            inlier_ratio: None,
        }
    }

    #[test]
    fn validate_builds_geometry() {
        let geometry = sample_record().validate().unwrap();
        assert_eq!(geometry.canvas_size(), (680, 300));
        assert_eq!(geometry.blend, Some(280..400));
        assert_relative_eq!(geometry.canvas_transform()[(0, 2)], 280.0);
    }

    #[test]
    fn offsets_shift_canvas_transform() {
        let mut record = sample_record();
        record.offset_x = -10;
        record.offset_y = -4;
        let geometry = record.validate().unwrap();
        let t = geometry.canvas_transform();
        assert_relative_eq!(t[(0, 2)], 290.0);
        assert_relative_eq!(t[(1, 2)], 4.0);
        assert_eq!(geometry.left_origin(), (10, 4));
    }

    #[test]
    fn inverted_band_means_no_blend() {
        let mut record = sample_record();
        record.blend_x_start = 400;
        record.blend_x_end = 280;
        assert_eq!(record.validate().unwrap().blend, None);
    }

    #[test]
    fn non_finite_homography_is_rejected() {
        let mut record = sample_record();
        record.homography[1][2] = f64::NAN;
        let err = record.validate().unwrap_err();
        assert!(err.to_string().contains("NaN"));

        record.homography[1][2] = f64::INFINITY;
        assert!(matches!(record.validate(), Err(StitchError::InvalidCalibration(_))));
    }

    #[test]
    fn zero_canvas_is_rejected() {
        let mut record = sample_record();
        record.canvas_height = 0;
        assert!(matches!(record.validate(), Err(StitchError::InvalidCalibration(_))));
    }

    #[test]
    fn missing_keys_are_all_reported() {
        let text = r#"{"homography": [[1,0,0],[0,1,0],[0,0,1]], "canvas_width": 10, "offset_x": 0}"#;
        match CalibrationRecord::from_json_str(text) {
            Err(StitchError::MissingKeys(keys)) => {
                assert_eq!(keys, vec!["canvas_height", "offset_y", "blend_x_start", "blend_x_end"]);
            }
            other => panic!("expected missing keys, got {other:?}"),
        }
    }

    #[test]
    fn malformed_homography_is_rejected() {
        let text = r#"{"homography": [[1,0],[0,1]], "canvas_width": 10, "canvas_height": 10,
            "offset_x": 0, "offset_y": 0, "blend_x_start": 0, "blend_x_end": 5}"#;
        assert!(matches!(
            CalibrationRecord::from_json_str(text),
            Err(StitchError::InvalidCalibration(_))
        ));
    }

    #[test]
    fn optional_keys_default() {
        let text = r#"{"homography": [[1,0,5],[0,1,0],[0,0,1]], "canvas_width": 10, "canvas_height": 10,
            "offset_x": 0, "offset_y": 0, "blend_x_start": 0, "blend_x_end": 5}"#;
        let record = CalibrationRecord::from_json_str(text).unwrap();
        assert_eq!(record.num_matches, None);
        assert_eq!(record.timecode_offset, 0.0);
        assert_relative_eq!(record.homography_matrix()[(0, 2)], 5.0);
    }

    #[test]
    fn save_then_load_preserves_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cal.json");
        let record = sample_record();
        record.save(&path).unwrap();
        assert_eq!(CalibrationRecord::load(&path).unwrap(), record);
    }

    #[test]
    fn dated_calibration_path() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let path = calibration_path("/data/cal", Some(date));
        assert_eq!(path, PathBuf::from("/data/cal/2024-03-09_cal.json"));
    }
}
