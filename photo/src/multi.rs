use crate::calibrate::{calibrate_pair, CalibrationConfig};
use crate::calibration::{calibration_path, CalibrationRecord};
use crate::{Result, StitchError};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Relative positions in the recording at which calibration is attempted.
pub const CANDIDATE_POSITIONS: [f64; 4] = [0.10, 0.25, 0.50, 0.75];

/// A successful calibration at one candidate frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateCalibration {
    pub frame_index: u64,
    pub inlier_ratio: f64,
    pub record: CalibrationRecord,
}

/// Frame indices to try for a source of `total` frames. Unknown or
/// single-frame sources only try frame 0.
pub fn candidate_indices(total: Option<u64>, count: usize) -> Vec<u64> {
    let total = match total {
        Some(t) if t > 1 => t,
        _ => return vec![0],
    };
    let mut indices: Vec<u64> = Vec::with_capacity(count);
    for p in CANDIDATE_POSITIONS.iter().take(count.max(1)) {
        let idx = ((total as f64 * p) as u64).min(total - 1);
        if !indices.contains(&idx) {
            indices.push(idx);
        }
    }
    indices
}

/// Calibrate at every candidate frame, keeping the successes ranked by
/// inlier count. Frames whose content cannot be registered are skipped;
/// read and configuration errors abort the search.
pub fn calibrate_candidates<P: AsRef<Path>, Q: AsRef<Path>>(
    left: P,
    right: Q,
    config: &CalibrationConfig,
) -> Result<Vec<CandidateCalibration>> {
    let (left, right) = (left.as_ref(), right.as_ref());
    let total = cv_videoio::probe(left)?.frame_count;
    let indices = candidate_indices(total, config.candidates);
    info!(?total, ?indices, "trying candidate frames");

    let mut results = Vec::with_capacity(indices.len());
    for &idx in &indices {
        match calibrate_at(left, right, idx, config) {
            Ok(candidate) => {
                debug!(
                    frame = idx,
                    inliers = candidate.record.num_inliers,
                    inlier_ratio = candidate.inlier_ratio,
                    "candidate calibrated"
                );
                results.push(candidate);
            }
            Err(e) if e.is_frame_failure() => {
                warn!(frame = idx, error = %e, "candidate frame failed");
            }
            Err(e) => return Err(e),
        }
    }

    if results.is_empty() {
        return Err(StitchError::AllCandidatesFailed);
    }
    results.sort_by_key(|c| std::cmp::Reverse(c.record.num_inliers.unwrap_or(0)));
    Ok(results)
}

fn calibrate_at(left: &Path, right: &Path, index: u64, config: &CalibrationConfig) -> Result<CandidateCalibration> {
    let left_frame = cv_videoio::extract_frame(left, index)?;
    let right_frame = cv_videoio::extract_frame(right, index)?;
    let mut record = calibrate_pair(&left_frame, &right_frame, config)?;

    let matches = record.num_matches.unwrap_or(0);
    let inliers = record.num_inliers.unwrap_or(0);
    let inlier_ratio = inliers as f64 / matches.max(1) as f64;
    record.frame_index = Some(index);
    record.inlier_ratio = Some(inlier_ratio);

    Ok(CandidateCalibration {
        frame_index: index,
        inlier_ratio,
        record,
    })
}

/// [`calibrate_candidates`], persisting the best record under `dir`.
pub fn calibrate_multi<P: AsRef<Path>, Q: AsRef<Path>, D: AsRef<Path>>(
    left: P,
    right: Q,
    dir: D,
    date: Option<NaiveDate>,
    config: &CalibrationConfig,
) -> Result<(Vec<CandidateCalibration>, PathBuf)> {
    let candidates = calibrate_candidates(left, right, config)?;
    let path = calibration_path(dir, date);
    let best = &candidates[0];
    best.record.save(&path)?;
    info!(
        frame = best.frame_index,
        inliers = best.record.num_inliers,
        path = %path.display(),
        "best candidate written"
    );
    Ok((candidates, path))
}
