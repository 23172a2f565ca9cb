use std::path::Path;
use tracing::debug;

pub const DEFAULT_TIMECODE_FPS: f64 = 30.0;

/// Absolute seconds of an `HH:MM:SS:FF` (or drop-frame `HH:MM:SS;FF`) or
/// `HH:MM:SS.mmm` timecode. Anything else yields `None`.
pub fn parse_timecode(tag: &str, nominal_fps: f64) -> Option<f64> {
    let normalized = tag.trim().replace(';', ":");
    let parts: Vec<&str> = normalized.split(':').collect();

    let seconds = match parts.as_slice() {
        [h, m, s, f] => {
            let h: u32 = h.parse().ok()?;
            let m: u32 = m.parse().ok()?;
            let s: u32 = s.parse().ok()?;
            let f: u32 = f.parse().ok()?;
            if nominal_fps <= 0.0 {
                return None;
            }
            h as f64 * 3600.0 + m as f64 * 60.0 + s as f64 + f as f64 / nominal_fps
        }
        [h, m, s] => {
            let h: u32 = h.parse().ok()?;
            let m: u32 = m.parse().ok()?;
            let s: f64 = s.parse().ok()?;
            if !s.is_finite() || s < 0.0 {
                return None;
            }
            h as f64 * 3600.0 + m as f64 * 60.0 + s
        }
        _ => return None,
    };
    Some(seconds)
}

/// `right - left` in seconds when both sources carry a parseable timecode.
/// Missing tags and probe failures are "no result", not errors.
pub fn detect_timecode_offset(left: &Path, right: &Path, nominal_fps: f64) -> Option<f64> {
    let left_tc = source_timecode(left, nominal_fps)?;
    let right_tc = source_timecode(right, nominal_fps)?;
    debug!(left_tc, right_tc, "timecodes found on both sources");
    Some(right_tc - left_tc)
}

#[cfg(feature = "ffmpeg")]
fn source_timecode(path: &Path, nominal_fps: f64) -> Option<f64> {
    match cv_videoio::read_timecode_tag(path) {
        Ok(Some(tag)) => {
            let parsed = parse_timecode(&tag, nominal_fps);
            if parsed.is_none() {
                debug!(path = %path.display(), tag, "unparseable timecode tag");
            }
            parsed
        }
        Ok(None) => {
            debug!(path = %path.display(), "no timecode tag");
            None
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "timecode probe failed");
            None
        }
    }
}

#[cfg(not(feature = "ffmpeg"))]
fn source_timecode(path: &Path, _nominal_fps: f64) -> Option<f64> {
    debug!(path = %path.display(), "timecode probing needs the ffmpeg feature");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn frame_timecode() {
        assert_relative_eq!(parse_timecode("01:02:03:15", 30.0).unwrap(), 3723.5);
        assert_relative_eq!(parse_timecode("00:00:10;06", 30.0).unwrap(), 10.2);
        assert_relative_eq!(parse_timecode("00:00:01:12", 24.0).unwrap(), 1.5);
    }

    #[test]
    fn millisecond_timecode() {
        assert_relative_eq!(parse_timecode("00:01:02.250", 30.0).unwrap(), 62.25);
    }

    #[test]
    fn malformed_timecodes_are_rejected() {
        assert!(parse_timecode("", 30.0).is_none());
        assert!(parse_timecode("12:34", 30.0).is_none());
        assert!(parse_timecode("aa:bb:cc:dd", 30.0).is_none());
        assert!(parse_timecode("00:00:00:00:00", 30.0).is_none());
        assert!(parse_timecode("00:00:nan", 30.0).is_none());
    }

    #[test]
    fn missing_files_give_no_result() {
        let missing = Path::new("/definitely/not/here.mp4");
        assert!(detect_timecode_offset(missing, missing, 30.0).is_none());
    }
}
