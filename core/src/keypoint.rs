#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub angle: f64,
    pub response: f64,
    pub octave: i32,
}

impl KeyPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            size: 1.0,
            angle: -1.0,
            response: 0.0,
            octave: 0,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_response(mut self, response: f64) -> Self {
        self.response = response;
        self
    }

    pub fn with_octave(mut self, octave: i32) -> Self {
        self.octave = octave;
        self
    }

    /// Same keypoint moved by `(dx, dy)`. Used to lift region-of-interest
    /// detections back into full-frame coordinates.
    pub fn translated(mut self, dx: f64, dy: f64) -> Self {
        self.x += dx;
        self.y += dy;
        self
    }
}

impl Default for KeyPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

impl FeatureMatch {
    pub fn new(query_idx: usize, train_idx: usize, distance: f32) -> Self {
        Self {
            query_idx,
            train_idx,
            distance,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Matches {
    pub matches: Vec<FeatureMatch>,
    /// Per-match inlier flag, filled in after geometric verification.
    pub mask: Option<Vec<bool>>,
}

impl Matches {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureMatch> {
        self.matches.iter()
    }

    /// Number of matches flagged by the mask; zero before verification.
    pub fn num_inliers(&self) -> usize {
        self.mask
            .as_ref()
            .map(|m| m.iter().filter(|&&v| v).count())
            .unwrap_or(0)
    }
}

impl FromIterator<FeatureMatch> for Matches {
    fn from_iter<I: IntoIterator<Item = FeatureMatch>>(iter: I) -> Self {
        Self {
            matches: iter.into_iter().collect(),
            mask: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeyPoints {
    pub keypoints: Vec<KeyPoint>,
}

impl KeyPoints {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyPoint> {
        self.keypoints.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translated_shifts_position_only() {
        let kp = KeyPoint::new(3.0, 4.0).with_size(2.5).with_angle(90.0);
        let moved = kp.translated(100.0, -1.0);
        assert_eq!(moved.x, 103.0);
        assert_eq!(moved.y, 3.0);
        assert_eq!(moved.size, 2.5);
        assert_eq!(moved.angle, 90.0);
    }

    #[test]
    fn inlier_count_follows_mask() {
        let mut matches: Matches = (0..4).map(|i| FeatureMatch::new(i, i, 0.1)).collect();
        assert_eq!(matches.num_inliers(), 0);
        matches.mask = Some(vec![true, false, true, true]);
        assert_eq!(matches.num_inliers(), 3);
    }
}
