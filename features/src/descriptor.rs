use cv_core::{KeyPoint, KeyPoints};

/// Float feature vector tied to the keypoint it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub data: Vec<f32>,
    pub keypoint: KeyPoint,
}

impl Descriptor {
    pub fn new(data: Vec<f32>, keypoint: KeyPoint) -> Self {
        Self { data, keypoint }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn l2_distance_squared(&self, other: &Descriptor) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    pub fn l2_distance(&self, other: &Descriptor) -> f32 {
        self.l2_distance_squared(other).sqrt()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Descriptors {
    pub descriptors: Vec<Descriptor>,
}

impl Descriptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            descriptors: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, desc: Descriptor) {
        self.descriptors.push(desc);
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter()
    }

    pub fn keypoints(&self) -> KeyPoints {
        KeyPoints {
            keypoints: self.descriptors.iter().map(|d| d.keypoint).collect(),
        }
    }

    /// Shift every keypoint, e.g. from a cropped region back to the frame.
    pub fn translate(&mut self, dx: f64, dy: f64) {
        for d in &mut self.descriptors {
            d.keypoint = d.keypoint.translated(dx, dy);
        }
    }
}

impl FromIterator<Descriptor> for Descriptors {
    fn from_iter<I: IntoIterator<Item = Descriptor>>(iter: I) -> Self {
        Self {
            descriptors: iter.into_iter().collect(),
        }
    }
}
