use crate::{FrameSource, Result};
use image::RgbImage;
use std::path::Path;

/// A single decoded image presented as a one-frame source.
#[derive(Debug)]
pub struct StillImageSource {
    frame: Option<RgbImage>,
    width: u32,
    height: u32,
}

impl StillImageSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let frame = image::open(path)?.into_rgb8();
        Ok(Self::from_image(frame))
    }

    pub fn from_image(frame: RgbImage) -> Self {
        let (width, height) = frame.dimensions();
        Self {
            frame: Some(frame),
            width,
            height,
        }
    }
}

impl FrameSource for StillImageSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frame.take())
    }

    fn frame_count(&self) -> Option<u64> {
        Some(1)
    }

    fn frame_rate(&self) -> Option<f64> {
        None
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
