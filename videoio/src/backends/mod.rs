//! Media backends

pub mod image_sequence;
pub mod still;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

pub use image_sequence::{ImageSequenceSource, ImageSequenceWriter};
pub use still::StillImageSource;
