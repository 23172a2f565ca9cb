//! Frame sources and sinks
//!
//! A [`FrameSource`] yields decoded RGB frames in order from a still image,
//! a directory of images or (with the `ffmpeg` feature) a video container.
//! A [`FrameSink`] consumes stitched frames and writes them out as an image
//! sequence or an encoded video.

use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::debug;

pub mod backends;

pub use backends::{ImageSequenceSource, ImageSequenceWriter, StillImageSource};

#[cfg(feature = "ffmpeg")]
pub use backends::ffmpeg::{extract_audio_mono, read_timecode_tag, FfmpegSource, FfmpegWriter};

pub type Result<T> = std::result::Result<T, VideoError>;

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Source not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Unsupported media: {0}")]
    Unsupported(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Frame {index} unavailable ({available} frames in source)")]
    FrameUnavailable { index: u64, available: u64 },
}

/// Extensions decoded as a single still frame.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Pull-based stream of decoded frames.
pub trait FrameSource: Send {
    /// Next frame, `Ok(None)` once the source is exhausted.
    fn read(&mut self) -> Result<Option<RgbImage>>;

    /// Total number of frames, when the container reports it.
    fn frame_count(&self) -> Option<u64>;

    fn frame_rate(&self) -> Option<f64>;

    fn dimensions(&self) -> (u32, u32);

    /// Discard the next `n` frames. Returns how many were actually skipped.
    fn skip(&mut self, n: u64) -> Result<u64> {
        for skipped in 0..n {
            if self.read()?.is_none() {
                return Ok(skipped);
            }
        }
        Ok(n)
    }
}

/// Ordered consumer of output frames.
pub trait FrameSink: Send {
    fn write(&mut self, frame: &RgbImage) -> Result<()>;

    fn frames_written(&self) -> u64;

    /// Flush and close the output. Further writes are invalid.
    fn finish(&mut self) -> Result<()>;

    /// Drop everything written so far.
    fn abort(&mut self);
}

/// Container-level facts about a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: Option<u64>,
    pub fps: Option<f64>,
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_image_path(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Open a source, choosing the backend from the path.
///
/// Directories are read as image sequences, image extensions as stills and
/// anything else as a video container.
pub fn open_source<P: AsRef<Path>>(path: P) -> Result<Box<dyn FrameSource>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(VideoError::NotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        debug!(path = %path.display(), "opening image sequence");
        return Ok(Box::new(ImageSequenceSource::new(path)?));
    }
    if is_image_path(path) {
        debug!(path = %path.display(), "opening still image");
        return Ok(Box::new(StillImageSource::new(path)?));
    }
    open_video(path)
}

#[cfg(feature = "ffmpeg")]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    debug!(path = %path.display(), "opening video container");
    Ok(Box::new(FfmpegSource::new(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    Err(VideoError::Unsupported(format!(
        "{}: video containers need the `ffmpeg` feature",
        path.display()
    )))
}

/// Open an output. A path without extension is an image-sequence directory.
pub fn open_sink<P: AsRef<Path>>(path: P, width: u32, height: u32, fps: f64) -> Result<Box<dyn FrameSink>> {
    let path = path.as_ref();
    if width == 0 || height == 0 {
        return Err(VideoError::InvalidParameters(format!(
            "output size {width}x{height} must be positive"
        )));
    }
    match extension_of(path) {
        None => Ok(Box::new(ImageSequenceWriter::new(path, "frame")?)),
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => Err(VideoError::Unsupported(format!(
            "{}: a single image cannot hold a video",
            path.display()
        ))),
        Some(_) => open_video_sink(path, width, height, fps),
    }
}

#[cfg(feature = "ffmpeg")]
fn open_video_sink(path: &Path, width: u32, height: u32, fps: f64) -> Result<Box<dyn FrameSink>> {
    Ok(Box::new(FfmpegWriter::new(path, width, height, fps)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video_sink(path: &Path, _width: u32, _height: u32, _fps: f64) -> Result<Box<dyn FrameSink>> {
    Err(VideoError::Unsupported(format!(
        "{}: video output needs the `ffmpeg` feature",
        path.display()
    )))
}

/// Decode the frame at `index`. Still images ignore the index.
pub fn extract_frame<P: AsRef<Path>>(path: P, index: u64) -> Result<RgbImage> {
    let path = path.as_ref();
    let mut source = open_source(path)?;
    if is_image_path(path) {
        return source.read()?.ok_or(VideoError::FrameUnavailable { index: 0, available: 0 });
    }
    let skipped = source.skip(index)?;
    if skipped < index {
        return Err(VideoError::FrameUnavailable {
            index,
            available: skipped,
        });
    }
    source.read()?.ok_or(VideoError::FrameUnavailable {
        index,
        available: index,
    })
}

pub fn probe<P: AsRef<Path>>(path: P) -> Result<MediaInfo> {
    let source = open_source(path)?;
    let (width, height) = source.dimensions();
    Ok(MediaInfo {
        width,
        height,
        frame_count: source.frame_count(),
        fps: source.frame_rate(),
    })
}
