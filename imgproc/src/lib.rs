//! Image processing primitives used by feature detection and stitching
//!
//! Float luma conversion, separable Gaussian blur, pyramid downsampling and
//! perspective warping of colour frames.

pub mod color;
pub mod convolve;
pub mod geometry;
pub mod resize;

pub use color::*;
pub use convolve::*;
pub use geometry::*;
pub use resize::*;

use image::{ImageBuffer, Luma};

/// Single-channel float image, intensities in `[0, 1]`.
pub type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

pub type Result<T> = std::result::Result<T, ImgprocError>;

#[derive(Debug, thiserror::Error)]
pub enum ImgprocError {
    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Algorithm error: {0}")]
    AlgorithmError(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Core error: {0}")]
    CoreError(#[from] cv_core::Error),
}

pub fn validate_image_size(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(ImgprocError::DimensionMismatch(
            "Image dimensions must be non-zero".into(),
        ));
    }
    Ok(())
}
