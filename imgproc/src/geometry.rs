use crate::convolve::map_coord;
use crate::{validate_image_size, BorderMode, ImgprocError, Result};
use image::RgbImage;
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Linear,
}

fn sample_rgb(img: &RgbImage, x: isize, y: isize, border: BorderMode) -> [f32; 3] {
    let width = img.width() as usize;
    let height = img.height() as usize;
    let raw = img.as_raw();

    match (map_coord(x, width, border), map_coord(y, height, border)) {
        (Some(ix), Some(iy)) => {
            let i = (iy * width + ix) * 3;
            [raw[i] as f32, raw[i + 1] as f32, raw[i + 2] as f32]
        }
        _ => match border {
            BorderMode::Constant(v) => [v as f32; 3],
            _ => [0.0; 3],
        },
    }
}

fn get_pixel_bilinear_with_border(img: &RgbImage, x: f64, y: f64, border: BorderMode) -> [f32; 3] {
    let x0 = x.floor() as isize;
    let y0 = y.floor() as isize;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let v00 = sample_rgb(img, x0, y0, border);
    let v10 = sample_rgb(img, x1, y0, border);
    let v01 = sample_rgb(img, x0, y1, border);
    let v11 = sample_rgb(img, x1, y1, border);

    let mut out = [0.0f32; 3];
    for c in 0..3 {
        let v0 = v00[c] * (1.0 - fx) + v10[c] * fx;
        let v1 = v01[c] * (1.0 - fx) + v11[c] * fx;
        out[c] = v0 * (1.0 - fy) + v1 * fy;
    }
    out
}

fn interpolate_sample(
    src: &RgbImage,
    x: f64,
    y: f64,
    interpolation: Interpolation,
    border: BorderMode,
) -> [f32; 3] {
    match interpolation {
        Interpolation::Nearest => sample_rgb(src, x.round() as isize, y.round() as isize, border),
        Interpolation::Linear => get_pixel_bilinear_with_border(src, x, y, border),
    }
}

/// Warp `src` into a `width x height` raster. `forward` maps source pixels to
/// destination pixels; it is inverted once and every destination pixel is
/// pulled from the source. Destination pixels whose preimage falls outside
/// the source take the border value.
pub fn warp_perspective_rgb(
    src: &RgbImage,
    forward: &Matrix3<f64>,
    width: u32,
    height: u32,
    interpolation: Interpolation,
    border: BorderMode,
) -> Result<RgbImage> {
    validate_image_size(width, height)?;
    let inverse = forward.try_inverse().ok_or_else(|| {
        ImgprocError::AlgorithmError("perspective matrix is singular".to_string())
    })?;
    if !inverse.iter().all(|v| v.is_finite()) {
        return Err(ImgprocError::AlgorithmError(
            "perspective matrix has non-finite inverse".to_string(),
        ));
    }

    let fill = match border {
        BorderMode::Constant(v) => v,
        _ => 0,
    };
    let mut dst = RgbImage::new(width, height);

    dst.as_mut()
        .par_chunks_mut(width as usize * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width as usize {
                let p = inverse * Vector3::new(x as f64, y as f64, 1.0);
                let out = &mut row[x * 3..x * 3 + 3];
                if p[2].abs() < 1e-12 {
                    out.fill(fill);
                    continue;
                }
                let val = interpolate_sample(src, p[0] / p[2], p[1] / p[2], interpolation, border);
                for (o, v) in out.iter_mut().zip(val) {
                    *o = v.round().clamp(0.0, 255.0) as u8;
                }
            }
        });

    Ok(dst)
}

pub fn warp_perspective(src: &RgbImage, forward: &Matrix3<f64>, width: u32, height: u32) -> Result<RgbImage> {
    warp_perspective_rgb(
        src,
        forward,
        width,
        height,
        Interpolation::Linear,
        BorderMode::Constant(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::translation_matrix;
    use image::Rgb;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 200]))
    }

    #[test]
    fn warp_perspective_identity_preserves_image() {
        let src = gradient(12, 8);
        let out = warp_perspective(&src, &Matrix3::identity(), 12, 8).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn translation_moves_content_and_fills_black() {
        let src = gradient(12, 8);
        let out = warp_perspective(&src, &translation_matrix(3.0, 2.0), 20, 12).unwrap();
        assert_eq!(out.get_pixel(3, 2), src.get_pixel(0, 0));
        assert_eq!(out.get_pixel(10, 7), src.get_pixel(7, 5));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(19, 11), &Rgb([0, 0, 0]));
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let src = gradient(4, 4);
        assert!(warp_perspective(&src, &Matrix3::zeros(), 4, 4).is_err());
        assert!(warp_perspective(&src, &Matrix3::identity(), 0, 4).is_err());
    }
}
