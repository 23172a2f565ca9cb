use crate::calibration::StitchGeometry;
use crate::Result;
use cv_imgproc::warp_perspective;
use image::RgbImage;
use rayon::prelude::*;
use std::ops::Range;

/// Compose one panorama frame.
///
/// The right frame is warped onto the canvas, the left frame is pasted at its
/// origin, and inside the blend band the two are cross-faded left to right.
/// Black pixels count as "no content": wherever only one view has content
/// that view is used as is.
pub fn stitch_frame(left: &RgbImage, right: &RgbImage, geometry: &StitchGeometry) -> Result<RgbImage> {
    let (width, height) = geometry.canvas_size();
    let warped = warp_perspective(right, &geometry.canvas_transform(), width, height)?;

    let mut canvas = RgbImage::new(width, height);
    let (lx, ly) = geometry.left_origin();
    image::imageops::replace(&mut canvas, left, lx, ly);

    let band = geometry.blend.clone().unwrap_or(0..0);
    let row_len = width as usize * 3;
    canvas
        .as_mut()
        .par_chunks_mut(row_len)
        .zip(warped.as_raw().par_chunks(row_len))
        .for_each(|(out_row, right_row)| composite_row(out_row, right_row, &band));

    Ok(canvas)
}

fn composite_row(out: &mut [u8], right: &[u8], band: &Range<u32>) {
    let band_width = band.end.saturating_sub(band.start) as usize;
    let denom = band_width.saturating_sub(1).max(1) as f32;

    for (x, (o, r)) in out.chunks_exact_mut(3).zip(right.chunks_exact(3)).enumerate() {
        if !has_content(r) {
            continue;
        }
        if !has_content(o) {
            o.copy_from_slice(r);
            continue;
        }
        if band.contains(&(x as u32)) {
            let alpha = (x - band.start as usize) as f32 / denom;
            for (l, &rv) in o.iter_mut().zip(r) {
                let mixed = (1.0 - alpha) * *l as f32 + alpha * rv as f32;
                *l = mixed.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[inline]
fn has_content(px: &[u8]) -> bool {
    px.iter().any(|&c| c > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationRecord;
    use image::Rgb;

    fn shifted_geometry(shift: i64, width: i64, blend: (i64, i64)) -> StitchGeometry {
        CalibrationRecord {
            homography: [[1.0, 0.0, shift as f64], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            canvas_width: width,
            canvas_height: 4,
            offset_x: 0,
            offset_y: 0,
            blend_x_start: blend.0,
            blend_x_end: blend.1,
            num_matches: None,
            num_inliers: None,
            left_resolution: None,
            right_resolution: None,
            timecode_offset: 0.0,
            frame_index: None,
            inlier_ratio: None,
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn band_fades_from_left_to_right() {
        let left = RgbImage::from_pixel(10, 4, Rgb([200, 0, 0]));
        let right = RgbImage::from_pixel(10, 4, Rgb([0, 0, 200]));
        let geometry = shifted_geometry(5, 15, (5, 10));
        let out = stitch_frame(&left, &right, &geometry).unwrap();

        assert_eq!(out.dimensions(), (15, 4));
        assert_eq!(out.get_pixel(2, 1), &Rgb([200, 0, 0]));
        // First band column is all left, last is all right.
        assert_eq!(out.get_pixel(5, 1), &Rgb([200, 0, 0]));
        assert_eq!(out.get_pixel(9, 1), &Rgb([0, 0, 200]));
        assert_eq!(out.get_pixel(7, 1), &Rgb([100, 0, 100]));
        assert_eq!(out.get_pixel(12, 1), &Rgb([0, 0, 200]));
    }

    #[test]
    fn left_wins_outside_band() {
        let left = RgbImage::from_pixel(10, 4, Rgb([10, 20, 30]));
        let right = RgbImage::from_pixel(10, 4, Rgb([90, 90, 90]));
        let geometry = shifted_geometry(5, 15, (0, 0));
        let out = stitch_frame(&left, &right, &geometry).unwrap();
        assert_eq!(out.get_pixel(7, 2), &Rgb([10, 20, 30]));
        assert_eq!(out.get_pixel(14, 2), &Rgb([90, 90, 90]));
    }

    #[test]
    fn black_left_pixels_take_right() {
        let mut left = RgbImage::from_pixel(10, 4, Rgb([50, 50, 50]));
        left.put_pixel(8, 0, Rgb([0, 0, 0]));
        let right = RgbImage::from_pixel(10, 4, Rgb([150, 150, 150]));
        let geometry = shifted_geometry(5, 15, (5, 10));
        let out = stitch_frame(&left, &right, &geometry).unwrap();
        assert_eq!(out.get_pixel(8, 0), &Rgb([150, 150, 150]));
    }

    #[test]
    fn uncovered_canvas_stays_black() {
        let left = RgbImage::from_pixel(4, 4, Rgb([80, 80, 80]));
        let right = RgbImage::from_pixel(4, 4, Rgb([80, 80, 80]));
        let geometry = shifted_geometry(8, 12, (0, 0));
        let out = stitch_frame(&left, &right, &geometry).unwrap();
        assert_eq!(out.get_pixel(5, 2), &Rgb([0, 0, 0]));
    }
}
