use crate::GrayF32;
use image::RgbImage;
use rayon::prelude::*;

const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// BT.601 luma of an RGB frame, scaled to `[0, 1]`.
pub fn rgb_to_luma_f32(rgb: &RgbImage) -> GrayF32 {
    let (w, h) = rgb.dimensions();
    let mut out = GrayF32::new(w, h);
    if w == 0 || h == 0 {
        return out;
    }

    let src = rgb.as_raw();
    out.as_mut()
        .par_chunks_mut(w as usize)
        .zip(src.par_chunks(w as usize * 3))
        .for_each(|(dst_row, src_row)| {
            for (d, px) in dst_row.iter_mut().zip(src_row.chunks_exact(3)) {
                let l = LUMA_R * px[0] as f32 + LUMA_G * px[1] as f32 + LUMA_B * px[2] as f32;
                *d = l / 255.0;
            }
        });
    out
}

/// Crop a vertical band `[x0, x0 + width)` out of a frame.
pub fn crop_columns(rgb: &RgbImage, x0: u32, width: u32) -> RgbImage {
    let x0 = x0.min(rgb.width());
    let width = width.min(rgb.width() - x0);
    image::imageops::crop_imm(rgb, x0, 0, width, rgb.height()).to_image()
}
