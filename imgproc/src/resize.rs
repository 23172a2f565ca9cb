use crate::GrayF32;

/// Keep every second pixel in each direction. Used between pyramid octaves
/// where the input is already blurred to twice the base scale.
pub fn downsample_half(src: &GrayF32) -> GrayF32 {
    let w = (src.width() / 2).max(1);
    let h = (src.height() / 2).max(1);
    GrayF32::from_fn(w, h, |x, y| {
        let sx = (2 * x).min(src.width().saturating_sub(1));
        let sy = (2 * y).min(src.height().saturating_sub(1));
        *src.get_pixel(sx, sy)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn halves_dimensions() {
        let img = GrayF32::from_fn(11, 8, |x, y| Luma([(x + 10 * y) as f32]));
        let half = downsample_half(&img);
        assert_eq!(half.dimensions(), (5, 4));
        assert_eq!(half.get_pixel(2, 1)[0], 24.0);
    }
}
