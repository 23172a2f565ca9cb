use cv_imgproc::*;
use image::{Luma, Rgb, RgbImage};
use nalgebra::Matrix3;

#[test]
fn test_luma_then_blur_keeps_flat_regions() {
    let img = RgbImage::from_pixel(40, 30, Rgb([120, 120, 120]));
    let luma = rgb_to_luma_f32(&img);
    let blurred = gaussian_blur_f32(&luma, 2.0);
    for p in blurred.pixels() {
        assert!((p[0] - 120.0 / 255.0).abs() < 1e-4);
    }
}

#[test]
fn test_pyramid_level_of_blurred_image() {
    let mut img = GrayF32::new(64, 64);
    for y in 28..36 {
        for x in 28..36 {
            img.put_pixel(x, y, Luma([1.0]));
        }
    }
    let level = downsample_half(&gaussian_blur_f32(&img, 1.6));
    assert_eq!(level.dimensions(), (32, 32));
    assert!(level.get_pixel(16, 16)[0] > 0.5);
    assert!(level.get_pixel(2, 2)[0] < 1e-3);
}

#[test]
fn test_warp_with_scale_homography() {
    let src = RgbImage::from_fn(20, 20, |x, _| Rgb([if x < 10 { 255 } else { 0 }, 0, 0]));
    let scale = Matrix3::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.0);
    let out = warp_perspective_rgb(&src, &scale, 40, 40, Interpolation::Nearest, BorderMode::Constant(0))
        .unwrap();
    assert_eq!(out.get_pixel(4, 4)[0], 255);
    assert_eq!(out.get_pixel(30, 4)[0], 0);
}
