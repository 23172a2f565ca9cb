use cv_features::*;
use cv_imgproc::{gaussian_blur_f32, GrayF32};
use image::Luma;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random dots and disks on a noisy background, lightly blurred.
fn textured_scene(w: u32, h: u32, seed: u64) -> GrayF32 {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = GrayF32::from_fn(w, h, |_, _| Luma([rng.gen_range(0.2..0.8)]));
    for _ in 0..60 {
        let cx = rng.gen_range(0..w) as i64;
        let cy = rng.gen_range(0..h) as i64;
        let r = rng.gen_range(3..12) as i64;
        let v: f32 = rng.gen_range(0.0..1.0);
        for y in (cy - r).max(0)..(cy + r).min(h as i64) {
            for x in (cx - r).max(0)..(cx + r).min(w as i64) {
                if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                    img.put_pixel(x as u32, y as u32, Luma([v]));
                }
            }
        }
    }
    gaussian_blur_f32(&img, 1.0)
}

fn crop(img: &GrayF32, x0: u32, w: u32) -> GrayF32 {
    GrayF32::from_fn(w, img.height(), |x, y| *img.get_pixel(x0 + x, y))
}

#[test]
fn test_shifted_crops_register_by_translation() {
    let scene = textured_scene(260, 160, 11);
    let a = crop(&scene, 0, 200);
    let b = crop(&scene, 60, 200);

    let sift = Sift::default();
    let da = sift.detect_and_compute(&a).unwrap();
    let db = sift.detect_and_compute(&b).unwrap();
    assert!(da.len() > 20 && db.len() > 20);

    let matches = Matcher::new().with_ratio_test(DEFAULT_RATIO).match_descriptors(&da, &db);
    assert!(matches.len() >= 10, "only {} matches", matches.len());

    // Map b coordinates into a coordinates.
    let pairs: Vec<MatchPair> = matches
        .iter()
        .map(|m| {
            let qa = da.descriptors[m.query_idx].keypoint;
            let tb = db.descriptors[m.train_idx].keypoint;
            MatchPair::new((tb.x, tb.y), (qa.x, qa.y))
        })
        .collect();
    let result = find_homography(&pairs, &RansacConfig::default().with_threshold(3.0)).unwrap();
    let h = result.homography;
    assert!((h[(0, 2)] - 60.0).abs() < 2.0, "tx = {}", h[(0, 2)]);
    assert!(h[(1, 2)].abs() < 2.0, "ty = {}", h[(1, 2)]);
    assert!((h[(0, 0)] - 1.0).abs() < 0.05);
    assert!((h[(1, 1)] - 1.0).abs() < 0.05);
}

#[test]
fn test_keypoints_follow_descriptors() {
    let scene = textured_scene(120, 120, 5);
    let desc = Sift::default().detect_and_compute(&scene).unwrap();
    let kps = desc.keypoints();
    assert_eq!(kps.len(), desc.len());
    for kp in kps.iter() {
        assert!(kp.x >= 0.0 && kp.x < 120.0 && kp.y >= 0.0 && kp.y < 120.0);
        assert!(kp.size > 0.0);
        assert!((0.0..360.0).contains(&kp.angle));
    }
}
