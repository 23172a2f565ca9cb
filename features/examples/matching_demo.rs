//! Register two overlapping photos
//!
//! ```text
//! cargo run -p cv-features --example matching_demo -- left.jpg right.jpg
//! ```
//!
//! Detects SIFT features in both images, keeps ratio-test matches and fits
//! a homography mapping the second image onto the first.

use cv_features::{find_homography, MatchPair, Matcher, RansacConfig, Sift, DEFAULT_RATIO};
use cv_imgproc::rgb_to_luma_f32;
use std::error::Error;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(first), Some(second)) = (args.next(), args.next()) else {
        return Err("usage: matching_demo <first image> <second image>".into());
    };

    let a = image::open(&first)?.to_rgb8();
    let b = image::open(&second)?.to_rgb8();

    let sift = Sift::default();
    let da = sift.detect_and_compute(&rgb_to_luma_f32(&a))?;
    let db = sift.detect_and_compute(&rgb_to_luma_f32(&b))?;
    println!("{first}: {} features", da.len());
    println!("{second}: {} features", db.len());

    let matches = Matcher::new().with_ratio_test(DEFAULT_RATIO).match_descriptors(&da, &db);
    println!("{} ratio-test matches", matches.len());

    let pairs: Vec<MatchPair> = matches
        .iter()
        .map(|m| {
            let p = da.descriptors[m.query_idx].keypoint;
            let q = db.descriptors[m.train_idx].keypoint;
            MatchPair::new((q.x, q.y), (p.x, p.y))
        })
        .collect();
    let fit = find_homography(&pairs, &RansacConfig::default().with_threshold(5.0))?;
    println!(
        "{} inliers, mean error {:.3} px",
        fit.num_inliers, fit.residual
    );
    println!("H = {}", fit.homography);
    Ok(())
}
