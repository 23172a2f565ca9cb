use std::error::Error;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use pano_stitch::photo::{calibrate_and_save, calibrate_multi, CalibrationRecord};
use pano_stitch::sync::{detect_offset, seconds_to_frames};
use pano_stitch::{init_thread_pool, stitch_synchronized, PipelineConfig, StitchRequest};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sync, calibrate and stitch two side-by-side camera recordings.
#[derive(Debug, Parser)]
#[command(author, version, about = "Two-camera panorama stitching")]
struct Args {
    /// TOML file with pipeline settings. Defaults are used if omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads for image kernels (overrides the config file).
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Detect the time offset between two recordings.
    Sync {
        #[arg(long)]
        left: PathBuf,
        #[arg(long)]
        right: PathBuf,
        /// Skip embedded timecode and correlate audio directly.
        #[arg(long)]
        audio_only: bool,
        #[arg(long)]
        sample_rate: Option<u32>,
        /// Largest offset searched, in seconds.
        #[arg(long)]
        max_offset: Option<f64>,
    },
    /// Estimate the homography and canvas and write the calibration file.
    Calibrate {
        #[arg(long)]
        left: PathBuf,
        #[arg(long)]
        right: PathBuf,
        /// Calibration date, YYYY-MM-DD. Defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Directory for `{date}_cal.json`.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Frame used for calibration.
        #[arg(long, default_value_t = 0, conflicts_with = "multi")]
        frame: u64,
        /// Try several frames across the recording and keep the best.
        #[arg(long)]
        multi: bool,
        /// Fraction of each frame searched for overlap features.
        #[arg(long)]
        overlap: Option<f64>,
    },
    /// Stitch two recordings into one panorama video.
    Stitch {
        #[arg(long)]
        left: PathBuf,
        #[arg(long)]
        right: PathBuf,
        /// Output video, or a directory of PNG frames when it has no extension.
        #[arg(long)]
        output: PathBuf,
        /// Calibration file. Defaults to the dated file in the calibration directory.
        #[arg(long)]
        cal: Option<PathBuf>,
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Leading frames dropped from the right source (negative: from the
        /// left). Skips sync detection.
        #[arg(long, allow_negative_numbers = true)]
        frame_offset: Option<i64>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    init_thread_pool(config.threads)?;
    info!(threads = pano_stitch::core::current_cpu_threads(), "thread pool ready");

    match args.command {
        Command::Sync {
            left,
            right,
            audio_only,
            sample_rate,
            max_offset,
        } => {
            if audio_only {
                config.sync.use_timecode = false;
            }
            if let Some(rate) = sample_rate {
                config.sync.sample_rate = rate;
            }
            if let Some(seconds) = max_offset {
                config.sync.max_offset_s = seconds;
            }
            let outcome = detect_offset(&left, &right, &config.sync)?;
            let fps = pano_stitch::videoio::probe(&left)
                .ok()
                .and_then(|info| info.fps)
                .unwrap_or(config.output.default_fps);
            println!(
                "method: {}\noffset: {:+.3} s ({:+} frames at {fps:.2} fps)",
                outcome.method,
                outcome.seconds,
                seconds_to_frames(outcome.seconds, fps)
            );
        }
        Command::Calibrate {
            left,
            right,
            date,
            output_dir,
            frame,
            multi,
            overlap,
        } => {
            if let Some(fraction) = overlap {
                config.calibration.overlap_fraction = fraction;
            }
            let dir = output_dir.unwrap_or_else(|| config.output.calibration_dir.clone());
            if multi {
                let (candidates, path) = calibrate_multi(&left, &right, &dir, date, &config.calibration)?;
                for (rank, c) in candidates.iter().enumerate() {
                    println!(
                        "#{} frame {:>6}  inliers {:>5}  ratio {:.3}",
                        rank + 1,
                        c.frame_index,
                        c.record.num_inliers.unwrap_or(0),
                        c.inlier_ratio
                    );
                }
                println!("wrote {}", path.display());
            } else {
                let (record, path) = calibrate_and_save(&left, &right, frame, &dir, date, &config.calibration)?;
                print_summary(&record);
                println!("wrote {}", path.display());
            }
        }
        Command::Stitch {
            left,
            right,
            output,
            cal,
            date,
            frame_offset,
        } => {
            let request = StitchRequest {
                left,
                right,
                output,
                calibration: cal,
                date,
                frame_offset,
            };
            let report = stitch_synchronized(&request, &config, None)?;
            info!(
                frames = report.stitch.frames_written,
                frame_offset = report.frame_offset,
                "done"
            );
            println!(
                "wrote {} frames to {} (offset {:+} frames)",
                report.stitch.frames_written,
                request.output.display(),
                report.frame_offset
            );
        }
    }
    Ok(())
}

fn print_summary(record: &CalibrationRecord) {
    println!(
        "matches {}  inliers {}",
        record.num_matches.unwrap_or(0),
        record.num_inliers.unwrap_or(0)
    );
    println!("canvas {}x{}", record.canvas_width, record.canvas_height);
    println!("offset ({}, {})", record.offset_x, record.offset_y);
    println!("blend columns {}..{}", record.blend_x_start, record.blend_x_end);
    for row in &record.homography {
        println!("  [{:>12.6} {:>12.6} {:>12.6}]", row[0], row[1], row[2]);
    }
}
