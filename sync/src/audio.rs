//! Audio cross-correlation
//!
//! Both tracks are reduced to mono at a common rate, truncated to the
//! analysis window and normalized to zero mean and unit variance. The lag of
//! the correlation peak within `±max_offset_s` is the offset.

use crate::{Result, SyncConfig, SyncError};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const NORMALIZE_EPS: f64 = 1e-10;

/// Mono audio at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioTrack {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self { sample_rate, samples }
    }

    pub fn duration_s(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Read a WAV file at its native rate. Integer samples are scaled to
/// `[-1, 1)` by their bit depth and channels are averaged.
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<AudioTrack> {
    read_wav(path.as_ref(), None)
}

/// Number of samples covering `seconds` at `sample_rate`.
fn window_samples(seconds: Option<f64>, sample_rate: u32) -> Option<usize> {
    seconds.map(|s| (s.max(0.0) * sample_rate as f64).ceil() as usize)
}

fn read_wav(path: &Path, max_duration_s: Option<f64>) -> Result<AudioTrack> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let limit = window_samples(max_duration_s, spec.sample_rate).map_or(usize::MAX, |n| n.saturating_mul(channels));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .take(limit)
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f64;
            reader
                .samples::<i32>()
                .take(limit)
                .map(|s| s.map(|v| (v as f64 * scale) as f32))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    debug!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels,
        samples = samples.len(),
        "loaded wav"
    );
    Ok(AudioTrack::new(spec.sample_rate, samples))
}

/// Mono audio of `path`. WAV files are read directly at their own rate;
/// containers are decoded and resampled to `sample_rate`. With
/// `max_duration_s` reading stops once that much audio has been collected.
pub fn extract_audio<P: AsRef<Path>>(path: P, sample_rate: u32, max_duration_s: Option<f64>) -> Result<AudioTrack> {
    let path = path.as_ref();
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

    let track = if is_wav {
        read_wav(path, max_duration_s).map_err(|e| extraction_error(path, e))?
    } else {
        decode_container_audio(path, sample_rate, window_samples(max_duration_s, sample_rate))?
    };

    if track.is_empty() {
        return Err(extraction_error(path, "no audio samples"));
    }
    Ok(track)
}

#[cfg(feature = "ffmpeg")]
fn decode_container_audio(path: &Path, sample_rate: u32, max_samples: Option<usize>) -> Result<AudioTrack> {
    let samples = cv_videoio::extract_audio_mono(path, sample_rate, max_samples).map_err(|e| extraction_error(path, e))?;
    Ok(AudioTrack::new(sample_rate, samples))
}

#[cfg(not(feature = "ffmpeg"))]
fn decode_container_audio(path: &Path, _sample_rate: u32, _max_samples: Option<usize>) -> Result<AudioTrack> {
    if !path.exists() {
        return Err(extraction_error(path, "file not found"));
    }
    Err(extraction_error(path, "decoding container audio needs the `ffmpeg` feature"))
}

fn extraction_error(path: &Path, reason: impl std::fmt::Display) -> SyncError {
    SyncError::AudioExtraction {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}

/// `(x - mean) / (std + eps)` with the population standard deviation.
pub fn normalize(samples: &[f32]) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    let var = samples.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / n;
    let denom = var.sqrt() + NORMALIZE_EPS;
    samples.iter().map(|&s| (s as f64 - mean) / denom).collect()
}

/// Offset in seconds such that `right[t + offset] ≈ left[t]`, i.e. positive
/// when the right recording started earlier.
///
/// Both inputs must share `sample_rate`. Only the first
/// `config.analysis_window_s` seconds (and no more than the shorter track)
/// are used.
pub fn cross_correlate_offset(left: &[f32], right: &[f32], sample_rate: u32, config: &SyncConfig) -> Result<f64> {
    if sample_rate == 0 {
        return Err(SyncError::InvalidParameters("sample rate must be positive".into()));
    }
    if config.max_offset_s.is_nan() || config.max_offset_s < 0.0 || config.analysis_window_s.is_nan() || config.analysis_window_s <= 0.0 {
        return Err(SyncError::InvalidParameters(format!(
            "window {}s and max offset {}s must be positive",
            config.analysis_window_s, config.max_offset_s
        )));
    }

    let window = (config.analysis_window_s * sample_rate as f64) as usize;
    let n = window.min(left.len()).min(right.len());
    if n == 0 {
        return Err(SyncError::EmptyAudio);
    }

    let a = normalize(&left[..n]);
    let b = normalize(&right[..n]);
    let corr = circular_cross_correlation(&a, &b);
    let size = corr.len();

    let max_lag = ((config.max_offset_s * sample_rate as f64) as usize).min(n - 1) as isize;
    let mut best_lag = -max_lag;
    let mut best_value = f64::NEG_INFINITY;
    for lag in -max_lag..=max_lag {
        let idx = lag.rem_euclid(size as isize) as usize;
        let value = corr[idx];
        if value > best_value {
            best_value = value;
            best_lag = lag;
        }
    }

    let offset = best_lag as f64 / sample_rate as f64;
    debug!(samples = n, max_lag, best_lag, peak = best_value / n as f64, "correlation peak");
    Ok(offset)
}

/// `c[k] = Σ a[m] · b[m + k]`, zero padded so that negative lags land at
/// `c[len - k]` without wrapping into positive ones.
fn circular_cross_correlation(a: &[f64], b: &[f64]) -> Vec<f64> {
    let size = (a.len() + b.len()).next_power_of_two();
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);

    let mut fa: Vec<Complex<f64>> = a.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fa.resize(size, Complex::new(0.0, 0.0));
    let mut fb: Vec<Complex<f64>> = b.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fb.resize(size, Complex::new(0.0, 0.0));

    forward.process(&mut fa);
    forward.process(&mut fb);

    let mut spectrum: Vec<Complex<f64>> = fa.iter().zip(&fb).map(|(x, y)| x.conj() * y).collect();
    inverse.process(&mut spectrum);

    let scale = 1.0 / size as f64;
    spectrum.iter().map(|c| c.re * scale).collect()
}

/// Audio offset between two media files, see [`cross_correlate_offset`].
pub fn sync_audio<P: AsRef<Path>, Q: AsRef<Path>>(left: P, right: Q, config: &SyncConfig) -> Result<f64> {
    let window = Some(config.analysis_window_s);
    let left = extract_audio(left, config.sample_rate, window)?;
    let right = extract_audio(right, config.sample_rate, window)?;

    if left.sample_rate != right.sample_rate {
        return Err(SyncError::SampleRateMismatch {
            left: left.sample_rate,
            right: right.sample_rate,
        });
    }

    info!(
        left_s = left.duration_s(),
        right_s = right.duration_s(),
        sample_rate = left.sample_rate,
        "correlating audio"
    );
    cross_correlate_offset(&left.samples, &right.samples, left.sample_rate, config)
}
