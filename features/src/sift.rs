//! Scale-invariant feature transform
//!
//! Gaussian scale space, difference-of-Gaussian extrema with sub-pixel
//! refinement, dominant orientation assignment and the 4x4x8 gradient
//! histogram descriptor. Works on float luma in `[0, 1]`.

use crate::descriptor::{Descriptor, Descriptors};
use crate::{FeatureError, Result};
use cv_core::{KeyPoint, KeyPoints};
use cv_imgproc::{downsample_half, gaussian_blur_f32, GrayF32};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Blur assumed to be present in the input image.
const INPUT_SIGMA: f32 = 0.5;
/// Pixels skipped at each octave border during extremum search.
const IMG_BORDER: usize = 5;
const MAX_INTERP_STEPS: usize = 5;

const ORI_HIST_BINS: usize = 36;
const ORI_SIG_FCTR: f32 = 1.5;
const ORI_RADIUS: f32 = 3.0 * ORI_SIG_FCTR;
const ORI_PEAK_RATIO: f32 = 0.8;

const DESCR_WIDTH: usize = 4;
const DESCR_HIST_BINS: usize = 8;
const DESCR_SCL_FCTR: f32 = 3.0;
const DESCR_MAG_THR: f32 = 0.2;

/// Smallest octave side we still search for extrema.
const MIN_OCTAVE_SIDE: u32 = 2 * IMG_BORDER as u32 + 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sift {
    /// Upper bound on octaves; fewer are used when the image is small.
    pub n_octaves: usize,
    pub n_layers: usize,
    pub sigma: f32,
    pub contrast_threshold: f32,
    pub edge_threshold: f32,
    /// Keep at most this many strongest keypoints. Zero keeps all.
    pub max_features: usize,
}

impl Default for Sift {
    fn default() -> Self {
        Self {
            n_octaves: 6,
            n_layers: 3,
            sigma: 1.6,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
            max_features: 4000,
        }
    }
}

/// Gaussian and difference-of-Gaussian pyramids, indexed `[octave][layer]`.
pub struct ScaleSpace {
    pub gaussians: Vec<Vec<GrayF32>>,
    pub dogs: Vec<Vec<GrayF32>>,
}

/// Extremum located in scale space, before it is turned into a keypoint.
#[derive(Debug, Clone, Copy)]
struct Extremum {
    octave: usize,
    layer: usize,
    /// Integer position in the octave image.
    col: usize,
    row: usize,
    /// Refined position in the octave image.
    xf: f32,
    yf: f32,
    /// Blur of the keypoint relative to its octave.
    octave_scale: f32,
    response: f32,
}

impl Sift {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_layers(mut self, n_layers: usize) -> Self {
        self.n_layers = n_layers;
        self
    }

    pub fn with_contrast_threshold(mut self, threshold: f32) -> Self {
        self.contrast_threshold = threshold;
        self
    }

    pub fn with_edge_threshold(mut self, threshold: f32) -> Self {
        self.edge_threshold = threshold;
        self
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = max_features;
        self
    }

    fn octave_count(&self, width: u32, height: u32) -> usize {
        let mut count = 0;
        let mut side = width.min(height);
        while count < self.n_octaves.max(1) && side >= MIN_OCTAVE_SIDE {
            count += 1;
            side /= 2;
        }
        count
    }

    /// Build the Gaussian scale space, `n_layers + 3` images per octave.
    pub fn build_scale_space(&self, image: &GrayF32) -> ScaleSpace {
        let n_octaves = self.octave_count(image.width(), image.height());
        let n = self.n_layers.max(1);
        let k = 2.0f32.powf(1.0 / n as f32);

        // Incremental blur between consecutive layers.
        let mut sig = vec![self.sigma; n + 3];
        for (i, s) in sig.iter_mut().enumerate().skip(1) {
            let sig_prev = self.sigma * k.powi(i as i32 - 1);
            let sig_total = sig_prev * k;
            *s = (sig_total * sig_total - sig_prev * sig_prev).sqrt();
        }

        let base_sigma = (self.sigma * self.sigma - INPUT_SIGMA * INPUT_SIGMA).max(0.01).sqrt();
        let mut current_base = gaussian_blur_f32(image, base_sigma);
        let mut gaussians = Vec::with_capacity(n_octaves);

        for octave in 0..n_octaves {
            let mut layers = Vec::with_capacity(n + 3);
            layers.push(current_base.clone());
            for s in sig.iter().skip(1) {
                let blurred = gaussian_blur_f32(&layers[layers.len() - 1], *s);
                layers.push(blurred);
            }
            if octave + 1 < n_octaves {
                current_base = downsample_half(&layers[n]);
            }
            gaussians.push(layers);
        }

        let dogs = gaussians
            .iter()
            .map(|layers| {
                layers
                    .windows(2)
                    .map(|pair| {
                        let mut diff = pair[1].clone();
                        for (d, s) in diff.iter_mut().zip(pair[0].iter()) {
                            *d -= *s;
                        }
                        diff
                    })
                    .collect()
            })
            .collect();

        ScaleSpace { gaussians, dogs }
    }

    pub fn detect(&self, image: &GrayF32) -> Result<KeyPoints> {
        Ok(self.detect_and_compute(image)?.keypoints())
    }

    /// Detect keypoints and compute one 128-d descriptor per keypoint.
    pub fn detect_and_compute(&self, image: &GrayF32) -> Result<Descriptors> {
        if image.width() == 0 || image.height() == 0 {
            return Err(FeatureError::DetectionError("empty image".to_string()));
        }
        if self.n_layers == 0 || self.sigma <= INPUT_SIGMA {
            return Err(FeatureError::DetectionError(format!(
                "invalid scale space: n_layers={}, sigma={}",
                self.n_layers, self.sigma
            )));
        }

        let space = self.build_scale_space(image);
        let mut extrema = self.find_extrema(&space);

        extrema.sort_by(|a, b| {
            b.response
                .total_cmp(&a.response)
                .then(a.octave.cmp(&b.octave))
                .then(a.yf.total_cmp(&b.yf))
                .then(a.xf.total_cmp(&b.xf))
        });
        if self.max_features > 0 {
            extrema.truncate(self.max_features);
        }

        let descriptors: Vec<Descriptor> = extrema
            .par_iter()
            .flat_map_iter(|e| {
                let gauss = &space.gaussians[e.octave][e.layer];
                let scale = (1u32 << e.octave) as f32;
                let size = e.octave_scale * 2.0 * scale;
                let base = KeyPoint::new((e.xf * scale) as f64, (e.yf * scale) as f64)
                    .with_size(size as f64)
                    .with_response(e.response as f64)
                    .with_octave(e.octave as i32);

                orientation_peaks(gauss, e)
                    .into_iter()
                    .map(|angle| {
                        let data = compute_descriptor(gauss, e.xf, e.yf, 360.0 - angle, e.octave_scale);
                        Descriptor::new(data, base.with_angle(angle as f64))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        debug!(
            extrema = extrema.len(),
            keypoints = descriptors.len(),
            octaves = space.gaussians.len(),
            "sift detection finished"
        );

        Ok(Descriptors { descriptors })
    }

    fn find_extrema(&self, space: &ScaleSpace) -> Vec<Extremum> {
        let n = self.n_layers;
        let threshold = 0.5 * self.contrast_threshold / n as f32;

        space
            .dogs
            .par_iter()
            .enumerate()
            .flat_map_iter(|(octave, dogs)| {
                let mut found = Vec::new();
                let (w, h) = dogs[0].dimensions();
                let (w, h) = (w as usize, h as usize);
                if w <= 2 * IMG_BORDER || h <= 2 * IMG_BORDER {
                    return found.into_iter();
                }
                for layer in 1..=n {
                    let (prev, cur, next) = (&dogs[layer - 1], &dogs[layer], &dogs[layer + 1]);
                    for row in IMG_BORDER..h - IMG_BORDER {
                        for col in IMG_BORDER..w - IMG_BORDER {
                            let val = at(cur, col, row);
                            if val.abs() <= threshold {
                                continue;
                            }
                            if !is_local_extremum(val, prev, cur, next, col, row) {
                                continue;
                            }
                            if let Some(e) = self.refine(dogs, octave, layer, col, row) {
                                found.push(e);
                            }
                        }
                    }
                }
                found.into_iter()
            })
            .collect()
    }

    /// Quadratic sub-pixel/sub-scale refinement followed by contrast and
    /// edge-response rejection.
    fn refine(
        &self,
        dogs: &[GrayF32],
        octave: usize,
        mut layer: usize,
        mut col: usize,
        mut row: usize,
    ) -> Option<Extremum> {
        let n = self.n_layers;
        let (w, h) = dogs[0].dimensions();
        let (w, h) = (w as usize, h as usize);

        let mut offset = Vector3::zeros();
        let mut grad = Vector3::zeros();
        let mut converged = false;

        for _ in 0..MAX_INTERP_STEPS {
            let (g, hess) = derivatives(dogs, layer, col, row);
            grad = g;
            offset = -hess.lu().solve(&grad)?;

            if offset.iter().all(|v| v.abs() < 0.5) {
                converged = true;
                break;
            }
            if offset.iter().any(|v| v.abs() > (w.max(h)) as f32) {
                return None;
            }

            let nc = col as isize + offset[0].round() as isize;
            let nr = row as isize + offset[1].round() as isize;
            let nl = layer as isize + offset[2].round() as isize;
            if nl < 1
                || nl > n as isize
                || nc < IMG_BORDER as isize
                || nc >= (w - IMG_BORDER) as isize
                || nr < IMG_BORDER as isize
                || nr >= (h - IMG_BORDER) as isize
            {
                return None;
            }
            col = nc as usize;
            row = nr as usize;
            layer = nl as usize;
        }
        if !converged {
            return None;
        }

        let contrast = at(&dogs[layer], col, row) + 0.5 * grad.dot(&offset);
        if contrast.abs() * (n as f32) < self.contrast_threshold {
            return None;
        }

        let (dxx, dyy, dxy) = spatial_hessian(&dogs[layer], col, row);
        let tr = dxx + dyy;
        let det = dxx * dyy - dxy * dxy;
        let edge = self.edge_threshold;
        if det <= 0.0 || tr * tr * edge >= (edge + 1.0) * (edge + 1.0) * det {
            return None;
        }

        Some(Extremum {
            octave,
            layer,
            col,
            row,
            xf: col as f32 + offset[0],
            yf: row as f32 + offset[1],
            octave_scale: self.sigma * 2.0f32.powf((layer as f32 + offset[2]) / n as f32),
            response: contrast.abs(),
        })
    }
}

#[inline]
fn at(img: &GrayF32, x: usize, y: usize) -> f32 {
    img.as_raw()[y * img.width() as usize + x]
}

fn is_local_extremum(
    val: f32,
    prev: &GrayF32,
    cur: &GrayF32,
    next: &GrayF32,
    col: usize,
    row: usize,
) -> bool {
    let is_max = val > 0.0;
    for img in [prev, cur, next] {
        for y in row - 1..=row + 1 {
            for x in col - 1..=col + 1 {
                let v = at(img, x, y);
                if is_max && v > val || !is_max && v < val {
                    return false;
                }
            }
        }
    }
    true
}

/// Gradient and Hessian of the DoG function in `(x, y, scale)`.
fn derivatives(dogs: &[GrayF32], layer: usize, c: usize, r: usize) -> (Vector3<f32>, Matrix3<f32>) {
    let (prev, cur, next) = (&dogs[layer - 1], &dogs[layer], &dogs[layer + 1]);
    let v = at(cur, c, r);

    let dx = (at(cur, c + 1, r) - at(cur, c - 1, r)) * 0.5;
    let dy = (at(cur, c, r + 1) - at(cur, c, r - 1)) * 0.5;
    let ds = (at(next, c, r) - at(prev, c, r)) * 0.5;

    let dxx = at(cur, c + 1, r) + at(cur, c - 1, r) - 2.0 * v;
    let dyy = at(cur, c, r + 1) + at(cur, c, r - 1) - 2.0 * v;
    let dss = at(next, c, r) + at(prev, c, r) - 2.0 * v;
    let dxy = (at(cur, c + 1, r + 1) - at(cur, c - 1, r + 1) - at(cur, c + 1, r - 1)
        + at(cur, c - 1, r - 1))
        * 0.25;
    let dxs = (at(next, c + 1, r) - at(next, c - 1, r) - at(prev, c + 1, r) + at(prev, c - 1, r))
        * 0.25;
    let dys = (at(next, c, r + 1) - at(next, c, r - 1) - at(prev, c, r + 1) + at(prev, c, r - 1))
        * 0.25;

    (
        Vector3::new(dx, dy, ds),
        Matrix3::new(dxx, dxy, dxs, dxy, dyy, dys, dxs, dys, dss),
    )
}

fn spatial_hessian(img: &GrayF32, c: usize, r: usize) -> (f32, f32, f32) {
    let v = at(img, c, r);
    let dxx = at(img, c + 1, r) + at(img, c - 1, r) - 2.0 * v;
    let dyy = at(img, c, r + 1) + at(img, c, r - 1) - 2.0 * v;
    let dxy = (at(img, c + 1, r + 1) - at(img, c - 1, r + 1) - at(img, c + 1, r - 1)
        + at(img, c - 1, r - 1))
        * 0.25;
    (dxx, dyy, dxy)
}

/// Gradient at `(x, y)` with the y axis pointing up, as `(dx, dy)`.
#[inline]
fn gradient(img: &GrayF32, x: usize, y: usize) -> (f32, f32) {
    let dx = at(img, x + 1, y) - at(img, x - 1, y);
    let dy = at(img, x, y - 1) - at(img, x, y + 1);
    (dx, dy)
}

fn angle_degrees(dx: f32, dy: f32) -> f32 {
    let a = dy.atan2(dx).to_degrees();
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}

/// Dominant gradient orientations (degrees) around an extremum.
fn orientation_peaks(gauss: &GrayF32, e: &Extremum) -> Vec<f32> {
    let (w, h) = (gauss.width() as isize, gauss.height() as isize);
    let sigma_w = ORI_SIG_FCTR * e.octave_scale;
    let radius = (ORI_RADIUS * e.octave_scale).round() as isize;
    let exp_scale = -1.0 / (2.0 * sigma_w * sigma_w);

    let mut raw = [0.0f32; ORI_HIST_BINS];
    for i in -radius..=radius {
        let y = e.row as isize + i;
        if y <= 0 || y >= h - 1 {
            continue;
        }
        for j in -radius..=radius {
            let x = e.col as isize + j;
            if x <= 0 || x >= w - 1 {
                continue;
            }
            let (dx, dy) = gradient(gauss, x as usize, y as usize);
            let weight = (((i * i + j * j) as f32) * exp_scale).exp();
            let mag = (dx * dx + dy * dy).sqrt();
            let bin = (angle_degrees(dx, dy) * ORI_HIST_BINS as f32 / 360.0).round() as usize
                % ORI_HIST_BINS;
            raw[bin] += weight * mag;
        }
    }

    let n = ORI_HIST_BINS;
    let mut hist = [0.0f32; ORI_HIST_BINS];
    for (i, h) in hist.iter_mut().enumerate() {
        let at_off = |o: isize| raw[(i as isize + o).rem_euclid(n as isize) as usize];
        *h = (at_off(-2) + at_off(2)) * (1.0 / 16.0)
            + (at_off(-1) + at_off(1)) * (4.0 / 16.0)
            + at_off(0) * (6.0 / 16.0);
    }

    let max = hist.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Vec::new();
    }
    let peak_thr = max * ORI_PEAK_RATIO;

    let mut angles = Vec::new();
    for j in 0..n {
        let l = hist[(j + n - 1) % n];
        let r = hist[(j + 1) % n];
        let c = hist[j];
        if c > l && c > r && c >= peak_thr {
            let mut bin = j as f32 + 0.5 * (l - r) / (l - 2.0 * c + r);
            if bin < 0.0 {
                bin += n as f32;
            } else if bin >= n as f32 {
                bin -= n as f32;
            }
            let mut angle = 360.0 - (360.0 / n as f32) * bin;
            if (angle - 360.0).abs() < f32::EPSILON {
                angle = 0.0;
            }
            angles.push(angle);
        }
    }
    angles
}

/// 4x4 spatial cells of 8 orientation bins, trilinearly interpolated,
/// normalized, clipped at 0.2 and renormalized.
fn compute_descriptor(gauss: &GrayF32, xf: f32, yf: f32, ori: f32, scl: f32) -> Vec<f32> {
    let d = DESCR_WIDTH;
    let n = DESCR_HIST_BINS;
    let (w, h) = (gauss.width() as isize, gauss.height() as isize);
    let px = xf.round() as isize;
    let py = yf.round() as isize;

    let (sin_t, cos_t) = ori.to_radians().sin_cos();
    let bins_per_deg = n as f32 / 360.0;
    let exp_scale = -1.0 / (d as f32 * d as f32 * 0.5);
    let hist_width = DESCR_SCL_FCTR * scl;
    let radius = (hist_width * std::f32::consts::SQRT_2 * (d as f32 + 1.0) * 0.5).round();
    let radius = radius.min(((w * w + h * h) as f32).sqrt()) as isize;
    let cos_t = cos_t / hist_width;
    let sin_t = sin_t / hist_width;

    let stride_o = n + 2;
    let stride_c = (d + 2) * stride_o;
    let mut hist = vec![0.0f32; (d + 2) * stride_c];

    for i in -radius..=radius {
        for j in -radius..=radius {
            let c_rot = j as f32 * cos_t - i as f32 * sin_t;
            let r_rot = j as f32 * sin_t + i as f32 * cos_t;
            let rbin = r_rot + d as f32 / 2.0 - 0.5;
            let cbin = c_rot + d as f32 / 2.0 - 0.5;
            let r = py + i;
            let c = px + j;

            if rbin <= -1.0 || rbin >= d as f32 || cbin <= -1.0 || cbin >= d as f32 {
                continue;
            }
            if r <= 0 || r >= h - 1 || c <= 0 || c >= w - 1 {
                continue;
            }

            let (dx, dy) = gradient(gauss, c as usize, r as usize);
            let weight = ((c_rot * c_rot + r_rot * r_rot) * exp_scale).exp();
            let mag = (dx * dx + dy * dy).sqrt() * weight;
            let obin = (angle_degrees(dx, dy) - ori) * bins_per_deg;

            let r0 = rbin.floor();
            let c0 = cbin.floor();
            let o0 = obin.floor();
            let (rb, cb, ob) = (rbin - r0, cbin - c0, obin - o0);
            let mut o0 = o0 as isize;
            if o0 < 0 {
                o0 += n as isize;
            }
            if o0 >= n as isize {
                o0 -= n as isize;
            }

            let v_r1 = mag * rb;
            let v_r0 = mag - v_r1;
            let v_rc11 = v_r1 * cb;
            let v_rc10 = v_r1 - v_rc11;
            let v_rc01 = v_r0 * cb;
            let v_rc00 = v_r0 - v_rc01;
            let v_rco111 = v_rc11 * ob;
            let v_rco110 = v_rc11 - v_rco111;
            let v_rco101 = v_rc10 * ob;
            let v_rco100 = v_rc10 - v_rco101;
            let v_rco011 = v_rc01 * ob;
            let v_rco010 = v_rc01 - v_rco011;
            let v_rco001 = v_rc00 * ob;
            let v_rco000 = v_rc00 - v_rco001;

            let idx = ((r0 as isize + 1) as usize * (d + 2) + (c0 as isize + 1) as usize) * stride_o
                + o0 as usize;
            hist[idx] += v_rco000;
            hist[idx + 1] += v_rco001;
            hist[idx + stride_o] += v_rco010;
            hist[idx + stride_o + 1] += v_rco011;
            hist[idx + stride_c] += v_rco100;
            hist[idx + stride_c + 1] += v_rco101;
            hist[idx + stride_c + stride_o] += v_rco110;
            hist[idx + stride_c + stride_o + 1] += v_rco111;
        }
    }

    let mut out = vec![0.0f32; d * d * n];
    for i in 0..d {
        for j in 0..d {
            let idx = ((i + 1) * (d + 2) + (j + 1)) * stride_o;
            hist[idx] += hist[idx + n];
            hist[idx + 1] += hist[idx + n + 1];
            for k in 0..n {
                out[(i * d + j) * n + k] = hist[idx + k];
            }
        }
    }

    normalize_clipped(&mut out);
    out
}

fn normalize_clipped(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return;
    }
    let thr = norm * DESCR_MAG_THR;
    for x in v.iter_mut() {
        *x = x.min(thr);
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(f32::EPSILON);
    for x in v.iter_mut() {
        *x /= norm;
    }
}
