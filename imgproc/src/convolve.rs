use crate::GrayF32;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    Constant(u8),
    Replicate,
    Reflect,
    Reflect101,
    Wrap,
}

pub fn gaussian_kernel_1d(sigma: f32, size: usize) -> Vec<f32> {
    let size = size.max(1) | 1;
    let mut kernel = Vec::with_capacity(size);
    let center = (size / 2) as isize;
    let sigma2 = sigma * sigma;
    let mut sum = 0.0f32;

    for i in 0..size {
        let x = (i as isize - center) as f32;
        let v = (-(x * x) / (2.0 * sigma2)).exp();
        kernel.push(v);
        sum += v;
    }

    if sum != 0.0 {
        for v in &mut kernel {
            *v /= sum;
        }
    }

    kernel
}

/// Odd kernel width covering +/- 3 sigma.
pub fn kernel_size_for_sigma(sigma: f32) -> usize {
    2 * (3.0 * sigma).ceil().max(1.0) as usize + 1
}

pub(crate) fn map_coord(coord: isize, len: usize, mode: BorderMode) -> Option<usize> {
    let n = len as isize;
    if n <= 0 {
        return None;
    }

    match mode {
        BorderMode::Constant(_) => {
            if coord < 0 || coord >= n {
                None
            } else {
                Some(coord as usize)
            }
        }
        BorderMode::Replicate => Some(coord.clamp(0, n - 1) as usize),
        BorderMode::Wrap => Some(coord.rem_euclid(n) as usize),
        BorderMode::Reflect => {
            if n == 1 {
                return Some(0);
            }
            let period = 2 * n;
            let mut c = coord.rem_euclid(period);
            if c >= n {
                c = period - c - 1;
            }
            Some(c as usize)
        }
        BorderMode::Reflect101 => {
            if n == 1 {
                return Some(0);
            }
            let period = 2 * n - 2;
            let mut c = coord.rem_euclid(period);
            if c >= n {
                c = period - c;
            }
            Some(c as usize)
        }
    }
}

/// Horizontal then vertical pass of the same 1D kernel.
pub fn separable_convolve_f32(image: &GrayF32, kernel_1d: &[f32], border: BorderMode) -> GrayF32 {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || kernel_1d.is_empty() {
        return image.clone();
    }
    let (wu, hu) = (w as usize, h as usize);
    let radius = (kernel_1d.len() / 2) as isize;
    let constant = match border {
        BorderMode::Constant(v) => v as f32 / 255.0,
        _ => 0.0,
    };

    let src = image.as_raw();
    let mut tmp = vec![0.0f32; wu * hu];
    tmp.par_chunks_mut(wu).enumerate().for_each(|(y, row)| {
        let line = &src[y * wu..(y + 1) * wu];
        for (x, out) in row.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (k, &kv) in kernel_1d.iter().enumerate() {
                let sx = x as isize + k as isize - radius;
                let v = map_coord(sx, wu, border).map_or(constant, |ix| line[ix]);
                acc += kv * v;
            }
            *out = acc;
        }
    });

    let mut dst = GrayF32::new(w, h);
    dst.as_mut()
        .par_chunks_mut(wu)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let mut acc = 0.0f32;
                for (k, &kv) in kernel_1d.iter().enumerate() {
                    let sy = y as isize + k as isize - radius;
                    let v = map_coord(sy, hu, border).map_or(constant, |iy| tmp[iy * wu + x]);
                    acc += kv * v;
                }
                *out = acc;
            }
        });
    dst
}

pub fn gaussian_blur_f32(image: &GrayF32, sigma: f32) -> GrayF32 {
    if sigma <= 0.0 {
        return image.clone();
    }
    let kernel = gaussian_kernel_1d(sigma, kernel_size_for_sigma(sigma));
    separable_convolve_f32(image, &kernel, BorderMode::Reflect101)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn gaussian_kernel_1d_is_normalized() {
        let k = gaussian_kernel_1d(1.2, 7);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn gaussian_blur_preserves_size_and_mass() {
        let mut img = GrayF32::new(32, 24);
        img.put_pixel(10, 10, Luma([1.0]));

        let out = gaussian_blur_f32(&img, 1.0);
        assert_eq!(out.dimensions(), img.dimensions());
        let total: f32 = out.as_raw().iter().sum();
        assert!((total - 1.0).abs() < 1e-3);
        assert!(out.get_pixel(10, 10)[0] < 1.0);
        assert!(out.get_pixel(11, 10)[0] > 0.0);
    }

    #[test]
    fn reflect101_mirrors_without_edge_repeat() {
        assert_eq!(map_coord(-1, 5, BorderMode::Reflect101), Some(1));
        assert_eq!(map_coord(5, 5, BorderMode::Reflect101), Some(3));
        assert_eq!(map_coord(-1, 5, BorderMode::Reflect), Some(0));
        assert_eq!(map_coord(7, 5, BorderMode::Constant(0)), None);
    }
}
