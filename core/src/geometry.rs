use crate::{Error, Result};
use nalgebra::{Matrix3, Point2, Vector3};

/// Map a pixel through a homography. `None` when the point lands on the
/// line at infinity.
pub fn project_point(h: &Matrix3<f64>, x: f64, y: f64) -> Option<Point2<f64>> {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-12 {
        return None;
    }
    Some(Point2::new(p[0] / p[2], p[1] / p[2]))
}

pub fn translation_matrix(dx: f64, dy: f64) -> Matrix3<f64> {
    Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0)
}

/// Outer corners of a `width x height` raster, clockwise from the origin.
pub fn image_corners(width: u32, height: u32) -> [Point2<f64>; 4] {
    let (w, h) = (width as f64, height as f64);
    [
        Point2::new(0.0, 0.0),
        Point2::new(w, 0.0),
        Point2::new(w, h),
        Point2::new(0.0, h),
    ]
}

/// Axis-aligned bounds of a point set, `(x_min, y_min, x_max, y_max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Bounds {
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point2<f64>>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut b = Bounds {
            x_min: first.x,
            y_min: first.y,
            x_max: first.x,
            y_max: first.y,
        };
        for p in iter {
            b.x_min = b.x_min.min(p.x);
            b.y_min = b.y_min.min(p.y);
            b.x_max = b.x_max.max(p.x);
            b.y_max = b.y_max.max(p.y);
        }
        Some(b)
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            x_min: self.x_min.min(other.x_min),
            y_min: self.y_min.min(other.y_min),
            x_max: self.x_max.max(other.x_max),
            y_max: self.y_max.max(other.y_max),
        }
    }
}

/// Warp the corners of a `width x height` image through `h`.
pub fn warp_corners(h: &Matrix3<f64>, width: u32, height: u32) -> Result<[Point2<f64>; 4]> {
    let corners = image_corners(width, height);
    let mut out = corners;
    for (dst, src) in out.iter_mut().zip(corners.iter()) {
        *dst = project_point(h, src.x, src.y).ok_or_else(|| {
            Error::DegenerateGeometry(format!(
                "corner ({}, {}) maps to infinity",
                src.x, src.y
            ))
        })?;
    }
    Ok(out)
}

pub fn is_finite_matrix(m: &Matrix3<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}
