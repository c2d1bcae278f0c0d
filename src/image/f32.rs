//! Owned single-channel f32 detector image in row-major layout.
//!
//! Images are treated as values: every correction returns a new `ImageF32`
//! and leaves its inputs untouched, so two equal inputs always produce equal
//! outputs.
use super::traits::ImageView;
use crate::error::{ensure_shape, ReductionError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct ImageF32 {
    /// Image width in pixels (detector columns)
    pub w: usize,
    /// Image height in pixels (detector rows)
    pub h: usize,
    /// Backing storage in row-major order
    pub data: Vec<f32>,
}

impl ImageF32 {
    /// Construct a zero-initialized buffer of size `w × h`.
    pub fn new(w: usize, h: usize) -> Self {
        Self::filled(w, h, 0.0)
    }

    /// Construct a buffer of size `w × h` with every pixel set to `value`.
    pub fn filled(w: usize, h: usize, value: f32) -> Self {
        Self {
            w,
            h,
            data: vec![value; w * h],
        }
    }

    /// Wrap raw row-major samples; `data.len()` must equal `w * h`.
    pub fn from_vec(w: usize, h: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != w * h {
            return Err(ReductionError::config(format!(
                "image buffer holds {} samples, expected {}x{}",
                data.len(),
                w,
                h
            )));
        }
        Ok(Self { w, h, data })
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(w: usize, h: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                data.push(f(x, y));
            }
        }
        Self { w, h, data }
    }

    #[inline]
    /// Convert (x, y) to a linear index into `data`.
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.w + x
    }
    #[inline]
    /// Get the pixel value at (x, y).
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[self.idx(x, y)]
    }
    #[inline]
    /// Set the pixel value at (x, y).
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        let i = self.idx(x, y);
        self.data[i] = v;
    }

    /// Apply `f` to every pixel, returning a new image.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            w: self.w,
            h: self.h,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Combine two equally shaped images pixel by pixel.
    pub fn zip_map(
        &self,
        other: &ImageF32,
        context: &'static str,
        f: impl Fn(f32, f32) -> f32,
    ) -> Result<Self> {
        ensure_shape(context, self.shape(), other.shape())?;
        Ok(Self {
            w: self.w,
            h: self.h,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    /// Smallest and largest finite pixel values, if any.
    pub fn finite_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

impl ImageView for ImageF32 {
    type Pixel = f32;

    #[inline]
    fn width(&self) -> usize {
        self.w
    }
    #[inline]
    fn height(&self) -> usize {
        self.h
    }
    #[inline]
    fn row(&self, y: usize) -> &[f32] {
        let start = y * self.w;
        &self.data[start..start + self.w]
    }
    #[inline]
    fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(ImageF32::from_vec(3, 2, vec![0.0; 6]).is_ok());
        assert!(matches!(
            ImageF32::from_vec(3, 2, vec![0.0; 5]),
            Err(ReductionError::Config(_))
        ));
    }

    #[test]
    fn zip_map_checks_shape_and_keeps_inputs() {
        let a = ImageF32::filled(4, 3, 2.0);
        let b = ImageF32::filled(3, 4, 1.0);
        let err = a.zip_map(&b, "test", |x, y| x - y).unwrap_err();
        assert!(matches!(err, ReductionError::ShapeMismatch { .. }));
        assert_eq!(a, ImageF32::filled(4, 3, 2.0));
    }

    #[test]
    fn rows_iterate_in_order() {
        let img = ImageF32::from_fn(3, 2, |x, y| (y * 10 + x) as f32);
        let rows: Vec<&[f32]> = img.rows().collect();
        assert_eq!(rows, vec![&[0.0, 1.0, 2.0][..], &[10.0, 11.0, 12.0][..]]);
        assert_eq!(img.shape(), (2, 3));
    }

    #[test]
    fn finite_range_skips_nan() {
        let img = ImageF32::from_vec(3, 1, vec![f32::NAN, -1.0, 4.0]).unwrap();
        assert_eq!(img.finite_range(), Some((-1.0, 4.0)));
    }
}
