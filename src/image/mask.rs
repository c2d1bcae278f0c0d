//! Boolean pixel mask where `true` marks an excluded pixel.
//!
//! Masks only ever accumulate exclusions while they are being built: every
//! combining operation here is a union.
use super::traits::ImageView;
use super::ImageF32;
use crate::error::{ensure_shape, ReductionError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Mask {
    pub w: usize,
    pub h: usize,
    /// Row-major exclusion flags (`true` = excluded)
    pub data: Vec<bool>,
}

impl Mask {
    /// Mask of size `w × h` with every pixel included.
    pub fn included(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            data: vec![false; w * h],
        }
    }

    /// Mask of size `w × h` with every pixel excluded.
    pub fn excluded(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            data: vec![true; w * h],
        }
    }

    pub fn from_vec(w: usize, h: usize, data: Vec<bool>) -> Result<Self> {
        if data.len() != w * h {
            return Err(ReductionError::config(format!(
                "mask buffer holds {} flags, expected {}x{}",
                data.len(),
                w,
                h
            )));
        }
        Ok(Self { w, h, data })
    }

    #[inline]
    pub fn is_excluded(&self, x: usize, y: usize) -> bool {
        self.data[y * self.w + x]
    }

    #[inline]
    pub fn exclude(&mut self, x: usize, y: usize) {
        self.data[y * self.w + x] = true;
    }

    #[inline]
    pub fn exclude_index(&mut self, idx: usize) {
        self.data[idx] = true;
    }

    pub fn excluded_count(&self) -> usize {
        self.data.iter().filter(|&&m| m).count()
    }

    pub fn included_count(&self) -> usize {
        self.data.len() - self.excluded_count()
    }

    pub fn is_fully_excluded(&self) -> bool {
        self.data.iter().all(|&m| m)
    }

    /// Adds every exclusion of `other` to `self`.
    pub fn union_with(&mut self, other: &Mask) -> Result<()> {
        ensure_shape("mask union", self.shape(), other.shape())?;
        for (dst, &src) in self.data.iter_mut().zip(&other.data) {
            *dst |= src;
        }
        Ok(())
    }

    /// True when every pixel excluded by `other` is also excluded here.
    pub fn is_superset_of(&self, other: &Mask) -> bool {
        self.shape() == other.shape()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(&mine, &theirs)| mine || !theirs)
    }

    /// Copy of `image` with excluded pixels replaced by NaN.
    pub fn overlay(&self, image: &ImageF32) -> Result<ImageF32> {
        ensure_shape("mask overlay", image.shape(), self.shape())?;
        let data = image
            .data
            .iter()
            .zip(&self.data)
            .map(|(&v, &masked)| if masked { f32::NAN } else { v })
            .collect();
        Ok(ImageF32 {
            w: image.w,
            h: image.h,
            data,
        })
    }
}

impl ImageView for Mask {
    type Pixel = bool;

    fn width(&self) -> usize {
        self.w
    }
    fn height(&self) -> usize {
        self.h
    }
    fn row(&self, y: usize) -> &[bool] {
        let start = y * self.w;
        &self.data[start..start + self.w]
    }
    fn as_slice(&self) -> &[bool] {
        &self.data
    }
}
