//! Per-ring sigma clipping kernels.
//!
//! Each kernel receives the included values of one bin together with their
//! pixel positions and returns the positions to exclude. Bins with fewer than
//! two samples or zero spread never produce removals.
use crate::stats::{mean_std, median};

/// Single pass: drop pixels with `|v - median| / std > alpha`.
pub fn ring_outliers_median(values: &[f64], positions: &[u32], alpha: f64) -> Vec<u32> {
    let Some((_, std)) = mean_std(values) else {
        return Vec::new();
    };
    if values.len() < 2 || std == 0.0 {
        return Vec::new();
    }
    let Some(med) = median(values) else {
        return Vec::new();
    };
    values
        .iter()
        .zip(positions)
        .filter(|(&v, _)| (v - med).abs() / std > alpha)
        .map(|(_, &p)| p)
        .collect()
}

/// Iterative: repeatedly drop the single worst pixel (against the mean of the
/// remaining ones) until every remaining pixel is within `alpha` spreads.
pub fn ring_outliers_mean(values: &[f64], positions: &[u32], alpha: f64) -> Vec<u32> {
    let mut active: Vec<usize> = (0..values.len()).collect();
    let mut removals = Vec::new();
    let mut scratch = Vec::with_capacity(values.len());
    loop {
        if active.len() <= 1 {
            break;
        }
        scratch.clear();
        scratch.extend(active.iter().map(|&i| values[i]));
        let Some((mean, std)) = mean_std(&scratch) else {
            break;
        };
        if std == 0.0 {
            break;
        }
        let (worst_slot, worst_z) = scratch
            .iter()
            .map(|v| (v - mean).abs() / std)
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, z)| {
                if z > best.1 {
                    (i, z)
                } else {
                    best
                }
            });
        if worst_z < alpha {
            break;
        }
        removals.push(positions[active.swap_remove(worst_slot)]);
    }
    removals
}
