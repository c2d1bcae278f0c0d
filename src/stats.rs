//! Small robust-statistics helpers shared by masking and reduction.

/// Population mean and standard deviation; `None` for an empty slice.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.max(0.0).sqrt()))
}

/// Median of `values`, reordering the slice in place.
pub fn median_in_place(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let (lower, upper_mid, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper_mid;
    if n % 2 == 1 {
        return Some(upper);
    }
    let lower_max = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(0.5 * (lower_max + upper))
}

/// Median of `values` without disturbing the caller's ordering.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut scratch = values.to_vec();
    median_in_place(&mut scratch)
}

/// Mean after discarding `fraction` of the samples from each tail.
pub fn trimmed_mean(values: &[f64], fraction: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let cut = ((sorted.len() as f64) * fraction.clamp(0.0, 0.5)).floor() as usize;
    let kept = if 2 * cut >= sorted.len() {
        // Keep the central sample(s) rather than nothing.
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            &sorted[mid - 1..mid + 1]
        } else {
            &sorted[mid..mid + 1]
        }
    } else {
        &sorted[cut..sorted.len() - cut]
    };
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}
