//! NaN-aware descriptive statistics.
//!
//! Astronomical arrays are full of NaNs (masked pixels, out-of-range samples), so
//! every routine here silently skips non-finite values and zero/negative
//! weights instead of propagating them.

use std::cmp::Ordering;

fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// `n` evenly spaced samples over `[start, stop]` (inclusive).
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Percentile `q ∈ [0, 100]` over finite values with linear interpolation
/// between order statistics. NaN if nothing is finite.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(cmp_f64);
    let pos = (q.clamp(0.0, 100.0) / 100.0) * (v.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let t = pos - lo as f64;
    v[lo] * (1.0 - t) + v[hi] * t
}

pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}

/// Median absolute deviation about the median (unscaled).
pub fn mad(values: &[f64]) -> f64 {
    let m = median(values);
    let dev: Vec<f64> = values.iter().filter(|v| v.is_finite()).map(|v| (v - m).abs()).collect();
    median(&dev)
}

/// Iterator over `(value, weight)` pairs that can contribute to a weighted statistic.
fn usable<'a>(values: &'a [f64], weights: &'a [f64]) -> impl Iterator<Item = (f64, f64)> + 'a {
    values
        .iter()
        .zip(weights)
        .filter(|(v, w)| v.is_finite() && w.is_finite() && **w > 0.0)
        .map(|(v, w)| (*v, *w))
}

/// Weighted mean; NaN when the total usable weight is zero.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let (mut sw, mut swx) = (0.0, 0.0);
    for (v, w) in usable(values, weights) {
        sw += w;
        swx += w * v;
    }
    if sw > 0.0 { swx / sw } else { f64::NAN }
}

/// Weighted standard deviation about the weighted mean.
///
/// Uses the reliability-weights correction `Σw / (Σw − Σw²/Σw)`, which reduces
/// to the usual `n / (n − 1)` factor for equal weights. NaN with fewer than two
/// usable points.
pub fn weighted_stddev(values: &[f64], weights: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = usable(values, weights).collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let sw: f64 = pairs.iter().map(|p| p.1).sum();
    let sw2: f64 = pairs.iter().map(|p| p.1 * p.1).sum();
    let mean = pairs.iter().map(|p| p.0 * p.1).sum::<f64>() / sw;
    let ss: f64 = pairs.iter().map(|(v, w)| w * (v - mean).powi(2)).sum();
    let denom = sw - sw2 / sw;
    if denom <= 0.0 {
        return f64::NAN;
    }
    (ss / denom).sqrt()
}

/// Weighted median: the smallest value whose cumulative weight reaches half the
/// total. At most half the weight lies strictly below it and at most half
/// strictly above it. NaN when nothing is usable.
pub fn weighted_median(values: &[f64], weights: &[f64]) -> f64 {
    weighted_quantile(values, weights, 0.5)
}

/// Generalised weighted quantile with the same convention as [`weighted_median`].
pub fn weighted_quantile(values: &[f64], weights: &[f64], q: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = usable(values, weights).collect();
    if pairs.is_empty() {
        return f64::NAN;
    }
    pairs.sort_by(|a, b| cmp_f64(&a.0, &b.0));
    let total: f64 = pairs.iter().map(|p| p.1).sum();
    let target = q.clamp(0.0, 1.0) * total;
    let mut cum = 0.0;
    for (v, w) in &pairs {
        cum += w;
        if cum >= target * (1.0 - 1e-12) {
            return *v;
        }
    }
    pairs[pairs.len() - 1].0
}

/// Index of the largest finite value.
pub fn nan_argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| cmp_f64(a.1, b.1))
        .map(|(i, _)| i)
}

/// Index of the smallest finite value.
pub fn nan_argmin(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|a, b| cmp_f64(a.1, b.1))
        .map(|(i, _)| i)
}

/// Sample standard deviation of the finite values; NaN with fewer than two.
pub fn nan_std(values: &[f64]) -> f64 {
    let v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.len() < 2 {
        return f64::NAN;
    }
    let mean = v.iter().sum::<f64>() / v.len() as f64;
    (v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (v.len() - 1) as f64).sqrt()
}

/// Fixed-width histogram counts over `[lo, hi]` with `bins` bins, plus the bin edges.
///
/// Values equal to `hi` fall into the last bin; values outside the range are ignored.
pub fn histogram(values: &[f64], bins: usize, lo: f64, hi: f64) -> (Vec<usize>, Vec<f64>) {
    let bins = bins.max(1);
    let edges = linspace(lo, hi, bins + 1);
    let mut counts = vec![0usize; bins];
    let width = (hi - lo) / bins as f64;
    if !(width > 0.0) {
        return (counts, edges);
    }
    for &v in values.iter().filter(|v| v.is_finite()) {
        if v < lo || v > hi {
            continue;
        }
        let k = (((v - lo) / width).floor() as usize).min(bins - 1);
        counts[k] += 1;
    }
    (counts, edges)
}

/// Running quantile over a window measured in the units of `x` (`x` sorted ascending).
///
/// Each output sample is the `q` quantile of the finite `y` values with
/// `|x_j − x_i| < width / 2`; NaN where the window holds no finite values.
pub fn rolling_quantile(x: &[f64], y: &[f64], width: f64, q: f64) -> Vec<f64> {
    let n = x.len();
    let mut out = vec![f64::NAN; n];
    let half = width / 2.0;
    let (mut lo, mut hi) = (0usize, 0usize);
    for i in 0..n {
        while lo < n && x[lo] <= x[i] - half {
            lo += 1;
        }
        while hi < n && x[hi] < x[i] + half {
            hi += 1;
        }
        if lo < hi {
            out[i] = percentile(&y[lo..hi], q * 100.0);
        }
    }
    out
}

/// Running median over a window of `window` samples (centered), NaN-aware.
pub fn rolling_median(y: &[f64], window: usize) -> Vec<f64> {
    let n = y.len();
    let half = window / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            median(&y[lo..hi])
        })
        .collect()
}
