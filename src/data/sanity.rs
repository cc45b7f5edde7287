//! Ingestion-time pixel sanity pass.
//!
//! Pixels are only ever masked, never removed, so every array keeps its length:
//!
//! - `crop_pix` pixels at both ends: flux/unc set to NaN, mask 0
//! - flux (and unc) normalised by the 99th percentile of the finite flux
//! - non-finite flux/unc, flux ≤ 0, unc ≤ 0 and unc > `max_unc` are masked
//! - pixels further than `trend_threshold` from a running-median trend of the
//!   finite flux are masked
//!
//! Every step depends only on the flux values, never on the current mask, so
//! running the pass twice gives the same arrays as running it once.

use crate::domain::{FitSettings, Observation};
use crate::math::{percentile, rolling_median};

/// Percentile used for the flux normalisation.
const NORM_PERCENTILE: f64 = 99.0;

/// Options of the sanity pass, taken from the run settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SanityOptions {
    pub crop_pix: [usize; 2],
    pub max_unc: f64,
    pub trend_window: usize,
    pub trend_threshold: f64,
}

impl From<&FitSettings> for SanityOptions {
    fn from(s: &FitSettings) -> Self {
        Self {
            crop_pix: s.crop_pix,
            max_unc: s.max_unc,
            trend_window: s.trend_window,
            trend_threshold: s.trend_threshold,
        }
    }
}

/// Apply the sanity pass in place. Returns the number of good pixels left.
pub fn sanitize(obs: &mut Observation, opts: &SanityOptions) -> usize {
    let n = obs.n_pix();
    let [left, right] = opts.crop_pix;
    for i in (0..left.min(n)).chain(n.saturating_sub(right)..n) {
        obs.flux[i] = f64::NAN;
        obs.flux_unc[i] = f64::NAN;
        obs.mask[i] = 0.0;
    }

    let p = percentile(&obs.flux, NORM_PERCENTILE);
    if p.is_finite() && p > 0.0 && (p - 1.0).abs() > 1e-12 {
        obs.flux.iter_mut().for_each(|f| *f /= p);
        obs.flux_unc.iter_mut().for_each(|u| *u /= p);
    }

    for i in 0..n {
        let (f, u) = (obs.flux[i], obs.flux_unc[i]);
        if !(f.is_finite() && u.is_finite() && f > 0.0 && u > 0.0 && u <= opts.max_unc) {
            obs.mask[i] = 0.0;
        }
    }

    if opts.trend_window > 1 {
        let trend = rolling_median(&obs.flux, opts.trend_window);
        for i in 0..n {
            if trend[i].is_finite() && (obs.flux[i] - trend[i]).abs() > opts.trend_threshold {
                obs.mask[i] = 0.0;
            }
        }
    }

    let good = obs.n_good();
    log::debug!("'{}': {good}/{n} good pixels after sanity pass.", obs.id);
    good
}
