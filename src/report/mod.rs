//! Reporting utilities: per-order summaries and worst-fit rankings.

pub mod format;

pub use format::*;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::collection::{ForwardModelCollection, IterationSummary};

/// Julian date of the Unix epoch.
const JD_UNIX_EPOCH: f64 = 2_440_587.5;

/// Calendar time of a (barycentric) Julian date.
pub fn jd_to_datetime(jd: f64) -> Option<DateTime<Utc>> {
    if !jd.is_finite() {
        return None;
    }
    let millis = ((jd - JD_UNIX_EPOCH) * 86_400_000.0).round();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}

/// One spectrum's final fit quality.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumFit {
    pub index: usize,
    pub id: String,
    pub bjd: f64,
    pub fit_rms: f64,
    pub n_good: usize,
}

/// Everything the terminal summary of one order shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderReport {
    pub order_num: usize,
    pub n_spec: usize,
    pub n_nights: usize,
    pub first_bjd: f64,
    pub last_bjd: f64,
    pub augmenter: String,
    pub iterations: Vec<IterationSummary>,
    pub rv_content: Option<f64>,
    pub worst: Vec<SpectrumFit>,
}

impl OrderReport {
    pub fn from_collection(c: &ForwardModelCollection, top_n: usize) -> Self {
        let obs = c.observations();
        Self {
            order_num: c.meta().order_num,
            n_spec: obs.len(),
            n_nights: c.n_obs_nights().len(),
            first_bjd: obs.first().map_or(f64::NAN, |o| o.time_jd),
            last_bjd: obs.last().map_or(f64::NAN, |o| o.time_jd),
            augmenter: c.settings().augmenter.kind.display_name().to_string(),
            iterations: c.summaries().to_vec(),
            rv_content: c.template_rv_content(),
            worst: rank_worst_fits(&spectrum_fits(c), top_n),
        }
    }
}

/// Final fit of every spectrum, in collection order.
pub fn spectrum_fits(c: &ForwardModelCollection) -> Vec<SpectrumFit> {
    c.observations()
        .iter()
        .zip(c.history())
        .enumerate()
        .map(|(index, (obs, h))| SpectrumFit {
            index,
            id: obs.id.clone(),
            bjd: obs.time_jd,
            fit_rms: h.last().map_or(f64::NAN, |r| r.fit_metric),
            n_good: obs.n_good(),
        })
        .collect()
}

/// The `top_n` worst fits, failed fits first, then by descending RMS.
pub fn rank_worst_fits(fits: &[SpectrumFit], top_n: usize) -> Vec<SpectrumFit> {
    let mut sorted = fits.to_vec();
    sorted.sort_by(|a, b| match (a.fit_rms.is_nan(), b.fit_rms.is_nan()) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => b.fit_rms.total_cmp(&a.fit_rms),
    });
    sorted.truncate(top_n);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn j2000_is_noon_on_new_years_day() {
        let t = jd_to_datetime(2_451_545.0).unwrap();
        assert_eq!(t.format("%Y-%m-%d %H:%M").to_string(), "2000-01-01 12:00");
        assert!(jd_to_datetime(f64::NAN).is_none());
    }

    #[test]
    fn failed_fits_rank_first() {
        let fit = |index: usize, rms: f64| SpectrumFit {
            index,
            id: format!("s{index}"),
            bjd: 0.0,
            fit_rms: rms,
            n_good: 100,
        };
        let ranked = rank_worst_fits(&[fit(0, 0.01), fit(1, f64::NAN), fit(2, 0.05)], 2);
        assert_eq!(ranked.iter().map(|f| f.index).collect::<Vec<_>>(), vec![1, 2]);
    }
}
