//! Cross-order RV combination.
//!
//! Runs once after every order's archive exists:
//!
//! - pick one column (iteration) per order
//! - weight each `(order, spectrum)` by `1/rms²` (zero for masked spectra and
//!   nights), normalised, times the order's `1/rv_content²`, normalised
//! - remove each order's zero point (weighted median over spectra)
//! - combine orders per spectrum (weighted mean; uncertainty from the weighted
//!   scatter across orders over `√n_orders`)
//! - bin the combined velocities into nights

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::math::{nan_argmin, nan_std, weighted_mean, weighted_median, weighted_stddev};
use crate::rvs::{RvArchive, compute_nightly_rvs};

/// Which column of each order's archive to combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationChoice {
    #[default]
    Last,
    /// The column with the smallest nightly RV scatter.
    Best,
    /// An explicit column index.
    Index(usize),
}

impl FromStr for IterationChoice {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last" => Ok(Self::Last),
            "best" => Ok(Self::Best),
            other => other
                .parse::<usize>()
                .map(Self::Index)
                .map_err(|_| AppError::config(format!("Invalid iteration '{other}' (expected last, best or a number)."))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CombineOptions {
    pub iteration: IterationChoice,
    /// 1-based night numbers to exclude.
    pub bad_nights: Vec<usize>,
    /// 1-based spectrum numbers to exclude.
    pub bad_spectra: Vec<usize>,
    pub nightly_outlier_sigma: Option<f64>,
    /// Fold the template RV content into the order weights.
    pub use_rv_content: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRvs {
    pub orders: Vec<usize>,
    /// Column used per order.
    pub columns: Vec<usize>,
    pub bjds: Vec<f64>,
    pub rvs: Vec<f64>,
    pub unc: Vec<f64>,
    pub bjds_nightly: Vec<f64>,
    pub rvs_nightly: Vec<f64>,
    pub unc_nightly: Vec<f64>,
    pub n_obs_nights: Vec<usize>,
}

/// Column with the smallest nightly scatter; the last column when none is finite.
pub fn best_column(archive: &RvArchive, outlier_sigma: Option<f64>) -> Option<usize> {
    let n = archive.n_columns();
    if n == 0 {
        return None;
    }
    let scatter: Vec<f64> = (0..n)
        .map(|k| {
            let rvs = RvArchive::column(&archive.rvs, k);
            let w = inverse_square(&RvArchive::column(&archive.fit_rms, k));
            let (nightly, _) = compute_nightly_rvs(&rvs, &w, &archive.n_obs_nights, outlier_sigma);
            nan_std(&nightly)
        })
        .collect();
    Some(nan_argmin(&scatter).unwrap_or(n - 1))
}

fn inverse_square(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .map(|v| if v.is_finite() && *v > 0.0 { 1.0 / (v * v) } else { 0.0 })
        .collect()
}

/// Spectrum mask from 1-based bad-night and bad-spectrum lists.
pub fn spectrum_mask(n_obs_nights: &[usize], bad_nights: &[usize], bad_spectra: &[usize]) -> Vec<f64> {
    let mut mask = Vec::new();
    for (night, &n) in n_obs_nights.iter().enumerate() {
        let bad = bad_nights.contains(&(night + 1));
        mask.extend(std::iter::repeat_n(if bad { 0.0 } else { 1.0 }, n));
    }
    for &s in bad_spectra {
        if let Some(m) = s.checked_sub(1).and_then(|i| mask.get_mut(i)) {
            *m = 0.0;
        }
    }
    mask
}

pub fn combine_orders(archives: &[RvArchive], opts: &CombineOptions) -> Result<CombinedRvs, AppError> {
    let Some(first) = archives.first() else {
        return Err(AppError::data("No order archives to combine."));
    };
    let n_spec = first.n_spec();
    for a in archives {
        if a.n_spec() != n_spec || a.n_obs_nights != first.n_obs_nights {
            return Err(AppError::config(format!(
                "Order {} does not share the spectrum/night layout of order {}.",
                a.order_num, first.order_num
            )));
        }
        if a.n_columns() == 0 {
            return Err(AppError::data(format!("Order {} has no RV columns.", a.order_num)));
        }
    }

    let mask = spectrum_mask(&first.n_obs_nights, &opts.bad_nights, &opts.bad_spectra);

    // Column choice per order.
    let mut columns = Vec::with_capacity(archives.len());
    for a in archives {
        let k = match opts.iteration {
            IterationChoice::Last => a.n_columns() - 1,
            IterationChoice::Best => best_column(a, opts.nightly_outlier_sigma).unwrap_or(a.n_columns() - 1),
            IterationChoice::Index(k) if k < a.n_columns() => k,
            IterationChoice::Index(k) => {
                return Err(AppError::config(format!(
                    "Order {} has {} columns; column {k} requested.",
                    a.order_num,
                    a.n_columns()
                )));
            }
        };
        columns.push(k);
    }

    // Weights [order][spectrum].
    let rvs: Vec<Vec<f64>> = archives
        .iter()
        .zip(&columns)
        .map(|(a, &k)| RvArchive::column(&a.rvs, k))
        .collect();
    let mut weights: Vec<Vec<f64>> = archives
        .iter()
        .zip(&columns)
        .zip(&rvs)
        .map(|((a, &k), r)| {
            inverse_square(&RvArchive::column(&a.fit_rms, k))
                .into_iter()
                .zip(&mask)
                .zip(r)
                .map(|((w, m), v)| if v.is_finite() { w * m } else { 0.0 })
                .collect()
        })
        .collect();
    let total: f64 = weights.iter().flatten().sum();
    if !(total > 0.0) {
        return Err(AppError::data("Every spectrum is masked or unfit; nothing to combine."));
    }
    weights.iter_mut().flatten().for_each(|w| *w /= total);

    if opts.use_rv_content {
        let content: Vec<f64> = archives
            .iter()
            .map(|a| match a.rv_content {
                Some(c) if c.is_finite() && c > 0.0 => 1.0 / (c * c),
                _ => 0.0,
            })
            .collect();
        let sum: f64 = content.iter().sum();
        if sum > 0.0 {
            for (row, c) in weights.iter_mut().zip(&content) {
                row.iter_mut().for_each(|w| *w *= c / sum);
            }
        } else {
            log::warn!("No order carries an RV content estimate; combining with fit weights only.");
        }
    }

    // Zero points.
    let aligned: Vec<Vec<f64>> = rvs
        .iter()
        .zip(&weights)
        .map(|(r, w)| {
            let zp = weighted_median(r, w);
            r.iter().map(|v| v - zp).collect()
        })
        .collect();

    let mut out_rvs = Vec::with_capacity(n_spec);
    let mut out_unc = Vec::with_capacity(n_spec);
    let mut spec_weights = Vec::with_capacity(n_spec);
    for s in 0..n_spec {
        let v: Vec<f64> = aligned.iter().map(|r| r[s]).collect();
        let w: Vec<f64> = weights.iter().map(|r| r[s]).collect();
        let n_used = v.iter().zip(&w).filter(|(x, w)| x.is_finite() && **w > 0.0).count();
        out_rvs.push(weighted_mean(&v, &w));
        out_unc.push(if n_used > 1 {
            weighted_stddev(&v, &w) / (n_used as f64).sqrt()
        } else {
            f64::NAN
        });
        spec_weights.push(w.iter().sum::<f64>());
    }

    let (rvs_nightly, unc_nightly) =
        compute_nightly_rvs(&out_rvs, &spec_weights, &first.n_obs_nights, opts.nightly_outlier_sigma);

    Ok(CombinedRvs {
        orders: archives.iter().map(|a| a.order_num).collect(),
        columns,
        bjds: first.bjds.clone(),
        rvs: out_rvs,
        unc: out_unc,
        bjds_nightly: first.bjds_nightly.clone(),
        rvs_nightly,
        unc_nightly,
        n_obs_nights: first.n_obs_nights.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn archive(order_num: usize, offset: f64, rms: f64) -> RvArchive {
        let truth = [10.0, 12.0, 11.0, 20.0, 22.0];
        RvArchive {
            order_num,
            target: None,
            tag: "t".into(),
            iterations: vec![1, 2],
            bjds: vec![1.0, 1.01, 1.02, 2.0, 2.01],
            bjds_nightly: vec![1.01, 2.005],
            bc_vels: vec![0.0; 5],
            n_obs_nights: vec![3, 2],
            // Column 0 drifts, column 1 clean.
            rvs: truth
                .iter()
                .enumerate()
                .map(|(i, v)| vec![v + offset + 40.0 * i as f64, v + offset])
                .collect(),
            fit_rms: vec![vec![rms, rms]; 5],
            rvs_nightly: vec![vec![0.0, 0.0]; 2],
            unc_nightly: vec![vec![0.0, 0.0]; 2],
            rvs_xcorr: vec![vec![f64::NAN; 2]; 5],
            rvs_xcorr_nightly: vec![vec![f64::NAN; 2]; 2],
            unc_xcorr_nightly: vec![vec![f64::NAN; 2]; 2],
            bisector_spans: vec![vec![f64::NAN; 2]; 5],
            xcorr_vels: vec![Vec::new(); 2],
            xcorrs: vec![Vec::new(); 2],
            rv_content: Some(5.0),
        }
    }

    #[test]
    fn zero_points_are_removed_before_combining() {
        let a = [archive(1, 1000.0, 0.01), archive(2, -500.0, 0.02)];
        let out = combine_orders(&a, &CombineOptions::default()).unwrap();
        assert_eq!(out.columns, vec![1, 1]);
        // Both orders agree after removing their medians (median of truth = 12).
        let expected = [-2.0, 0.0, -1.0, 8.0, 10.0];
        for (got, want) in out.rvs.iter().zip(expected) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-9);
        }
        assert_abs_diff_eq!(out.rvs_nightly[0], -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out.rvs_nightly[1], 9.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out.unc[0], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn best_column_picks_the_quiet_iteration() {
        let a = archive(1, 0.0, 0.01);
        assert_eq!(best_column(&a, None), Some(1));
        let opts = CombineOptions {
            iteration: IterationChoice::Index(0),
            ..CombineOptions::default()
        };
        assert_eq!(combine_orders(&[a], &opts).unwrap().columns, vec![0]);
    }

    #[test]
    fn masks_exclude_nights_and_spectra() {
        let mask = spectrum_mask(&[3, 2], &[2], &[1]);
        assert_eq!(mask, vec![0.0, 1.0, 1.0, 0.0, 0.0]);

        let opts = CombineOptions {
            bad_nights: vec![2],
            ..CombineOptions::default()
        };
        let out = combine_orders(&[archive(1, 0.0, 0.01)], &opts).unwrap();
        assert!(out.rvs[3].is_nan());
        assert!(out.rvs_nightly[1].is_nan());
    }

    #[test]
    fn mismatched_layouts_are_rejected() {
        let mut b = archive(2, 0.0, 0.01);
        b.n_obs_nights = vec![2, 3];
        assert!(combine_orders(&[archive(1, 0.0, 0.01), b], &CombineOptions::default()).is_err());
    }

    #[test]
    fn iteration_choice_parses() {
        assert_eq!("best".parse::<IterationChoice>().unwrap(), IterationChoice::Best);
        assert_eq!("3".parse::<IterationChoice>().unwrap(), IterationChoice::Index(3));
        assert!("nope".parse::<IterationChoice>().is_err());
    }
}
