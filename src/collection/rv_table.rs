//! Append-only per-order RV table.
//!
//! One column per RV-producing iteration; a column is written once and never
//! touched again. Bootstrap passes produce no column.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Everything one iteration contributes to the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RvColumn {
    /// Fit iteration (counting bootstrap passes) this column came from.
    pub iteration: usize,
    /// Per-spectrum forward-model RVs (`vel + bc_vel`).
    pub rvs: Vec<f64>,
    /// Per-spectrum fit metric.
    pub fit_rms: Vec<f64>,
    pub rvs_nightly: Vec<f64>,
    pub unc_nightly: Vec<f64>,
    /// Present when cross-correlation ran this iteration.
    pub xcorr: Option<XcorrColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XcorrColumn {
    pub rvs: Vec<f64>,
    pub rvs_nightly: Vec<f64>,
    pub unc_nightly: Vec<f64>,
    pub bisector_spans: Vec<f64>,
    /// Trial stellar velocities per spectrum (observatory frame).
    #[serde(default)]
    pub ccf_vels: Vec<Vec<f64>>,
    /// RMS surface per spectrum over `ccf_vels`.
    #[serde(default)]
    pub ccfs: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RvTable {
    n_spec: usize,
    n_nights: usize,
    columns: Vec<RvColumn>,
}

impl RvTable {
    pub fn new(n_spec: usize, n_nights: usize, expected_columns: usize) -> Self {
        Self {
            n_spec,
            n_nights,
            columns: Vec::with_capacity(expected_columns),
        }
    }

    pub fn n_spec(&self) -> usize {
        self.n_spec
    }

    pub fn n_nights(&self) -> usize {
        self.n_nights
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[RvColumn] {
        &self.columns
    }

    pub fn last(&self) -> Option<&RvColumn> {
        self.columns.last()
    }

    /// Append a column after checking its shape.
    pub fn push(&mut self, column: RvColumn) -> Result<(), AppError> {
        let spec_ok = column.rvs.len() == self.n_spec && column.fit_rms.len() == self.n_spec;
        let night_ok = column.rvs_nightly.len() == self.n_nights && column.unc_nightly.len() == self.n_nights;
        let xcorr_ok = column.xcorr.as_ref().is_none_or(|x| {
            x.rvs.len() == self.n_spec
                && x.bisector_spans.len() == self.n_spec
                && x.rvs_nightly.len() == self.n_nights
                && x.unc_nightly.len() == self.n_nights
                && x.ccfs.len() == x.ccf_vels.len()
                && (x.ccfs.is_empty() || x.ccfs.len() == self.n_spec)
        });
        if !(spec_ok && night_ok && xcorr_ok) {
            return Err(AppError::numerical(format!(
                "RV column for iteration {} does not match {} spectra / {} nights.",
                column.iteration, self.n_spec, self.n_nights
            )));
        }
        if let Some(prev) = self.columns.last() {
            if column.iteration <= prev.iteration {
                return Err(AppError::numerical(format!(
                    "RV column for iteration {} arrived after iteration {}.",
                    column.iteration, prev.iteration
                )));
            }
        }
        self.columns.push(column);
        Ok(())
    }

    /// `[spectrum][column]` view of one per-spectrum quantity.
    pub fn per_spectrum(&self, pick: impl Fn(&RvColumn) -> Option<&[f64]>) -> Vec<Vec<f64>> {
        (0..self.n_spec)
            .map(|s| {
                self.columns
                    .iter()
                    .map(|c| pick(c).map_or(f64::NAN, |v| v[s]))
                    .collect()
            })
            .collect()
    }

    /// `[night][column]` view of one nightly quantity.
    pub fn per_night(&self, pick: impl Fn(&RvColumn) -> Option<&[f64]>) -> Vec<Vec<f64>> {
        (0..self.n_nights)
            .map(|n| {
                self.columns
                    .iter()
                    .map(|c| pick(c).map_or(f64::NAN, |v| v[n]))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(iteration: usize, v: f64) -> RvColumn {
        RvColumn {
            iteration,
            rvs: vec![v; 3],
            fit_rms: vec![0.01; 3],
            rvs_nightly: vec![v; 2],
            unc_nightly: vec![1.0; 2],
            xcorr: None,
        }
    }

    #[test]
    fn columns_append_and_never_change() {
        let mut t = RvTable::new(3, 2, 2);
        t.push(column(1, 5.0)).unwrap();
        let snapshot = t.columns()[0].clone();
        t.push(column(2, 7.0)).unwrap();
        assert_eq!(t.columns()[0], snapshot);
        assert_eq!(t.n_columns(), 2);
        let rvs = t.per_spectrum(|c| Some(c.rvs.as_slice()));
        assert_eq!(rvs[2], vec![5.0, 7.0]);
    }

    #[test]
    fn shape_and_order_are_checked() {
        let mut t = RvTable::new(3, 2, 1);
        let mut bad = column(0, 1.0);
        bad.rvs.pop();
        assert!(t.push(bad).is_err());
        t.push(column(3, 1.0)).unwrap();
        assert!(t.push(column(3, 1.0)).is_err());
    }

    #[test]
    fn missing_xcorr_reads_as_nan() {
        let mut t = RvTable::new(3, 2, 1);
        t.push(column(0, 1.0)).unwrap();
        let bis = t.per_spectrum(|c| c.xcorr.as_ref().map(|x| x.bisector_spans.as_slice()));
        assert!(bis[0][0].is_nan());
    }
}
