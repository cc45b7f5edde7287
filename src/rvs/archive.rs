//! The per-order RV archive: a flat bundle of named, aligned arrays.
//!
//! Per-spectrum arrays are indexed `[spectrum][column]`, nightly arrays
//! `[night][column]`, where a column is one RV-producing iteration. JSON has no
//! NaN, so undefined entries are written as `null` and read back as NaN.

use serde::{Deserialize, Serialize};

use crate::collection::{RvColumn, RvTable, XcorrColumn};
use crate::io::{nullable_cube, nullable_matrix, nullable_vec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RvArchive {
    pub order_num: usize,
    #[serde(default)]
    pub target: Option<String>,
    pub tag: String,
    /// Fit iteration behind each column (bootstrap passes counted).
    pub iterations: Vec<usize>,
    #[serde(rename = "BJDS")]
    pub bjds: Vec<f64>,
    #[serde(rename = "BJDS_nightly", deserialize_with = "nullable_vec")]
    pub bjds_nightly: Vec<f64>,
    pub bc_vels: Vec<f64>,
    pub n_obs_nights: Vec<usize>,
    #[serde(deserialize_with = "nullable_matrix")]
    pub rvs: Vec<Vec<f64>>,
    #[serde(deserialize_with = "nullable_matrix")]
    pub fit_rms: Vec<Vec<f64>>,
    #[serde(deserialize_with = "nullable_matrix")]
    pub rvs_nightly: Vec<Vec<f64>>,
    #[serde(deserialize_with = "nullable_matrix")]
    pub unc_nightly: Vec<Vec<f64>>,
    #[serde(deserialize_with = "nullable_matrix")]
    pub rvs_xcorr: Vec<Vec<f64>>,
    #[serde(deserialize_with = "nullable_matrix")]
    pub rvs_xcorr_nightly: Vec<Vec<f64>>,
    #[serde(deserialize_with = "nullable_matrix")]
    pub unc_xcorr_nightly: Vec<Vec<f64>>,
    #[serde(deserialize_with = "nullable_matrix")]
    pub bisector_spans: Vec<Vec<f64>>,
    /// CCF trial velocities, `[column][spectrum][trial]`; empty for columns
    /// without cross-correlation.
    #[serde(default, deserialize_with = "nullable_cube")]
    pub xcorr_vels: Vec<Vec<Vec<f64>>>,
    /// CCF RMS surfaces aligned with `xcorr_vels`.
    #[serde(default, deserialize_with = "nullable_cube")]
    pub xcorrs: Vec<Vec<Vec<f64>>>,
    /// Photon-limited precision of the final stellar template (m/s).
    #[serde(default)]
    pub rv_content: Option<f64>,
}

/// Observation-level metadata the table itself does not carry.
#[derive(Debug, Clone)]
pub struct ArchiveMeta {
    pub order_num: usize,
    pub target: Option<String>,
    pub tag: String,
    pub bjds: Vec<f64>,
    pub bjds_nightly: Vec<f64>,
    pub bc_vels: Vec<f64>,
    pub n_obs_nights: Vec<usize>,
    pub rv_content: Option<f64>,
}

impl RvArchive {
    pub fn from_table(table: &RvTable, meta: ArchiveMeta) -> Self {
        Self {
            order_num: meta.order_num,
            target: meta.target,
            tag: meta.tag,
            iterations: table.columns().iter().map(|c| c.iteration).collect(),
            bjds: meta.bjds,
            bjds_nightly: meta.bjds_nightly,
            bc_vels: meta.bc_vels,
            n_obs_nights: meta.n_obs_nights,
            rvs: table.per_spectrum(|c| Some(c.rvs.as_slice())),
            fit_rms: table.per_spectrum(|c| Some(c.fit_rms.as_slice())),
            rvs_nightly: table.per_night(|c| Some(c.rvs_nightly.as_slice())),
            unc_nightly: table.per_night(|c| Some(c.unc_nightly.as_slice())),
            rvs_xcorr: table.per_spectrum(|c| xcorr_field(c, |x| x.rvs.as_slice())),
            rvs_xcorr_nightly: table.per_night(|c| xcorr_field(c, |x| x.rvs_nightly.as_slice())),
            unc_xcorr_nightly: table.per_night(|c| xcorr_field(c, |x| x.unc_nightly.as_slice())),
            bisector_spans: table.per_spectrum(|c| xcorr_field(c, |x| x.bisector_spans.as_slice())),
            xcorr_vels: per_column_surfaces(table, |x| &x.ccf_vels),
            xcorrs: per_column_surfaces(table, |x| &x.ccfs),
            rv_content: meta.rv_content,
        }
    }

    pub fn n_spec(&self) -> usize {
        self.bjds.len()
    }

    pub fn n_columns(&self) -> usize {
        self.iterations.len()
    }

    /// One column of a `[row][column]` array.
    pub fn column(rows: &[Vec<f64>], k: usize) -> Vec<f64> {
        rows.iter().map(|r| r.get(k).copied().unwrap_or(f64::NAN)).collect()
    }
}

fn per_column_surfaces(table: &RvTable, pick: fn(&XcorrColumn) -> &Vec<Vec<f64>>) -> Vec<Vec<Vec<f64>>> {
    table
        .columns()
        .iter()
        .map(|c| c.xcorr.as_ref().map(|x| pick(x).clone()).unwrap_or_default())
        .collect()
}

fn xcorr_field(column: &RvColumn, pick: fn(&XcorrColumn) -> &[f64]) -> Option<&[f64]> {
    column.xcorr.as_ref().map(pick)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_flattened_row_major_by_spectrum() {
        let mut t = RvTable::new(2, 1, 2);
        for (k, v) in [(1usize, 3.0), (2, 4.0)] {
            t.push(RvColumn {
                iteration: k,
                rvs: vec![v, -v],
                fit_rms: vec![0.01, 0.02],
                rvs_nightly: vec![0.0],
                unc_nightly: vec![1.0],
                xcorr: (k == 2).then(|| XcorrColumn {
                    rvs: vec![v + 1.0, -v + 1.0],
                    rvs_nightly: vec![1.0],
                    unc_nightly: vec![0.5],
                    bisector_spans: vec![2.0, 2.5],
                    ccf_vels: vec![vec![-10.0, 0.0, 10.0]; 2],
                    ccfs: vec![vec![0.3, 0.1, 0.3], vec![0.3, f64::NAN, 0.2]],
                }),
            })
            .unwrap();
        }
        let a = RvArchive::from_table(
            &t,
            ArchiveMeta {
                order_num: 7,
                target: None,
                tag: "t".into(),
                bjds: vec![1.0, 1.1],
                bjds_nightly: vec![1.05],
                bc_vels: vec![0.0, 0.0],
                n_obs_nights: vec![2],
                rv_content: None,
            },
        );
        assert_eq!(a.rvs, vec![vec![3.0, 4.0], vec![-3.0, -4.0]]);
        assert!(a.rvs_xcorr[0][0].is_nan());
        assert_eq!(a.rvs_xcorr[1][1], -3.0);
        assert_eq!(RvArchive::column(&a.rvs, 1), vec![4.0, -4.0]);
        assert_eq!(a.iterations, vec![1, 2]);
        assert_eq!(a.n_columns(), 2);

        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"BJDS\""));
        let back: RvArchive = serde_json::from_str(&json).unwrap();
        assert!(back.rvs_xcorr[0][0].is_nan());
        assert_eq!(back.rvs, a.rvs);

        // CCF surfaces are kept per column; the first column had none.
        assert!(back.xcorrs[0].is_empty());
        assert_eq!(back.xcorrs[1][0], vec![0.3, 0.1, 0.3]);
        assert!(back.xcorrs[1][1][1].is_nan());
        assert_eq!(back.xcorr_vels[1][1], vec![-10.0, 0.0, 10.0]);
    }
}
