//! Formatted terminal output.
//!
//! Formatting lives in one place so the fitting code stays free of layout
//! concerns and output changes stay local.

use crate::report::{OrderReport, SpectrumFit, jd_to_datetime};
use crate::rvs::CombinedRvs;

/// Per-order run summary: dataset, per-pass diagnostics and worst fits.
pub fn format_order_summary(report: &OrderReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== rvfm - order {} ===\n", report.order_num));
    out.push_str(&format!(
        "Spectra: n={} | nights={} | {} .. {}\n",
        report.n_spec,
        report.n_nights,
        fmt_date(report.first_bjd),
        fmt_date(report.last_bjd)
    ));
    out.push_str(&format!("Augmenter: {}\n", report.augmenter));
    if let Some(v) = report.rv_content {
        out.push_str(&format!("Template RV content: {v:.2} m/s\n"));
    }

    out.push_str("\nPasses:\n");
    out.push_str(&format_iterations(report));

    if !report.worst.is_empty() {
        out.push_str("\nWorst fits:\n");
        out.push_str(&format_worst_fits(&report.worst));
    }
    out
}

fn format_iterations(report: &OrderReport) -> String {
    let mut out = String::new();
    push_row(
        &mut out,
        format!(
            "{:>4} {:<6} {:>12} {:>14} {:>14} {:>7} {:>8}",
            "pass", "star", "mean_rms", "nightly_m/s", "xcorr_m/s", "failed", "secs"
        ),
    );
    push_row(
        &mut out,
        format!(
            "{:-<4} {:-<6} {:-<12} {:-<14} {:-<14} {:-<7} {:-<8}",
            "", "", "", "", "", "", ""
        ),
    );
    for it in &report.iterations {
        push_row(
            &mut out,
            format!(
                "{:>4} {:<6} {:>12.4e} {:>14} {:>14} {:>7} {:>8.1}",
                it.iteration,
                if it.star_enabled { "on" } else { "off" },
                it.mean_fit_rms,
                fmt_opt(it.nightly_scatter),
                fmt_opt(it.xcorr_nightly_scatter),
                it.n_failed,
                it.elapsed_secs
            ),
        );
    }
    out
}

/// Table of the worst spectrum fits.
pub fn format_worst_fits(rows: &[SpectrumFit]) -> String {
    let mut out = String::new();
    push_row(
        &mut out,
        format!("{:>5} {:<24} {:<16} {:>12} {:>7}", "#", "id", "date", "fit_rms", "good"),
    );
    push_row(&mut out, format!("{:-<5} {:-<24} {:-<16} {:-<12} {:-<7}", "", "", "", "", ""));
    for r in rows {
        push_row(
            &mut out,
            format!(
                "{:>5} {:<24} {:<16} {:>12.4e} {:>7}",
                r.index + 1,
                truncate(&r.id, 24),
                fmt_date(r.bjd),
                r.fit_rms,
                r.n_good
            ),
        );
    }
    out
}

/// Nightly table of a cross-order combination.
pub fn format_combined(combined: &CombinedRvs) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== rvfm - combined orders {:?} (columns {:?}) ===\n",
        combined.orders, combined.columns
    ));
    push_row(
        &mut out,
        format!("{:>5} {:<16} {:>16} {:>12} {:>10} {:>4}", "night", "date", "bjd", "rv_m/s", "unc_m/s", "n"),
    );
    push_row(
        &mut out,
        format!("{:-<5} {:-<16} {:-<16} {:-<12} {:-<10} {:-<4}", "", "", "", "", "", ""),
    );
    for (k, ((bjd, rv), unc)) in combined
        .bjds_nightly
        .iter()
        .zip(&combined.rvs_nightly)
        .zip(&combined.unc_nightly)
        .enumerate()
    {
        push_row(
            &mut out,
            format!(
                "{:>5} {:<16} {:>16.5} {:>12.2} {:>10.2} {:>4}",
                k + 1,
                fmt_date(*bjd),
                bjd,
                rv,
                unc,
                combined.n_obs_nights.get(k).copied().unwrap_or(0)
            ),
        );
    }
    out
}

fn push_row(out: &mut String, row: String) {
    out.push_str(row.trim_end());
    out.push('\n');
}

fn fmt_date(jd: f64) -> String {
    jd_to_datetime(jd).map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string())
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(v) if v.is_finite() => format!("{v:.2}"),
        Some(_) => "nan".to_string(),
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::IterationSummary;

    fn report() -> OrderReport {
        OrderReport {
            order_num: 5,
            n_spec: 4,
            n_nights: 2,
            first_bjd: 2_451_545.0,
            last_bjd: 2_451_546.0,
            augmenter: "weighted median".into(),
            iterations: vec![
                IterationSummary {
                    iteration: 0,
                    star_enabled: false,
                    mean_fit_rms: 0.02,
                    n_failed: 0,
                    nightly_scatter: None,
                    xcorr_nightly_scatter: None,
                    elapsed_secs: 1.0,
                },
                IterationSummary {
                    iteration: 1,
                    star_enabled: true,
                    mean_fit_rms: 0.004,
                    n_failed: 1,
                    nightly_scatter: Some(3.25),
                    xcorr_nightly_scatter: Some(f64::NAN),
                    elapsed_secs: 2.5,
                },
            ],
            rv_content: Some(4.5),
            worst: vec![SpectrumFit {
                index: 2,
                id: "a_very_long_spectrum_file_name.csv".into(),
                bjd: 2_451_545.5,
                fit_rms: f64::NAN,
                n_good: 10,
            }],
        }
    }

    #[test]
    fn summary_lists_passes_and_dates() {
        let s = format_order_summary(&report());
        assert!(s.contains("order 5"));
        assert!(s.contains("2000-01-01 12:00"));
        assert!(s.contains("3.25"));
        assert!(s.contains("Template RV content: 4.50 m/s"));
        let pass0 = s.lines().find(|l| l.trim_start().starts_with("0 off")).unwrap();
        assert!(pass0.contains(" - "));
        assert!(s.lines().all(|l| l == l.trim_end()));
    }

    #[test]
    fn long_ids_are_truncated() {
        let s = format_worst_fits(&report().worst);
        assert!(s.contains("a_very_long_spectrum_fi."));
        assert!(s.contains("    3 "));
    }
}
