//! Debug bundle writer for inspecting one order's fits.
//!
//! A markdown file with the run settings, the ingested spectra, per-pass
//! summaries, every spectrum's fit history and final parameter table, and the
//! RV table. Meant for eyeballing a misbehaving order, not for parsing.

use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::collection::ForwardModelCollection;
use crate::error::AppError;
use crate::math::percentile;
use crate::report::jd_to_datetime;

fn write_err(e: std::io::Error) -> AppError {
    AppError::new(4, format!("Failed to write debug bundle: {e}"))
}

macro_rules! md {
    ($out:expr, $($arg:tt)*) => {
        writeln!($out, $($arg)*).map_err(write_err)?
    };
}

pub fn write_debug_bundle(c: &ForwardModelCollection, dir: &Path) -> Result<PathBuf, AppError> {
    create_dir_all(dir).map_err(|e| AppError::new(4, format!("Failed to create debug dir: {e}")))?;

    let meta = c.meta();
    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("rvfm_debug_{}_ord{}_{ts}.md", meta.tag, meta.order_num));
    let file = File::create(&path).map_err(|e| AppError::new(4, format!("Failed to create debug file: {e}")))?;
    let mut out = BufWriter::new(file);

    let s = c.settings();
    md!(out, "# rvfm debug bundle");
    md!(out, "- generated: {}", Local::now().to_rfc3339());
    md!(out, "- target: {}", meta.target.as_deref().unwrap_or("-"));
    md!(out, "- order: {}", meta.order_num);
    md!(out, "- tag: {}", meta.tag);
    md!(
        out,
        "- passes: {} ({} template fits, offset {})",
        c.n_iters_opt(),
        s.n_template_fits,
        c.offset()
    );
    md!(
        out,
        "- augmenter: {}, nights: {:?}, warm start: {:?}",
        s.augmenter.kind.display_name(),
        s.nights_for_template,
        s.warm_start
    );
    md!(
        out,
        "- model grid: {} points, [{:.4}, {:.4}], dl={:.3e}",
        c.model().grid.len(),
        c.model().grid.wave_min,
        c.model().grid.wave_max,
        c.model().grid.dl
    );

    md!(out, "\n## Spectra");
    md!(out, "| # | id | bjd | date | bc_vel | good | p99 flux |");
    md!(out, "| - | - | - | - | - | - | - |");
    for (i, o) in c.observations().iter().enumerate() {
        let date = jd_to_datetime(o.time_jd).map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
        md!(
            out,
            "| {} | {} | {:.5} | {} | {:.2} | {}/{} | {:.4} |",
            i + 1,
            o.id,
            o.time_jd,
            date,
            o.bc_vel,
            o.n_good(),
            o.n_pix(),
            percentile(&o.flux, 99.0)
        );
    }
    md!(out, "\nNights: {:?}", c.n_obs_nights());

    md!(out, "\n## Passes");
    md!(out, "| pass | star | mean rms | failed | nightly scatter | xcorr scatter | secs |");
    md!(out, "| - | - | - | - | - | - | - |");
    for it in c.summaries() {
        md!(
            out,
            "| {} | {} | {:.4e} | {} | {:?} | {:?} | {:.2} |",
            it.iteration,
            it.star_enabled,
            it.mean_fit_rms,
            it.n_failed,
            it.nightly_scatter,
            it.xcorr_nightly_scatter,
            it.elapsed_secs
        );
    }

    for (h, params) in c.history().iter().zip(c.params()) {
        md!(out, "\n## Spectrum {}", h.id);
        md!(out, "| pass | rms | calls |");
        md!(out, "| - | - | - |");
        for r in &h.results {
            md!(out, "| {} | {:.5e} | {} |", r.iteration, r.fit_metric, r.n_function_calls);
        }
        md!(out, "\n| parameter | value | lower | upper | vary |");
        md!(out, "| - | - | - | - | - |");
        for p in params.iter() {
            md!(
                out,
                "| {} | {:.6} | {:.6} | {:.6} | {} |",
                p.name(),
                p.value,
                p.lower_bound,
                p.upper_bound,
                p.vary
            );
        }
    }

    md!(out, "\n## RV table");
    for col in c.table().columns() {
        md!(out, "\n### Pass {}", col.iteration);
        md!(out, "- nightly: {:?}", col.rvs_nightly);
        md!(out, "- nightly unc: {:?}", col.unc_nightly);
        if let Some(x) = &col.xcorr {
            md!(out, "- xcorr nightly: {:?}", x.rvs_nightly);
            md!(out, "- bisector spans: {:?}", x.bisector_spans);
        }
    }

    out.flush().map_err(write_err)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::forward::tests::{components, line_observations, meta, settings};

    #[test]
    fn bundle_lists_every_spectrum_and_pass() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = ForwardModelCollection::new(line_observations(2), components(false), settings(), meta()).unwrap();
        c.run().unwrap();
        let path = write_debug_bundle(&c, dir.path()).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("rvfm_debug_test_ord3_"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("## Spectrum s0"));
        assert!(text.contains("## Spectrum s1"));
        assert!(text.contains("### Pass 1"));
        assert_eq!(text.matches("| parameter |").count(), 2);
    }
}
