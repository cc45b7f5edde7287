//! The forward model collection of one echelle order.
//!
//! The collection owns everything that lives across passes:
//!
//! - the time-sorted, sanity-checked observations and their frozen night grouping
//! - one shared `SpectralModel` (every spectrum has the same parameter layout)
//! - the `TemplateSet`, including the stellar template being refined
//! - each spectrum's current parameters and its fit history
//! - the append-only RV table
//!
//! A pass is: fit all spectra → cross-correlate all spectra → nightly RVs →
//! augment the stellar template (skipped on the last pass). Per-spectrum work
//! runs on a dedicated rayon pool and is reassembled in input order, so the
//! worker count never changes the results. Each pass borrows the templates
//! read-only; only the collection swaps in a new stellar template, between
//! passes.
//!
//! With a flat (non-file) stellar template an extra bootstrap pass runs first
//! with the star disabled. It only exists to build a first template, so it
//! records no RVs: `n_iters_opt = n_template_fits + 1`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::augment::{AugmentInput, augment_template, rms_weights};
use crate::collection::{FitHistory, RvColumn, RvTable, SpectrumHistory, XcorrColumn, group_nights};
use crate::data::{ContinuumOptions, SanityOptions, sanitize, trial_continuum};
use crate::domain::{FitResult, FitSettings, Observation};
use crate::error::AppError;
use crate::fit::{CcfResult, FitTarget, ccf, crude_brute_force, solve};
use crate::io::{fit_history_path, rv_archive_path, template_path, write_json, write_rv_archive, write_template_csv};
use crate::math::{median, nan_std};
use crate::models::{ComponentSet, ParameterSet, SpectralModel, TemplateSet};
use crate::rvs::{ArchiveMeta, RvArchive, compute_nightly_rvs, rv_content};

/// Identity of a collection in logs and output file names.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMeta {
    pub order_num: usize,
    pub target: Option<String>,
    pub tag: String,
}

/// One spectrum's outcome of a fit pass.
#[derive(Debug, Clone)]
pub struct SpectrumPass {
    pub result: FitResult,
    /// Data-grid wavelengths at the best fit.
    pub wave: Vec<f64>,
    /// `data − model` at the best fit.
    pub residuals: Vec<f64>,
}

/// What the terminal report shows per pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationSummary {
    pub iteration: usize,
    pub star_enabled: bool,
    pub mean_fit_rms: f64,
    pub n_failed: usize,
    /// Standard deviation of the nightly forward-model RVs (m/s).
    pub nightly_scatter: Option<f64>,
    pub xcorr_nightly_scatter: Option<f64>,
    pub elapsed_secs: f64,
}

#[derive(Debug)]
pub struct ForwardModelCollection {
    meta: CollectionMeta,
    settings: FitSettings,
    observations: Vec<Observation>,
    model: SpectralModel,
    templates: TemplateSet,
    template_from_file: bool,
    vel_index: usize,
    n_obs_nights: Vec<usize>,
    bjds_nightly: Vec<f64>,
    params: Vec<ParameterSet>,
    history: Vec<SpectrumHistory>,
    table: RvTable,
    /// Stellar template each pass was fit with.
    stellar_templates: Vec<Vec<f64>>,
    summaries: Vec<IterationSummary>,
    pool: rayon::ThreadPool,
}

/// Sort by time, run the sanity pass and drop spectra that fail the trial
/// continuum fit. Survivors keep their relative order.
pub fn prepare_observations(mut observations: Vec<Observation>, settings: &FitSettings) -> Vec<Observation> {
    observations.sort_by(|a, b| a.time_jd.total_cmp(&b.time_jd));
    let sanity = SanityOptions::from(settings);
    let continuum = ContinuumOptions::default();
    observations
        .into_iter()
        .filter_map(|mut obs| {
            if let Err(e) = obs.validate() {
                log::warn!("Dropping spectrum: {e}");
                return None;
            }
            if sanitize(&mut obs, &sanity) == 0 {
                log::warn!("Dropping '{}': no good pixels after the sanity pass.", obs.id);
                return None;
            }
            match trial_continuum(&obs, &continuum) {
                Ok(c) => {
                    if settings.remove_continuum {
                        for ((f, u), c) in obs.flux.iter_mut().zip(obs.flux_unc.iter_mut()).zip(&c) {
                            *f /= c;
                            *u /= c;
                        }
                    }
                    Some(obs)
                }
                Err(e) => {
                    log::warn!("Dropping spectrum: {e}");
                    None
                }
            }
        })
        .collect()
}

impl ForwardModelCollection {
    pub fn new(
        observations: Vec<Observation>,
        components: ComponentSet,
        settings: FitSettings,
        meta: CollectionMeta,
    ) -> Result<Self, AppError> {
        settings.validate()?;
        let order = meta.order_num;
        if components.star.is_none() {
            return Err(AppError::config(format!(
                "Order {order}: a 'star' blueprint is required to measure velocities."
            )));
        }

        let n_in = observations.len();
        let observations = prepare_observations(observations, &settings);
        if observations.is_empty() {
            return Err(AppError::data(format!(
                "Order {order}: all {n_in} spectra were dropped at ingestion."
            )));
        }
        if observations.len() < n_in {
            log::warn!("Order {order}: kept {} of {n_in} spectra.", observations.len());
        }

        let times: Vec<f64> = observations.iter().map(|o| o.time_jd).collect();
        let (n_obs_nights, bjds_nightly) = group_nights(&times, settings.night_gap_days);

        let model = SpectralModel::new(components, &observations, &settings)?;
        let (templates, template_from_file) = model.load_templates()?;
        let vel_index = model
            .star_vel_index()
            .ok_or_else(|| AppError::config("The stellar model has no velocity parameter."))?;
        let params = observations
            .iter()
            .map(|o| model.initial_parameters(o))
            .collect::<Result<Vec<_>, _>>()?;

        let n_iters_opt = settings.n_template_fits + usize::from(!template_from_file);
        let history = observations
            .iter()
            .map(|o| SpectrumHistory::with_capacity(o.id.clone(), n_iters_opt))
            .collect();
        let table = RvTable::new(observations.len(), n_obs_nights.len(), settings.n_template_fits);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.n_workers)
            .build()
            .map_err(|e| AppError::numerical(format!("Failed to start the worker pool: {e}")))?;

        log::info!(
            "Order {order}: {} spectra over {} nights, {n_iters_opt} passes ({}).",
            observations.len(),
            n_obs_nights.len(),
            if template_from_file { "stellar template from file" } else { "flat start" }
        );

        Ok(Self {
            meta,
            settings,
            observations,
            model,
            templates,
            template_from_file,
            vel_index,
            n_obs_nights,
            bjds_nightly,
            params,
            history,
            table,
            stellar_templates: Vec::with_capacity(n_iters_opt),
            summaries: Vec::with_capacity(n_iters_opt),
            pool,
        })
    }

    pub fn meta(&self) -> &CollectionMeta {
        &self.meta
    }

    pub fn settings(&self) -> &FitSettings {
        &self.settings
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn model(&self) -> &SpectralModel {
        &self.model
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn params(&self) -> &[ParameterSet] {
        &self.params
    }

    pub fn history(&self) -> &[SpectrumHistory] {
        &self.history
    }

    pub fn table(&self) -> &RvTable {
        &self.table
    }

    pub fn stellar_templates(&self) -> &[Vec<f64>] {
        &self.stellar_templates
    }

    pub fn summaries(&self) -> &[IterationSummary] {
        &self.summaries
    }

    pub fn n_obs_nights(&self) -> &[usize] {
        &self.n_obs_nights
    }

    pub fn bjds_nightly(&self) -> &[f64] {
        &self.bjds_nightly
    }

    /// 1 when a bootstrap pass precedes the template fits, else 0.
    pub fn offset(&self) -> usize {
        usize::from(!self.template_from_file)
    }

    /// Total number of passes, bootstrap included.
    pub fn n_iters_opt(&self) -> usize {
        self.settings.n_template_fits + self.offset()
    }

    /// Run every pass.
    pub fn run(&mut self) -> Result<(), AppError> {
        for iteration in self.summaries.len()..self.n_iters_opt() {
            self.run_iteration(iteration)?;
        }
        Ok(())
    }

    fn run_iteration(&mut self, iteration: usize) -> Result<(), AppError> {
        let started = Instant::now();
        let n_iters = self.n_iters_opt();
        let bootstrap = !self.template_from_file && iteration == 0;
        let star_enabled = !bootstrap;

        if iteration == self.offset() {
            if !self.template_from_file {
                let vi = self.vel_index;
                for (p, obs) in self.params.iter_mut().zip(&self.observations) {
                    p.set_value(vi, -obs.bc_vel);
                }
            }
            if self.settings.xcorr.enabled {
                self.apply_velocity_prior();
            }
        }

        self.stellar_templates.push(self.templates.star.clone());
        let passes = self.fit_pass(iteration, star_enabled)?;

        let n = passes.len();
        let mut waves = Vec::with_capacity(n);
        let mut residuals = Vec::with_capacity(n);
        let mut fit_rms = Vec::with_capacity(n);
        for (s, pass) in passes.into_iter().enumerate() {
            if !pass.result.failed() {
                self.params[s].update_from(&pass.result.best_parameters);
            }
            fit_rms.push(pass.result.fit_metric);
            let arrays = self
                .settings
                .save_fit_history
                .then(|| (pass.wave.clone(), pass.residuals.clone()));
            self.history[s].record(pass.result, arrays);
            waves.push(pass.wave);
            residuals.push(pass.residuals);
        }

        let mut xcorr_vels = None;
        let mut scatter = (None, None);
        if star_enabled {
            let ccfs = self.settings.xcorr.enabled.then(|| self.xcorr_pass());
            let column = self.rv_column(iteration, &fit_rms, ccfs.as_deref());
            scatter = (
                Some(nan_std(&column.rvs_nightly)),
                column.xcorr.as_ref().map(|x| nan_std(&x.rvs_nightly)),
            );
            self.table.push(column)?;
            xcorr_vels = ccfs.map(|c| c.iter().map(|r| r.best_vel).collect::<Vec<f64>>());
        }

        if iteration + 1 < n_iters {
            let input = AugmentInput {
                model: &self.model,
                templates: &self.templates,
                observations: &self.observations,
                params: &self.params,
                waves: &waves,
                residuals: &residuals,
                fit_rms: &fit_rms,
                n_obs_nights: &self.n_obs_nights,
                star_enabled,
                template_from_file: self.template_from_file,
                bootstrap,
                settings: &self.settings.augmenter,
                nights: &self.settings.nights_for_template,
            };
            let star = augment_template(&input)?;
            self.templates.star = star;
        }

        if star_enabled {
            let vi = self.vel_index;
            let policy = self.settings.warm_start;
            for (s, p) in self.params.iter_mut().enumerate() {
                let fitted = p.value(vi);
                let xcorr = xcorr_vels.as_ref().map(|v| v[s]);
                p.set_value(vi, policy.choose(fitted, xcorr));
            }
        }

        let finite: Vec<f64> = fit_rms.iter().copied().filter(|v| v.is_finite()).collect();
        let summary = IterationSummary {
            iteration,
            star_enabled,
            mean_fit_rms: if finite.is_empty() {
                f64::NAN
            } else {
                finite.iter().sum::<f64>() / finite.len() as f64
            },
            n_failed: n - finite.len(),
            nightly_scatter: scatter.0,
            xcorr_nightly_scatter: scatter.1,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        log::info!(
            "Order {} pass {}/{n_iters}: mean rms {:.4e}, nightly scatter {}, {} failed, {:.1}s",
            self.meta.order_num,
            iteration + 1,
            summary.mean_fit_rms,
            summary
                .nightly_scatter
                .map_or_else(|| "n/a (bootstrap)".to_string(), |v| format!("{v:.2} m/s")),
            summary.n_failed,
            summary.elapsed_secs
        );
        self.summaries.push(summary);
        Ok(())
    }

    /// Fit every spectrum from its current parameters.
    ///
    /// Results come back in spectrum order whatever the worker count. A worker
    /// error fails the whole pass; a non-finite starting metric is not an error
    /// but a failed (NaN-metric) result for that spectrum.
    pub fn fit_pass(&self, iteration: usize, star_enabled: bool) -> Result<Vec<SpectrumPass>, AppError> {
        let model = &self.model;
        let templates = &self.templates;
        let settings = &self.settings;
        let vel_index = self.vel_index;
        self.pool.install(|| {
            self.observations
                .par_iter()
                .zip(self.params.par_iter())
                .map(|(obs, init)| {
                    fit_spectrum(model, templates, obs, init, iteration, star_enabled, vel_index, settings)
                })
                .collect()
        })
    }

    fn xcorr_pass(&self) -> Vec<CcfResult> {
        let vi = self.vel_index;
        self.pool.install(|| {
            self.observations
                .par_iter()
                .zip(self.params.par_iter())
                .map(|(obs, p)| ccf(&self.model, p, &self.templates, obs, p.value(vi), &self.settings.xcorr))
                .collect()
        })
    }

    /// Seed each stellar velocity with a coarse brute-force search.
    fn apply_velocity_prior(&mut self) {
        let vi = self.vel_index;
        let priors: Vec<Option<f64>> = self.pool.install(|| {
            self.observations
                .par_iter()
                .zip(self.params.par_iter())
                .map(|(obs, p)| crude_brute_force(&self.model, p, &self.templates, obs, &self.settings.xcorr))
                .collect()
        });
        for ((p, prior), obs) in self.params.iter_mut().zip(priors).zip(&self.observations) {
            match prior {
                Some(v) => p.set_value(vi, v),
                None => log::warn!("'{}': no velocity prior from cross-correlation.", obs.id),
            }
        }
    }

    fn rv_column(&self, iteration: usize, fit_rms: &[f64], ccfs: Option<&[CcfResult]>) -> RvColumn {
        let vi = self.vel_index;
        let rvs: Vec<f64> = self
            .params
            .iter()
            .zip(&self.observations)
            .zip(fit_rms)
            .map(|((p, obs), rms)| if rms.is_finite() { p.value(vi) + obs.bc_vel } else { f64::NAN })
            .collect();
        let weights = rms_weights(fit_rms, false, 0.0);
        let sigma = self.settings.nightly_outlier_sigma;
        let (rvs_nightly, unc_nightly) = compute_nightly_rvs(&rvs, &weights, &self.n_obs_nights, sigma);

        let xcorr = ccfs.map(|ccfs| {
            let rvs: Vec<f64> = ccfs
                .iter()
                .zip(&self.observations)
                .map(|(c, obs)| c.best_vel + obs.bc_vel)
                .collect();
            let (rvs_nightly, unc_nightly) = compute_nightly_rvs(&rvs, &weights, &self.n_obs_nights, sigma);
            XcorrColumn {
                rvs,
                rvs_nightly,
                unc_nightly,
                bisector_spans: ccfs.iter().map(|c| c.bisector_span).collect(),
                ccf_vels: ccfs.iter().map(|c| c.vels.clone()).collect(),
                ccfs: ccfs.iter().map(|c| c.ccf.clone()).collect(),
            }
        });

        RvColumn {
            iteration,
            rvs,
            fit_rms: fit_rms.to_vec(),
            rvs_nightly,
            unc_nightly,
            xcorr,
        }
    }

    /// Photon-limited precision of the current stellar template at the data's
    /// typical S/N. `None` while the template is featureless.
    pub fn template_rv_content(&self) -> Option<f64> {
        let snr_per_spec: Vec<f64> = self
            .observations
            .iter()
            .map(|o| {
                let snr: Vec<f64> = o
                    .flux
                    .iter()
                    .zip(&o.flux_unc)
                    .zip(&o.mask)
                    .filter(|(_, m)| **m > 0.5)
                    .map(|((f, u), _)| f / u)
                    .collect();
                median(&snr)
            })
            .collect();
        let snr = median(&snr_per_spec);
        let lsf = self.params.first().and_then(|p| self.model.lsf_width(p));
        let n_pix = self.observations.first().map_or(0, |o| o.n_pix());
        let v = rv_content(&self.model.grid.wave, &self.templates.star, snr, lsf, n_pix);
        v.is_finite().then_some(v)
    }

    /// The RV archive of this order as it stands.
    pub fn archive(&self) -> RvArchive {
        RvArchive::from_table(
            &self.table,
            ArchiveMeta {
                order_num: self.meta.order_num,
                target: self.meta.target.clone(),
                tag: self.meta.tag.clone(),
                bjds: self.observations.iter().map(|o| o.time_jd).collect(),
                bjds_nightly: self.bjds_nightly.clone(),
                bc_vels: self.observations.iter().map(|o| o.bc_vel).collect(),
                n_obs_nights: self.n_obs_nights.clone(),
                rv_content: self.template_rv_content(),
            },
        )
    }

    /// Write the RV archive, every pass's stellar template and (optionally) the
    /// fit history into `dir`. Returns the written paths.
    pub fn export(&self, dir: &Path) -> Result<Vec<PathBuf>, AppError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| AppError::config(format!("Failed to create '{}': {e}", dir.display())))?;
        let target = self.meta.target.as_deref();
        let (tag, order) = (self.meta.tag.as_str(), self.meta.order_num);
        let mut written = Vec::new();

        let path = rv_archive_path(dir, target, tag, order);
        write_rv_archive(&path, &self.archive())?;
        written.push(path);

        for (k, star) in self.stellar_templates.iter().enumerate() {
            let path = template_path(dir, target, tag, order, k);
            write_template_csv(&path, &self.model.grid.wave, star)?;
            written.push(path);
        }

        if self.settings.save_fit_history {
            let path = fit_history_path(dir, target, tag, order);
            write_json(
                &path,
                &FitHistory {
                    order_num: order,
                    spectra: &self.history,
                },
            )?;
            written.push(path);
        }
        Ok(written)
    }
}

#[allow(clippy::too_many_arguments)]
fn fit_spectrum(
    model: &SpectralModel,
    templates: &TemplateSet,
    obs: &Observation,
    init: &ParameterSet,
    iteration: usize,
    star_enabled: bool,
    vel_index: usize,
    settings: &FitSettings,
) -> Result<SpectrumPass, AppError> {
    let mut start = init.clone();
    if !star_enabled {
        start.set_vary(vel_index, false)?;
    }
    let target = FitTarget {
        model,
        templates,
        obs,
        include_star: star_enabled,
        flag_n_worst: settings.flag_n_worst_pixels,
    };

    let result = match solve(|p| target.evaluate(p), &start, &settings.optimizer) {
        Ok(opt) => FitResult {
            iteration,
            best_parameters: opt.best,
            fit_metric: opt.fbest,
            n_function_calls: opt.n_calls,
        },
        Err(e) => {
            log::warn!("Pass {iteration}: fit of '{}' failed: {}", obs.id, e.message());
            FitResult {
                iteration,
                best_parameters: init.clone(),
                fit_metric: f64::NAN,
                n_function_calls: 1,
            }
        }
    };
    log::debug!(
        "Pass {iteration}: '{}' rms {:.4e} after {} calls",
        obs.id,
        result.fit_metric,
        result.n_function_calls
    );

    let (wave, model_flux) = model.build(&result.best_parameters, templates, obs, star_enabled);
    let residuals = obs.flux.iter().zip(&model_flux).map(|(d, m)| d - m).collect();
    Ok(SpectrumPass {
        result,
        wave,
        residuals,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::augment::tests::line_star;
    use crate::domain::{AugmenterKind, XcorrOptions};
    use crate::models::blaze::{Blaze, PolynomialBlazeSettings};
    use crate::models::star::{StarModel, StarSettings};
    use crate::models::wavelength::{FixedSettings, WavelengthSolution};

    const N_PIX: usize = 200;

    pub(crate) fn components(blaze: bool) -> ComponentSet {
        ComponentSet {
            wavelength_solution: WavelengthSolution::Fixed(FixedSettings { name: "wls".into() }),
            star: Some(StarModel::new(StarSettings {
                name: "star".into(),
                input_file: None,
                vel: [-50_000.0, 0.0, 50_000.0],
            })),
            gas_cell: None,
            tellurics: None,
            fringing: None,
            residual_lab: None,
            lsf: None,
            blaze: blaze.then(|| {
                Blaze::polynomial(PolynomialBlazeSettings {
                    name: "blaze".into(),
                    coeffs: vec![[0.5, 1.0, 1.5], [-0.5, 0.0, 0.5]],
                })
                .unwrap()
            }),
        }
    }

    pub(crate) fn settings() -> FitSettings {
        FitSettings {
            n_template_fits: 1,
            resolution_factor: 4,
            wave_pad: 0.5,
            crop_pix: [0, 0],
            trend_window: 0,
            xcorr: XcorrOptions {
                enabled: false,
                ..XcorrOptions::default()
            },
            save_fit_history: true,
            ..FitSettings::default()
        }
    }

    pub(crate) fn meta() -> CollectionMeta {
        CollectionMeta {
            order_num: 3,
            target: None,
            tag: "test".into(),
        }
    }

    fn flat_obs(s: usize) -> Observation {
        let wave: Vec<f64> = (0..N_PIX).map(|i| 5000.0 + 0.025 * i as f64).collect();
        Observation {
            id: format!("s{s}"),
            wave: Some(wave),
            flux: vec![1.0; N_PIX],
            flux_unc: vec![0.01; N_PIX],
            mask: vec![1.0; N_PIX],
            time_jd: 2_459_000.0 + 0.1 * s as f64 + (s / 2) as f64,
            bc_vel: -2000.0 + 800.0 * s as f64,
        }
    }

    /// Observations drawn from `line_star` through the collection's own model.
    pub(crate) fn line_observations(n_spec: usize) -> Vec<Observation> {
        let obs: Vec<Observation> = (0..n_spec).map(flat_obs).collect();
        let model = SpectralModel::new(components(false), &obs, &settings()).unwrap();
        let (mut templates, _) = model.load_templates().unwrap();
        templates.star = line_star(&model.grid.wave);
        obs.into_iter()
            .map(|mut o| {
                let mut p = model.initial_parameters(&o).unwrap();
                p.set_value(0, -o.bc_vel + 30.0);
                o.flux = model.build(&p, &templates, &o, true).1;
                o
            })
            .collect()
    }

    #[test]
    fn recovers_a_known_blaze_on_a_flat_star() {
        let truth = [1.1, 0.05];
        let mut obs: Vec<Observation> = (0..2).map(flat_obs).collect();
        let probe = SpectralModel::new(components(true), &obs, &settings()).unwrap();
        let (templates, _) = probe.load_templates().unwrap();
        for o in obs.iter_mut() {
            let mut p = probe.initial_parameters(o).unwrap();
            p.set_value(1, truth[0]);
            p.set_value(2, truth[1]);
            o.flux = probe.build(&p, &templates, o, true).1;
        }

        // Ingestion normalises by the 99th flux percentile, which rescales the blaze.
        let norm = crate::math::percentile(&obs[0].flux, 99.0);
        let truth = truth.map(|c| c / norm);

        let c = ForwardModelCollection::new(obs, components(true), settings(), meta()).unwrap();
        assert_eq!(c.offset(), 1);
        let passes = c.fit_pass(0, false).unwrap();
        assert_eq!(passes.len(), 2);
        for pass in &passes {
            assert!(pass.result.fit_metric < 1e-6, "rms {}", pass.result.fit_metric);
            let p = &pass.result.best_parameters;
            assert!((p.value(1) - truth[0]).abs() < 1e-4, "{}", p.value(1));
            assert!((p.value(2) - truth[1]).abs() < 1e-4, "{}", p.value(2));
        }
    }

    #[test]
    fn worker_count_does_not_change_results() {
        let run = |workers: usize| {
            let s = FitSettings {
                n_workers: workers,
                ..settings()
            };
            let mut c = ForwardModelCollection::new(line_observations(4), components(false), s, meta()).unwrap();
            c.run().unwrap();
            c
        };
        let one = run(1);
        let many = run(3);
        assert_eq!(one.params(), many.params());
        assert_eq!(one.table(), many.table());
        assert_eq!(one.templates().star, many.templates().star);
    }

    #[test]
    fn flat_start_bootstraps_then_refines_under_the_clamp() {
        for kind in [AugmenterKind::CubicSplineLsq, AugmenterKind::WeightedMedian] {
            let mut s = FitSettings {
                n_template_fits: 2,
                ..settings()
            };
            s.augmenter.kind = kind;
            let mut c = ForwardModelCollection::new(line_observations(4), components(false), s, meta()).unwrap();
            c.run().unwrap();

            assert_eq!(c.n_iters_opt(), 3);
            assert_eq!(c.summaries().len(), 3);
            assert!(!c.summaries()[0].star_enabled);
            // The bootstrap pass records no RVs.
            assert_eq!(c.table().n_columns(), 2);
            assert_eq!(c.table().columns()[0].iteration, 1);
            for star in c.stellar_templates() {
                assert!(star.iter().all(|v| *v <= 1.0));
            }
            assert!(c.templates().star.iter().all(|v| *v <= 1.0));
            assert_eq!(c.history()[0].results.len(), 3);
        }
    }

    #[test]
    fn bad_spectra_are_dropped_and_an_empty_order_fails() {
        let mut obs = line_observations(3);
        obs[1].flux = vec![f64::NAN; N_PIX];
        let c = ForwardModelCollection::new(obs, components(false), settings(), meta()).unwrap();
        assert_eq!(c.observations().len(), 2);
        assert_eq!(c.observations()[1].id, "s2");

        let dead: Vec<Observation> = line_observations(2)
            .into_iter()
            .map(|mut o| {
                o.flux = vec![-1.0; N_PIX];
                o
            })
            .collect();
        let err = ForwardModelCollection::new(dead, components(false), settings(), meta()).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_DATA);
    }

    #[test]
    fn observations_are_sorted_and_grouped_into_nights() {
        let mut obs = line_observations(4);
        obs.reverse();
        let c = ForwardModelCollection::new(obs, components(false), settings(), meta()).unwrap();
        let ids: Vec<&str> = c.observations().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["s0", "s1", "s2", "s3"]);
        assert_eq!(c.n_obs_nights(), [2, 2]);
    }

    #[test]
    fn archive_keeps_ccf_surfaces() {
        let s = FitSettings {
            xcorr: XcorrOptions {
                enabled: true,
                range: 2000.0,
                step: 100.0,
                crude_range: 20_000.0,
                crude_step: 1000.0,
                ..XcorrOptions::default()
            },
            ..settings()
        };
        let mut c = ForwardModelCollection::new(line_observations(2), components(false), s, meta()).unwrap();
        c.run().unwrap();
        let a = c.archive();
        assert_eq!(a.xcorrs.len(), a.n_columns());
        let last = a.xcorrs.last().unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].len(), 41);
        assert_eq!(a.xcorr_vels.last().unwrap()[0].len(), 41);
        assert!(last[0].iter().any(|v| v.is_finite()));
    }

    #[test]
    fn export_writes_archive_templates_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = ForwardModelCollection::new(line_observations(2), components(false), settings(), meta()).unwrap();
        c.run().unwrap();
        let written = c.export(dir.path()).unwrap();
        // Archive, two pass templates, history.
        assert_eq!(written.len(), 4);
        let archive = crate::io::read_rv_archive(&written[0]).unwrap();
        assert_eq!(archive.n_spec(), 2);
        assert_eq!(archive.n_columns(), 1);
        assert_eq!(archive.order_num, 3);
    }
}
