//! The composed forward model for one echelle order.
//!
//! `SpectralModel` is built once per order from the validated component set and
//! is shared (read-only) by every spectrum of that order. Each component owns a
//! contiguous block of every spectrum's `ParameterSet`; the block positions are
//! fixed at construction so the build path indexes parameters directly.
//!
//! Build order:
//!
//! 1. wavelength solution (data grid)
//! 2. high-resolution product: star, gas cell, tellurics, fringing
//! 3. additive residual-lab background
//! 4. LSF convolution
//! 5. renormalisation by a high percentile
//! 6. blaze
//! 7. resampling onto the data grid (NaN outside the model grid)

use std::ops::Range;

use crate::domain::{FitSettings, Observation};
use crate::error::AppError;
use crate::math::{ResampleKind, convolve_same, percentile, resample};
use crate::models::blaze::Blaze;
use crate::models::components::{Component, ModelGrid, SpectralFactor, TemplateSet};
use crate::models::fringing::FringingModel;
use crate::models::gas_cell::GasCellModel;
use crate::models::lsf::HermiteLsf;
use crate::models::registry::ComponentSet;
use crate::models::residual_lab::ResidualLab;
use crate::models::star::StarModel;
use crate::models::tellurics::TelluricModel;
use crate::models::wavelength::WavelengthSolution;
use crate::models::{Parameter, ParameterSet};

/// A component plus the parameter block it owns.
#[derive(Debug, Clone)]
pub struct Slot<C> {
    pub component: C,
    pub params: Range<usize>,
}

impl<C> Slot<C> {
    fn block<'a>(&self, set: &'a ParameterSet) -> &'a [Parameter] {
        set.slice(self.params.clone())
    }
}

/// Intermediate products of one model build.
///
/// Everything except the stellar factor, so callers that only move the star (the
/// cross-correlation grid, the joint template fit) can recompose cheaply.
#[derive(Debug, Clone)]
pub struct ModelParts {
    /// Data-grid wavelengths from the wavelength solution.
    pub wave_data: Vec<f64>,
    /// Product of the non-stellar multiplicative factors on the model grid.
    pub nostar_hr: Vec<f64>,
    /// Additive background on the model grid (zeros when absent).
    pub additive_hr: Option<Vec<f64>>,
    /// Normalised LSF kernel, if an LSF is configured.
    pub kernel: Option<Vec<f64>>,
    /// Blaze on the model grid (ones when absent).
    pub blaze_hr: Vec<f64>,
}

impl ModelParts {
    /// High-resolution spectrum before convolution.
    pub fn hr_unconvolved(&self, star_hr: Option<&[f64]>) -> Vec<f64> {
        let mut hr = self.nostar_hr.clone();
        if let Some(star) = star_hr {
            hr.iter_mut().zip(star).for_each(|(m, s)| *m *= s);
        }
        if let Some(add) = &self.additive_hr {
            hr.iter_mut().zip(add).for_each(|(m, a)| *m += a);
        }
        hr
    }

    pub fn convolve(&self, hr: &[f64]) -> Vec<f64> {
        match &self.kernel {
            Some(k) => convolve_same(hr, k),
            None => hr.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpectralModel {
    pub wavelength_solution: Slot<WavelengthSolution>,
    pub star: Option<Slot<StarModel>>,
    pub gas_cell: Option<Slot<GasCellModel>>,
    pub tellurics: Option<Slot<TelluricModel>>,
    pub fringing: Option<Slot<FringingModel>>,
    pub residual_lab: Option<Slot<ResidualLab>>,
    pub lsf: Option<Slot<HermiteLsf>>,
    pub blaze: Option<Slot<Blaze>>,
    pub grid: ModelGrid,
    renorm_percentile: f64,
    resample_kind: ResampleKind,
    n_params: usize,
}

/// Hands out consecutive parameter blocks while checking the per-spectrum counts agree.
struct SlotAllocator<'a> {
    observations: &'a [Observation],
    next: usize,
}

impl SlotAllocator<'_> {
    fn take<C: Component>(&mut self, component: C) -> Result<Slot<C>, AppError> {
        let mut count = None;
        for obs in self.observations {
            let n = component.init_parameters(obs)?.len();
            match count {
                None => count = Some(n),
                Some(c) if c != n => {
                    return Err(AppError::config(format!(
                        "Component '{}' contributes {n} parameters for '{}' but {c} for other spectra.",
                        component.name(),
                        obs.id
                    )));
                }
                Some(_) => {}
            }
        }
        let n = count.unwrap_or(0);
        let params = self.next..self.next + n;
        self.next += n;
        Ok(Slot { component, params })
    }

    fn take_opt<C: Component>(&mut self, component: Option<C>) -> Result<Option<Slot<C>>, AppError> {
        component.map(|c| self.take(c)).transpose()
    }
}

impl SpectralModel {
    /// Lay out parameter blocks and the high-resolution grid for `observations`.
    pub fn new(components: ComponentSet, observations: &[Observation], settings: &FitSettings) -> Result<Self, AppError> {
        let Some(first) = observations.first() else {
            return Err(AppError::data("Cannot build a spectral model without observations."));
        };

        let mut alloc = SlotAllocator {
            observations,
            next: 0,
        };
        let wavelength_solution = alloc.take(components.wavelength_solution)?;
        let star = alloc.take_opt(components.star)?;
        let gas_cell = alloc.take_opt(components.gas_cell)?;
        let tellurics = alloc.take_opt(components.tellurics)?;
        let fringing = alloc.take_opt(components.fringing)?;
        let residual_lab = alloc.take_opt(components.residual_lab)?;
        let lsf = alloc.take_opt(components.lsf)?;
        let blaze = alloc.take_opt(components.blaze)?;
        let n_params = alloc.next;

        // Template bounds: union of every spectrum's initial wavelength solution.
        let mut wave_min = f64::INFINITY;
        let mut wave_max = f64::NEG_INFINITY;
        for obs in observations {
            let params = wavelength_solution.component.init_parameters(obs)?;
            let (lo, hi) = wavelength_solution.component.bounds(&params, obs).ok_or_else(|| {
                AppError::config(format!("Spectrum '{}' has no usable initial wavelength solution.", obs.id))
            })?;
            wave_min = wave_min.min(lo);
            wave_max = wave_max.max(hi);
        }

        let n_model_pix = settings.resolution_factor * first.n_pix();
        let grid = ModelGrid::new(wave_min, wave_max, settings.wave_pad, n_model_pix)?;
        log::debug!(
            "Model grid: {} points over [{:.4}, {:.4}] (dl = {:.3e}), {n_params} parameters per spectrum.",
            grid.len(),
            grid.wave[0],
            grid.wave[grid.len() - 1],
            grid.dl
        );

        Ok(Self {
            wavelength_solution,
            star,
            gas_cell,
            tellurics,
            fringing,
            residual_lab,
            lsf,
            blaze,
            grid,
            renorm_percentile: settings.renorm_percentile,
            resample_kind: settings.resample,
            n_params,
        })
    }

    pub fn n_params(&self) -> usize {
        self.n_params
    }

    /// Fresh, locked starting parameters for `obs`.
    pub fn initial_parameters(&self, obs: &Observation) -> Result<ParameterSet, AppError> {
        let mut set = ParameterSet::new();
        let mut push = |params: Vec<Parameter>| -> Result<(), AppError> {
            for p in params {
                set.insert(p)?;
            }
            Ok(())
        };
        push(self.wavelength_solution.component.init_parameters(obs)?)?;
        if let Some(s) = &self.star {
            push(s.component.init_parameters(obs)?)?;
        }
        if let Some(s) = &self.gas_cell {
            push(s.component.init_parameters(obs)?)?;
        }
        if let Some(s) = &self.tellurics {
            push(s.component.init_parameters(obs)?)?;
        }
        if let Some(s) = &self.fringing {
            push(s.component.init_parameters(obs)?)?;
        }
        if let Some(s) = &self.residual_lab {
            push(s.component.init_parameters(obs)?)?;
        }
        if let Some(s) = &self.lsf {
            push(s.component.init_parameters(obs)?)?;
        }
        if let Some(s) = &self.blaze {
            push(s.component.init_parameters(obs)?)?;
        }
        if set.len() != self.n_params {
            return Err(AppError::config(format!(
                "Spectrum '{}' produced {} parameters, expected {}.",
                obs.id,
                set.len(),
                self.n_params
            )));
        }
        set.lock()?;
        Ok(set)
    }

    /// Load every template onto the model grid.
    ///
    /// Returns the template set and whether the stellar template came from a file
    /// (as opposed to the flat unit start).
    pub fn load_templates(&self) -> Result<(TemplateSet, bool), AppError> {
        let wave = &self.grid.wave;
        let (star, from_file) = match &self.star {
            Some(s) => (s.component.initial_template(wave)?, s.component.input_file().is_some()),
            None => (vec![1.0; wave.len()], false),
        };
        let mut templates = TemplateSet {
            star,
            fixed: Default::default(),
        };
        let loaders: [Option<&dyn Component>; 3] = [
            self.gas_cell.as_ref().map(|s| &s.component as &dyn Component),
            self.tellurics.as_ref().map(|s| &s.component as &dyn Component),
            self.residual_lab.as_ref().map(|s| &s.component as &dyn Component),
        ];
        for component in loaders.into_iter().flatten() {
            for (key, flux) in component.load_templates(wave)? {
                templates.fixed.insert(key, flux);
            }
        }
        Ok((templates, from_file))
    }

    /// Index of the stellar velocity parameter, if a star is configured.
    pub fn star_vel_index(&self) -> Option<usize> {
        self.star.as_ref().map(|s| s.params.start)
    }

    /// Data-grid wavelengths.
    pub fn wavelength_solution(&self, params: &ParameterSet, obs: &Observation) -> Vec<f64> {
        let ws = &self.wavelength_solution;
        ws.component.build(ws.block(params), obs)
    }

    /// Shifted stellar template on the model grid.
    pub fn star_hr(&self, params: &ParameterSet, templates: &TemplateSet) -> Option<Vec<f64>> {
        self.star
            .as_ref()
            .map(|s| s.component.build(s.block(params), templates, &self.grid))
    }

    /// Telluric transmission on the model grid, convolved with the LSF.
    pub fn tellurics_hr(&self, params: &ParameterSet, templates: &TemplateSet) -> Option<Vec<f64>> {
        let t = self.tellurics.as_ref()?;
        let flux = t.component.build(t.block(params), templates, &self.grid);
        Some(match self.lsf_kernel(params) {
            Some(k) => convolve_same(&flux, &k),
            None => flux,
        })
    }

    pub fn lsf_kernel(&self, params: &ParameterSet) -> Option<Vec<f64>> {
        self.lsf
            .as_ref()
            .map(|s| s.component.kernel(s.block(params), self.grid.dl))
    }

    /// Gaussian core width of the LSF (wavelength units).
    pub fn lsf_width(&self, params: &ParameterSet) -> Option<f64> {
        self.lsf.as_ref().map(|s| s.component.width(s.block(params)))
    }

    /// Everything but the star, evaluated at `params`.
    pub fn parts(&self, params: &ParameterSet, templates: &TemplateSet, obs: &Observation) -> ModelParts {
        let n = self.grid.len();
        let mut nostar_hr = vec![1.0; n];
        let mut multiply = |factor: Vec<f64>| {
            nostar_hr.iter_mut().zip(factor).for_each(|(m, f)| *m *= f);
        };
        if let Some(s) = &self.gas_cell {
            multiply(s.component.build(s.block(params), templates, &self.grid));
        }
        if let Some(s) = &self.tellurics {
            multiply(s.component.build(s.block(params), templates, &self.grid));
        }
        if let Some(s) = &self.fringing {
            multiply(s.component.build(s.block(params), templates, &self.grid));
        }
        let additive_hr = self
            .residual_lab
            .as_ref()
            .map(|s| s.component.build(s.block(params), templates, &self.grid));
        let blaze_hr = match &self.blaze {
            Some(s) => s.component.build(s.block(params), templates, &self.grid),
            None => vec![1.0; n],
        };
        ModelParts {
            wave_data: self.wavelength_solution(params, obs),
            nostar_hr,
            additive_hr,
            kernel: self.lsf_kernel(params),
            blaze_hr,
        }
    }

    /// Percentile scale applied between convolution and blaze.
    pub fn renorm_scale(&self, convolved: &[f64]) -> f64 {
        let p = percentile(convolved, self.renorm_percentile);
        if p.is_finite() && p > 0.0 { p } else { 1.0 }
    }

    /// Finish a build from precomputed parts and an optional stellar factor.
    ///
    /// `scale` overrides the renormalisation (the joint template fit holds it fixed).
    pub fn compose(&self, parts: &ModelParts, star_hr: Option<&[f64]>, scale: Option<f64>) -> Vec<f64> {
        let hr = parts.hr_unconvolved(star_hr);
        let mut conv = parts.convolve(&hr);
        let scale = scale.unwrap_or_else(|| self.renorm_scale(&conv));
        conv.iter_mut()
            .zip(&parts.blaze_hr)
            .for_each(|(m, b)| *m = *m / scale * b);
        resample(self.resample_kind, &parts.wave_data, &self.grid.wave, &conv)
    }

    /// Full forward model: `(data-grid wavelengths, model flux)`.
    ///
    /// With `include_star == false` the stellar factor is left out (flat-start
    /// bootstrap pass).
    pub fn build(
        &self,
        params: &ParameterSet,
        templates: &TemplateSet,
        obs: &Observation,
        include_star: bool,
    ) -> (Vec<f64>, Vec<f64>) {
        let parts = self.parts(params, templates, obs);
        let star = if include_star {
            self.star_hr(params, templates)
        } else {
            None
        };
        let flux = self.compose(&parts, star.as_deref(), None);
        (parts.wave_data, flux)
    }

    /// The renormalisation scale a build at `params` would use.
    pub fn scale_at(&self, params: &ParameterSet, templates: &TemplateSet, obs: &Observation, include_star: bool) -> f64 {
        let parts = self.parts(params, templates, obs);
        let star = if include_star {
            self.star_hr(params, templates)
        } else {
            None
        };
        self.renorm_scale(&parts.convolve(&parts.hr_unconvolved(star.as_deref())))
    }
}
