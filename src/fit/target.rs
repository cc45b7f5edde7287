//! The fit metric minimised for every spectrum.

use crate::domain::Observation;
use crate::models::{ParameterSet, SpectralModel, TemplateSet};

/// RMS of `data - model` over good pixels.
///
/// A pixel counts when its mask is set and both data and model are finite; NaN
/// pixels drop out of the denominator on every call. With `flag_n_worst > 0`
/// the largest squared residuals are discarded first (never all of them).
/// Returns NaN when no pixel survives.
pub fn rms_metric(data: &[f64], model: &[f64], mask: &[f64], flag_n_worst: usize) -> f64 {
    let mut sq: Vec<f64> = data
        .iter()
        .zip(model)
        .zip(mask)
        .filter(|((d, m), w)| **w > 0.5 && d.is_finite() && m.is_finite())
        .map(|((d, m), _)| (d - m) * (d - m))
        .collect();
    if sq.is_empty() {
        return f64::NAN;
    }
    if flag_n_worst > 0 && sq.len() > flag_n_worst {
        sq.sort_by(|a, b| b.total_cmp(a));
        sq.drain(..flag_n_worst);
    }
    (sq.iter().sum::<f64>() / sq.len() as f64).sqrt()
}

/// Everything needed to evaluate one spectrum's fit metric.
#[derive(Debug, Clone, Copy)]
pub struct FitTarget<'a> {
    pub model: &'a SpectralModel,
    pub templates: &'a TemplateSet,
    pub obs: &'a Observation,
    /// False on the flat-start bootstrap pass.
    pub include_star: bool,
    pub flag_n_worst: usize,
}

impl FitTarget<'_> {
    pub fn evaluate(&self, params: &ParameterSet) -> f64 {
        let (_, model) = self.model.build(params, self.templates, self.obs, self.include_star);
        rms_metric(&self.obs.flux, &model, &self.obs.mask, self.flag_n_worst)
    }
}
