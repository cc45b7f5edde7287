//! Per-spectrum fit history.
//!
//! One append-only log per spectrum, sized for the known number of passes up
//! front. Wavelength solutions and residuals are only kept when the run asks
//! for the fit-history archive; the fit results themselves are always kept.

use serde::Serialize;

use crate::domain::FitResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumHistory {
    pub id: String,
    pub results: Vec<FitResult>,
    pub waves: Vec<Vec<f64>>,
    pub residuals: Vec<Vec<f64>>,
}

impl SpectrumHistory {
    pub fn with_capacity(id: impl Into<String>, n_passes: usize) -> Self {
        Self {
            id: id.into(),
            results: Vec::with_capacity(n_passes),
            waves: Vec::with_capacity(n_passes),
            residuals: Vec::with_capacity(n_passes),
        }
    }

    pub fn record(&mut self, result: FitResult, arrays: Option<(Vec<f64>, Vec<f64>)>) {
        self.results.push(result);
        if let Some((wave, resid)) = arrays {
            self.waves.push(wave);
            self.residuals.push(resid);
        }
    }

    pub fn last(&self) -> Option<&FitResult> {
        self.results.last()
    }

    pub fn n_failed(&self) -> usize {
        self.results.iter().filter(|r| r.failed()).count()
    }
}

/// The fit-history archive of one order.
#[derive(Debug, Clone, Serialize)]
pub struct FitHistory<'a> {
    pub order_num: usize,
    pub spectra: &'a [SpectrumHistory],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParameterSet;

    fn result(iteration: usize, metric: f64) -> FitResult {
        FitResult {
            iteration,
            best_parameters: ParameterSet::new(),
            fit_metric: metric,
            n_function_calls: 10,
        }
    }

    #[test]
    fn arrays_are_optional() {
        let mut h = SpectrumHistory::with_capacity("a", 3);
        h.record(result(0, 0.1), None);
        h.record(result(1, f64::NAN), Some((vec![1.0], vec![0.0])));
        assert_eq!(h.results.len(), 2);
        assert_eq!(h.waves.len(), 1);
        assert_eq!(h.n_failed(), 1);
        assert_eq!(h.last().map(|r| r.iteration), Some(1));
    }
}
