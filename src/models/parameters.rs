//! Named, bounded model parameters.
//!
//! A `ParameterSet` is the shared contract between the spectral model components
//! (which contribute parameters) and the optimizer (which moves the varying
//! subset around). Insertion order is preserved and is the order the optimizer
//! sees; components remember the index of each parameter they own so the hot
//! model-build path never does string lookups.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One scalar model parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    pub value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub vary: bool,
    /// Optional 1σ uncertainty, when a fitter provides one.
    pub uncertainty: Option<f64>,
}

impl Parameter {
    /// A varying parameter with bounds.
    pub fn new(name: impl Into<String>, value: f64, lower_bound: f64, upper_bound: f64) -> Self {
        Self {
            name: name.into(),
            value,
            lower_bound,
            upper_bound,
            vary: true,
            uncertainty: None,
        }
    }

    /// A fixed parameter (bounds collapse onto the value).
    pub fn fixed(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            lower_bound: value,
            upper_bound: value,
            vary: false,
            uncertainty: None,
        }
    }

    /// Build from a blueprint triple `[lower, start, upper]`.
    ///
    /// The parameter varies only when `lower < upper`.
    pub fn from_triple(name: impl Into<String>, triple: [f64; 3]) -> Self {
        let [lo, start, hi] = triple;
        let mut p = Self::new(name, start, lo, hi);
        p.vary = lo < hi;
        p
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clamp `v` into this parameter's bounds.
    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.lower_bound).min(self.upper_bound)
    }

    fn validate(&self) -> Result<(), AppError> {
        if !self.value.is_finite() {
            return Err(AppError::config(format!("Parameter '{}' has a non-finite value.", self.name)));
        }
        if self.vary {
            if !(self.lower_bound <= self.upper_bound) {
                return Err(AppError::config(format!(
                    "Parameter '{}' has lower bound {} above upper bound {}.",
                    self.name, self.lower_bound, self.upper_bound
                )));
            }
            if self.value < self.lower_bound || self.value > self.upper_bound {
                return Err(AppError::config(format!(
                    "Parameter '{}' starts at {} outside [{}, {}].",
                    self.name, self.value, self.lower_bound, self.upper_bound
                )));
            }
        }
        Ok(())
    }
}

/// Ordered, name-unique collection of parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    params: Vec<Parameter>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    locked: bool,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter and return its index. Names must be unique; a locked set
    /// refuses new members.
    pub fn insert(&mut self, p: Parameter) -> Result<usize, AppError> {
        if self.locked {
            return Err(AppError::config(format!(
                "Cannot add parameter '{}' to a locked parameter set.",
                p.name
            )));
        }
        if self.index.contains_key(&p.name) {
            return Err(AppError::config(format!("Duplicate parameter name '{}'.", p.name)));
        }
        let idx = self.params.len();
        self.index.insert(p.name.clone(), idx);
        self.params.push(p);
        Ok(idx)
    }

    /// Validate every parameter and freeze membership and bounds.
    pub fn lock(&mut self) -> Result<(), AppError> {
        for p in &self.params {
            p.validate()?;
        }
        self.locked = true;
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    /// Contiguous block of parameters owned by one component.
    pub fn slice(&self, range: std::ops::Range<usize>) -> &[Parameter] {
        &self.params[range]
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.index_of(name).map(|i| &self.params[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        // The name index is not serialized; fall back to a scan after a reload.
        match self.index.get(name) {
            Some(&i) => Some(i),
            None => self.params.iter().position(|p| p.name == name),
        }
    }

    /// Value of the parameter at `idx` (as returned by [`ParameterSet::insert`]).
    pub fn value(&self, idx: usize) -> f64 {
        self.params[idx].value
    }

    pub fn value_of(&self, name: &str) -> Result<f64, AppError> {
        self.get(name)
            .map(|p| p.value)
            .ok_or_else(|| AppError::config(format!("Unknown parameter '{name}'.")))
    }

    /// Set a value, clamped into bounds.
    pub fn set_value(&mut self, idx: usize, v: f64) {
        let p = &mut self.params[idx];
        p.value = p.clamp(v);
    }

    /// Toggle whether a parameter varies. Allowed on a locked set: the star's
    /// velocity is released once a real stellar template exists.
    pub fn set_vary(&mut self, idx: usize, vary: bool) -> Result<(), AppError> {
        let p = &mut self.params[idx];
        if vary && !(p.lower_bound < p.upper_bound) {
            return Err(AppError::config(format!(
                "Parameter '{}' has collapsed bounds and cannot vary.",
                p.name
            )));
        }
        p.vary = vary;
        Ok(())
    }

    /// Indices of the varying parameters, in set order.
    pub fn varying_indices(&self) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.vary)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn n_varying(&self) -> usize {
        self.params.iter().filter(|p| p.vary).count()
    }

    /// Values of the varying subset (the optimizer's state vector).
    pub fn varying_values(&self) -> Vec<f64> {
        self.params.iter().filter(|p| p.vary).map(|p| p.value).collect()
    }

    /// Write the optimizer's state vector back, clamping each entry into bounds.
    pub fn set_varying_values(&mut self, values: &[f64]) {
        for (p, &v) in self.params.iter_mut().filter(|p| p.vary).zip(values) {
            p.value = p.clamp(v);
        }
    }

    /// Bulk update: copy values for every name present in both sets.
    pub fn update_from(&mut self, other: &ParameterSet) {
        for p in self.params.iter_mut() {
            if let Some(src) = other.get(&p.name) {
                p.value = p.clamp(src.value);
                p.uncertainty = src.uncertainty;
            }
        }
    }

    /// Rebuild the name index (needed after deserialization).
    pub fn reindex(&mut self) {
        self.index = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
    }
}

impl std::ops::Index<usize> for ParameterSet {
    type Output = Parameter;

    fn index(&self, idx: usize) -> &Parameter {
        &self.params[idx]
    }
}
