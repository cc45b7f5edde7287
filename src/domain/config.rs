//! Run configuration.
//!
//! A run is described by one JSON file:
//!
//! - `settings`: knobs for the iteration loop (how many template fits, which
//!   augmenter, worker count, cross-correlation grid, ...)
//! - `blueprints`: one entry per spectral model role, each naming a component
//!   class plus its settings and `[lower, start, upper]` parameter triples
//! - `required_components`: the instrument's factor list, checked at startup
//! - `orders`: per-order inputs and blueprint overrides
//!
//! Everything except `orders` and the wavelength solution blueprint has a default.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::fit::NelderMeadOptions;
use crate::math::ResampleKind;

/// Top-level run file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Free-form target name, copied into archives.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub settings: FitSettings,
    pub blueprints: BTreeMap<String, Blueprint>,
    #[serde(default = "default_required_components")]
    pub required_components: Vec<String>,
    pub orders: Vec<OrderInput>,
}

fn default_required_components() -> Vec<String> {
    vec!["wavelength_solution".to_string()]
}

impl RunConfig {
    /// Blueprints for one order: shared blueprints with that order's overrides
    /// merged key by key on top.
    pub fn blueprints_for(&self, order: &OrderInput) -> Result<BTreeMap<String, Blueprint>, AppError> {
        let mut out = self.blueprints.clone();
        for (role, patch) in &order.blueprint_overrides {
            let Some(base) = out.get_mut(role) else {
                return Err(AppError::config(format!(
                    "Order {} overrides unknown blueprint '{role}'.",
                    order.order_num
                )));
            };
            for (k, v) in patch {
                if k == "class" {
                    let class = v.as_str().ok_or_else(|| {
                        AppError::config(format!("Blueprint '{role}' override has a non-string class."))
                    })?;
                    base.class = class.to_string();
                } else {
                    base.settings.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(out)
    }
}

/// One component blueprint: a class name plus class-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub class: String,
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

/// Inputs for a single echelle order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInput {
    pub order_num: usize,
    /// Spectrum CSV files, in the same order as rows of `bary_file`.
    pub spectra: Vec<PathBuf>,
    /// CSV with `bjd,bc_vel` rows, one per spectrum.
    pub bary_file: PathBuf,
    #[serde(default)]
    pub blueprint_overrides: BTreeMap<String, serde_json::Map<String, serde_json::Value>>,
}

/// Settings that control one order's iteration loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitSettings {
    /// Number of template-refinement iterations (RV-producing passes).
    pub n_template_fits: usize,
    /// High-resolution model pixels per data pixel.
    pub resolution_factor: usize,
    /// Pixels cropped at `[left, right]` ends of every spectrum.
    pub crop_pix: [usize; 2],
    /// Worker threads for per-spectrum fits and cross-correlation (1 = sequential).
    pub n_workers: usize,
    /// Padding (wavelength units) of the high-resolution grid beyond the model bounds.
    pub wave_pad: f64,
    /// Percentile used to renormalise the convolved model before the blaze.
    pub renorm_percentile: f64,
    pub resample: ResampleKind,
    /// Uncertainties above this (normalised flux units) are masked.
    pub max_unc: f64,
    /// Running-median window (pixels) for the trend-deviation mask.
    pub trend_window: usize,
    /// Pixels further than this from the running-median trend are masked.
    pub trend_threshold: f64,
    /// Divide each spectrum by its trial continuum fit at ingestion.
    pub remove_continuum: bool,
    /// Drop this many worst squared residuals from every RMS evaluation.
    pub flag_n_worst_pixels: usize,
    /// Outlier rejection threshold (robust sigmas) for nightly binning.
    pub nightly_outlier_sigma: Option<f64>,
    /// Observations closer than this (days) belong to the same night.
    pub night_gap_days: f64,
    pub optimizer: NelderMeadOptions,
    pub xcorr: XcorrOptions,
    pub augmenter: AugmenterSettings,
    pub nights_for_template: NightsForTemplate,
    pub warm_start: WarmStart,
    /// Keep per-iteration models and residuals for the fit-history archive.
    pub save_fit_history: bool,
    pub output_dir: PathBuf,
    /// Run tag used in output file names; a timestamp when absent.
    pub tag: Option<String>,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            n_template_fits: 10,
            resolution_factor: 8,
            crop_pix: [10, 10],
            n_workers: 1,
            wave_pad: 15.0,
            renorm_percentile: 99.9,
            resample: ResampleKind::Linear,
            max_unc: 0.5,
            trend_window: 7,
            trend_threshold: 0.3,
            remove_continuum: false,
            flag_n_worst_pixels: 0,
            nightly_outlier_sigma: Some(5.0),
            night_gap_days: 0.5,
            optimizer: NelderMeadOptions::default(),
            xcorr: XcorrOptions::default(),
            augmenter: AugmenterSettings::default(),
            nights_for_template: NightsForTemplate::All,
            warm_start: WarmStart::Fitted,
            save_fit_history: true,
            output_dir: PathBuf::from("output"),
            tag: None,
        }
    }
}

impl FitSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.n_template_fits == 0 {
            return Err(AppError::config("n_template_fits must be >= 1."));
        }
        if self.resolution_factor == 0 {
            return Err(AppError::config("resolution_factor must be >= 1."));
        }
        if self.n_workers == 0 {
            return Err(AppError::config("n_workers must be >= 1."));
        }
        if !(self.renorm_percentile > 0.0 && self.renorm_percentile <= 100.0) {
            return Err(AppError::config("renorm_percentile must be in (0, 100]."));
        }
        if !(self.night_gap_days > 0.0) {
            return Err(AppError::config("night_gap_days must be > 0."));
        }
        if let Some(k) = self.nightly_outlier_sigma {
            if !(k > 0.0) {
                return Err(AppError::config("nightly_outlier_sigma must be > 0."));
            }
        }
        self.xcorr.validate()?;
        self.augmenter.validate()?;
        Ok(())
    }
}

/// Velocity grid settings for the cross-correlation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XcorrOptions {
    /// Run the per-iteration CCF (RVs from cross-correlation plus bisector spans).
    pub enabled: bool,
    /// Half-width (m/s) of the per-iteration CCF grid around the fitted velocity.
    pub range: f64,
    /// Step (m/s) of the per-iteration CCF grid.
    pub step: f64,
    /// Half-width (m/s) of the pre-fit brute-force search around `-bc_vel`.
    pub crude_range: f64,
    /// Step (m/s) of the pre-fit brute-force search.
    pub crude_step: f64,
    /// Depth levels (fraction of the CCF depth) used for bisectors.
    pub n_bisector_levels: usize,
}

impl Default for XcorrOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            range: 10_000.0,
            step: 50.0,
            crude_range: 100_000.0,
            crude_step: 500.0,
            n_bisector_levels: 50,
        }
    }
}

impl XcorrOptions {
    pub fn validate(&self) -> Result<(), AppError> {
        for (name, v) in [
            ("range", self.range),
            ("step", self.step),
            ("crude_range", self.crude_range),
            ("crude_step", self.crude_step),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(AppError::config(format!("xcorr.{name} must be finite and > 0.")));
            }
        }
        if self.step > self.range || self.crude_step > self.crude_range {
            return Err(AppError::config("xcorr steps must not exceed their ranges."));
        }
        Ok(())
    }
}

/// Template augmentation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AugmenterKind {
    /// Least-squares cubic spline through pooled rest-frame residuals.
    CubicSplineLsq,
    /// Per-pixel weighted median of interpolated residuals.
    WeightedMedian,
    /// Per-pixel weighted mean with 3σ rejection.
    WeightedAverage,
    /// Joint gradient-based fit of every template pixel.
    GlobalFit,
}

impl AugmenterKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            AugmenterKind::CubicSplineLsq => "cubic spline LSQ",
            AugmenterKind::WeightedMedian => "weighted median",
            AugmenterKind::WeightedAverage => "weighted average",
            AugmenterKind::GlobalFit => "global fit",
        }
    }
}

/// Augmenter choice plus its tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmenterSettings {
    pub kind: AugmenterKind,
    /// Number of bins of the barycentric-velocity histogram used for number weights.
    pub bc_hist_bins: usize,
    /// Padding (m/s) of the histogram range beyond the extreme barycentric velocities.
    pub bc_hist_pad: f64,
    /// Spline fits ignore spectra whose `1/rms²` weight falls below this once the
    /// star is being fit.
    pub min_rms_weight: f64,
    /// Continuum estimate for the bootstrap pass: window width (wavelength units).
    pub continuum_width: f64,
    /// Continuum estimate for the bootstrap pass: running quantile.
    pub continuum_quantile: f64,
    /// Continuum estimate for the bootstrap pass: knots of the smoothing interpolant.
    pub continuum_knots: usize,
    /// Rejection threshold (weighted sigmas) for the weighted average.
    pub average_clip_sigma: f64,
    pub global_epochs: usize,
    pub global_learning_rate: f64,
}

impl Default for AugmenterSettings {
    fn default() -> Self {
        Self {
            kind: AugmenterKind::CubicSplineLsq,
            bc_hist_bins: 10,
            bc_hist_pad: 1.0,
            min_rms_weight: 100.0,
            continuum_width: 7.0,
            continuum_quantile: 0.9,
            continuum_knots: 5,
            average_clip_sigma: 3.0,
            global_epochs: 400,
            global_learning_rate: 1e-3,
        }
    }
}

impl AugmenterSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.bc_hist_bins == 0 {
            return Err(AppError::config("augmenter.bc_hist_bins must be >= 1."));
        }
        if !(self.global_learning_rate > 0.0) {
            return Err(AppError::config("augmenter.global_learning_rate must be > 0."));
        }
        if self.continuum_knots < 2 {
            return Err(AppError::config("augmenter.continuum_knots must be >= 2."));
        }
        Ok(())
    }
}

/// Which nights contribute to template augmentation.
///
/// JSON: `"all"`, `"best"`, or `{"nights": [1, 4]}` with 1-based night numbers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NightsForTemplate {
    #[default]
    All,
    /// The night with the highest co-added S/N (`sqrt(Σ 1/rms²)`).
    Best,
    Nights(Vec<usize>),
}

/// How the next iteration's stellar velocity is seeded once a CCF velocity exists.
///
/// JSON: `"fitted"`, `"xcorr"`, or `{"xcorr_if_disagree": 500.0}` (threshold in m/s).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmStart {
    /// Start from the previous best-fit velocity.
    #[default]
    Fitted,
    /// Start from the cross-correlation velocity.
    Xcorr,
    /// Use the cross-correlation velocity only when it differs from the fitted
    /// velocity by more than the threshold.
    XcorrIfDisagree(f64),
}

impl WarmStart {
    /// Pick the starting velocity for the next fit.
    pub fn choose(self, fitted: f64, xcorr: Option<f64>) -> f64 {
        match (self, xcorr) {
            (_, None) => fitted,
            (WarmStart::Fitted, _) => fitted,
            (_, Some(x)) if !x.is_finite() => fitted,
            (WarmStart::Xcorr, Some(x)) => x,
            (WarmStart::XcorrIfDisagree(threshold), Some(x)) => {
                if (x - fitted).abs() > threshold {
                    x
                } else {
                    fitted
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_from_empty_json() {
        let s: FitSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.n_template_fits, 10);
        assert_eq!(s.augmenter.bc_hist_bins, 10);
        assert_eq!(s.nights_for_template, NightsForTemplate::All);
        s.validate().unwrap();
    }

    #[test]
    fn enums_parse_from_json() {
        let n: NightsForTemplate = serde_json::from_str(r#"{"nights": [1, 3]}"#).unwrap();
        assert_eq!(n, NightsForTemplate::Nights(vec![1, 3]));
        let w: WarmStart = serde_json::from_str(r#"{"xcorr_if_disagree": 500.0}"#).unwrap();
        assert_eq!(w, WarmStart::XcorrIfDisagree(500.0));
        let k: AugmenterKind = serde_json::from_str(r#""weighted_median""#).unwrap();
        assert_eq!(k, AugmenterKind::WeightedMedian);
    }

    #[test]
    fn warm_start_policies() {
        assert_eq!(WarmStart::Fitted.choose(10.0, Some(900.0)), 10.0);
        assert_eq!(WarmStart::Xcorr.choose(10.0, Some(900.0)), 900.0);
        assert_eq!(WarmStart::XcorrIfDisagree(500.0).choose(10.0, Some(300.0)), 10.0);
        assert_eq!(WarmStart::XcorrIfDisagree(500.0).choose(10.0, Some(900.0)), 900.0);
        assert_eq!(WarmStart::Xcorr.choose(10.0, Some(f64::NAN)), 10.0);
    }

    #[test]
    fn order_overrides_merge_onto_blueprints() {
        let cfg: RunConfig = serde_json::from_str(
            r#"{
                "blueprints": {
                    "wavelength_solution": {"class": "fixed_wavesol"},
                    "lsf": {"class": "hermite_lsf", "hermdeg": 0, "width": [0.01, 0.02, 0.03]}
                },
                "orders": [{
                    "order_num": 3,
                    "spectra": [],
                    "bary_file": "bc.csv",
                    "blueprint_overrides": {"lsf": {"width": [0.02, 0.025, 0.03]}}
                }]
            }"#,
        )
        .unwrap();
        let merged = cfg.blueprints_for(&cfg.orders[0]).unwrap();
        assert_eq!(merged["lsf"].settings["width"], serde_json::json!([0.02, 0.025, 0.03]));
        assert_eq!(merged["lsf"].settings["hermdeg"], serde_json::json!(0));
    }
}
