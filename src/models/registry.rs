//! Blueprint-driven component construction.
//!
//! A registry maps a component class name (the blueprint's `class` key) to a
//! constructor. Building a model validates the whole blueprint map up front:
//! unknown roles, unknown classes, a class placed under the wrong role, and
//! missing required components are all configuration errors reported before any
//! fitting starts.

use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::Blueprint;
use crate::error::AppError;
use crate::models::blaze::Blaze;
use crate::models::components::{decode_settings, resolve_path};
use crate::models::fringing::FringingModel;
use crate::models::gas_cell::GasCellModel;
use crate::models::lsf::HermiteLsf;
use crate::models::residual_lab::ResidualLab;
use crate::models::star::StarModel;
use crate::models::tellurics::TelluricModel;
use crate::models::wavelength::WavelengthSolution;

/// Model roles, in build order.
pub const ROLES: [&str; 8] = [
    "wavelength_solution",
    "star",
    "gas_cell",
    "tellurics",
    "fringing",
    "residual_lab",
    "lsf",
    "blaze",
];

/// A constructed component tagged by role.
#[derive(Debug, Clone)]
pub enum AnyComponent {
    WavelengthSolution(WavelengthSolution),
    Star(StarModel),
    GasCell(GasCellModel),
    Tellurics(TelluricModel),
    Fringing(FringingModel),
    ResidualLab(ResidualLab),
    Lsf(HermiteLsf),
    Blaze(Blaze),
}

impl AnyComponent {
    pub fn role(&self) -> &'static str {
        match self {
            AnyComponent::WavelengthSolution(_) => "wavelength_solution",
            AnyComponent::Star(_) => "star",
            AnyComponent::GasCell(_) => "gas_cell",
            AnyComponent::Tellurics(_) => "tellurics",
            AnyComponent::Fringing(_) => "fringing",
            AnyComponent::ResidualLab(_) => "residual_lab",
            AnyComponent::Lsf(_) => "lsf",
            AnyComponent::Blaze(_) => "blaze",
        }
    }
}

/// Constructor signature: blueprint plus the directory relative paths resolve against.
pub type Constructor = fn(&Blueprint, &Path) -> Result<AnyComponent, AppError>;

/// The validated set of components for one order.
#[derive(Debug, Clone)]
pub struct ComponentSet {
    pub wavelength_solution: WavelengthSolution,
    pub star: Option<StarModel>,
    pub gas_cell: Option<GasCellModel>,
    pub tellurics: Option<TelluricModel>,
    pub fringing: Option<FringingModel>,
    pub residual_lab: Option<ResidualLab>,
    pub lsf: Option<HermiteLsf>,
    pub blaze: Option<Blaze>,
}

#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        let mut r = Self {
            constructors: BTreeMap::new(),
        };
        r.register("lagrange_wavesol", build_lagrange);
        r.register("fixed_wavesol", build_fixed_wavesol);
        r.register("star", build_star);
        r.register("gas_cell", build_gas_cell);
        r.register("tellurics", build_tellurics);
        r.register("fabry_perot_fringing", build_fringing);
        r.register("residual_lab", build_residual_lab);
        r.register("hermite_lsf", build_lsf);
        r.register("polynomial_blaze", build_polynomial_blaze);
        r.register("spline_blaze", build_spline_blaze);
        r
    }
}

impl ComponentRegistry {
    pub fn register(&mut self, class: &str, ctor: Constructor) {
        self.constructors.insert(class.to_string(), ctor);
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(|s| s.as_str())
    }

    /// Construct one component and check it fits the role it was configured under.
    pub fn build(&self, role: &str, blueprint: &Blueprint, base_dir: &Path) -> Result<AnyComponent, AppError> {
        if !ROLES.contains(&role) {
            return Err(AppError::config(format!(
                "Unknown model role '{role}' (expected one of {}).",
                ROLES.join(", ")
            )));
        }
        let ctor = self.constructors.get(&blueprint.class).ok_or_else(|| {
            AppError::config(format!(
                "Unknown component class '{}' for '{role}' (known: {}).",
                blueprint.class,
                self.classes().collect::<Vec<_>>().join(", ")
            ))
        })?;
        let component = ctor(blueprint, base_dir)?;
        if component.role() != role {
            return Err(AppError::config(format!(
                "Component class '{}' provides '{}', not '{role}'.",
                blueprint.class,
                component.role()
            )));
        }
        Ok(component)
    }

    /// Build every configured component and check the instrument's factor list.
    pub fn build_set(
        &self,
        blueprints: &BTreeMap<String, Blueprint>,
        required: &[String],
        base_dir: &Path,
    ) -> Result<ComponentSet, AppError> {
        for name in required {
            if !blueprints.contains_key(name) {
                return Err(AppError::config(format!(
                    "Required model component '{name}' has no blueprint."
                )));
            }
        }

        let mut wavelength_solution = None;
        let mut set = ComponentSet {
            wavelength_solution: WavelengthSolution::Fixed(crate::models::wavelength::FixedSettings {
                name: String::new(),
            }),
            star: None,
            gas_cell: None,
            tellurics: None,
            fringing: None,
            residual_lab: None,
            lsf: None,
            blaze: None,
        };

        for (role, blueprint) in blueprints {
            match self.build(role, blueprint, base_dir)? {
                AnyComponent::WavelengthSolution(c) => wavelength_solution = Some(c),
                AnyComponent::Star(c) => set.star = Some(c),
                AnyComponent::GasCell(c) => set.gas_cell = Some(c),
                AnyComponent::Tellurics(c) => set.tellurics = Some(c),
                AnyComponent::Fringing(c) => set.fringing = Some(c),
                AnyComponent::ResidualLab(c) => set.residual_lab = Some(c),
                AnyComponent::Lsf(c) => set.lsf = Some(c),
                AnyComponent::Blaze(c) => set.blaze = Some(c),
            }
        }

        set.wavelength_solution = wavelength_solution
            .ok_or_else(|| AppError::config("Exactly one 'wavelength_solution' blueprint is required."))?;
        Ok(set)
    }
}

fn build_lagrange(bp: &Blueprint, _base: &Path) -> Result<AnyComponent, AppError> {
    Ok(AnyComponent::WavelengthSolution(WavelengthSolution::Lagrange(decode_settings(
        "wavelength_solution",
        bp,
    )?)))
}

fn build_fixed_wavesol(bp: &Blueprint, _base: &Path) -> Result<AnyComponent, AppError> {
    Ok(AnyComponent::WavelengthSolution(WavelengthSolution::Fixed(decode_settings(
        "wavelength_solution",
        bp,
    )?)))
}

fn build_star(bp: &Blueprint, base: &Path) -> Result<AnyComponent, AppError> {
    let mut s: crate::models::star::StarSettings = decode_settings("star", bp)?;
    s.input_file = s.input_file.map(|p| resolve_path(base, &p));
    Ok(AnyComponent::Star(StarModel::new(s)))
}

fn build_gas_cell(bp: &Blueprint, base: &Path) -> Result<AnyComponent, AppError> {
    let mut s: crate::models::gas_cell::GasCellSettings = decode_settings("gas_cell", bp)?;
    s.input_file = resolve_path(base, &s.input_file);
    Ok(AnyComponent::GasCell(GasCellModel::new(s)))
}

fn build_tellurics(bp: &Blueprint, base: &Path) -> Result<AnyComponent, AppError> {
    let mut s: crate::models::tellurics::TelluricSettings = decode_settings("tellurics", bp)?;
    for species in s.species.values_mut() {
        species.input_file = resolve_path(base, &species.input_file);
    }
    Ok(AnyComponent::Tellurics(TelluricModel::new(s)?))
}

fn build_fringing(bp: &Blueprint, _base: &Path) -> Result<AnyComponent, AppError> {
    Ok(AnyComponent::Fringing(FringingModel::new(decode_settings("fringing", bp)?)))
}

fn build_residual_lab(bp: &Blueprint, base: &Path) -> Result<AnyComponent, AppError> {
    let mut s: crate::models::residual_lab::ResidualLabSettings = decode_settings("residual_lab", bp)?;
    s.input_file = resolve_path(base, &s.input_file);
    Ok(AnyComponent::ResidualLab(ResidualLab::new(s)))
}

fn build_lsf(bp: &Blueprint, _base: &Path) -> Result<AnyComponent, AppError> {
    Ok(AnyComponent::Lsf(HermiteLsf::new(decode_settings("lsf", bp)?)?))
}

fn build_polynomial_blaze(bp: &Blueprint, _base: &Path) -> Result<AnyComponent, AppError> {
    Ok(AnyComponent::Blaze(Blaze::polynomial(decode_settings("blaze", bp)?)?))
}

fn build_spline_blaze(bp: &Blueprint, _base: &Path) -> Result<AnyComponent, AppError> {
    Ok(AnyComponent::Blaze(Blaze::spline(decode_settings("blaze", bp)?)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bp(value: serde_json::Value) -> Blueprint {
        serde_json::from_value(value).unwrap()
    }

    fn blueprints() -> BTreeMap<String, Blueprint> {
        let mut m = BTreeMap::new();
        m.insert("wavelength_solution".into(), bp(json!({"class": "fixed_wavesol"})));
        m.insert(
            "blaze".into(),
            bp(json!({"class": "polynomial_blaze", "coeffs": [[0.5, 1.0, 1.5]]})),
        );
        m
    }

    #[test]
    fn builds_a_minimal_model() {
        let reg = ComponentRegistry::default();
        let set = reg
            .build_set(&blueprints(), &["wavelength_solution".into(), "blaze".into()], Path::new("."))
            .unwrap();
        assert!(set.blaze.is_some());
        assert!(set.star.is_none());
    }

    #[test]
    fn unknown_class_and_role_are_configuration_errors() {
        let reg = ComponentRegistry::default();
        let mut m = blueprints();
        m.insert("lsf".into(), bp(json!({"class": "voigt_lsf"})));
        assert_eq!(reg.build_set(&m, &[], Path::new(".")).unwrap_err().exit_code(), 2);

        let mut m = blueprints();
        m.insert("detector".into(), bp(json!({"class": "hermite_lsf", "width": [0.1, 0.2, 0.3]})));
        assert!(reg.build_set(&m, &[], Path::new(".")).is_err());
    }

    #[test]
    fn class_under_wrong_role_is_rejected() {
        let reg = ComponentRegistry::default();
        let mut m = blueprints();
        m.insert("lsf".into(), bp(json!({"class": "polynomial_blaze", "coeffs": [[1.0, 1.0, 1.0]]})));
        assert!(reg.build_set(&m, &[], Path::new(".")).is_err());
    }

    #[test]
    fn missing_required_component_is_fatal() {
        let reg = ComponentRegistry::default();
        let err = reg
            .build_set(&blueprints(), &["tellurics".into()], Path::new("."))
            .unwrap_err();
        assert!(err.to_string().contains("tellurics"));
    }

    #[test]
    fn missing_wavelength_solution_is_fatal() {
        let reg = ComponentRegistry::default();
        let mut m = blueprints();
        m.remove("wavelength_solution");
        assert!(reg.build_set(&m, &[], Path::new(".")).is_err());
    }
}
