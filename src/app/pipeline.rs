//! Per-order fit pipeline shared by the `run` command and the tests.
//!
//! load config → resolve paths → build components → ingest → fit all passes →
//! export. Presentation stays in `app`.

use std::path::{Path, PathBuf};

use chrono::Local;

use crate::collection::{CollectionMeta, ForwardModelCollection};
use crate::domain::{FitSettings, OrderInput, RunConfig};
use crate::error::AppError;
use crate::io::{BaryFile, load_observations, read_json};
use crate::models::ComponentRegistry;

/// A run file plus the directory its relative paths are anchored to.
#[derive(Debug, Clone)]
pub struct LoadedRun {
    pub config: RunConfig,
    pub base_dir: PathBuf,
    pub tag: String,
}

/// Everything one fitted order leaves behind.
#[derive(Debug)]
pub struct OrderOutput {
    pub collection: ForwardModelCollection,
    pub written: Vec<PathBuf>,
}

/// Read a run file. Relative spectra, barycentric and output
/// paths are re-anchored on the file's directory.
pub fn load_run(path: &Path) -> Result<LoadedRun, AppError> {
    let mut config: RunConfig = read_json(path)?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    if config.orders.is_empty() {
        return Err(AppError::config(format!("'{}' lists no orders.", path.display())));
    }
    for order in config.orders.iter_mut() {
        resolve_order_paths(order, &base_dir);
    }
    config.settings.output_dir = anchor(&base_dir, &config.settings.output_dir);

    let tag = config
        .settings
        .tag
        .clone()
        .unwrap_or_else(|| Local::now().format("%Y%m%d_%H%M%S").to_string());
    Ok(LoadedRun { config, base_dir, tag })
}

fn anchor(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() { p.to_path_buf() } else { base.join(p) }
}

fn resolve_order_paths(order: &mut OrderInput, base: &Path) {
    for p in order.spectra.iter_mut() {
        *p = anchor(base, p);
    }
    order.bary_file = anchor(base, &order.bary_file);
}

/// Fit one order end to end and export its products.
pub fn run_order(run: &LoadedRun, order: &OrderInput, settings: &FitSettings) -> Result<OrderOutput, AppError> {
    let n = order.order_num;
    let ctx = |e: AppError| e.context(format!("Order {n}"));

    let blueprints = run.config.blueprints_for(order).map_err(ctx)?;
    let components = ComponentRegistry::default()
        .build_set(&blueprints, &run.config.required_components, &run.base_dir)
        .map_err(ctx)?;

    let observations = load_observations(order, &BaryFile(order.bary_file.clone())).map_err(ctx)?;
    log::info!("Order {n}: loaded {} of {} spectra.", observations.len(), order.spectra.len());

    let meta = CollectionMeta {
        order_num: n,
        target: run.config.target.clone(),
        tag: run.tag.clone(),
    };
    let mut collection = ForwardModelCollection::new(observations, components, settings.clone(), meta).map_err(ctx)?;
    collection.run().map_err(ctx)?;
    let written = collection.export(&settings.output_dir).map_err(ctx)?;

    Ok(OrderOutput { collection, written })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SynthSettings, generate, write_dataset};

    #[test]
    fn relative_paths_are_anchored_on_the_config_dir() {
        let mut order = OrderInput {
            order_num: 2,
            spectra: vec![PathBuf::from("a.csv"), PathBuf::from("/abs/b.csv")],
            bary_file: PathBuf::from("bc.csv"),
            blueprint_overrides: Default::default(),
        };
        resolve_order_paths(&mut order, Path::new("/data/run"));
        assert_eq!(order.spectra[0], PathBuf::from("/data/run/a.csv"));
        assert_eq!(order.spectra[1], PathBuf::from("/abs/b.csv"));
        assert_eq!(order.bary_file, PathBuf::from("/data/run/bc.csv"));
    }

    #[test]
    fn synthetic_dataset_runs_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let synth = SynthSettings {
            n_nights: 2,
            spectra_per_night: 2,
            n_pix: 300,
            n_lines: 10,
            ..SynthSettings::default()
        };
        let run_path = write_dataset(dir.path(), &generate(&synth).unwrap(), &synth).unwrap();

        let mut run = load_run(&run_path).unwrap();
        run.config.settings.n_template_fits = 1;
        run.config.settings.tag = Some("e2e".into());
        run.tag = "e2e".into();
        assert_eq!(run.config.settings.output_dir, dir.path().join("output"));

        let order = run.config.orders[0].clone();
        let settings = run.config.settings.clone();
        let out = run_order(&run, &order, &settings).unwrap();
        assert_eq!(out.collection.observations().len(), 4);
        assert!(out.written.iter().all(|p| p.exists()));
        assert_eq!(out.collection.table().n_columns(), 1);
    }
}
