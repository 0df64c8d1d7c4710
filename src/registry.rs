//! Versioned artifact bundle shared by the training and serving processes
//!
//! A bundle root holds a `CURRENT` pointer and one directory per training run:
//!
//! ```text
//! models/
//!   CURRENT
//!   runs/<run_id>/
//!     manifest.json  feature_names.txt  input_template.json
//!     category_levels.json  scaler.json  results.json
//!     <variant>_model.json ...  model_comparison.png
//! ```
//!
//! A run directory is written under a staging name and renamed into place, and
//! `CURRENT` is swapped through a temp file, so a reader sees either the old
//! bundle or the new one and never a mix.

use crate::encoder::{CategoryLevels, EncodedVector};
use crate::error::ChurnError;
use crate::model::{ChurnClassifier, ModelVariant, TrainedModel};
use crate::scaler::StandardScaler;
use crate::training::{TrainingOutcome, TrainingResults};
use crate::viz;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

pub const CURRENT_FILE: &str = "CURRENT";
pub const RUNS_DIR: &str = "runs";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const FEATURE_NAMES_FILE: &str = "feature_names.txt";
pub const TEMPLATE_FILE: &str = "input_template.json";
pub const LEVELS_FILE: &str = "category_levels.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const RESULTS_FILE: &str = "results.json";
pub const CHART_FILE: &str = "model_comparison.png";

/// Artifact file holding one fitted variant
pub fn model_file_name(variant: ModelVariant) -> String {
    format!("{}_model.json", variant.name())
}

/// Identity of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub crate_version: String,
    pub n_features: usize,
    pub variants: Vec<ModelVariant>,
    pub best: ModelVariant,
}

/// Frozen training-time feature space
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    ordered_columns: Vec<String>,
    zero_template: EncodedVector,
    levels: CategoryLevels,
}

impl FeatureSchema {
    pub fn new(ordered_columns: Vec<String>, levels: CategoryLevels) -> Self {
        let zero_template = EncodedVector::zeros(&ordered_columns);
        Self {
            ordered_columns,
            zero_template,
            levels,
        }
    }

    fn from_parts(
        ordered_columns: Vec<String>,
        zero_template: EncodedVector,
        levels: CategoryLevels,
    ) -> crate::Result<Self> {
        if zero_template.len() != ordered_columns.len() {
            anyhow::bail!(ChurnError::DimensionMismatch {
                context: "input template",
                expected: ordered_columns.len(),
                actual: zero_template.len(),
            });
        }
        if zero_template.columns() != ordered_columns.as_slice() {
            anyhow::bail!(ChurnError::CorruptArtifact {
                name: TEMPLATE_FILE,
                reason: "template columns differ from feature_names.txt".to_string(),
            });
        }
        if zero_template.values().iter().any(|&v| v != 0.0) {
            anyhow::bail!(ChurnError::CorruptArtifact {
                name: TEMPLATE_FILE,
                reason: "template holds non-zero values".to_string(),
            });
        }
        if let Some(column) = levels
            .indicator_columns()
            .into_iter()
            .find(|c| !ordered_columns.contains(c))
        {
            anyhow::bail!(ChurnError::CorruptArtifact {
                name: LEVELS_FILE,
                reason: format!("indicator {column} is not a feature column"),
            });
        }
        Ok(Self {
            ordered_columns,
            zero_template,
            levels,
        })
    }

    pub fn ordered_columns(&self) -> &[String] {
        &self.ordered_columns
    }

    pub fn zero_template(&self) -> &EncodedVector {
        &self.zero_template
    }

    pub fn levels(&self) -> &CategoryLevels {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.ordered_columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_columns.is_empty()
    }
}

/// A loaded, validated training run
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    run_dir: PathBuf,
    manifest: Manifest,
    schema: FeatureSchema,
    scaler: StandardScaler,
    results: TrainingResults,
}

impl SchemaRegistry {
    /// Load the run that `CURRENT` points at
    pub fn load<P: AsRef<Path>>(root: P) -> crate::Result<Self> {
        let root = root.as_ref();
        let run_id = read_artifact(root, CURRENT_FILE)?;
        let run_id = run_id.trim();
        if run_id.is_empty() {
            anyhow::bail!(ChurnError::CorruptArtifact {
                name: CURRENT_FILE,
                reason: "empty run pointer".to_string(),
            });
        }
        // The pointer must name a directory directly under runs/
        let mut components = Path::new(run_id).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            anyhow::bail!(ChurnError::CorruptArtifact {
                name: CURRENT_FILE,
                reason: format!("run pointer {run_id:?} is not a run directory name"),
            });
        }
        Self::load_run(root.join(RUNS_DIR).join(run_id))
    }

    /// Load a specific run directory and check its cross-file invariants
    pub fn load_run<P: AsRef<Path>>(run_dir: P) -> crate::Result<Self> {
        let run_dir = run_dir.as_ref().to_path_buf();

        let manifest: Manifest = read_json(&run_dir, MANIFEST_FILE)?;
        let ordered_columns: Vec<String> = read_artifact(&run_dir, FEATURE_NAMES_FILE)?
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        let zero_template: EncodedVector = read_json(&run_dir, TEMPLATE_FILE)?;
        let levels: CategoryLevels = read_json(&run_dir, LEVELS_FILE)?;
        let scaler: StandardScaler = read_json(&run_dir, SCALER_FILE)?;
        let results: TrainingResults = read_json(&run_dir, RESULTS_FILE)?;

        if ordered_columns.len() != manifest.n_features {
            anyhow::bail!(ChurnError::DimensionMismatch {
                context: "feature names vs manifest",
                expected: manifest.n_features,
                actual: ordered_columns.len(),
            });
        }
        if scaler.mean().len() != scaler.scale().len() {
            anyhow::bail!(ChurnError::CorruptArtifact {
                name: SCALER_FILE,
                reason: "mean and scale lengths differ".to_string(),
            });
        }
        if scaler.n_features() != ordered_columns.len() {
            anyhow::bail!(ChurnError::DimensionMismatch {
                context: "scaler vs feature names",
                expected: ordered_columns.len(),
                actual: scaler.n_features(),
            });
        }
        let schema = FeatureSchema::from_parts(ordered_columns, zero_template, levels)?;

        info!(
            run_id = %manifest.run_id,
            features = schema.len(),
            best = %manifest.best,
            "Loaded artifact bundle"
        );

        Ok(Self {
            run_dir,
            manifest,
            schema,
            scaler,
            results,
        })
    }

    /// Load one fitted variant of this run
    pub fn load_model(&self, variant: ModelVariant) -> crate::Result<TrainedModel> {
        let file_name = model_file_name(variant);
        let path = self.run_dir.join(&file_name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                anyhow::bail!(ChurnError::ArtifactMissing { name: "model", path })
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let model: TrainedModel =
            serde_json::from_str(&text).map_err(|e| ChurnError::CorruptArtifact {
                name: "model",
                reason: format!("{file_name}: {e}"),
            })?;

        if model.variant() != variant {
            anyhow::bail!(ChurnError::CorruptArtifact {
                name: "model",
                reason: format!("{file_name} holds a {} model", model.variant()),
            });
        }
        if model.n_features() != self.schema.len() {
            anyhow::bail!(ChurnError::DimensionMismatch {
                context: "model vs feature names",
                expected: self.schema.len(),
                actual: model.n_features(),
            });
        }
        debug!(model = %variant, path = %path.display(), "Loaded model");
        Ok(model)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn results(&self) -> &TrainingResults {
        &self.results
    }
}

/// Where a bundle was written
#[derive(Debug, Clone)]
pub struct SavedBundle {
    pub run_id: String,
    pub run_dir: PathBuf,
}

/// Persist a training run and make it the current bundle
///
/// # Arguments
/// * `root` - Bundle root directory, created if absent
/// * `outcome` - Result of a training run
/// * `render_chart` - Also draw `model_comparison.png` into the run directory
///
/// # Returns
/// * The run id and final run directory
pub fn save_bundle<P: AsRef<Path>>(
    root: P,
    outcome: &TrainingOutcome,
    render_chart: bool,
) -> crate::Result<SavedBundle> {
    let root = root.as_ref();
    let runs = root.join(RUNS_DIR);
    fs::create_dir_all(&runs)
        .with_context(|| format!("Failed to create {}", runs.display()))?;

    let created_at = Utc::now();
    let run_id = unique_run_id(&runs, &created_at);
    let staging = runs.join(format!(".staging-{run_id}"));
    let run_dir = runs.join(&run_id);

    let schema = FeatureSchema::new(outcome.ordered_columns.clone(), outcome.levels.clone());
    let manifest = Manifest {
        run_id: run_id.clone(),
        created_at,
        crate_version: env!("CARGO_PKG_VERSION").to_string(),
        n_features: schema.len(),
        variants: outcome.models.iter().map(TrainedModel::variant).collect(),
        best: outcome.results.best,
    };

    publish_run(&staging, &run_dir, |staging| {
        let mut feature_names = outcome.ordered_columns.join("\n");
        feature_names.push('\n');
        write_file(&staging.join(FEATURE_NAMES_FILE), feature_names.as_bytes())?;
        write_json(&staging.join(TEMPLATE_FILE), schema.zero_template())?;
        write_json(&staging.join(LEVELS_FILE), schema.levels())?;
        write_json(&staging.join(SCALER_FILE), &outcome.scaler)?;
        write_json(&staging.join(RESULTS_FILE), &outcome.results)?;
        for model in &outcome.models {
            write_json(&staging.join(model_file_name(model.variant())), model)?;
        }
        if render_chart {
            if let Err(e) =
                viz::create_model_comparison_chart(&outcome.results, &staging.join(CHART_FILE))
            {
                warn!(error = %e, "Could not render model comparison chart");
            }
        }
        // Manifest last: a staging directory without one is incomplete
        write_json(&staging.join(MANIFEST_FILE), &manifest)
    })?;

    let current = root.join(CURRENT_FILE);
    let current_tmp = current.with_extension("tmp");
    write_file(&current_tmp, run_id.as_bytes())?;
    fs::rename(&current_tmp, &current)
        .with_context(|| format!("Failed to update {}", current.display()))?;

    info!(run_id = %run_id, dir = %run_dir.display(), "Saved artifact bundle");
    Ok(SavedBundle { run_id, run_dir })
}

/// Fill a fresh staging directory with `write`, then rename it to `run_dir`
///
/// The staging directory is removed again if any write or the rename fails.
fn publish_run<F>(staging: &Path, run_dir: &Path, write: F) -> crate::Result<()>
where
    F: FnOnce(&Path) -> crate::Result<()>,
{
    if staging.exists() {
        fs::remove_dir_all(staging)?;
    }
    fs::create_dir_all(staging)
        .with_context(|| format!("Failed to create {}", staging.display()))?;

    let published = write(staging).and_then(|()| {
        fs::rename(staging, run_dir).with_context(|| {
            format!("Failed to move {} to {}", staging.display(), run_dir.display())
        })
    });
    if published.is_err() {
        if let Err(e) = fs::remove_dir_all(staging) {
            warn!(error = %e, dir = %staging.display(), "Could not remove staging directory");
        }
    }
    published
}

fn unique_run_id(runs: &Path, created_at: &DateTime<Utc>) -> String {
    let base = created_at.format("%Y%m%dT%H%M%SZ").to_string();
    let mut candidate = base.clone();
    let mut suffix = 1;
    while runs.join(&candidate).exists() {
        candidate = format!("{base}-{suffix}");
        suffix += 1;
    }
    candidate
}

fn write_file(path: &Path, bytes: &[u8]) -> crate::Result<()> {
    let mut file =
        fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> crate::Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    write_file(path, &json)
}

fn read_artifact(dir: &Path, name: &'static str) -> crate::Result<String> {
    let path = dir.join(name);
    match fs::read_to_string(&path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            anyhow::bail!(ChurnError::ArtifactMissing { name, path })
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn read_json<T: DeserializeOwned>(dir: &Path, name: &'static str) -> crate::Result<T> {
    let text = read_artifact(dir, name)?;
    let value = serde_json::from_str(&text).map_err(|e| ChurnError::CorruptArtifact {
        name,
        reason: e.to_string(),
    })?;
    Ok(value)
}
