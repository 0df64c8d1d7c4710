//! Configuration management for training and serving

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file picked up when `--config` is not given and the file exists
pub const DEFAULT_CONFIG_PATH: &str = "config/churnforge.toml";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub training: TrainingConfig,
    pub serving: ServingConfig,
    pub logging: LoggingConfig,
}

/// Offline pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Column holding the churn label
    pub label_column: String,
    /// Raw label value that means "churned" when the label column is text
    pub positive_label: String,
    /// Columns excluded by name before feature construction: identifiers, leakage,
    /// and geography the serving form never supplies
    pub leakage_columns: Vec<String>,
    /// Explicit categorical fields; `None` treats every text column as categorical
    pub categorical_columns: Option<Vec<String>>,
    /// Documented reference categories, overriding the lexicographic-first rule
    pub reference_categories: Vec<ReferenceCategory>,
    /// Fraction of rows held out for evaluation
    pub test_size: f64,
    /// Seed shared by the split, the resampler and the forest bootstrap
    pub random_seed: u64,
    /// Neighbours used when synthesizing minority samples
    pub smote_neighbors: usize,
    /// Trees in the random forest
    pub forest_trees: usize,
    /// Maximum depth of each forest tree
    pub forest_max_depth: usize,
    /// Neighbours consulted by the k-nearest-neighbours classifier
    pub knn_neighbors: usize,
    /// Iteration cap for logistic regression
    pub logistic_max_iterations: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            label_column: "Churn Label".to_string(),
            positive_label: "Yes".to_string(),
            leakage_columns: vec![
                "CustomerID".to_string(),
                "customer_id".to_string(),
                "Churn Value".to_string(),
                "Churn Score".to_string(),
                "Churn Reason".to_string(),
                "Count".to_string(),
                "Country".to_string(),
                "State".to_string(),
                "City".to_string(),
                "Zip Code".to_string(),
                "Lat Long".to_string(),
                "Latitude".to_string(),
                "Longitude".to_string(),
            ],
            categorical_columns: None,
            reference_categories: Vec::new(),
            test_size: 0.2,
            random_seed: 42,
            smote_neighbors: 5,
            forest_trees: 100,
            forest_max_depth: 10,
            knn_neighbors: 15,
            logistic_max_iterations: 1000,
        }
    }
}

/// A field whose baseline category is declared rather than derived
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReferenceCategory {
    pub field: String,
    pub value: String,
}

/// Serving-side configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Root of the artifact bundle (holds `CURRENT` and `runs/`)
    pub artifacts_dir: PathBuf,
    /// Model family loaded for scoring, independent of the training-time best
    pub served_model: String,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("models"),
            served_model: "random_forest".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, falling back to built-in defaults
    pub fn load() -> Result<Self> {
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            Self::load_from_path(default_path)
        } else {
            Self::load_layers(None)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_layers(Some(path.as_ref()))
    }

    fn load_layers(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(Environment::with_prefix("CHURNFORGE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
