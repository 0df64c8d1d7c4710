//! Command-line interface definitions and argument parsing

use crate::config::AppConfig;
use crate::profile::CustomerProfile;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Customer churn prediction: train classifiers offline, score one customer against the saved bundle
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a TOML config file [default: config/churnforge.toml if present]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Train every model variant on a CSV export and save the artifact bundle
    Train {
        /// Path to the input CSV file
        #[arg(short, long, default_value = "data/telco_churn.csv")]
        input: PathBuf,

        /// Artifact bundle root [default: serving.artifacts_dir]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the split/resampling/bootstrap seed
        #[arg(long)]
        seed: Option<u64>,

        /// Skip the model comparison chart
        #[arg(long)]
        no_chart: bool,
    },

    /// Score one customer against the current bundle
    Predict {
        /// Artifact bundle root [default: serving.artifacts_dir]
        #[arg(short, long)]
        models: Option<PathBuf>,

        /// Model variant to serve [default: serving.served_model]
        #[arg(long)]
        model: Option<String>,

        /// Print the prediction as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        profile: CustomerProfile,
    },

    /// Show the current bundle's identity, schema and results
    Inspect {
        /// Artifact bundle root [default: serving.artifacts_dir]
        #[arg(short, long)]
        models: Option<PathBuf>,

        /// Also list every feature column
        #[arg(long)]
        columns: bool,
    },
}

impl Args {
    /// Load the config file and apply command-line overrides
    pub fn resolve_config(&self) -> crate::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_from_path(path)?,
            None => AppConfig::load()?,
        };
        if self.verbose {
            config.logging.level = "debug".to_string();
        }

        match &self.command {
            Command::Train { output, seed, .. } => {
                if let Some(dir) = output {
                    config.serving.artifacts_dir = dir.clone();
                }
                if let Some(seed) = seed {
                    config.training.random_seed = *seed;
                }
            }
            Command::Predict { models, model, .. } => {
                if let Some(dir) = models {
                    config.serving.artifacts_dir = dir.clone();
                }
                if let Some(name) = model {
                    config.serving.served_model = name.clone();
                }
            }
            Command::Inspect { models, .. } => {
                if let Some(dir) = models {
                    config.serving.artifacts_dir = dir.clone();
                }
            }
        }
        Ok(config)
    }
}
