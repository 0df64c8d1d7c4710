//! churnforge: customer churn prediction with a schema-consistent train/serve pipeline
//!
//! The offline side encodes a tabular export, rebalances the training split,
//! fits several classifiers and persists a versioned artifact bundle. The
//! serving side rebuilds one customer's feature vector against that bundle's
//! frozen column list, scaler and category levels before scoring it.

pub mod align;
pub mod cli;
pub mod config;
pub mod data;
pub mod encoder;
pub mod error;
pub mod metrics;
pub mod model;
pub mod profile;
pub mod registry;
pub mod resample;
pub mod scaler;
pub mod scorer;
pub mod training;
pub mod viz;

// Re-export public items for easier access
pub use align::{align, AlignedVector, AlignmentReport};
pub use cli::{Args, Command};
pub use config::AppConfig;
pub use data::{load_training_table, split_label, RawRecord, RawTable, RawValue};
pub use encoder::{encode_record, CategoryLevels, EncodedVector, Encoder};
pub use error::ChurnError;
pub use model::{ChurnClassifier, ClassifierSpec, ModelVariant, TrainedModel};
pub use profile::CustomerProfile;
pub use registry::{save_bundle, FeatureSchema, SchemaRegistry};
pub use scaler::StandardScaler;
pub use scorer::{ChurnPrediction, RiskBand, ServingContext};
pub use training::{run_training, train_from_csv, TrainingOutcome, TrainingResults};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
