//! Serving context and single-record scoring

use crate::align::{align, AlignedVector, AlignmentReport};
use crate::data::RawRecord;
use crate::error::ChurnError;
use crate::model::{ChurnClassifier, ModelVariant, TrainedModel, DECISION_THRESHOLD};
use crate::registry::SchemaRegistry;
use ndarray::Axis;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Fixed risk policy on the churn probability in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    /// Low below 40, High above 70, Medium in between (both ends inclusive)
    pub fn from_percent(probability_pct: f64) -> Self {
        if probability_pct > 70.0 {
            RiskBand::High
        } else if probability_pct >= 40.0 {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskBand::Low => write!(f, "Low"),
            RiskBand::Medium => write!(f, "Medium"),
            RiskBand::High => write!(f, "High"),
        }
    }
}

/// Outcome of scoring one customer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChurnPrediction {
    pub will_churn: bool,
    pub probability_pct: f64,
    pub risk: RiskBand,
    pub model: ModelVariant,
    pub run_id: String,
    /// Categorical values the model never saw, scored as the reference category
    pub unrecognized: Vec<String>,
}

/// Immutable serving state built once per process
///
/// Shared by reference across threads; the drift counter is the only mutable
/// part and is atomic.
#[derive(Debug)]
pub struct ServingContext {
    registry: SchemaRegistry,
    model: TrainedModel,
    unrecognized_total: AtomicU64,
}

impl ServingContext {
    /// Load the current bundle and the named model family
    ///
    /// Any missing or inconsistent artifact fails here, before a request is served.
    pub fn load<P: AsRef<Path>>(artifacts_dir: P, model_name: &str) -> crate::Result<Self> {
        let variant: ModelVariant = model_name.parse()?;
        let registry = SchemaRegistry::load(artifacts_dir)?;
        Self::from_registry(registry, variant)
    }

    pub fn from_registry(registry: SchemaRegistry, variant: ModelVariant) -> crate::Result<Self> {
        let model = registry.load_model(variant)?;
        info!(
            run_id = %registry.manifest().run_id,
            model = %variant,
            best = %registry.manifest().best,
            "Serving context ready"
        );
        Ok(Self {
            registry,
            model,
            unrecognized_total: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn model_variant(&self) -> ModelVariant {
        self.model.variant()
    }

    /// Unrecognized categorical values seen since the context was built
    pub fn unrecognized_count(&self) -> u64 {
        self.unrecognized_total.load(Ordering::Relaxed)
    }

    /// Align a record against the bundle schema, recording drift
    pub fn align(&self, record: &RawRecord) -> crate::Result<(AlignedVector, AlignmentReport)> {
        let (aligned, report) = align(record, self.registry.schema())?;
        for unseen in &report.unrecognized {
            warn!(
                field = %unseen.field,
                value = %unseen.value,
                "Unrecognized category, scoring as reference"
            );
        }
        if !report.unrecognized.is_empty() {
            self.unrecognized_total
                .fetch_add(report.unrecognized.len() as u64, Ordering::Relaxed);
        }
        debug!(
            zero_filled = report.zero_filled.len(),
            dropped = report.dropped_columns.len(),
            "Aligned record"
        );
        Ok((aligned, report))
    }

    /// Scale an aligned vector and return the model's churn probability in [0, 1]
    pub fn probability(&self, aligned: &AlignedVector) -> crate::Result<f64> {
        let expected = self.registry.schema().len();
        if aligned.len() != expected || self.model.n_features() != expected {
            error!(
                expected,
                aligned = aligned.len(),
                model = self.model.n_features(),
                "Feature vector does not match the bundle schema"
            );
            anyhow::bail!(ChurnError::DimensionMismatch {
                context: "aligned vector",
                expected,
                actual: aligned.len(),
            });
        }

        let scaled = self.registry.scaler().transform_row(aligned.values())?;
        let proba = self
            .model
            .predict_proba(&scaled.insert_axis(Axis(0)))?;
        proba.get(0).copied().ok_or_else(|| {
            ChurnError::InvalidInput("model returned no probability".to_string()).into()
        })
    }

    /// Score one raw record end to end
    pub fn score(&self, record: &RawRecord) -> crate::Result<ChurnPrediction> {
        let (aligned, report) = self.align(record)?;
        let probability = self.probability(&aligned)?;
        let probability_pct = probability * 100.0;

        let prediction = ChurnPrediction {
            will_churn: probability > DECISION_THRESHOLD,
            probability_pct,
            risk: RiskBand::from_percent(probability_pct),
            model: self.model.variant(),
            run_id: self.registry.manifest().run_id.clone(),
            unrecognized: report
                .unrecognized
                .iter()
                .map(|u| format!("{}={}", u.field, u.value))
                .collect(),
        };
        info!(
            probability_pct = prediction.probability_pct,
            risk = %prediction.risk,
            will_churn = prediction.will_churn,
            "Scored customer"
        );
        Ok(prediction)
    }
}
