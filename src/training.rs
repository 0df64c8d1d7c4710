//! Offline pipeline: encode, split, rebalance, scale, fit every variant, select by F1

use crate::config::TrainingConfig;
use crate::data::{class_counts, load_training_table, split_label, LabeledTable};
use crate::encoder::{CategoryLevels, Encoder};
use crate::error::ChurnError;
use crate::metrics::{evaluate, ModelMetrics};
use crate::model::{ChurnClassifier, ModelVariant, TrainedModel};
use crate::resample::{ImbalanceCorrector, Smote};
use crate::scaler::StandardScaler;
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Row-partitioned matrices and labels
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub x_train: Array2<f64>,
    pub y_train: Array1<usize>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<usize>,
}

/// Split rows per class so both partitions keep the label proportions
///
/// Each class sends `round(n_class * test_size)` rows to the test partition,
/// at least one whenever the class has two or more rows.
pub fn stratified_split(
    records: &Array2<f64>,
    labels: &Array1<usize>,
    test_size: f64,
    seed: u64,
) -> crate::Result<TrainTestSplit> {
    if !(test_size > 0.0 && test_size < 1.0) {
        anyhow::bail!(ChurnError::InvalidInput(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }
    if records.nrows() != labels.len() {
        anyhow::bail!(ChurnError::DimensionMismatch {
            context: "split labels",
            expected: records.nrows(),
            actual: labels.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train_idx = Vec::new();
    let mut test_idx = Vec::new();
    for class in [0usize, 1] {
        let mut rows: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect();
        rows.shuffle(&mut rng);

        let mut n_test = (rows.len() as f64 * test_size).round() as usize;
        if rows.len() >= 2 {
            n_test = n_test.clamp(1, rows.len() - 1);
        }
        test_idx.extend_from_slice(&rows[..n_test]);
        train_idx.extend_from_slice(&rows[n_test..]);
    }
    train_idx.sort_unstable();
    test_idx.sort_unstable();

    if train_idx.is_empty() || test_idx.is_empty() {
        anyhow::bail!(ChurnError::InsufficientData(format!(
            "{} rows cannot be split into train and test partitions",
            labels.len()
        )));
    }

    Ok(TrainTestSplit {
        x_train: records.select(Axis(0), &train_idx),
        y_train: labels.select(Axis(0), &train_idx),
        x_test: records.select(Axis(0), &test_idx),
        y_test: labels.select(Axis(0), &test_idx),
    })
}

/// Held-out scores of one variant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    pub variant: ModelVariant,
    pub metrics: ModelMetrics,
}

/// Evaluation summary persisted as `results.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingResults {
    pub variants: Vec<VariantResult>,
    pub best: ModelVariant,
    pub selection_metric: String,
    /// (class 0, class 1) counts of the training partition before and after rebalancing
    pub train_counts: (usize, usize),
    pub resampled_counts: (usize, usize),
    /// (class 0, class 1) counts of the untouched test partition
    pub test_counts: (usize, usize),
}

impl TrainingResults {
    pub fn metrics_for(&self, variant: ModelVariant) -> Option<&ModelMetrics> {
        self.variants
            .iter()
            .find(|r| r.variant == variant)
            .map(|r| &r.metrics)
    }
}

/// Everything a training run produces, ready to be persisted
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub ordered_columns: Vec<String>,
    pub levels: CategoryLevels,
    pub scaler: StandardScaler,
    pub models: Vec<TrainedModel>,
    pub results: TrainingResults,
}

impl TrainingOutcome {
    pub fn model(&self, variant: ModelVariant) -> Option<&TrainedModel> {
        self.models.iter().find(|m| m.variant() == variant)
    }
}

/// Score a fitted classifier on the held-out partition
pub fn evaluate_model<M: ChurnClassifier + ?Sized>(
    model: &M,
    x_test: &Array2<f64>,
    y_test: &Array1<usize>,
) -> crate::Result<ModelMetrics> {
    let proba = model.predict_proba(x_test)?;
    let predicted = model.predict(x_test)?;
    evaluate(y_test, &predicted, &proba)
}

/// Pick the variant with the highest F1; earlier variants win ties
pub fn select_best(results: &[VariantResult]) -> Option<ModelVariant> {
    results
        .iter()
        .fold(None::<&VariantResult>, |best, r| match best {
            Some(b) if b.metrics.f1 >= r.metrics.f1 => Some(b),
            _ => Some(r),
        })
        .map(|r| r.variant)
}

/// Run the full pipeline on an already labelled table
pub fn run_training(
    labeled: &LabeledTable,
    config: &TrainingConfig,
) -> crate::Result<TrainingOutcome> {
    let encoder = Encoder::from_config(config);
    let encoded = encoder.encode(&labeled.features)?;
    info!(
        rows = encoded.matrix.nrows(),
        features = encoded.columns.len(),
        "Encoded feature matrix"
    );

    let split = stratified_split(
        &encoded.matrix,
        &labeled.labels,
        config.test_size,
        config.random_seed,
    )?;
    let train_counts = class_counts(&split.y_train);
    let test_counts = class_counts(&split.y_test);
    info!(train = ?train_counts, test = ?test_counts, "Stratified split");

    let corrector = Smote::new(config.smote_neighbors, config.random_seed);
    let (x_balanced, y_balanced) = corrector.fit_resample(&split.x_train, &split.y_train)?;

    let scaler = StandardScaler::fit(&x_balanced)?;
    let x_train = scaler.transform(&x_balanced)?;
    let x_test = scaler.transform(&split.x_test)?;

    let mut models = Vec::with_capacity(ModelVariant::ALL.len());
    let mut variants = Vec::with_capacity(ModelVariant::ALL.len());
    for variant in ModelVariant::ALL {
        let start = Instant::now();
        let model = variant.fit(&x_train, &y_balanced, config)?;
        let metrics = evaluate_model(&model, &x_test, &split.y_test)?;
        info!(
            model = %variant,
            accuracy = metrics.accuracy,
            f1 = metrics.f1,
            roc_auc = metrics.roc_auc,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Trained variant"
        );
        variants.push(VariantResult { variant, metrics });
        models.push(model);
    }

    let best = select_best(&variants)
        .ok_or_else(|| ChurnError::InsufficientData("no model variants trained".to_string()))?;
    info!(best = %best, "Selected best model by F1");

    Ok(TrainingOutcome {
        ordered_columns: encoded.columns,
        levels: encoded.levels,
        scaler,
        models,
        results: TrainingResults {
            variants,
            best,
            selection_metric: "f1".to_string(),
            train_counts,
            resampled_counts: class_counts(&y_balanced),
            test_counts,
        },
    })
}

/// Load the CSV export, separate the label and run the pipeline
pub fn train_from_csv<P: AsRef<Path>>(
    path: P,
    config: &TrainingConfig,
) -> crate::Result<TrainingOutcome> {
    let table = load_training_table(path, &config.leakage_columns)?;
    let labeled = split_label(&table, config)?;
    let (negatives, positives) = labeled.class_counts();
    debug!(negatives, positives, "Label distribution");
    run_training(&labeled, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RawColumn, RawTable};
    use ndarray::array;

    fn create_labeled(n: usize) -> LabeledTable {
        // Month-to-month customers with short tenure churn
        let mut contract = Vec::new();
        let mut tenure = Vec::new();
        let mut charges = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n {
            let churned = i % 4 == 0;
            contract.push(if churned { "Month-to-month" } else if i % 2 == 0 { "Two year" } else { "One year" });
            tenure.push(if churned { (i % 6) as f64 + 1.0 } else { 24.0 + (i % 40) as f64 });
            charges.push(if churned { 85.0 + (i % 10) as f64 } else { 30.0 + (i % 25) as f64 });
            labels.push(usize::from(churned));
        }
        LabeledTable {
            features: RawTable::new(vec![
                RawColumn::categorical("Contract", &contract),
                RawColumn::numeric("Tenure Months", &tenure),
                RawColumn::numeric("Monthly Charges", &charges),
            ])
            .unwrap(),
            labels: Array1::from(labels),
        }
    }

    fn fast_config() -> TrainingConfig {
        TrainingConfig {
            forest_trees: 10,
            forest_max_depth: 4,
            knn_neighbors: 5,
            logistic_max_iterations: 200,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_stratified_split_keeps_proportions() {
        let x = Array2::from_shape_fn((50, 2), |(i, j)| (i * 2 + j) as f64);
        let y: Array1<usize> = (0..50).map(|i| usize::from(i < 10)).collect();
        let split = stratified_split(&x, &y, 0.2, 42).unwrap();

        assert_eq!(class_counts(&split.y_test), (8, 2));
        assert_eq!(class_counts(&split.y_train), (32, 8));
        assert_eq!(split.x_train.nrows() + split.x_test.nrows(), 50);
        // Rows travel with their labels
        for (row, &label) in split.x_test.outer_iter().zip(split.y_test.iter()) {
            let original = (row[0] / 2.0) as usize;
            assert_eq!(label, usize::from(original < 10));
        }
    }

    #[test]
    fn test_stratified_split_is_seeded() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| i as f64);
        let y: Array1<usize> = (0..30).map(|i| i % 3 % 2).collect();
        let a = stratified_split(&x, &y, 0.2, 7).unwrap();
        let b = stratified_split(&x, &y, 0.2, 7).unwrap();
        assert_eq!(a.x_test, b.x_test);
    }

    #[test]
    fn test_stratified_split_rejects_bad_fraction() {
        let x = array![[1.0], [2.0]];
        let y = array![0, 1];
        assert!(stratified_split(&x, &y, 0.0, 1).is_err());
        assert!(stratified_split(&x, &y, 1.0, 1).is_err());
    }

    #[test]
    fn test_select_best_prefers_first_on_tie() {
        let metrics = |f1| ModelMetrics {
            accuracy: 0.0,
            precision: 0.0,
            recall: 0.0,
            f1,
            roc_auc: 0.5,
        };
        let results = vec![
            VariantResult { variant: ModelVariant::LogisticRegression, metrics: metrics(0.7) },
            VariantResult { variant: ModelVariant::RandomForest, metrics: metrics(0.8) },
            VariantResult { variant: ModelVariant::KNearestNeighbors, metrics: metrics(0.8) },
        ];
        assert_eq!(select_best(&results), Some(ModelVariant::RandomForest));
        assert_eq!(select_best(&[]), None);
    }

    #[test]
    fn test_run_training_isolates_test_partition() {
        let labeled = create_labeled(80);
        let outcome = run_training(&labeled, &fast_config()).unwrap();

        // 20 churners, 60 stayers; 20% of each held out
        assert_eq!(outcome.results.test_counts, (12, 4));
        assert_eq!(outcome.results.train_counts, (48, 16));
        assert_eq!(outcome.results.resampled_counts, (48, 48));

        assert_eq!(
            outcome.ordered_columns,
            vec![
                "Contract_One year",
                "Contract_Two year",
                "Tenure Months",
                "Monthly Charges"
            ]
        );
        assert_eq!(outcome.scaler.n_features(), 4);
        assert_eq!(outcome.models.len(), 3);
        for model in &outcome.models {
            assert_eq!(model.n_features(), 4);
        }
        let best = outcome.results.metrics_for(outcome.results.best).unwrap();
        assert!(outcome.results.variants.iter().all(|r| r.metrics.f1 <= best.f1));
        assert!(best.f1 > 0.9);
    }
}
