//! Churn classifiers behind a common fit / predict / predict_proba contract

use crate::config::TrainingConfig;
use crate::error::ChurnError;
use anyhow::Context;
use linfa::traits::Fit;
use linfa::Dataset;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use linfa_nn::{distance::L2Dist, CommonNearestNeighbour, NearestNeighbour};
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Probability above which a customer is labelled as churning
pub const DECISION_THRESHOLD: f64 = 0.5;

/// A fitted binary classifier; class 1 is "churned"
pub trait ChurnClassifier {
    /// Churn probability for every row of `records`
    fn predict_proba(&self, records: &Array2<f64>) -> crate::Result<Array1<f64>>;

    /// Number of feature columns the model was fitted on
    fn n_features(&self) -> usize;

    /// Hard labels derived from [`ChurnClassifier::predict_proba`]
    fn predict(&self, records: &Array2<f64>) -> crate::Result<Array1<usize>> {
        Ok(self
            .predict_proba(records)?
            .mapv(|p| usize::from(p > DECISION_THRESHOLD)))
    }
}

/// Hyperparameters of one classifier family
pub trait ClassifierSpec {
    type Model: ChurnClassifier;

    fn fit(&self, records: &Array2<f64>, labels: &Array1<usize>) -> crate::Result<Self::Model>;
}

fn check_width(expected: usize, records: &Array2<f64>) -> crate::Result<()> {
    if records.ncols() != expected {
        anyhow::bail!(ChurnError::DimensionMismatch {
            context: "model input",
            expected,
            actual: records.ncols(),
        });
    }
    Ok(())
}

/// Logistic regression (linfa-logistic)
#[derive(Debug, Clone)]
pub struct LogisticRegressionSpec {
    pub max_iterations: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    fitted: FittedLogisticRegression<f64, usize>,
    /// Whether linfa's positive class is churn (class 1)
    churn_is_positive: bool,
    n_features: usize,
}

impl ClassifierSpec for LogisticRegressionSpec {
    type Model = LogisticModel;

    fn fit(&self, records: &Array2<f64>, labels: &Array1<usize>) -> crate::Result<LogisticModel> {
        use linfa::traits::Predict;

        let dataset = Dataset::new(records.clone(), labels.clone());
        let fitted = LogisticRegression::default()
            .max_iterations(self.max_iterations)
            .fit(&dataset)
            .context("Failed to fit logistic regression")?;

        // linfa keeps its class mapping private: the positive class is the more
        // frequent label, or the first one seen on a tie. Recover it from a hard
        // prediction, which picks the positive class exactly when p >= 0.5.
        let first = records.row(0).insert_axis(Axis(0));
        let p = fitted.predict_probabilities(&first)[0];
        let predicted: Array1<usize> = fitted.predict(&first);
        let churn_is_positive = (predicted[0] == 1) == (p >= 0.5);

        Ok(LogisticModel {
            fitted,
            churn_is_positive,
            n_features: records.ncols(),
        })
    }
}

impl ChurnClassifier for LogisticModel {
    fn predict_proba(&self, records: &Array2<f64>) -> crate::Result<Array1<f64>> {
        check_width(self.n_features, records)?;
        let proba = self.fitted.predict_probabilities(records);
        if self.churn_is_positive {
            Ok(proba)
        } else {
            Ok(proba.mapv(|p| 1.0 - p))
        }
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

/// Bagged decision trees (linfa-trees); probability is the share of churn votes
#[derive(Debug, Clone)]
pub struct RandomForestSpec {
    pub n_trees: usize,
    pub max_depth: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestModel {
    trees: Vec<DecisionTree<f64, usize>>,
    n_features: usize,
}

impl RandomForestModel {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl ClassifierSpec for RandomForestSpec {
    type Model = RandomForestModel;

    fn fit(&self, records: &Array2<f64>, labels: &Array1<usize>) -> crate::Result<RandomForestModel> {
        if self.n_trees == 0 || records.nrows() == 0 {
            anyhow::bail!(ChurnError::InsufficientData(
                "random forest needs at least one tree and one row".to_string()
            ));
        }

        let n_samples = records.nrows();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut trees = Vec::with_capacity(self.n_trees);
        for _ in 0..self.n_trees {
            let sample: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
            let dataset = Dataset::new(
                records.select(Axis(0), &sample),
                labels.select(Axis(0), &sample),
            );
            let tree = DecisionTree::params()
                .max_depth(Some(self.max_depth))
                .fit(&dataset)
                .context("Failed to fit decision tree")?;
            trees.push(tree);
        }

        Ok(RandomForestModel {
            trees,
            n_features: records.ncols(),
        })
    }
}

impl ChurnClassifier for RandomForestModel {
    fn predict_proba(&self, records: &Array2<f64>) -> crate::Result<Array1<f64>> {
        use linfa::traits::Predict;

        check_width(self.n_features, records)?;
        let mut votes = Array1::<f64>::zeros(records.nrows());
        for tree in &self.trees {
            let predicted: Array1<usize> = tree.predict(records);
            votes += &predicted.mapv(|l| l as f64);
        }
        Ok(votes / self.trees.len() as f64)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

/// Batches at least this large are answered through a kd-tree; smaller ones scan linearly
const KD_TREE_MIN_QUERIES: usize = 32;

/// k-nearest neighbours (linfa-nn); probability is the churn share of the neighbourhood
#[derive(Debug, Clone)]
pub struct KNearestNeighborsSpec {
    pub k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnModel {
    records: Array2<f64>,
    labels: Array1<usize>,
    k: usize,
}

impl ClassifierSpec for KNearestNeighborsSpec {
    type Model = KnnModel;

    fn fit(&self, records: &Array2<f64>, labels: &Array1<usize>) -> crate::Result<KnnModel> {
        if records.nrows() == 0 || self.k == 0 {
            anyhow::bail!(ChurnError::InsufficientData(
                "k-nearest neighbours needs k > 0 and at least one row".to_string()
            ));
        }
        Ok(KnnModel {
            records: records.clone(),
            labels: labels.clone(),
            k: self.k.min(records.nrows()),
        })
    }
}

impl ChurnClassifier for KnnModel {
    fn predict_proba(&self, records: &Array2<f64>) -> crate::Result<Array1<f64>> {
        check_width(self.records.ncols(), records)?;
        // Building a kd-tree costs more than scanning for a single serving request
        let algorithm = if records.nrows() >= KD_TREE_MIN_QUERIES {
            CommonNearestNeighbour::KdTree
        } else {
            CommonNearestNeighbour::LinearSearch
        };
        let index = algorithm
            .from_batch(&self.records, L2Dist)
            .context("Failed to index training points")?;

        let mut proba = Array1::<f64>::zeros(records.nrows());
        for (row, p) in records.outer_iter().zip(proba.iter_mut()) {
            let neighbours = index
                .k_nearest(row, self.k)
                .context("Nearest-neighbour query failed")?;
            let churned = neighbours
                .iter()
                .filter(|(_, i)| self.labels[*i] == 1)
                .count();
            *p = churned as f64 / neighbours.len().max(1) as f64;
        }
        Ok(proba)
    }

    fn n_features(&self) -> usize {
        self.records.ncols()
    }
}

/// Identifier of a classifier family; also names its artifact file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    LogisticRegression,
    RandomForest,
    KNearestNeighbors,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 3] = [
        ModelVariant::LogisticRegression,
        ModelVariant::RandomForest,
        ModelVariant::KNearestNeighbors,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModelVariant::LogisticRegression => "logistic_regression",
            ModelVariant::RandomForest => "random_forest",
            ModelVariant::KNearestNeighbors => "k_nearest_neighbors",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelVariant::LogisticRegression => "Logistic Regression",
            ModelVariant::RandomForest => "Random Forest",
            ModelVariant::KNearestNeighbors => "K-Nearest Neighbors",
        }
    }

    /// Fit this family with the configured hyperparameters
    pub fn fit(
        &self,
        records: &Array2<f64>,
        labels: &Array1<usize>,
        config: &TrainingConfig,
    ) -> crate::Result<TrainedModel> {
        Ok(match self {
            ModelVariant::LogisticRegression => TrainedModel::LogisticRegression(
                LogisticRegressionSpec {
                    max_iterations: config.logistic_max_iterations,
                }
                .fit(records, labels)?,
            ),
            ModelVariant::RandomForest => TrainedModel::RandomForest(
                RandomForestSpec {
                    n_trees: config.forest_trees,
                    max_depth: config.forest_max_depth,
                    seed: config.random_seed,
                }
                .fit(records, labels)?,
            ),
            ModelVariant::KNearestNeighbors => TrainedModel::KNearestNeighbors(
                KNearestNeighborsSpec {
                    k: config.knn_neighbors,
                }
                .fit(records, labels)?,
            ),
        })
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelVariant {
    type Err = ChurnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelVariant::ALL
            .into_iter()
            .find(|v| v.name() == s)
            .ok_or_else(|| ChurnError::UnknownModel(s.to_string()))
    }
}

/// A fitted model of any family, as persisted in the bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedModel {
    LogisticRegression(LogisticModel),
    RandomForest(RandomForestModel),
    KNearestNeighbors(KnnModel),
}

impl TrainedModel {
    pub fn variant(&self) -> ModelVariant {
        match self {
            TrainedModel::LogisticRegression(_) => ModelVariant::LogisticRegression,
            TrainedModel::RandomForest(_) => ModelVariant::RandomForest,
            TrainedModel::KNearestNeighbors(_) => ModelVariant::KNearestNeighbors,
        }
    }

    fn as_classifier(&self) -> &dyn ChurnClassifier {
        match self {
            TrainedModel::LogisticRegression(m) => m,
            TrainedModel::RandomForest(m) => m,
            TrainedModel::KNearestNeighbors(m) => m,
        }
    }
}

impl ChurnClassifier for TrainedModel {
    fn predict_proba(&self, records: &Array2<f64>) -> crate::Result<Array1<f64>> {
        self.as_classifier().predict_proba(records)
    }

    fn n_features(&self) -> usize {
        self.as_classifier().n_features()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn create_separable() -> (Array2<f64>, Array1<usize>) {
        let x = array![
            [-2.0, -1.5],
            [-1.5, -2.0],
            [-1.0, -1.2],
            [-1.8, -0.9],
            [-1.2, -1.7],
            [1.0, 1.2],
            [1.5, 2.0],
            [2.0, 1.5],
            [1.8, 0.9],
            [1.2, 1.7],
        ];
        let y = array![0, 0, 0, 0, 0, 1, 1, 1, 1, 1];
        (x, y)
    }

    fn test_config() -> TrainingConfig {
        TrainingConfig {
            forest_trees: 15,
            forest_max_depth: 4,
            knn_neighbors: 3,
            logistic_max_iterations: 200,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_every_variant_separates_clusters() {
        let (x, y) = create_separable();
        let points = array![[-1.6, -1.4], [1.6, 1.4]];

        for variant in ModelVariant::ALL {
            let model = variant.fit(&x, &y, &test_config()).unwrap();
            assert_eq!(model.variant(), variant);
            assert_eq!(model.n_features(), 2);

            let proba = model.predict_proba(&points).unwrap();
            assert!(proba[0] < 0.5, "{variant}: {}", proba[0]);
            assert!(proba[1] > 0.5, "{variant}: {}", proba[1]);
            assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
            assert_eq!(model.predict(&points).unwrap().to_vec(), vec![0, 1]);
        }
    }

    #[test]
    fn test_logistic_direction_ignores_label_order() {
        let (x, y) = create_separable();
        let reversed_rows: Vec<usize> = (0..x.nrows()).rev().collect();
        let x_rev = x.select(Axis(0), &reversed_rows);
        let y_rev = y.select(Axis(0), &reversed_rows);
        let points = array![[-1.8, -1.6], [1.8, 1.6]];

        // First label seen is 0 in one fit and 1 in the other
        for (records, labels) in [(&x, &y), (&x_rev, &y_rev)] {
            let model = ModelVariant::LogisticRegression
                .fit(records, labels, &test_config())
                .unwrap();
            let proba = model.predict_proba(&points).unwrap();
            assert!(proba[0] < 0.5, "first label {}: {}", labels[0], proba[0]);
            assert!(proba[1] > 0.5, "first label {}: {}", labels[0], proba[1]);
        }
    }

    #[test]
    fn test_knn_small_and_large_batches_agree() {
        let (x, y) = create_separable();
        let model = ModelVariant::KNearestNeighbors
            .fit(&x, &y, &test_config())
            .unwrap();
        let points = array![[-1.6, -1.4], [1.6, 1.4], [-0.2, 0.1]];
        let rows: Vec<usize> = (0..KD_TREE_MIN_QUERIES).map(|i| i % points.nrows()).collect();
        let batch = points.select(Axis(0), &rows);

        let single = model.predict_proba(&points).unwrap();
        let batched = model.predict_proba(&batch).unwrap();
        for (i, &row) in rows.iter().enumerate() {
            assert!((batched[i] - single[row]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_model_rejects_wrong_width() {
        let (x, y) = create_separable();
        let model = ModelVariant::KNearestNeighbors
            .fit(&x, &y, &test_config())
            .unwrap();
        let err = model.predict_proba(&array![[1.0, 2.0, 3.0]]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChurnError>(),
            Some(ChurnError::DimensionMismatch { expected: 2, actual: 3, .. })
        ));
    }

    #[test]
    fn test_trained_model_serde_roundtrip_preserves_scores() {
        let (x, y) = create_separable();
        let model = ModelVariant::RandomForest.fit(&x, &y, &test_config()).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: TrainedModel = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.variant(), ModelVariant::RandomForest);
        assert_eq!(
            restored.predict_proba(&x).unwrap(),
            model.predict_proba(&x).unwrap()
        );
    }

    #[test]
    fn test_variant_names() {
        assert_eq!("random_forest".parse::<ModelVariant>().unwrap(), ModelVariant::RandomForest);
        assert_eq!(ModelVariant::KNearestNeighbors.to_string(), "k_nearest_neighbors");
        assert!(matches!(
            "xgboost".parse::<ModelVariant>(),
            Err(ChurnError::UnknownModel(_))
        ));
    }
}
