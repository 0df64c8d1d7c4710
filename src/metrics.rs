//! Held-out evaluation metrics for binary churn classifiers

use crate::error::ChurnError;
use anyhow::Context;
use linfa::dataset::Pr;
use linfa::metrics::BinaryClassification;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Scores of one model on the held-out test split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
}

/// Confusion counts with class 1 as the positive class
///
/// Counted directly rather than through `linfa::metrics::ConfusionMatrix`, which
/// takes its classes from the predictions alone and drops every row of a class
/// the model never predicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confusion {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl Confusion {
    pub fn from_labels(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> Self {
        let mut c = Confusion::default();
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            match (t == 1, p == 1) {
                (true, true) => c.true_positive += 1,
                (false, true) => c.false_positive += 1,
                (false, false) => c.true_negative += 1,
                (true, false) => c.false_negative += 1,
            }
        }
        c
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Compute all metrics from true labels, hard predictions and churn probabilities
///
/// Precision and recall are 0 when their denominator is 0. ROC-AUC is 0.5 when
/// the test split holds a single class.
pub fn evaluate(
    y_true: &Array1<usize>,
    y_pred: &Array1<usize>,
    proba: &Array1<f64>,
) -> crate::Result<ModelMetrics> {
    for (name, len) in [("predictions", y_pred.len()), ("probabilities", proba.len())] {
        if len != y_true.len() {
            anyhow::bail!(ChurnError::DimensionMismatch {
                context: name,
                expected: y_true.len(),
                actual: len,
            });
        }
    }
    if y_true.is_empty() {
        anyhow::bail!(ChurnError::InsufficientData(
            "cannot evaluate on an empty test split".to_string()
        ));
    }

    let c = Confusion::from_labels(y_true, y_pred);
    let precision = ratio(c.true_positive, c.true_positive + c.false_positive);
    let recall = ratio(c.true_positive, c.true_positive + c.false_negative);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };

    Ok(ModelMetrics {
        accuracy: ratio(c.true_positive + c.true_negative, c.total()),
        precision,
        recall,
        f1,
        roc_auc: roc_auc(y_true, proba)?,
    })
}

/// Area under the ROC curve (linfa), tied scores counting half
///
/// 0.5 when `y_true` holds a single class. Scores must lie in [0, 1].
pub fn roc_auc(y_true: &Array1<usize>, scores: &Array1<f64>) -> crate::Result<f64> {
    let n_pos = y_true.iter().filter(|&&l| l == 1).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Ok(0.5);
    }

    // linfa opens its curve at the first score above zero, so a block of zero
    // scores would lose its area; [0, 1] -> [0.5, 1] keeps order and ties
    let shifted = scores
        .iter()
        .map(|&s| {
            if !(0.0..=1.0).contains(&s) {
                return Err(ChurnError::InvalidInput(format!("score {s} is not a probability")));
            }
            Pr::try_from(((s + 1.0) / 2.0) as f32)
                .map_err(|_| ChurnError::InvalidInput(format!("score {s} is not a probability")))
        })
        .collect::<Result<Array1<Pr>, _>>()?;
    let truth: Vec<bool> = y_true.iter().map(|&l| l == 1).collect();

    let roc = shifted
        .roc(truth.as_slice())
        .context("Failed to compute ROC curve")?;
    Ok(f64::from(roc.area_under_curve()))
}
