//! Minority oversampling applied to the training split only

use crate::data::class_counts;
use crate::error::ChurnError;
use anyhow::Context;
use linfa_nn::{distance::L2Dist, CommonNearestNeighbour, NearestNeighbour};
use ndarray::{concatenate, Array1, Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::info;

/// Opaque rebalancing step invoked between the split and the scaler fit
pub trait ImbalanceCorrector {
    fn fit_resample(
        &self,
        records: &Array2<f64>,
        labels: &Array1<usize>,
    ) -> crate::Result<(Array2<f64>, Array1<usize>)>;
}

/// SMOTE: synthesize minority rows by interpolating towards nearby minority rows
#[derive(Debug, Clone)]
pub struct Smote {
    pub k_neighbors: usize,
    pub seed: u64,
}

impl Smote {
    pub fn new(k_neighbors: usize, seed: u64) -> Self {
        Self { k_neighbors, seed }
    }
}

impl Default for Smote {
    fn default() -> Self {
        Self::new(5, 42)
    }
}

impl ImbalanceCorrector for Smote {
    fn fit_resample(
        &self,
        records: &Array2<f64>,
        labels: &Array1<usize>,
    ) -> crate::Result<(Array2<f64>, Array1<usize>)> {
        if records.nrows() != labels.len() {
            anyhow::bail!(ChurnError::DimensionMismatch {
                context: "resampler labels",
                expected: records.nrows(),
                actual: labels.len(),
            });
        }

        let (negatives, positives) = class_counts(labels);
        if negatives == positives {
            return Ok((records.clone(), labels.clone()));
        }
        let (minority_class, n_minority, n_majority) = if positives < negatives {
            (1, positives, negatives)
        } else {
            (0, negatives, positives)
        };
        if n_minority < 2 {
            anyhow::bail!(ChurnError::InsufficientData(format!(
                "class {minority_class} has {n_minority} samples, SMOTE needs at least 2"
            )));
        }

        let minority_rows: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == minority_class)
            .map(|(i, _)| i)
            .collect();
        let minority = records.select(Axis(0), &minority_rows);
        let k = self.k_neighbors.clamp(1, n_minority - 1);

        let index = CommonNearestNeighbour::KdTree
            .from_batch(&minority, L2Dist)
            .context("Failed to index minority samples")?;
        let neighbours = (0..n_minority)
            .map(|i| {
                let found = index
                    .k_nearest(minority.row(i), k + 1)
                    .context("Nearest-neighbour query failed")?;
                Ok(found
                    .into_iter()
                    .map(|(_, j)| j)
                    .filter(|&j| j != i)
                    .take(k)
                    .collect::<Vec<usize>>())
            })
            .collect::<crate::Result<Vec<_>>>()?;

        let n_synthetic = n_majority - n_minority;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut synthetic = Array2::<f64>::zeros((n_synthetic, records.ncols()));
        for mut row in synthetic.outer_iter_mut() {
            let i = rng.gen_range(0..n_minority);
            let base = minority.row(i);
            match neighbours[i].as_slice() {
                [] => row.assign(&base),
                candidates => {
                    let j = candidates[rng.gen_range(0..candidates.len())];
                    let gap: f64 = rng.gen();
                    let step = (&minority.row(j) - &base) * gap;
                    row.assign(&(&base + &step));
                }
            }
        }

        let balanced_records = concatenate(Axis(0), &[records.view(), synthetic.view()])?;
        let balanced_labels = labels
            .iter()
            .copied()
            .chain(std::iter::repeat(minority_class).take(n_synthetic))
            .collect::<Array1<usize>>();

        info!(
            before = ?(negatives, positives),
            after = ?class_counts(&balanced_labels),
            synthetic = n_synthetic,
            k,
            "Rebalanced training split"
        );

        Ok((balanced_records, balanced_labels))
    }
}
