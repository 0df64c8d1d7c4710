//! Per-column standardization fitted once at training time

use crate::error::ChurnError;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Fitted standard scaler: `z = (x - mean) / scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Compute per-column mean and population standard deviation
    ///
    /// Zero-variance columns get a scale of 1.0 so they map to 0 instead of NaN.
    pub fn fit(records: &Array2<f64>) -> crate::Result<Self> {
        if records.nrows() == 0 {
            anyhow::bail!(ChurnError::InsufficientData(
                "cannot fit a scaler on zero rows".to_string()
            ));
        }
        let mean = records
            .mean_axis(Axis(0))
            .ok_or_else(|| ChurnError::InsufficientData("empty matrix".to_string()))?;
        let scale = records
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s.is_finite() && s > f64::EPSILON { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    /// Restore a scaler from stored statistics
    pub fn from_parts(mean: Array1<f64>, scale: Array1<f64>) -> crate::Result<Self> {
        if mean.len() != scale.len() {
            anyhow::bail!(ChurnError::DimensionMismatch {
                context: "scaler statistics",
                expected: mean.len(),
                actual: scale.len(),
            });
        }
        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    /// Standardize every row of `records`
    pub fn transform(&self, records: &Array2<f64>) -> crate::Result<Array2<f64>> {
        self.check_width(records.ncols())?;
        Ok((records - &self.mean) / &self.scale)
    }

    /// Standardize a single feature vector
    pub fn transform_row(&self, row: &[f64]) -> crate::Result<Array1<f64>> {
        self.check_width(row.len())?;
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(&x, (&m, &s))| (x - m) / s)
            .collect())
    }

    fn check_width(&self, actual: usize) -> crate::Result<()> {
        if actual != self.n_features() {
            anyhow::bail!(ChurnError::DimensionMismatch {
                context: "scaler input",
                expected: self.n_features(),
                actual,
            });
        }
        Ok(())
    }
}
