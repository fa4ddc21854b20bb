//! Regression scores over dataset columns
//!
//! Mirrors the evaluator used when logging run metrics: pick a label and a
//! prediction column, pick a metric, evaluate a [`Dataset`].
//!
//! ```rust
//! use tracklake::evaluation::{RegressionEvaluator, RegressionMetric};
//! use tracklake::storage::Dataset;
//! use arrow::array::{Float64Array, RecordBatch};
//! use arrow::datatypes::{DataType, Field, Schema};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Arc::new(Schema::new(vec![
//!     Field::new("price", DataType::Float64, false),
//!     Field::new("prediction", DataType::Float64, false),
//! ]));
//! let batch = RecordBatch::try_new(schema, vec![
//!     Arc::new(Float64Array::from(vec![100.0, 200.0])),
//!     Arc::new(Float64Array::from(vec![110.0, 190.0])),
//! ])?;
//!
//! let rmse = RegressionEvaluator::new("price", "prediction")
//!     .metric(RegressionMetric::Rmse)
//!     .evaluate(&Dataset::from(batch))?;
//! assert!((rmse - 10.0).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```

use crate::storage::Dataset;
use crate::{Error, Result};
use arrow::array::{Array, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use std::fmt;
use std::str::FromStr;

/// Supported regression metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegressionMetric {
    /// Root mean squared error
    Rmse,
    /// Mean squared error
    Mse,
    /// Mean absolute error
    Mae,
    /// Coefficient of determination
    R2,
    /// Median absolute percentage error, as a fraction. Rows with a zero
    /// label are skipped.
    Mdape,
}

impl RegressionMetric {
    /// Lower-case metric name, as logged
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rmse => "rmse",
            Self::Mse => "mse",
            Self::Mae => "mae",
            Self::R2 => "r2",
            Self::Mdape => "mdape",
        }
    }

    /// Whether a larger score is better
    #[must_use]
    pub const fn is_larger_better(self) -> bool {
        matches!(self, Self::R2)
    }

    /// Score `predicted` against `actual`.
    ///
    /// # Errors
    /// `InvalidInput` if the slices differ in length or hold no usable rows
    pub fn compute(self, actual: &[f64], predicted: &[f64]) -> Result<f64> {
        if actual.len() != predicted.len() {
            return Err(Error::InvalidInput(format!(
                "{} needs equal lengths, got {} labels and {} predictions",
                self.as_str(),
                actual.len(),
                predicted.len()
            )));
        }
        if actual.is_empty() {
            return Err(Error::InvalidInput(format!("{} of zero rows", self.as_str())));
        }

        let pairs = actual.iter().copied().zip(predicted.iter().copied());
        match self {
            Self::Mse => Ok(mean(pairs.map(|(y, p)| (y - p).powi(2)))),
            Self::Rmse => Ok(mean(pairs.map(|(y, p)| (y - p).powi(2))).sqrt()),
            Self::Mae => Ok(mean(pairs.map(|(y, p)| (y - p).abs()))),
            Self::R2 => {
                let y_mean = mean(actual.iter().copied());
                let ss_res: f64 = pairs.map(|(y, p)| (y - p).powi(2)).sum();
                let ss_tot: f64 = actual.iter().map(|y| (y - y_mean).powi(2)).sum();
                Ok(1.0 - ss_res / ss_tot)
            }
            Self::Mdape => {
                let mut errors: Vec<f64> = pairs
                    .filter(|(y, _)| *y != 0.0)
                    .map(|(y, p)| ((y - p) / y).abs())
                    .collect();
                if errors.is_empty() {
                    return Err(Error::InvalidInput(
                        "mdape is undefined when every label is zero".to_string(),
                    ));
                }
                errors.sort_by(f64::total_cmp);
                let mid = errors.len() / 2;
                if errors.len() % 2 == 0 {
                    Ok((errors[mid - 1] + errors[mid]) / 2.0)
                } else {
                    Ok(errors[mid])
                }
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
    sum / count as f64
}

impl fmt::Display for RegressionMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegressionMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rmse" => Ok(Self::Rmse),
            "mse" => Ok(Self::Mse),
            "mae" => Ok(Self::Mae),
            "r2" => Ok(Self::R2),
            "mdape" => Ok(Self::Mdape),
            other => Err(Error::InvalidInput(format!(
                "unknown regression metric '{other}': expected rmse, mse, mae, r2 or mdape"
            ))),
        }
    }
}

/// Scores a prediction column against a label column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegressionEvaluator {
    label_col: String,
    prediction_col: String,
    metric: RegressionMetric,
}

impl RegressionEvaluator {
    /// Evaluator for the given columns; the metric defaults to RMSE.
    #[must_use]
    pub fn new(label_col: impl Into<String>, prediction_col: impl Into<String>) -> Self {
        Self {
            label_col: label_col.into(),
            prediction_col: prediction_col.into(),
            metric: RegressionMetric::Rmse,
        }
    }

    /// Select the metric
    #[must_use]
    pub const fn metric(mut self, metric: RegressionMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Selected metric
    #[must_use]
    pub const fn metric_name(&self) -> RegressionMetric {
        self.metric
    }

    /// Score the dataset. Rows where the label or the prediction is null are
    /// ignored; numeric columns of any width are widened to `Float64`.
    ///
    /// # Errors
    /// - `InvalidInput` if a column is missing or no rows are usable
    /// - `Arrow` if a column cannot be cast to `Float64`
    pub fn evaluate(&self, data: &Dataset) -> Result<f64> {
        let labels = float_column(data, &self.label_col)?;
        let predictions = float_column(data, &self.prediction_col)?;

        let (actual, predicted): (Vec<f64>, Vec<f64>) = labels
            .iter()
            .zip(predictions.iter())
            .filter_map(|(y, p)| Some((y?, p?)))
            .unzip();

        let score = self.metric.compute(&actual, &predicted)?;
        tracing::debug!(
            metric = %self.metric,
            rows = actual.len(),
            score = score,
            "evaluated predictions"
        );
        Ok(score)
    }
}

fn float_column(data: &Dataset, name: &str) -> Result<Float64Array> {
    if !data.has_column(name) {
        return Err(Error::InvalidInput(format!("column '{name}' not found")));
    }
    let column = cast(&data.column(name)?, &DataType::Float64)?;
    column
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| Error::StorageError(format!("column '{name}' did not cast to Float64")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, RecordBatch};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    const ACTUAL: [f64; 4] = [3.0, -0.5, 2.0, 7.0];
    const PREDICTED: [f64; 4] = [2.5, 0.0, 2.0, 8.0];

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_error_metrics() {
        assert!(close(RegressionMetric::Mse.compute(&ACTUAL, &PREDICTED).unwrap(), 0.375));
        assert!(close(
            RegressionMetric::Rmse.compute(&ACTUAL, &PREDICTED).unwrap(),
            0.375_f64.sqrt()
        ));
        assert!(close(RegressionMetric::Mae.compute(&ACTUAL, &PREDICTED).unwrap(), 0.5));
    }

    #[test]
    fn test_r2() {
        let r2 = RegressionMetric::R2.compute(&ACTUAL, &PREDICTED).unwrap();
        assert!((r2 - 0.948_608_137).abs() < 1e-6);
        assert!(RegressionMetric::R2.is_larger_better());
    }

    #[test]
    fn test_mdape_skips_zero_labels() {
        let actual = [100.0, 0.0, 200.0, 50.0];
        let predicted = [110.0, 5.0, 150.0, 50.0];
        // errors: 0.1, 0.25, 0.0 -> median 0.1
        let mdape = RegressionMetric::Mdape.compute(&actual, &predicted).unwrap();
        assert!(close(mdape, 0.1));
        assert!(RegressionMetric::Mdape.compute(&[0.0], &[1.0]).is_err());
    }

    #[test]
    fn test_compute_rejects_bad_input() {
        assert!(RegressionMetric::Rmse.compute(&[], &[]).is_err());
        assert!(RegressionMetric::Rmse.compute(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("RMSE".parse::<RegressionMetric>().unwrap(), RegressionMetric::Rmse);
        assert!("mape".parse::<RegressionMetric>().is_err());
    }

    #[test]
    fn test_evaluate_casts_and_skips_nulls() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("price", DataType::Int32, true),
            Field::new("prediction", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![Some(10), None, Some(20)])),
                Arc::new(Float64Array::from(vec![Some(12.0), Some(1.0), Some(18.0)])),
            ],
        )
        .unwrap();

        let mae = RegressionEvaluator::new("price", "prediction")
            .metric(RegressionMetric::Mae)
            .evaluate(&Dataset::from(batch))
            .unwrap();
        assert!(close(mae, 2.0));
    }

    #[test]
    fn test_evaluate_missing_column() {
        let schema = Arc::new(Schema::new(vec![Field::new("price", DataType::Float64, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Float64Array::from(vec![1.0]))]).unwrap();
        let err = RegressionEvaluator::new("price", "prediction")
            .evaluate(&Dataset::from(batch))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
