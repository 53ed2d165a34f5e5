//! L2-regularised logistic regression fitted in process.
//!
//! - Loss: mean log loss plus `||w||² / (2·C·n)` (intercept unpenalised)
//! - Gradient: `Xᵀ(σ(Xw + b) - y) / n + w / (C·n)`
//! - Optimiser: full-batch gradient descent, step capped at `1 / L` where
//!   `L` bounds the gradient's Lipschitz constant
//!
//! The fitted [`LinearModel`] carries its [`Preprocessor`], so scoring needs
//! nothing but the model artifact.

use super::preprocess::Preprocessor;
use super::{checked_probability, Model, ModelError, TrainError, Trainer};
use crate::types::{FeatureRow, FeatureTable};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Identifier reported as `model_used`.
pub const LOGISTIC_MODEL_NAME: &str = "logistic_regression";

/// Optimiser settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticRegressionConfig {
    /// Inverse regularisation strength
    pub c: f64,
    pub max_iter: usize,
    /// Upper bound on the step size
    pub learning_rate: f64,
    /// Stop when every gradient component is below this
    pub tolerance: f64,
}

impl Default for LogisticRegressionConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            learning_rate: 0.5,
            tolerance: 1e-6,
        }
    }
}

/// Trainer for [`LinearModel`].
#[derive(Debug, Clone, Default)]
pub struct LogisticRegression {
    config: LogisticRegressionConfig,
}

impl LogisticRegression {
    pub fn new(config: LogisticRegressionConfig) -> Self {
        Self { config }
    }
}

impl Trainer for LogisticRegression {
    type Output = LinearModel;

    fn fit(&self, table: &FeatureTable, target: &[bool]) -> Result<LinearModel, TrainError> {
        if table.is_empty() {
            return Err(TrainError::EmptyTable);
        }
        if target.len() != table.len() {
            return Err(TrainError::TargetLength {
                rows: table.len(),
                target: target.len(),
            });
        }
        let positives = target.iter().filter(|&&y| y).count();
        if positives == 0 || positives == target.len() {
            return Err(TrainError::SingleClass);
        }

        let preprocessor = Preprocessor::fit(table)?;
        let design = table
            .rows
            .iter()
            .map(|v| preprocessor.transform(&v.to_row()))
            .collect::<Result<Vec<_>, _>>()?;
        let labels: Vec<f64> = target.iter().map(|&y| if y { 1.0 } else { 0.0 }).collect();

        let n = design.len() as f64;
        let width = preprocessor.output_width();
        let penalty = 1.0 / (self.config.c * n);

        // Lipschitz bound of the mean log-loss gradient: 0.25 · max ||[x, 1]||²
        let max_norm = design
            .iter()
            .map(|x| x.iter().map(|v| v * v).sum::<f64>() + 1.0)
            .fold(0.0_f64, f64::max);
        let lipschitz = 0.25 * max_norm + penalty;
        let step = self.config.learning_rate.min(1.0 / lipschitz);

        // Start from the base-rate log-odds
        let base_rate = positives as f64 / n;
        let mut intercept = (base_rate / (1.0 - base_rate)).ln();
        let mut weights = vec![0.0; width];
        let mut grad = vec![0.0; width];
        let mut iterations = 0;

        for iter in 0..self.config.max_iter {
            iterations = iter + 1;
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_intercept = 0.0;

            for (x, y) in design.iter().zip(&labels) {
                let residual = sigmoid(intercept + dot(&weights, x)) - y;
                for (g, xi) in grad.iter_mut().zip(x) {
                    *g += residual * xi;
                }
                grad_intercept += residual;
            }

            let mut largest = (grad_intercept / n).abs();
            for (g, w) in grad.iter_mut().zip(&weights) {
                *g = *g / n + penalty * w;
                largest = largest.max(g.abs());
            }
            if largest < self.config.tolerance {
                break;
            }

            for (w, g) in weights.iter_mut().zip(&grad) {
                *w -= step * g;
            }
            intercept -= step * grad_intercept / n;
        }

        debug!(iterations, step, "Logistic regression converged or hit max_iter");
        info!(
            rows = design.len(),
            encoded_width = width,
            iterations,
            "Fitted logistic regression"
        );

        Ok(LinearModel {
            name: LOGISTIC_MODEL_NAME.to_string(),
            feature_names: preprocessor.input_columns(),
            preprocessor,
            weights,
            intercept,
        })
    }
}

/// Fitted logistic model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    name: String,
    feature_names: Vec<String>,
    preprocessor: Preprocessor,
    weights: Vec<f64>,
    intercept: f64,
}

impl LinearModel {
    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl Model for LinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_probability(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        let x = self.preprocessor.transform(row)?;
        if x.len() != self.weights.len() {
            return Err(ModelError::Backend(format!(
                "encoded width {} does not match {} weights",
                x.len(),
                self.weights.len()
            )));
        }
        checked_probability(sigmoid(self.intercept + dot(&self.weights, &x)))
    }
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_builder::FeatureBuilder;
    use crate::models::ModelInputError;
    use crate::types::{AppointmentRecord, Mode};

    /// Long lead times no-show, same-day bookings show up.
    fn labelled() -> FeatureTable {
        let mut records = Vec::new();
        for i in 0..20 {
            let day = 10 + (i % 5);
            records.push(
                AppointmentRecord::new(
                    &format!("2024-01-{day:02}T08:00:00Z"),
                    &format!("2024-02-{day:02}T08:00:00Z"),
                    25 + i,
                )
                .with_label("Yes"),
            );
            records.push(
                AppointmentRecord::new(
                    &format!("2024-01-{day:02}T08:00:00Z"),
                    &format!("2024-01-{day:02}T14:00:00Z"),
                    25 + i,
                )
                .with_label("No"),
            );
        }
        FeatureBuilder::new().build(&records, Mode::Training)
    }

    #[test]
    fn test_fit_separates_lead_time() {
        let mut table = labelled();
        let target = table.drop_target().unwrap();
        let model = LogisticRegression::default().fit(&table, &target).unwrap();

        assert_eq!(model.name(), LOGISTIC_MODEL_NAME);
        assert_eq!(model.feature_names().len(), 18);

        let long = model.predict_probability(&table.rows[0].to_row()).unwrap();
        let same_day = model.predict_probability(&table.rows[1].to_row()).unwrap();
        assert!(long > 0.5, "long lead time scored {long}");
        assert!(same_day < 0.5, "same-day booking scored {same_day}");
    }

    #[test]
    fn test_fit_rejects_single_class() {
        let mut table = labelled();
        let target = table.drop_target().unwrap();
        let all_yes = vec![true; target.len()];

        assert_eq!(
            LogisticRegression::default().fit(&table, &all_yes),
            Err(TrainError::SingleClass)
        );
    }

    #[test]
    fn test_fit_rejects_target_length_mismatch() {
        let table = labelled();

        assert_eq!(
            LogisticRegression::default().fit(&table, &[true, false]),
            Err(TrainError::TargetLength {
                rows: 40,
                target: 2
            })
        );
    }

    #[test]
    fn test_predict_rejects_incomplete_row() {
        let mut table = labelled();
        let target = table.drop_target().unwrap();
        let model = LogisticRegression::default().fit(&table, &target).unwrap();

        let mut row = table.rows[0].to_row();
        row.remove("lead_time_days");
        let err = model.predict_probability(&row).unwrap_err();

        assert!(matches!(
            err,
            ModelError::Input(ModelInputError::MissingColumns(_))
        ));
    }
}
