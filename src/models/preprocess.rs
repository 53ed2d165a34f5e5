//! Column encoding between the feature table and a numeric model input.
//!
//! Fitted once on the training table and stored alongside every model
//! trained from it, so the logistic model and the exported gradient
//! boosting model see identically encoded inputs.

use super::{ModelInputError, TrainError};
use crate::types::{FeatureRow, FeatureTable, FeatureValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One-hot encoded columns. Unknown categories encode as all zeros.
pub const CATEGORICAL_COLUMNS: [&str; 5] = [
    "gender",
    "neighbourhood",
    "appt_dow",
    "appt_month",
    "scheduled_dow",
];

/// Standardized columns.
pub const NUMERIC_COLUMNS: [&str; 5] = [
    "age",
    "lead_time_days",
    "scheduled_hour",
    "disability_level",
    "comorbidity_count",
];

/// 0/1 columns passed through unchanged.
pub const BINARY_COLUMNS: [&str; 8] = [
    "welfare_benefits",
    "hypertension",
    "diabetes",
    "alcoholism",
    "sms_received",
    "has_chronic",
    "has_disability",
    "is_same_day",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OneHot {
    column: String,
    /// Sorted, as seen in the training table
    categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Standardize {
    column: String,
    mean: f64,
    scale: f64,
}

/// Fitted column transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    categorical: Vec<OneHot>,
    numeric: Vec<Standardize>,
    binary: Vec<String>,
}

impl Preprocessor {
    /// Learn categories and scaling statistics from a training table.
    pub fn fit(table: &FeatureTable) -> Result<Self, TrainError> {
        if table.is_empty() {
            return Err(TrainError::EmptyTable);
        }
        let rows: Vec<FeatureRow> = table.rows.iter().map(|v| v.to_row()).collect();

        let categorical = CATEGORICAL_COLUMNS
            .iter()
            .map(|&column| {
                let categories: BTreeSet<String> = rows
                    .iter()
                    .filter_map(|row| row.get(column).and_then(category_key))
                    .collect();
                OneHot {
                    column: column.to_string(),
                    categories: categories.into_iter().collect(),
                }
            })
            .collect();

        let numeric = NUMERIC_COLUMNS
            .iter()
            .map(|&column| {
                let mut values = Vec::with_capacity(rows.len());
                for row in &rows {
                    match row.get(column) {
                        Some(FeatureValue::Number(x)) => values.push(*x),
                        Some(FeatureValue::Missing) | None => {}
                        Some(FeatureValue::Category(_)) => {
                            return Err(ModelInputError::TypeMismatch {
                                column: column.to_string(),
                                expected: "numeric",
                            })
                        }
                    }
                }
                let (mean, scale) = mean_and_scale(&values);
                Ok(Standardize {
                    column: column.to_string(),
                    mean,
                    scale,
                })
            })
            .collect::<Result<Vec<_>, ModelInputError>>()?;

        Ok(Self {
            categorical,
            numeric,
            binary: BINARY_COLUMNS.iter().map(|c| c.to_string()).collect(),
        })
    }

    /// Feature table columns this preprocessor reads.
    pub fn input_columns(&self) -> Vec<String> {
        self.categorical
            .iter()
            .map(|c| c.column.clone())
            .chain(self.numeric.iter().map(|n| n.column.clone()))
            .chain(self.binary.iter().cloned())
            .collect()
    }

    /// Width of the encoded vector.
    pub fn output_width(&self) -> usize {
        self.categorical
            .iter()
            .map(|c| c.categories.len())
            .sum::<usize>()
            + self.numeric.len()
            + self.binary.len()
    }

    /// Names of the encoded positions, e.g. `gender=F` or `age`.
    pub fn output_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.output_width());
        for one_hot in &self.categorical {
            for category in &one_hot.categories {
                names.push(format!("{}={}", one_hot.column, category));
            }
        }
        names.extend(self.numeric.iter().map(|n| n.column.clone()));
        names.extend(self.binary.iter().cloned());
        names
    }

    /// Encode one row.
    ///
    /// Missing numeric values take the fitted mean (0 after scaling); missing
    /// categorical values encode like unknown categories.
    pub fn transform(&self, row: &FeatureRow) -> Result<Vec<f64>, ModelInputError> {
        let missing: Vec<String> = self
            .input_columns()
            .into_iter()
            .filter(|c| !row.contains(c))
            .collect();
        if !missing.is_empty() {
            return Err(ModelInputError::MissingColumns(missing));
        }

        let mut encoded = Vec::with_capacity(self.output_width());

        for one_hot in &self.categorical {
            let key = row.get(&one_hot.column).and_then(category_key);
            let hit = key.and_then(|k| one_hot.categories.iter().position(|c| *c == k));
            encoded.extend((0..one_hot.categories.len()).map(|i| {
                if Some(i) == hit {
                    1.0
                } else {
                    0.0
                }
            }));
        }

        for scaling in &self.numeric {
            let value = number(row, &scaling.column)?;
            encoded.push(value.map_or(0.0, |x| (x - scaling.mean) / scaling.scale));
        }

        for column in &self.binary {
            encoded.push(number(row, column)?.unwrap_or(0.0));
        }

        Ok(encoded)
    }
}

/// Category key of a cell. Integral numbers (day of week, month) are keyed
/// without a fractional part.
fn category_key(value: &FeatureValue) -> Option<String> {
    match value {
        FeatureValue::Category(s) => Some(s.clone()),
        FeatureValue::Number(n) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
        FeatureValue::Number(n) => Some(n.to_string()),
        FeatureValue::Missing => None,
    }
}

fn number(row: &FeatureRow, column: &str) -> Result<Option<f64>, ModelInputError> {
    match row.get(column) {
        Some(FeatureValue::Number(x)) => Ok(Some(*x)),
        Some(FeatureValue::Missing) | None => Ok(None),
        Some(FeatureValue::Category(_)) => Err(ModelInputError::TypeMismatch {
            column: column.to_string(),
            expected: "numeric",
        }),
    }
}

/// Mean and population standard deviation; a zero deviation scales by 1.
fn mean_and_scale(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    (mean, if std > f64::EPSILON { std } else { 1.0 })
}
