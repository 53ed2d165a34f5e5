//! Feature vectors and the feature table produced by the feature builder

use serde::{Deserialize, Serialize};

/// Name of the target column, present only in labelled training tables.
pub const TARGET_COLUMN: &str = "no_show";

/// Model input columns, in the order every row is emitted.
///
/// Identity fields, raw timestamps and the raw outcome label are not
/// listed here and are not fields of [`FeatureVector`], so no code path can
/// put them in front of a model.
pub const FEATURE_COLUMNS: [&str; 18] = [
    // Passed through from the record (9)
    "gender",
    "age",
    "neighbourhood",
    "welfare_benefits",
    "hypertension",
    "diabetes",
    "alcoholism",
    "disability_level",
    "sms_received",
    // Scheduling (6)
    "lead_time_days",
    "is_same_day",
    "appt_dow",
    "appt_month",
    "scheduled_dow",
    "scheduled_hour",
    // Health (3)
    "has_chronic",
    "comorbidity_count",
    "has_disability",
];

/// Which side of the train/serve boundary a table is built for.
///
/// Only target derivation and row filtering depend on the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Training,
    Inference,
}

/// A single cell handed to a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Category(String),
    /// Sentinel for a value that could not be derived (unparseable timestamp)
    Missing,
}

impl FeatureValue {
    fn flag(set: bool) -> Self {
        FeatureValue::Number(if set { 1.0 } else { 0.0 })
    }

    fn optional<T: Into<f64>>(value: Option<T>) -> Self {
        value.map_or(FeatureValue::Missing, |v| FeatureValue::Number(v.into()))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FeatureValue::Missing)
    }
}

/// Model-ready features for one appointment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub gender: String,
    pub age: i32,
    pub neighbourhood: String,
    pub welfare_benefits: u8,
    pub hypertension: u8,
    pub diabetes: u8,
    pub alcoholism: u8,
    pub disability_level: u8,
    pub sms_received: u8,

    /// Appointment date minus scheduling date, in calendar days
    pub lead_time_days: Option<i64>,
    pub is_same_day: bool,
    /// Monday = 0
    pub appt_dow: Option<u32>,
    pub appt_month: Option<u32>,
    /// Monday = 0
    pub scheduled_dow: Option<u32>,
    pub scheduled_hour: Option<u32>,

    pub has_chronic: bool,
    pub comorbidity_count: u8,
    pub has_disability: bool,
}

impl FeatureVector {
    /// Cell values in [`FEATURE_COLUMNS`] order.
    pub fn values(&self) -> Vec<FeatureValue> {
        vec![
            FeatureValue::Category(self.gender.clone()),
            FeatureValue::Number(f64::from(self.age)),
            FeatureValue::Category(self.neighbourhood.clone()),
            FeatureValue::Number(f64::from(self.welfare_benefits)),
            FeatureValue::Number(f64::from(self.hypertension)),
            FeatureValue::Number(f64::from(self.diabetes)),
            FeatureValue::Number(f64::from(self.alcoholism)),
            FeatureValue::Number(f64::from(self.disability_level)),
            FeatureValue::Number(f64::from(self.sms_received)),
            // i64 day counts are far inside f64's exact integer range
            FeatureValue::optional(self.lead_time_days.map(|d| d as f64)),
            FeatureValue::flag(self.is_same_day),
            FeatureValue::optional(self.appt_dow),
            FeatureValue::optional(self.appt_month),
            FeatureValue::optional(self.scheduled_dow),
            FeatureValue::optional(self.scheduled_hour),
            FeatureValue::flag(self.has_chronic),
            FeatureValue::Number(f64::from(self.comorbidity_count)),
            FeatureValue::flag(self.has_disability),
        ]
    }

    /// Named row with the feature columns only.
    pub fn to_row(&self) -> FeatureRow {
        FeatureRow::new(
            FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            self.values(),
        )
    }
}

/// An ordered, named row of feature values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    columns: Vec<String>,
    values: Vec<FeatureValue>,
}

impl FeatureRow {
    /// Build a row from parallel column/value lists.
    ///
    /// Panics if the lists differ in length.
    pub fn new(columns: Vec<String>, values: Vec<FeatureValue>) -> Self {
        assert_eq!(columns.len(), values.len(), "column/value length mismatch");
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[FeatureValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&FeatureValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Remove a column, returning its value if it was present.
    pub fn remove(&mut self, column: &str) -> Option<FeatureValue> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.columns.remove(idx);
        Some(self.values.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Why a training row was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataQualityDrop {
    AgeOutOfRange,
    NegativeLeadTime,
    /// An unparseable timestamp leaves no lead time to validate
    MissingLeadTime,
}

/// Per-reason counts of rows dropped by training-time filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DropCounts {
    pub age_out_of_range: usize,
    pub negative_lead_time: usize,
    pub missing_lead_time: usize,
}

impl DropCounts {
    pub fn record(&mut self, reason: DataQualityDrop) {
        match reason {
            DataQualityDrop::AgeOutOfRange => self.age_out_of_range += 1,
            DataQualityDrop::NegativeLeadTime => self.negative_lead_time += 1,
            DataQualityDrop::MissingLeadTime => self.missing_lead_time += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.age_out_of_range + self.negative_lead_time + self.missing_lead_time
    }
}

/// A field value that could not be parsed and was replaced by a missing
/// sentinel. `row` is the index in the input batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseIssue {
    pub row: usize,
    pub field: &'static str,
    pub value: String,
}

/// Output of one feature builder invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureTable {
    pub mode: Mode,
    pub rows: Vec<FeatureVector>,
    /// `no_show` column, aligned with `rows`
    pub target: Option<Vec<bool>>,
    pub dropped: DropCounts,
    pub parse_issues: Vec<ParseIssue>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    /// Column names of the table, target last when present.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = FEATURE_COLUMNS.to_vec();
        if self.has_target() {
            columns.push(TARGET_COLUMN);
        }
        columns
    }

    /// Row `index` as a named row, including the target column when present.
    pub fn row(&self, index: usize) -> Option<FeatureRow> {
        let vector = self.rows.get(index)?;
        let mut row = vector.to_row();
        if let Some(target) = &self.target {
            row.columns.push(TARGET_COLUMN.to_string());
            row.values.push(FeatureValue::flag(target[index]));
        }
        Some(row)
    }

    /// Remove the target column, returning it.
    pub fn drop_target(&mut self) -> Option<Vec<bool>> {
        self.target.take()
    }

    /// New table holding the given rows in the given order.
    pub fn subset(&self, indices: &[usize]) -> FeatureTable {
        FeatureTable {
            mode: self.mode,
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            target: self
                .target
                .as_ref()
                .map(|t| indices.iter().map(|&i| t[i]).collect()),
            dropped: DropCounts::default(),
            parse_issues: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector() -> FeatureVector {
        FeatureVector {
            gender: "F".to_string(),
            age: 40,
            neighbourhood: "CENTRO".to_string(),
            welfare_benefits: 0,
            hypertension: 1,
            diabetes: 1,
            alcoholism: 0,
            disability_level: 2,
            sms_received: 1,
            lead_time_days: Some(3),
            is_same_day: false,
            appt_dow: Some(4),
            appt_month: Some(5),
            scheduled_dow: Some(1),
            scheduled_hour: None,
            has_chronic: true,
            comorbidity_count: 2,
            has_disability: true,
        }
    }

    #[test]
    fn test_values_follow_column_order() {
        let row = vector().to_row();

        assert_eq!(row.len(), FEATURE_COLUMNS.len());
        assert_eq!(row.get("gender"), Some(&FeatureValue::Category("F".to_string())));
        assert_eq!(row.get("lead_time_days"), Some(&FeatureValue::Number(3.0)));
        assert_eq!(row.get("scheduled_hour"), Some(&FeatureValue::Missing));
        assert_eq!(row.get("has_disability"), Some(&FeatureValue::Number(1.0)));
        assert_eq!(row.get("patient_id"), None);
    }

    #[test]
    fn test_target_column_is_last_and_droppable() {
        let mut table = FeatureTable {
            mode: Mode::Training,
            rows: vec![vector()],
            target: Some(vec![true]),
            dropped: DropCounts::default(),
            parse_issues: Vec::new(),
        };

        assert_eq!(table.columns().last(), Some(&TARGET_COLUMN));
        let row = table.row(0).unwrap();
        assert_eq!(row.get(TARGET_COLUMN), Some(&FeatureValue::Number(1.0)));

        assert_eq!(table.drop_target(), Some(vec![true]));
        assert!(!table.row(0).unwrap().contains(TARGET_COLUMN));
        assert_eq!(table.columns().len(), FEATURE_COLUMNS.len());
    }

    #[test]
    fn test_row_remove() {
        let mut row = vector().to_row();
        assert_eq!(row.remove("age"), Some(FeatureValue::Number(40.0)));
        assert_eq!(row.remove("age"), None);
        assert_eq!(row.len(), FEATURE_COLUMNS.len() - 1);
    }

    #[test]
    fn test_drop_counts() {
        let mut counts = DropCounts::default();
        counts.record(DataQualityDrop::AgeOutOfRange);
        counts.record(DataQualityDrop::NegativeLeadTime);
        counts.record(DataQualityDrop::NegativeLeadTime);

        assert_eq!(counts.negative_lead_time, 2);
        assert_eq!(counts.total(), 3);
    }
}
