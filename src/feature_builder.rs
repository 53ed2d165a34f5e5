//! Feature building shared by training and inference.
//!
//! The training run and the prediction pipeline both call
//! [`FeatureBuilder::build`]. Only two steps look at the [`Mode`]: target
//! derivation and row filtering. Every derived column is computed by the
//! same code in both modes, which is what keeps the columns a model was
//! trained on identical to the columns it is served.

use crate::types::{
    AppointmentRecord, DataQualityDrop, DropCounts, FeatureTable, FeatureVector, Mode, ParseIssue,
    SchemaError, FEATURE_COLUMNS,
};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde_json::Value;
use std::ops::RangeInclusive;
use tracing::debug;

/// Ages accepted in training data. Rows outside are dropped, not clamped.
pub const VALID_AGE: RangeInclusive<i32> = 0..=110;

/// Timestamp layouts carrying an explicit UTC offset.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M%:z",
];

/// Timestamp layouts without an offset; interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Transforms raw appointment records into model-ready feature tables.
///
/// Pure: the output depends only on the records and the mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureBuilder;

impl FeatureBuilder {
    /// Create a new feature builder.
    pub fn new() -> Self {
        Self
    }

    /// Build a feature table from a batch of records.
    ///
    /// In [`Mode::Training`] the `no_show` target is derived when the batch
    /// carries labels, and rows with an out-of-range age or a negative or
    /// missing lead time are dropped and counted. In [`Mode::Inference`] no
    /// row is ever dropped and no target is produced.
    ///
    /// Unparseable timestamps never fail the batch; they become missing
    /// values and are listed in [`FeatureTable::parse_issues`].
    pub fn build(&self, records: &[AppointmentRecord], mode: Mode) -> FeatureTable {
        let derive_target =
            mode == Mode::Training && records.iter().any(|r| r.no_show_label.is_some());

        let mut rows = Vec::with_capacity(records.len());
        let mut target = derive_target.then(|| Vec::with_capacity(records.len()));
        let mut dropped = DropCounts::default();
        let mut parse_issues = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let scheduled = parse_field(
                index,
                "scheduled_day",
                &record.scheduled_day,
                &mut parse_issues,
            );
            let appointment = parse_field(
                index,
                "appointment_day",
                &record.appointment_day,
                &mut parse_issues,
            );
            let lead_time_days = lead_time_days(scheduled, appointment);

            if mode == Mode::Training {
                if let Some(reason) = training_drop_reason(record.age, lead_time_days) {
                    dropped.record(reason);
                    continue;
                }
            }

            rows.push(derive(record, scheduled, appointment, lead_time_days));
            if let Some(target) = target.as_mut() {
                target.push(is_no_show(record.no_show_label.as_deref()));
            }
        }

        debug!(
            mode = ?mode,
            rows_in = records.len(),
            rows_out = rows.len(),
            dropped = dropped.total(),
            parse_issues = parse_issues.len(),
            has_target = target.is_some(),
            "Feature table built"
        );

        FeatureTable {
            mode,
            rows,
            target,
            dropped,
            parse_issues,
        }
    }

    /// Validate raw JSON payloads and build a feature table from them.
    ///
    /// Fails on the first payload missing a required field.
    pub fn build_json(&self, payloads: &[Value], mode: Mode) -> Result<FeatureTable, SchemaError> {
        let records = payloads
            .iter()
            .cloned()
            .map(AppointmentRecord::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.build(&records, mode))
    }

    /// Number of feature columns produced (target excluded).
    pub fn feature_count(&self) -> usize {
        FEATURE_COLUMNS.len()
    }

    /// Feature column names in emission order (target excluded).
    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_COLUMNS
    }
}

/// Parse a timestamp into a UTC instant.
///
/// Accepts RFC 3339 and the common ISO-8601 variants: optional seconds and
/// fractional seconds, `T` or space separator, `Z` or a numeric offset.
/// Values without an offset are taken as UTC; a bare date is midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive = s
        .strip_suffix('Z')
        .or_else(|| s.strip_suffix('z'))
        .unwrap_or(s);
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Whole days between the calendar dates (UTC) of the two instants.
///
/// Dates rather than instants: a booking at 23:00 for 01:00 the next day is
/// one day of lead time, and a same-date booking is zero regardless of hour.
pub fn lead_time_days(
    scheduled: Option<DateTime<Utc>>,
    appointment: Option<DateTime<Utc>>,
) -> Option<i64> {
    let (scheduled, appointment) = (scheduled?, appointment?);
    Some((appointment.date_naive() - scheduled.date_naive()).num_days())
}

/// Label normalization: trimmed, case-folded `"yes"` is a no-show; any
/// other value, or no value, is not.
pub fn is_no_show(label: Option<&str>) -> bool {
    label.is_some_and(|l| l.trim().to_lowercase() == "yes")
}

fn parse_field(
    row: usize,
    field: &'static str,
    raw: &str,
    issues: &mut Vec<ParseIssue>,
) -> Option<DateTime<Utc>> {
    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        debug!(row, field, value = %raw, "Unparseable timestamp, using missing value");
        issues.push(ParseIssue {
            row,
            field,
            value: raw.to_string(),
        });
    }
    parsed
}

/// Age is checked first; a row is attributed to the first rule it fails.
fn training_drop_reason(age: i32, lead_time_days: Option<i64>) -> Option<DataQualityDrop> {
    if !VALID_AGE.contains(&age) {
        return Some(DataQualityDrop::AgeOutOfRange);
    }
    match lead_time_days {
        None => Some(DataQualityDrop::MissingLeadTime),
        Some(days) if days < 0 => Some(DataQualityDrop::NegativeLeadTime),
        Some(_) => None,
    }
}

fn derive(
    record: &AppointmentRecord,
    scheduled: Option<DateTime<Utc>>,
    appointment: Option<DateTime<Utc>>,
    lead_time_days: Option<i64>,
) -> FeatureVector {
    FeatureVector {
        gender: record.gender.clone(),
        age: record.age,
        neighbourhood: record.neighbourhood.clone(),
        welfare_benefits: record.welfare_benefits,
        hypertension: record.hypertension,
        diabetes: record.diabetes,
        alcoholism: record.alcoholism,
        disability_level: record.disability_level,
        sms_received: record.sms_received,

        lead_time_days,
        is_same_day: lead_time_days == Some(0),
        appt_dow: appointment.map(|t| t.weekday().num_days_from_monday()),
        appt_month: appointment.map(|t| t.month()),
        scheduled_dow: scheduled.map(|t| t.weekday().num_days_from_monday()),
        scheduled_hour: scheduled.map(|t| t.hour()),

        has_chronic: record.hypertension > 0 || record.diabetes > 0,
        comorbidity_count: record
            .hypertension
            .saturating_add(record.diabetes)
            .saturating_add(record.alcoholism),
        has_disability: record.disability_level > 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeatureValue, TARGET_COLUMN};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn record(scheduled: &str, appointment: &str) -> AppointmentRecord {
        AppointmentRecord::new(scheduled, appointment, 30)
    }

    fn single(record: AppointmentRecord, mode: Mode) -> FeatureTable {
        FeatureBuilder::new().build(&[record], mode)
    }

    #[test]
    fn test_feature_count() {
        let builder = FeatureBuilder::new();
        assert_eq!(builder.feature_count(), 18);
        assert_eq!(builder.feature_names().len(), 18);
    }

    #[test]
    fn test_training_and_inference_columns_match() {
        let records = vec![
            record("2024-01-10T08:00:00Z", "2024-01-12T09:00:00Z").with_label("Yes"),
            record("2024-01-10T08:00:00Z", "2024-01-10T15:00:00Z").with_label("No"),
        ];
        let builder = FeatureBuilder::new();
        let training = builder.build(&records, Mode::Training);
        let inference = builder.build(&records, Mode::Inference);

        let training_columns: BTreeSet<_> = training
            .columns()
            .into_iter()
            .filter(|c| *c != TARGET_COLUMN)
            .collect();
        let inference_columns: BTreeSet<_> = inference.columns().into_iter().collect();

        assert!(training.has_target());
        assert!(!inference.has_target());
        assert_eq!(training_columns, inference_columns);
        assert_eq!(training.rows, inference.rows);
    }

    #[test]
    fn test_lead_time_uses_calendar_dates() {
        let table = single(
            record("2024-01-10T23:00Z", "2024-01-11T01:00Z"),
            Mode::Inference,
        );
        let row = &table.rows[0];

        assert_eq!(row.lead_time_days, Some(1));
        assert!(!row.is_same_day);
    }

    #[test]
    fn test_same_day_at_different_hours() {
        let table = single(
            record("2024-01-10T07:15:00Z", "2024-01-10T16:45:00Z"),
            Mode::Inference,
        );
        let row = &table.rows[0];

        assert_eq!(row.lead_time_days, Some(0));
        assert!(row.is_same_day);
    }

    #[test]
    fn test_offsets_are_normalized_to_utc_dates() {
        // 23:30 at -03:00 is 02:30 UTC on the next day
        let table = single(
            record("2024-01-10T23:30:00-03:00", "2024-01-11T10:00:00Z"),
            Mode::Inference,
        );
        let row = &table.rows[0];

        assert_eq!(row.lead_time_days, Some(0));
        assert_eq!(row.scheduled_hour, Some(2));
        assert_eq!(row.scheduled_dow, Some(3)); // Thursday
    }

    #[test]
    fn test_time_features() {
        // 2016-04-29 is a Friday, 2016-05-03 a Tuesday
        let table = single(
            record("2016-04-29T18:38:08Z", "2016-05-03T00:00:00Z"),
            Mode::Inference,
        );
        let row = &table.rows[0];

        assert_eq!(row.lead_time_days, Some(4));
        assert_eq!(row.scheduled_dow, Some(4));
        assert_eq!(row.scheduled_hour, Some(18));
        assert_eq!(row.appt_dow, Some(1));
        assert_eq!(row.appt_month, Some(5));
    }

    #[test]
    fn test_health_features() {
        let mut rec = record("2024-01-10", "2024-01-12");
        rec.hypertension = 1;
        rec.alcoholism = 1;
        rec.disability_level = 2;
        let row = &single(rec, Mode::Inference).rows[0];

        assert!(row.has_chronic);
        assert_eq!(row.comorbidity_count, 2);
        assert!(row.has_disability);

        let row = &single(record("2024-01-10", "2024-01-12"), Mode::Inference).rows[0];
        assert!(!row.has_chronic);
        assert_eq!(row.comorbidity_count, 0);
        assert!(!row.has_disability);
    }

    #[test]
    fn test_negative_lead_time_dropped_in_training_only() {
        let records = vec![
            record("2024-01-10T08:00:00Z", "2024-01-12T08:00:00Z").with_label("No"),
            record("2024-01-12T08:00:00Z", "2024-01-10T08:00:00Z").with_label("Yes"),
        ];
        let builder = FeatureBuilder::new();

        let training = builder.build(&records, Mode::Training);
        assert_eq!(training.len(), 1);
        assert_eq!(training.rows[0].lead_time_days, Some(2));
        assert_eq!(training.target, Some(vec![false]));
        assert_eq!(training.dropped.negative_lead_time, 1);

        let inference = builder.build(&records, Mode::Inference);
        assert_eq!(inference.len(), 2);
        assert_eq!(inference.rows[1].lead_time_days, Some(-2));
    }

    #[test]
    fn test_age_boundaries_in_training() {
        let ages = [-1, 0, 110, 111];
        let records: Vec<_> = ages
            .iter()
            .map(|&age| AppointmentRecord::new("2024-01-10", "2024-01-11", age).with_label("No"))
            .collect();

        let table = FeatureBuilder::new().build(&records, Mode::Training);
        let kept: Vec<i32> = table.rows.iter().map(|r| r.age).collect();

        assert_eq!(kept, vec![0, 110]);
        assert_eq!(table.dropped.age_out_of_range, 2);
    }

    #[test]
    fn test_inference_never_drops() {
        let rec = AppointmentRecord::new("2024-01-12", "2024-01-10", 140);
        let table = single(rec, Mode::Inference);

        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].age, 140);
        assert_eq!(table.dropped.total(), 0);
    }

    #[test]
    fn test_identity_and_label_never_reach_output() {
        let mut rec = record("2024-01-10", "2024-01-11").with_label("Yes");
        rec.patient_id = Some("29872499824296".to_string());
        rec.appointment_id = Some("5642903".to_string());

        for mode in [Mode::Training, Mode::Inference] {
            let table = single(rec.clone(), mode);
            let columns = table.columns();
            for leaked in ["patient_id", "appointment_id", "no_show_label", "No-show"] {
                assert!(!columns.contains(&leaked), "{leaked} leaked in {mode:?}");
            }

            let serialized = serde_json::to_string(&table).unwrap();
            assert!(!serialized.contains("29872499824296"));
            assert!(!serialized.contains("5642903"));
            assert!(!serialized.contains("Yes"));
        }
    }

    #[test]
    fn test_label_normalization() {
        for label in ["  YES ", "yes", "Yes"] {
            assert!(is_no_show(Some(label)), "{label:?}");
        }
        for label in ["No", "no", "", "maybe"] {
            assert!(!is_no_show(Some(label)), "{label:?}");
        }
        assert!(!is_no_show(None));
    }

    #[test]
    fn test_labels_map_to_target() {
        let records = vec![
            record("2024-01-10", "2024-01-11").with_label("  YES "),
            record("2024-01-10", "2024-01-11").with_label("no"),
            record("2024-01-10", "2024-01-11"),
        ];
        let table = FeatureBuilder::new().build(&records, Mode::Training);

        assert_eq!(table.target, Some(vec![true, false, false]));
    }

    #[test]
    fn test_unlabeled_training_batch_has_no_target() {
        // Unlabeled data is accepted for exploration; it just cannot be fitted.
        let records = vec![record("2024-01-10", "2024-01-11")];
        let table = FeatureBuilder::new().build(&records, Mode::Training);

        assert_eq!(table.len(), 1);
        assert!(!table.has_target());
        assert!(!table.columns().contains(&TARGET_COLUMN));
    }

    #[test]
    fn test_inference_ignores_labels() {
        let table = single(record("2024-01-10", "2024-01-11").with_label("Yes"), Mode::Inference);
        assert!(!table.has_target());
    }

    #[test]
    fn test_build_is_deterministic() {
        let records = vec![
            record("2024-01-10T08:00:00Z", "2024-01-12T09:00:00Z").with_label("Yes"),
            record("garbage", "2024-01-10T15:00:00Z").with_label("No"),
            AppointmentRecord::new("2024-01-10", "2024-01-11", 200).with_label("No"),
        ];
        let builder = FeatureBuilder::new();

        for mode in [Mode::Training, Mode::Inference] {
            let first = serde_json::to_vec(&builder.build(&records, mode)).unwrap();
            let second = serde_json::to_vec(&builder.build(&records, mode)).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_malformed_timestamp_degrades_to_missing() {
        let records = vec![
            record("not a date", "2024-01-11T10:00:00Z"),
            record("2024-01-10T08:00:00Z", "2024-01-11T10:00:00Z"),
        ];
        let table = FeatureBuilder::new().build(&records, Mode::Inference);

        assert_eq!(table.len(), 2);
        let degraded = &table.rows[0];
        assert_eq!(degraded.lead_time_days, None);
        assert!(!degraded.is_same_day);
        assert_eq!(degraded.scheduled_hour, None);
        assert_eq!(degraded.appt_month, Some(1));
        assert_eq!(
            degraded.to_row().get("lead_time_days"),
            Some(&FeatureValue::Missing)
        );

        assert_eq!(table.rows[1].lead_time_days, Some(1));
        assert_eq!(
            table.parse_issues,
            vec![ParseIssue {
                row: 0,
                field: "scheduled_day",
                value: "not a date".to_string(),
            }]
        );
    }

    #[test]
    fn test_missing_lead_time_dropped_in_training() {
        let records = vec![
            record("2024-01-10", "").with_label("Yes"),
            record("2024-01-10", "2024-01-10").with_label("No"),
        ];
        let table = FeatureBuilder::new().build(&records, Mode::Training);

        assert_eq!(table.len(), 1);
        assert_eq!(table.dropped.missing_lead_time, 1);
        assert_eq!(table.target, Some(vec![false]));
        assert_eq!(table.parse_issues.len(), 1);
    }

    #[test]
    fn test_build_json_missing_field_is_schema_error() {
        let payload = json!({
            "Gender": "F",
            "Age": 30,
            "Neighbourhood": "CENTRO",
            "OnGovtWelfareBenefits": 0,
            "Hypertension": 0,
            "Diabetes": 0,
            "Alcoholism": 0,
            "Handicapped": 0,
            "SMS_received": 0,
            "ScheduledDay": "2024-01-10T08:00:00Z"
        });

        let err = FeatureBuilder::new()
            .build_json(&[payload], Mode::Inference)
            .unwrap_err();
        assert_eq!(err, SchemaError::MissingField("appointment_day"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .unwrap()
                .with_timezone(&Utc)
        };

        assert_eq!(
            parse_timestamp("2016-04-29T18:38:08Z"),
            Some(expected("2016-04-29T18:38:08Z"))
        );
        assert_eq!(
            parse_timestamp("2016-04-29 18:38:08"),
            Some(expected("2016-04-29T18:38:08Z"))
        );
        assert_eq!(
            parse_timestamp("2016-04-29T18:38:08.250Z"),
            Some(expected("2016-04-29T18:38:08.250Z"))
        );
        assert_eq!(
            parse_timestamp("2024-01-10T23:00Z"),
            Some(expected("2024-01-10T23:00:00Z"))
        );
        assert_eq!(
            parse_timestamp("2024-01-10T23:00+02:00"),
            Some(expected("2024-01-10T21:00:00Z"))
        );
        assert_eq!(
            parse_timestamp(" 2016-04-29 "),
            Some(expected("2016-04-29T00:00:00Z"))
        );
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("29/04/2016"), None);
        assert_eq!(parse_timestamp("2016-13-40T00:00:00Z"), None);
    }
}
