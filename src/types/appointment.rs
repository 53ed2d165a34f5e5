//! Raw appointment records as they arrive from training data or prediction requests

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Schema-level problems with a raw record. These are fatal: a record
/// missing a required field is rejected at the boundary instead of
/// producing a feature vector with silently different columns.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("required field `{0}` is absent")]
    MissingField(&'static str),
    #[error("invalid appointment record: {0}")]
    InvalidField(String),
    #[error("appointment record must be a JSON object")]
    NotAnObject,
}

/// A required input field and the column names it is accepted under.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

impl FieldSpec {
    const fn new(name: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { name, aliases }
    }

    /// Whether `key` names this field, canonically or through an alias.
    pub fn matches(&self, key: &str) -> bool {
        self.name == key || self.aliases.contains(&key)
    }
}

/// Fields every record must carry, in both training and inference.
pub const REQUIRED_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("gender", &["Gender"]),
    FieldSpec::new("age", &["Age"]),
    FieldSpec::new("neighbourhood", &["Neighbourhood"]),
    FieldSpec::new("welfare_benefits", &["OnGovtWelfareBenefits", "Scholarship"]),
    FieldSpec::new("hypertension", &["Hypertension", "Hipertension"]),
    FieldSpec::new("diabetes", &["Diabetes"]),
    FieldSpec::new("alcoholism", &["Alcoholism"]),
    FieldSpec::new("disability_level", &["Handicapped", "Handcap"]),
    FieldSpec::new("sms_received", &["SMS_received"]),
    FieldSpec::new("scheduled_day", &["ScheduledDay"]),
    FieldSpec::new("appointment_day", &["AppointmentDay"]),
];

/// The outcome label column.
pub const LABEL_FIELD: FieldSpec = FieldSpec::new("no_show_label", &["No-show"]);

/// One patient visit, before any feature engineering.
///
/// Column names from the original appointments dataset are accepted as
/// aliases. Timestamps stay raw strings here: parsing belongs to the
/// feature builder, where a malformed value degrades to a missing feature
/// instead of failing the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    /// Patient identifier (training data only, never a feature)
    #[serde(default, alias = "PatientId", deserialize_with = "identifier")]
    pub patient_id: Option<String>,

    /// Appointment identifier (training data only, never a feature)
    #[serde(default, alias = "AppointmentID", deserialize_with = "identifier")]
    pub appointment_id: Option<String>,

    #[serde(alias = "Gender")]
    pub gender: String,

    /// Age in years; out-of-range values are only filtered in training
    #[serde(alias = "Age")]
    pub age: i32,

    #[serde(alias = "Neighbourhood")]
    pub neighbourhood: String,

    #[serde(alias = "OnGovtWelfareBenefits", alias = "Scholarship", deserialize_with = "flag")]
    pub welfare_benefits: u8,

    #[serde(alias = "Hypertension", alias = "Hipertension", deserialize_with = "flag")]
    pub hypertension: u8,

    #[serde(alias = "Diabetes", deserialize_with = "flag")]
    pub diabetes: u8,

    #[serde(alias = "Alcoholism", deserialize_with = "flag")]
    pub alcoholism: u8,

    /// Disability level (0 = none, up to 4)
    #[serde(alias = "Handicapped", alias = "Handcap", deserialize_with = "flag")]
    pub disability_level: u8,

    #[serde(alias = "SMS_received", deserialize_with = "flag")]
    pub sms_received: u8,

    /// When the appointment was booked (ISO-8601-like)
    #[serde(alias = "ScheduledDay")]
    pub scheduled_day: String,

    /// When the appointment takes place (ISO-8601-like)
    #[serde(alias = "AppointmentDay")]
    pub appointment_day: String,

    /// Outcome label, "Yes" meaning the patient did not show up.
    /// Present in training data only.
    #[serde(default, alias = "No-show", skip_serializing_if = "Option::is_none")]
    pub no_show_label: Option<String>,
}

impl AppointmentRecord {
    /// Create a record with the given timestamps and age and all clinical
    /// flags cleared.
    pub fn new(scheduled_day: &str, appointment_day: &str, age: i32) -> Self {
        Self {
            patient_id: None,
            appointment_id: None,
            gender: "F".to_string(),
            age,
            neighbourhood: "JARDIM DA PENHA".to_string(),
            welfare_benefits: 0,
            hypertension: 0,
            diabetes: 0,
            alcoholism: 0,
            disability_level: 0,
            sms_received: 0,
            scheduled_day: scheduled_day.to_string(),
            appointment_day: appointment_day.to_string(),
            no_show_label: None,
        }
    }

    /// Attach an outcome label.
    pub fn with_label(mut self, label: &str) -> Self {
        self.no_show_label = Some(label.to_string());
        self
    }

    /// Validate and convert a JSON payload.
    ///
    /// Every required field is checked under all of its accepted names
    /// before deserialization, so a missing field is reported by name.
    /// A `null` counts as absent.
    pub fn from_json(value: Value) -> Result<Self, SchemaError> {
        let object = value.as_object().ok_or(SchemaError::NotAnObject)?;

        for field in REQUIRED_FIELDS {
            let present = object
                .iter()
                .any(|(key, v)| field.matches(key) && !v.is_null());
            if !present {
                return Err(SchemaError::MissingField(field.name));
            }
        }

        serde_json::from_value(value).map_err(|e| SchemaError::InvalidField(e.to_string()))
    }

    /// Check a tabular header row for every required column.
    pub fn check_columns<'a, I>(columns: I) -> Result<(), SchemaError>
    where
        I: IntoIterator<Item = &'a str> + Clone,
    {
        for field in REQUIRED_FIELDS {
            if !columns.clone().into_iter().any(|c| field.matches(c.trim())) {
                return Err(SchemaError::MissingField(field.name));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

/// Identifiers show up as strings in requests and as numbers in the
/// dataset export; both are kept as text.
fn identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Scalar>::deserialize(deserializer)?;
    Ok(raw.and_then(|scalar| match scalar {
        Scalar::Text(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Scalar::Integer(n) => Some(n.to_string()),
        Scalar::Float(n) => Some(n.to_string()),
    }))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagRepr {
    Bool(bool),
    Level(u8),
}

/// Clinical flags arrive as 0/1 (or an ordinal level) or as booleans.
fn flag<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match FlagRepr::deserialize(deserializer)? {
        FlagRepr::Bool(b) => u8::from(b),
        FlagRepr::Level(level) => level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> Value {
        json!({
            "Gender": "M",
            "Age": 34,
            "Neighbourhood": "CENTRO",
            "OnGovtWelfareBenefits": 0,
            "Hypertension": 1,
            "Diabetes": 0,
            "Alcoholism": 0,
            "Handicapped": 0,
            "SMS_received": 1,
            "ScheduledDay": "2016-04-29T18:38:08Z",
            "AppointmentDay": "2016-05-03T00:00:00Z"
        })
    }

    #[test]
    fn test_from_json_accepts_dataset_column_names() {
        let record = AppointmentRecord::from_json(request()).unwrap();

        assert_eq!(record.gender, "M");
        assert_eq!(record.age, 34);
        assert_eq!(record.hypertension, 1);
        assert_eq!(record.sms_received, 1);
        assert_eq!(record.patient_id, None);
        assert_eq!(record.no_show_label, None);
    }

    #[test]
    fn test_missing_required_field_is_schema_error() {
        let mut payload = request();
        payload.as_object_mut().unwrap().remove("AppointmentDay");

        let err = AppointmentRecord::from_json(payload).unwrap_err();
        assert_eq!(err, SchemaError::MissingField("appointment_day"));
    }

    #[test]
    fn test_null_required_field_counts_as_missing() {
        let mut payload = request();
        payload["Age"] = Value::Null;

        let err = AppointmentRecord::from_json(payload).unwrap_err();
        assert_eq!(err, SchemaError::MissingField("age"));
    }

    #[test]
    fn test_malformed_timestamp_is_not_a_schema_error() {
        let mut payload = request();
        payload["ScheduledDay"] = json!("not a date");

        let record = AppointmentRecord::from_json(payload).unwrap();
        assert_eq!(record.scheduled_day, "not a date");
    }

    #[test]
    fn test_wrong_type_is_invalid_field() {
        let mut payload = request();
        payload["Age"] = json!("thirty");

        let err = AppointmentRecord::from_json(payload).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField(_)));
    }

    #[test]
    fn test_fractional_age_is_invalid_field() {
        let mut payload = request();
        payload["Age"] = json!(30.0);

        let err = AppointmentRecord::from_json(payload).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField(_)));
    }

    #[test]
    fn test_negative_flag_is_invalid_field() {
        let mut payload = request();
        payload["Hypertension"] = json!(-1);

        let err = AppointmentRecord::from_json(payload).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField(_)));
    }

    #[test]
    fn test_non_object_payload() {
        let err = AppointmentRecord::from_json(json!([1, 2, 3])).unwrap_err();
        assert_eq!(err, SchemaError::NotAnObject);
    }

    #[test]
    fn test_identifiers_and_boolean_flags() {
        let mut payload = request();
        payload["PatientId"] = json!(29872499824296_i64);
        payload["AppointmentID"] = json!("5642903");
        payload["Diabetes"] = json!(true);
        payload["No-show"] = json!("No");

        let record = AppointmentRecord::from_json(payload).unwrap();
        assert_eq!(record.patient_id.as_deref(), Some("29872499824296"));
        assert_eq!(record.appointment_id.as_deref(), Some("5642903"));
        assert_eq!(record.diabetes, 1);
        assert_eq!(record.no_show_label.as_deref(), Some("No"));
    }

    #[test]
    fn test_check_columns() {
        let header = [
            "PatientId", "AppointmentID", "Gender", "ScheduledDay", "AppointmentDay", "Age",
            "Neighbourhood", "Scholarship", "Hipertension", "Diabetes", "Alcoholism", "Handcap",
            "SMS_received", "No-show",
        ];
        assert!(AppointmentRecord::check_columns(header.iter().copied()).is_ok());

        let without_age: Vec<&str> = header.iter().copied().filter(|c| *c != "Age").collect();
        assert_eq!(
            AppointmentRecord::check_columns(without_age.iter().copied()),
            Err(SchemaError::MissingField("age"))
        );
    }
}
