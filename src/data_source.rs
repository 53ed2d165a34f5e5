//! Sources of labelled appointment records for training

use crate::types::appointment::LABEL_FIELD;
use crate::types::{AppointmentRecord, SchemaError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },
    #[error("{path}, record {record}: {source}")]
    Record {
        path: PathBuf,
        record: u64,
        #[source]
        source: csv::Error,
    },
}

/// Where a training run reads its records from.
pub trait DataSource {
    fn read(&self) -> Result<Vec<AppointmentRecord>, DataSourceError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Comma-separated file with a header row.
///
/// The header must name every required field under one of its accepted
/// column names; a missing column fails the whole read. Extra columns are
/// ignored.
#[derive(Debug, Clone)]
pub struct CsvDataSource {
    path: PathBuf,
}

impl CsvDataSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for CsvDataSource {
    fn read(&self) -> Result<Vec<AppointmentRecord>, DataSourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|source| DataSourceError::Open {
                path: self.path.clone(),
                source,
            })?;

        let headers = reader
            .headers()
            .map_err(|source| DataSourceError::Open {
                path: self.path.clone(),
                source,
            })?
            .clone();
        AppointmentRecord::check_columns(headers.iter()).map_err(|source| {
            DataSourceError::Schema {
                path: self.path.clone(),
                source,
            }
        })?;

        let labelled = headers.iter().any(|c| LABEL_FIELD.matches(c.trim()));

        let mut records = Vec::new();
        for (index, result) in reader.deserialize::<AppointmentRecord>().enumerate() {
            let mut record = result.map_err(|source| DataSourceError::Record {
                path: self.path.clone(),
                record: index as u64 + 1,
                source,
            })?;
            // A blank cell in a label column is an unlabelled outcome, not an absent column
            if labelled && record.no_show_label.is_none() {
                record.no_show_label = Some(String::new());
            }
            records.push(record);
        }

        info!(path = %self.path.display(), records = records.len(), "Appointment data loaded");
        Ok(records)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Records already in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    records: Vec<AppointmentRecord>,
}

impl InMemorySource {
    pub fn new(records: Vec<AppointmentRecord>) -> Self {
        Self { records }
    }
}

impl DataSource for InMemorySource {
    fn read(&self) -> Result<Vec<AppointmentRecord>, DataSourceError> {
        Ok(self.records.clone())
    }

    fn describe(&self) -> String {
        format!("{} in-memory records", self.records.len())
    }
}
