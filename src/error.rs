use std::path::PathBuf;

use crate::record_io::RecordFormat;

// -------------------------------------------------------------------------------------------------
// HashError
// -------------------------------------------------------------------------------------------------
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("no hash key was supplied")]
    MissingKey,

    #[error("the hash key is empty")]
    EmptyKey,

    #[error("the hash key was rejected by the HMAC implementation")]
    InvalidKey,
}

// -------------------------------------------------------------------------------------------------
// FrequencyError
// -------------------------------------------------------------------------------------------------
#[derive(Debug, thiserror::Error)]
pub enum FrequencyError {
    #[error("failed to read {field} frequencies from {}: {source}", path.display())]
    Io {
        field: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {field} frequency data, row {row}: {message}")]
    Malformed {
        field: &'static str,
        row: usize,
        message: String,
    },

    #[error("{field} frequencies sum to {total}, which exceeds 1")]
    ExcessMass { field: &'static str, total: f64 },

    #[error("no reference data was supplied for any identifier field")]
    NoFields,

    #[error("invalid birth year range {first}..={last}")]
    BirthYearRange { first: i32, last: i32 },

    #[error("minimum frequency must lie in (0, 1), got {0}")]
    MinFrequency(f64),
}

// -------------------------------------------------------------------------------------------------
// ConfigError
// -------------------------------------------------------------------------------------------------
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a probability in (0, 1), got {value}")]
    Probability { name: &'static str, value: f64 },

    #[error("{name} must be finite, got {value}")]
    NotFinite { name: &'static str, value: f64 },

    #[error("{name}: {message}")]
    Invalid { name: &'static str, message: String },

    #[error("comparing {probands} probands against a {sample} sample requires a hash key")]
    KeyRequired {
        probands: RecordFormat,
        sample: RecordFormat,
    },

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("failed to read matching parameters from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse matching parameters from {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

// -------------------------------------------------------------------------------------------------
// RowError
// -------------------------------------------------------------------------------------------------
/// A problem with a single input row. Rows with errors are skipped, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("local_id is empty")]
    EmptyLocalId,

    #[error("duplicate local_id {0:?}")]
    DuplicateLocalId(String),

    #[error("unparseable date of birth {0:?}")]
    BadDate(String),

    #[error("unrecognized sex {0:?}")]
    BadSex(String),

    #[error("malformed postcode {0:?}")]
    BadPostcode(String),

    #[error("{field}: {message}")]
    BadHashedField {
        field: &'static str,
        message: String,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

// -------------------------------------------------------------------------------------------------
// RecordFileError
// -------------------------------------------------------------------------------------------------
#[derive(Debug, thiserror::Error)]
pub enum RecordFileError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source_name} has no {column} column")]
    MissingColumn {
        source_name: String,
        column: &'static str,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

// -------------------------------------------------------------------------------------------------
// RunError
// -------------------------------------------------------------------------------------------------
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write match decisions: {0}")]
    Output(#[from] std::io::Error),

    #[error("failed to write match decisions: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to serialize match decisions: {0}")]
    Json(#[from] serde_json::Error),
}
