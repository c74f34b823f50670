//! Error types shared by the core crate

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

use crate::config::DatasetFormat;
use crate::modality::ModalityKind;

/// Malformed or inconsistent dataset configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Modality '{0}' is declared by more than one datatype")]
    DuplicateModality(ModalityKind),

    #[error("Column '{0}' is claimed by more than one datatype")]
    DuplicateColumn(String),

    #[error("Modality '{0}' cannot be stored inline in a table column")]
    NotColumnModality(ModalityKind),

    #[error("{datatype} is not supported by the {format} layout")]
    UnsupportedDatatype {
        format: DatasetFormat,
        datatype: String,
    },

    #[error("At least one modality column must be specified")]
    NoModalities,

    #[error("Path does not exist: {0}")]
    PathNotFound(String),

    #[error("No shards found in {path}: {reason}")]
    NoShardsFound { path: String, reason: String },

    #[error("Unknown table format for {0}")]
    UnknownTableFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised while reading, writing or reshaping a sample table
#[derive(Error, Debug)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("CSV parsing error: {0}")]
    Csv(String),

    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("Column '{0}' appears more than once")]
    DuplicateColumn(String),

    #[error("Column '{column}' has {actual} values, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported table format: {0}")]
    UnsupportedFormat(String),
}

impl From<csv::Error> for TableError {
    fn from(error: csv::Error) -> Self {
        match error.kind() {
            csv::ErrorKind::Io(io_err) => TableError::Io(std::io::Error::new(io_err.kind(), error.to_string())),
            _ => TableError::Csv(error.to_string()),
        }
    }
}
