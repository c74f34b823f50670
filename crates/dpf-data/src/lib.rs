//! Dataset reading, filtering, validation and re-sharding

pub mod archive;
pub mod filters;
pub mod helpers;
pub mod loader;
pub mod options;
pub mod pool;
pub mod processor;
pub mod reader;
pub mod summary;
pub mod validators;
pub mod writers;

use dpf_core::{ConfigError, ModalityKind, TableError};
use thiserror::Error;

// Re-exports
pub use filters::{ColumnFilter, DataFilter, ErasedDataFilter, FilterError, FilterKind};
pub use loader::{FilesDataset, ModalityData, SampleData};
pub use options::{
    FileNaming, FilterRunOptions, ReadOptions, ShardedFilesWriteOptions, ShardsWriteOptions,
    ValidationOptions,
};
pub use processor::DatasetProcessor;
pub use reader::DatasetReader;
pub use summary::DatasetSummary;
pub use validators::ValidationResult;

/// Errors that can occur in dataset operations
#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("{context} is missing columns {columns:?}")]
    MissingColumns { context: String, columns: Vec<String> },

    #[error("Modality '{0}' is not part of the dataset")]
    UnknownModality(ModalityKind),

    #[error("Column '{0}' is part of the dataset layout and cannot be changed")]
    ProtectedColumn(String),

    #[error("Dataset has no file-addressed modality to use as a key")]
    NoKeyColumn,

    #[error("Precondition failed for {} table(s): {}", .0.len(), format_failures(.0))]
    Precondition(Vec<(String, String)>),

    #[error("Archive error in {path}: {message}")]
    Archive { path: String, message: String },

    #[error("No samples to choose from")]
    EmptySelection,

    #[error("Thread pool error: {0}")]
    Pool(String),

    #[error("Other error: {0}")]
    Other(String),
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(path, message)| format!("{}: {}", path, message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A filter or merge changed the identity of the samples
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Result has different values in key column '{column}'")]
    KeySetChanged { column: String },

    #[error("Length of result changed. Old length = {old}, new = {new}")]
    RowCountChanged { old: usize, new: usize },
}

impl From<rayon::ThreadPoolBuildError> for DataError {
    fn from(error: rayon::ThreadPoolBuildError) -> Self {
        DataError::Pool(error.to_string())
    }
}
