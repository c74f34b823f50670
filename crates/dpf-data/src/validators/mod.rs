//! Dataset validation
//!
//! Validators compare a dataset on disk with its config and the table read
//! from it. Problems are collected into a [`ValidationResult`] instead of
//! being returned as errors; only failures that prevent validation from
//! running at all (the root cannot be listed, the worker pool cannot start)
//! are returned as `Err`.

mod files;
mod sharded;

pub use files::FilesValidator;
pub use sharded::ShardedValidator;

use std::fmt;

use ahash::AHashMap;
use dpf_core::{DatasetConfig, FileSystem, SampleTable};
use indexmap::IndexMap;

use crate::options::ValidationOptions;
use crate::DataError;

/// Problem found by looking at which files exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStructureError {
    /// Values of a column that must identify samples repeat across the dataset
    IsNotKey { column: String },
    /// A file the layout requires does not exist
    NoSuchFile { path: String },
    /// A shard table or shard data could not be read
    UnreadableShard { path: String, message: String },
}

impl fmt::Display for FileStructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStructureError::IsNotKey { column } => {
                write!(f, "IsNotKeyError(column = \"{}\")", column)
            }
            FileStructureError::NoSuchFile { path } => write!(f, "NoSuchFileError(path = \"{}\")", path),
            FileStructureError::UnreadableShard { path, message } => {
                write!(f, "UnreadableShardError(path = \"{}\", message = \"{}\")", path, message)
            }
        }
    }
}

/// Problem found in the contents of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFrameError {
    MissedColumns { path: String, columns: Vec<String> },
    /// `count` values of `column` occur more than once
    DuplicatedValues { path: String, column: String, count: usize },
    /// `count` values of `column` reference data that does not exist
    MissingValue { path: String, column: String, count: usize },
}

impl fmt::Display for DataFrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataFrameError::MissedColumns { path, columns } => {
                write!(f, "MissedColumnsError(path = \"{}\", columns = {:?})", path, columns)
            }
            DataFrameError::DuplicatedValues { path, column, count } => write!(
                f,
                "DuplicatedValuesError(path = \"{}\", column = \"{}\", count = {})",
                path, column, count
            ),
            DataFrameError::MissingValue { path, column, count } => write!(
                f,
                "MissingValueError(path = \"{}\", column = \"{}\", count = {})",
                path, column, count
            ),
        }
    }
}

/// Result of validating a flat-files dataset
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilesValidationResult {
    pub filestructure_errors: Vec<FileStructureError>,
    pub metadata_errors: Vec<DataFrameError>,
}

/// Result of validating a sharded dataset. Only tables with errors appear
/// in `metadata_errors`, in shard listing order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardedValidationResult {
    pub filestructure_errors: Vec<FileStructureError>,
    pub metadata_errors: IndexMap<String, Vec<DataFrameError>>,
}

/// Validation result of any layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Files(FilesValidationResult),
    Sharded(ShardedValidationResult),
}

impl ValidationResult {
    pub fn filestructure_errors(&self) -> &[FileStructureError] {
        match self {
            ValidationResult::Files(result) => &result.filestructure_errors,
            ValidationResult::Sharded(result) => &result.filestructure_errors,
        }
    }

    /// All table errors, in order
    pub fn metadata_errors(&self) -> Vec<&DataFrameError> {
        match self {
            ValidationResult::Files(result) => result.metadata_errors.iter().collect(),
            ValidationResult::Sharded(result) => result.metadata_errors.values().flatten().collect(),
        }
    }

    pub fn total_errors(&self) -> usize {
        self.filestructure_errors().len() + self.metadata_errors().len()
    }

    pub fn is_ok(&self) -> bool {
        self.total_errors() == 0
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationResult::Files(result) => {
                writeln!(f, "FilesValidationResult:")?;
                writeln!(f, "filestructure_errors = [")?;
                for error in &result.filestructure_errors {
                    writeln!(f, "\t{}", error)?;
                }
                writeln!(f, "]")?;
                writeln!(f, "metadata_errors = [")?;
                for error in &result.metadata_errors {
                    writeln!(f, "\t{}", error)?;
                }
                write!(f, "]")
            }
            ValidationResult::Sharded(result) => {
                writeln!(f, "ShardedValidationResult:")?;
                writeln!(f, "filestructure_errors = [")?;
                for error in &result.filestructure_errors {
                    writeln!(f, "\t{}", error)?;
                }
                writeln!(f, "]")?;
                writeln!(f, "metadata_errors = {{")?;
                for (path, errors) in &result.metadata_errors {
                    writeln!(f, "\t{}: [", path)?;
                    for error in errors {
                        writeln!(f, "\t\t{}", error)?;
                    }
                    writeln!(f, "\t]")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Validate a dataset with the validator matching its layout
pub fn validate(
    fs: &dyn FileSystem,
    table: &SampleTable,
    config: &DatasetConfig,
    options: &ValidationOptions,
) -> Result<ValidationResult, DataError> {
    let columns_to_check = options
        .columns_to_check
        .clone()
        .unwrap_or_else(|| config.user_columns());

    match config {
        DatasetConfig::Files(config) => {
            FilesValidator::new(fs, table, config, columns_to_check).validate(options)
        }
        DatasetConfig::ShardedFiles(config) => {
            ShardedValidator::sharded_files(fs, table, config, columns_to_check).validate(options)
        }
        DatasetConfig::Shards(config) => {
            ShardedValidator::shards(fs, table, config, columns_to_check).validate(options)
        }
    }
}

/// Number of distinct non-null values occurring more than once. Both
/// layouts report `DuplicatedValues` and `IsNotKey` with this count.
pub(crate) fn count_repeated(values: &[Option<String>]) -> usize {
    let mut counts: AHashMap<&str, usize> = AHashMap::new();
    for value in values.iter().flatten() {
        *counts.entry(value.as_str()).or_default() += 1;
    }
    counts.values().filter(|count| **count > 1).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_errors_counts_both_phases() {
        let mut metadata_errors = IndexMap::new();
        metadata_errors.insert(
            "0.csv".to_string(),
            vec![
                DataFrameError::MissedColumns {
                    path: "0.csv".into(),
                    columns: vec!["caption".into()],
                },
                DataFrameError::MissingValue {
                    path: "0.csv".into(),
                    column: "image_name".into(),
                    count: 2,
                },
            ],
        );
        let result = ValidationResult::Sharded(ShardedValidationResult {
            filestructure_errors: vec![FileStructureError::IsNotKey {
                column: "image_name".into(),
            }],
            metadata_errors,
        });

        assert_eq!(result.total_errors(), 3);
        assert!(!result.is_ok());
        let text = result.to_string();
        assert!(text.contains("IsNotKeyError(column = \"image_name\")"));
        assert!(text.contains("MissingValueError"));
    }

    #[test]
    fn test_count_repeated() {
        let values = |raw: &[Option<&str>]| raw.iter().map(|v| v.map(str::to_string)).collect::<Vec<_>>();
        assert_eq!(count_repeated(&values(&[Some("a"), Some("b"), Some("a"), Some("a"), Some("c"), Some("c")])), 2);
        assert_eq!(count_repeated(&values(&[Some("a"), Some("b")])), 0);
        assert_eq!(count_repeated(&values(&[None, None, Some("a.jpg"), Some("a.jpg")])), 1);
        assert_eq!(count_repeated(&values(&[None, None, Some("a.jpg")])), 0);
    }

    #[test]
    fn test_empty_result_is_ok() {
        assert!(ValidationResult::Files(FilesValidationResult::default()).is_ok());
    }
}
