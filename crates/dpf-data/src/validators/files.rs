use std::time::Instant;

use ahash::AHashSet;
use dpf_core::{DataType, FileSystem, FilesDatasetConfig, SampleTable};
use tracing::info;

use super::{count_repeated, DataFrameError, FileStructureError, FilesValidationResult, ValidationResult};
use crate::options::ValidationOptions;
use crate::pool::ShardPool;
use crate::DataError;

/// Validator for the flat-files layout
pub struct FilesValidator<'a> {
    fs: &'a dyn FileSystem,
    table: &'a SampleTable,
    config: &'a FilesDatasetConfig,
    columns_to_check: Vec<String>,
}

impl<'a> FilesValidator<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        table: &'a SampleTable,
        config: &'a FilesDatasetConfig,
        columns_to_check: Vec<String>,
    ) -> Self {
        Self {
            fs,
            table,
            config,
            columns_to_check,
        }
    }

    pub fn validate(&self, options: &ValidationOptions) -> Result<ValidationResult, DataError> {
        let started = Instant::now();
        let mut result = FilesValidationResult::default();

        if options.validate_filestructure {
            if !self.fs.exists(self.config.table_path()) {
                result.filestructure_errors.push(FileStructureError::NoSuchFile {
                    path: self.config.table_path().to_string(),
                });
            }
            for datatype in self.config.base().datatypes() {
                if let DataType::File { .. } = datatype {
                    let repeated = self
                        .table
                        .column_strings(datatype.logical_column())
                        .map(|paths| count_repeated(&paths) > 0)
                        .unwrap_or(false);
                    if repeated {
                        result.filestructure_errors.push(FileStructureError::IsNotKey {
                            column: datatype.user_column().to_string(),
                        });
                    }
                }
            }
        }

        if options.validate_metadata && self.fs.exists(self.config.table_path()) {
            match self.fs.read_table(self.config.table_path()) {
                Ok(table) => result.metadata_errors = self.validate_table(&table, options.workers)?,
                Err(err) => result.filestructure_errors.push(FileStructureError::UnreadableShard {
                    path: self.config.table_path().to_string(),
                    message: err.to_string(),
                }),
            }
        }

        let result = ValidationResult::Files(result);
        info!(
            "Validated {} in {:.2?}: {} errors",
            self.config.table_path(),
            started.elapsed(),
            result.total_errors()
        );
        Ok(result)
    }

    fn validate_table(&self, table: &SampleTable, workers: usize) -> Result<Vec<DataFrameError>, DataError> {
        let path = self.config.table_path();
        let mut errors = Vec::new();

        let missed = table.missing_columns(self.columns_to_check.iter().map(String::as_str));
        if !missed.is_empty() {
            errors.push(DataFrameError::MissedColumns {
                path: path.to_string(),
                columns: missed,
            });
        }

        let pool = ShardPool::new(workers)?;
        for datatype in self.config.base().datatypes() {
            if !matches!(datatype, DataType::File { .. }) {
                continue;
            }
            let column = datatype.user_column();
            let Ok(values) = table.column_strings(column) else {
                continue;
            };

            let duplicates = count_repeated(&values);
            if duplicates > 0 {
                errors.push(DataFrameError::DuplicatedValues {
                    path: path.to_string(),
                    column: column.to_string(),
                    count: duplicates,
                });
            }

            let referenced: Vec<String> = values
                .into_iter()
                .flatten()
                .collect::<AHashSet<_>>()
                .into_iter()
                .collect();
            let missing = pool
                .map(referenced, |relative| self.fs.exists(&self.config.resolve(relative)))
                .into_iter()
                .filter(|outcome| !outcome.result)
                .count();
            if missing > 0 {
                errors.push(DataFrameError::MissingValue {
                    path: path.to_string(),
                    column: column.to_string(),
                    count: missing,
                });
            }
        }
        Ok(errors)
    }
}
