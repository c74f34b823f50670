//! Building a processor from a dataset config
//!
//! The reader loads every table of the dataset, renames persisted columns to
//! their logical names and adds the full path column of each file-addressed
//! modality so that loaders never need to know the layout.

use std::sync::Arc;
use std::time::Instant;

use dpf_core::filesystem::{file_name, join_path, split_extension};
use dpf_core::{
    DataType, DatasetConfig, FileSystem, FilesDatasetConfig, LocalFileSystem, SampleTable, Value,
};
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::options::ReadOptions;
use crate::pool::ShardPool;
use crate::processor::DatasetProcessor;
use crate::DataError;

/// Column holding the shard a row was read from
pub const SPLIT_NAME_COLUMN: &str = "split_name";

/// Reads datasets through a filesystem
#[derive(Debug, Clone)]
pub struct DatasetReader {
    fs: Arc<dyn FileSystem>,
}

impl DatasetReader {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Reader over the local disk
    pub fn local() -> Self {
        Self::new(Arc::new(LocalFileSystem))
    }

    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Read the tables of a dataset into a processor
    pub fn read_from_config(
        &self,
        config: impl Into<DatasetConfig>,
        options: ReadOptions,
    ) -> Result<DatasetProcessor, DataError> {
        let config = config.into();
        let started = Instant::now();

        let table = match &config {
            DatasetConfig::Files(files) => self.read_files_table(&config, files, &options)?,
            DatasetConfig::ShardedFiles(_) | DatasetConfig::Shards(_) => {
                self.read_sharded_tables(&config, &options)?
            }
        };

        info!(
            "Read {} dataset at {}: {} samples in {:.2?}",
            config.format(),
            config.path(),
            table.num_rows(),
            started.elapsed()
        );
        Ok(DatasetProcessor::new(self.fs.clone(), table, config))
    }

    fn read_files_table(
        &self,
        config: &DatasetConfig,
        files: &FilesDatasetConfig,
        options: &ReadOptions,
    ) -> Result<SampleTable, DataError> {
        let table = self.fs.read_table(files.table_path())?;
        let mut table = to_logical(table, config, files.table_path(), options.validate_columns)?;

        for datatype in config.datatypes() {
            if let DataType::File { .. } = datatype {
                let column = datatype.logical_column();
                if !table.has_column(column) {
                    continue;
                }
                let resolved: Vec<Value> = table
                    .column_strings(column)?
                    .into_iter()
                    .map(|value| Value::from(value.map(|relative| files.resolve(&relative))))
                    .collect();
                table = table.with_values(column, &resolved)?;
            }
        }
        Ok(table)
    }

    fn read_sharded_tables(&self, config: &DatasetConfig, options: &ReadOptions) -> Result<SampleTable, DataError> {
        let table_paths = match config {
            DatasetConfig::Shards(shards) => shards.table_paths(self.fs.as_ref())?,
            DatasetConfig::ShardedFiles(sharded) => sharded.table_paths(self.fs.as_ref())?,
            DatasetConfig::Files(files) => vec![files.table_path().to_string()],
        };
        debug!("Reading {} shard tables from {}", table_paths.len(), config.path());

        let pool = ShardPool::new(options.workers)?;
        let mut tables = Vec::with_capacity(table_paths.len());
        for outcome in pool.map(table_paths, |path| self.read_shard(config, path, options)) {
            tables.push(outcome.result?);
        }
        Ok(SampleTable::concat(&tables)?)
    }

    fn read_shard(&self, config: &DatasetConfig, table_path: &str, options: &ReadOptions) -> Result<SampleTable, DataError> {
        let table = self.fs.read_table(table_path)?;
        let mut table = to_logical(table, config, table_path, options.validate_columns)?;

        let (stem, _) = split_extension(table_path);
        let split_name = file_name(stem);
        let split_values = vec![Value::from(split_name); table.num_rows()];
        table = table.with_values(SPLIT_NAME_COLUMN, &split_values)?;

        let shard_data = match config {
            DatasetConfig::Shards(shards) => shards.archive_path(table_path),
            _ => stem.to_string(),
        };
        for datatype in config.datatypes() {
            if let DataType::Sharded { modality, .. } = datatype {
                let name_column = datatype.logical_column();
                if !table.has_column(name_column) {
                    continue;
                }
                let paths: Vec<Value> = table
                    .column_strings(name_column)?
                    .into_iter()
                    .map(|name| Value::from(name.map(|name| join_path(&shard_data, &name))))
                    .collect();
                table = table.with_values(modality.modality().path_column, &paths)?;
            }
        }
        Ok(table)
    }
}

impl Default for DatasetReader {
    fn default() -> Self {
        Self::local()
    }
}

/// Rename persisted columns to logical names, optionally failing when a
/// mapped column is absent
fn to_logical(
    table: SampleTable,
    config: &DatasetConfig,
    table_path: &str,
    validate_columns: bool,
) -> Result<SampleTable, DataError> {
    let required = config.user_columns();
    let missing = table.missing_columns(required.iter().map(String::as_str));
    if validate_columns && !missing.is_empty() {
        return Err(DataError::MissingColumns {
            context: format!("Table {}", table_path),
            columns: missing,
        });
    }

    let renames: IndexMap<String, String> = config
        .columns_mapping()
        .physical_to_logical()
        .into_iter()
        .filter(|(physical, _)| table.has_column(physical))
        .collect();
    Ok(table.rename(&renames)?)
}

#[cfg(test)]
mod tests {
    use dpf_core::{ModalityColumns, ShardedFilesDatasetConfig};

    use super::*;

    #[test]
    fn test_read_files_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = format!("{}/data.csv", dir.path().display());
        std::fs::write(&table_path, "image_path,caption\nimgs/a.jpg,a cat\n").unwrap();

        let columns = ModalityColumns::new().with_image("image_path").with_text("caption");
        let config = FilesDatasetConfig::from_path_and_columns(&LocalFileSystem, &table_path, &columns).unwrap();
        let processor = DatasetReader::local().read_from_config(config, ReadOptions::default()).unwrap();

        assert_eq!(processor.columns(), vec!["image_path", "text"]);
        assert_eq!(
            processor.table().values("image_path").unwrap(),
            vec![Value::from(format!("{}/imgs/a.jpg", dir.path().display()))]
        );
    }

    #[test]
    fn test_read_sharded_files_adds_split_and_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        std::fs::write(dir.path().join("0.csv"), "image_name,caption\n0.jpg,a\n").unwrap();
        std::fs::write(dir.path().join("1.csv"), "image_name,caption,score\n1.jpg,b,0.5\n").unwrap();

        let columns = ModalityColumns::new().with_image("image_name").with_text("caption");
        let config = ShardedFilesDatasetConfig::from_path_and_columns(&LocalFileSystem, &root, &columns).unwrap();
        let processor = DatasetReader::local().read_from_config(config, ReadOptions::default()).unwrap();

        let table = processor.table();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(
            table.column_names(),
            vec!["image_name", "text", "split_name", "image_path", "score"]
        );
        assert_eq!(
            table.values("image_path").unwrap()[1],
            Value::from(format!("{}/1/1.jpg", root))
        );
        assert_eq!(table.values("split_name").unwrap()[0], Value::from("0"));
        assert!(table.values("score").unwrap()[0].is_null());
    }

    #[test]
    fn test_missing_column_fails_when_validating() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        std::fs::write(dir.path().join("0.csv"), "image_name\n0.jpg\n").unwrap();

        let columns = ModalityColumns::new().with_image("image_name").with_text("caption");
        let config = ShardedFilesDatasetConfig::from_path_and_columns(&LocalFileSystem, &root, &columns).unwrap();

        let result = DatasetReader::local().read_from_config(config.clone(), ReadOptions::default());
        assert!(matches!(result, Err(DataError::MissingColumns { .. })));

        let options = ReadOptions {
            validate_columns: false,
            ..Default::default()
        };
        let processor = DatasetReader::local().read_from_config(config, options).unwrap();
        assert_eq!(processor.len(), 1);
    }
}
