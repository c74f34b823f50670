//! In-memory dataset and the operations on it
//!
//! A [`DatasetProcessor`] owns the sample table read from a dataset. Filters
//! and row selections replace the table as a whole; column mutations are
//! written to the dataset's table files first and only then applied in
//! memory.

use std::sync::Arc;
use std::time::Instant;

use ahash::{AHashMap, AHashSet};
use dpf_core::filesystem::{file_name, join_path, split_extension};
use dpf_core::{DatasetConfig, DatasetFormat, FileSystem, ModalityKind, ModalityLocation, Row, SampleTable, Value};
use indexmap::IndexMap;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::filters::{ColumnFilter, ErasedDataFilter, FilterRunner};
use crate::helpers::DataFramesChanger;
use crate::loader::{FilesDataset, ModalityData, SampleData};
use crate::options::{FilterRunOptions, ShardedFilesWriteOptions, ShardsWriteOptions, ValidationOptions};
use crate::reader::SPLIT_NAME_COLUMN;
use crate::summary::DatasetSummary;
use crate::validators::{self, ValidationResult};
use crate::writers::{SampleFiles, ShardedFilesWriter, ShardsWriter, Writer};
use crate::{DataError, IntegrityError};

/// Threads used by column mutations
const MUTATION_WORKERS: usize = 16;

/// A dataset loaded into memory together with its config
#[derive(Debug)]
pub struct DatasetProcessor {
    fs: Arc<dyn FileSystem>,
    table: SampleTable,
    config: DatasetConfig,
}

impl DatasetProcessor {
    pub fn new(fs: Arc<dyn FileSystem>, table: SampleTable, config: DatasetConfig) -> Self {
        Self { fs, table, config }
    }

    pub fn table(&self) -> &SampleTable {
        &self.table
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn columns(&self) -> Vec<String> {
        self.table.column_names()
    }

    pub fn modalities(&self) -> Vec<ModalityKind> {
        self.config.modalities()
    }

    pub fn len(&self) -> usize {
        self.table.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Values of one column
    pub fn column(&self, name: &str) -> Result<Vec<Value>, DataError> {
        Ok(self.table.values(name)?)
    }

    pub fn summary(&self) -> Result<DatasetSummary, DataError> {
        DatasetSummary::new(&self.table, &self.config)
    }

    /// Run a data filter over every sample and merge its result columns
    /// into the table on the filter's key column.
    ///
    /// With `validate_filter_result` the result must hold every key of the
    /// table exactly once, otherwise the table is left unchanged and an
    /// [`IntegrityError`] is returned.
    pub fn apply_data_filter(
        &mut self,
        filter: &dyn ErasedDataFilter,
        options: FilterRunOptions,
    ) -> Result<(), DataError> {
        let runner = FilterRunner::new(filter, options.return_none_on_error);
        let descriptor = runner.descriptor();
        let dataset = FilesDataset::new(
            self.fs.clone(),
            &self.table,
            &self.config,
            &descriptor.modalities,
            &descriptor.columns_to_load(),
        )?;

        let result = runner.run(&dataset)?;
        if options.validate_filter_result {
            check_integrity(&self.table, &result, &descriptor.key_column)?;
        }
        self.table = self.table.left_join(&result, &descriptor.key_column)?;
        Ok(())
    }

    /// Run a column filter and assign its columns by position
    pub fn apply_column_filter(&mut self, filter: &dyn ColumnFilter, validate_filter_result: bool) -> Result<(), DataError> {
        let needed = filter.columns_to_process();
        let missing = self.table.missing_columns(needed.iter().map(String::as_str));
        if !missing.is_empty() {
            return Err(DataError::MissingColumns {
                context: format!("Column filter {}", filter.name()),
                columns: missing,
            });
        }

        let result = filter.process(&self.table)?;
        let mut table = self.table.clone();
        for (column, values) in &result {
            if validate_filter_result && values.len() != self.table.num_rows() {
                return Err(IntegrityError::RowCountChanged {
                    old: self.table.num_rows(),
                    new: values.len(),
                }
                .into());
            }
            table = table.with_values(column, values)?;
        }
        self.table = table;
        Ok(())
    }

    /// Keep only rows where `mask` is true
    pub fn filter_rows(&mut self, mask: &[bool]) -> Result<(), DataError> {
        self.table = self.table.filter(mask)?;
        Ok(())
    }

    /// Load one random sample, optionally among rows where `mask` is true
    pub fn get_random_sample(&self, mask: Option<&[bool]>) -> Result<SampleData, DataError> {
        let candidates: Vec<usize> = match mask {
            Some(mask) => mask
                .iter()
                .enumerate()
                .filter(|(_, keep)| **keep)
                .map(|(idx, _)| idx)
                .filter(|idx| *idx < self.table.num_rows())
                .collect(),
            None => (0..self.table.num_rows()).collect(),
        };
        let idx = *candidates
            .choose(&mut rand::thread_rng())
            .ok_or(DataError::EmptySelection)?;

        let row = self.table.take(&[idx])?;
        let dataset = FilesDataset::new(
            self.fs.clone(),
            &row,
            &self.config,
            &self.config.modalities(),
            &row.column_names(),
        )?;
        dataset.get(0)
    }

    /// Rename columns in every table file of the dataset and in memory.
    /// Returns the tables that could not be written.
    pub fn rename_columns(&mut self, mapping: &IndexMap<String, String>) -> Result<Vec<String>, DataError> {
        for (old, new) in mapping {
            self.check_unprotected(old)?;
            self.check_unprotected(new)?;
        }

        // A rename that would clash in memory must fail before any file is touched
        let in_memory: IndexMap<String, String> = mapping
            .iter()
            .filter(|(old, _)| self.table.has_column(old))
            .map(|(old, new)| (old.clone(), new.clone()))
            .collect();
        let renamed = self.table.rename(&in_memory)?;

        let changer = DataFramesChanger::new(self.fs.clone(), self.table_paths()?, MUTATION_WORKERS);
        let errors = changer.rename_columns(mapping)?;
        self.table = renamed;
        Ok(errors)
    }

    /// Delete columns from every table file of the dataset and from memory
    pub fn delete_columns(&mut self, columns: &[String]) -> Result<Vec<String>, DataError> {
        for column in columns {
            self.check_unprotected(column)?;
        }

        let in_memory: Vec<String> = columns.iter().filter(|c| self.table.has_column(c)).cloned().collect();
        let remaining = self.table.drop_columns(&in_memory)?;

        let changer = DataFramesChanger::new(self.fs.clone(), self.table_paths()?, MUTATION_WORKERS);
        let errors = changer.delete_columns(columns)?;
        self.table = remaining;
        Ok(errors)
    }

    /// Write the in-memory values of `columns` to the dataset's table files,
    /// adding the columns where they do not exist yet. Rows are matched on
    /// the first file-addressed modality.
    pub fn update_columns(&self, columns: &[String]) -> Result<Vec<String>, DataError> {
        for column in columns {
            self.check_unprotected(column)?;
        }
        let missing = self.table.missing_columns(columns.iter().map(String::as_str));
        if !missing.is_empty() {
            return Err(DataError::MissingColumns {
                context: "Dataset".to_string(),
                columns: missing,
            });
        }

        let key = self
            .config
            .datatypes()
            .iter()
            .find(|datatype| datatype.is_file_addressed())
            .ok_or(DataError::NoKeyColumn)?;
        let logical_key = key.logical_column();
        let physical_key = key.user_column();

        let mut selected = vec![logical_key.to_string()];
        selected.extend(columns.iter().cloned());

        // In memory, flat-files keys are resolved paths; the table file holds
        // them as written, relative to its directory or absolute. An unreadable
        // table is reported by the changer's precondition pass.
        let stored_keys: Option<AHashMap<String, String>> = match &self.config {
            DatasetConfig::Files(files) => self
                .fs
                .read_table(files.table_path())
                .and_then(|table| table.column_strings(physical_key))
                .ok()
                .map(|keys| {
                    keys.into_iter()
                        .flatten()
                        .map(|stored| (files.resolve(&stored), stored))
                        .collect()
                }),
            _ => None,
        };

        let mut updates: IndexMap<String, SampleTable> = IndexMap::new();
        for (table_path, rows) in self.rows_by_table()? {
            let mut part = self.table.take(&rows)?.select(&selected)?;
            if let DatasetConfig::Files(files) = &self.config {
                let stored: Vec<Value> = part
                    .column_strings(logical_key)?
                    .into_iter()
                    .map(|path| {
                        Value::from(path.map(|path| {
                            stored_keys
                                .as_ref()
                                .and_then(|keys| keys.get(&path))
                                .cloned()
                                .unwrap_or_else(|| files.relativize(&path).to_string())
                        }))
                    })
                    .collect();
                part = part.with_values(logical_key, &stored)?;
            }
            if logical_key != physical_key {
                let mut rename = IndexMap::new();
                rename.insert(logical_key.to_string(), physical_key.to_string());
                part = part.rename(&rename)?;
            }
            updates.insert(table_path, part);
        }

        let changer = DataFramesChanger::new(self.fs.clone(), updates.keys().cloned().collect(), MUTATION_WORKERS);
        changer.update_columns(physical_key, &updates)
    }

    /// Check the dataset on disk against its config and this table
    pub fn validate(&self, options: ValidationOptions) -> Result<ValidationResult, DataError> {
        validators::validate(self.fs.as_ref(), &self.table, &self.config, &options)
    }

    /// Write the dataset as tar shards under `destination`. Returns the
    /// samples and shards that could not be written.
    pub fn save_to_shards(&self, destination: &str, options: ShardsWriteOptions) -> Result<Vec<String>, DataError> {
        let columns_to_save = options.columns_to_save.clone();
        let workers = options.workers;
        let mut writer = ShardsWriter::new(self.fs.clone(), destination, options)?;
        self.write_dataset(&mut writer, &columns_to_save, workers)
    }

    /// Write the dataset as sharded directories under `destination`
    pub fn save_to_sharded_files(
        &self,
        destination: &str,
        options: ShardedFilesWriteOptions,
    ) -> Result<Vec<String>, DataError> {
        let columns_to_save = options.columns_to_save.clone();
        let workers = options.workers;
        let mut writer = ShardedFilesWriter::new(self.fs.clone(), destination, options)?;
        self.write_dataset(&mut writer, &columns_to_save, workers)
    }

    fn write_dataset(
        &self,
        writer: &mut dyn Writer,
        columns_to_save: &[String],
        workers: usize,
    ) -> Result<Vec<String>, DataError> {
        let started = Instant::now();
        let modalities = self.config.modalities();
        let dataset = FilesDataset::new(self.fs.clone(), &self.table, &self.config, &modalities, columns_to_save)?;

        let file_columns: Vec<(ModalityKind, String)> = modalities
            .iter()
            .filter_map(|&modality| match self.config.modality_location(modality)? {
                ModalityLocation::File { path_column } | ModalityLocation::ArchiveMember { path_column } => {
                    Some((modality, path_column))
                }
                ModalityLocation::Column(_) => None,
            })
            .collect();

        let mut errors = Vec::new();
        let mut written = 0usize;
        dataset.for_each(
            workers,
            |idx, sample| (idx, sample),
            |(idx, sample)| {
                let outcome = sample.and_then(|sample| {
                    let (files, metadata) = split_sample(sample, &file_columns);
                    writer.save_sample(files, metadata)
                });
                match outcome {
                    Ok(()) => written += 1,
                    Err(err) => errors.push(format!("Error during saving sample {}: {}", idx, err)),
                }
                Ok(())
            },
        )?;
        errors.extend(writer.finish());

        info!(
            "Wrote {} of {} samples in {:.2?} ({} errors)",
            written,
            dataset.len(),
            started.elapsed(),
            errors.len()
        );
        Ok(errors)
    }

    /// Table files of the dataset
    fn table_paths(&self) -> Result<Vec<String>, DataError> {
        Ok(match &self.config {
            DatasetConfig::Files(files) => vec![files.table_path().to_string()],
            DatasetConfig::ShardedFiles(sharded) => sharded.table_paths(self.fs.as_ref())?,
            DatasetConfig::Shards(shards) => shards.table_paths(self.fs.as_ref())?,
        })
    }

    /// Row indices of the in-memory table grouped by the table file they
    /// were read from
    fn rows_by_table(&self) -> Result<IndexMap<String, Vec<usize>>, DataError> {
        let mut groups: IndexMap<String, Vec<usize>> = IndexMap::new();
        match &self.config {
            DatasetConfig::Files(files) => {
                groups.insert(files.table_path().to_string(), (0..self.table.num_rows()).collect());
            }
            DatasetConfig::ShardedFiles(_) | DatasetConfig::Shards(_) => {
                let ext = self.config.datafiles_ext();
                for (idx, split) in self.table.column_strings(SPLIT_NAME_COLUMN)?.into_iter().enumerate() {
                    let split = split.ok_or_else(|| DataError::Other(format!("Row {} has no {}", idx, SPLIT_NAME_COLUMN)))?;
                    let path = join_path(self.config.path(), &format!("{}.{}", split, ext));
                    groups.entry(path).or_default().push(idx);
                }
            }
        }
        Ok(groups)
    }

    /// Columns that describe the layout and cannot be changed through
    /// column operations
    fn protected_columns(&self) -> AHashSet<String> {
        let mapping = self.config.columns_mapping();
        let mut protected: AHashSet<String> = mapping
            .physical_columns()
            .into_iter()
            .chain(mapping.logical_columns())
            .map(str::to_string)
            .collect();
        for datatype in self.config.datatypes().iter().filter(|d| d.is_file_addressed()) {
            protected.insert(datatype.modality().path_column.to_string());
        }
        if self.config.format() != DatasetFormat::Files {
            protected.insert(SPLIT_NAME_COLUMN.to_string());
        }
        protected
    }

    fn check_unprotected(&self, column: &str) -> Result<(), DataError> {
        if self.protected_columns().contains(column) {
            warn!("Refusing to change layout column '{}'", column);
            return Err(DataError::ProtectedColumn(column.to_string()));
        }
        Ok(())
    }
}

/// Key set and row count of a filter result must match the table
fn check_integrity(table: &SampleTable, result: &SampleTable, key_column: &str) -> Result<(), DataError> {
    if table.num_rows() != result.num_rows() {
        return Err(IntegrityError::RowCountChanged {
            old: table.num_rows(),
            new: result.num_rows(),
        }
        .into());
    }
    if result.duplicated_count(key_column)? > 0 || table.key_set(key_column)? != result.key_set(key_column)? {
        return Err(IntegrityError::KeySetChanged {
            column: key_column.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Split a loaded sample into the files to write and the metadata row.
/// Path columns are dropped from the metadata; the writer records basenames.
fn split_sample(sample: SampleData, file_columns: &[(ModalityKind, String)]) -> (SampleFiles, Row) {
    let SampleData { modalities, mut metadata } = sample;
    let mut files = SampleFiles::new();

    for (modality, data) in modalities {
        let ModalityData::Bytes(bytes) = data else {
            continue;
        };
        let Some((_, path_column)) = file_columns.iter().find(|(kind, _)| *kind == modality) else {
            continue;
        };
        let ext = match metadata.get(path_column) {
            Some(Value::Str(path)) => split_extension(file_name(path)).1.unwrap_or_default().to_string(),
            _ => String::new(),
        };
        metadata.shift_remove(path_column);
        metadata.shift_remove(modality.modality().sharded_file_name_column);
        files.insert(modality, (ext, bytes));
    }
    (files, metadata)
}

#[cfg(test)]
mod tests {
    use dpf_core::{FilesDatasetConfig, LocalFileSystem, ModalityColumns};

    use super::*;
    use crate::filters::{empty_batch, ColumnBatch, DataFilter, FilterError, FilterKind, TextLengthFilter};
    use crate::options::ReadOptions;
    use crate::reader::DatasetReader;

    /// Files dataset with three images and the given captions
    fn files_processor(dir: &std::path::Path, captions: [&str; 3]) -> DatasetProcessor {
        let mut table = String::from("image_path,caption\n");
        for (name, caption) in ["a", "b", "c"].into_iter().zip(captions) {
            std::fs::write(dir.join(format!("{}.jpg", name)), name.repeat(3)).unwrap();
            table.push_str(&format!("{}.jpg,{}\n", name, caption));
        }
        let table_path = format!("{}/data.csv", dir.display());
        std::fs::write(&table_path, table).unwrap();

        let columns = ModalityColumns::new().with_image("image_path").with_text("caption");
        let config = FilesDatasetConfig::from_path_and_columns(&LocalFileSystem, &table_path, &columns).unwrap();
        DatasetReader::local().read_from_config(config, ReadOptions::default()).unwrap()
    }

    /// Size of the image in bytes, keyed on any column
    struct ByteCount {
        key: &'static str,
        kind: FilterKind,
    }

    impl DataFilter for ByteCount {
        type Feature = usize;

        fn name(&self) -> &str {
            "byte_count"
        }

        fn kind(&self) -> FilterKind {
            self.kind
        }

        fn key_column(&self) -> &str {
            self.key
        }

        fn result_columns(&self) -> Vec<String> {
            vec!["size".to_string()]
        }

        fn batch_size(&self) -> usize {
            2
        }

        fn preprocess(&self, sample: &SampleData) -> Result<usize, FilterError> {
            Ok(sample.bytes(ModalityKind::Image).map(<[u8]>::len).unwrap_or(0))
        }

        fn process_batch(&self, batch: Vec<Option<usize>>) -> Result<ColumnBatch, FilterError> {
            let mut out = empty_batch(&self.result_columns(), batch.len());
            for feature in batch {
                out["size"].push(Value::from(feature.map(|f| f as i64)));
            }
            Ok(out)
        }
    }

    #[test]
    fn test_apply_data_filter_merges_on_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = files_processor(dir.path(), ["one cat", "two dogs", "a bird"]);
        let filter = ByteCount {
            key: "image_path",
            kind: FilterKind::Image,
        };
        processor.apply_data_filter(&filter, FilterRunOptions::default()).unwrap();

        assert_eq!(processor.columns(), vec!["image_path", "text", "size"]);
        assert_eq!(processor.column("size").unwrap(), vec![Value::Int(3); 3]);
    }

    #[test]
    fn test_duplicate_result_keys_leave_table_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = files_processor(dir.path(), ["same", "same", "other"]);
        let filter = ByteCount {
            key: "text",
            kind: FilterKind::Text,
        };
        let err = processor
            .apply_data_filter(&filter, FilterRunOptions::default())
            .unwrap_err();

        assert!(matches!(err, DataError::Integrity(IntegrityError::KeySetChanged { .. })));
        assert_eq!(processor.columns(), vec!["image_path", "text"]);
        assert_eq!(processor.len(), 3);
    }

    #[test]
    fn test_integrity_check_counts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let processor = files_processor(dir.path(), ["one cat", "two dogs", "a bird"]);
        let short = processor.table().take(&[0]).unwrap();
        let err = check_integrity(processor.table(), &short, "image_path").unwrap_err();
        assert!(matches!(err, DataError::Integrity(IntegrityError::RowCountChanged { old: 3, new: 1 })));
    }

    #[test]
    fn test_apply_column_filter_and_filter_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = files_processor(dir.path(), ["one cat", "two dogs", "a bird"]);
        processor.apply_column_filter(&TextLengthFilter::default(), true).unwrap();
        assert_eq!(
            processor.column("text_word_count").unwrap(),
            vec![Value::Int(2), Value::Int(2), Value::Int(2)]
        );

        processor.filter_rows(&[true, false, true]).unwrap();
        assert_eq!(processor.len(), 2);
        assert_eq!(processor.column("text").unwrap()[1], Value::from("a bird"));
    }

    #[test]
    fn test_random_sample_respects_mask() {
        let dir = tempfile::tempdir().unwrap();
        let processor = files_processor(dir.path(), ["one cat", "two dogs", "a bird"]);
        let sample = processor.get_random_sample(Some(&[false, true, false])).unwrap();
        assert_eq!(sample.bytes(ModalityKind::Image), Some(&b"bbb"[..]));
        assert_eq!(sample.value(ModalityKind::Text), Some(&Value::from("two dogs")));

        let none = processor.get_random_sample(Some(&[false, false, false]));
        assert!(matches!(none, Err(DataError::EmptySelection)));
    }

    #[test]
    fn test_layout_columns_are_protected() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = files_processor(dir.path(), ["one cat", "two dogs", "a bird"]);
        let mut mapping = IndexMap::new();
        mapping.insert("caption".to_string(), "title".to_string());
        assert!(matches!(
            processor.rename_columns(&mapping),
            Err(DataError::ProtectedColumn(c)) if c == "caption"
        ));
        assert!(matches!(
            processor.delete_columns(&["image_path".to_string()]),
            Err(DataError::ProtectedColumn(_))
        ));
    }

    #[test]
    fn test_update_columns_writes_relative_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = files_processor(dir.path(), ["one cat", "two dogs", "a bird"]);
        processor.apply_column_filter(&TextLengthFilter::default(), true).unwrap();

        let errors = processor.update_columns(&["text_length".to_string()]).unwrap();
        assert!(errors.is_empty());

        let table_path = format!("{}/data.csv", dir.path().display());
        let table = LocalFileSystem.read_table(&table_path).unwrap();
        assert_eq!(table.column_names(), vec!["image_path", "caption", "text_length"]);
        assert_eq!(table.values("image_path").unwrap()[0], Value::from("a.jpg"));
        assert_eq!(table.values("text_length").unwrap()[1], Value::Int(8));
    }

    #[test]
    fn test_update_columns_keeps_stored_absolute_keys() {
        let dir = tempfile::tempdir().unwrap();
        let absolute = format!("{}/a.jpg", dir.path().display());
        std::fs::write(&absolute, b"aaa").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"bbb").unwrap();
        let table_path = format!("{}/data.csv", dir.path().display());
        std::fs::write(&table_path, format!("image_path,caption\n{},one cat\nb.jpg,two dogs\n", absolute)).unwrap();

        let columns = ModalityColumns::new().with_image("image_path").with_text("caption");
        let config = FilesDatasetConfig::from_path_and_columns(&LocalFileSystem, &table_path, &columns).unwrap();
        let mut processor = DatasetReader::local().read_from_config(config, ReadOptions::default()).unwrap();
        processor.apply_column_filter(&TextLengthFilter::default(), true).unwrap();

        let errors = processor.update_columns(&["text_length".to_string()]).unwrap();
        assert!(errors.is_empty());

        let table = LocalFileSystem.read_table(&table_path).unwrap();
        assert_eq!(
            table.values("image_path").unwrap(),
            vec![Value::from(absolute.as_str()), Value::from("b.jpg")]
        );
        assert_eq!(table.values("text_length").unwrap(), vec![Value::Int(7), Value::Int(8)]);
    }
}
