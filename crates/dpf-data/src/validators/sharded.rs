use std::time::Instant;

use ahash::{AHashMap, AHashSet};
use dpf_core::filesystem::file_name;
use dpf_core::{
    DataType, FileSystem, SampleTable, ShardedFilesDatasetConfig, ShardsDatasetConfig,
};
use indexmap::IndexMap;
use tracing::{debug, info};

use super::{count_repeated, DataFrameError, FileStructureError, ShardedValidationResult, ValidationResult};
use crate::archive::list_members;
use crate::options::ValidationOptions;
use crate::pool::ShardPool;
use crate::DataError;

/// Where the sample files of a shard live
#[derive(Clone, Copy)]
enum ShardLayout<'a> {
    Shards(&'a ShardsDatasetConfig),
    ShardedFiles(&'a ShardedFilesDatasetConfig),
}

impl ShardLayout<'_> {
    fn path(&self) -> &str {
        match self {
            ShardLayout::Shards(config) => config.path(),
            ShardLayout::ShardedFiles(config) => config.path(),
        }
    }

    fn datatypes(&self) -> &[DataType] {
        match self {
            ShardLayout::Shards(config) => config.base().datatypes(),
            ShardLayout::ShardedFiles(config) => config.base().datatypes(),
        }
    }

    fn datafiles_ext(&self) -> &str {
        match self {
            ShardLayout::Shards(config) => config.datafiles_ext(),
            ShardLayout::ShardedFiles(config) => config.datafiles_ext(),
        }
    }

    /// Shard data paired with a table: an archive or a directory
    fn data_path(&self, table_path: &str) -> String {
        match self {
            ShardLayout::Shards(config) => config.archive_path(table_path),
            ShardLayout::ShardedFiles(config) => config.shard_dir(table_path),
        }
    }

    /// Every table needs its shard data and every shard data its table
    fn pairing_errors(&self, fs: &dyn FileSystem, listing: &[String]) -> Vec<FileStructureError> {
        let listed: AHashSet<&str> = listing.iter().map(String::as_str).collect();
        let table_suffix = format!(".{}", self.datafiles_ext());
        let mut errors = Vec::new();

        for path in listing {
            if path.ends_with(&table_suffix) {
                let data_path = self.data_path(path);
                let present = match self {
                    ShardLayout::Shards(_) => listed.contains(data_path.as_str()),
                    ShardLayout::ShardedFiles(_) => fs.is_dir(&data_path),
                };
                if !present {
                    errors.push(FileStructureError::NoSuchFile { path: data_path });
                }
                continue;
            }

            let orphan_table = match self {
                ShardLayout::Shards(config) if path.ends_with(&format!(".{}", config.archives_ext())) => {
                    Some(config.table_path_for(path))
                }
                ShardLayout::ShardedFiles(_) if fs.is_dir(path) => Some(format!("{}{}", path, table_suffix)),
                _ => None,
            };
            if let Some(table_path) = orphan_table {
                if !listed.contains(table_path.as_str()) {
                    errors.push(FileStructureError::NoSuchFile { path: table_path });
                }
            }
        }
        errors
    }

    /// File names stored in the shard, duplicates included. `None` when the
    /// shard data does not exist, which the pairing check reports.
    fn member_names(&self, fs: &dyn FileSystem, table_path: &str) -> Result<Option<Vec<String>>, FileStructureError> {
        let data_path = self.data_path(table_path);
        let unreadable = |message: String| FileStructureError::UnreadableShard {
            path: data_path.clone(),
            message,
        };

        match self {
            ShardLayout::Shards(_) => {
                if !fs.exists(&data_path) {
                    return Ok(None);
                }
                let data = fs.read_file(&data_path).map_err(|e| unreadable(e.to_string()))?;
                list_members(&data).map(Some).map_err(|e| unreadable(e.to_string()))
            }
            ShardLayout::ShardedFiles(_) => {
                if !fs.is_dir(&data_path) {
                    return Ok(None);
                }
                let paths = fs.list_directory(&data_path).map_err(|e| unreadable(e.to_string()))?;
                Ok(Some(paths.iter().map(|p| file_name(p).to_string()).collect()))
            }
        }
    }
}

/// Validator for the shards and sharded-files layouts
pub struct ShardedValidator<'a> {
    fs: &'a dyn FileSystem,
    table: &'a SampleTable,
    layout: ShardLayout<'a>,
    columns_to_check: Vec<String>,
}

impl<'a> ShardedValidator<'a> {
    pub fn shards(
        fs: &'a dyn FileSystem,
        table: &'a SampleTable,
        config: &'a ShardsDatasetConfig,
        columns_to_check: Vec<String>,
    ) -> Self {
        Self {
            fs,
            table,
            layout: ShardLayout::Shards(config),
            columns_to_check,
        }
    }

    pub fn sharded_files(
        fs: &'a dyn FileSystem,
        table: &'a SampleTable,
        config: &'a ShardedFilesDatasetConfig,
        columns_to_check: Vec<String>,
    ) -> Self {
        Self {
            fs,
            table,
            layout: ShardLayout::ShardedFiles(config),
            columns_to_check,
        }
    }

    pub fn validate(&self, options: &ValidationOptions) -> Result<ValidationResult, DataError> {
        let started = Instant::now();
        let listing = self.fs.list_directory(self.layout.path())?;
        let mut result = ShardedValidationResult::default();

        if options.validate_filestructure {
            result.filestructure_errors.extend(self.key_errors());
            result
                .filestructure_errors
                .extend(self.layout.pairing_errors(self.fs, &listing));
        }

        if options.validate_metadata {
            let table_suffix = format!(".{}", self.layout.datafiles_ext());
            let tables: Vec<String> = listing.into_iter().filter(|p| p.ends_with(&table_suffix)).collect();
            let pool = ShardPool::new(options.workers)?;

            for outcome in pool.map(tables, |path| self.validate_shard(path)) {
                let (metadata_errors, filestructure_errors) = outcome.result;
                result.filestructure_errors.extend(filestructure_errors);
                if !metadata_errors.is_empty() {
                    result.metadata_errors.insert(outcome.task, metadata_errors);
                }
            }
        }

        let result = ValidationResult::Sharded(result);
        info!(
            "Validated {} in {:.2?}: {} errors",
            self.layout.path(),
            started.elapsed(),
            result.total_errors()
        );
        Ok(result)
    }

    /// Basenames must be unique over the whole dataset
    fn key_errors(&self) -> Vec<FileStructureError> {
        let mut errors = Vec::new();
        for datatype in self.layout.datatypes() {
            let DataType::Sharded { modality, .. } = datatype else {
                continue;
            };
            let Ok(paths) = self.table.column_strings(modality.modality().path_column) else {
                debug!("No {} column in table, skipping key check", modality.modality().path_column);
                continue;
            };
            let mut seen = AHashSet::with_capacity(paths.len());
            let duplicated = paths
                .iter()
                .flatten()
                .any(|path| !seen.insert(file_name(path)));
            if duplicated {
                errors.push(FileStructureError::IsNotKey {
                    column: datatype.user_column().to_string(),
                });
            }
        }
        errors
    }

    fn validate_shard(&self, path: &str) -> (Vec<DataFrameError>, Vec<FileStructureError>) {
        let table = match self.fs.read_table(path) {
            Ok(table) => table,
            Err(err) => {
                let error = FileStructureError::UnreadableShard {
                    path: path.to_string(),
                    message: err.to_string(),
                };
                return (Vec::new(), vec![error]);
            }
        };

        let mut errors = Vec::new();
        let missed = table.missing_columns(self.columns_to_check.iter().map(String::as_str));
        if !missed.is_empty() {
            errors.push(DataFrameError::MissedColumns {
                path: path.to_string(),
                columns: missed,
            });
        }

        let mut basenames: IndexMap<&str, Vec<String>> = IndexMap::new();
        for datatype in self.layout.datatypes() {
            if !matches!(datatype, DataType::Sharded { .. }) {
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
            basenames.insert(column, values.into_iter().flatten().collect());
        }

        if basenames.is_empty() {
            return (errors, Vec::new());
        }

        let members = match self.layout.member_names(self.fs, path) {
            Ok(Some(members)) => members,
            Ok(None) => return (errors, Vec::new()),
            Err(error) => return (errors, vec![error]),
        };
        let mut member_counts: AHashMap<&str, usize> = AHashMap::with_capacity(members.len());
        for member in &members {
            *member_counts.entry(member.as_str()).or_default() += 1;
        }

        for (column, names) in &basenames {
            let referenced: AHashSet<&str> = names.iter().map(String::as_str).collect();
            let repeated = referenced
                .iter()
                .filter(|name| member_counts.get(*name).is_some_and(|count| *count > 1))
                .count();
            if repeated > 0 {
                errors.push(DataFrameError::DuplicatedValues {
                    path: path.to_string(),
                    column: column.to_string(),
                    count: repeated,
                });
            }

            let missing = referenced.iter().filter(|name| !member_counts.contains_key(*name)).count();
            if missing > 0 {
                errors.push(DataFrameError::MissingValue {
                    path: path.to_string(),
                    column: column.to_string(),
                    count: missing,
                });
            }
        }

        (errors, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use dpf_core::{LocalFileSystem, ModalityKind, Value};

    use super::*;
    use crate::archive::ArchiveBuilder;

    fn shards_config(root: &str) -> ShardsDatasetConfig {
        ShardsDatasetConfig::new(
            root,
            vec![
                DataType::sharded(ModalityKind::Image, Some("image_name")),
                DataType::column(ModalityKind::Text, Some("caption")),
            ],
            "tar",
            "csv",
        )
        .unwrap()
    }

    fn write_archive(path: &std::path::Path, names: &[&str]) {
        let mut builder = ArchiveBuilder::new();
        for name in names {
            builder.append(name, name.as_bytes()).unwrap();
        }
        std::fs::write(path, builder.into_bytes().unwrap()).unwrap();
    }

    fn merged_table(root: &str, names: &[(&str, &str)]) -> SampleTable {
        let mut columns = IndexMap::new();
        columns.insert(
            "image_path".to_string(),
            names
                .iter()
                .map(|(shard, name)| Value::from(format!("{}/{}.tar/{}", root, shard, name)))
                .collect(),
        );
        SampleTable::from_columns(columns).unwrap()
    }

    #[test]
    fn test_missing_member_is_reported_for_table() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        std::fs::write(dir.path().join("0.csv"), "image_name,caption\n0.jpg,a\n1.jpg,b\n").unwrap();
        write_archive(&dir.path().join("0.tar"), &["0.jpg"]);

        let config = shards_config(&root);
        let table = merged_table(&root, &[("0", "0.jpg"), ("0", "1.jpg")]);
        let validator = ShardedValidator::shards(&LocalFileSystem, &table, &config, vec!["image_name".into()]);
        let ValidationResult::Sharded(result) = validator.validate(&ValidationOptions::default()).unwrap() else {
            panic!("expected sharded result");
        };

        assert!(result.filestructure_errors.is_empty());
        let table_path = format!("{}/0.csv", root);
        assert_eq!(
            result.metadata_errors[&table_path],
            vec![DataFrameError::MissingValue {
                path: table_path.clone(),
                column: "image_name".into(),
                count: 1,
            }]
        );
    }

    #[test]
    fn test_orphan_archive_and_cross_shard_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        std::fs::write(dir.path().join("0.csv"), "image_name,caption\n0.jpg,a\n").unwrap();
        std::fs::write(dir.path().join("1.csv"), "image_name,caption\n0.jpg,b\n").unwrap();
        write_archive(&dir.path().join("0.tar"), &["0.jpg"]);
        write_archive(&dir.path().join("1.tar"), &["0.jpg"]);
        write_archive(&dir.path().join("2.tar"), &["5.jpg"]);

        let config = shards_config(&root);
        let table = merged_table(&root, &[("0", "0.jpg"), ("1", "0.jpg")]);
        let columns = vec!["image_name".to_string(), "caption".to_string()];
        let validator = ShardedValidator::shards(&LocalFileSystem, &table, &config, columns);
        let result = validator.validate(&ValidationOptions::default()).unwrap();

        assert_eq!(
            result.filestructure_errors(),
            &[
                FileStructureError::IsNotKey {
                    column: "image_name".into()
                },
                FileStructureError::NoSuchFile {
                    path: format!("{}/2.csv", root)
                },
            ]
        );
        assert!(result.metadata_errors().is_empty());
    }

    #[test]
    fn test_unreadable_table_does_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        std::fs::create_dir(dir.path().join("0")).unwrap();
        std::fs::write(dir.path().join("0.parquet"), b"not parquet").unwrap();
        std::fs::create_dir(dir.path().join("1")).unwrap();
        std::fs::write(dir.path().join("1/0.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("1.parquet"), b"also not parquet").unwrap();

        let config = ShardedFilesDatasetConfig::new(
            &root,
            vec![DataType::sharded(ModalityKind::Image, Some("image_name"))],
            "parquet",
        )
        .unwrap();
        let table = SampleTable::empty();
        let validator = ShardedValidator::sharded_files(&LocalFileSystem, &table, &config, Vec::new());
        let result = validator.validate(&ValidationOptions::default()).unwrap();

        let unreadable = result
            .filestructure_errors()
            .iter()
            .filter(|e| matches!(e, FileStructureError::UnreadableShard { .. }))
            .count();
        assert_eq!(unreadable, 2);
    }
}
