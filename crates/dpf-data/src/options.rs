//! Options accepted by dataset operations

use indexmap::IndexMap;
use serde::{Serialize, Deserialize};

/// Options for [`DatasetReader::read_from_config`](crate::DatasetReader::read_from_config)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Fail when a table lacks a column the config requires
    pub validate_columns: bool,

    /// Threads used to read shard tables
    pub workers: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            validate_columns: true,
            workers: 16,
        }
    }
}

/// Options for applying a data filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRunOptions {
    /// Check that the filter kept every key exactly once
    pub validate_filter_result: bool,

    /// Feed `None` to the filter for samples that fail to load or preprocess
    pub return_none_on_error: bool,
}

impl Default for FilterRunOptions {
    fn default() -> Self {
        Self {
            validate_filter_result: true,
            return_none_on_error: false,
        }
    }
}

/// Options for dataset validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    pub validate_filestructure: bool,
    pub validate_metadata: bool,

    /// Columns every table must have; defaults to the config's columns
    pub columns_to_check: Option<Vec<String>>,

    pub workers: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            validate_filestructure: true,
            validate_metadata: true,
            columns_to_check: None,
            workers: 16,
        }
    }
}

/// How writers name shards and sample files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileNaming {
    /// Zero-padded increasing integers
    #[default]
    Counter,
    /// Random UUIDv4 strings
    Uuid,
}

/// Options for writing a sharded-files dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardedFilesWriteOptions {
    pub max_files_in_shard: usize,
    pub datafiles_ext: String,
    pub filenaming: FileNaming,
    pub counter_width: usize,

    /// Extra metadata columns to carry over
    pub columns_to_save: Vec<String>,

    /// Renames applied to metadata columns on write
    pub rename_columns: IndexMap<String, String>,

    /// Threads reading samples
    pub workers: usize,
}

impl Default for ShardedFilesWriteOptions {
    fn default() -> Self {
        Self {
            max_files_in_shard: 1000,
            datafiles_ext: "csv".to_string(),
            filenaming: FileNaming::Counter,
            counter_width: 5,
            columns_to_save: Vec::new(),
            rename_columns: IndexMap::new(),
            workers: 8,
        }
    }
}

/// Options for writing a shards (archive) dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardsWriteOptions {
    /// Samples per shard. The archive of the shard being filled is held in
    /// memory until it is full, so peak memory grows with this limit times
    /// the sample size; lower it for large files such as videos.
    pub max_files_in_shard: usize,
    pub datafiles_ext: String,
    pub archives_ext: String,
    pub filenaming: FileNaming,
    pub counter_width: usize,
    pub columns_to_save: Vec<String>,
    pub rename_columns: IndexMap<String, String>,
    pub workers: usize,
}

impl Default for ShardsWriteOptions {
    fn default() -> Self {
        Self {
            max_files_in_shard: 1000,
            datafiles_ext: "csv".to_string(),
            archives_ext: "tar".to_string(),
            filenaming: FileNaming::Counter,
            counter_width: 5,
            columns_to_save: Vec::new(),
            rename_columns: IndexMap::new(),
            workers: 8,
        }
    }
}

impl ShardsWriteOptions {
    pub fn with_rename(mut self, from: &str, to: &str) -> Self {
        self.rename_columns.insert(from.to_string(), to.to_string());
        self
    }
}

impl ShardedFilesWriteOptions {
    pub fn with_rename(mut self, from: &str, to: &str) -> Self {
        self.rename_columns.insert(from.to_string(), to.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ShardsWriteOptions::default();
        assert_eq!(opts.max_files_in_shard, 1000);
        assert_eq!(opts.archives_ext, "tar");
        assert_eq!(opts.filenaming, FileNaming::Counter);
        assert!(ValidationOptions::default().columns_to_check.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let opts: ShardedFilesWriteOptions =
            serde_json::from_str(r#"{"filenaming":"uuid","rename_columns":{"text":"caption"}}"#).unwrap();
        assert_eq!(opts.filenaming, FileNaming::Uuid);
        assert_eq!(opts.datafiles_ext, "csv");
        assert_eq!(opts.rename_columns.get("text").map(String::as_str), Some("caption"));
    }
}
