use serde::{Serialize, Deserialize};
use tracing::info;

use super::{list_with_extension, sniff_table_extension, BaseConfig, DatasetFormat, ModalityColumns};
use crate::datatype::DataType;
use crate::error::ConfigError;
use crate::filesystem::{file_name, require_exists, split_extension, FileSystem};
use crate::table_io::TableFormat;

/// Directory layout: `<root>/<shard>.<ext>` tables, each with a sibling
/// `<root>/<shard>/` directory holding the shard's files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ShardedFilesConfigRepr", into = "ShardedFilesConfigRepr")]
pub struct ShardedFilesDatasetConfig {
    base: BaseConfig,
    datafiles_ext: String,
}

#[derive(Serialize, Deserialize)]
struct ShardedFilesConfigRepr {
    path: String,
    datatypes: Vec<DataType>,
    #[serde(default = "default_datafiles_ext")]
    datafiles_ext: String,
}

fn default_datafiles_ext() -> String {
    TableFormat::Csv.extension().to_string()
}

impl TryFrom<ShardedFilesConfigRepr> for ShardedFilesDatasetConfig {
    type Error = ConfigError;

    fn try_from(repr: ShardedFilesConfigRepr) -> Result<Self, Self::Error> {
        Self::new(&repr.path, repr.datatypes, &repr.datafiles_ext)
    }
}

impl From<ShardedFilesDatasetConfig> for ShardedFilesConfigRepr {
    fn from(config: ShardedFilesDatasetConfig) -> Self {
        Self {
            path: config.base.path().to_string(),
            datatypes: config.base.datatypes().to_vec(),
            datafiles_ext: config.datafiles_ext,
        }
    }
}

impl ShardedFilesDatasetConfig {
    pub fn new(path: &str, datatypes: Vec<DataType>, datafiles_ext: &str) -> Result<Self, ConfigError> {
        let datafiles_ext = datafiles_ext.trim_start_matches('.').to_string();
        if TableFormat::from_extension(&datafiles_ext).is_none() {
            return Err(ConfigError::UnknownTableFormat(datafiles_ext));
        }
        Ok(Self {
            base: BaseConfig::new(DatasetFormat::ShardedFiles, path, datatypes)?,
            datafiles_ext,
        })
    }

    /// Inspect the root directory and infer the table extension.
    /// Image and video columns hold basenames, text is an inline column.
    pub fn from_path_and_columns(
        fs: &dyn FileSystem,
        path: &str,
        columns: &ModalityColumns,
    ) -> Result<Self, ConfigError> {
        require_exists(fs, path)?;
        let format = sniff_table_extension(fs, path)?.ok_or_else(|| ConfigError::NoShardsFound {
            path: path.to_string(),
            reason: "no csv or parquet tables".to_string(),
        })?;

        let config = Self::new(path, columns.to_datatypes(DatasetFormat::ShardedFiles)?, format.extension())?;
        info!("Inferred sharded files config for {} ({} tables)", config.path(), config.datafiles_ext);
        Ok(config)
    }

    pub fn base(&self) -> &BaseConfig {
        &self.base
    }

    pub fn path(&self) -> &str {
        self.base.path()
    }

    pub fn datafiles_ext(&self) -> &str {
        &self.datafiles_ext
    }

    /// Shard tables under the root, sorted
    pub fn table_paths(&self, fs: &dyn FileSystem) -> Result<Vec<String>, ConfigError> {
        list_with_extension(fs, self.path(), &self.datafiles_ext)
    }

    /// Directory holding the files of the shard described by `table_path`
    pub fn shard_dir(&self, table_path: &str) -> String {
        split_extension(table_path).0.to_string()
    }

    /// Shard name, the table file stem
    pub fn split_name<'a>(&self, table_path: &'a str) -> &'a str {
        file_name(split_extension(table_path).0)
    }
}
