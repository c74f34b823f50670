use serde::{Serialize, Deserialize};
use tracing::info;

use super::{list_with_extension, sniff_table_extension, BaseConfig, DatasetFormat, ModalityColumns};
use crate::datatype::DataType;
use crate::error::ConfigError;
use crate::filesystem::{file_name, require_exists, split_extension, FileSystem};
use crate::table_io::TableFormat;

/// Default extension of shard archives
pub const DEFAULT_ARCHIVES_EXT: &str = "tar";

/// Archive layout: `<root>/<shard>.tar` archives, each with a sibling
/// `<root>/<shard>.<ext>` table describing its members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ShardsConfigRepr", into = "ShardsConfigRepr")]
pub struct ShardsDatasetConfig {
    base: BaseConfig,
    archives_ext: String,
    datafiles_ext: String,
}

#[derive(Serialize, Deserialize)]
struct ShardsConfigRepr {
    path: String,
    datatypes: Vec<DataType>,
    #[serde(default = "default_archives_ext")]
    archives_ext: String,
    #[serde(default = "default_datafiles_ext")]
    datafiles_ext: String,
}

fn default_archives_ext() -> String {
    DEFAULT_ARCHIVES_EXT.to_string()
}

fn default_datafiles_ext() -> String {
    TableFormat::Csv.extension().to_string()
}

impl TryFrom<ShardsConfigRepr> for ShardsDatasetConfig {
    type Error = ConfigError;

    fn try_from(repr: ShardsConfigRepr) -> Result<Self, Self::Error> {
        Self::new(&repr.path, repr.datatypes, &repr.archives_ext, &repr.datafiles_ext)
    }
}

impl From<ShardsDatasetConfig> for ShardsConfigRepr {
    fn from(config: ShardsDatasetConfig) -> Self {
        Self {
            path: config.base.path().to_string(),
            datatypes: config.base.datatypes().to_vec(),
            archives_ext: config.archives_ext,
            datafiles_ext: config.datafiles_ext,
        }
    }
}

impl ShardsDatasetConfig {
    pub fn new(
        path: &str,
        datatypes: Vec<DataType>,
        archives_ext: &str,
        datafiles_ext: &str,
    ) -> Result<Self, ConfigError> {
        let datafiles_ext = datafiles_ext.trim_start_matches('.').to_string();
        if TableFormat::from_extension(&datafiles_ext).is_none() {
            return Err(ConfigError::UnknownTableFormat(datafiles_ext));
        }
        Ok(Self {
            base: BaseConfig::new(DatasetFormat::Shards, path, datatypes)?,
            archives_ext: archives_ext.trim_start_matches('.').to_string(),
            datafiles_ext,
        })
    }

    /// Inspect the root directory for archives and infer the table
    /// extension. Image and video columns hold member names, text is an
    /// inline column.
    pub fn from_path_and_columns(
        fs: &dyn FileSystem,
        path: &str,
        columns: &ModalityColumns,
    ) -> Result<Self, ConfigError> {
        require_exists(fs, path)?;
        let archives = list_with_extension(fs, path, DEFAULT_ARCHIVES_EXT)?;
        if archives.is_empty() {
            return Err(ConfigError::NoShardsFound {
                path: path.to_string(),
                reason: format!("no .{} archives", DEFAULT_ARCHIVES_EXT),
            });
        }
        let format = sniff_table_extension(fs, path)?.ok_or_else(|| ConfigError::NoShardsFound {
            path: path.to_string(),
            reason: "no csv or parquet tables".to_string(),
        })?;

        let config = Self::new(
            path,
            columns.to_datatypes(DatasetFormat::Shards)?,
            DEFAULT_ARCHIVES_EXT,
            format.extension(),
        )?;
        info!("Inferred shards config for {} ({} archives)", config.path(), archives.len());
        Ok(config)
    }

    pub fn base(&self) -> &BaseConfig {
        &self.base
    }

    pub fn path(&self) -> &str {
        self.base.path()
    }

    pub fn archives_ext(&self) -> &str {
        &self.archives_ext
    }

    pub fn datafiles_ext(&self) -> &str {
        &self.datafiles_ext
    }

    /// Shard tables under the root, sorted
    pub fn table_paths(&self, fs: &dyn FileSystem) -> Result<Vec<String>, ConfigError> {
        list_with_extension(fs, self.path(), &self.datafiles_ext)
    }

    /// Archive paired with a shard table
    pub fn archive_path(&self, table_path: &str) -> String {
        format!("{}.{}", split_extension(table_path).0, self.archives_ext)
    }

    /// Table paired with a shard archive
    pub fn table_path_for(&self, archive_path: &str) -> String {
        format!("{}.{}", split_extension(archive_path).0, self.datafiles_ext)
    }

    pub fn split_name<'a>(&self, table_path: &'a str) -> &'a str {
        file_name(split_extension(table_path).0)
    }
}
