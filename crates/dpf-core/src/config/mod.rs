//! Dataset configuration
//!
//! A dataset config declares the layout of a dataset on disk, the modalities it
//! holds and how each modality is addressed. Invariants are checked once at
//! construction (and again on deserialization) so consumers can rely on them.

mod files;
mod sharded_files;
mod shards;

pub use files::FilesDatasetConfig;
pub use sharded_files::ShardedFilesDatasetConfig;
pub use shards::ShardsDatasetConfig;

use std::fmt;

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use serde::{Serialize, Deserialize};

use crate::datatype::DataType;
use crate::error::ConfigError;
use crate::filesystem::{strip_trailing_separators, FileSystem};
use crate::modality::ModalityKind;
use crate::table_io::TableFormat;

/// Physical arrangement of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    /// One table at the root, modality files referenced by path
    Files,
    /// One subdirectory plus one table per shard
    ShardedFiles,
    /// One archive plus one table per shard
    Shards,
}

impl DatasetFormat {
    /// Whether `datatype` can be used in this layout
    pub fn supports(self, datatype: &DataType) -> bool {
        match (self, datatype) {
            (_, DataType::Column { .. }) => true,
            (DatasetFormat::Files, DataType::File { .. }) => true,
            (DatasetFormat::ShardedFiles | DatasetFormat::Shards, DataType::Sharded { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DatasetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatasetFormat::Files => "files",
            DatasetFormat::ShardedFiles => "sharded_files",
            DatasetFormat::Shards => "shards",
        };
        f.write_str(name)
    }
}

/// One persisted column and the logical column it is read as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapEntry {
    pub physical: String,
    pub logical: String,
    pub modality: ModalityKind,
}

/// Mapping between the column names stored on disk and the logical column
/// names used in memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnsMapping {
    entries: Vec<ColumnMapEntry>,
}

impl ColumnsMapping {
    fn from_datatypes(datatypes: &[DataType]) -> Result<Self, ConfigError> {
        let mut physical_seen = AHashSet::new();
        let mut entries = Vec::with_capacity(datatypes.len());
        for datatype in datatypes {
            let physical = datatype.user_column().to_string();
            if !physical_seen.insert(physical.clone()) {
                return Err(ConfigError::DuplicateColumn(physical));
            }
            entries.push(ColumnMapEntry {
                physical,
                logical: datatype.logical_column().to_string(),
                modality: datatype.modality_kind(),
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ColumnMapEntry] {
        &self.entries
    }

    /// Logical name for a persisted column
    pub fn to_logical(&self, physical: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.physical == physical)
            .map(|e| e.logical.as_str())
    }

    /// Persisted name for a logical column
    pub fn to_physical(&self, logical: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.logical == logical)
            .map(|e| e.physical.as_str())
    }

    /// Renames applied when reading a persisted table, identity entries omitted
    pub fn physical_to_logical(&self) -> IndexMap<String, String> {
        self.entries
            .iter()
            .filter(|e| e.physical != e.logical)
            .map(|e| (e.physical.clone(), e.logical.clone()))
            .collect()
    }

    pub fn physical_columns(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.physical.as_str()).collect()
    }

    pub fn logical_columns(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.logical.as_str()).collect()
    }
}

/// User column names for each modality, used to infer a config from disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalityColumns {
    pub image: Option<String>,
    pub video: Option<String>,
    pub text: Option<String>,
}

impl ModalityColumns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, column: impl Into<String>) -> Self {
        self.image = Some(column.into());
        self
    }

    pub fn with_video(mut self, column: impl Into<String>) -> Self {
        self.video = Some(column.into());
        self
    }

    pub fn with_text(mut self, column: impl Into<String>) -> Self {
        self.text = Some(column.into());
        self
    }

    /// Set columns, in modality registry order
    pub fn iter(&self) -> impl Iterator<Item = (ModalityKind, &str)> {
        [
            (ModalityKind::Image, self.image.as_deref()),
            (ModalityKind::Video, self.video.as_deref()),
            (ModalityKind::Text, self.text.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, column)| column.map(|c| (kind, c)))
    }

    /// Datatypes for a layout: inline columns for text, files for
    /// everything else
    pub(crate) fn to_datatypes(&self, format: DatasetFormat) -> Result<Vec<DataType>, ConfigError> {
        let datatypes: Vec<DataType> = self
            .iter()
            .map(|(kind, column)| {
                if kind.modality().column.is_some() {
                    DataType::column(kind, Some(column))
                } else if format == DatasetFormat::Files {
                    DataType::file(kind, Some(column))
                } else {
                    DataType::sharded(kind, Some(column))
                }
            })
            .collect();
        if datatypes.is_empty() {
            return Err(ConfigError::NoModalities);
        }
        Ok(datatypes)
    }
}

/// How a loader reaches the data of one modality for a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModalityLocation {
    /// Inline value in the named logical column
    Column(String),
    /// Standalone file whose full path is in the named logical column
    File { path_column: String },
    /// Member of a tar archive; the path column holds `<archive>/<member>`
    ArchiveMember { path_column: String },
}

/// State shared by every layout config
#[derive(Debug, Clone, PartialEq)]
pub struct BaseConfig {
    format: DatasetFormat,
    path: String,
    datatypes: Vec<DataType>,
    modality2datatype: IndexMap<ModalityKind, DataType>,
    columns_mapping: ColumnsMapping,
}

impl BaseConfig {
    pub fn new(format: DatasetFormat, path: &str, datatypes: Vec<DataType>) -> Result<Self, ConfigError> {
        let mut modality2datatype = IndexMap::with_capacity(datatypes.len());
        for datatype in &datatypes {
            let kind = datatype.modality_kind();
            if modality2datatype.insert(kind, datatype.clone()).is_some() {
                return Err(ConfigError::DuplicateModality(kind));
            }
            if !format.supports(datatype) {
                return Err(ConfigError::UnsupportedDatatype {
                    format,
                    datatype: datatype.to_string(),
                });
            }
            if matches!(datatype, DataType::Column { .. }) && kind.modality().column.is_none() {
                return Err(ConfigError::NotColumnModality(kind));
            }
        }
        let columns_mapping = ColumnsMapping::from_datatypes(&datatypes)?;

        Ok(Self {
            format,
            path: strip_trailing_separators(path),
            datatypes,
            modality2datatype,
            columns_mapping,
        })
    }

    pub fn format(&self) -> DatasetFormat {
        self.format
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn datatypes(&self) -> &[DataType] {
        &self.datatypes
    }

    pub fn modality2datatype(&self) -> &IndexMap<ModalityKind, DataType> {
        &self.modality2datatype
    }

    pub fn columns_mapping(&self) -> &ColumnsMapping {
        &self.columns_mapping
    }

    pub fn modalities(&self) -> Vec<ModalityKind> {
        self.modality2datatype.keys().copied().collect()
    }

    /// Where the loader finds `modality`, given the layout
    pub fn modality_location(&self, modality: ModalityKind) -> Option<ModalityLocation> {
        let datatype = self.modality2datatype.get(&modality)?;
        let location = match datatype {
            DataType::Column { .. } => ModalityLocation::Column(datatype.logical_column().to_string()),
            DataType::File { .. } => ModalityLocation::File {
                path_column: datatype.logical_column().to_string(),
            },
            DataType::Sharded { .. } => {
                let path_column = datatype.modality().path_column.to_string();
                if self.format == DatasetFormat::Shards {
                    ModalityLocation::ArchiveMember { path_column }
                } else {
                    ModalityLocation::File { path_column }
                }
            }
        };
        Some(location)
    }
}

impl fmt::Display for BaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DatasetConfig(")?;
        writeln!(f, "\tformat={}", self.format)?;
        writeln!(f, "\tpath={}", self.path)?;
        writeln!(f, "\tdatatypes=[")?;
        for datatype in &self.datatypes {
            writeln!(f, "\t\t{}", datatype)?;
        }
        writeln!(f, "\t]")?;
        write!(f, ")")
    }
}

/// Any supported dataset config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum DatasetConfig {
    Files(FilesDatasetConfig),
    ShardedFiles(ShardedFilesDatasetConfig),
    Shards(ShardsDatasetConfig),
}

impl DatasetConfig {
    pub fn base(&self) -> &BaseConfig {
        match self {
            DatasetConfig::Files(config) => config.base(),
            DatasetConfig::ShardedFiles(config) => config.base(),
            DatasetConfig::Shards(config) => config.base(),
        }
    }

    pub fn format(&self) -> DatasetFormat {
        self.base().format()
    }

    pub fn path(&self) -> &str {
        self.base().path()
    }

    pub fn datatypes(&self) -> &[DataType] {
        self.base().datatypes()
    }

    pub fn modality2datatype(&self) -> &IndexMap<ModalityKind, DataType> {
        self.base().modality2datatype()
    }

    pub fn columns_mapping(&self) -> &ColumnsMapping {
        self.base().columns_mapping()
    }

    pub fn modalities(&self) -> Vec<ModalityKind> {
        self.base().modalities()
    }

    pub fn modality_location(&self, modality: ModalityKind) -> Option<ModalityLocation> {
        self.base().modality_location(modality)
    }

    /// Persisted column names every table of the dataset must carry
    pub fn user_columns(&self) -> Vec<String> {
        self.columns_mapping()
            .physical_columns()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Extension of the per-shard (or single) table files
    pub fn datafiles_ext(&self) -> String {
        match self {
            DatasetConfig::Files(config) => config.table_format().extension().to_string(),
            DatasetConfig::ShardedFiles(config) => config.datafiles_ext().to_string(),
            DatasetConfig::Shards(config) => config.datafiles_ext().to_string(),
        }
    }

    /// Infer a config of the given layout from files on disk
    pub fn from_path_and_columns(
        fs: &dyn FileSystem,
        format: DatasetFormat,
        path: &str,
        columns: &ModalityColumns,
    ) -> Result<Self, ConfigError> {
        Ok(match format {
            DatasetFormat::Files => FilesDatasetConfig::from_path_and_columns(fs, path, columns)?.into(),
            DatasetFormat::ShardedFiles => ShardedFilesDatasetConfig::from_path_and_columns(fs, path, columns)?.into(),
            DatasetFormat::Shards => ShardsDatasetConfig::from_path_and_columns(fs, path, columns)?.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl fmt::Display for DatasetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.base().fmt(f)
    }
}

impl From<FilesDatasetConfig> for DatasetConfig {
    fn from(config: FilesDatasetConfig) -> Self {
        DatasetConfig::Files(config)
    }
}

impl From<ShardedFilesDatasetConfig> for DatasetConfig {
    fn from(config: ShardedFilesDatasetConfig) -> Self {
        DatasetConfig::ShardedFiles(config)
    }
}

impl From<ShardsDatasetConfig> for DatasetConfig {
    fn from(config: ShardsDatasetConfig) -> Self {
        DatasetConfig::Shards(config)
    }
}

/// Table files directly under `dir` with the given extension, sorted
pub(crate) fn list_with_extension(fs: &dyn FileSystem, dir: &str, ext: &str) -> Result<Vec<String>, ConfigError> {
    let suffix = format!(".{}", ext);
    Ok(fs
        .list_directory(dir)?
        .into_iter()
        .filter(|path| path.ends_with(&suffix))
        .collect())
}

/// Most common table extension among the files directly under `dir`
pub(crate) fn sniff_table_extension(fs: &dyn FileSystem, dir: &str) -> Result<Option<TableFormat>, ConfigError> {
    let mut counts: AHashMap<TableFormat, usize> = AHashMap::new();
    for path in fs.list_directory(dir)? {
        if fs.is_dir(&path) {
            continue;
        }
        if let Some(format) = TableFormat::from_path(&path) {
            *counts.entry(format).or_default() += 1;
        }
    }
    Ok(counts
        .into_iter()
        .max_by_key(|(format, count)| (*count, *format == TableFormat::Csv))
        .map(|(format, _)| format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_modality_rejected() {
        let result = BaseConfig::new(
            DatasetFormat::Shards,
            "data",
            vec![
                DataType::sharded(ModalityKind::Image, None),
                DataType::sharded(ModalityKind::Image, Some("other")),
            ],
        );
        assert!(matches!(result, Err(ConfigError::DuplicateModality(ModalityKind::Image))));
    }

    #[test]
    fn test_layout_compatibility() {
        let file_in_shards = BaseConfig::new(
            DatasetFormat::Shards,
            "data",
            vec![DataType::file(ModalityKind::Image, None)],
        );
        assert!(matches!(file_in_shards, Err(ConfigError::UnsupportedDatatype { .. })));

        let image_column = BaseConfig::new(
            DatasetFormat::Files,
            "data.csv",
            vec![DataType::Column {
                modality: ModalityKind::Image,
                user_column_name: "pixels".into(),
            }],
        );
        assert!(matches!(image_column, Err(ConfigError::NotColumnModality(ModalityKind::Image))));
    }

    #[test]
    fn test_duplicate_physical_column_rejected() {
        let result = BaseConfig::new(
            DatasetFormat::ShardedFiles,
            "data",
            vec![
                DataType::sharded(ModalityKind::Image, Some("name")),
                DataType::sharded(ModalityKind::Video, Some("name")),
            ],
        );
        assert!(matches!(result, Err(ConfigError::DuplicateColumn(_))));
    }

    #[test]
    fn test_modality2datatype_and_mapping() {
        let base = BaseConfig::new(
            DatasetFormat::Shards,
            "data///",
            vec![
                DataType::sharded(ModalityKind::Image, Some("img")),
                DataType::column(ModalityKind::Text, Some("caption")),
            ],
        )
        .unwrap();

        assert_eq!(base.path(), "data");
        assert_eq!(base.modalities(), vec![ModalityKind::Image, ModalityKind::Text]);
        assert_eq!(base.columns_mapping().to_logical("img"), Some("image_name"));
        assert_eq!(base.columns_mapping().to_physical("text"), Some("caption"));
        assert_eq!(
            base.modality_location(ModalityKind::Image),
            Some(ModalityLocation::ArchiveMember { path_column: "image_path".into() })
        );
        assert_eq!(
            base.modality_location(ModalityKind::Text),
            Some(ModalityLocation::Column("text".into()))
        );
        assert_eq!(base.modality_location(ModalityKind::Video), None);
    }

    #[test]
    fn test_modality_columns_require_one() {
        assert!(matches!(
            ModalityColumns::new().to_datatypes(DatasetFormat::Files),
            Err(ConfigError::NoModalities)
        ));
    }
}
