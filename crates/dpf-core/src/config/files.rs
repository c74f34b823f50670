use serde::{Serialize, Deserialize};
use tracing::info;

use super::{BaseConfig, DatasetFormat, ModalityColumns};
use crate::datatype::DataType;
use crate::error::ConfigError;
use crate::filesystem::{join_path, parent, require_exists, FileSystem};
use crate::table_io::TableFormat;

/// Flat layout: a single table whose path columns point at modality files
/// relative to the table's directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FilesConfigRepr", into = "FilesConfigRepr")]
pub struct FilesDatasetConfig {
    base: BaseConfig,
    table_format: TableFormat,
}

#[derive(Serialize, Deserialize)]
struct FilesConfigRepr {
    path: String,
    datatypes: Vec<DataType>,
}

impl TryFrom<FilesConfigRepr> for FilesDatasetConfig {
    type Error = ConfigError;

    fn try_from(repr: FilesConfigRepr) -> Result<Self, Self::Error> {
        Self::new(&repr.path, repr.datatypes)
    }
}

impl From<FilesDatasetConfig> for FilesConfigRepr {
    fn from(config: FilesDatasetConfig) -> Self {
        Self {
            path: config.base.path().to_string(),
            datatypes: config.base.datatypes().to_vec(),
        }
    }
}

impl FilesDatasetConfig {
    /// `table_path` is the dataset's table file
    pub fn new(table_path: &str, datatypes: Vec<DataType>) -> Result<Self, ConfigError> {
        let base = BaseConfig::new(DatasetFormat::Files, table_path, datatypes)?;
        let table_format = TableFormat::from_path(base.path())
            .ok_or_else(|| ConfigError::UnknownTableFormat(base.path().to_string()))?;
        Ok(Self { base, table_format })
    }

    /// Build a config for the table at `table_path`. Image and video columns
    /// are treated as relative file paths, text as an inline column.
    pub fn from_path_and_columns(
        fs: &dyn FileSystem,
        table_path: &str,
        columns: &ModalityColumns,
    ) -> Result<Self, ConfigError> {
        require_exists(fs, table_path)?;
        let config = Self::new(table_path, columns.to_datatypes(DatasetFormat::Files)?)?;
        info!("Inferred files config for {}", config.table_path());
        Ok(config)
    }

    pub fn base(&self) -> &BaseConfig {
        &self.base
    }

    pub fn path(&self) -> &str {
        self.base.path()
    }

    pub fn table_path(&self) -> &str {
        self.base.path()
    }

    pub fn table_format(&self) -> TableFormat {
        self.table_format
    }

    /// Directory holding the table; relative file paths start here
    pub fn base_dir(&self) -> &str {
        parent(self.table_path())
    }

    /// Full path of a file referenced from the table
    pub fn resolve(&self, relative: &str) -> String {
        if relative.starts_with('/') || self.base_dir().is_empty() {
            relative.to_string()
        } else {
            join_path(self.base_dir(), relative)
        }
    }

    /// Inverse of [`resolve`](Self::resolve)
    pub fn relativize<'a>(&self, full: &'a str) -> &'a str {
        let base = self.base_dir();
        if base.is_empty() {
            return full;
        }
        full.strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use crate::modality::ModalityKind;

    #[test]
    fn test_from_path_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = format!("{}/data.csv", dir.path().display());
        std::fs::write(&table_path, "image_path,caption\na.jpg,cat\n").unwrap();

        let columns = ModalityColumns::new().with_image("image_path").with_text("caption");
        let config = FilesDatasetConfig::from_path_and_columns(&LocalFileSystem, &table_path, &columns).unwrap();

        assert_eq!(config.table_path(), table_path);
        assert_eq!(config.path(), table_path);
        assert_eq!(config.base().datatypes().len(), 2);
        assert_eq!(
            config.base().modality2datatype()[&ModalityKind::Image],
            DataType::file(ModalityKind::Image, Some("image_path"))
        );
        assert_eq!(config.resolve("a.jpg"), format!("{}/a.jpg", dir.path().display()));
        assert_eq!(config.relativize(&config.resolve("x/a.jpg")), "x/a.jpg");
    }

    #[test]
    fn test_missing_path_fails() {
        let columns = ModalityColumns::new().with_text("caption");
        let result = FilesDatasetConfig::from_path_and_columns(&LocalFileSystem, "/nonexistent/data.csv", &columns);
        assert!(matches!(result, Err(ConfigError::PathNotFound(_))));
    }

    #[test]
    fn test_unknown_table_format() {
        let result = FilesDatasetConfig::new("data.json", vec![DataType::column(ModalityKind::Text, None)]);
        assert!(matches!(result, Err(ConfigError::UnknownTableFormat(_))));
    }
}
