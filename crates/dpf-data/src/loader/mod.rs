//! Per-sample data loading
//!
//! [`FilesDataset`] turns rows of the sample table into [`SampleData`]: raw
//! bytes for file-addressed modalities, cell values for inline ones, plus the
//! requested metadata columns. Rows that live in the same shard archive are
//! grouped into one work unit so each archive is read once per pass.

mod stream;

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use dpf_core::filesystem::{file_name, parent};
use dpf_core::{DatasetConfig, FileSystem, ModalityKind, ModalityLocation, Row, SampleTable, Value};
use indexmap::IndexMap;

use crate::archive::read_members;
use crate::DataError;

/// Data of one modality for one sample
#[derive(Debug, Clone, PartialEq)]
pub enum ModalityData {
    /// Contents of a file
    Bytes(Vec<u8>),
    /// Inline table value
    Value(Value),
}

impl ModalityData {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ModalityData::Bytes(bytes) => Some(bytes),
            ModalityData::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ModalityData::Value(value) => Some(value),
            ModalityData::Bytes(_) => None,
        }
    }
}

/// Everything a filter or writer sees of one sample
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleData {
    pub modalities: IndexMap<ModalityKind, ModalityData>,
    /// Location columns and requested metadata columns
    pub metadata: Row,
}

impl SampleData {
    pub fn modality(&self, modality: ModalityKind) -> Option<&ModalityData> {
        self.modalities.get(&modality)
    }

    pub fn bytes(&self, modality: ModalityKind) -> Option<&[u8]> {
        self.modality(modality).and_then(ModalityData::as_bytes)
    }

    pub fn value(&self, modality: ModalityKind) -> Option<&Value> {
        self.modality(modality).and_then(ModalityData::as_value)
    }
}

/// Random-access view over table rows that loads modality data on demand
#[derive(Debug)]
pub struct FilesDataset {
    fs: Arc<dyn FileSystem>,
    sources: Vec<(ModalityKind, ModalityLocation)>,
    rows: Vec<Row>,
}

impl FilesDataset {
    /// Build a dataset reading `modalities` and carrying `metadata_columns`.
    ///
    /// Fails if a modality is not in the config or a needed column is not in
    /// the table.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        table: &SampleTable,
        config: &DatasetConfig,
        modalities: &[ModalityKind],
        metadata_columns: &[String],
    ) -> Result<Self, DataError> {
        let mut sources = Vec::with_capacity(modalities.len());
        let mut columns: Vec<String> = Vec::new();

        for &modality in modalities {
            let location = config
                .modality_location(modality)
                .ok_or(DataError::UnknownModality(modality))?;
            match &location {
                ModalityLocation::Column(column) => push_column(column, &mut columns),
                ModalityLocation::File { path_column } | ModalityLocation::ArchiveMember { path_column } => {
                    push_column(path_column, &mut columns)
                }
            }
            sources.push((modality, location));
        }
        for column in metadata_columns {
            push_column(column, &mut columns);
        }

        let missing = table.missing_columns(columns.iter().map(String::as_str));
        if !missing.is_empty() {
            return Err(DataError::MissingColumns {
                context: "Sample table".to_string(),
                columns: missing,
            });
        }

        Ok(Self {
            fs,
            sources,
            rows: table.rows(&columns)?,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Table row backing sample `idx`
    pub fn row(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx)
    }

    /// Load one sample
    pub fn get(&self, idx: usize) -> Result<SampleData, DataError> {
        let mut cache = ArchiveCache::default();
        self.load(idx, &mut cache)
    }

    /// Sample indices grouped so that rows sharing an archive stay together.
    /// Groups appear in order of their first row.
    pub fn work_units(&self) -> Vec<Vec<usize>> {
        let archive_column = self.sources.iter().find_map(|(_, location)| match location {
            ModalityLocation::ArchiveMember { path_column } => Some(path_column.as_str()),
            _ => None,
        });

        let Some(column) = archive_column else {
            return (0..self.rows.len()).map(|idx| vec![idx]).collect();
        };

        let mut groups: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (idx, row) in self.rows.iter().enumerate() {
            let archive = match row.get(column) {
                Some(Value::Str(path)) => parent(path).to_string(),
                _ => String::new(),
            };
            groups.entry(archive).or_default().push(idx);
        }
        groups.into_values().collect()
    }

    /// Load all samples of a work unit, reading each archive once
    pub fn load_unit(&self, unit: &[usize]) -> Vec<(usize, Result<SampleData, DataError>)> {
        let mut cache = ArchiveCache::default();
        for &idx in unit {
            if let Some(row) = self.rows.get(idx) {
                cache.want(&self.sources, row);
            }
        }
        unit.iter().map(|&idx| (idx, self.load(idx, &mut cache))).collect()
    }

    fn load(&self, idx: usize, cache: &mut ArchiveCache) -> Result<SampleData, DataError> {
        let row = self
            .rows
            .get(idx)
            .ok_or_else(|| DataError::Other(format!("Sample index {} out of range", idx)))?;

        let mut modalities = IndexMap::with_capacity(self.sources.len());
        for (modality, location) in &self.sources {
            let data = match location {
                ModalityLocation::Column(column) => {
                    ModalityData::Value(row.get(column).cloned().unwrap_or_default())
                }
                ModalityLocation::File { path_column } => {
                    let path = path_value(row, path_column)?;
                    ModalityData::Bytes(self.fs.read_file(path)?)
                }
                ModalityLocation::ArchiveMember { path_column } => {
                    let path = path_value(row, path_column)?;
                    ModalityData::Bytes(cache.member(self.fs.as_ref(), parent(path), file_name(path))?)
                }
            };
            modalities.insert(*modality, data);
        }

        Ok(SampleData {
            modalities,
            metadata: row.clone(),
        })
    }
}

fn push_column(column: &str, columns: &mut Vec<String>) {
    if !columns.iter().any(|c| c == column) {
        columns.push(column.to_string());
    }
}

fn path_value<'a>(row: &'a Row, column: &str) -> Result<&'a str, DataError> {
    match row.get(column) {
        Some(Value::Str(path)) => Ok(path),
        _ => Err(DataError::Other(format!("Sample has no path in column '{}'", column))),
    }
}

/// Archives opened while loading one work unit
#[derive(Default)]
struct ArchiveCache {
    wanted: AHashMap<String, AHashSet<String>>,
    opened: AHashMap<String, Result<AHashMap<String, Vec<u8>>, String>>,
}

impl ArchiveCache {
    fn want(&mut self, sources: &[(ModalityKind, ModalityLocation)], row: &Row) {
        for (_, location) in sources {
            if let ModalityLocation::ArchiveMember { path_column } = location {
                if let Some(Value::Str(path)) = row.get(path_column) {
                    self.wanted
                        .entry(parent(path).to_string())
                        .or_default()
                        .insert(file_name(path).to_string());
                }
            }
        }
    }

    fn member(&mut self, fs: &dyn FileSystem, archive: &str, member: &str) -> Result<Vec<u8>, DataError> {
        if !self.opened.contains_key(archive) {
            let wanted = self.wanted.get(archive);
            let members = fs
                .read_file(archive)
                .and_then(|data| read_members(&data, wanted))
                .map_err(|err| err.to_string());
            self.opened.insert(archive.to_string(), members);
        }

        match self.opened.get(archive) {
            Some(Ok(members)) => members.get(member).cloned().ok_or_else(|| DataError::Archive {
                path: archive.to_string(),
                message: format!("no member named {}", member),
            }),
            Some(Err(message)) => Err(DataError::Archive {
                path: archive.to_string(),
                message: message.clone(),
            }),
            None => Err(DataError::Archive {
                path: archive.to_string(),
                message: "archive was not opened".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveBuilder;
    use dpf_core::{DataType, LocalFileSystem, ShardsDatasetConfig};

    fn shards_fixture() -> (tempfile::TempDir, DatasetConfig, SampleTable) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let mut builder = ArchiveBuilder::new();
        builder.append("0.jpg", b"zero").unwrap();
        builder.append("1.jpg", b"one").unwrap();
        std::fs::write(dir.path().join("0.tar"), builder.into_bytes().unwrap()).unwrap();

        let config: DatasetConfig = ShardsDatasetConfig::new(
            &root,
            vec![
                DataType::sharded(ModalityKind::Image, None),
                DataType::column(ModalityKind::Text, Some("caption")),
            ],
            "tar",
            "csv",
        )
        .unwrap()
        .into();

        let mut columns = IndexMap::new();
        columns.insert(
            "image_path".to_string(),
            vec![
                Value::from(format!("{}/0.tar/0.jpg", root)),
                Value::from(format!("{}/0.tar/1.jpg", root)),
                Value::from(format!("{}/0.tar/9.jpg", root)),
            ],
        );
        columns.insert("text".to_string(), vec!["a".into(), "b".into(), "c".into()]);
        columns.insert("score".to_string(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        (dir, config, SampleTable::from_columns(columns).unwrap())
    }

    #[test]
    fn test_loads_archive_members_and_columns() {
        let (_dir, config, table) = shards_fixture();
        let dataset = FilesDataset::new(
            Arc::new(LocalFileSystem),
            &table,
            &config,
            &[ModalityKind::Image, ModalityKind::Text],
            &["score".to_string()],
        )
        .unwrap();

        assert_eq!(dataset.work_units(), vec![vec![0, 1, 2]]);
        let loaded = dataset.load_unit(&[0, 1, 2]);
        let first = loaded[0].1.as_ref().unwrap();
        assert_eq!(first.bytes(ModalityKind::Image), Some(&b"zero"[..]));
        assert_eq!(first.value(ModalityKind::Text), Some(&Value::from("a")));
        assert_eq!(first.metadata["score"], Value::Int(1));
        assert!(matches!(loaded[2].1, Err(DataError::Archive { .. })));
    }

    #[test]
    fn test_missing_columns_and_modalities() {
        let (_dir, config, table) = shards_fixture();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem);
        let missing = FilesDataset::new(fs.clone(), &table, &config, &[], &["nope".to_string()]);
        assert!(matches!(missing, Err(DataError::MissingColumns { .. })));

        let video = FilesDataset::new(fs, &table, &config, &[ModalityKind::Video], &[]);
        assert!(matches!(video, Err(DataError::UnknownModality(ModalityKind::Video))));
    }
}
