use std::sync::Arc;

use dpf_core::filesystem::join_path;
use dpf_core::{FileSystem, ModalityKind, Row, SampleTable, TableError, TableFormat};
use tracing::{debug, error, info};

use super::{file_name_with_ext, shard_row, Namer, SampleFiles, Writer};
use crate::options::ShardedFilesWriteOptions;
use crate::DataError;

/// Shard being filled; its files are already on disk
struct OpenShard {
    name: String,
    dir: String,
    rows: Vec<Row>,
}

/// Writes one `<shard>/` directory of sample files plus a `<shard>.<ext>`
/// table per shard
pub struct ShardedFilesWriter {
    fs: Arc<dyn FileSystem>,
    destination: String,
    options: ShardedFilesWriteOptions,
    shard_names: Namer,
    file_names: Namer,
    current: Option<OpenShard>,
    errors: Vec<String>,
    finished: bool,
}

impl ShardedFilesWriter {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        destination: &str,
        options: ShardedFilesWriteOptions,
    ) -> Result<Self, DataError> {
        if TableFormat::from_extension(&options.datafiles_ext).is_none() {
            return Err(TableError::UnsupportedFormat(options.datafiles_ext.clone()).into());
        }
        let destination = destination.trim_end_matches('/').to_string();
        fs.create_dir_all(&destination)?;
        Ok(Self {
            fs,
            destination,
            shard_names: Namer::new(options.filenaming, options.counter_width),
            file_names: Namer::new(options.filenaming, options.counter_width),
            options,
            current: None,
            errors: Vec::new(),
            finished: false,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    fn open_shard(&mut self) -> Result<&mut OpenShard, DataError> {
        let limit = self.options.max_files_in_shard.max(1);
        if self.current.as_ref().is_some_and(|shard| shard.rows.len() >= limit) {
            self.flush();
        }
        if self.current.is_none() {
            let name = self.shard_names.next_name();
            let dir = join_path(&self.destination, &name);
            self.fs.create_dir_all(&dir)?;
            debug!("Opening shard directory {}", dir);
            self.current = Some(OpenShard {
                name,
                dir,
                rows: Vec::new(),
            });
        }
        self.current
            .as_mut()
            .ok_or_else(|| DataError::Other("No open shard".to_string()))
    }

    fn flush(&mut self) {
        let Some(shard) = self.current.take() else {
            return;
        };
        if shard.rows.is_empty() {
            return;
        }
        let table_path = join_path(
            &self.destination,
            &format!("{}.{}", shard.name, self.options.datafiles_ext),
        );
        let written = SampleTable::from_rows(&shard.rows)
            .and_then(|table| self.fs.write_table(&table_path, &table));
        match written {
            Ok(()) => info!("Saved shard {} with {} samples", shard.name, shard.rows.len()),
            Err(err) => {
                let message = format!("Error during saving file {}: {}", table_path, err);
                error!("{}", message);
                self.errors.push(message);
            }
        }
    }
}

impl Writer for ShardedFilesWriter {
    fn save_sample(&mut self, files: SampleFiles, metadata: Row) -> Result<(), DataError> {
        let stem = self.file_names.next_name();
        let names: Vec<(ModalityKind, String)> = files
            .iter()
            .map(|(modality, (ext, _))| (*modality, file_name_with_ext(&stem, ext)))
            .collect();
        let row = shard_row(&names, metadata, &self.options.rename_columns);

        let fs = self.fs.clone();
        let shard = self.open_shard()?;
        for ((_, name), (_, data)) in names.iter().zip(files.values()) {
            fs.write_file(&join_path(&shard.dir, name), data)?;
        }
        shard.rows.push(row);
        Ok(())
    }

    fn finish(&mut self) -> Vec<String> {
        self.flush();
        self.finished = true;
        std::mem::take(&mut self.errors)
    }
}

impl Drop for ShardedFilesWriter {
    fn drop(&mut self) {
        if !self.finished {
            for message in self.finish() {
                error!("{}", message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use dpf_core::{LocalFileSystem, Value};
    use indexmap::IndexMap;

    use super::*;
    use crate::options::FileNaming;

    #[test]
    fn test_writes_files_and_tables() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let options = ShardedFilesWriteOptions {
            max_files_in_shard: 1,
            ..Default::default()
        };
        let mut writer = ShardedFilesWriter::new(Arc::new(LocalFileSystem), &root, options).unwrap();

        for idx in 0..2u8 {
            let mut files = IndexMap::new();
            files.insert(ModalityKind::Image, ("png".to_string(), vec![idx]));
            files.insert(ModalityKind::Video, ("mp4".to_string(), vec![idx, idx]));
            let mut metadata = Row::new();
            metadata.insert("score".into(), Value::Int(idx as i64));
            writer.save_sample(files, metadata).unwrap();
        }
        assert!(writer.finish().is_empty());

        assert_eq!(std::fs::read(dir.path().join("00000/00000.png")).unwrap(), vec![0]);
        assert_eq!(std::fs::read(dir.path().join("00001/00001.mp4")).unwrap(), vec![1, 1]);
        let table = LocalFileSystem.read_table(&format!("{}/00001.csv", root)).unwrap();
        assert_eq!(table.column_names(), vec!["image_name", "video_name", "score"]);
        assert_eq!(table.values("image_name").unwrap(), vec![Value::from("00001.png")]);
    }

    #[test]
    fn test_uuid_naming() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let options = ShardedFilesWriteOptions {
            filenaming: FileNaming::Uuid,
            ..Default::default()
        };
        let mut writer = ShardedFilesWriter::new(Arc::new(LocalFileSystem), &root, options).unwrap();
        let mut files = IndexMap::new();
        files.insert(ModalityKind::Image, ("jpg".to_string(), vec![1]));
        writer.save_sample(files, Row::new()).unwrap();
        assert!(writer.finish().is_empty());

        let tables: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "csv"))
            .collect();
        assert_eq!(tables.len(), 1);
        let stem = tables[0].path().file_stem().unwrap().to_string_lossy().to_string();
        assert_eq!(stem.len(), 36);
    }
}
