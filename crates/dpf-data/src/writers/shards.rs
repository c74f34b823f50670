use std::sync::Arc;

use dpf_core::filesystem::join_path;
use dpf_core::{FileSystem, ModalityKind, Row, SampleTable, TableError, TableFormat};
use tracing::{debug, error, info};

use super::{file_name_with_ext, shard_row, Namer, SampleFiles, Writer};
use crate::archive::ArchiveBuilder;
use crate::options::ShardsWriteOptions;
use crate::DataError;

/// Shard being filled. Its archive is built in memory and written out as
/// soon as the shard holds `max_files_in_shard` samples.
struct OpenShard {
    name: String,
    archive: ArchiveBuilder,
    rows: Vec<Row>,
}

/// Writes `<shard>.tar` archives with a `<shard>.<ext>` table next to each
pub struct ShardsWriter {
    fs: Arc<dyn FileSystem>,
    destination: String,
    options: ShardsWriteOptions,
    shard_names: Namer,
    file_names: Namer,
    current: Option<OpenShard>,
    errors: Vec<String>,
    finished: bool,
}

impl ShardsWriter {
    pub fn new(fs: Arc<dyn FileSystem>, destination: &str, options: ShardsWriteOptions) -> Result<Self, DataError> {
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

    /// Shard to add the next sample to
    fn open_shard(&mut self) -> &mut OpenShard {
        let shard_names = &mut self.shard_names;
        self.current.get_or_insert_with(|| {
            let name = shard_names.next_name();
            debug!("Opening shard {}", name);
            OpenShard {
                name,
                archive: ArchiveBuilder::new(),
                rows: Vec::new(),
            }
        })
    }

    fn flush(&mut self) {
        let Some(shard) = self.current.take() else {
            return;
        };
        if shard.rows.is_empty() {
            return;
        }
        let name = shard.name.clone();
        if let Err(err) = self.write_shard(shard) {
            let message = format!("Error during saving shard {}: {}", name, err);
            error!("{}", message);
            self.errors.push(message);
        }
    }

    fn write_shard(&self, shard: OpenShard) -> Result<(), DataError> {
        let table = SampleTable::from_rows(&shard.rows)?;
        let stem = join_path(&self.destination, &shard.name);
        let archive_path = format!("{}.{}", stem, self.options.archives_ext);
        let table_path = format!("{}.{}", stem, self.options.datafiles_ext);

        self.fs.write_file(&archive_path, &shard.archive.into_bytes()?)?;
        self.fs.write_table(&table_path, &table)?;
        info!("Saved shard {} with {} samples", shard.name, shard.rows.len());
        Ok(())
    }
}

impl Writer for ShardsWriter {
    fn save_sample(&mut self, files: SampleFiles, metadata: Row) -> Result<(), DataError> {
        let stem = self.file_names.next_name();
        let names: Vec<(ModalityKind, String)> = files
            .iter()
            .map(|(modality, (ext, _))| (*modality, file_name_with_ext(&stem, ext)))
            .collect();
        let row = shard_row(&names, metadata, &self.options.rename_columns);

        let limit = self.options.max_files_in_shard.max(1);
        let shard = self.open_shard();
        for ((_, name), (_, data)) in names.iter().zip(files.values()) {
            shard.archive.append(name, data)?;
        }
        shard.rows.push(row);

        if shard.rows.len() >= limit {
            self.flush();
        }
        Ok(())
    }

    fn finish(&mut self) -> Vec<String> {
        self.flush();
        self.finished = true;
        std::mem::take(&mut self.errors)
    }
}

impl Drop for ShardsWriter {
    fn drop(&mut self) {
        if !self.finished {
            for message in self.finish() {
                error!("{}", message);
            }
        }
    }
}
