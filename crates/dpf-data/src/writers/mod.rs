//! Writers that lay samples out in one of the sharded layouts
//!
//! A writer receives one sample at a time: the files of its file-addressed
//! modalities and its metadata row. It assigns file names, groups samples
//! into shards of a bounded size and writes one table per shard. The current
//! shard is flushed by [`Writer::finish`], or on drop if `finish` was never
//! called.

mod sharded_files;
mod shards;

pub use sharded_files::ShardedFilesWriter;
pub use shards::ShardsWriter;

use dpf_core::{ModalityKind, Row, Value};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::options::FileNaming;
use crate::DataError;

/// Files of one sample: modality to (extension, contents). The extension
/// has no leading dot and may be empty.
pub type SampleFiles = IndexMap<ModalityKind, (String, Vec<u8>)>;

/// Sink for samples
pub trait Writer {
    /// Add one sample. An error leaves the sample out of the table, though
    /// files written before the error may remain.
    fn save_sample(&mut self, files: SampleFiles, metadata: Row) -> Result<(), DataError>;

    /// Flush the open shard. Returns errors of every shard flush so far.
    fn finish(&mut self) -> Vec<String>;
}

/// Produces shard and file names
#[derive(Debug)]
struct Namer {
    policy: FileNaming,
    width: usize,
    counter: usize,
}

impl Namer {
    fn new(policy: FileNaming, width: usize) -> Self {
        Self {
            policy,
            width,
            counter: 0,
        }
    }

    fn next_name(&mut self) -> String {
        match self.policy {
            FileNaming::Counter => {
                let name = format!("{:0width$}", self.counter, width = self.width);
                self.counter += 1;
                name
            }
            FileNaming::Uuid => Uuid::new_v4().to_string(),
        }
    }
}

fn file_name_with_ext(stem: &str, ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{}.{}", stem, ext)
    }
}

/// Table row for a sample: basename columns of its files first, then the
/// metadata with renames applied
fn shard_row(names: &[(ModalityKind, String)], metadata: Row, renames: &IndexMap<String, String>) -> Row {
    let mut row = Row::with_capacity(names.len() + metadata.len());
    for (modality, name) in names {
        row.insert(
            modality.modality().sharded_file_name_column.to_string(),
            Value::Str(name.clone()),
        );
    }
    for (column, value) in metadata {
        let column = renames.get(&column).cloned().unwrap_or(column);
        row.insert(column, value);
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_names_are_padded() {
        let mut namer = Namer::new(FileNaming::Counter, 5);
        assert_eq!(namer.next_name(), "00000");
        assert_eq!(namer.next_name(), "00001");

        let mut namer = Namer::new(FileNaming::Uuid, 5);
        let first = namer.next_name();
        assert_eq!(first.len(), 36);
        assert_ne!(first, namer.next_name());
    }

    #[test]
    fn test_shard_row_order_and_renames() {
        let mut metadata = Row::new();
        metadata.insert("text".into(), Value::from("a cat"));
        metadata.insert("score".into(), Value::Int(3));
        let mut renames = IndexMap::new();
        renames.insert("text".to_string(), "caption".to_string());

        let row = shard_row(&[(ModalityKind::Image, "0.jpg".to_string())], metadata, &renames);
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["image_name", "caption", "score"]);
        assert_eq!(file_name_with_ext("0", ".jpg"), "0.jpg");
        assert_eq!(file_name_with_ext("0", ""), "0");
    }
}
