use dpf_core::{ModalityKind, Value};
use sha2::{Digest, Sha256};

use super::{empty_batch, ColumnBatch, DataFilter, FilterError, FilterKind};
use crate::loader::SampleData;

const HASH_COLUMN: &str = "image_sha256";
const SIZE_COLUMN: &str = "image_file_size";

/// Content hash of each image, for exact-duplicate detection
pub struct ImageHashFilter {
    key_column: String,
    batch_size: usize,
    workers: usize,
}

impl ImageHashFilter {
    pub fn new(workers: usize) -> Self {
        Self {
            key_column: ModalityKind::Image.modality().path_column.to_string(),
            batch_size: 64,
            workers,
        }
    }

    /// Use another key column, e.g. the basename column of a sharded dataset
    pub fn with_key_column(mut self, key_column: &str) -> Self {
        self.key_column = key_column.to_string();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl Default for ImageHashFilter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl DataFilter for ImageHashFilter {
    /// Hex digest and byte size
    type Feature = (String, i64);

    fn name(&self) -> &str {
        "image_hash"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::Image
    }

    fn key_column(&self) -> &str {
        &self.key_column
    }

    fn result_columns(&self) -> Vec<String> {
        vec![HASH_COLUMN.to_string(), SIZE_COLUMN.to_string()]
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn preprocess(&self, sample: &SampleData) -> Result<Self::Feature, FilterError> {
        let bytes = sample
            .bytes(ModalityKind::Image)
            .ok_or_else(|| FilterError::MissingModality {
                filter: self.name().to_string(),
                modality: ModalityKind::Image,
            })?;
        Ok((format!("{:x}", Sha256::digest(bytes)), bytes.len() as i64))
    }

    fn process_batch(&self, batch: Vec<Option<Self::Feature>>) -> Result<ColumnBatch, FilterError> {
        let mut output = empty_batch(&self.result_columns(), batch.len());
        for feature in batch {
            let (hash, size) = match feature {
                Some((hash, size)) => (Value::Str(hash), Value::Int(size)),
                None => (Value::Null, Value::Null),
            };
            output[HASH_COLUMN].push(hash);
            output[SIZE_COLUMN].push(size);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ModalityData;

    #[test]
    fn test_hashes_image_bytes() {
        let filter = ImageHashFilter::default();
        let mut sample = SampleData::default();
        sample.modalities.insert(ModalityKind::Image, ModalityData::Bytes(b"abc".to_vec()));

        let feature = filter.preprocess(&sample).unwrap();
        assert_eq!(
            feature.0,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(feature.1, 3);

        let output = filter.process_batch(vec![Some(feature), None]).unwrap();
        assert_eq!(output[SIZE_COLUMN], vec![Value::Int(3), Value::Null]);
    }

    #[test]
    fn test_missing_image_is_an_error() {
        let filter = ImageHashFilter::default();
        assert!(matches!(
            filter.preprocess(&SampleData::default()),
            Err(FilterError::MissingModality { .. })
        ));
    }
}
