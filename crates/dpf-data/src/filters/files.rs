use dpf_core::{ModalityKind, Value};

use super::{empty_batch, ColumnBatch, DataFilter, FilterError, FilterKind};
use crate::loader::SampleData;

/// Byte size of the file behind a file-addressed modality
pub struct FileSizeFilter {
    modality: ModalityKind,
    key_column: String,
    result_column: String,
    workers: usize,
}

impl FileSizeFilter {
    pub fn new(modality: ModalityKind, workers: usize) -> Self {
        Self {
            modality,
            key_column: modality.modality().path_column.to_string(),
            result_column: format!("{}_file_size", modality.key()),
            workers,
        }
    }

    pub fn with_key_column(mut self, key_column: &str) -> Self {
        self.key_column = key_column.to_string();
        self
    }
}

impl DataFilter for FileSizeFilter {
    type Feature = i64;

    fn name(&self) -> &str {
        "file_size"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::for_modality(self.modality)
    }

    fn key_column(&self) -> &str {
        &self.key_column
    }

    fn result_columns(&self) -> Vec<String> {
        vec![self.result_column.clone()]
    }

    fn batch_size(&self) -> usize {
        256
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn preprocess(&self, sample: &SampleData) -> Result<i64, FilterError> {
        sample
            .bytes(self.modality)
            .map(|bytes| bytes.len() as i64)
            .ok_or_else(|| FilterError::MissingModality {
                filter: self.name().to_string(),
                modality: self.modality,
            })
    }

    fn process_batch(&self, batch: Vec<Option<i64>>) -> Result<ColumnBatch, FilterError> {
        let mut output = empty_batch(&self.result_columns(), batch.len());
        if let Some(values) = output.get_mut(&self.result_column) {
            values.extend(batch.into_iter().map(Value::from));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ModalityData;

    #[test]
    fn test_reports_size_per_modality() {
        let filter = FileSizeFilter::new(ModalityKind::Video, 1);
        assert_eq!(filter.kind(), FilterKind::Video);
        assert_eq!(filter.schema(), vec!["video_path", "video_file_size"]);

        let mut sample = SampleData::default();
        sample.modalities.insert(ModalityKind::Video, ModalityData::Bytes(vec![0; 10]));
        let size = filter.preprocess(&sample).unwrap();
        let output = filter.process_batch(vec![Some(size), None]).unwrap();
        assert_eq!(output["video_file_size"], vec![Value::Int(10), Value::Null]);
    }
}
