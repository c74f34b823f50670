use ahash::AHashSet;
use dpf_core::ModalityKind;
use tracing::debug;

use super::runner::check_batch;
use super::{
    empty_batch, ColumnBatch, DataFilter, ErasedDataFilter, FilterDescriptor, FilterError, FilterKind,
    SharedFeature,
};
use crate::loader::SampleData;

/// Runs several filters over one loading pass.
///
/// The outer batch size is the largest child batch size. Each child cuts its
/// share of an outer batch into consecutive chunks of its own batch size; the
/// last chunk may be shorter. Children must share a key column and may not
/// produce the same result column twice.
pub struct ComplexDataFilter {
    name: String,
    filters: Vec<Box<dyn ErasedDataFilter>>,
    descriptors: Vec<FilterDescriptor>,
    use_same_preprocess: bool,
    workers: usize,
}

impl ComplexDataFilter {
    pub fn new(filters: Vec<Box<dyn ErasedDataFilter>>, use_same_preprocess: bool, workers: usize) -> Result<Self, FilterError> {
        let descriptors: Vec<FilterDescriptor> = filters.iter().map(|f| f.descriptor()).collect();
        let first = descriptors.first().ok_or(FilterError::NoFilters)?;

        let mut outputs = AHashSet::new();
        for descriptor in &descriptors {
            if descriptor.key_column != first.key_column {
                return Err(FilterError::KeyColumnMismatch(
                    first.key_column.clone(),
                    descriptor.key_column.clone(),
                ));
            }
            for column in &descriptor.result_columns {
                if !outputs.insert(column.clone()) {
                    return Err(FilterError::DuplicateOutputColumn(column.clone()));
                }
            }
        }

        let name = format!(
            "complex[{}]",
            descriptors.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self {
            name,
            filters,
            descriptors,
            use_same_preprocess,
            workers,
        })
    }

    pub fn filters(&self) -> &[FilterDescriptor] {
        &self.descriptors
    }

    fn union<T: Clone + PartialEq>(&self, pick: impl Fn(&FilterDescriptor) -> &[T]) -> Vec<T> {
        let mut merged: Vec<T> = Vec::new();
        for descriptor in &self.descriptors {
            for item in pick(descriptor) {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
        }
        merged
    }
}

impl DataFilter for ComplexDataFilter {
    /// One feature per child, or a single shared one
    type Feature = Vec<SharedFeature>;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> FilterKind {
        let kinds: AHashSet<FilterKind> = self.descriptors.iter().map(|d| d.kind).collect();
        match (kinds.len(), self.descriptors.first()) {
            (1, Some(first)) => first.kind,
            _ => FilterKind::Multimodal,
        }
    }

    fn modalities(&self) -> Vec<ModalityKind> {
        self.union(|d| d.modalities.as_slice())
    }

    fn key_column(&self) -> &str {
        self.descriptors
            .first()
            .map(|d| d.key_column.as_str())
            .unwrap_or_default()
    }

    fn metadata_columns(&self) -> Vec<String> {
        self.union(|d| d.metadata_columns.as_slice())
    }

    fn result_columns(&self) -> Vec<String> {
        self.union(|d| d.result_columns.as_slice())
    }

    fn batch_size(&self) -> usize {
        self.descriptors.iter().map(|d| d.batch_size).max().unwrap_or(1)
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn preprocess(&self, sample: &SampleData) -> Result<Self::Feature, FilterError> {
        if self.use_same_preprocess {
            if let Some(first) = self.filters.first() {
                return Ok(vec![first.preprocess_erased(sample)?]);
            }
        }
        self.filters.iter().map(|f| f.preprocess_erased(sample)).collect()
    }

    fn process_batch(&self, batch: Vec<Option<Self::Feature>>) -> Result<ColumnBatch, FilterError> {
        let mut output = empty_batch(&self.result_columns(), batch.len());

        for (position, (filter, descriptor)) in self.filters.iter().zip(&self.descriptors).enumerate() {
            let slot = if self.use_same_preprocess { 0 } else { position };
            let features: Vec<Option<SharedFeature>> = batch
                .iter()
                .map(|feature| feature.as_ref().and_then(|f| f.get(slot).cloned()))
                .collect();

            for chunk in features.chunks(descriptor.batch_size.max(1)) {
                debug!("{}: child {} on {} samples", self.name, descriptor.name, chunk.len());
                let child_output = filter.process_batch_erased(chunk.to_vec())?;
                check_batch(descriptor, &child_output, chunk.len())?;
                for (column, values) in child_output {
                    if let Some(target) = output.get_mut(&column) {
                        target.extend(values);
                    }
                }
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use dpf_core::Value;

    use super::*;

    /// Records the batch sizes it is called with
    struct Probe {
        name: &'static str,
        column: &'static str,
        key: &'static str,
        batch_size: usize,
        calls: Arc<Mutex<Vec<usize>>>,
    }

    impl Probe {
        fn new(name: &'static str, column: &'static str, batch_size: usize) -> Self {
            Self {
                name,
                column,
                key: "image_path",
                batch_size,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl DataFilter for Probe {
        type Feature = i64;

        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> FilterKind {
            FilterKind::Image
        }

        fn key_column(&self) -> &str {
            self.key
        }

        fn result_columns(&self) -> Vec<String> {
            vec![self.column.to_string()]
        }

        fn batch_size(&self) -> usize {
            self.batch_size
        }

        fn preprocess(&self, sample: &SampleData) -> Result<i64, FilterError> {
            Ok(sample.metadata.get("n").and_then(Value::as_f64).unwrap_or(0.0) as i64)
        }

        fn process_batch(&self, batch: Vec<Option<i64>>) -> Result<ColumnBatch, FilterError> {
            self.calls.lock().unwrap().push(batch.len());
            let mut out = empty_batch(&self.result_columns(), batch.len());
            for feature in batch {
                out[self.column].push(feature.map(Value::Int).unwrap_or_default());
            }
            Ok(out)
        }
    }

    fn boxed(filters: Vec<Probe>) -> Vec<Box<dyn ErasedDataFilter>> {
        filters
            .into_iter()
            .map(|f| Box::new(f) as Box<dyn ErasedDataFilter>)
            .collect()
    }

    #[test]
    fn test_duplicate_output_column_rejected() {
        let result = ComplexDataFilter::new(
            boxed(vec![Probe::new("a", "score", 1), Probe::new("b", "score", 1)]),
            false,
            1,
        );
        assert!(matches!(result, Err(FilterError::DuplicateOutputColumn(c)) if c == "score"));
    }

    #[test]
    fn test_key_column_mismatch_rejected() {
        let mut other = Probe::new("b", "other", 1);
        other.key = "image_name";
        let result = ComplexDataFilter::new(boxed(vec![Probe::new("a", "score", 1), other]), false, 1);
        assert!(matches!(result, Err(FilterError::KeyColumnMismatch(..))));
        assert!(matches!(ComplexDataFilter::new(Vec::new(), false, 1), Err(FilterError::NoFilters)));
    }

    #[test]
    fn test_children_rebatch_outer_batch() {
        let small = Probe::new("small", "s", 2);
        let large = Probe::new("large", "l", 5);
        let small_calls = small.calls.clone();
        let large_calls = large.calls.clone();

        let complex = ComplexDataFilter::new(boxed(vec![small, large]), false, 1).unwrap();
        assert_eq!(DataFilter::batch_size(&complex), 5);
        assert_eq!(complex.schema(), vec!["image_path", "s", "l"]);

        let batch: Vec<Option<Vec<SharedFeature>>> = (0..5)
            .map(|n| {
                let mut sample = SampleData::default();
                sample.metadata.insert("n".into(), Value::Int(n));
                if n == 3 {
                    None
                } else {
                    Some(complex.preprocess(&sample).unwrap())
                }
            })
            .collect();
        let output = complex.process_batch(batch).unwrap();

        assert_eq!(*small_calls.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(*large_calls.lock().unwrap(), vec![5]);
        assert_eq!(output["s"].len(), 5);
        assert_eq!(output["l"][4], Value::Int(4));
        assert_eq!(output["l"][3], Value::Null);
    }

    #[test]
    fn test_shared_preprocess() {
        let complex = ComplexDataFilter::new(
            boxed(vec![Probe::new("a", "x", 1), Probe::new("b", "y", 1)]),
            true,
            1,
        )
        .unwrap();
        let mut sample = SampleData::default();
        sample.metadata.insert("n".into(), Value::Int(7));
        let feature = complex.preprocess(&sample).unwrap();
        assert_eq!(feature.len(), 1);
        let output = complex.process_batch(vec![Some(feature)]).unwrap();
        assert_eq!(output["x"], vec![Value::Int(7)]);
        assert_eq!(output["y"], vec![Value::Int(7)]);
    }
}
