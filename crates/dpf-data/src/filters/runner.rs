use std::time::Instant;

use dpf_core::{SampleTable, Value};
use tracing::{debug, info, warn};

use super::{ColumnBatch, ErasedDataFilter, FilterDescriptor, FilterError, SharedFeature};
use crate::loader::FilesDataset;
use crate::DataError;

/// Drives a data filter over a dataset in fixed-size batches
pub struct FilterRunner<'a> {
    filter: &'a dyn ErasedDataFilter,
    descriptor: FilterDescriptor,
    return_none_on_error: bool,
}

/// Accumulated output of the batches processed so far
struct ResultColumns {
    keys: Vec<Value>,
    columns: ColumnBatch,
}

impl<'a> FilterRunner<'a> {
    pub fn new(filter: &'a dyn ErasedDataFilter, return_none_on_error: bool) -> Self {
        Self {
            descriptor: filter.descriptor(),
            filter,
            return_none_on_error,
        }
    }

    pub fn descriptor(&self) -> &FilterDescriptor {
        &self.descriptor
    }

    /// Run the filter over every sample of `dataset`.
    ///
    /// The returned table has exactly the filter's schema. Its rows follow
    /// completion order; callers join on the key column.
    pub fn run(&self, dataset: &FilesDataset) -> Result<SampleTable, DataError> {
        let descriptor = &self.descriptor;
        let started = Instant::now();
        info!(
            "Running filter {} on {} samples (batch size {}, {} workers)",
            descriptor.name,
            dataset.len(),
            descriptor.batch_size,
            descriptor.workers
        );

        let mut results = ResultColumns {
            keys: Vec::with_capacity(dataset.len()),
            columns: super::empty_batch(&descriptor.result_columns, dataset.len()),
        };
        let mut pending: Vec<(Value, Option<SharedFeature>)> = Vec::with_capacity(descriptor.batch_size);
        let mut failed_samples = 0usize;

        dataset.for_each(
            descriptor.workers,
            |idx, sample| {
                let key = dataset
                    .row(idx)
                    .and_then(|row| row.get(&descriptor.key_column))
                    .cloned()
                    .unwrap_or_default();
                let feature = sample
                    .map_err(|err| err.to_string())
                    .and_then(|sample| self.filter.preprocess_erased(&sample).map_err(|err| err.to_string()));
                (key, feature)
            },
            |(key, feature)| {
                let feature = match feature {
                    Ok(feature) => Some(feature),
                    Err(message) if self.return_none_on_error => {
                        debug!("Sample {} failed, passing None: {}", key, message);
                        failed_samples += 1;
                        None
                    }
                    Err(message) => {
                        return Err(FilterError::Preprocess {
                            filter: descriptor.name.clone(),
                            message: format!("sample {}: {}", key, message),
                        }
                        .into())
                    }
                };
                pending.push((key, feature));
                if pending.len() >= descriptor.batch_size {
                    self.flush(&mut pending, &mut results)?;
                }
                Ok(())
            },
        )?;
        self.flush(&mut pending, &mut results)?;

        if failed_samples > 0 {
            warn!("Filter {}: {} samples could not be loaded", descriptor.name, failed_samples);
        }

        let mut table = results.columns;
        table.shift_insert(0, descriptor.key_column.clone(), results.keys);
        let table = SampleTable::from_columns(table)?;
        info!(
            "Filter {} finished: {} rows in {:.2?}",
            descriptor.name,
            table.num_rows(),
            started.elapsed()
        );
        Ok(table)
    }

    fn flush(
        &self,
        pending: &mut Vec<(Value, Option<SharedFeature>)>,
        results: &mut ResultColumns,
    ) -> Result<(), DataError> {
        if pending.is_empty() {
            return Ok(());
        }
        let (keys, features): (Vec<_>, Vec<_>) = pending.drain(..).unzip();
        let mut output = self.filter.process_batch_erased(features)?;
        check_batch(&self.descriptor, &output, keys.len())?;

        for column in &self.descriptor.result_columns {
            if let (Some(values), Some(target)) = (output.swap_remove(column), results.columns.get_mut(column)) {
                target.extend(values);
            }
        }
        results.keys.extend(keys);
        Ok(())
    }
}

/// Every declared result column must be present with one value per sample
pub(crate) fn check_batch(descriptor: &FilterDescriptor, output: &ColumnBatch, expected: usize) -> Result<(), FilterError> {
    for column in &descriptor.result_columns {
        let values = output.get(column).ok_or_else(|| FilterError::MissingOutputColumn {
            filter: descriptor.name.clone(),
            column: column.clone(),
        })?;
        if values.len() != expected {
            return Err(FilterError::BatchShape {
                filter: descriptor.name.clone(),
                column: column.clone(),
                expected,
                actual: values.len(),
            });
        }
    }
    Ok(())
}
