//! Filter contract
//!
//! A [`DataFilter`] reads modality data and metadata of each sample, turns it
//! into a feature in [`DataFilter::preprocess`] and computes result columns
//! for a batch of features in [`DataFilter::process_batch`]. The runner owns
//! batching and re-attaches the key column, so filters only return their
//! result columns.
//!
//! A [`ColumnFilter`] derives new columns from existing table columns without
//! touching any files.

mod complex;
mod files;
mod image;
mod runner;
mod text;

pub use complex::ComplexDataFilter;
pub use files::FileSizeFilter;
pub use image::ImageHashFilter;
pub use runner::FilterRunner;
pub use text::TextLengthFilter;

use std::any::Any;
use std::sync::Arc;

use dpf_core::{Columns, ModalityKind, Row, SampleTable, Value};
use indexmap::IndexMap;
use rayon::prelude::*;
use thiserror::Error;

use crate::loader::SampleData;
use crate::pool::ShardPool;
use crate::DataError;

/// Result columns produced for one batch, one value per input feature
pub type ColumnBatch = Columns;

/// Feature passed between preprocessing and batch processing once its
/// concrete type has been erased
pub type SharedFeature = Arc<dyn Any + Send + Sync>;

/// Errors raised by filters
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Filter {filter}: modality '{modality}' is missing from the sample")]
    MissingModality { filter: String, modality: ModalityKind },

    #[error("Filter {filter}: preprocessing failed: {message}")]
    Preprocess { filter: String, message: String },

    #[error("Filter {filter}: {message}")]
    Process { filter: String, message: String },

    #[error("Filter {filter}: batch output is missing column '{column}'")]
    MissingOutputColumn { filter: String, column: String },

    #[error("Filter {filter}: column '{column}' has {actual} values for a batch of {expected}")]
    BatchShape {
        filter: String,
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Filter {filter}: unexpected feature type")]
    FeatureType { filter: String },

    #[error("Several filters have same output column: {0}")]
    DuplicateOutputColumn(String),

    #[error("Child filters use different key columns: '{0}' and '{1}'")]
    KeyColumnMismatch(String, String),

    #[error("A complex filter needs at least one child filter")]
    NoFilters,
}

/// Data kind a filter works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Image,
    Video,
    Text,
    Multimodal,
}

impl FilterKind {
    /// Modalities read by a filter of this kind unless it says otherwise
    pub fn default_modalities(self) -> Vec<ModalityKind> {
        match self {
            FilterKind::Image => vec![ModalityKind::Image],
            FilterKind::Video => vec![ModalityKind::Video],
            FilterKind::Text => vec![ModalityKind::Text],
            FilterKind::Multimodal => Vec::new(),
        }
    }

    /// Kind of a filter reading a single modality
    pub fn for_modality(modality: ModalityKind) -> Self {
        match modality {
            ModalityKind::Image => FilterKind::Image,
            ModalityKind::Video => FilterKind::Video,
            ModalityKind::Text => FilterKind::Text,
        }
    }
}

/// A filter that runs over sample data in batches
pub trait DataFilter: Send + Sync {
    /// Per-sample output of [`preprocess`](Self::preprocess)
    type Feature: Clone + Send + Sync + 'static;

    fn name(&self) -> &str;

    fn kind(&self) -> FilterKind;

    /// Modalities whose data the filter reads
    fn modalities(&self) -> Vec<ModalityKind> {
        self.kind().default_modalities()
    }

    /// Column used to re-associate results with table rows
    fn key_column(&self) -> &str;

    /// Extra table columns the filter needs in [`SampleData::metadata`]
    fn metadata_columns(&self) -> Vec<String> {
        Vec::new()
    }

    /// Columns produced by the filter, key column excluded
    fn result_columns(&self) -> Vec<String>;

    /// Key column followed by the result columns
    fn schema(&self) -> Vec<String> {
        let mut schema = vec![self.key_column().to_string()];
        schema.extend(self.result_columns());
        schema
    }

    fn batch_size(&self) -> usize {
        1
    }

    /// Loader threads
    fn workers(&self) -> usize {
        4
    }

    fn preprocess(&self, sample: &SampleData) -> Result<Self::Feature, FilterError>;

    /// Compute result columns for a batch. `None` entries stand for samples
    /// that could not be loaded; the output still needs a value for them.
    fn process_batch(&self, batch: Vec<Option<Self::Feature>>) -> Result<ColumnBatch, FilterError>;
}

/// Static description of a filter, as seen by the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescriptor {
    pub name: String,
    pub kind: FilterKind,
    pub modalities: Vec<ModalityKind>,
    pub key_column: String,
    pub metadata_columns: Vec<String>,
    pub result_columns: Vec<String>,
    pub batch_size: usize,
    pub workers: usize,
}

impl FilterDescriptor {
    pub fn schema(&self) -> Vec<String> {
        let mut schema = vec![self.key_column.clone()];
        schema.extend(self.result_columns.iter().cloned());
        schema
    }

    /// Table columns the loader must provide
    pub fn columns_to_load(&self) -> Vec<String> {
        let mut columns = self.metadata_columns.clone();
        if !columns.contains(&self.key_column) {
            columns.push(self.key_column.clone());
        }
        columns
    }
}

/// Object-safe form of [`DataFilter`], implemented for every data filter
pub trait ErasedDataFilter: Send + Sync {
    fn descriptor(&self) -> FilterDescriptor;

    fn preprocess_erased(&self, sample: &SampleData) -> Result<SharedFeature, FilterError>;

    fn process_batch_erased(&self, batch: Vec<Option<SharedFeature>>) -> Result<ColumnBatch, FilterError>;
}

impl<F: DataFilter> ErasedDataFilter for F {
    fn descriptor(&self) -> FilterDescriptor {
        FilterDescriptor {
            name: self.name().to_string(),
            kind: self.kind(),
            modalities: self.modalities(),
            key_column: self.key_column().to_string(),
            metadata_columns: self.metadata_columns(),
            result_columns: self.result_columns(),
            batch_size: self.batch_size().max(1),
            workers: self.workers(),
        }
    }

    fn preprocess_erased(&self, sample: &SampleData) -> Result<SharedFeature, FilterError> {
        Ok(Arc::new(self.preprocess(sample)?))
    }

    fn process_batch_erased(&self, batch: Vec<Option<SharedFeature>>) -> Result<ColumnBatch, FilterError> {
        let features = batch
            .into_iter()
            .map(|feature| feature.map(|f| downcast_feature::<F::Feature>(f, self.name())).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        self.process_batch(features)
    }
}

fn downcast_feature<T: Clone + Send + Sync + 'static>(feature: SharedFeature, filter: &str) -> Result<T, FilterError> {
    let typed = feature.downcast::<T>().map_err(|_| FilterError::FeatureType {
        filter: filter.to_string(),
    })?;
    Ok(Arc::try_unwrap(typed).unwrap_or_else(|shared| (*shared).clone()))
}

/// Empty result columns for `columns`
pub fn empty_batch(columns: &[String], capacity: usize) -> ColumnBatch {
    columns
        .iter()
        .map(|c| (c.clone(), Vec::with_capacity(capacity)))
        .collect()
}

/// A filter computing new columns from existing table columns
pub trait ColumnFilter: Send + Sync {
    fn name(&self) -> &str;

    /// Table columns read by the filter
    fn columns_to_process(&self) -> Vec<String>;

    /// Columns produced, in order
    fn schema(&self) -> Vec<String>;

    fn workers(&self) -> usize {
        4
    }

    /// Values of the schema columns for one row
    fn process_sample(&self, row: &Row) -> Result<Vec<Value>, FilterError>;

    /// Run over a whole table, one output value per row and schema column
    fn process(&self, table: &SampleTable) -> Result<Columns, DataError> {
        let schema = self.schema();
        let rows = table.rows(&self.columns_to_process())?;
        let pool = ShardPool::new(self.workers())?;

        let outputs = pool.install(|| {
            rows.par_iter()
                .map(|row| self.process_sample(row))
                .collect::<Result<Vec<_>, _>>()
        })?;

        let mut columns: Columns = IndexMap::with_capacity(schema.len());
        for (idx, column) in schema.iter().enumerate() {
            let mut values = Vec::with_capacity(outputs.len());
            for output in &outputs {
                let value = output.get(idx).cloned().ok_or_else(|| FilterError::BatchShape {
                    filter: self.name().to_string(),
                    column: column.clone(),
                    expected: schema.len(),
                    actual: output.len(),
                })?;
                values.push(value);
            }
            columns.insert(column.clone(), values);
        }
        Ok(columns)
    }
}
