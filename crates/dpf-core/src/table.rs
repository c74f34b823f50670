//! In-memory sample table
//!
//! A [`SampleTable`] is an owned Arrow [`RecordBatch`] with one row per sample.
//! Every reshaping operation returns a new table; nothing mutates in place.

use std::fmt;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use arrow::array::{
    new_null_array, Array, ArrayRef, AsArray, BooleanArray, BooleanBuilder, Float64Builder,
    Int64Builder, StringBuilder, UInt32Array,
};
use arrow::compute::{self, concat_batches, filter_record_batch};
use arrow::datatypes::{DataType as ArrowType, Field, Float64Type, Int64Type, Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::util::display::array_value_to_string;
use indexmap::IndexMap;
use serde::{Serialize, Deserialize};

use crate::error::TableError;

/// A single cell value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// One table row, column name to value, in column order
pub type Row = IndexMap<String, Value>;

/// Column-oriented values, column name to one value per row
pub type Columns = IndexMap<String, Vec<Value>>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Str(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => f.write_str(v),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Row-per-sample table backed by an Arrow record batch
#[derive(Debug, Clone)]
pub struct SampleTable {
    batch: RecordBatch,
}

impl SampleTable {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// Table with no columns and no rows
    pub fn empty() -> Self {
        Self::new(RecordBatch::new_empty(Arc::new(Schema::empty())))
    }

    /// Build a table from column-oriented values
    pub fn from_columns(columns: Columns) -> Result<Self, TableError> {
        let num_rows = columns.values().next().map(Vec::len).unwrap_or(0);
        let mut fields = Vec::with_capacity(columns.len());
        let mut arrays = Vec::with_capacity(columns.len());

        for (name, values) in &columns {
            if values.len() != num_rows {
                return Err(TableError::LengthMismatch {
                    column: name.clone(),
                    expected: num_rows,
                    actual: values.len(),
                });
            }
            let array = values_to_array(values);
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }

        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        let batch = RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), arrays, &options)?;
        Ok(Self::new(batch))
    }

    /// Build a table from rows; columns appear in first-seen order and
    /// missing cells become nulls
    pub fn from_rows(rows: &[Row]) -> Result<Self, TableError> {
        let mut columns: Columns = IndexMap::new();
        for row in rows {
            for name in row.keys() {
                if !columns.contains_key(name) {
                    columns.insert(name.clone(), Vec::with_capacity(rows.len()));
                }
            }
        }
        for row in rows {
            for (name, values) in columns.iter_mut() {
                values.push(row.get(name).cloned().unwrap_or_default());
            }
        }
        Self::from_columns(columns)
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch.schema().fields().iter().map(|f| f.name().clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.batch.schema().index_of(name).is_ok()
    }

    /// Columns from `names` that the table does not have
    pub fn missing_columns<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| !self.has_column(name))
            .map(str::to_string)
            .collect()
    }

    pub fn column(&self, name: &str) -> Result<&ArrayRef, TableError> {
        self.batch
            .column_by_name(name)
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))
    }

    /// Values of one column
    pub fn values(&self, name: &str) -> Result<Vec<Value>, TableError> {
        array_to_values(self.column(name)?)
    }

    /// Display strings of one column, `None` for nulls
    pub fn column_strings(&self, name: &str) -> Result<Vec<Option<String>>, TableError> {
        let array = self.column(name)?;
        (0..array.len())
            .map(|idx| {
                if array.is_null(idx) {
                    Ok(None)
                } else {
                    Ok(Some(array_value_to_string(array.as_ref(), idx)?))
                }
            })
            .collect()
    }

    /// Set of distinct values of a key column
    pub fn key_set(&self, name: &str) -> Result<AHashSet<Option<String>>, TableError> {
        Ok(self.column_strings(name)?.into_iter().collect())
    }

    /// Number of rows whose value in `name` already appeared in an earlier row
    pub fn duplicated_count(&self, name: &str) -> Result<usize, TableError> {
        let mut seen = AHashSet::new();
        Ok(self
            .column_strings(name)?
            .into_iter()
            .filter(|value| !seen.insert(value.clone()))
            .count())
    }

    /// Rows restricted to the given columns
    pub fn rows(&self, columns: &[String]) -> Result<Vec<Row>, TableError> {
        let values = columns
            .iter()
            .map(|name| self.values(name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok((0..self.num_rows())
            .map(|idx| {
                columns
                    .iter()
                    .zip(&values)
                    .map(|(name, column)| (name.clone(), column[idx].clone()))
                    .collect()
            })
            .collect())
    }

    /// One full row
    pub fn row(&self, idx: usize) -> Result<Row, TableError> {
        let slice = Self::new(self.batch.slice(idx, 1));
        Ok(slice.rows(&self.column_names())?.into_iter().next().unwrap_or_default())
    }

    pub fn select(&self, columns: &[String]) -> Result<Self, TableError> {
        let schema = self.batch.schema();
        let indices = columns
            .iter()
            .map(|name| schema.index_of(name).map_err(|_| TableError::ColumnNotFound(name.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(self.batch.project(&indices)?))
    }

    /// Rename columns; unknown source columns are an error
    pub fn rename(&self, mapping: &IndexMap<String, String>) -> Result<Self, TableError> {
        for old in mapping.keys() {
            if !self.has_column(old) {
                return Err(TableError::ColumnNotFound(old.clone()));
            }
        }

        let fields: Vec<Field> = self
            .batch
            .schema()
            .fields()
            .iter()
            .map(|field| {
                let name = mapping.get(field.name()).unwrap_or(field.name());
                Field::new(name, field.data_type().clone(), field.is_nullable())
            })
            .collect();

        let mut seen = AHashSet::new();
        for field in &fields {
            if !seen.insert(field.name().clone()) {
                return Err(TableError::DuplicateColumn(field.name().clone()));
            }
        }

        self.rebuild(fields, self.batch.columns().to_vec())
    }

    pub fn drop_columns(&self, columns: &[String]) -> Result<Self, TableError> {
        if let Some(missing) = self.missing_columns(columns.iter().map(String::as_str)).into_iter().next() {
            return Err(TableError::ColumnNotFound(missing));
        }
        let keep: Vec<String> = self
            .column_names()
            .into_iter()
            .filter(|name| !columns.contains(name))
            .collect();
        let indices: Vec<usize> = keep
            .iter()
            .filter_map(|name| self.batch.schema().index_of(name).ok())
            .collect();
        Ok(Self::new(self.batch.project(&indices)?))
    }

    /// Replace a column, or append it when absent
    pub fn with_column(&self, name: &str, array: ArrayRef) -> Result<Self, TableError> {
        if self.num_columns() > 0 && array.len() != self.num_rows() {
            return Err(TableError::LengthMismatch {
                column: name.to_string(),
                expected: self.num_rows(),
                actual: array.len(),
            });
        }

        let schema = self.batch.schema();
        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        let mut columns = self.batch.columns().to_vec();
        let field = Field::new(name, array.data_type().clone(), true);

        match schema.index_of(name) {
            Ok(idx) => {
                fields[idx] = field;
                columns[idx] = array;
            }
            Err(_) => {
                fields.push(field);
                columns.push(array);
            }
        }
        self.rebuild(fields, columns)
    }

    pub fn with_values(&self, name: &str, values: &[Value]) -> Result<Self, TableError> {
        self.with_column(name, values_to_array(values))
    }

    /// Keep rows where `mask` is true
    pub fn filter(&self, mask: &[bool]) -> Result<Self, TableError> {
        if mask.len() != self.num_rows() {
            return Err(TableError::LengthMismatch {
                column: "<mask>".to_string(),
                expected: self.num_rows(),
                actual: mask.len(),
            });
        }
        let mask = BooleanArray::from(mask.to_vec());
        Ok(Self::new(filter_record_batch(&self.batch, &mask)?))
    }

    /// Gather rows by index
    pub fn take(&self, indices: &[usize]) -> Result<Self, TableError> {
        let indices = UInt32Array::from(indices.iter().map(|&idx| idx as u32).collect::<Vec<_>>());
        self.take_indices(&indices)
    }

    fn take_indices(&self, indices: &UInt32Array) -> Result<Self, TableError> {
        let columns = self
            .batch
            .columns()
            .iter()
            .map(|column| compute::take(column.as_ref(), indices, None))
            .collect::<Result<Vec<_>, _>>()?;
        let options = RecordBatchOptions::new().with_row_count(Some(indices.len()));
        Ok(Self::new(RecordBatch::try_new_with_options(self.batch.schema(), columns, &options)?))
    }

    /// Left join on `key`: every left row is kept, right columns are
    /// null where no key matches and replace same-named left columns
    pub fn left_join(&self, right: &SampleTable, key: &str) -> Result<Self, TableError> {
        let left_keys = self.column_strings(key)?;
        let right_keys = right.column_strings(key)?;

        let mut index: AHashMap<&str, Vec<u32>> = AHashMap::new();
        for (row, value) in right_keys.iter().enumerate() {
            if let Some(value) = value {
                index.entry(value.as_str()).or_default().push(row as u32);
            }
        }

        let mut left_rows = Vec::with_capacity(left_keys.len());
        let mut right_rows = Vec::with_capacity(left_keys.len());
        for (row, value) in left_keys.iter().enumerate() {
            match value.as_deref().and_then(|value| index.get(value)) {
                Some(matches) => {
                    for &matched in matches {
                        left_rows.push(row as u32);
                        right_rows.push(Some(matched));
                    }
                }
                None => {
                    left_rows.push(row as u32);
                    right_rows.push(None);
                }
            }
        }

        let mut joined = self.take_indices(&UInt32Array::from(left_rows))?;
        let right_rows = UInt32Array::from(right_rows);
        let right_schema = right.schema();
        for (field, column) in right_schema.fields().iter().zip(right.batch.columns()) {
            if field.name() == key {
                continue;
            }
            let taken = compute::take(column.as_ref(), &right_rows, None)?;
            joined = joined.with_column(field.name(), taken)?;
        }
        Ok(joined)
    }

    /// Concatenate tables with possibly different schemas.
    ///
    /// Columns are unioned in first-seen order. A column whose type differs
    /// between tables is widened to Float64/Int64 when numeric and to Utf8
    /// otherwise; tables lacking a column get nulls.
    pub fn concat(tables: &[SampleTable]) -> Result<Self, TableError> {
        let tables: Vec<&SampleTable> = tables.iter().filter(|t| t.num_columns() > 0).collect();
        if tables.is_empty() {
            return Ok(Self::empty());
        }

        let mut unified: IndexMap<String, ArrowType> = IndexMap::new();
        for table in &tables {
            for field in table.schema().fields() {
                let merged = match unified.get(field.name()) {
                    Some(existing) => unify_types(existing, field.data_type()),
                    None => field.data_type().clone(),
                };
                unified.insert(field.name().clone(), merged);
            }
        }

        let schema = Arc::new(Schema::new(
            unified
                .iter()
                .map(|(name, data_type)| Field::new(name, data_type.clone(), true))
                .collect::<Vec<_>>(),
        ));

        let mut batches = Vec::with_capacity(tables.len());
        for table in &tables {
            let columns = unified
                .iter()
                .map(|(name, data_type)| match table.batch.column_by_name(name) {
                    Some(column) if column.data_type() == data_type => Ok(column.clone()),
                    Some(column) => compute::cast(column, data_type).map_err(TableError::from),
                    None => Ok(new_null_array(data_type, table.num_rows())),
                })
                .collect::<Result<Vec<_>, _>>()?;
            batches.push(RecordBatch::try_new(schema.clone(), columns)?);
        }

        Ok(Self::new(concat_batches(&schema, &batches)?))
    }

    fn rebuild(&self, fields: Vec<Field>, columns: Vec<ArrayRef>) -> Result<Self, TableError> {
        let num_rows = columns.first().map(|c| c.len()).unwrap_or(self.num_rows());
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        let batch = RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)?;
        Ok(Self::new(batch))
    }
}

impl Default for SampleTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for SampleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match arrow::util::pretty::pretty_format_batches(&[self.batch.clone()]) {
            Ok(rendered) => write!(f, "{}", rendered),
            Err(_) => write!(f, "SampleTable({} rows x {} columns)", self.num_rows(), self.num_columns()),
        }
    }
}

fn unify_types(a: &ArrowType, b: &ArrowType) -> ArrowType {
    if a == b {
        a.clone()
    } else if *a == ArrowType::Null {
        b.clone()
    } else if *b == ArrowType::Null {
        a.clone()
    } else if a.is_integer() && b.is_integer() {
        ArrowType::Int64
    } else if a.is_numeric() && b.is_numeric() {
        ArrowType::Float64
    } else {
        ArrowType::Utf8
    }
}

/// Type a column is read as when converted to [`Value`]s
fn value_type(data_type: &ArrowType) -> ArrowType {
    if *data_type == ArrowType::Boolean {
        ArrowType::Boolean
    } else if data_type.is_integer() {
        ArrowType::Int64
    } else if data_type.is_floating() {
        ArrowType::Float64
    } else {
        ArrowType::Utf8
    }
}

fn array_to_values(array: &ArrayRef) -> Result<Vec<Value>, TableError> {
    let target = value_type(array.data_type());
    let casted = match compute::cast(array, &target) {
        Ok(casted) => casted,
        Err(_) => {
            return (0..array.len())
                .map(|idx| {
                    if array.is_null(idx) {
                        Ok(Value::Null)
                    } else {
                        Ok(Value::Str(array_value_to_string(array.as_ref(), idx)?))
                    }
                })
                .collect();
        }
    };

    let values = match target {
        ArrowType::Boolean => casted
            .as_boolean()
            .iter()
            .map(|v| v.map(Value::Bool).unwrap_or_default())
            .collect(),
        ArrowType::Int64 => casted
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| v.map(Value::Int).unwrap_or_default())
            .collect(),
        ArrowType::Float64 => casted
            .as_primitive::<Float64Type>()
            .iter()
            .map(|v| v.map(Value::Float).unwrap_or_default())
            .collect(),
        _ => casted
            .as_string::<i32>()
            .iter()
            .map(|v| v.map(|s| Value::Str(s.to_string())).unwrap_or_default())
            .collect(),
    };
    Ok(values)
}

#[derive(Clone, Copy, PartialEq)]
enum Inferred {
    Bool,
    Int,
    Float,
    Str,
}

/// Convert values into the narrowest Arrow array that holds all of them
pub fn values_to_array(values: &[Value]) -> ArrayRef {
    let mut inferred: Option<Inferred> = None;
    for value in values {
        inferred = match (value, inferred) {
            (Value::Null, current) => current,
            (Value::Bool(_), None | Some(Inferred::Bool)) => Some(Inferred::Bool),
            (Value::Int(_), None | Some(Inferred::Int)) => Some(Inferred::Int),
            (Value::Int(_) | Value::Float(_), Some(Inferred::Float)) => Some(Inferred::Float),
            (Value::Float(_), None | Some(Inferred::Int)) => Some(Inferred::Float),
            _ => Some(Inferred::Str),
        };
    }

    match inferred {
        None => new_null_array(&ArrowType::Utf8, values.len()),
        Some(Inferred::Bool) => {
            let mut builder = BooleanBuilder::with_capacity(values.len());
            for value in values {
                match value {
                    Value::Bool(v) => builder.append_value(*v),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        Some(Inferred::Int) => {
            let mut builder = Int64Builder::with_capacity(values.len());
            for value in values {
                match value {
                    Value::Int(v) => builder.append_value(*v),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        Some(Inferred::Float) => {
            let mut builder = Float64Builder::with_capacity(values.len());
            for value in values {
                match value.as_f64() {
                    Some(v) if !value.is_null() => builder.append_value(v),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        Some(Inferred::Str) => {
            let mut builder = StringBuilder::new();
            for value in values {
                match value {
                    Value::Null => builder.append_null(),
                    other => builder.append_value(other.to_string()),
                }
            }
            Arc::new(builder.finish())
        }
    }
}
