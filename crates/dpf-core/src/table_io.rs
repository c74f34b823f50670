//! Encoding and decoding of tabular files
//!
//! Tables are stored either as CSV with a header row or as Parquet. The
//! format is always derived from the file extension.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use arrow::compute;
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType as ArrowType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::error::TableError;
use crate::table::SampleTable;

/// Rows decoded per Arrow batch
const BATCH_SIZE: usize = 8192;

/// Supported table file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "csv" => Some(TableFormat::Csv),
            "parquet" => Some(TableFormat::Parquet),
            _ => None,
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Parquet => "parquet",
        }
    }
}

/// Decode table bytes
pub fn decode_table(data: &[u8], format: TableFormat) -> Result<SampleTable, TableError> {
    let batch = match format {
        TableFormat::Csv => decode_csv(data)?,
        TableFormat::Parquet => decode_parquet(data)?,
    };
    debug!("Decoded {:?} table with {} rows", format, batch.num_rows());
    Ok(SampleTable::new(batch))
}

/// Encode a table into bytes
pub fn encode_table(table: &SampleTable, format: TableFormat) -> Result<Vec<u8>, TableError> {
    let batch = normalize_for_write(table.record_batch())?;
    match format {
        TableFormat::Csv => encode_csv(&batch),
        TableFormat::Parquet => encode_parquet(&batch),
    }
}

/// Read only the column names of a table
pub fn decode_columns(data: &[u8], format: TableFormat) -> Result<Vec<String>, TableError> {
    match format {
        TableFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .from_reader(data);
            let headers = reader.headers()?;
            Ok(headers.iter().map(|h| h.to_string()).collect())
        }
        TableFormat::Parquet => {
            let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(data))?;
            Ok(builder
                .schema()
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect())
        }
    }
}

fn decode_csv(data: &[u8]) -> Result<RecordBatch, TableError> {
    if data.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    }

    let format = Format::default().with_header(true);
    let (schema, _) = format.infer_schema(Cursor::new(data), None)?;
    let schema = Arc::new(schema);

    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .with_batch_size(BATCH_SIZE)
        .build(Cursor::new(data))?;

    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    concat_or_empty(schema, batches)
}

fn decode_parquet(data: &[u8]) -> Result<RecordBatch, TableError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(data))?
        .with_batch_size(BATCH_SIZE);
    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    concat_or_empty(schema, batches)
}

fn concat_or_empty(schema: Arc<Schema>, batches: Vec<RecordBatch>) -> Result<RecordBatch, TableError> {
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    Ok(compute::concat_batches(&schema, &batches)?)
}

/// Columns without any value are typed Null by inference; neither writer
/// accepts them, so they are written as empty strings
fn normalize_for_write(batch: &RecordBatch) -> Result<RecordBatch, TableError> {
    let schema = batch.schema();
    if !schema.fields().iter().any(|f| *f.data_type() == ArrowType::Null) {
        return Ok(batch.clone());
    }

    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut columns = Vec::with_capacity(schema.fields().len());
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        if *field.data_type() == ArrowType::Null {
            fields.push(Field::new(field.name(), ArrowType::Utf8, true));
            columns.push(compute::cast(column, &ArrowType::Utf8)?);
        } else {
            fields.push(field.as_ref().clone());
            columns.push(column.clone());
        }
    }
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)?)
}

fn encode_csv(batch: &RecordBatch) -> Result<Vec<u8>, TableError> {
    let mut buffer = Vec::new();
    if batch.num_columns() == 0 {
        return Ok(buffer);
    }
    {
        let mut writer = WriterBuilder::new().with_header(true).build(&mut buffer);
        writer.write(batch)?;
    }
    Ok(buffer)
}

fn encode_parquet(batch: &RecordBatch) -> Result<Vec<u8>, TableError> {
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;
    use indexmap::IndexMap;

    fn sample() -> SampleTable {
        let mut columns = IndexMap::new();
        columns.insert("image_name".to_string(), vec![Value::from("0.jpg"), Value::from("1.jpg")]);
        columns.insert("width".to_string(), vec![Value::Int(640), Value::Int(320)]);
        columns.insert("note".to_string(), vec![Value::Null, Value::Null]);
        SampleTable::from_columns(columns).unwrap()
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(TableFormat::from_path("a/b/0.csv"), Some(TableFormat::Csv));
        assert_eq!(TableFormat::from_path("a/0.PARQUET"), Some(TableFormat::Parquet));
        assert_eq!(TableFormat::from_path("a/0.tar"), None);
    }

    #[test]
    fn test_csv_roundtrip_keeps_columns() {
        let bytes = encode_table(&sample(), TableFormat::Csv).unwrap();
        let decoded = decode_table(&bytes, TableFormat::Csv).unwrap();
        assert_eq!(decoded.column_names(), vec!["image_name", "width", "note"]);
        assert_eq!(decoded.values("width").unwrap(), vec![Value::Int(640), Value::Int(320)]);
        assert_eq!(decode_columns(&bytes, TableFormat::Csv).unwrap().len(), 3);
    }

    #[test]
    fn test_parquet_roundtrip() {
        let bytes = encode_table(&sample(), TableFormat::Parquet).unwrap();
        let decoded = decode_table(&bytes, TableFormat::Parquet).unwrap();
        assert_eq!(decoded.num_rows(), 2);
        assert_eq!(
            decode_columns(&bytes, TableFormat::Parquet).unwrap(),
            vec!["image_name", "width", "note"]
        );
    }
}
