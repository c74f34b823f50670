use dpf_core::{ModalityKind, Row, Value};

use super::{ColumnFilter, FilterError};

/// Character and word counts of a text column
pub struct TextLengthFilter {
    column: String,
    workers: usize,
}

impl TextLengthFilter {
    pub fn new(workers: usize) -> Self {
        Self {
            column: ModalityKind::Text.modality().column.unwrap_or("text").to_string(),
            workers,
        }
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = column.to_string();
        self
    }
}

impl Default for TextLengthFilter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl ColumnFilter for TextLengthFilter {
    fn name(&self) -> &str {
        "text_length"
    }

    fn columns_to_process(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn schema(&self) -> Vec<String> {
        vec![format!("{}_length", self.column), format!("{}_word_count", self.column)]
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn process_sample(&self, row: &Row) -> Result<Vec<Value>, FilterError> {
        match row.get(&self.column) {
            Some(Value::Null) | None => Ok(vec![Value::Null, Value::Null]),
            Some(value) => {
                let text = value.to_string();
                Ok(vec![
                    Value::Int(text.chars().count() as i64),
                    Value::Int(text.split_whitespace().count() as i64),
                ])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use dpf_core::SampleTable;

    #[test]
    fn test_counts_over_table() {
        let mut columns = IndexMap::new();
        columns.insert(
            "text".to_string(),
            vec![Value::from("a cat on a mat"), Value::Null, Value::from("héllo")],
        );
        let table = SampleTable::from_columns(columns).unwrap();

        let result = TextLengthFilter::new(2).process(&table).unwrap();
        assert_eq!(result.keys().collect::<Vec<_>>(), vec!["text_length", "text_word_count"]);
        assert_eq!(result["text_length"], vec![Value::Int(14), Value::Null, Value::Int(5)]);
        assert_eq!(result["text_word_count"], vec![Value::Int(5), Value::Null, Value::Int(1)]);
    }
}
