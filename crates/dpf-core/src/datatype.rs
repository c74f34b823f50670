//! Where the data of a modality lives

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::modality::{Modality, ModalityKind};

/// Storage kind of one modality inside a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataType {
    /// Data is stored inline in a table column
    Column {
        modality: ModalityKind,
        user_column_name: String,
    },

    /// Data is stored in a file referenced by a path column
    File {
        modality: ModalityKind,
        user_path_column_name: String,
    },

    /// Data is stored inside a shard, referenced by its basename
    Sharded {
        modality: ModalityKind,
        user_basename_column_name: String,
    },
}

impl DataType {
    /// Inline column datatype, defaulting the user column to the modality column
    pub fn column(modality: ModalityKind, user_column_name: Option<&str>) -> Self {
        let user_column_name = user_column_name
            .or(modality.modality().column)
            .unwrap_or(modality.key())
            .to_string();
        DataType::Column { modality, user_column_name }
    }

    pub fn file(modality: ModalityKind, user_path_column_name: Option<&str>) -> Self {
        DataType::File {
            modality,
            user_path_column_name: user_path_column_name
                .unwrap_or(modality.modality().path_column)
                .to_string(),
        }
    }

    pub fn sharded(modality: ModalityKind, user_basename_column_name: Option<&str>) -> Self {
        DataType::Sharded {
            modality,
            user_basename_column_name: user_basename_column_name
                .unwrap_or(modality.modality().sharded_file_name_column)
                .to_string(),
        }
    }

    pub fn modality_kind(&self) -> ModalityKind {
        match self {
            DataType::Column { modality, .. }
            | DataType::File { modality, .. }
            | DataType::Sharded { modality, .. } => *modality,
        }
    }

    pub fn modality(&self) -> &'static Modality {
        self.modality_kind().modality()
    }

    /// Column name as persisted in the user's table
    pub fn user_column(&self) -> &str {
        match self {
            DataType::Column { user_column_name, .. } => user_column_name,
            DataType::File { user_path_column_name, .. } => user_path_column_name,
            DataType::Sharded { user_basename_column_name, .. } => user_basename_column_name,
        }
    }

    /// Column name used in the in-memory sample table
    pub fn logical_column(&self) -> &'static str {
        let modality = self.modality();
        match self {
            DataType::Column { .. } => modality.column.unwrap_or(modality.key),
            DataType::File { .. } => modality.path_column,
            DataType::Sharded { .. } => modality.sharded_file_name_column,
        }
    }

    pub fn is_file_addressed(&self) -> bool {
        !matches!(self, DataType::Column { .. })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Column { modality, user_column_name } => {
                write!(f, "ColumnDataType(modality={}, user_column_name={})", modality, user_column_name)
            }
            DataType::File { modality, user_path_column_name } => {
                write!(f, "FileDataType(modality={}, user_path_column_name={})", modality, user_path_column_name)
            }
            DataType::Sharded { modality, user_basename_column_name } => {
                write!(f, "ShardedDataType(modality={}, user_basename_column_name={})", modality, user_basename_column_name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_column_names() {
        let image = DataType::sharded(ModalityKind::Image, None);
        assert_eq!(image.user_column(), "image_name");
        assert_eq!(image.logical_column(), "image_name");

        let text = DataType::column(ModalityKind::Text, Some("caption"));
        assert_eq!(text.user_column(), "caption");
        assert_eq!(text.logical_column(), "text");
        assert!(!text.is_file_addressed());
    }

    #[test]
    fn test_serde_roundtrip() {
        let datatype = DataType::file(ModalityKind::Video, Some("clip"));
        let json = serde_json::to_string(&datatype).unwrap();
        let parsed: DataType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, datatype);
    }
}
