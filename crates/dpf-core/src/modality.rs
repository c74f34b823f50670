//! Modalities known to the framework

use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

/// A semantic kind of data stored for a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModalityKind {
    Image,
    Video,
    Text,
}

/// Column naming for a single modality
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modality {
    /// Unique modality name
    pub key: &'static str,

    /// Logical column holding a full path to the modality file
    pub path_column: &'static str,

    /// Logical column holding the file basename inside a shard
    pub sharded_file_name_column: &'static str,

    /// Logical column holding inline data, if the modality can live in a table
    pub column: Option<&'static str>,
}

static IMAGE: Modality = Modality {
    key: "image",
    path_column: "image_path",
    sharded_file_name_column: "image_name",
    column: None,
};

static VIDEO: Modality = Modality {
    key: "video",
    path_column: "video_path",
    sharded_file_name_column: "video_name",
    column: None,
};

static TEXT: Modality = Modality {
    key: "text",
    path_column: "text_path",
    sharded_file_name_column: "text_name",
    column: Some("text"),
};

impl ModalityKind {
    /// All registered modalities
    pub const ALL: [ModalityKind; 3] = [ModalityKind::Image, ModalityKind::Video, ModalityKind::Text];

    /// Column naming for this modality
    pub fn modality(self) -> &'static Modality {
        match self {
            ModalityKind::Image => &IMAGE,
            ModalityKind::Video => &VIDEO,
            ModalityKind::Text => &TEXT,
        }
    }

    pub fn key(self) -> &'static str {
        self.modality().key
    }
}

impl fmt::Display for ModalityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ModalityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModalityKind::ALL
            .into_iter()
            .find(|kind| kind.key() == s)
            .ok_or_else(|| format!("unknown modality '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_lookup() {
        assert_eq!("video".parse::<ModalityKind>(), Ok(ModalityKind::Video));
        assert!("audio".parse::<ModalityKind>().is_err());
        assert_eq!(ModalityKind::Image.modality().path_column, "image_path");
        assert_eq!(ModalityKind::Text.modality().column, Some("text"));
    }
}
