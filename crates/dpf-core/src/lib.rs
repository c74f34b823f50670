//! Core abstractions for the dataset processing framework
//!
//! This crate provides the dataset configuration model, the in-memory sample
//! table and the filesystem capability shared by readers, filters,
//! validators and writers.

pub mod config;
pub mod datatype;
pub mod error;
pub mod filesystem;
pub mod logging;
pub mod modality;
pub mod table;
pub mod table_io;

// Re-export commonly used types
pub use config::{
    BaseConfig, ColumnMapEntry, ColumnsMapping, DatasetConfig, DatasetFormat,
    FilesDatasetConfig, ModalityColumns, ModalityLocation, ShardedFilesDatasetConfig,
    ShardsDatasetConfig,
};
pub use datatype::DataType;
pub use error::{ConfigError, TableError};
pub use filesystem::{FileSystem, LocalFileSystem};
pub use modality::{Modality, ModalityKind};
pub use table::{Columns, Row, SampleTable, Value};
pub use table_io::TableFormat;
