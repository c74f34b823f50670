//! Filesystem abstraction
//!
//! All dataset access goes through [`FileSystem`] so readers, validators and
//! writers never touch `std::fs` directly. Paths are plain `/`-separated
//! strings.

use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::{ConfigError, TableError};
use crate::table::SampleTable;
use crate::table_io::{decode_columns, decode_table, encode_table, TableFormat};

/// Storage backend used by every component that touches the disk
pub trait FileSystem: Send + Sync + Debug {
    /// Full paths of the direct children of `path`, sorted
    fn list_directory(&self, path: &str) -> io::Result<Vec<String>>;

    fn read_file(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Write a file, creating missing parent directories
    fn write_file(&self, path: &str, data: &[u8]) -> io::Result<()>;

    fn exists(&self, path: &str) -> bool;

    fn is_dir(&self, path: &str) -> bool;

    fn create_dir_all(&self, path: &str) -> io::Result<()>;

    fn join(&self, base: &str, name: &str) -> String {
        join_path(base, name)
    }

    /// Read and decode a table, picking the format from the extension
    fn read_table(&self, path: &str) -> Result<SampleTable, TableError> {
        let format = table_format(path)?;
        let data = self.read_file(path)?;
        decode_table(&data, format)
    }

    /// Column names of a table without decoding its rows
    fn read_table_columns(&self, path: &str) -> Result<Vec<String>, TableError> {
        let format = table_format(path)?;
        let data = self.read_file(path)?;
        decode_columns(&data, format)
    }

    fn write_table(&self, path: &str, table: &SampleTable) -> Result<(), TableError> {
        let format = table_format(path)?;
        let data = encode_table(table, format)?;
        self.write_file(path, &data)?;
        Ok(())
    }
}

fn table_format(path: &str) -> Result<TableFormat, TableError> {
    TableFormat::from_path(path).ok_or_else(|| TableError::UnsupportedFormat(path.to_string()))
}

/// Local disk
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFileSystem {
    fn list_directory(&self, path: &str) -> io::Result<Vec<String>> {
        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|e| join_path(path, &e.file_name().to_string_lossy())))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_file(&self, path: &str, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        debug!("Writing {} bytes to {}", data.len(), path);
        fs::write(path, data)
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn is_dir(&self, path: &str) -> bool {
        Path::new(path).is_dir()
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

/// Join two path segments with a single `/`
pub fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Last path segment
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Everything before the last path segment
pub fn parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// Split `dir/name.ext` into `("dir/name", Some("ext"))`
pub fn split_extension(path: &str) -> (&str, Option<&str>) {
    let name = file_name(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            let cut = path.len() - (name.len() - idx);
            (&path[..cut], Some(&path[cut + 1..]))
        }
        _ => (path, None),
    }
}

/// Remove trailing separators, keeping a lone root
pub fn strip_trailing_separators(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Fail with [`ConfigError::PathNotFound`] unless `path` exists
pub fn require_exists(fs: &dyn FileSystem, path: &str) -> Result<(), ConfigError> {
    if fs.exists(path) {
        Ok(())
    } else {
        Err(ConfigError::PathNotFound(path.to_string()))
    }
}
