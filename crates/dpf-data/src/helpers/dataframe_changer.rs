//! Column changes applied to every table file of a dataset
//!
//! Every operation runs in two passes. The first pass reads each target
//! table and checks the preconditions; if any table fails, nothing is
//! written and all failures are returned together. The second pass rewrites
//! the tables one per task; a failed write is reported for its path and does
//! not stop the others.

use std::sync::Arc;

use dpf_core::{FileSystem, SampleTable};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::pool::ShardPool;
use crate::DataError;

/// Changes columns of a fixed set of table files
pub struct DataFramesChanger {
    fs: Arc<dyn FileSystem>,
    table_paths: Vec<String>,
    workers: usize,
}

impl DataFramesChanger {
    pub fn new(fs: Arc<dyn FileSystem>, table_paths: Vec<String>, workers: usize) -> Self {
        Self { fs, table_paths, workers }
    }

    pub fn table_paths(&self) -> &[String] {
        &self.table_paths
    }

    /// Rename columns in every table. Each source column must exist and no
    /// target column may already exist.
    pub fn rename_columns(&self, mapping: &IndexMap<String, String>) -> Result<Vec<String>, DataError> {
        let pool = ShardPool::new(self.workers)?;
        self.check_all(&pool, self.table_paths.clone(), |path| {
            let columns = self.fs.read_table_columns(path).map_err(|e| e.to_string())?;
            for (old, new) in mapping {
                if !columns.contains(old) {
                    return Err(format!("table does not have \"{}\" column", old));
                }
                if columns.contains(new) {
                    return Err(format!("table already has \"{}\" column", new));
                }
            }
            Ok(())
        })?;

        let errors = self.rewrite_all(&pool, self.table_paths.clone(), |path| {
            let table = self.fs.read_table(path)?;
            Ok(table.rename(mapping)?)
        });
        info!("Renamed {} columns in {} tables", mapping.len(), self.table_paths.len());
        Ok(errors)
    }

    /// Delete columns from every table. Each column must exist.
    pub fn delete_columns(&self, columns: &[String]) -> Result<Vec<String>, DataError> {
        let pool = ShardPool::new(self.workers)?;
        self.check_all(&pool, self.table_paths.clone(), |path| {
            let present = self.fs.read_table_columns(path).map_err(|e| e.to_string())?;
            match columns.iter().find(|column| !present.contains(column)) {
                Some(column) => Err(format!("table does not have \"{}\" column", column)),
                None => Ok(()),
            }
        })?;

        let errors = self.rewrite_all(&pool, self.table_paths.clone(), |path| {
            let table = self.fs.read_table(path)?;
            Ok(table.drop_columns(columns)?)
        });
        info!("Deleted {} columns from {} tables", columns.len(), self.table_paths.len());
        Ok(errors)
    }

    /// Merge new columns into selected tables on `key_column`.
    ///
    /// `updates` maps a table path to the rows for that table. The new rows
    /// must carry exactly the table's key values, once each. Columns already
    /// present in the table are replaced.
    pub fn update_columns(
        &self,
        key_column: &str,
        updates: &IndexMap<String, SampleTable>,
    ) -> Result<Vec<String>, DataError> {
        let pool = ShardPool::new(self.workers)?;
        let paths: Vec<String> = updates.keys().cloned().collect();

        self.check_all(&pool, paths.clone(), |path| {
            let new = updates
                .get(path.as_str())
                .ok_or_else(|| "no rows given for table".to_string())?;
            let old = self.fs.read_table(path).map_err(|e| e.to_string())?;
            check_update(&old, new, key_column)
        })?;

        let errors = self.rewrite_all(&pool, paths, |path| {
            let new = updates
                .get(path.as_str())
                .ok_or_else(|| DataError::Other(format!("no rows given for {}", path)))?;
            let old = self.fs.read_table(path)?;
            let replaced: Vec<String> = new
                .column_names()
                .into_iter()
                .filter(|column| column != key_column && old.has_column(column))
                .collect();
            Ok(old.drop_columns(&replaced)?.left_join(new, key_column)?)
        });
        info!("Updated {} tables on key column '{}'", updates.len(), key_column);
        Ok(errors)
    }

    fn check_all<F>(&self, pool: &ShardPool, paths: Vec<String>, check: F) -> Result<(), DataError>
    where
        F: Fn(&String) -> Result<(), String> + Sync + Send,
    {
        let failures: Vec<(String, String)> = pool
            .map(paths, |path| check(path))
            .into_iter()
            .filter_map(|outcome| outcome.result.err().map(|message| (outcome.task, message)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            warn!("{} tables failed validation, nothing was changed", failures.len());
            Err(DataError::Precondition(failures))
        }
    }

    fn rewrite_all<F>(&self, pool: &ShardPool, paths: Vec<String>, change: F) -> Vec<String>
    where
        F: Fn(&String) -> Result<SampleTable, DataError> + Sync + Send,
    {
        let errors: Vec<String> = pool
            .map(paths, |path| {
                let table = change(path)?;
                self.fs.write_table(path, &table)?;
                Ok::<(), DataError>(())
            })
            .into_iter()
            .filter_map(|outcome| {
                outcome
                    .result
                    .err()
                    .map(|err| format!("Error during saving file {}: {}", outcome.task, err))
            })
            .collect();

        for error in &errors {
            warn!("{}", error);
        }
        errors
    }
}

fn check_update(old: &SampleTable, new: &SampleTable, key_column: &str) -> Result<(), String> {
    if !old.has_column(key_column) {
        return Err(format!("table does not have \"{}\" column", key_column));
    }
    if !new.has_column(key_column) {
        return Err(format!("new rows do not have \"{}\" column", key_column));
    }
    let old_keys = old.key_set(key_column).map_err(|e| e.to_string())?;
    let new_keys = new.key_set(key_column).map_err(|e| e.to_string())?;
    if old_keys != new_keys {
        return Err(format!("table has different values in \"{}\"", key_column));
    }

    let duplicates = old.duplicated_count(key_column).map_err(|e| e.to_string())?;
    if duplicates > 0 {
        return Err(format!("table has {} duplicates in \"{}\" column", duplicates, key_column));
    }
    let duplicates = new.duplicated_count(key_column).map_err(|e| e.to_string())?;
    if duplicates > 0 {
        return Err(format!("new rows have {} duplicates in \"{}\" column", duplicates, key_column));
    }

    if old.num_rows() != new.num_rows() {
        return Err("length of table is changed".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use dpf_core::{LocalFileSystem, Value};

    use super::*;

    fn write_shards(root: &std::path::Path, contents: &[&str]) -> Vec<String> {
        contents
            .iter()
            .enumerate()
            .map(|(idx, content)| {
                let path = root.join(format!("{}.csv", idx));
                std::fs::write(&path, content).unwrap();
                path.to_string_lossy().to_string()
            })
            .collect()
    }

    fn changer(paths: Vec<String>) -> DataFramesChanger {
        DataFramesChanger::new(Arc::new(LocalFileSystem), paths, 2)
    }

    #[test]
    fn test_rename_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_shards(dir.path(), &["name,text\na,x\n", "name,text\nb,y\n"]);
        let mut mapping = IndexMap::new();
        mapping.insert("text".to_string(), "caption".to_string());

        let errors = changer(paths.clone()).rename_columns(&mapping).unwrap();
        assert!(errors.is_empty());
        for path in &paths {
            let columns = LocalFileSystem.read_table_columns(path).unwrap();
            assert_eq!(columns, vec!["name", "caption"]);
        }
    }

    #[test]
    fn test_failed_precondition_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_shards(
            dir.path(),
            &["name,text\na,x\n", "name,caption\nb,y\n", "name,text\nc,z\n"],
        );
        let before: Vec<String> = paths.iter().map(|p| std::fs::read_to_string(p).unwrap()).collect();

        let mut mapping = IndexMap::new();
        mapping.insert("text".to_string(), "caption".to_string());
        let result = changer(paths.clone()).rename_columns(&mapping);

        match result {
            Err(DataError::Precondition(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, paths[1]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        let after: Vec<String> = paths.iter().map(|p| std::fs::read_to_string(p).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_delete_missing_column_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_shards(dir.path(), &["name,text,score\na,x,1\n"]);
        let result = changer(paths.clone()).delete_columns(&["nope".to_string()]);
        assert!(matches!(result, Err(DataError::Precondition(_))));

        let errors = changer(paths.clone()).delete_columns(&["score".to_string()]).unwrap();
        assert!(errors.is_empty());
        assert_eq!(LocalFileSystem.read_table_columns(&paths[0]).unwrap(), vec!["name", "text"]);
    }

    #[test]
    fn test_update_replaces_and_adds_columns() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_shards(dir.path(), &["name,score\na,1\nb,2\n"]);

        let mut columns = IndexMap::new();
        columns.insert("name".to_string(), vec![Value::from("b"), Value::from("a")]);
        columns.insert("score".to_string(), vec![Value::Int(20), Value::Int(10)]);
        columns.insert("label".to_string(), vec![Value::from("B"), Value::from("A")]);
        let mut updates = IndexMap::new();
        updates.insert(paths[0].clone(), SampleTable::from_columns(columns).unwrap());

        let errors = changer(paths.clone()).update_columns("name", &updates).unwrap();
        assert!(errors.is_empty());

        let table = LocalFileSystem.read_table(&paths[0]).unwrap();
        assert_eq!(table.column_names(), vec!["name", "score", "label"]);
        assert_eq!(table.values("score").unwrap(), vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(table.values("label").unwrap(), vec![Value::from("A"), Value::from("B")]);
    }

    #[test]
    fn test_update_with_other_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_shards(dir.path(), &["name,score\na,1\nb,2\n"]);

        let mut columns = IndexMap::new();
        columns.insert("name".to_string(), vec![Value::from("a"), Value::from("c")]);
        columns.insert("score".to_string(), vec![Value::Int(1), Value::Int(3)]);
        let mut updates = IndexMap::new();
        updates.insert(paths[0].clone(), SampleTable::from_columns(columns).unwrap());

        let result = changer(paths).update_columns("name", &updates);
        assert!(matches!(result, Err(DataError::Precondition(_))));
    }
}
