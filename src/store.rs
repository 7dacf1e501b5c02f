use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};

use camino::{Utf8Path, Utf8PathBuf};

use crate::csv;
use crate::domain::{Record, RecordKey};
use crate::error::RegistryError;

/// Append-only CSV cache of registry records. Every call goes back to disk.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: Utf8PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.as_std_path().exists()
    }

    pub fn read_all(&self) -> Result<Vec<Record>, RegistryError> {
        let content = match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(RegistryError::Filesystem(format!(
                    "read {}: {err}",
                    self.path
                )));
            }
        };

        let mut records = Vec::new();
        for (idx, row) in csv::parse_rows(&content).into_iter().enumerate() {
            match Record::from_row(&row) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!("skipping row {} of {}: {err}", idx + 1, self.path);
                }
            }
        }
        Ok(records)
    }

    /// Returns the rows of `rows` whose key is neither stored already nor
    /// repeated earlier in the same batch.
    pub fn filter_new(&self, rows: &[Record]) -> Result<Vec<Record>, RegistryError> {
        let mut seen: HashSet<RecordKey> = self
            .read_all()?
            .iter()
            .map(Record::key)
            .collect();
        Ok(rows
            .iter()
            .filter(|record| seen.insert(record.key()))
            .cloned()
            .collect())
    }

    pub fn append_new(&self, rows: &[Record]) -> Result<usize, RegistryError> {
        let fresh = self.filter_new(rows)?;
        if fresh.is_empty() {
            tracing::info!("no new records for {}", self.path);
            return Ok(0);
        }
        self.append(&fresh)?;
        tracing::info!("appended {} record(s) to {}", fresh.len(), self.path);
        Ok(fresh.len())
    }

    fn append(&self, rows: &[Record]) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|err| RegistryError::Filesystem(format!("open {}: {err}", self.path)))?;
        let mut writer = BufWriter::new(file);
        for record in rows {
            csv::write_row(&mut writer, &record.to_row())
                .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| RegistryError::Filesystem(err.to_string()))
    }
}
