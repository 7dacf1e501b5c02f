#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;

use registry_sync::app::{ProgressEvent, ProgressSink};
use registry_sync::domain::{Record, normalize_ingredient};
use registry_sync::error::RegistryError;
use registry_sync::fetcher::{RetryPolicy, SearchBackend, SearchSession};
use registry_sync::remote::RemoteStore;
use registry_sync::store::LocalStore;

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

pub fn record(id: &str, ingredient: &str) -> Record {
    Record::from_row(&[id, "PRODUCT", "01-01-2024", "LAB S.A.", ingredient, "Receta Médica"])
        .unwrap()
}

pub fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn temp_store(temp: &tempfile::TempDir) -> LocalStore {
    let path = Utf8PathBuf::from_path_buf(temp.path().join("local.csv")).unwrap();
    LocalStore::new(path)
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        delay: Duration::ZERO,
    }
}

#[derive(Default)]
pub struct MockRemote {
    pub rows: Vec<Record>,
    pub unavailable: bool,
    pub reads: Mutex<usize>,
    pub appended: Mutex<Vec<Record>>,
}

impl MockRemote {
    pub fn with_rows(rows: Vec<Record>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap()
    }

    pub fn appended(&self) -> Vec<Record> {
        self.appended.lock().unwrap().clone()
    }
}

impl RemoteStore for MockRemote {
    fn read_range(&self) -> Result<Vec<Record>, RegistryError> {
        *self.reads.lock().unwrap() += 1;
        if self.unavailable {
            return Err(RegistryError::RemoteUnavailable("mock offline".to_string()));
        }
        Ok(self.rows.clone())
    }

    fn append_rows(&self, rows: &[Record]) -> Result<(), RegistryError> {
        if self.unavailable {
            return Err(RegistryError::RemoteUnavailable("mock offline".to_string()));
        }
        self.appended.lock().unwrap().extend_from_slice(rows);
        Ok(())
    }
}

/// Scripted registry: results per normalized name, plus a number of download
/// failures to inject before a download succeeds.
#[derive(Default, Clone)]
pub struct MockBackend {
    pub results: HashMap<String, Vec<Record>>,
    pub download_failures: HashMap<String, u32>,
    pub fail_navigation: bool,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    pub fn with_results(results: &[(&str, Vec<Record>)]) -> Self {
        Self {
            results: results
                .iter()
                .map(|(name, rows)| (normalize_ingredient(name), rows.clone()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing_download(mut self, name: &str, failures: u32) -> Self {
        self.download_failures
            .insert(normalize_ingredient(name), failures);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

pub struct MockSession {
    backend: MockBackend,
    current: Option<String>,
    failures_left: HashMap<String, u32>,
}

impl SearchBackend for MockBackend {
    type Session = MockSession;

    fn open(&self) -> Result<MockSession, RegistryError> {
        self.calls.lock().unwrap().push("open".to_string());
        Ok(MockSession {
            backend: self.clone(),
            current: None,
            failures_left: self.download_failures.clone(),
        })
    }
}

impl MockSession {
    fn log(&self, call: String) {
        self.backend.calls.lock().unwrap().push(call);
    }
}

impl SearchSession for MockSession {
    fn navigate(&mut self) -> Result<(), RegistryError> {
        self.log("navigate".to_string());
        if self.backend.fail_navigation {
            return Err(RegistryError::SourceStatus {
                status: 503,
                message: "maintenance".to_string(),
            });
        }
        Ok(())
    }

    fn fill_form(&mut self, ingredient: &str) -> Result<(), RegistryError> {
        self.log(format!("fill:{ingredient}"));
        self.current = Some(normalize_ingredient(ingredient));
        Ok(())
    }

    fn submit(&mut self) -> Result<(), RegistryError> {
        self.log("submit".to_string());
        Ok(())
    }

    fn result_count(&mut self) -> Result<usize, RegistryError> {
        let current = self.current.clone().unwrap_or_default();
        Ok(self
            .backend
            .results
            .get(&current)
            .map(Vec::len)
            .unwrap_or(0))
    }

    fn download(&mut self, ingredient: &str) -> Result<Vec<Record>, RegistryError> {
        self.log(format!("download:{ingredient}"));
        let key = normalize_ingredient(ingredient);
        if let Some(left) = self.failures_left.get_mut(&key) {
            if *left > 0 {
                *left -= 1;
                return Err(RegistryError::SourceHttp("download timed out".to_string()));
            }
        }
        Ok(self.backend.results.get(&key).cloned().unwrap_or_default())
    }

    fn close(&mut self) -> Result<(), RegistryError> {
        self.log("close".to_string());
        Ok(())
    }
}
