use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::Record;
use crate::error::RegistryError;
use crate::fetcher::{FetchOutcome, Fetcher, SearchBackend};
use crate::reconcile::{KnownIngredients, reconcile};
use crate::remote::RemoteStore;
use crate::store::LocalStore;

/// Which store answered the "already known" question for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "store", rename_all = "snake_case")]
pub enum KnownSource {
    Local { records: usize },
    RemoteBootstrap { rows: usize, seeded: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub requested: Vec<String>,
    pub known_source: Option<KnownSource>,
    pub already_known: BTreeSet<String>,
    pub to_fetch: Vec<String>,
    pub outcomes: Vec<FetchOutcome>,
    pub fetched_rows: usize,
    pub appended_remote: usize,
    pub appended_local: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub path: String,
    pub exists: bool,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<R: RemoteStore, B: SearchBackend> {
    local: LocalStore,
    remote: R,
    fetcher: Fetcher<B>,
}

impl<R: RemoteStore, B: SearchBackend> App<R, B> {
    pub fn new(local: LocalStore, remote: R, fetcher: Fetcher<B>) -> Self {
        Self {
            local,
            remote,
            fetcher,
        }
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// The local file is authoritative once it exists. Otherwise the remote
    /// range is read once and used to seed the local file.
    pub fn load_known(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<(KnownIngredients, KnownSource), RegistryError> {
        if self.local.exists() {
            sink.event(ProgressEvent {
                message: format!("phase=Resolve; reading {}", self.local.path()),
                elapsed: None,
            });
            let records = self.local.read_all()?;
            let known = KnownIngredients::from_records(&records);
            return Ok((
                known,
                KnownSource::Local {
                    records: records.len(),
                },
            ));
        }

        sink.event(ProgressEvent {
            message: "phase=Resolve; local store missing, reading spreadsheet".to_string(),
            elapsed: None,
        });
        let rows = self.remote.read_range()?;
        let seeded = self.local.append_new(&rows)?;
        tracing::info!(
            "bootstrapped {} from spreadsheet: {} row(s) read, {seeded} written",
            self.local.path(),
            rows.len()
        );
        Ok((
            KnownIngredients::from_records(&rows),
            KnownSource::RemoteBootstrap {
                rows: rows.len(),
                seeded,
            },
        ))
    }

    /// Resolves, fetches and stores records for `requested`. Nothing is
    /// written to either store unless every search succeeded.
    pub fn run(
        &self,
        requested: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, RegistryError> {
        let mut report = RunReport {
            started_at: Utc::now(),
            requested: requested.to_vec(),
            known_source: None,
            already_known: BTreeSet::new(),
            to_fetch: Vec::new(),
            outcomes: Vec::new(),
            fetched_rows: 0,
            appended_remote: 0,
            appended_local: 0,
        };
        if requested.is_empty() {
            return Ok(report);
        }

        let (known, source) = self.load_known(sink)?;
        let plan = reconcile(requested, &known);
        report.known_source = Some(source);
        report.already_known = plan.already_known.clone();
        report.to_fetch = plan.to_fetch.clone();

        if plan.is_complete() {
            tracing::info!("all requested ingredients are already stored");
            sink.event(ProgressEvent {
                message: "phase=Resolve; nothing to fetch".to_string(),
                elapsed: None,
            });
            return Ok(report);
        }

        tracing::info!("ingredients to fetch: {:?}", plan.to_fetch);
        let batch = self.fetcher.collect(&plan.to_fetch, sink)?;
        report.fetched_rows = batch.records.len();
        report.outcomes = batch.outcomes;

        let fresh = self.local.filter_new(&batch.records)?;
        if fresh.is_empty() {
            tracing::info!("fetched rows were all present already");
            return Ok(report);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Store; appending {} row(s)", fresh.len()),
            elapsed: None,
        });
        self.remote.append_rows(&fresh)?;
        report.appended_remote = fresh.len();
        report.appended_local = self.local.append_new(&fresh)?;
        Ok(report)
    }

    pub fn list(&self, sink: &dyn ProgressSink) -> Result<ListResult, RegistryError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; reading {}", self.local.path()),
            elapsed: None,
        });
        Ok(ListResult {
            path: self.local.path().to_string(),
            exists: self.local.exists(),
            records: self.local.read_all()?,
        })
    }
}
