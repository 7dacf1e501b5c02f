use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::Record;
use crate::error::RegistryError;

/// Opens the single search session used for a run.
pub trait SearchBackend {
    type Session: SearchSession;

    fn open(&self) -> Result<Self::Session, RegistryError>;
}

/// One stateful search session against the registry form. Calls are made
/// strictly in order for each ingredient.
pub trait SearchSession {
    fn navigate(&mut self) -> Result<(), RegistryError>;
    fn fill_form(&mut self, ingredient: &str) -> Result<(), RegistryError>;
    fn submit(&mut self) -> Result<(), RegistryError>;
    fn result_count(&mut self) -> Result<usize, RegistryError>;
    fn download(&mut self, ingredient: &str) -> Result<Vec<Record>, RegistryError>;
    fn close(&mut self) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    Idle,
    Navigating,
    FormFilled,
    Submitted,
    ResultsChecked,
    RecordsCollected,
    NoRecordsFound,
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchState::Idle => "idle",
            FetchState::Navigating => "navigating",
            FetchState::FormFilled => "form filled",
            FetchState::Submitted => "submitted",
            FetchState::ResultsChecked => "results checked",
            FetchState::RecordsCollected => "records collected",
            FetchState::NoRecordsFound => "no records found",
        };
        f.write_str(label)
    }
}

/// Fixed-delay retry for the download step. No backoff growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub ingredient: String,
    pub state: FetchState,
    pub records: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub records: Vec<Record>,
    pub outcomes: Vec<FetchOutcome>,
}

pub struct Fetcher<B: SearchBackend> {
    backend: B,
    retry: RetryPolicy,
}

impl<B: SearchBackend> Fetcher<B> {
    pub fn new(backend: B, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Searches every name in order over one session. The session is closed
    /// on every exit path; the first fatal error drops everything collected.
    pub fn collect(
        &self,
        ingredients: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<FetchBatch, RegistryError> {
        let mut session = self.backend.open()?;
        let result = self.collect_with(&mut session, ingredients, sink);
        let closed = session.close();

        match (result, closed) {
            (Ok(batch), Ok(())) => Ok(batch),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                tracing::warn!("failed to close search session: {close_err}");
                Err(err)
            }
        }
    }

    fn collect_with(
        &self,
        session: &mut B::Session,
        ingredients: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<FetchBatch, RegistryError> {
        let mut batch = FetchBatch::default();
        for ingredient in ingredients {
            let started = Instant::now();
            let records = self.fetch_one(session, ingredient, sink)?;
            let state = if records.is_some() {
                FetchState::RecordsCollected
            } else {
                FetchState::NoRecordsFound
            };
            let records = records.unwrap_or_default();
            sink.event(ProgressEvent {
                message: format!("phase=Fetch; {ingredient}: {state} ({})", records.len()),
                elapsed: Some(started.elapsed()),
            });
            batch.outcomes.push(FetchOutcome {
                ingredient: ingredient.clone(),
                state,
                records: records.len(),
            });
            batch.records.extend(records);
        }
        Ok(batch)
    }

    /// `None` when the registry reports no matches.
    fn fetch_one(
        &self,
        session: &mut B::Session,
        ingredient: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Option<Vec<Record>>, RegistryError> {
        transition(sink, ingredient, FetchState::Navigating);
        session.navigate()?;
        session.fill_form(ingredient)?;
        transition(sink, ingredient, FetchState::FormFilled);
        session.submit()?;
        transition(sink, ingredient, FetchState::Submitted);
        let count = session.result_count()?;
        transition(sink, ingredient, FetchState::ResultsChecked);

        if count == 0 {
            tracing::info!("no records found for {ingredient}");
            return Ok(None);
        }
        tracing::debug!("{count} result row(s) reported for {ingredient}");
        self.download_with_retry(session, ingredient, sink).map(Some)
    }

    fn download_with_retry(
        &self,
        session: &mut B::Session,
        ingredient: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<Record>, RegistryError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match session.download(ingredient) {
                Ok(records) => return Ok(records),
                Err(err) if attempt >= self.retry.max_attempts => {
                    return Err(RegistryError::FetchFailed {
                        ingredient: ingredient.to_string(),
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::warn!("download attempt {attempt} for {ingredient} failed: {err}");
                    sink.event(ProgressEvent {
                        message: format!("phase=Fetch; retrying download for {ingredient}"),
                        elapsed: None,
                    });
                    thread::sleep(self.retry.delay);
                }
            }
        }
    }
}

fn transition(sink: &dyn ProgressSink, ingredient: &str, state: FetchState) {
    tracing::debug!(ingredient, %state, "fetch transition");
    sink.event(ProgressEvent {
        message: format!("phase=Fetch; {ingredient}: {state}"),
        elapsed: None,
    });
}
