mod common;

use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;

use registry_sync::app::{ProgressEvent, ProgressSink};
use registry_sync::error::RegistryError;
use registry_sync::fetcher::{FetchState, Fetcher, RetryPolicy};

use common::{MockBackend, NoopSink, fast_retry, names, record};

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

#[test]
fn records_follow_request_order() {
    let backend = MockBackend::with_results(&[
        ("Fulvestrant", vec![record("F-2", "fulvestrant"), record("F-3", "fulvestrant")]),
        ("Alpelisib", vec![record("F-1", "alpelisib")]),
    ]);
    let fetcher = Fetcher::new(backend.clone(), fast_retry());

    let batch = fetcher
        .collect(&names(&["Alpelisib", "Fulvestrant"]), &NoopSink)
        .unwrap();

    let ids: Vec<&str> = batch
        .records
        .iter()
        .map(|r| r.registration_id.as_str())
        .collect();
    assert_eq!(ids, vec!["F-1", "F-2", "F-3"]);
    assert_eq!(backend.count("open"), 1);
    assert_eq!(backend.count("close"), 1);
}

#[test]
fn states_are_reported_in_order() {
    let backend = MockBackend::with_results(&[("Alpelisib", vec![record("F-1", "alpelisib")])]);
    let fetcher = Fetcher::new(backend, fast_retry());
    let sink = RecordingSink::default();

    fetcher.collect(&names(&["Alpelisib"]), &sink).unwrap();

    let messages = sink.messages.lock().unwrap().clone();
    let expected = [
        FetchState::Navigating,
        FetchState::FormFilled,
        FetchState::Submitted,
        FetchState::ResultsChecked,
        FetchState::RecordsCollected,
    ];
    let mut cursor = 0;
    for message in &messages {
        if cursor < expected.len() && message.contains(&expected[cursor].to_string()) {
            cursor += 1;
        }
    }
    assert_eq!(cursor, expected.len(), "{messages:?}");
}

#[test]
fn single_attempt_policy_does_not_retry() {
    let backend = MockBackend::with_results(&[("Inavolisib", vec![record("F-9", "inavolisib")])])
        .failing_download("Inavolisib", 1);
    let policy = RetryPolicy {
        max_attempts: 1,
        delay: Duration::ZERO,
    };
    let fetcher = Fetcher::new(backend.clone(), policy);

    let err = fetcher
        .collect(&names(&["Inavolisib"]), &NoopSink)
        .unwrap_err();
    assert_matches!(err, RegistryError::FetchFailed { attempts: 1, .. });
    assert_eq!(backend.count("download:"), 1);
    assert_eq!(backend.count("close"), 1);
}

#[test]
fn navigation_failure_still_closes_session() {
    let mut backend = MockBackend::default();
    backend.fail_navigation = true;
    let fetcher = Fetcher::new(backend.clone(), fast_retry());

    let err = fetcher
        .collect(&names(&["Alpelisib"]), &NoopSink)
        .unwrap_err();
    assert_matches!(err, RegistryError::SourceStatus { status: 503, .. });
    assert_eq!(backend.calls(), vec!["open", "navigate", "close"]);
}
