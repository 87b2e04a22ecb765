use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::arxiv::short_id;
use crate::config::ResolvedConfig;
use crate::domain::{DownloadOutcome, Record};
use crate::error::HarvestError;
use crate::store::Store;

pub trait DocumentClient: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, HarvestError>;
}

#[derive(Clone)]
pub struct HttpDocumentClient {
    client: Client,
    timeout: Duration,
}

impl HttpDocumentClient {
    pub fn new(timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("arxiv-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::DocumentHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::DocumentHttp(err.to_string()))?;
        Ok(Self { client, timeout })
    }

    pub fn from_config(config: &ResolvedConfig) -> Result<Self, HarvestError> {
        Self::new(config.download_timeout())
    }

    fn transport_error(&self, err: reqwest::Error) -> HarvestError {
        if err.is_timeout() {
            HarvestError::DocumentHttp(format!(
                "timed out after {}s: {err}",
                self.timeout.as_secs()
            ))
        } else {
            HarvestError::DocumentHttp(err.to_string())
        }
    }
}

impl DocumentClient for HttpDocumentClient {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, HarvestError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| self.transport_error(err))?;
        if !response.status().is_success() {
            return Err(HarvestError::DocumentStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let bytes = response.bytes().map_err(|err| self.transport_error(err))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub index: usize,
    pub pdf_url: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<FetchFailure>,
    /// Outcome per record, in record order.
    #[serde(skip)]
    pub outcomes: Vec<DownloadOutcome>,
}

/// Downloads one document per record with at most `workers` requests in
/// flight. Records whose file already exists in the given store are skipped
/// without touching the network.
pub struct Fetcher<D: DocumentClient> {
    client: D,
    workers: usize,
}

impl<D: DocumentClient> Fetcher<D> {
    pub fn new(client: D, workers: usize) -> Self {
        Self {
            client,
            workers: workers.max(1),
        }
    }

    pub fn client(&self) -> &D {
        &self.client
    }

    pub fn fetch_one(&self, store: &Store, record: &Record) -> DownloadOutcome {
        if store.paper_exists(record.index) {
            return DownloadOutcome::Skipped;
        }

        let path = store.paper_path(record.index);
        let result = self
            .client
            .fetch(&record.pdf_url)
            .and_then(|bytes| Store::write_bytes_atomic(&path, &bytes));
        match result {
            Ok(()) => DownloadOutcome::Downloaded,
            Err(err) => DownloadOutcome::Error(err.to_string()),
        }
    }

    /// Blocks until every record has been attempted once.
    pub fn run(&self, store: &Store, records: &[Record], sink: &dyn ProgressSink) -> FetchSummary {
        let total = records.len();
        let workers = self.workers.min(total.max(1));
        let started = Instant::now();
        info!(total, workers, dir = %store.pdf_dir(), "starting downloads");
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; downloading {total} papers with {workers} workers"),
            elapsed: None,
            progress: Some((0, total)),
        });

        let cursor = AtomicUsize::new(0);
        let mut outcomes: Vec<Option<DownloadOutcome>> = vec![None; total];
        let mut summary = FetchSummary {
            total,
            downloaded: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
            outcomes: Vec::new(),
        };

        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<(usize, DownloadOutcome)>();
            for _ in 0..workers {
                let tx = tx.clone();
                let cursor = &cursor;
                scope.spawn(move || {
                    loop {
                        let position = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(record) = records.get(position) else {
                            break;
                        };
                        let outcome = self.fetch_one(store, record);
                        if tx.send((position, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let mut done = 0usize;
            for (position, outcome) in rx {
                done += 1;
                let record = &records[position];
                match &outcome {
                    DownloadOutcome::Skipped => summary.skipped += 1,
                    DownloadOutcome::Downloaded => summary.downloaded += 1,
                    DownloadOutcome::Error(message) => {
                        summary.failed += 1;
                        let arxiv_id = short_id(&record.id).unwrap_or(&record.id);
                        warn!(index = record.index, arxiv_id, url = %record.pdf_url, "{message}");
                        summary.errors.push(FetchFailure {
                            index: record.index,
                            pdf_url: record.pdf_url.clone(),
                            message: message.clone(),
                        });
                    }
                }
                debug!(index = record.index, outcome = outcome.as_str(), "paper done");
                sink.event(ProgressEvent {
                    message: format!("paper {} {outcome}", record.index),
                    elapsed: Some(started.elapsed()),
                    progress: Some((done, total)),
                });
                outcomes[position] = Some(outcome);
            }
        });

        summary.errors.sort_by_key(|failure| failure.index);
        summary.outcomes = outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| DownloadOutcome::Error("worker exited early".to_string()))
            })
            .collect();

        info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "downloads finished"
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} downloaded, {} skipped, {} failed",
                summary.downloaded, summary.skipped, summary.failed
            ),
            elapsed: Some(started.elapsed()),
            progress: Some((total, total)),
        });
        summary
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::output::JsonOutput;

    #[derive(Default)]
    struct MockDocuments {
        responses: HashMap<String, Result<Vec<u8>, u16>>,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MockDocuments {
        fn with(mut self, url: &str, response: Result<&[u8], u16>) -> Self {
            self.responses
                .insert(url.to_string(), response.map(|bytes| bytes.to_vec()));
            self
        }
    }

    impl DocumentClient for MockDocuments {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, HarvestError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.calls.lock().unwrap().push(url.to_string());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match self.responses.get(url) {
                Some(Ok(bytes)) => Ok(bytes.clone()),
                Some(Err(status)) => Err(HarvestError::DocumentStatus {
                    status: *status,
                    url: url.to_string(),
                }),
                None => Err(HarvestError::DocumentHttp("connection refused".to_string())),
            }
        }
    }

    fn record(index: usize) -> Record {
        Record {
            index,
            id: format!("http://arxiv.org/abs/2401.0000{index}v1"),
            title: format!("Paper {index}"),
            authors: vec!["Author".to_string()],
            summary: String::new(),
            pdf_url: format!("http://mock/pdf/{index}"),
            categories: vec!["cs.AI".to_string()],
        }
    }

    fn temp_store(temp: &tempfile::TempDir) -> Store {
        Store::new(
            Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap(),
            1000,
        )
    }

    #[test]
    fn existing_file_is_skipped_without_request() {
        let temp = tempfile::tempdir().unwrap();
        let store = temp_store(&temp);
        store.ensure_dirs().unwrap();
        std::fs::write(store.paper_path(0).as_std_path(), b"old").unwrap();

        let fetcher = Fetcher::new(MockDocuments::default(), 2);
        let outcome = fetcher.fetch_one(&store, &record(0));

        assert_eq!(outcome, DownloadOutcome::Skipped);
        assert!(fetcher.client.calls.lock().unwrap().is_empty());
        assert_eq!(std::fs::read(store.paper_path(0).as_std_path()).unwrap(), b"old");
    }

    #[test]
    fn worker_count_bounds_parallel_requests() {
        let temp = tempfile::tempdir().unwrap();
        let store = temp_store(&temp);
        let records: Vec<Record> = (0..12).map(record).collect();
        let mut documents = MockDocuments::default();
        for record in &records {
            documents = documents.with(&record.pdf_url, Ok(&b"%PDF"[..]));
        }

        let fetcher = Fetcher::new(documents, 3);
        let summary = fetcher.run(&store, &records, &JsonOutput);

        assert_eq!(summary.downloaded, 12);
        assert_eq!(summary.outcomes.len(), 12);
        assert!(
            summary
                .outcomes
                .iter()
                .all(|outcome| *outcome == DownloadOutcome::Downloaded)
        );
        assert!(fetcher.client.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(fetcher.client.calls.lock().unwrap().len(), 12);
    }

    #[test]
    fn empty_record_list_completes() {
        let temp = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(MockDocuments::default(), 4);
        let summary = fetcher.run(&temp_store(&temp), &[], &JsonOutput);
        assert_eq!(summary.total, 0);
        assert!(summary.outcomes.is_empty());
        assert!(summary.errors.is_empty());
    }

    #[test]
    fn transport_error_leaves_no_file() {
        let temp = tempfile::tempdir().unwrap();
        let store = temp_store(&temp);
        let fetcher = Fetcher::new(MockDocuments::default(), 1);

        let outcome = fetcher.fetch_one(&store, &record(5));

        assert!(matches!(
            outcome,
            DownloadOutcome::Error(ref message) if message.contains("connection refused")
        ));
        assert!(!store.paper_path(5).as_std_path().exists());
    }
}
