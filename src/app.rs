use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::arxiv::SearchClient;
use crate::collector::Collector;
use crate::config::ResolvedConfig;
use crate::domain::Record;
use crate::error::HarvestError;
use crate::fetcher::{DocumentClient, FetchSummary, Fetcher};
use crate::store::{Store, index_width};

#[derive(Debug, Clone, Serialize)]
pub struct HarvestResult {
    pub query: String,
    pub records: usize,
    pub metadata_path: String,
    pub pdf_dir: String,
    pub downloads: Option<FetchSummary>,
    pub finished_at: String,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Run,
    Collect,
    Fetch,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
    /// `(done, total)` for the download pass.
    pub progress: Option<(usize, usize)>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<S: SearchClient, D: DocumentClient> {
    config: ResolvedConfig,
    store: Store,
    collector: Collector<S>,
    fetcher: Fetcher<D>,
}

impl<S: SearchClient, D: DocumentClient> App<S, D> {
    pub fn new(config: ResolvedConfig, search: S, documents: D) -> Self {
        let store = Store::from_config(&config);
        let collector = Collector::new(store.clone(), search, config.search_query());
        let fetcher = Fetcher::new(documents, config.workers);
        Self {
            config,
            store,
            collector,
            fetcher,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Collects metadata, then downloads every paper.
    pub fn run(&self, sink: &dyn ProgressSink) -> Result<HarvestResult, HarvestError> {
        let records = self.collector.collect(sink)?;
        let downloads = self.fetcher.run(&self.store, &records, sink);
        Ok(self.result(&records, Some(downloads)))
    }

    pub fn collect(&self, sink: &dyn ProgressSink) -> Result<HarvestResult, HarvestError> {
        let records = self.collector.collect(sink)?;
        Ok(self.result(&records, None))
    }

    /// Downloads from an existing metadata file without querying the
    /// catalog. File names keep the width the harvest was collected with.
    pub fn fetch(&self, sink: &dyn ProgressSink) -> Result<HarvestResult, HarvestError> {
        sink.event(ProgressEvent {
            message: format!("phase=Collect; reading {}", self.store.metadata_path()),
            elapsed: None,
            progress: None,
        });
        let records = self.store.read_metadata()?;
        let width = match self.store.read_manifest()? {
            Some(manifest) => manifest.index_width,
            None => {
                let width = index_width(self.config.max_results.max(records.len()));
                warn!(
                    path = %self.store.manifest_path(),
                    width,
                    "no manifest, guessing file name width"
                );
                width
            }
        };
        let store = self.store.clone().with_index_width(width);
        store.ensure_dirs()?;
        let downloads = self.fetcher.run(&store, &records, sink);
        Ok(self.result(&records, Some(downloads)))
    }

    fn result(&self, records: &[Record], downloads: Option<FetchSummary>) -> HarvestResult {
        let store = &self.store;
        HarvestResult {
            query: self.config.query.clone(),
            records: records.len(),
            metadata_path: store.metadata_path().to_string(),
            pdf_dir: store.pdf_dir().to_string(),
            downloads,
            finished_at: iso_timestamp(),
        }
    }
}

pub(crate) fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
