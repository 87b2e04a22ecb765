use std::time::Instant;

use tracing::info;

use crate::app::{ProgressEvent, ProgressSink, iso_timestamp};
use crate::arxiv::SearchClient;
use crate::domain::{Record, SearchItem, SearchQuery};
use crate::error::HarvestError;
use crate::store::{Manifest, Store};

pub struct Collector<S: SearchClient> {
    store: Store,
    search: S,
    query: SearchQuery,
}

impl<S: SearchClient> Collector<S> {
    pub fn new(store: Store, search: S, query: SearchQuery) -> Self {
        Self {
            store,
            search,
            query,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs the search, numbers the results in the order they came back and
    /// overwrites the metadata file and manifest with them. A search failure
    /// returns before either file is touched.
    pub fn collect(&self, sink: &dyn ProgressSink) -> Result<Vec<Record>, HarvestError> {
        self.store.ensure_dirs()?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Collect; searching \"{}\" (max {}, {} {})",
                self.query.query, self.query.max_results, self.query.sort_by, self.query.sort_order
            ),
            elapsed: None,
            progress: None,
        });
        info!(query = %self.query.query, max_results = self.query.max_results, "collecting metadata");

        let start = Instant::now();
        let items = self.search.search(&self.query)?;
        let latency = start.elapsed().as_millis();
        sink.event(ProgressEvent {
            message: format!("arxiv.response items={} latency_ms={latency}", items.len()),
            elapsed: Some(start.elapsed()),
            progress: None,
        });

        let records = number_records(items);

        sink.event(ProgressEvent {
            message: format!("phase=Store; writing {}", self.store.metadata_path()),
            elapsed: None,
            progress: None,
        });
        self.store.write_metadata(&records)?;
        self.store.write_manifest(&Manifest {
            query: self.query.query.clone(),
            max_results: self.query.max_results,
            index_width: self.store.index_width(),
            records: records.len(),
            collected_at: iso_timestamp(),
        })?;
        info!(
            records = records.len(),
            path = %self.store.metadata_path(),
            "metadata collected"
        );

        Ok(records)
    }
}

/// Assigns each item its zero-based position as `index`.
pub fn number_records(items: Vec<SearchItem>) -> Vec<Record> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| item.into_record(index))
        .collect()
}
