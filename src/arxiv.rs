use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use feed_rs::model::Entry;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::domain::{SearchItem, SearchQuery};
use crate::error::HarvestError;

static SHORT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"arxiv\.org/(?:abs|pdf)/(.+?)(?:\.pdf)?$").expect("valid short id regex")
});

/// Catalog search: returns matching items in the order the catalog ranks
/// them, at most `query.max_results` of them.
pub trait SearchClient: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchItem>, HarvestError>;
}

#[derive(Clone)]
pub struct ArxivHttpClient {
    client: Client,
    api_url: String,
    page_size: usize,
    page_delay: Duration,
}

impl ArxivHttpClient {
    pub fn new(api_url: &str, page_size: usize, page_delay: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("arxiv-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::ArxivHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| HarvestError::ArxivHttp(err.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            page_size: page_size.max(1),
            page_delay,
        })
    }

    pub fn from_config(config: &ResolvedConfig) -> Result<Self, HarvestError> {
        Self::new(&config.api_url, config.page_size, config.page_delay())
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, HarvestError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "arXiv request failed".to_string());
        Err(HarvestError::ArxivStatus { status, message })
    }

    fn fetch_page(
        &self,
        query: &SearchQuery,
        start: usize,
        count: usize,
    ) -> Result<Vec<SearchItem>, HarvestError> {
        let start_param = start.to_string();
        let count_param = count.to_string();
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("search_query", query.query.as_str()),
                ("start", start_param.as_str()),
                ("max_results", count_param.as_str()),
                ("sortBy", query.sort_by.as_api_value()),
                ("sortOrder", query.sort_order.as_api_value()),
            ])
            .send()
            .map_err(|err| HarvestError::ArxivHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let body = response
            .bytes()
            .map_err(|err| HarvestError::ArxivHttp(err.to_string()))?;
        parse_feed(&body)
    }
}

impl SearchClient for ArxivHttpClient {
    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchItem>, HarvestError> {
        let mut items: Vec<SearchItem> = Vec::new();
        let mut start = 0usize;

        while items.len() < query.max_results {
            if start > 0 && !self.page_delay.is_zero() {
                thread::sleep(self.page_delay);
            }
            let count = self.page_size.min(query.max_results - items.len());
            let page = self.fetch_page(query, start, count)?;
            let received = page.len();
            debug!(start, requested = count, received, "arxiv page");
            items.extend(page);
            if received < count {
                break;
            }
            start += received;
        }

        items.truncate(query.max_results);
        Ok(items)
    }
}

/// Parses one page of the arXiv Atom API into search items, in feed order.
pub fn parse_feed(body: &[u8]) -> Result<Vec<SearchItem>, HarvestError> {
    let feed = feed_rs::parser::parse(body).map_err(|err| HarvestError::FeedParse(err.to_string()))?;

    // The API reports query errors as a single entry under /api/errors.
    if let Some(entry) = feed
        .entries
        .iter()
        .find(|entry| entry.id.contains("/api/errors"))
    {
        let message = entry
            .summary
            .as_ref()
            .map(|text| text.content.trim().to_string())
            .unwrap_or_else(|| entry.id.clone());
        return Err(HarvestError::ArxivQuery(message));
    }

    Ok(feed.entries.into_iter().map(entry_to_item).collect())
}

/// `2401.00001v2` from `http://arxiv.org/abs/2401.00001v2`, or the old-style
/// `hep-th/9901001v1`.
pub fn short_id(entry_id: &str) -> Option<&str> {
    SHORT_ID
        .captures(entry_id)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn entry_to_item(entry: Entry) -> SearchItem {
    let pdf_url = pdf_url(&entry);
    SearchItem {
        title: entry
            .title
            .map(|text| text.content)
            .unwrap_or_default(),
        summary: entry
            .summary
            .map(|text| text.content)
            .unwrap_or_default(),
        authors: entry.authors.into_iter().map(|person| person.name).collect(),
        categories: entry
            .categories
            .into_iter()
            .map(|category| category.term)
            .collect(),
        pdf_url,
        id: entry.id,
    }
}

fn pdf_url(entry: &Entry) -> String {
    entry
        .links
        .iter()
        .find(|link| link.title.as_deref() == Some("pdf"))
        .or_else(|| {
            entry
                .links
                .iter()
                .find(|link| link.media_type.as_deref() == Some("application/pdf"))
        })
        .map(|link| link.href.clone())
        .unwrap_or_else(|| entry.id.replacen("/abs/", "/pdf/", 1))
}
