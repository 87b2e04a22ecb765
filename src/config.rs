use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{SearchQuery, SortCriterion, SortOrder};
use crate::error::HarvestError;

pub const DEFAULT_CONFIG_FILE: &str = "arxiv-harvest.json";
pub const DEFAULT_QUERY: &str = "cat:cs.AI OR cat:cs.LG OR cat:cs.CL OR cat:stat.ML";
pub const DEFAULT_MAX_RESULTS: usize = 1000;
pub const DEFAULT_WORKERS: usize = 6;
pub const DEFAULT_PAGE_SIZE: usize = 200;
pub const DEFAULT_PAGE_DELAY_MS: u64 = 3000;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_BASE_DIR: &str = "arxiv_data";
pub const DEFAULT_API_URL: &str = "https://export.arxiv.org/api/query";

/// The arXiv API refuses pages larger than this.
pub const MAX_PAGE_SIZE: usize = 2000;

/// Worker counts outside this range are accepted but logged.
pub const RECOMMENDED_WORKERS: std::ops::RangeInclusive<usize> = 4..=8;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub sort_by: Option<SortCriterion>,
    #[serde(default)]
    pub sort_order: Option<SortOrder>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub page_delay_ms: Option<u64>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
    #[serde(default)]
    pub base_dir: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub query: String,
    pub max_results: usize,
    pub sort_by: SortCriterion,
    pub sort_order: SortOrder,
    pub page_size: usize,
    pub page_delay_ms: u64,
    pub workers: usize,
    pub download_timeout_secs: u64,
    pub base_dir: Utf8PathBuf,
    pub api_url: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            query: DEFAULT_QUERY.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
            sort_by: SortCriterion::SubmittedDate,
            sort_order: SortOrder::Descending,
            page_size: DEFAULT_PAGE_SIZE,
            page_delay_ms: DEFAULT_PAGE_DELAY_MS,
            workers: DEFAULT_WORKERS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            base_dir: Utf8PathBuf::from(DEFAULT_BASE_DIR),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

impl ResolvedConfig {
    pub fn search_query(&self) -> SearchQuery {
        SearchQuery {
            query: self.query.clone(),
            max_results: self.max_results,
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `arxiv-harvest.json` from the working directory when
    /// no path is given. A missing implicit file means built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Self::resolve_config(Config::default());
        }

        Self::resolve_file(&config_path)
    }

    pub fn resolve_file(path: &Utf8Path) -> Result<ResolvedConfig, HarvestError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| HarvestError::ConfigRead(path.to_path_buf()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let defaults = ResolvedConfig::default();

        let query = config.query.unwrap_or(defaults.query);
        if query.trim().is_empty() {
            return Err(HarvestError::InvalidConfig(
                "query must not be empty".to_string(),
            ));
        }

        let max_results = config.max_results.unwrap_or(defaults.max_results);
        if max_results == 0 {
            return Err(HarvestError::InvalidConfig(
                "max_results must be at least 1".to_string(),
            ));
        }

        let page_size = config.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(HarvestError::InvalidConfig(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let workers = config.workers.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(HarvestError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if !RECOMMENDED_WORKERS.contains(&workers) {
            tracing::warn!(
                workers,
                "worker count is outside the recommended range {}-{}",
                RECOMMENDED_WORKERS.start(),
                RECOMMENDED_WORKERS.end()
            );
        }

        let download_timeout_secs = config
            .download_timeout_secs
            .unwrap_or(defaults.download_timeout_secs);
        if download_timeout_secs == 0 {
            return Err(HarvestError::InvalidConfig(
                "download_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            query,
            max_results,
            sort_by: config.sort_by.unwrap_or(defaults.sort_by),
            sort_order: config.sort_order.unwrap_or(defaults.sort_order),
            page_size,
            page_delay_ms: config.page_delay_ms.unwrap_or(defaults.page_delay_ms),
            workers,
            download_timeout_secs,
            base_dir: config
                .base_dir
                .map(Utf8PathBuf::from)
                .unwrap_or(defaults.base_dir),
            api_url: config.api_url.unwrap_or(defaults.api_url),
        })
    }
}
