use camino::Utf8PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("arXiv request failed: {0}")]
    ArxivHttp(String),

    #[error("arXiv rejected the query: {0}")]
    ArxivQuery(String),

    #[error("arXiv returned status {status}: {message}")]
    ArxivStatus { status: u16, message: String },

    #[error("failed to parse arXiv feed: {0}")]
    FeedParse(String),

    #[error("document request failed: {0}")]
    DocumentHttp(String),

    #[error("document server returned status {status} for {url}")]
    DocumentStatus { status: u16, url: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid metadata file: {0}")]
    MetadataFormat(String),

    #[error("metadata file not found: {0} (run `arxiv-harvest collect` first)")]
    MetadataNotFound(Utf8PathBuf),
}
