use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// One paper as persisted in the metadata file.
///
/// `index` is the position in the search result order and is never
/// reassigned; download filenames are derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    pub pdf_url: String,
    pub categories: Vec<String>,
}

/// An item as returned by the search capability, before it is numbered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchItem {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    pub pdf_url: String,
    pub categories: Vec<String>,
}

impl SearchItem {
    pub fn into_record(self, index: usize) -> Record {
        Record {
            index,
            id: self.id,
            title: self.title,
            authors: self.authors,
            summary: self.summary,
            pdf_url: self.pdf_url,
            categories: self.categories,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Skipped,
    Downloaded,
    Error(String),
}

impl DownloadOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            DownloadOutcome::Skipped => "skipped",
            DownloadOutcome::Downloaded => "downloaded",
            DownloadOutcome::Error(_) => "error",
        }
    }
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadOutcome::Error(message) => write!(f, "error: {message}"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum SortCriterion {
    Relevance,
    LastUpdatedDate,
    SubmittedDate,
}

impl SortCriterion {
    pub fn as_api_value(self) -> &'static str {
        match self {
            SortCriterion::Relevance => "relevance",
            SortCriterion::LastUpdatedDate => "lastUpdatedDate",
            SortCriterion::SubmittedDate => "submittedDate",
        }
    }
}

impl fmt::Display for SortCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_api_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_api_value(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_api_value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: usize,
    pub sort_by: SortCriterion,
    pub sort_order: SortOrder,
}
