use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::config::ResolvedConfig;
use crate::domain::Record;
use crate::error::HarvestError;

const PAPER_PREFIX: &str = "paper_";
const PAPER_EXT: &str = "pdf";
const MIN_INDEX_WIDTH: usize = 4;
const PDF_DIR: &str = "pdfs";
const METADATA_FILE: &str = "metadata.json";
const MANIFEST_FILE: &str = "harvest.json";

/// Written next to the metadata by every collect. Fetching later takes the
/// file name width from here, so a changed `max_results` cannot rename the
/// papers of an existing harvest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub query: String,
    pub max_results: usize,
    pub index_width: usize,
    pub records: usize,
    pub collected_at: String,
}

/// On-disk layout of a harvest: `<base>/metadata.json`, `<base>/harvest.json`
/// and `<base>/pdfs/`.
#[derive(Debug, Clone)]
pub struct Store {
    pdf_dir: Utf8PathBuf,
    metadata_path: Utf8PathBuf,
    manifest_path: Utf8PathBuf,
    index_width: usize,
}

impl Store {
    pub fn new(base_dir: Utf8PathBuf, max_results: usize) -> Self {
        Self {
            pdf_dir: base_dir.join(PDF_DIR),
            metadata_path: base_dir.join(METADATA_FILE),
            manifest_path: base_dir.join(MANIFEST_FILE),
            index_width: index_width(max_results),
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(config.base_dir.clone(), config.max_results)
    }

    /// Same layout, with paper names padded to `width` digits.
    pub fn with_index_width(mut self, width: usize) -> Self {
        self.index_width = width.max(MIN_INDEX_WIDTH);
        self
    }

    pub fn pdf_dir(&self) -> &Utf8Path {
        &self.pdf_dir
    }

    pub fn metadata_path(&self) -> &Utf8Path {
        &self.metadata_path
    }

    pub fn manifest_path(&self) -> &Utf8Path {
        &self.manifest_path
    }

    pub fn index_width(&self) -> usize {
        self.index_width
    }

    pub fn paper_path(&self, index: usize) -> Utf8PathBuf {
        self.pdf_dir.join(paper_file_name(index, self.index_width))
    }

    pub fn ensure_dirs(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.pdf_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("create {}: {err}", self.pdf_dir)))
    }

    pub fn paper_exists(&self, index: usize) -> bool {
        self.paper_path(index).as_std_path().exists()
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> Result<(), HarvestError> {
        let content = serde_json::to_vec_pretty(manifest)
            .map_err(|err| HarvestError::MetadataFormat(err.to_string()))?;
        Self::write_bytes_atomic(&self.manifest_path, &content)
    }

    /// `None` when the harvest predates the manifest or it was removed.
    pub fn read_manifest(&self) -> Result<Option<Manifest>, HarvestError> {
        if !self.manifest_path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(self.manifest_path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|err| HarvestError::MetadataFormat(format!("{}: {err}", self.manifest_path)))
    }

    pub fn write_metadata(&self, records: &[Record]) -> Result<(), HarvestError> {
        let content = serde_json::to_vec_pretty(records)
            .map_err(|err| HarvestError::MetadataFormat(err.to_string()))?;
        Self::write_bytes_atomic(&self.metadata_path, &content)
    }

    pub fn read_metadata(&self) -> Result<Vec<Record>, HarvestError> {
        if !self.metadata_path.as_std_path().exists() {
            return Err(HarvestError::MetadataNotFound(self.metadata_path.clone()));
        }
        let content = fs::read_to_string(self.metadata_path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let records: Vec<Record> = serde_json::from_str(&content)
            .map_err(|err| HarvestError::MetadataFormat(err.to_string()))?;

        if let Some((position, record)) = records
            .iter()
            .enumerate()
            .find(|(position, record)| record.index != *position)
        {
            return Err(HarvestError::MetadataFormat(format!(
                "record at position {position} has index {}",
                record.index
            )));
        }
        Ok(records)
    }

    /// Writes through a temp file in the destination directory, so a failed
    /// write never leaves a partial file under the final name.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".arxiv-harvest")
            .suffix(".part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| HarvestError::Filesystem(format!("write {path}: {err}")))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("persist {path}: {err}")))?;
        Ok(())
    }
}

/// Zero-padding wide enough for every index below `max_results`, never
/// narrower than four digits.
pub fn index_width(max_results: usize) -> usize {
    let largest = max_results.saturating_sub(1);
    largest.to_string().len().max(MIN_INDEX_WIDTH)
}

pub fn paper_file_name(index: usize, width: usize) -> String {
    format!("{PAPER_PREFIX}{index:0width$}.{PAPER_EXT}")
}
