//! Paper discovery and content retrieval
//!
//! - `arxiv`: topic search against the arXiv Atom API, plus PDF download
//! - `fetcher`: delayed download → save → text extraction for one paper
//! - `pdf_extractor`: per-page text extraction

pub mod arxiv;
pub mod fetcher;
pub mod pdf_extractor;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// A paper as listed by the source. Immutable for the duration of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Paper {
    /// Stable short id, e.g. `2401.01234v1` or `hep-th/9901001v1`
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    /// Submission date. Absent dates are valid.
    pub published: Option<DateTime<Utc>>,
    pub abstract_text: String,
    /// Abstract page URL
    pub url: String,
    pub pdf_url: String,
    pub categories: Vec<String>,
}

impl Paper {
    /// `YYYY-MM-DD`, or `unknown` when the source gave no date
    pub fn published_label(&self) -> String {
        self.published
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn authors_label(&self) -> String {
        if self.authors.is_empty() {
            "unknown".to_string()
        } else {
            self.authors.join(", ")
        }
    }
}

/// Text extracted from a paper's document plus where the document was saved
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub text: String,
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("search returned status {0}")]
    Status(u16),
    #[error("search API error: {0}")]
    Api(String),
    #[error("failed to parse feed: {0}")]
    Parse(String),
    #[error("topic must be non-empty")]
    EmptyTopic,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("download returned status {0}")]
    Status(u16),
    #[error("not a PDF: {0}")]
    NotPdf(String),
    #[error("PDF too large: {size_mb} MB (limit {limit_mb} MB)")]
    TooLarge { size_mb: u64, limit_mb: u32 },
    #[error("failed to save PDF: {0}")]
    Io(#[from] std::io::Error),
    #[error("text extraction failed: {0}")]
    Extract(String),
}

/// Topic search against an external paper repository
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// At most `max_results` papers, newest submission first.
    async fn search(&self, topic: &str, max_results: usize) -> Result<Vec<Paper>, SourceError>;
}

/// Retrieves a paper's document and its plain text
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, paper: &Paper) -> Result<FetchedContent, FetchError>;
}

#[cfg(test)]
pub(crate) fn sample_paper(id: &str, title: &str) -> Paper {
    Paper {
        id: id.to_string(),
        title: title.to_string(),
        authors: vec!["Ada Lovelace".to_string(), "Alan Turing".to_string()],
        published: DateTime::parse_from_rfc3339("2024-01-02T18:00:00Z")
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        abstract_text: format!("Abstract of {}.", title),
        url: format!("http://arxiv.org/abs/{}", id),
        pdf_url: format!("http://arxiv.org/pdf/{}", id),
        categories: vec!["cs.LG".to_string()],
    }
}
