//! Per-topic digest files
//!
//! One plain-text report per topic per run, listing every newly summarized
//! paper in discovery order.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::papers::Paper;
use crate::summarizer::LanguageSummary;
use crate::utils::sanitize_component;

const RULE_WIDTH: usize = 80;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("failed to write digest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How digest filenames are suffixed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestNaming {
    /// `_YYYYMMDD_HHMMSS`, unique per run
    #[default]
    Timestamped,
    /// `_YYYYMMDD`, a second run on the same day overwrites
    Daily,
}

impl FromStr for DigestNaming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timestamp" | "timestamped" => Ok(DigestNaming::Timestamped),
            "daily" | "date" => Ok(DigestNaming::Daily),
            other => Err(format!(
                "unknown digest naming '{}' (expected timestamp or daily)",
                other
            )),
        }
    }
}

/// One paper's outcome, ready for the digest
#[derive(Debug, Clone)]
pub struct SummaryResult {
    pub paper: Paper,
    pub summaries: Vec<LanguageSummary>,
    pub pdf_path: PathBuf,
}

pub struct TopicDigest<'a> {
    pub topic: &'a str,
    pub results: &'a [SummaryResult],
    pub generated_at: DateTime<Local>,
}

pub struct DigestWriter {
    output_dir: PathBuf,
    naming: DigestNaming,
    /// Paths handed out by this writer and the topic owning each. Distinct
    /// topics can sanitize to the same name; later ones get a `_2`, `_3`...
    /// suffix.
    claimed: Mutex<HashMap<PathBuf, String>>,
}

impl DigestWriter {
    pub fn new(output_dir: impl Into<PathBuf>, naming: DigestNaming) -> Self {
        Self {
            output_dir: output_dir.into(),
            naming,
            claimed: Mutex::new(HashMap::new()),
        }
    }

    /// `arxiv_{sanitized topic}_{suffix}.txt`
    pub fn filename(&self, topic: &str, now: DateTime<Local>) -> String {
        let suffix = match self.naming {
            DigestNaming::Timestamped => now.format("%Y%m%d_%H%M%S"),
            DigestNaming::Daily => now.format("%Y%m%d"),
        };
        format!("arxiv_{}_{}.txt", sanitize_component(topic), suffix)
    }

    /// First path for `topic` not already owned by another topic
    fn claim_path(&self, topic: &str, now: DateTime<Local>) -> PathBuf {
        let name = self.filename(topic, now);
        let stem = name.trim_end_matches(".txt");
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);

        let mut n = 1;
        loop {
            let candidate = if n == 1 {
                self.output_dir.join(&name)
            } else {
                self.output_dir.join(format!("{}_{}.txt", stem, n))
            };
            match claimed.get(&candidate) {
                Some(owner) if owner != topic => n += 1,
                Some(_) => return candidate,
                None => {
                    claimed.insert(candidate.clone(), topic.to_string());
                    return candidate;
                }
            }
        }
    }

    pub fn write(&self, topic: &str, results: &[SummaryResult]) -> Result<PathBuf, DigestError> {
        self.write_at(topic, results, Local::now())
    }

    pub fn write_at(
        &self,
        topic: &str,
        results: &[SummaryResult],
        now: DateTime<Local>,
    ) -> Result<PathBuf, DigestError> {
        let path = self.claim_path(topic, now);
        let io_err = |source| DigestError::Io { path: path.clone(), source };

        std::fs::create_dir_all(&self.output_dir).map_err(io_err)?;

        if path.exists() {
            tracing::warn!(path = %path.display(), "Digest already exists, overwriting");
        }

        let digest = TopicDigest { topic, results, generated_at: now };
        std::fs::write(&path, render(&digest)).map_err(io_err)?;

        tracing::info!(topic, papers = results.len(), path = %path.display(), "Wrote digest");
        Ok(path)
    }
}

pub fn render(digest: &TopicDigest<'_>) -> String {
    let mut out = String::new();
    let rule = "=".repeat(RULE_WIDTH);

    // Writing into a String cannot fail
    let _ = writeln!(out, "ArXiv Paper Summary Digest");
    let _ = writeln!(out, "Generated: {}", digest.generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Topic: {}", digest.topic);
    let _ = writeln!(out, "New papers: {}", digest.results.len());
    out.push('\n');

    for result in digest.results {
        let paper = &result.paper;
        let _ = writeln!(out, "[Title] {}", paper.title);
        let _ = writeln!(out, "[Link] {}", paper.url);
        let _ = writeln!(out, "[Published] {}", paper.published_label());
        let _ = writeln!(out, "[Authors] {}", paper.authors_label());
        let _ = writeln!(out, "[Abstract] {}", paper.abstract_text);
        out.push('\n');

        for summary in &result.summaries {
            let _ = writeln!(out, "=== Summary ({}) ===", summary.language.display_name());
            let _ = writeln!(out, "{}", summary.text);
            out.push('\n');
        }
        let _ = writeln!(out, "{}", rule);
        out.push('\n');
    }

    out
}
