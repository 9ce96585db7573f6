//! PDF fetcher: delay → download → save → extract
//!
//! Any failure is returned to the caller, which skips the paper without
//! marking it processed so the next run retries it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::arxiv::{download_pdf, USER_AGENT};
use super::pdf_extractor::extract_text_from_pdf;
use super::{ContentFetcher, FetchError, FetchedContent, Paper};
use crate::throttle::{DelayRange, Throttle};

pub struct PdfFetcher {
    client: Client,
    pdf_dir: PathBuf,
    delay: DelayRange,
    throttle: Arc<dyn Throttle>,
    max_pdf_mb: u32,
}

impl PdfFetcher {
    pub fn new(
        pdf_dir: impl Into<PathBuf>,
        delay: DelayRange,
        throttle: Arc<dyn Throttle>,
        max_pdf_mb: u32,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            pdf_dir: pdf_dir.into(),
            delay,
            throttle,
            max_pdf_mb,
        })
    }

    /// Local path for a paper's PDF. Old-style ids contain `/`.
    pub fn pdf_path(&self, paper_id: &str) -> PathBuf {
        self.pdf_dir.join(format!("{}.pdf", paper_id.replace('/', "_")))
    }
}

#[async_trait]
impl ContentFetcher for PdfFetcher {
    async fn fetch(&self, paper: &Paper) -> Result<FetchedContent, FetchError> {
        self.throttle.pause(self.delay, "PDF download").await;

        let bytes = download_pdf(&self.client, &paper.pdf_url, self.max_pdf_mb).await?;

        let path = self.pdf_path(&paper.id);
        save_pdf(&path, &bytes)?;
        tracing::debug!(paper = %paper.id, path = %path.display(), size = bytes.len(), "Saved PDF");

        let text = extract_blocking(bytes).await?;
        if text.is_empty() {
            tracing::warn!(
                paper = %paper.id,
                "PDF has no extractable text, summarizing from metadata only"
            );
        }

        Ok(FetchedContent { text, path })
    }
}

fn save_pdf(path: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Run extraction off the async thread. A panic inside the extractor
/// surfaces as an extraction error for this paper only.
async fn extract_blocking(bytes: Vec<u8>) -> Result<String, FetchError> {
    tokio::task::spawn_blocking(move || extract_text_from_pdf(&bytes))
        .await
        .map_err(|e| FetchError::Extract(format!("extractor aborted: {}", e)))?
        .map_err(FetchError::Extract)
}
