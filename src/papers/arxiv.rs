//! arXiv search and PDF download
//!
//! Search: Atom API at `export.arxiv.org/api/query`, newest submissions first
//! Rate limit: Polite (randomized delay before each PDF download, see `fetcher`)
//! No API key required

use super::{FetchError, Paper, PaperSource, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use reqwest::Client;
use std::sync::LazyLock;
use std::time::Duration;

pub const USER_AGENT: &str = concat!("paperwatch/", env!("CARGO_PKG_VERSION"));

static ABS_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: .../abs/2301.12345v2 and .../abs/hep-th/9901001v1
    Regex::new(r"/abs/([^\s?#]+?)/?$").expect("valid regex")
});

/// arXiv Atom search client
pub struct ArxivClient {
    client: Client,
    endpoint: String,
}

impl ArxivClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Build the query URL for a topic
    pub fn search_url(&self, topic: &str, max_results: usize) -> String {
        format!(
            "{}?search_query={}&start=0&max_results={}&sortBy=submittedDate&sortOrder=descending",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(topic),
            max_results
        )
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    async fn search(&self, topic: &str, max_results: usize) -> Result<Vec<Paper>, SourceError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(SourceError::EmptyTopic);
        }
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let url = self.search_url(topic, max_results);
        tracing::debug!(%url, "Querying arXiv");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;

        let mut papers = parse_feed(&body)?;
        papers.truncate(max_results);
        Ok(papers)
    }
}

/// Extract the short id (`2301.12345v2`) from an entry id / abs URL
pub fn short_id_from_url(url: &str) -> Option<String> {
    ABS_ID_PATTERN
        .captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// PDF URL for a short id
pub fn pdf_url_for(id: &str) -> String {
    format!("https://arxiv.org/pdf/{}", id.trim())
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

/// Fields collected while inside one `<entry>`
#[derive(Default)]
struct EntryBuilder {
    id_url: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    categories: Vec<String>,
    pdf_url: Option<String>,
}

impl EntryBuilder {
    fn apply_element(&mut self, e: &BytesStart) {
        match e.local_name().as_ref() {
            b"link" => {
                let is_pdf = attr(e, b"title").as_deref() == Some("pdf")
                    || attr(e, b"type").as_deref() == Some("application/pdf");
                if is_pdf {
                    if let Some(href) = attr(e, b"href") {
                        self.pdf_url = Some(href);
                    }
                }
            }
            b"category" => {
                if let Some(term) = attr(e, b"term").filter(|t| !t.trim().is_empty()) {
                    self.categories.push(term);
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> Result<Option<Paper>, SourceError> {
        // The API reports query errors as a single pseudo-entry
        if self.id_url.contains("/api/errors") {
            return Err(SourceError::Api(self.summary));
        }
        let Some(id) = short_id_from_url(&self.id_url) else {
            tracing::warn!(entry = %self.id_url, "Skipping feed entry without an arXiv id");
            return Ok(None);
        };

        let pdf_url = self.pdf_url.unwrap_or_else(|| pdf_url_for(&id));
        Ok(Some(Paper {
            id,
            title: self.title,
            authors: self.authors,
            published: parse_timestamp(&self.published),
            abstract_text: self.summary,
            url: self.id_url,
            pdf_url,
            categories: self.categories,
        }))
    }
}

/// Parse an arXiv Atom feed into papers, keeping feed order
pub fn parse_feed(body: &str) -> Result<Vec<Paper>, SourceError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut papers = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut in_author = false;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                match e.local_name().as_ref() {
                    b"entry" => entry = Some(EntryBuilder::default()),
                    b"author" => in_author = true,
                    _ => {
                        if let Some(b) = entry.as_mut() {
                            b.apply_element(&e);
                        }
                    }
                }
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                if let Some(b) = entry.as_mut() {
                    b.apply_element(&e);
                }
            }
            Ok(Event::Text(t)) => {
                let chunk = t
                    .unescape()
                    .map_err(|e| SourceError::Parse(e.to_string()))?;
                text.push_str(&chunk);
            }
            Ok(Event::CData(t)) => {
                text.push_str(&String::from_utf8_lossy(&t));
            }
            Ok(Event::End(e)) => {
                let value = normalize_ws(&text);
                text.clear();
                match e.local_name().as_ref() {
                    b"entry" => {
                        if let Some(done) = entry.take() {
                            if let Some(paper) = done.finish()? {
                                papers.push(paper);
                            }
                        }
                    }
                    b"author" => in_author = false,
                    name => {
                        if let Some(b) = entry.as_mut() {
                            match name {
                                b"id" => b.id_url = value,
                                b"title" => b.title = value,
                                b"summary" => b.summary = value,
                                b"published" => b.published = value,
                                b"name" if in_author && !value.is_empty() => b.authors.push(value),
                                _ => {}
                            }
                        }
                    }
                }
            }
            Err(e) => {
                return Err(SourceError::Parse(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}

/// Download a PDF body
///
/// Rejects non-PDF content types, bodies without the `%PDF` magic bytes, and
/// bodies larger than `max_mb`. Redirects are followed automatically.
pub async fn download_pdf(client: &Client, url: &str, max_mb: u32) -> Result<Vec<u8>, FetchError> {
    let max_bytes = u64::from(max_mb) * 1024 * 1024;

    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchError::Status(response.status().as_u16()));
    }

    // Check Content-Type to ensure it's a PDF
    if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
        let content_type_str = content_type.to_str().unwrap_or("");
        if !content_type_str.contains("pdf") && !content_type_str.contains("octet-stream") {
            return Err(FetchError::NotPdf(format!("content type {}", content_type_str)));
        }
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(FetchError::TooLarge { size_mb: len / 1024 / 1024, limit_mb: max_mb });
        }
    }

    let bytes = response.bytes().await?.to_vec();

    // Validate PDF magic bytes
    if bytes.len() < 4 || &bytes[0..4] != b"%PDF" {
        return Err(FetchError::NotPdf("missing %PDF header".to_string()));
    }

    if bytes.len() as u64 > max_bytes {
        return Err(FetchError::TooLarge {
            size_mb: bytes.len() as u64 / 1024 / 1024,
            limit_mb: max_mb,
        });
    }

    Ok(bytes)
}
