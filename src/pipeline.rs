//! Run orchestration
//!
//! Topics are processed one after another, papers within a topic in discovery
//! order. Per-paper failures skip the paper (it stays unmarked and is retried
//! next run), a failed topic search skips the topic, and only a store failure
//! aborts the run.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use thiserror::Error;

use crate::db::{DedupStore, StoreError};
use crate::digest::{render, DigestWriter, SummaryResult, TopicDigest};
use crate::notifier::{compose_body, compose_subject, Notifier};
use crate::papers::{ContentFetcher, Paper, PaperSource};
use crate::summarizer::Summarizer;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("dedup store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// What happened to the run's single email
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailOutcome {
    /// No new papers in any topic
    NothingToSend,
    Sent,
    /// Disabled or no recipients
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Default)]
pub struct TopicReport {
    pub topic: String,
    pub candidates: usize,
    pub duplicates: usize,
    pub stale: usize,
    pub fetch_failures: usize,
    pub results: Vec<SummaryResult>,
    pub digest: Option<PathBuf>,
    pub search_error: Option<String>,
}

impl TopicReport {
    fn new(topic: &str) -> Self {
        Self { topic: topic.to_string(), ..Default::default() }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub topics: Vec<TopicReport>,
    pub email: EmailOutcome,
    pub elapsed_secs: f64,
}

impl RunReport {
    pub fn total_processed(&self) -> usize {
        self.topics.iter().map(|t| t.results.len()).sum()
    }

    pub fn digests(&self) -> Vec<PathBuf> {
        self.topics.iter().filter_map(|t| t.digest.clone()).collect()
    }
}

pub struct Pipeline {
    store: Box<dyn DedupStore>,
    source: Box<dyn PaperSource>,
    fetcher: Box<dyn ContentFetcher>,
    summarizer: Summarizer,
    digests: DigestWriter,
    notifier: Notifier,
    max_papers_per_topic: usize,
    /// Freshness window in days, `None` to accept any submission date
    max_age_days: Option<u32>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Box<dyn DedupStore>,
        source: Box<dyn PaperSource>,
        fetcher: Box<dyn ContentFetcher>,
        summarizer: Summarizer,
        digests: DigestWriter,
        notifier: Notifier,
        max_papers_per_topic: usize,
        max_age_days: Option<u32>,
    ) -> Self {
        Self {
            store,
            source,
            fetcher,
            summarizer,
            digests,
            notifier,
            max_papers_per_topic,
            max_age_days,
        }
    }

    /// Process every topic, then send at most one email
    pub async fn run(&self, topics: &[String]) -> Result<RunReport, PipelineError> {
        let start = Instant::now();
        tracing::info!(
            topics = topics.len(),
            mode = %self.summarizer.mode(),
            "Starting run"
        );

        let mut reports = Vec::with_capacity(topics.len());
        for (i, topic) in topics.iter().enumerate() {
            tracing::info!("[{}/{}] Topic: \"{}\"", i + 1, topics.len(), topic);
            reports.push(self.process_topic(topic).await?);
        }

        let email = self.notify(&reports).await;

        let report = RunReport {
            topics: reports,
            email,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        log_summary(&report);
        Ok(report)
    }

    pub async fn process_topic(&self, topic: &str) -> Result<TopicReport, PipelineError> {
        let mut report = TopicReport::new(topic);

        let papers = match self.source.search(topic, self.max_papers_per_topic).await {
            Ok(papers) => papers,
            Err(e) => {
                tracing::warn!(topic, "Search failed, skipping topic: {}", e);
                report.search_error = Some(e.to_string());
                return Ok(report);
            }
        };
        report.candidates = papers.len();

        let cutoff = self
            .max_age_days
            .map(|days| Utc::now() - ChronoDuration::days(i64::from(days)));

        for paper in papers {
            if let Some(cutoff) = cutoff {
                if !is_fresh(&paper, cutoff) {
                    tracing::debug!(paper = %paper.id, "Outside freshness window");
                    report.stale += 1;
                    continue;
                }
            }

            if self.store.has(&paper.id)? {
                tracing::debug!(paper = %paper.id, "Already processed");
                report.duplicates += 1;
                continue;
            }

            if let Some(result) = self.process_paper(paper).await? {
                report.results.push(result);
            } else {
                report.fetch_failures += 1;
            }
        }

        if !report.results.is_empty() {
            match self.digests.write(topic, &report.results) {
                Ok(path) => report.digest = Some(path),
                Err(e) => {
                    tracing::error!(topic, "Digest not written: {}", e);
                    let digest = TopicDigest {
                        topic,
                        results: &report.results,
                        generated_at: Local::now(),
                    };
                    tracing::info!(topic, "Unsaved digest:\n{}", render(&digest));
                }
            }
        } else {
            tracing::info!(topic, "No new papers");
        }

        Ok(report)
    }

    /// `Ok(None)` when the paper's content could not be fetched
    async fn process_paper(&self, paper: Paper) -> Result<Option<SummaryResult>, PipelineError> {
        tracing::info!(paper = %paper.id, "Processing: {}", paper.title);

        let content = match self.fetcher.fetch(&paper).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(paper = %paper.id, "Fetch failed, will retry next run: {}", e);
                return Ok(None);
            }
        };

        let summaries = self.summarizer.summarize(&paper, &content.text).await;
        self.store.mark_processed(&paper.id)?;

        Ok(Some(SummaryResult {
            paper,
            summaries,
            pdf_path: content.path,
        }))
    }

    async fn notify(&self, reports: &[TopicReport]) -> EmailOutcome {
        let results: Vec<&SummaryResult> = reports.iter().flat_map(|r| r.results.iter()).collect();
        if results.is_empty() {
            return EmailOutcome::NothingToSend;
        }

        let now: DateTime<Local> = Local::now();
        let attachments: Vec<PathBuf> = reports.iter().filter_map(|r| r.digest.clone()).collect();

        match self
            .notifier
            .send(&compose_subject(now), &compose_body(&results, now), &attachments)
            .await
        {
            Ok(()) => EmailOutcome::Sent,
            Err(e) if e.is_configuration_skip() => {
                tracing::info!("Email not sent: {}", e);
                EmailOutcome::Skipped(e.to_string())
            }
            Err(e) => {
                tracing::error!("{}", e);
                EmailOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Undated papers always pass
pub fn is_fresh(paper: &Paper, cutoff: DateTime<Utc>) -> bool {
    paper.published.map_or(true, |published| published >= cutoff)
}

fn log_summary(report: &RunReport) {
    for t in &report.topics {
        match &t.search_error {
            Some(err) => tracing::warn!("  {}: search failed ({})", t.topic, err),
            None => tracing::info!(
                "  {}: {} candidates, {} new, {} duplicates, {} stale, {} fetch failures",
                t.topic,
                t.candidates,
                t.results.len(),
                t.duplicates,
                t.stale,
                t.fetch_failures
            ),
        }
    }
    tracing::info!(
        "Run complete in {:.1}s: {} papers processed, {} digest files, email: {:?}",
        report.elapsed_secs,
        report.total_processed(),
        report.digests().len(),
        report.email
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::{AiError, TextGenerator};
    use crate::digest::DigestNaming;
    use crate::notifier::{MailTransport, NotifyError, OutgoingMail};
    use crate::papers::{sample_paper, FetchError, FetchedContent, SourceError};
    use crate::settings::EmailSettings;
    use crate::summarizer::{Language, LanguageMode};
    use crate::throttle::{DelayRange, NoDelay};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemoryStore {
        seen: Mutex<HashSet<String>>,
        marked: Mutex<Vec<String>>,
        broken: bool,
    }

    impl DedupStore for Arc<MemoryStore> {
        fn has(&self, paper_id: &str) -> Result<bool, StoreError> {
            if self.broken {
                return Err(StoreError::Poisoned);
            }
            Ok(self.seen.lock().unwrap().contains(paper_id))
        }

        fn mark_processed(&self, paper_id: &str) -> Result<(), StoreError> {
            self.seen.lock().unwrap().insert(paper_id.to_string());
            self.marked.lock().unwrap().push(paper_id.to_string());
            Ok(())
        }
    }

    struct FakeSource(HashMap<String, Vec<Paper>>);

    #[async_trait]
    impl PaperSource for FakeSource {
        async fn search(&self, topic: &str, max_results: usize) -> Result<Vec<Paper>, SourceError> {
            match self.0.get(topic) {
                Some(papers) => Ok(papers.iter().take(max_results).cloned().collect()),
                None => Err(SourceError::Status(503)),
            }
        }
    }

    #[derive(Default)]
    struct FakeFetcher {
        failing: HashSet<String>,
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContentFetcher for Arc<FakeFetcher> {
        async fn fetch(&self, paper: &Paper) -> Result<FetchedContent, FetchError> {
            self.fetched.lock().unwrap().push(paper.id.clone());
            if self.failing.contains(&paper.id) {
                return Err(FetchError::Status(404));
            }
            Ok(FetchedContent {
                text: format!("Full text of {}", paper.title),
                path: PathBuf::from(format!("papers_pdf/{}.pdf", paper.id)),
            })
        }
    }

    /// Fails for prompts mentioning any of the listed titles
    struct FakeGenerator {
        failing_titles: Vec<String>,
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(&self, _system: &str, prompt: &str) -> Result<String, AiError> {
            if self.failing_titles.iter().any(|t| prompt.contains(t.as_str())) {
                return Err(AiError::Api { status: 500, body: "boom".to_string() });
            }
            Ok("1. Background\n2. Problem".to_string())
        }
    }

    #[derive(Default)]
    struct RecordingMail(Mutex<Vec<OutgoingMail>>);

    #[async_trait]
    impl MailTransport for Arc<RecordingMail> {
        async fn deliver(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        fetcher: Arc<FakeFetcher>,
        mail: Arc<RecordingMail>,
        out: tempfile::TempDir,
        pipeline: Pipeline,
    }

    struct Setup {
        topics: HashMap<String, Vec<Paper>>,
        seen: Vec<&'static str>,
        failing_fetch: Vec<&'static str>,
        failing_titles: Vec<&'static str>,
        email_enabled: bool,
        broken_store: bool,
        max_age_days: Option<u32>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                topics: HashMap::new(),
                seen: vec![],
                failing_fetch: vec![],
                failing_titles: vec![],
                email_enabled: true,
                broken_store: false,
                max_age_days: None,
            }
        }
    }

    fn harness(setup: Setup) -> Harness {
        let store = Arc::new(MemoryStore {
            seen: Mutex::new(setup.seen.iter().map(|s| s.to_string()).collect()),
            marked: Mutex::new(Vec::new()),
            broken: setup.broken_store,
        });
        let fetcher = Arc::new(FakeFetcher {
            failing: setup.failing_fetch.iter().map(|s| s.to_string()).collect(),
            fetched: Mutex::new(Vec::new()),
        });
        let mail = Arc::new(RecordingMail::default());
        let out = tempfile::tempdir().unwrap();

        let summarizer = Summarizer::new(
            Arc::new(FakeGenerator {
                failing_titles: setup.failing_titles.iter().map(|s| s.to_string()).collect(),
            }),
            Arc::new(NoDelay),
            DelayRange::zero(),
            LanguageMode::Single(Language::English),
        );
        let notifier = Notifier::new(
            EmailSettings {
                enabled: setup.email_enabled,
                sender_name: None,
                sender: Some("bot@example.com".to_string()),
                password: Some("pw".to_string()),
                receivers: vec!["me@example.com".to_string()],
                smtp_server: "smtp.example.com".to_string(),
                smtp_port: 587,
            },
            Box::new(mail.clone()),
        );

        let pipeline = Pipeline::new(
            Box::new(store.clone()),
            Box::new(FakeSource(setup.topics)),
            Box::new(fetcher.clone()),
            summarizer,
            DigestWriter::new(out.path(), DigestNaming::Timestamped),
            notifier,
            30,
            setup.max_age_days,
        );

        Harness { store, fetcher, mail, out, pipeline }
    }

    fn topic(name: &str, papers: &[(&str, &str)]) -> (String, Vec<Paper>) {
        (
            name.to_string(),
            papers.iter().map(|(id, title)| sample_paper(id, title)).collect(),
        )
    }

    #[tokio::test]
    async fn test_seen_papers_are_excluded_and_order_kept() {
        let h = harness(Setup {
            topics: HashMap::from([topic(
                "diffusion models",
                &[("A", "Paper A"), ("B", "Paper B"), ("C", "Paper C")],
            )]),
            seen: vec!["B"],
            ..Default::default()
        });

        let report = h.pipeline.run(&["diffusion models".to_string()]).await.unwrap();
        let t = &report.topics[0];

        let ids: Vec<&str> = t.results.iter().map(|r| r.paper.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(t.duplicates, 1);
        assert_eq!(*h.fetcher.fetched.lock().unwrap(), vec!["A", "C"]);
        assert_eq!(*h.store.marked.lock().unwrap(), vec!["A", "C"]);

        let digest = t.digest.as_ref().unwrap();
        let text = std::fs::read_to_string(digest).unwrap();
        assert!(text.find("Paper A").unwrap() < text.find("Paper C").unwrap());
        assert!(!text.contains("Paper B"));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_paper_unmarked() {
        let h = harness(Setup {
            topics: HashMap::from([topic("llm", &[("A", "Paper A"), ("B", "Paper B")])]),
            failing_fetch: vec!["A"],
            ..Default::default()
        });

        let report = h.pipeline.run(&["llm".to_string()]).await.unwrap();
        assert_eq!(report.topics[0].fetch_failures, 1);
        assert_eq!(*h.store.marked.lock().unwrap(), vec!["B"]);
        assert_eq!(report.total_processed(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_still_marks() {
        let h = harness(Setup {
            topics: HashMap::from([topic("llm", &[("A", "Broken Paper")])]),
            failing_titles: vec!["Broken Paper"],
            ..Default::default()
        });

        let report = h.pipeline.run(&["llm".to_string()]).await.unwrap();
        let result = &report.topics[0].results[0];
        assert!(result.summaries[0].failed);
        assert!(result.summaries[0].text.starts_with("Unable to generate English summary"));
        assert_eq!(*h.store.marked.lock().unwrap(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_no_new_papers_means_no_digest_and_no_email() {
        let h = harness(Setup {
            topics: HashMap::from([topic("llm", &[("A", "Paper A")])]),
            seen: vec!["A"],
            ..Default::default()
        });

        let report = h.pipeline.run(&["llm".to_string()]).await.unwrap();
        assert_eq!(report.email, EmailOutcome::NothingToSend);
        assert!(report.digests().is_empty());
        assert!(h.store.marked.lock().unwrap().is_empty());
        assert!(h.mail.0.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(h.out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_one_email_with_one_attachment_per_topic() {
        let h = harness(Setup {
            topics: HashMap::from([
                topic("llm", &[("A", "Paper A")]),
                topic("vision", &[("B", "Paper B"), ("C", "Paper C")]),
                topic("empty", &[]),
            ]),
            ..Default::default()
        });

        let report = h
            .pipeline
            .run(&["llm".to_string(), "vision".to_string(), "empty".to_string()])
            .await
            .unwrap();

        assert_eq!(report.email, EmailOutcome::Sent);
        let sent = h.mail.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attachments.len(), 2);
        assert!(sent[0].body.contains("3 new papers found."));
        assert!(sent[0].subject.starts_with("ArXiv paper digest "));
    }

    #[tokio::test]
    async fn test_topics_with_same_sanitized_name_keep_both_digests() {
        let h = harness(Setup {
            topics: HashMap::from([
                topic("graph-nets", &[("A", "Paper A")]),
                topic("graph nets", &[("B", "Paper B")]),
            ]),
            ..Default::default()
        });

        let report = h
            .pipeline
            .run(&["graph-nets".to_string(), "graph nets".to_string()])
            .await
            .unwrap();

        let digests = report.digests();
        assert_eq!(digests.len(), 2);
        assert_ne!(digests[0], digests[1]);
        assert!(std::fs::read_to_string(&digests[0]).unwrap().contains("Paper A"));
        assert!(std::fs::read_to_string(&digests[1]).unwrap().contains("Paper B"));

        let sent = h.mail.0.lock().unwrap();
        assert_eq!(sent[0].attachments.len(), 2);
        assert_ne!(sent[0].attachments[0].filename, sent[0].attachments[1].filename);
        let bodies: Vec<String> = sent[0]
            .attachments
            .iter()
            .map(|a| String::from_utf8_lossy(&a.content).into_owned())
            .collect();
        assert!(bodies[0].contains("Paper A") && !bodies[0].contains("Paper B"));
        assert!(bodies[1].contains("Paper B") && !bodies[1].contains("Paper A"));
    }

    #[tokio::test]
    async fn test_paper_in_two_topics_is_processed_once() {
        let h = harness(Setup {
            topics: HashMap::from([
                topic("llm", &[("A", "Paper A")]),
                topic("agents", &[("A", "Paper A")]),
            ]),
            ..Default::default()
        });

        let report = h
            .pipeline
            .run(&["llm".to_string(), "agents".to_string()])
            .await
            .unwrap();
        assert_eq!(report.topics[0].results.len(), 1);
        assert_eq!(report.topics[1].duplicates, 1);
        assert_eq!(report.digests().len(), 1);
    }

    #[tokio::test]
    async fn test_search_failure_skips_topic() {
        let h = harness(Setup {
            topics: HashMap::from([topic("llm", &[("A", "Paper A")])]),
            ..Default::default()
        });

        let report = h
            .pipeline
            .run(&["unreachable".to_string(), "llm".to_string()])
            .await
            .unwrap();
        assert!(report.topics[0].search_error.is_some());
        assert_eq!(report.topics[1].results.len(), 1);
    }

    #[tokio::test]
    async fn test_email_disabled_is_not_an_error() {
        let h = harness(Setup {
            topics: HashMap::from([topic("llm", &[("A", "Paper A")])]),
            email_enabled: false,
            ..Default::default()
        });

        let report = h.pipeline.run(&["llm".to_string()]).await.unwrap();
        assert!(matches!(report.email, EmailOutcome::Skipped(_)));
        assert_eq!(report.digests().len(), 1);
        assert!(h.mail.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal() {
        let h = harness(Setup {
            topics: HashMap::from([topic("llm", &[("A", "Paper A")])]),
            broken_store: true,
            ..Default::default()
        });

        let err = h.pipeline.run(&["llm".to_string()]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Store(_)));
        assert!(h.fetcher.fetched.lock().unwrap().is_empty());
        assert!(h.mail.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_freshness_window_filters_old_papers() {
        let mut old = sample_paper("OLD", "Old Paper");
        old.published = Some(Utc::now() - ChronoDuration::days(30));
        let mut fresh = sample_paper("NEW", "New Paper");
        fresh.published = Some(Utc::now() - ChronoDuration::hours(2));
        let mut undated = sample_paper("UNDATED", "Undated Paper");
        undated.published = None;

        let h = harness(Setup {
            topics: HashMap::from([("llm".to_string(), vec![old, fresh, undated])]),
            max_age_days: Some(3),
            ..Default::default()
        });

        let report = h.pipeline.run(&["llm".to_string()]).await.unwrap();
        let ids: Vec<&str> = report.topics[0].results.iter().map(|r| r.paper.id.as_str()).collect();
        assert_eq!(ids, vec!["NEW", "UNDATED"]);
        assert_eq!(report.topics[0].stale, 1);
    }

    #[test]
    fn test_is_fresh() {
        let cutoff = Utc::now() - ChronoDuration::days(3);
        let mut paper = sample_paper("1", "T");
        paper.published = None;
        assert!(is_fresh(&paper, cutoff));
        paper.published = Some(cutoff + ChronoDuration::seconds(1));
        assert!(is_fresh(&paper, cutoff));
        paper.published = Some(cutoff - ChronoDuration::days(1));
        assert!(!is_fresh(&paper, cutoff));
    }
}
