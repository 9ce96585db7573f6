//! paperwatch - arXiv topic watcher
//!
//! Usage: paperwatch [OPTIONS] [COMMAND]
//!
//! Searches each configured topic, summarizes papers it has not seen before,
//! writes one digest per topic and mails them. Configuration comes from the
//! environment, optionally seeded from a `.env` file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use paperwatch_lib::ai_client::OpenAiClient;
use paperwatch_lib::db::{Database, DedupStore};
use paperwatch_lib::digest::DigestWriter;
use paperwatch_lib::notifier::Notifier;
use paperwatch_lib::papers::arxiv::ArxivClient;
use paperwatch_lib::papers::fetcher::PdfFetcher;
use paperwatch_lib::papers::PaperSource;
use paperwatch_lib::pipeline::{EmailOutcome, Pipeline};
use paperwatch_lib::settings::Settings;
use paperwatch_lib::summarizer::Summarizer;
use paperwatch_lib::throttle::{RandomDelay, Throttle};

#[derive(Parser)]
#[command(name = "paperwatch")]
#[command(
    version,
    about = "Summarize new arXiv papers per topic and mail a digest",
    long_about = None
)]
#[command(propagate_version = true)]
struct Cli {
    /// Load settings from this file instead of ./.env
    #[arg(long, global = true, value_name = "FILE")]
    env_file: Option<PathBuf>,

    /// Logging verbosity level (overridden by RUST_LOG)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Output as JSON for scripting (search / status)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over every topic (default)
    Run {
        /// Topic to search; repeat for several. Overrides SEARCH_TOPICS.
        #[arg(long = "topic", value_name = "TOPIC")]
        topics: Vec<String>,
        /// Write digests but do not send email
        #[arg(long)]
        no_email: bool,
    },
    /// List current candidates for a topic, marked NEW or SEEN. Writes nothing.
    Search {
        topic: String,
        /// Maximum number of results (default: MAX_PAPERS_PER_TOPIC)
        #[arg(long)]
        max: Option<usize>,
    },
    /// Show the dedup store location and recently processed papers
    Status {
        #[arg(long, default_value = "10")]
        recent: usize,
    },
}

/// Initialize logging on stderr. RUST_LOG takes precedence over `--log-level`.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_env(path: Option<&PathBuf>) -> Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            // A missing ./.env is fine; everything has a default or comes from the environment
            let _ = dotenvy::dotenv();
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    load_env(cli.env_file.as_ref())?;
    init_logging(&cli.log_level);

    let settings = Settings::from_env().context("Invalid configuration")?;

    match cli.command.unwrap_or(Commands::Run { topics: Vec::new(), no_email: false }) {
        Commands::Run { topics, no_email } => cmd_run(settings, topics, no_email).await,
        Commands::Search { topic, max } => cmd_search(&settings, &topic, max, cli.json).await,
        Commands::Status { recent } => cmd_status(&settings, recent, cli.json),
    }
}

async fn cmd_run(mut settings: Settings, topics: Vec<String>, no_email: bool) -> Result<()> {
    if !topics.is_empty() {
        settings.topics = topics;
    }
    if no_email {
        settings.email.enabled = false;
    }
    if settings.topics.is_empty() {
        anyhow::bail!("No topics configured (set SEARCH_TOPICS or pass --topic)");
    }

    let llm = OpenAiClient::new(&settings.llm, settings.http_timeout)
        .context("Failed to build generation client")?;
    if llm.is_available() {
        tracing::info!(
            model = %settings.llm.model,
            "Generation API key: {}",
            settings.masked_api_key().unwrap_or_default()
        );
    } else {
        tracing::warn!("OPENAI_API_KEY not set, every summary will be a failure marker");
    }

    let db = Database::new(&settings.database_file).with_context(|| {
        format!("Failed to open database {}", settings.database_file.display())
    })?;
    tracing::info!("Using database: {}", db.get_path());

    let throttle: Arc<dyn Throttle> = Arc::new(RandomDelay);
    let source = ArxivClient::new(settings.arxiv_api_url.clone(), settings.http_timeout)
        .context("Failed to build arXiv client")?;
    let fetcher = PdfFetcher::new(
        settings.pdf_dir.clone(),
        settings.download_delay,
        throttle.clone(),
        settings.max_pdf_mb,
        settings.http_timeout,
    )
    .context("Failed to build PDF fetcher")?;
    let summarizer = Summarizer::new(
        Arc::new(llm),
        throttle,
        settings.api_delay,
        settings.language_mode,
    );
    let digests = DigestWriter::new(settings.output_dir.clone(), settings.digest_naming);
    let notifier = Notifier::smtp(settings.email.clone(), settings.http_timeout);

    let pipeline = Pipeline::new(
        Box::new(db),
        Box::new(source),
        Box::new(fetcher),
        summarizer,
        digests,
        notifier,
        settings.max_papers_per_topic,
        settings.enforce_days_back.then_some(settings.days_back),
    );

    let report = pipeline.run(&settings.topics).await?;

    println!(
        "Processed {} new papers across {} topics in {:.1}s",
        report.total_processed(),
        report.topics.len(),
        report.elapsed_secs
    );
    for path in report.digests() {
        println!("  {}", path.display());
    }
    if let EmailOutcome::Failed(reason) = &report.email {
        eprintln!("Email not delivered: {}", reason);
    }
    Ok(())
}

async fn cmd_search(
    settings: &Settings,
    topic: &str,
    max: Option<usize>,
    json: bool,
) -> Result<()> {
    let db = Database::new(&settings.database_file).with_context(|| {
        format!("Failed to open database {}", settings.database_file.display())
    })?;
    let source = ArxivClient::new(settings.arxiv_api_url.clone(), settings.http_timeout)
        .context("Failed to build arXiv client")?;

    let papers = source
        .search(topic, max.unwrap_or(settings.max_papers_per_topic))
        .await
        .with_context(|| format!("Search failed for \"{}\"", topic))?;

    let mut rows = Vec::with_capacity(papers.len());
    for paper in papers {
        let seen = db.has(&paper.id)?;
        rows.push((paper, seen));
    }

    if json {
        let out: Vec<serde_json::Value> = rows
            .iter()
            .map(|(paper, seen)| {
                serde_json::json!({
                    "paper": paper,
                    "seen": seen,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No results for \"{}\"", topic);
        return Ok(());
    }
    for (paper, seen) in &rows {
        println!(
            "[{}] {}  {}  {}",
            if *seen { "SEEN" } else { "NEW " },
            paper.id,
            paper.published_label(),
            paper.title
        );
    }
    let new = rows.iter().filter(|(_, seen)| !seen).count();
    println!("{} results, {} new", rows.len(), new);
    Ok(())
}

fn cmd_status(settings: &Settings, recent: usize, json: bool) -> Result<()> {
    let db = Database::new(&settings.database_file).with_context(|| {
        format!("Failed to open database {}", settings.database_file.display())
    })?;
    let total = db.count_processed()?;
    let records = db.recent_processed(recent)?;

    if json {
        let out = serde_json::json!({
            "database": db.get_path(),
            "processed": total,
            "recent": records,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Database: {}", db.get_path());
    println!("Processed papers: {}", total);
    println!("Topics: {}", settings.topics.join(", "));
    println!("Summary language: {}", settings.language_mode);
    if !records.is_empty() {
        println!();
        println!("Most recent:");
        for r in &records {
            println!("  {}  {}", r.processed_date, r.paper_id);
        }
    }
    Ok(())
}
