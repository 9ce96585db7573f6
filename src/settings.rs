//! Runtime settings
//!
//! Read once from environment-style key/value pairs (optionally seeded from a
//! `.env` file by the binary) and handed to each component by value or
//! reference. There is no global settings instance.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::digest::DigestNaming;
use crate::summarizer::LanguageMode;
use crate::throttle::DelayRange;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{key}: invalid value {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{min_key} ({min}s) must not exceed {max_key} ({max}s)")]
    InvertedRange {
        min_key: &'static str,
        max_key: &'static str,
        min: f64,
        max: f64,
    },
}

/// Generation service settings (OpenAI-compatible chat completions)
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
}

/// SMTP notification settings
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub enabled: bool,
    /// Display name used in the From header
    pub sender_name: Option<String>,
    pub sender: Option<String>,
    pub password: Option<String>,
    pub receivers: Vec<String>,
    pub smtp_server: String,
    pub smtp_port: u16,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub llm: LlmSettings,
    pub topics: Vec<String>,
    pub max_papers_per_topic: usize,
    /// Freshness window. Only applied when `enforce_days_back` is set.
    pub days_back: u32,
    pub enforce_days_back: bool,
    pub arxiv_api_url: String,
    pub pdf_dir: PathBuf,
    pub database_file: PathBuf,
    pub output_dir: PathBuf,
    pub api_delay: DelayRange,
    pub download_delay: DelayRange,
    pub max_pdf_mb: u32,
    pub http_timeout: Duration,
    pub email: EmailSettings,
    pub language_mode: LanguageMode,
    pub digest_naming: DigestNaming,
}

fn default_topics() -> Vec<String> {
    split_list("large language models,reinforcement learning,computer vision")
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4-1106-preview".to_string()
}

fn default_arxiv_api_url() -> String {
    "http://export.arxiv.org/api/query".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm: LlmSettings {
                api_key: None,
                api_base: default_api_base(),
                model: default_model(),
                temperature: 0.3,
            },
            topics: default_topics(),
            max_papers_per_topic: 30,
            days_back: 3,
            enforce_days_back: false,
            arxiv_api_url: default_arxiv_api_url(),
            pdf_dir: PathBuf::from("papers_pdf"),
            database_file: PathBuf::from("arxiv_papers.db"),
            output_dir: PathBuf::from("summaries"),
            api_delay: DelayRange::from_secs(0.5, 1.0),
            download_delay: DelayRange::from_secs(1.0, 3.0),
            max_pdf_mb: 20,
            http_timeout: Duration::from_secs(60),
            email: EmailSettings {
                enabled: true,
                sender_name: None,
                sender: None,
                password: None,
                receivers: Vec::new(),
                smtp_server: "smtp.gmail.com".to_string(),
                smtp_port: 587,
            },
            language_mode: LanguageMode::default(),
            digest_naming: DigestNaming::default(),
        }
    }
}

impl Settings {
    /// Build settings from the process environment
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Missing or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut s = Settings::default();

        // Generation service
        s.llm.api_key = get("OPENAI_API_KEY");
        if let Some(v) = get("OPENAI_API_BASE") {
            s.llm.api_base = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            s.llm.model = v;
        }
        if let Some(v) = get("LLM_TEMPERATURE") {
            s.llm.temperature = parse_value("LLM_TEMPERATURE", &v)?;
        }

        // Search
        if let Some(v) = get("SEARCH_TOPICS") {
            s.topics = split_list(&v);
        }
        if let Some(v) = get("MAX_PAPERS_PER_TOPIC") {
            s.max_papers_per_topic = parse_value("MAX_PAPERS_PER_TOPIC", &v)?;
        }
        if let Some(v) = get("DAYS_BACK") {
            s.days_back = parse_value("DAYS_BACK", &v)?;
        }
        if let Some(v) = get("ENFORCE_DAYS_BACK") {
            s.enforce_days_back = parse_bool("ENFORCE_DAYS_BACK", &v)?;
        }
        if let Some(v) = get("ARXIV_API_URL") {
            s.arxiv_api_url = v;
        }

        // Paths
        if let Some(v) = get("PDF_DIR") {
            s.pdf_dir = expand_home(&v);
        }
        if let Some(v) = get("DATABASE_FILE") {
            s.database_file = expand_home(&v);
        }
        if let Some(v) = get("OUTPUT_DIR") {
            s.output_dir = expand_home(&v);
        }

        // Politeness delays
        s.api_delay = delay_pair(&get, "MIN_API_DELAY", "MAX_API_DELAY", s.api_delay)?;
        s.download_delay = delay_pair(
            &get,
            "MIN_DOWNLOAD_DELAY",
            "MAX_DOWNLOAD_DELAY",
            s.download_delay,
        )?;

        if let Some(v) = get("MAX_PDF_MB") {
            s.max_pdf_mb = parse_value("MAX_PDF_MB", &v)?;
        }
        if let Some(v) = get("HTTP_TIMEOUT_SECS") {
            s.http_timeout = Duration::from_secs(parse_value("HTTP_TIMEOUT_SECS", &v)?);
        }

        // Email
        if let Some(v) = get("EMAIL_ENABLED") {
            s.email.enabled = parse_bool("EMAIL_ENABLED", &v)?;
        }
        s.email.sender_name = get("EMAIL_SENDER_NAME");
        s.email.sender = get("EMAIL_SENDER");
        s.email.password = get("EMAIL_PASSWORD");
        if let Some(v) = get("EMAIL_RECEIVERS") {
            s.email.receivers = split_list(&v);
        }
        if let Some(v) = get("SMTP_SERVER") {
            s.email.smtp_server = v;
        }
        if let Some(v) = get("SMTP_PORT") {
            s.email.smtp_port = parse_value("SMTP_PORT", &v)?;
        }

        // Output shape
        if let Some(v) = get("SUMMARY_LANGUAGE") {
            s.language_mode = parse_value("SUMMARY_LANGUAGE", &v)?;
        }
        if let Some(v) = get("DIGEST_NAMING") {
            s.digest_naming = parse_value("DIGEST_NAMING", &v)?;
        }

        Ok(s)
    }

    /// Masked API key for logging (shows first 8 / last 4 chars)
    pub fn masked_api_key(&self) -> Option<String> {
        self.llm.api_key.as_deref().map(mask_secret)
    }
}

/// Split a comma-separated list, dropping blank entries
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn mask_secret(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "*".repeat(chars.len())
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, SettingsError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| SettingsError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, SettingsError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn delay_pair<G>(
    get: &G,
    min_key: &'static str,
    max_key: &'static str,
    current: DelayRange,
) -> Result<DelayRange, SettingsError>
where
    G: Fn(&str) -> Option<String>,
{
    let min = match get(min_key) {
        Some(v) => parse_seconds(min_key, &v)?,
        None => current.min.as_secs_f64(),
    };
    let max = match get(max_key) {
        Some(v) => parse_seconds(max_key, &v)?,
        None => current.max.as_secs_f64(),
    };
    if min > max {
        return Err(SettingsError::InvertedRange { min_key, max_key, min, max });
    }
    Ok(DelayRange::from_secs(min, max))
}

fn parse_seconds(key: &'static str, raw: &str) -> Result<f64, SettingsError> {
    let secs: f64 = parse_value(key, raw)?;
    if !secs.is_finite() || secs < 0.0 || Duration::try_from_secs_f64(secs).is_err() {
        return Err(SettingsError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a non-negative number of seconds".to_string(),
        });
    }
    Ok(secs)
}

/// Expand a leading `~/` against the home directory
fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(raw).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::Language;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let s = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(s.topics.len(), 3);
        assert_eq!(s.topics[0], "large language models");
        assert_eq!(s.max_papers_per_topic, 30);
        assert_eq!(s.days_back, 3);
        assert!(!s.enforce_days_back);
        assert_eq!(s.database_file, PathBuf::from("arxiv_papers.db"));
        assert_eq!(s.download_delay, DelayRange::from_secs(1.0, 3.0));
        assert_eq!(s.api_delay, DelayRange::from_secs(0.5, 1.0));
        assert!(s.email.enabled);
        assert!(s.email.receivers.is_empty());
        assert_eq!(s.email.smtp_port, 587);
        assert_eq!(s.language_mode, LanguageMode::Single(Language::Chinese));
        assert_eq!(s.digest_naming, DigestNaming::Timestamped);
    }

    #[test]
    fn test_overrides() {
        let s = Settings::from_lookup(lookup(&[
            ("SEARCH_TOPICS", " diffusion models , ,graph neural networks"),
            ("MAX_PAPERS_PER_TOPIC", "5"),
            ("EMAIL_RECEIVERS", "a@example.com, b@example.com"),
            ("EMAIL_ENABLED", "TRUE"),
            ("SMTP_PORT", "465"),
            ("MIN_DOWNLOAD_DELAY", "0"),
            ("MAX_DOWNLOAD_DELAY", "0.25"),
            ("SUMMARY_LANGUAGE", "bilingual"),
            ("DIGEST_NAMING", "daily"),
            ("OUTPUT_DIR", "out/digests"),
        ]))
        .unwrap();

        assert_eq!(s.topics, vec!["diffusion models", "graph neural networks"]);
        assert_eq!(s.max_papers_per_topic, 5);
        assert_eq!(s.email.receivers.len(), 2);
        assert_eq!(s.email.smtp_port, 465);
        assert_eq!(s.download_delay, DelayRange::from_secs(0.0, 0.25));
        assert_eq!(
            s.language_mode,
            LanguageMode::Bilingual {
                primary: Language::Chinese,
                secondary: Language::English,
            }
        );
        assert_eq!(s.digest_naming, DigestNaming::Daily);
        assert_eq!(s.output_dir, PathBuf::from("out/digests"));
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let s = Settings::from_lookup(lookup(&[("LLM_MODEL", "   "), ("SMTP_SERVER", "")]))
            .unwrap();
        assert_eq!(s.llm.model, "gpt-4-1106-preview");
        assert_eq!(s.email.smtp_server, "smtp.gmail.com");
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = Settings::from_lookup(lookup(&[("MAX_PAPERS_PER_TOPIC", "thirty")]))
            .unwrap_err();
        assert!(err.to_string().contains("MAX_PAPERS_PER_TOPIC"));
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        let err = Settings::from_lookup(lookup(&[("EMAIL_ENABLED", "maybe")])).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: "EMAIL_ENABLED", .. }));
    }

    #[test]
    fn test_inverted_delay_range_is_rejected() {
        let err = Settings::from_lookup(lookup(&[("MIN_API_DELAY", "2"), ("MAX_API_DELAY", "1")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvertedRange { .. }));
    }

    #[test]
    fn test_negative_delay_is_rejected() {
        assert!(Settings::from_lookup(lookup(&[("MIN_API_DELAY", "-1")])).is_err());
    }

    #[test]
    fn test_unrepresentable_delay_is_rejected() {
        let err = Settings::from_lookup(lookup(&[
            ("MIN_DOWNLOAD_DELAY", "1e30"),
            ("MAX_DOWNLOAD_DELAY", "1e30"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: "MIN_DOWNLOAD_DELAY", .. }));
    }

    #[test]
    fn test_masked_api_key() {
        let s = Settings::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-abcdefghijklmnop")]))
            .unwrap();
        assert_eq!(s.masked_api_key().as_deref(), Some("sk-abcde...mnop"));

        let short = Settings::from_lookup(lookup(&[("OPENAI_API_KEY", "short")])).unwrap();
        assert_eq!(short.masked_api_key().as_deref(), Some("*****"));
    }
}
