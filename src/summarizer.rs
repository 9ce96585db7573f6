//! Structured paper summaries via the generation service
//!
//! One pipeline serves every language setup: a single-language summary, or a
//! bilingual pair produced by a summary call followed by a translation call.
//! Generation failures never propagate. They become a visible failure marker
//! in the summary text and the paper still counts as processed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::ai_client::TextGenerator;
use crate::papers::Paper;
use crate::throttle::{DelayRange, Throttle};
use crate::utils::truncate_chars;

/// Input budget per paper, in characters
pub const MAX_INPUT_CHARS: usize = 12_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Language {
    English,
    Chinese,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Chinese => "zh",
        }
    }

    /// Label used in digest banners
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Chinese => "中文",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            Language::English => {
                "You are a senior academic researcher. \
                 Summarize the core content of papers in English."
            }
            Language::Chinese => "你是一位资深学术研究员，需要用中文总结论文核心内容。",
        }
    }

    fn summary_prompt(&self, paper: &Paper, text: &str) -> String {
        match self {
            Language::English => format!(
                "Write a detailed English summary of the following paper. \
                 It must contain these six parts:\n\n\
                 1. Background and motivation\n\
                 2. Core problem\n\
                 3. Methods and techniques\n\
                 4. Key results\n\
                 5. Innovations and contributions\n\
                 6. Significance and outlook\n\n\
                 Paper information:\n\
                 Title: {}\n\
                 Authors: {}\n\
                 Published: {}\n\
                 Link: {}\n\n\
                 Base the summary on the following paper content:\n{}...",
                paper.title,
                paper.authors_label(),
                paper.published_label(),
                paper.url,
                text
            ),
            Language::Chinese => format!(
                "请为以下学术论文生成详细的中文摘要，必须包含以下六个部分：\n\n\
                 1. 研究背景与动机\n\
                 2. 核心问题\n\
                 3. 方法与技术\n\
                 4. 关键结果\n\
                 5. 创新与贡献\n\
                 6. 意义与展望\n\n\
                 论文信息:\n\
                 标题: {}\n\
                 作者: {}\n\
                 发表日期: {}\n\
                 ArXiv链接: {}\n\n\
                 请基于以下论文内容生成摘要:\n{}...",
                paper.title,
                paper.authors_label(),
                paper.published_label(),
                paper.url,
                text
            ),
        }
    }

    fn translation_prompt(&self, source: Language, summary: &str) -> String {
        format!(
            "Translate the following {} paper summary into {}. Keep the six-part structure, \
             numbering and technical terms. Output only the translation.\n\n{}",
            source.english_name(),
            self.english_name(),
            summary
        )
    }

    fn english_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Chinese => "Chinese",
        }
    }

    /// Placeholder stored when generation fails
    pub fn failure_marker(&self, reason: &str) -> String {
        match self {
            Language::English => format!("Unable to generate English summary: {}", reason),
            Language::Chinese => format!("无法生成中文摘要: {}", reason),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::English),
            "zh" | "cn" | "chinese" => Ok(Language::Chinese),
            other => Err(format!("unknown language '{}' (expected en or zh)", other)),
        }
    }
}

/// Which summaries to produce per paper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageMode {
    Single(Language),
    /// Summarize in `primary`, then translate that summary into `secondary`
    Bilingual { primary: Language, secondary: Language },
}

impl Default for LanguageMode {
    fn default() -> Self {
        LanguageMode::Single(Language::Chinese)
    }
}

impl FromStr for LanguageMode {
    type Err = String;

    /// `en`, `zh`, `en+zh`, `zh+en`, or `bilingual` (= `zh+en`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "bilingual" {
            return Ok(LanguageMode::Bilingual {
                primary: Language::Chinese,
                secondary: Language::English,
            });
        }
        match s.split_once('+') {
            Some((a, b)) => {
                let primary: Language = a.parse()?;
                let secondary: Language = b.parse()?;
                if primary == secondary {
                    return Err(format!(
                        "bilingual mode needs two different languages, got '{}'",
                        s
                    ));
                }
                Ok(LanguageMode::Bilingual { primary, secondary })
            }
            None => Ok(LanguageMode::Single(s.parse()?)),
        }
    }
}

impl fmt::Display for LanguageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LanguageMode::Single(lang) => write!(f, "{}", lang.code()),
            LanguageMode::Bilingual { primary, secondary } => {
                write!(f, "{}+{}", primary.code(), secondary.code())
            }
        }
    }
}

/// One generated summary
#[derive(Debug, Clone, Serialize)]
pub struct LanguageSummary {
    pub language: Language,
    pub text: String,
    /// True when `text` is a failure marker
    pub failed: bool,
}

pub struct Summarizer {
    generator: Arc<dyn TextGenerator>,
    throttle: Arc<dyn Throttle>,
    delay: DelayRange,
    mode: LanguageMode,
}

impl Summarizer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        throttle: Arc<dyn Throttle>,
        delay: DelayRange,
        mode: LanguageMode,
    ) -> Self {
        Self { generator, throttle, delay, mode }
    }

    pub fn mode(&self) -> LanguageMode {
        self.mode
    }

    /// Produce one summary per configured language. Never fails.
    pub async fn summarize(&self, paper: &Paper, text: &str) -> Vec<LanguageSummary> {
        let text = truncate_chars(text, MAX_INPUT_CHARS);

        match self.mode {
            LanguageMode::Single(lang) => vec![self.summarize_in(lang, paper, text).await],
            LanguageMode::Bilingual { primary, secondary } => {
                let first = self.summarize_in(primary, paper, text).await;
                let second = if first.failed {
                    LanguageSummary {
                        language: secondary,
                        text: secondary
                            .failure_marker("translation skipped, primary summary failed"),
                        failed: true,
                    }
                } else {
                    self.translate(primary, secondary, paper, &first.text).await
                };
                vec![first, second]
            }
        }
    }

    async fn summarize_in(&self, lang: Language, paper: &Paper, text: &str) -> LanguageSummary {
        let prompt = lang.summary_prompt(paper, text);
        self.call(lang, paper, lang.system_prompt(), &prompt, "summary").await
    }

    async fn translate(
        &self,
        from: Language,
        to: Language,
        paper: &Paper,
        summary: &str,
    ) -> LanguageSummary {
        let prompt = to.translation_prompt(from, summary);
        self.call(to, paper, to.system_prompt(), &prompt, "translation").await
    }

    async fn call(
        &self,
        lang: Language,
        paper: &Paper,
        system: &str,
        prompt: &str,
        kind: &str,
    ) -> LanguageSummary {
        self.throttle.pause(self.delay, "generation call").await;
        tracing::info!(paper = %paper.id, lang = lang.code(), "Generating {}", kind);

        match self.generator.generate(system, prompt).await {
            Ok(text) => LanguageSummary { language: lang, text, failed: false },
            Err(e) => {
                tracing::error!(paper = %paper.id, lang = lang.code(), "Generation failed: {}", e);
                LanguageSummary {
                    language: lang,
                    text: lang.failure_marker(&e.to_string()),
                    failed: true,
                }
            }
        }
    }
}
