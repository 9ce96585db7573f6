//! Email notification
//!
//! Sends exactly one message per run carrying every digest as an attachment.
//! Configuration and credential problems are reported as errors for the
//! caller to log; they never abort a run.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::digest::SummaryResult;
use crate::settings::EmailSettings;

/// Reply codes that mean the server rejected our credentials
const AUTH_FAILURE_CODES: [u16; 4] = [454, 530, 534, 535];

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("email notifications are disabled")]
    Disabled,
    #[error("no email recipients configured")]
    NoRecipients,
    #[error("EMAIL_SENDER is not configured")]
    MissingSender,
    #[error(
        "SMTP authentication failed: {0}. Check EMAIL_SENDER/EMAIL_PASSWORD; \
         providers like Gmail require an app password"
    )]
    Auth(String),
    #[error("SMTP delivery failed: {0}. Check SMTP_SERVER/SMTP_PORT and network access")]
    Transport(String),
    #[error("could not build email: {0}")]
    Message(String),
}

impl NotifyError {
    /// Disabled or unaddressed notification is a configuration choice, not a fault
    pub fn is_configuration_skip(&self) -> bool {
        matches!(self, NotifyError::Disabled | NotifyError::NoRecipients)
    }
}

#[derive(Debug, Clone)]
pub struct MailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// A fully assembled message, independent of the transport
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub from_name: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<MailAttachment>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), NotifyError>;
}

/// SMTP delivery. Port 465 uses implicit TLS, every other port STARTTLS.
pub struct SmtpMailer {
    server: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(settings: &EmailSettings, timeout: Duration) -> Self {
        Self {
            server: settings.smtp_server.clone(),
            port: settings.smtp_port,
            username: settings.sender.clone(),
            password: settings.password.clone(),
            timeout,
        }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let builder = if self.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.server)
        }
        .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let mut builder = builder.port(self.port).timeout(Some(self.timeout));
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        let message = build_message(mail)?;
        let transport = self.transport()?;

        transport.send(message).await.map_err(|e| {
            let code = e.status().map(u16::from);
            let detail = e.to_string();
            if is_auth_failure(code, e.is_permanent(), &detail) {
                NotifyError::Auth(detail)
            } else {
                NotifyError::Transport(detail)
            }
        })?;
        Ok(())
    }
}

fn build_message(mail: &OutgoingMail) -> Result<Message, NotifyError> {
    let address = mail
        .from
        .parse()
        .map_err(|e| NotifyError::Message(format!("sender {:?}: {}", mail.from, e)))?;
    let from = Mailbox::new(mail.from_name.clone(), address);

    let mut builder = Message::builder().from(from).subject(mail.subject.clone());
    for to in &mail.to {
        let mailbox: Mailbox = to
            .parse()
            .map_err(|e| NotifyError::Message(format!("recipient {:?}: {}", to, e)))?;
        builder = builder.to(mailbox);
    }

    let text_plain = ContentType::parse("text/plain; charset=utf-8")
        .map_err(|e| NotifyError::Message(e.to_string()))?;

    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(mail.body.clone()));
    for attachment in &mail.attachments {
        parts = parts.singlepart(
            Attachment::new(attachment.filename.clone())
                .body(attachment.content.clone(), text_plain.clone()),
        );
    }

    builder
        .multipart(parts)
        .map_err(|e| NotifyError::Message(e.to_string()))
}

/// Classify an SMTP failure as a credential problem.
///
/// A server reply code decides on its own. Without one, only a permanent
/// server rejection whose text names authentication counts; TLS and
/// connection errors that merely mention it stay transport failures.
pub fn is_auth_failure(code: Option<u16>, permanent: bool, detail: &str) -> bool {
    if let Some(code) = code {
        return AUTH_FAILURE_CODES.contains(&code);
    }
    let detail = detail.to_ascii_lowercase();
    permanent && (detail.contains("authentication") || detail.contains("username and password"))
}

pub struct Notifier {
    settings: EmailSettings,
    transport: Box<dyn MailTransport>,
}

impl Notifier {
    pub fn new(settings: EmailSettings, transport: Box<dyn MailTransport>) -> Self {
        Self { settings, transport }
    }

    /// Notifier backed by SMTP
    pub fn smtp(settings: EmailSettings, timeout: Duration) -> Self {
        let transport = SmtpMailer::new(&settings, timeout);
        Self::new(settings, Box::new(transport))
    }

    /// Send one message carrying every readable attachment
    pub async fn send(
        &self,
        subject: &str,
        body: &str,
        attachments: &[PathBuf],
    ) -> Result<(), NotifyError> {
        if !self.settings.enabled {
            return Err(NotifyError::Disabled);
        }
        if self.settings.receivers.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        let from = self.settings.sender.clone().ok_or(NotifyError::MissingSender)?;

        let mut files = Vec::with_capacity(attachments.len());
        for path in attachments {
            match std::fs::read(path) {
                Ok(content) => files.push(MailAttachment {
                    filename: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "digest.txt".to_string()),
                    content,
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Skipping attachment: {}", e);
                }
            }
        }

        let mail = OutgoingMail {
            from_name: self.settings.sender_name.clone(),
            from,
            to: self.settings.receivers.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
            attachments: files,
        };

        self.transport.deliver(&mail).await?;
        tracing::info!(
            recipients = mail.to.len(),
            attachments = mail.attachments.len(),
            "Email sent"
        );
        Ok(())
    }
}

pub fn compose_subject(now: DateTime<Local>) -> String {
    format!("ArXiv paper digest {}", now.format("%Y-%m-%d"))
}

/// Plain-text body listing every new paper across all topics
pub fn compose_body(results: &[&SummaryResult], now: DateTime<Local>) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "ArXiv paper digest ({})", now.format("%Y-%m-%d"));
    body.push('\n');
    let _ = writeln!(body, "{} new papers found.", results.len());
    body.push('\n');
    let _ = writeln!(body, "Full summaries are in the attached digest files.");
    body.push('\n');

    for result in results {
        let _ = writeln!(body, "Title: {}", result.paper.title);
        let _ = writeln!(body, "Link: {}", result.paper.url);
        let _ = writeln!(body, "{}", "-".repeat(60));
    }
    body
}
