//! Failure alerts.
//!
//! Sent when a backup exhausts its retries. Two transports: a JSON webhook
//! (Slack-compatible `text` field) and mail piped into a sendmail-compatible
//! binary. Either, both or neither may be configured.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AlertConfig;
use crate::utils::errors::BackupError;

/// What an alert says about a failed run.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub run_id: Uuid,
    pub host: String,
    pub source: PathBuf,
    pub attempts: u32,
    pub last_error: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(run_id: Uuid, source: PathBuf, attempts: u32, last_error: String) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            run_id,
            host,
            source,
            attempts,
            last_error,
            timestamp: Utc::now(),
        }
    }

    pub fn subject(&self) -> String {
        format!("Backup failed on {}: {}", self.host, self.source.display())
    }

    pub fn body(&self) -> String {
        format!(
            "Backup of {} failed after {} attempt(s).\n\n\
             Host:       {}\n\
             Run ID:     {}\n\
             Time:       {}\n\
             Last error: {}\n",
            self.source.display(),
            self.attempts,
            self.host,
            self.run_id,
            self.timestamp.to_rfc3339(),
            self.last_error
        )
    }
}

/// A channel that can deliver an [`Alert`].
#[allow(async_fn_in_trait)]
pub trait Notify {
    async fn notify(&self, alert: &Alert) -> Result<(), BackupError>;

    /// Whether anything would actually be sent.
    fn is_enabled(&self) -> bool {
        true
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    #[serde(flatten)]
    alert: &'a Alert,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, BackupError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackupError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }
}

impl Notify for WebhookNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), BackupError> {
        let payload = WebhookPayload {
            text: format!("{}\n{}", alert.subject(), alert.last_error),
            alert,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackupError::Alert(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BackupError::Alert(format!(
                "Webhook returned HTTP {}",
                response.status()
            )));
        }

        info!(run_id = %alert.run_id, "Webhook alert sent");
        Ok(())
    }
}

pub struct EmailNotifier {
    sendmail: PathBuf,
    from: String,
    to: String,
}

impl EmailNotifier {
    pub fn new(sendmail: PathBuf, from: String, to: String) -> Self {
        Self { sendmail, from, to }
    }

    fn message(&self, alert: &Alert) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
            header_value(&self.from),
            header_value(&self.to),
            header_value(&alert.subject()),
            alert.timestamp.to_rfc2822(),
            alert.body().replace('\n', "\r\n")
        )
    }
}

/// Line breaks would start new headers; fold them into spaces.
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

impl Notify for EmailNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), BackupError> {
        let mut child = tokio::process::Command::new(&self.sendmail)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                BackupError::Alert(format!("Failed to run {}: {}", self.sendmail.display(), e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.message(alert).as_bytes())
                .await
                .map_err(|e| BackupError::Alert(format!("Failed to write mail: {}", e)))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| BackupError::Alert(format!("sendmail did not finish: {}", e)))?;
        if !status.success() {
            return Err(BackupError::Alert(format!("sendmail exited with {}", status)));
        }

        info!(run_id = %alert.run_id, to = %self.to, "Email alert sent");
        Ok(())
    }
}

/// Every configured transport. Succeeds if at least one of them did.
#[derive(Default)]
pub struct AlertDispatcher {
    webhook: Option<WebhookNotifier>,
    email: Option<EmailNotifier>,
}

impl AlertDispatcher {
    pub fn from_config(config: &AlertConfig) -> Result<Self, BackupError> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let webhook = config
            .webhook_url
            .clone()
            .map(|url| WebhookNotifier::new(url, timeout))
            .transpose()?;

        let email = config.email_to.clone().map(|to| {
            EmailNotifier::new(config.sendmail_path.clone(), config.email_from.clone(), to)
        });

        Ok(Self { webhook, email })
    }
}

impl Notify for AlertDispatcher {
    async fn notify(&self, alert: &Alert) -> Result<(), BackupError> {
        let mut errors = Vec::new();
        let mut delivered = false;

        if let Some(webhook) = &self.webhook {
            match webhook.notify(alert).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!(error = %e, "Webhook alert failed");
                    errors.push(e.to_string());
                }
            }
        }

        if let Some(email) = &self.email {
            match email.notify(alert).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!(error = %e, "Email alert failed");
                    errors.push(e.to_string());
                }
            }
        }

        if delivered || errors.is_empty() {
            Ok(())
        } else {
            Err(BackupError::Alert(errors.join("; ")))
        }
    }

    fn is_enabled(&self) -> bool {
        self.webhook.is_some() || self.email.is_some()
    }
}
