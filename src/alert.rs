//! Operator alerts.
//!
//! Failures that an operator should hear about (dropped deliveries, failed
//! fetches) are sent through a [`Notifier`]. Callers never wait for an alert:
//! [`spawn_alert`] runs it on its own task and only logs the outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

/// Severity of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

impl AlertLevel {
    /// Embed colour used for this level
    pub fn color(self) -> u32 {
        match self {
            AlertLevel::Info => 0x00ff00,
            AlertLevel::Warning => 0xffff00,
            AlertLevel::Error => 0xff0000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
        }
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert webhook URL is not configured")]
    NotConfigured,

    #[error("failed to send alert: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("alert webhook returned status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Sink for operator alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, level: AlertLevel) -> Result<(), AlertError>;
}

/// Used when no webhook is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn notify(&self, _message: &str, _level: AlertLevel) -> Result<(), AlertError> {
        Err(AlertError::NotConfigured)
    }
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    embeds: [Embed<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
    timestamp: String,
}

/// Posts alerts as embeds to a Discord webhook
pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub const TITLE: &'static str = "System notification";
    pub const TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(webhook_url: impl Into<String>) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(Self::TIMEOUT).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, message: &str, level: AlertLevel) -> Result<(), AlertError> {
        let body = WebhookMessage {
            embeds: [Embed {
                title: Self::TITLE,
                description: message,
                color: level.color(),
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            }],
        };

        let response = self.client.post(&self.webhook_url).json(&body).send().await?;
        let status = response.status().as_u16();
        if status == 200 || status == 204 {
            debug!(level = level.as_str(), "alert delivered");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(AlertError::Rejected { status, body })
    }
}

/// Build the notifier for an optional webhook URL
pub fn notifier_for(webhook_url: Option<&str>) -> Result<Arc<dyn Notifier>, AlertError> {
    match webhook_url {
        Some(url) if !url.trim().is_empty() => Ok(Arc::new(DiscordNotifier::new(url.trim())?)),
        _ => Ok(Arc::new(DisabledNotifier)),
    }
}

/// Send an alert on a background task. Failures are logged, never returned.
pub fn spawn_alert(notifier: Arc<dyn Notifier>, message: String, level: AlertLevel) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&message, level).await {
            error!(error = %e, level = level.as_str(), "failed to send alert");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_discord_posts_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "embeds": [{
                    "title": "System notification",
                    "description": "delivery dropped",
                    "color": 0xff0000,
                }]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = DiscordNotifier::new(format!("{}/hook", server.uri())).unwrap();
        notifier
            .notify("delivery dropped", AlertLevel::Error)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_discord_accepts_ok_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let notifier = DiscordNotifier::new(server.uri()).unwrap();
        assert!(notifier.notify("hello", AlertLevel::Info).await.is_ok());
    }

    #[tokio::test]
    async fn test_discord_rejected_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad embed"))
            .mount(&server)
            .await;

        let notifier = DiscordNotifier::new(server.uri()).unwrap();
        match notifier.notify("hello", AlertLevel::Warning).await {
            Err(AlertError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad embed");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disabled_notifier() {
        let err = DisabledNotifier
            .notify("x", AlertLevel::Info)
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::NotConfigured));
    }

    #[test]
    fn test_notifier_for_blank_url_is_disabled() {
        assert!(notifier_for(None).is_ok());
        assert!(notifier_for(Some("  ")).is_ok());
    }

    #[test]
    fn test_level_colors() {
        assert_eq!(AlertLevel::Info.color(), 0x00ff00);
        assert_eq!(AlertLevel::Warning.color(), 0xffff00);
        assert_eq!(AlertLevel::Error.color(), 0xff0000);
    }
}
