//! Failure alerts
//!
//! One text message per failed run, posted to an enterprise-chat webhook
//! (WeCom-style robot). Delivery is best effort: the caller logs a
//! [`NotifyError`] and moves on.

use crate::pipeline::StageFailure;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Notifier errors
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Webhook rejected the message (errcode {errcode:?}): {body}")]
    Rejected { errcode: Option<i64>, body: String },

    #[error("Webhook response is not JSON: {0}")]
    Parse(String),
}

/// Rendered alert text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    content: String,
}

impl AlertMessage {
    /// Alert for a failed stage; `timestamp` is `YYYY-MM-DD HH:MM:SS` local time
    pub fn failure(title: &str, timestamp: &str, failure: &StageFailure) -> Self {
        Self {
            content: format!(
                "⚠️ {}\nTime: {}\nStage: {}\nError: {}",
                title, timestamp, failure.stage, failure.error
            ),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Webhook body: `{"msgtype":"text","text":{"content":...}}`
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "msgtype": "text",
            "text": { "content": self.content },
        })
    }
}

/// Alert sink
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError>;
}

/// Posts alerts to a webhook URL
pub struct WebhookNotifier {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        tracing::debug!(url = %self.url, "Posting alert to webhook");

        let response = self
            .http_client
            .post(&self.url)
            .json(&message.payload())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status != reqwest::StatusCode::OK {
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| NotifyError::Parse(e.to_string()))?;

        match value.get("errcode").and_then(serde_json::Value::as_i64) {
            Some(0) => {
                tracing::info!("Alert delivered");
                Ok(())
            }
            errcode => Err(NotifyError::Rejected { errcode, body }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackupError;
    use crate::pipeline::Stage;

    fn export_failure() -> StageFailure {
        StageFailure {
            stage: Stage::Export,
            error: BackupError::Command {
                command: "sudo influxd inspect export-lp".to_string(),
                exit_code: 1,
                stderr: "engine locked".to_string(),
            },
        }
    }

    #[test]
    fn test_failure_content_layout() {
        let message = AlertMessage::failure(
            "InfluxDB daily backup failed",
            "2025-09-04 01:00:07",
            &export_failure(),
        );

        assert_eq!(
            message.content(),
            "⚠️ InfluxDB daily backup failed\n\
             Time: 2025-09-04 01:00:07\n\
             Stage: EXPORT\n\
             Error: Command `sudo influxd inspect export-lp` failed with exit code 1: engine locked"
        );
    }

    #[test]
    fn test_payload_shape() {
        let message = AlertMessage::failure("t", "2025-09-04 01:00:07", &export_failure());
        let payload = message.payload();

        assert_eq!(payload["msgtype"], "text");
        assert_eq!(payload["text"]["content"], message.content());
        assert_eq!(payload.as_object().unwrap().len(), 2);
    }
}
