use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("failed to read attachment {0}: {1}")]
    Attachment(String, std::io::Error),
    #[error("webhook request failed: {0}")]
    Request(reqwest::Error),
    #[error("webhook returned HTTP status {0}")]
    Status(u16),
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
    username: &'a str,
}

/// Posts alerts to a Discord-style webhook.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    url: String,
    username: String,
}

impl Notifier {
    pub fn new(url: &str, username: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(NotifyError::Client)?;
        Ok(Self {
            client,
            url: url.to_string(),
            username: username.to_string(),
        })
    }

    /// Send a plain text message as JSON.
    pub async fn send_message(&self, msg: &str) -> Result<(), NotifyError> {
        let body = WebhookMessage {
            content: msg,
            username: &self.username,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(NotifyError::Request)?;
        check_status(response.status())?;
        debug!(msg, "webhook message sent");
        Ok(())
    }

    /// Upload a file with a message as multipart form data.
    pub async fn send_file(&self, path: &Path, msg: &str) -> Result<(), NotifyError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| NotifyError::Attachment(path.display().to_string(), e))?;
        let size = data.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(NotifyError::Request)?;
        let form = Form::new()
            .text("content", msg.to_string())
            .text("username", self.username.clone())
            .part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(NotifyError::Request)?;
        check_status(response.status())?;
        info!(path = path.display().to_string(), bytes = size, "webhook file sent");
        Ok(())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), NotifyError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(NotifyError::Status(status.as_u16()))
    }
}
