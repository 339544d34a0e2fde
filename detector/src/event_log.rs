use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Append-only operator log. Each event is one `<message>\t<timestamp>` line.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one event. Failures are reported through tracing only; the log
    /// must never take the detector down.
    pub async fn record(&self, msg: &str) {
        if let Err(e) = self.append(msg).await {
            warn!(path = self.path.display().to_string(), error = %e, "failed to write event log");
        }
    }

    async fn append(&self, msg: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = format!("{}\n", format_line(msg, chrono::Local::now()));
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

fn format_line<Tz: chrono::TimeZone>(msg: &str, at: chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{msg}\t{}", at.format("%Y-%m-%d %H:%M:%S%.6f"))
}
