//! Append-only failure log shared by all jobs of a run.

use crate::executor::JobResult;
use crate::utils::Result;
use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One line per failed job, appended as failures happen
pub struct FailureLog {
    path: PathBuf,
    run_id: Uuid,
    lock: Mutex<()>,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>, run_id: Uuid) -> Self {
        Self {
            path: path.into(),
            run_id,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the line for a failed job. The whole line is written under the
    /// lock with a single write call.
    pub async fn record(&self, result: &JobResult) -> Result<()> {
        let line = self.format_line(result);
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn format_line(&self, result: &JobResult) -> String {
        let error = result
            .error
            .as_deref()
            .unwrap_or("unknown error")
            .split(['\n', '\r', '\t'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "{}\t{}\t{}\t{}\t{}\tattempts={}\t{}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            self.run_id,
            result.label.host,
            result.label.application,
            result.label.source,
            result.attempts,
            error
        )
    }
}
