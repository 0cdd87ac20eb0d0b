//! Retrying job executor.
//!
//! Runs one transfer job through the transfer capability:
//! - enforces the per-attempt deadline
//! - classifies each attempt as success, retryable or fatal
//! - waits between attempts according to the retry policy
//! - stops retrying once the run is cancelled

pub mod classify;

use crate::config::{Backoff, TransferOptions};
use crate::planner::{JobLabel, JobSource, TransferJob};
use crate::transfer::{journal, ExportRequest, SyncRequest, TransferCapability};
use classify::Outcome;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How many attempts a job gets and how long to wait between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    /// Cap for exponential backoff
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Success,
    Failed,
    SkippedDryRun,
    /// Dropped from the queue by cancellation before it started
    NotAttempted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::SkippedDryRun => "skipped-dry-run",
            JobStatus::NotAttempted => "not-attempted",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one transfer job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub label: JobLabel,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub duration: Duration,
}

impl JobResult {
    fn new(
        label: JobLabel,
        status: JobStatus,
        attempts: u32,
        error: Option<String>,
        duration: Duration,
    ) -> Self {
        Self {
            label,
            status,
            attempts,
            error,
            duration,
        }
    }

    pub fn failed(
        label: JobLabel,
        attempts: u32,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self::new(label, JobStatus::Failed, attempts, Some(error.into()), duration)
    }

    /// A job that could not be planned
    pub fn rejected(label: JobLabel, error: impl Into<String>) -> Self {
        Self::failed(label, 0, error, Duration::ZERO)
    }

    pub fn not_attempted(label: JobLabel) -> Self {
        Self::new(
            label,
            JobStatus::NotAttempted,
            0,
            Some("run cancelled before the job started".to_string()),
            Duration::ZERO,
        )
    }

    pub fn is_failure(&self) -> bool {
        self.status == JobStatus::Failed
    }
}

/// Runs transfer jobs with retries
pub struct RetryingExecutor<C> {
    capability: Arc<C>,
    dry_run: bool,
    cancel_token: CancellationToken,
}

impl<C> Clone for RetryingExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            capability: Arc::clone(&self.capability),
            dry_run: self.dry_run,
            cancel_token: self.cancel_token.clone(),
        }
    }
}

impl<C: TransferCapability> RetryingExecutor<C> {
    /// Create a new executor (no cancellation support)
    pub fn new(capability: Arc<C>, dry_run: bool) -> Self {
        Self::with_cancel(capability, dry_run, CancellationToken::new())
    }

    /// Create a new executor that stops retrying once `cancel_token` fires
    pub fn with_cancel(capability: Arc<C>, dry_run: bool, cancel_token: CancellationToken) -> Self {
        Self {
            capability,
            dry_run,
            cancel_token,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Execute a job to completion, including all of its retries
    pub async fn execute(&self, job: &TransferJob) -> JobResult {
        let start = Instant::now();
        let label = job.label();
        let host = job.host.name.as_str();
        let app = job.application.as_str();

        if let Err(problem) = validate(job) {
            error!(host, app, "Invalid job {}: {}", job.source, problem);
            return JobResult::failed(label, 0, problem, start.elapsed());
        }

        if self.dry_run {
            info!(
                host,
                app,
                "[DRY-RUN] would collect {} into {}",
                job.source,
                job.destination.display()
            );
            return JobResult::new(label, JobStatus::SkippedDryRun, 0, None, start.elapsed());
        }

        let policy = job.options.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            info!(host, app, "Collecting {} (attempt {}/{})", job.source, attempt, policy.attempts);

            let error = match self.attempt(job).await {
                Outcome::Success => {
                    let duration = start.elapsed();
                    info!(host, app, "Collected {} in {:.2}s", job.source, duration.as_secs_f64());
                    return JobResult::new(label, JobStatus::Success, attempt, None, duration);
                }
                Outcome::Fatal(error) => {
                    error!(host, app, "Non-retryable failure for {}: {}", job.source, error);
                    return JobResult::failed(label, attempt, error, start.elapsed());
                }
                Outcome::Retryable(error) => error,
            };

            if attempt >= policy.attempts {
                error!(
                    host,
                    app,
                    "Giving up on {} after {} attempts: {}",
                    job.source,
                    attempt,
                    error
                );
                return JobResult::failed(label, attempt, error, start.elapsed());
            }

            if self.cancel_token.is_cancelled() {
                warn!(host, app, "Run cancelled, not retrying {}", job.source);
                return JobResult::failed(
                    label,
                    attempt,
                    format!("cancelled before retry: {}", error),
                    start.elapsed(),
                );
            }

            let delay = policy.delay_after(attempt);
            warn!(host, app, "Attempt {} failed: {}; retrying in {:?}", attempt, error, delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel_token.cancelled() => {
                    warn!(host, app, "Run cancelled during retry delay for {}", job.source);
                    return JobResult::failed(
                        label,
                        attempt,
                        format!("cancelled before retry: {}", error),
                        start.elapsed(),
                    );
                }
            }
        }
    }

    /// One attempt bounded by the job's timeout
    async fn attempt(&self, job: &TransferJob) -> Outcome {
        let timeout = job.options.timeout;
        match tokio::time::timeout(timeout, self.run_once(job)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Retryable(format!("timed out after {}s", timeout.as_secs())),
        }
    }

    async fn run_once(&self, job: &TransferJob) -> Outcome {
        match &job.source {
            JobSource::FileGlob { .. } | JobSource::JournalBinary { .. } => {
                let Some(request) = sync_request(job) else {
                    return Outcome::Fatal(format!("{} is not a file transfer", job.source));
                };
                match self.capability.sync(request).await {
                    Ok(output) => classify::classify(&output),
                    Err(e) => classify::classify_io_error(&e),
                }
            }
            JobSource::JournalExport { unit, since, format } => {
                let request = ExportRequest {
                    host: &job.host,
                    unit: unit.as_deref(),
                    since: since.as_deref(),
                    format,
                };
                let output = match self.capability.export_journal(request).await {
                    Ok(output) => output,
                    Err(e) => return classify::classify_io_error(&e),
                };
                match classify::classify(&output) {
                    Outcome::Success => write_export(job, format, &output.stdout).await,
                    other => other,
                }
            }
        }
    }
}

/// The copy request for a file transfer job. Journal files are always copied
/// whole, so only file globs carry the date filter.
fn sync_request(job: &TransferJob) -> Option<SyncRequest<'_>> {
    let (source, date_filter) = match &job.source {
        JobSource::FileGlob { pattern } => (pattern, job.options.date_filter),
        JobSource::JournalBinary { remote_path, .. } => (remote_path, None),
        JobSource::JournalExport { .. } => return None,
    };
    Some(SyncRequest {
        host: &job.host,
        source,
        destination: &job.destination,
        options: &job.options,
        date_filter,
    })
}

/// Shape checks shared by real and dry runs
fn validate(job: &TransferJob) -> Result<(), String> {
    let options: &TransferOptions = &job.options;
    let source_empty = match &job.source {
        JobSource::FileGlob { pattern } => pattern.trim().is_empty(),
        JobSource::JournalBinary { remote_path, .. } => remote_path.trim().is_empty(),
        JobSource::JournalExport { format, .. } => format.trim().is_empty(),
    };
    if source_empty {
        return Err(format!("empty remote source for {}", job.source.kind().as_str()));
    }
    if job.destination.as_os_str().is_empty() {
        return Err("empty destination".to_string());
    }
    if options.retry.attempts == 0 {
        return Err("retry count must be at least 1".to_string());
    }
    if options.timeout.is_zero() {
        return Err("timeout must be positive".to_string());
    }
    Ok(())
}

async fn write_export(job: &TransferJob, format: &str, content: &str) -> Outcome {
    let path = job.destination.join(journal::export_file_name(format));
    let result = async {
        tokio::fs::create_dir_all(&job.destination).await?;
        tokio::fs::write(&path, content).await
    }
    .await;

    match result {
        Ok(()) => Outcome::Success,
        Err(e) => Outcome::Fatal(format!("cannot write {}: {}", path.display(), e)),
    }
}
