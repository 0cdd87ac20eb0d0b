//! Bounded worker pool for transfer jobs.
//!
//! Every job holds one pool slot from its first attempt until its last retry
//! finishes. Jobs still waiting for a slot when the run is cancelled are
//! recorded as not attempted.

pub mod failure_log;
pub mod summary;

pub use failure_log::FailureLog;
pub use summary::RunSummary;

use crate::executor::{JobResult, RetryingExecutor};
use crate::planner::TransferJob;
use crate::transfer::TransferCapability;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Scheduler<C> {
    executor: RetryingExecutor<C>,
    max_parallel_jobs: usize,
    failure_log: Option<Arc<FailureLog>>,
    cancel_token: CancellationToken,
}

impl<C: TransferCapability> Scheduler<C> {
    pub fn new(
        capability: Arc<C>,
        max_parallel_jobs: usize,
        dry_run: bool,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            executor: RetryingExecutor::with_cancel(capability, dry_run, cancel_token.clone()),
            max_parallel_jobs: max_parallel_jobs.max(1),
            failure_log: None,
            cancel_token,
        }
    }

    pub fn with_failure_log(mut self, failure_log: Arc<FailureLog>) -> Self {
        self.failure_log = Some(failure_log);
        self
    }

    /// Run every job and wait for all of them. Individual failures never
    /// stop the run.
    pub async fn run(&self, jobs: Vec<TransferJob>) -> RunSummary {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_jobs));

        info!(
            "Dispatching {} jobs ({} parallel{})",
            jobs.len(),
            self.max_parallel_jobs,
            if self.executor.is_dry_run() { ", dry-run" } else { "" }
        );

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let label = job.label();
            let executor = self.executor.clone();
            let semaphore = Arc::clone(&semaphore);
            let failure_log = self.failure_log.clone();
            let cancel_token = self.cancel_token.clone();

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(permit) = permit else {
                    warn!(
                        host = %job.host.name,
                        app = %job.application,
                        "Not attempted: {}",
                        job.source
                    );
                    return JobResult::not_attempted(job.label());
                };

                let result = executor.execute(&job).await;
                drop(permit);

                if result.is_failure() {
                    if let Some(log) = failure_log {
                        if let Err(e) = log.record(&result).await {
                            error!("Failed to append to {}: {}", log.path().display(), e);
                        }
                    }
                }
                result
            });
            handles.push((label, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (label, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("Job {} aborted: {}", label, e);
                    results.push(JobResult::failed(
                        label,
                        0,
                        format!("job task aborted: {}", e),
                        Duration::ZERO,
                    ));
                }
            }
        }

        let summary = RunSummary::from_results(results, start.elapsed());
        info!("Run finished: {}", summary);
        summary
    }
}
