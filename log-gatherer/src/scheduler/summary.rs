//! Aggregated outcome of a run.

use crate::executor::{JobResult, JobStatus};
use std::fmt;
use std::time::Duration;

/// Exit status for a run where at least one job failed or never started
pub const EXIT_JOBS_FAILED: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_attempted: usize,
    pub elapsed: Duration,
    /// Sorted by host, application and source
    pub results: Vec<JobResult>,
}

impl RunSummary {
    pub fn from_results(mut results: Vec<JobResult>, elapsed: Duration) -> Self {
        results.sort_by(|a, b| a.label.cmp(&b.label));
        let mut summary = Self {
            elapsed,
            ..Default::default()
        };
        for result in results {
            summary.push(result);
        }
        summary
    }

    /// Add results produced outside the pool (e.g. jobs rejected at planning)
    pub fn extend(&mut self, results: impl IntoIterator<Item = JobResult>) {
        for result in results {
            self.push(result);
        }
        self.results.sort_by(|a, b| a.label.cmp(&b.label));
    }

    fn push(&mut self, result: JobResult) {
        self.total += 1;
        match result.status {
            JobStatus::Success => self.succeeded += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::SkippedDryRun => self.skipped += 1,
            JobStatus::NotAttempted => self.not_attempted += 1,
        }
        self.results.push(result);
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| r.is_failure())
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.not_attempted == 0
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_clean() {
            0
        } else {
            EXIT_JOBS_FAILED
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} jobs: {} succeeded, {} failed, {} skipped",
            self.total, self.succeeded, self.failed, self.skipped
        )?;
        if self.not_attempted > 0 {
            write!(f, ", {} not attempted", self.not_attempted)?;
        }
        write!(f, " in {:.1}s", self.elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::JobLabel;

    fn label(host: &str) -> JobLabel {
        JobLabel {
            host: host.to_string(),
            application: "system".to_string(),
            source: "file-glob:/var/log/syslog".to_string(),
        }
    }

    #[test]
    fn test_counts_and_exit_code() {
        let results = vec![
            JobResult::failed(label("b"), 3, "refused", Duration::from_secs(2)),
            JobResult::not_attempted(label("c")),
        ];
        let mut summary = RunSummary::from_results(results, Duration::from_secs(4));
        summary.extend([JobResult::rejected(label("a"), "unknown unit")]);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.not_attempted, 1);
        assert_eq!(summary.exit_code(), EXIT_JOBS_FAILED);
        assert_eq!(summary.results[0].label.host, "a");
        assert_eq!(summary.failures().count(), 2);

        let clean = RunSummary::from_results(Vec::new(), Duration::ZERO);
        assert!(clean.is_clean());
        assert_eq!(clean.exit_code(), 0);
    }

    #[test]
    fn test_display() {
        let summary = RunSummary::from_results(
            vec![JobResult::not_attempted(label("a"))],
            Duration::from_millis(1500),
        );
        assert_eq!(
            summary.to_string(),
            "1 jobs: 0 succeeded, 0 failed, 0 skipped, 1 not attempted in 1.5s"
        );
    }
}
