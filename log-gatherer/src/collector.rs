//! End-to-end flows behind the CLI commands.

use crate::archive::{ArchiveTracker, CreatedArchive};
use crate::config::Config;
use crate::fs::walk_collected;
use crate::inventory::Host;
use crate::planner::{self, Plan};
use crate::probe::{self, Exploration, ProbeResult};
use crate::scheduler::{FailureLog, RunSummary, Scheduler};
use crate::transfer::TransferCapability;
use crate::utils::{GathererError, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Per-host outcome of a compress pass
pub type CompressOutcome = (String, Result<Option<CreatedArchive>>);

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    /// Skip the compress pass even when the configuration enables it
    pub no_compress: bool,
}

pub struct SyncReport {
    pub run_id: Uuid,
    pub summary: RunSummary,
    pub archives: Vec<CompressOutcome>,
}

/// Collected tree and archive state of one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStorage {
    pub host: String,
    pub files: usize,
    pub bytes: u64,
    pub tracked: usize,
    pub archives: usize,
    pub archive_bytes: u64,
}

pub struct Collector<C> {
    config: Config,
    hosts: Vec<Host>,
    capability: Arc<C>,
    archiver: ArchiveTracker,
    cancel_token: CancellationToken,
}

impl<C: TransferCapability> Collector<C> {
    pub fn new(
        config: Config,
        hosts: Vec<Host>,
        capability: Arc<C>,
        cancel_token: CancellationToken,
    ) -> Self {
        let archiver = ArchiveTracker::new(&config.collection.local_storage);
        Self {
            config,
            hosts,
            capability,
            archiver,
            cancel_token,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn archiver(&self) -> &ArchiveTracker {
        &self.archiver
    }

    /// Resolve groups and expand them into jobs. Unknown applications fail
    /// here, before anything runs.
    pub fn plan(&self) -> Result<Plan> {
        let collection = &self.config.collection;
        let assignments = planner::resolve_groups(
            &self.hosts,
            &self.config.node_groups,
            &self.config.applications,
            &collection.universal_group,
        )?;
        Ok(planner::plan(
            &assignments,
            &self.config.applications,
            &self.config.transfer,
            &collection.local_storage,
        ))
    }

    /// Collect logs from every host, then compress what was collected
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport> {
        let collection = &self.config.collection;
        let plan = self.plan()?;
        let run_id = Uuid::new_v4();

        if !options.dry_run {
            std::fs::create_dir_all(&collection.local_storage).map_err(|e| {
                GathererError::Config(format!(
                    "cannot create local storage {}: {}",
                    collection.local_storage.display(),
                    e
                ))
            })?;
        }
        info!(run_id = %run_id, "Starting collection from {} hosts", self.hosts.len());

        let mut scheduler = Scheduler::new(
            Arc::clone(&self.capability),
            collection.max_parallel_jobs,
            options.dry_run,
            self.cancel_token.clone(),
        );
        let failure_log = Arc::new(FailureLog::new(collection.failure_log_path(), run_id));
        if !options.dry_run {
            for rejected in &plan.rejected {
                if let Err(e) = failure_log.record(rejected).await {
                    error!("Failed to append to {}: {}", failure_log.path().display(), e);
                }
            }
            scheduler = scheduler.with_failure_log(Arc::clone(&failure_log));
        }

        let synced_hosts: Vec<String> = {
            let mut names: Vec<String> = plan.jobs.iter().map(|j| j.host.name.clone()).collect();
            names.dedup();
            names
        };

        let mut summary = scheduler.run(plan.jobs).await;
        summary.extend(plan.rejected);
        if summary.failed > 0 && !options.dry_run {
            warn!(
                "{} jobs failed, details in {}",
                summary.failed,
                failure_log.path().display()
            );
        }

        let mut archives = Vec::new();
        if options.dry_run || options.no_compress || !collection.compress {
            return Ok(SyncReport {
                run_id,
                summary,
                archives,
            });
        }
        if self.cancel_token.is_cancelled() {
            warn!("Run cancelled, skipping compression");
        } else {
            let collected = self.archiver.collected_hosts()?;
            for host in synced_hosts.into_iter().filter(|h| collected.contains(h)) {
                let outcome = self.archiver.compress(&host, false).await;
                if let Err(e) = &outcome {
                    error!(host = %host, "Compression failed: {}", e);
                }
                archives.push((host, outcome));
            }
        }

        Ok(SyncReport {
            run_id,
            summary,
            archives,
        })
    }

    /// Compress the given hosts, or every collected host when none are given
    pub async fn compress(&self, hosts: &[String], force: bool) -> Result<Vec<CompressOutcome>> {
        if hosts.is_empty() {
            return self.archiver.compress_all(force).await;
        }
        let mut outcomes = Vec::with_capacity(hosts.len());
        for host in hosts {
            outcomes.push((host.clone(), self.archiver.compress(host, force).await));
        }
        Ok(outcomes)
    }

    /// Collected files, tracked state and archives per host
    pub fn storage_summary(&self) -> Result<Vec<HostStorage>> {
        let local_storage = &self.config.collection.local_storage;
        let archives = self.archiver.list_archives(None)?;

        let mut summary = Vec::new();
        for host in self.archiver.collected_hosts()? {
            let files = walk_collected(&local_storage.join(&host))?;
            let state_path = self.archiver.state_path(&host);
            let tracked = crate::archive::TrackedState::load(&state_path, &host);
            let host_archives = archives.iter().filter(|a| a.host == host);

            summary.push(HostStorage {
                files: files.len(),
                bytes: files.iter().map(|f| f.size).sum(),
                tracked: tracked.len(),
                archives: host_archives.clone().count(),
                archive_bytes: host_archives.map(|a| a.size).sum(),
                host,
            });
        }
        Ok(summary)
    }

    pub async fn explore(&self) -> Result<Vec<Exploration>> {
        let plan = self.plan()?;
        Ok(probe::explore(&plan.jobs, self.config.collection.max_parallel_jobs).await)
    }

    pub async fn probe(&self) -> Vec<ProbeResult> {
        probe::probe_hosts(&self.hosts, self.config.collection.max_parallel_jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::{ok, refused, ScriptedTransfer};
    use crate::executor::JobStatus;
    use crate::inventory::Inventory;
    use crate::planner::SourceKind;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn config(storage: &Path) -> Config {
        let toml = format!(
            r#"
            [collection]
            local_storage = "{}"
            max_parallel_jobs = 2

            [transfer]
            retry_count = 3
            retry_delay = 0

            [applications.system]
            log_paths = ["/var/log/syslog", "/var/log/auth.log"]

            [applications.nginx]
            log_paths = ["/var/log/nginx/*.log"]

            [node_groups]
            _all_nodes = ["system"]
            webservers = ["nginx"]
            "#,
            storage.display()
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert!(config.validate().is_empty());
        config
    }

    fn collector(
        storage: &Path,
        capability: ScriptedTransfer,
        hosts: &str,
    ) -> Collector<ScriptedTransfer> {
        let config = config(storage);
        let inventory = Inventory::parse(hosts, &config.ssh_defaults()).unwrap();
        Collector::new(
            config,
            inventory.into_hosts(),
            Arc::new(capability),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_plan_for_webserver() {
        let temp_dir = TempDir::new().unwrap();
        let collector = collector(
            temp_dir.path(),
            ScriptedTransfer::always(ok()),
            "[webservers]\nh1\n",
        );

        let plan = collector.plan().unwrap();
        // Two system patterns plus one nginx pattern
        assert_eq!(plan.jobs.len(), 3);
        assert!(plan.jobs.iter().all(|j| j.source.kind() == SourceKind::FileGlob));
        let apps: Vec<&str> = plan.jobs.iter().map(|j| j.application.as_str()).collect();
        assert_eq!(apps, vec!["nginx", "system", "system"]);
    }

    #[tokio::test]
    async fn test_retryable_failures_exhaust_and_are_logged() {
        let temp_dir = TempDir::new().unwrap();
        let collector = collector(
            temp_dir.path(),
            ScriptedTransfer::always(refused()),
            "[databases]\nh1\n",
        );

        // h1 only gets the universal application: two jobs, both failing
        let report = collector.sync(SyncOptions::default()).await.unwrap();
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.failed, 2);
        assert!(report
            .summary
            .results
            .iter()
            .all(|r| r.status == JobStatus::Failed && r.attempts == 3));
        assert_ne!(report.summary.exit_code(), 0);
        assert!(report.archives.is_empty());

        let log = std::fs::read_to_string(temp_dir.path().join("failures.log")).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.lines().all(|l| l.contains(&report.run_id.to_string())));
    }

    #[tokio::test]
    async fn test_single_job_failure_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.applications.get_mut("system").unwrap().log_paths =
            vec!["/var/log/syslog".to_string()];
        let inventory = Inventory::parse("h1\n", &config.ssh_defaults()).unwrap();
        let capability = Arc::new(ScriptedTransfer::always(refused()));
        let collector = Collector::new(
            config,
            inventory.into_hosts(),
            Arc::clone(&capability),
            CancellationToken::new(),
        );

        let report = collector.sync(SyncOptions::default()).await.unwrap();
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.results[0].attempts, 3);
        assert_eq!(capability.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.summary.exit_code(), 2);

        let log = std::fs::read_to_string(temp_dir.path().join("failures.log")).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let storage = temp_dir.path().join("logs");
        let capability = ScriptedTransfer::always(refused());
        let collector = collector(&storage, capability, "[webservers]\nh1\nh2\n");

        let report = collector
            .sync(SyncOptions {
                dry_run: true,
                no_compress: false,
            })
            .await
            .unwrap();

        assert_eq!(report.summary.skipped, 6);
        assert_eq!(report.summary.exit_code(), 0);
        assert!(!storage.exists());
    }

    #[tokio::test]
    async fn test_sync_then_compress_collected_hosts() {
        let temp_dir = TempDir::new().unwrap();
        let collector = collector(
            temp_dir.path(),
            ScriptedTransfer::always(ok()),
            "[webservers]\nh1\nh2\n",
        );
        // Stand in for what rsync would have copied for h1
        std::fs::create_dir_all(temp_dir.path().join("h1/nginx")).unwrap();
        std::fs::write(temp_dir.path().join("h1/nginx/access.log"), b"GET /").unwrap();

        let report = collector.sync(SyncOptions::default()).await.unwrap();
        assert_eq!(report.summary.succeeded, 6);
        assert_eq!(report.archives.len(), 1);
        assert_eq!(report.archives[0].0, "h1");
        let archive_size = match &report.archives[0].1 {
            Ok(Some(created)) => created.archive.size,
            other => panic!("expected an archive, got {:?}", other),
        };

        let storage = collector.storage_summary().unwrap();
        assert_eq!(
            storage,
            vec![HostStorage {
                host: "h1".to_string(),
                files: 1,
                bytes: 5,
                tracked: 1,
                archives: 1,
                archive_bytes: archive_size,
            }]
        );

        // Nothing new since the automatic pass
        let outcomes = collector.compress(&[], false).await.unwrap();
        assert!(matches!(outcomes[0].1, Ok(None)));
    }
}
