//! Job planning: expands (host x application) into transfer jobs.

pub mod groups;
pub mod job;
pub mod units;

pub use groups::{resolve_groups, HostAssignment};
pub use job::{JobLabel, JobSource, SourceKind, TransferJob};

use crate::config::{ApplicationConfig, JournalMode, TransferConfig};
use crate::executor::JobResult;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Output of one planning pass
#[derive(Debug, Default)]
pub struct Plan {
    /// Jobs in host-then-application order
    pub jobs: Vec<TransferJob>,

    /// Jobs that could not be planned, recorded as failed without running
    pub rejected: Vec<JobResult>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.jobs.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.rejected.is_empty()
    }
}

/// Expand host assignments into concrete transfer jobs.
///
/// Output is deterministic for identical inputs.
pub fn plan(
    assignments: &[HostAssignment],
    catalog: &BTreeMap<String, ApplicationConfig>,
    transfer: &TransferConfig,
    local_storage: &Path,
) -> Plan {
    let mut plan = Plan::default();

    for assignment in assignments {
        let host = &assignment.host;

        for app_name in &assignment.applications {
            let Some(app) = catalog.get(app_name) else {
                // resolve_groups rejects unknown applications before planning
                warn!(host = %host.name, app = %app_name, "Application missing from catalog");
                continue;
            };

            let options = app.overrides.apply(transfer);
            let app_dir = local_storage.join(&host.name).join(app_name);

            let job = |source: JobSource, destination: PathBuf| TransferJob {
                host: host.clone(),
                application: app_name.clone(),
                source,
                destination,
                options: options.clone(),
            };

            for pattern in &app.log_paths {
                plan.jobs.push(job(
                    JobSource::FileGlob {
                        pattern: pattern.clone(),
                    },
                    app_dir.clone(),
                ));
            }

            if !app.journal.enabled {
                continue;
            }

            match app.journal.mode {
                JournalMode::Binary => {
                    for (index, remote_path) in app.journal.paths.iter().enumerate() {
                        plan.jobs.push(job(
                            JobSource::JournalBinary {
                                remote_path: remote_path.clone(),
                                index,
                            },
                            app_dir.join(format!("journal_{}", index)),
                        ));
                    }
                }
                JournalMode::Export => {
                    match units::resolve_unit(app_name, app.journal.unit.as_deref()) {
                        Some(filter) => plan.jobs.push(job(
                            JobSource::JournalExport {
                                unit: filter.into_option(),
                                since: options.date_filter.map(since_days_ago),
                                format: app.journal.format.clone(),
                            },
                            app_dir.clone(),
                        )),
                        None => {
                            let label = JobLabel {
                                host: host.name.clone(),
                                application: app_name.clone(),
                                source: "journal-export:?".to_string(),
                            };
                            let error = format!(
                                "no systemd unit known for application '{}'; set journal.unit",
                                app_name
                            );
                            warn!(host = %host.name, app = %app_name, "{}", error);
                            plan.rejected.push(JobResult::rejected(label, error));
                        }
                    }
                }
            }
        }
    }

    for job in &plan.jobs {
        debug!(host = %job.host.name, app = %job.application, source = %job.source, "Planned job");
    }

    info!(
        "Built {} transfer jobs ({} rejected) for {} hosts",
        plan.jobs.len(),
        plan.rejected.len(),
        assignments.len()
    );
    plan
}

fn since_days_ago(days: u32) -> String {
    format!("{} days ago", days)
}
