//! Log Gatherer - Main entry point
//!
//! Collects logs from inventory hosts and archives them incrementally.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log_gatherer::collector::{Collector, CompressOutcome, SyncOptions};
use log_gatherer::inventory::{Host, Inventory};
use log_gatherer::scheduler::summary::EXIT_JOBS_FAILED;
use log_gatherer::shutdown::ShutdownCoordinator;
use log_gatherer::transfer::RsyncTransfer;
use log_gatherer::{planner, probe, utils, Config};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/config.toml")]
    config: PathBuf,

    /// Path to the Ansible-style inventory
    #[arg(short, long, value_name = "FILE", default_value = "config/hosts")]
    inventory: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect logs from every host
    Sync {
        /// Plan and validate jobs without transferring anything
        #[arg(long)]
        dry_run: bool,

        /// Do not compress newly collected files afterwards
        #[arg(long)]
        no_compress: bool,

        /// Limit the run to these hosts
        #[arg(long = "host", value_name = "HOST")]
        hosts: Vec<String>,
    },

    /// Archive files collected since the last archive
    Compress {
        /// Ignore tracked state and archive every collected file
        #[arg(long)]
        force: bool,

        #[arg(long = "host", value_name = "HOST")]
        hosts: Vec<String>,
    },

    /// List archives, newest first
    Archives {
        #[arg(long)]
        host: Option<String>,
    },

    /// Show collected files and archives per host
    Summary,

    /// List what each log path matches on its host
    Explore,

    /// Check ping and SSH reachability of every host
    Probe,

    /// Validate configuration and inventory
    Validate,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting log-gatherer v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );

    if let Command::Validate = args.command {
        return validate(&config, &args.inventory);
    }

    config.ensure_valid()?;

    let shutdown = ShutdownCoordinator::new();
    let hosts = match &args.command {
        Command::Sync { hosts, .. } => load_hosts(&config, &args.inventory, hosts)?,
        Command::Explore | Command::Probe => load_hosts(&config, &args.inventory, &[])?,
        _ => Vec::new(),
    };
    let run_timeout = config.collection.run_timeout();
    let collector = Collector::new(
        config,
        hosts,
        Arc::new(RsyncTransfer::default()),
        shutdown.token(),
    );

    match args.command {
        Command::Sync {
            dry_run,
            no_compress,
            ..
        } => {
            shutdown.spawn_watchers(run_timeout);
            let report = collector.sync(SyncOptions { dry_run, no_compress }).await?;
            shutdown.cancel();

            println!("Run {}: {}", report.run_id, report.summary);
            for result in report.summary.failures() {
                println!(
                    "  FAILED {} after {} attempts: {}",
                    result.label,
                    result.attempts,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            let archive_errors = print_compress(&report.archives);

            let code = report.summary.exit_code();
            if code == 0 && archive_errors > 0 {
                return Ok(ExitCode::from(EXIT_JOBS_FAILED));
            }
            Ok(ExitCode::from(code))
        }
        Command::Compress { force, hosts } => {
            let outcomes = collector.compress(&hosts, force).await?;
            if outcomes.is_empty() {
                let storage = &collector.config().collection.local_storage;
                println!("No collected hosts under {}", storage.display());
            }
            if print_compress(&outcomes) > 0 {
                return Ok(ExitCode::from(EXIT_JOBS_FAILED));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Archives { host } => {
            let archives = collector.archiver().list_archives(host.as_deref())?;
            if archives.is_empty() {
                println!("No archives in {}", collector.archiver().archive_dir().display());
            }
            for archive in archives {
                println!(
                    "{:<48} {:>12} bytes  {}",
                    archive.file_name(),
                    archive.size,
                    archive.created.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Summary => {
            let storage = collector.storage_summary()?;
            println!(
                "{:<24} {:>8} {:>14} {:>8} {:>9} {:>14}",
                "HOST", "FILES", "BYTES", "TRACKED", "ARCHIVES", "ARCHIVE BYTES"
            );
            for host in storage {
                println!(
                    "{:<24} {:>8} {:>14} {:>8} {:>9} {:>14}",
                    host.host,
                    host.files,
                    host.bytes,
                    host.tracked,
                    host.archives,
                    host.archive_bytes
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Explore => {
            for exploration in collector.explore().await? {
                println!("== {}", exploration.label);
                match exploration.listing {
                    Ok(listing) => print!("{}", listing),
                    Err(e) => println!("   error: {}", e),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Probe => {
            let results = collector.probe().await;
            print!("{}", probe::render_probe_table(&results));
            let unreachable = results.iter().filter(|r| !r.is_reachable()).count();
            if unreachable > 0 {
                println!("{} of {} hosts unreachable", unreachable, results.len());
                return Ok(ExitCode::from(EXIT_JOBS_FAILED));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate => validate(collector.config(), &args.inventory),
    }
}

fn load_hosts(config: &Config, path: &Path, only: &[String]) -> Result<Vec<Host>> {
    let mut inventory = Inventory::from_file(path, &config.ssh_defaults())
        .with_context(|| format!("loading inventory {}", path.display()))?;
    inventory.retain_hosts(only)?;
    if inventory.is_empty() {
        anyhow::bail!("inventory {} has no hosts", path.display());
    }
    Ok(inventory.into_hosts())
}

/// Print compress outcomes and return the number of hosts that failed
fn print_compress(outcomes: &[CompressOutcome]) -> usize {
    let mut errors = 0;
    for (host, outcome) in outcomes {
        match outcome {
            Ok(Some(created)) => println!(
                "{}: archived {} files into {}",
                host,
                created.files,
                created.archive.path.display()
            ),
            Ok(None) => println!("{}: nothing new to archive", host),
            Err(e) => {
                errors += 1;
                println!("{}: compression failed: {}", host, e);
            }
        }
    }
    errors
}

fn validate(config: &Config, inventory_path: &Path) -> Result<ExitCode> {
    let mut problems = config.validate();

    match Inventory::from_file(inventory_path, &config.ssh_defaults()) {
        Ok(inventory) => {
            println!(
                "Inventory: {} hosts in {} groups",
                inventory.len(),
                inventory.groups().len()
            );
            let hosts = inventory.into_hosts();
            match planner::resolve_groups(
                &hosts,
                &config.node_groups,
                &config.applications,
                &config.collection.universal_group,
            ) {
                Ok(assignments) if problems.is_empty() => {
                    let plan = planner::plan(
                        &assignments,
                        &config.applications,
                        &config.transfer,
                        &config.collection.local_storage,
                    );
                    println!("Plan: {} jobs, {} rejected", plan.jobs.len(), plan.rejected.len());
                    for rejected in &plan.rejected {
                        problems.push(format!(
                            "{}: {}",
                            rejected.label,
                            rejected.error.as_deref().unwrap_or("rejected")
                        ));
                    }
                }
                Ok(_) => {}
                Err(e) => problems.push(e.to_string()),
            }
        }
        Err(e) => problems.push(e.to_string()),
    }

    if problems.is_empty() {
        println!("Configuration is valid");
        return Ok(ExitCode::SUCCESS);
    }
    for problem in &problems {
        println!("  - {}", problem);
    }
    Ok(ExitCode::FAILURE)
}
