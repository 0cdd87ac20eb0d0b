//! Reachability checks and remote exploration.
//!
//! Neither touches the collected tree: `probe_hosts` pings each host and
//! checks that non-interactive SSH works, `explore` lists what each
//! file-glob job would match on its host.

use crate::executor::classify;
use crate::inventory::Host;
use crate::planner::{JobLabel, JobSource, TransferJob};
use crate::transfer::{child_command, ssh, CommandOutput};
use std::fmt::Write as _;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, error};

const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub host: String,
    pub address: String,
    pub ping: bool,
    pub ssh: bool,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn is_reachable(&self) -> bool {
        self.ssh
    }
}

/// Probe every host, at most `max_parallel` at a time. Results keep the
/// order of `hosts`.
pub async fn probe_hosts(hosts: &[Host], max_parallel: usize) -> Vec<ProbeResult> {
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let mut handles = Vec::with_capacity(hosts.len());

    for host in hosts.iter().cloned() {
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            probe_host(&host).await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (host, handle) in hosts.iter().zip(handles) {
        results.push(handle.await.unwrap_or_else(|e| ProbeResult {
            host: host.name.clone(),
            address: host.address.clone(),
            ping: false,
            ssh: false,
            error: Some(format!("probe task failed: {}", e)),
        }));
    }
    results
}

async fn probe_host(host: &Host) -> ProbeResult {
    let ping = match ping_command(host).output().await {
        Ok(output) => output.status.success(),
        Err(e) => {
            debug!(host = %host.name, "ping could not run: {}", e);
            false
        }
    };

    let (ssh, error) =
        match ssh::command_with_timeout(host, "true", Some(SSH_CONNECT_TIMEOUT))
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => {
                let output = CommandOutput::from_output(output);
                if output.success() {
                    (true, None)
                } else {
                    (false, Some(classify::summarize(&output)))
                }
            }
            Err(e) => (false, Some(format!("cannot run ssh: {}", e))),
        };

    ProbeResult {
        host: host.name.clone(),
        address: host.address.clone(),
        ping,
        ssh,
        error,
    }
}

/// One ICMP echo, sent from the gateway when the host sits behind one
fn ping_command(host: &Host) -> Command {
    let ping = format!("ping -c 1 -W 2 {}", ssh::quote(&host.address));
    let mut cmd = match &host.ssh.gateway {
        Some(gateway) => {
            let mut cmd = child_command("ssh");
            cmd.args(["-p", gateway.port.to_string().as_str(), "-o", "BatchMode=yes"])
                .arg(format!("{}@{}", gateway.user, gateway.host))
                .arg(ping);
            cmd
        }
        None => {
            let mut cmd = child_command("ping");
            cmd.args(["-c", "1", "-W", "2", host.address.as_str()]);
            cmd
        }
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

pub fn render_probe_table(results: &[ProbeResult]) -> String {
    let width = results
        .iter()
        .map(|r| r.host.len())
        .max()
        .unwrap_or(0)
        .max("HOST".len());
    let mark = |ok: bool| if ok { "ok" } else { "FAIL" };

    let mut table = format!(
        "{:<width$}  {:<15}  {:<4}  {:<4}  DETAIL\n",
        "HOST", "ADDRESS", "PING", "SSH"
    );
    for r in results {
        let _ = writeln!(
            table,
            "{:<width$}  {:<15}  {:<4}  {:<4}  {}",
            r.host,
            r.address,
            mark(r.ping),
            mark(r.ssh),
            r.error.as_deref().unwrap_or("")
        );
    }
    table
}

/// Remote listing for one file-glob job
#[derive(Debug, Clone)]
pub struct Exploration {
    pub label: JobLabel,
    pub listing: std::result::Result<String, String>,
}

/// List the remote matches of every file-glob job
pub async fn explore(jobs: &[TransferJob], max_parallel: usize) -> Vec<Exploration> {
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let mut handles = Vec::new();

    for job in jobs {
        let JobSource::FileGlob { pattern } = &job.source else {
            continue;
        };
        let label = job.label();
        let host = job.host.clone();
        let remote = format!("ls -la {}", ssh::quote_glob(pattern));
        let semaphore = Arc::clone(&semaphore);

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            match ssh::command_with_timeout(&host, &remote, Some(SSH_CONNECT_TIMEOUT))
                .stdin(Stdio::null())
                .output()
                .await
            {
                Ok(output) => {
                    let output = CommandOutput::from_output(output);
                    if output.success() {
                        Ok(output.stdout)
                    } else {
                        Err(classify::summarize(&output))
                    }
                }
                Err(e) => Err(format!("cannot run ssh: {}", e)),
            }
        });
        handles.push((label, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (label, handle) in handles {
        let listing = handle.await.unwrap_or_else(|e| {
            error!("Explore task for {} failed: {}", label, e);
            Err(format!("explore task failed: {}", e))
        });
        results.push(Exploration { label, listing });
    }
    results
}
