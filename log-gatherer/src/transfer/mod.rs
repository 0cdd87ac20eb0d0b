//! The external transfer capability.
//!
//! The executor only needs an exit status and enough stderr to decide whether
//! a failure is worth retrying; how bytes move is up to the implementation.

pub mod journal;
pub mod rsync;
pub mod ssh;

pub use rsync::RsyncTransfer;

use crate::config::TransferOptions;
use crate::inventory::Host;
use std::ffi::OsStr;
use std::future::Future;
use std::path::Path;
use tokio::process::Command;

/// Output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn from_output(output: std::process::Output) -> Self {
        Self {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// A child process that is killed when its handle is dropped.
///
/// On unix the child leads its own process group, so a terminal Ctrl+C
/// reaches only the gatherer and the running attempt can finish.
pub fn child_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd.kill_on_drop(true);
    cmd
}

/// Copy remote sources into a local directory
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    pub host: &'a Host,
    pub source: &'a str,
    pub destination: &'a Path,
    pub options: &'a TransferOptions,
    /// Only copy files modified within this many days
    pub date_filter: Option<u32>,
}

/// Export the remote journal as text
#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub host: &'a Host,
    pub unit: Option<&'a str>,
    pub since: Option<&'a str>,
    pub format: &'a str,
}

/// Runs transfers against remote hosts.
///
/// Implementations must stop the underlying work when the returned future is
/// dropped, so the executor can enforce deadlines by dropping it.
pub trait TransferCapability: Send + Sync + 'static {
    fn sync(&self, request: SyncRequest<'_>)
        -> impl Future<Output = std::io::Result<CommandOutput>> + Send;

    fn export_journal(
        &self,
        request: ExportRequest<'_>,
    ) -> impl Future<Output = std::io::Result<CommandOutput>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_child_leads_its_own_process_group() {
        let output = child_command("sh")
            .arg("-c")
            .arg("echo $$; cut -d' ' -f5 /proc/$$/stat")
            .stdin(Stdio::null())
            .output()
            .await
            .unwrap();
        let stdout = String::from_utf8(output.stdout).unwrap();
        let ids: Vec<&str> = stdout.lines().collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1], "child pid should equal its process group id");

        // Fields after the command name: state, ppid, pgrp
        let stat = std::fs::read_to_string("/proc/self/stat").unwrap();
        let own_group = stat.rsplit(')').next().unwrap().split_whitespace().nth(2);
        assert_ne!(Some(ids[1]), own_group);
    }
}
