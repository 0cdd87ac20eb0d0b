//! rsync-over-ssh implementation of the transfer capability.

use super::{
    child_command, journal, ssh, CommandOutput, ExportRequest, SyncRequest, TransferCapability,
};
use crate::fs::TRANSFER_SCRATCH_DIR;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    program: PathBuf,
}

impl Default for RsyncTransfer {
    fn default() -> Self {
        Self::new("rsync")
    }
}

impl RsyncTransfer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// rsync arguments for a request. In-flight files are written under
    /// `scratch` instead of next to their final name.
    ///
    /// With `files_from`, the file list is read from stdin as paths relative
    /// to the source's base directory, so the local layout matches an
    /// unfiltered transfer.
    pub fn build_args(request: &SyncRequest<'_>, scratch: &Path, files_from: bool) -> Vec<String> {
        let options = request.options;
        let mut args: Vec<String> = options.additional_flags.clone();

        if options.compress_in_transit && !args.iter().any(|a| a == "-z" || a == "--compress") {
            args.push("-z".to_string());
        }
        if let Some(limit) = options.bwlimit {
            args.push(format!("--bwlimit={}", limit));
        }
        args.push(format!("--temp-dir={}", scratch.display()));
        // rsync applies the first matching rule, so includes go first
        for pattern in &options.include {
            args.push(format!("--include={}", pattern));
        }
        for pattern in &options.exclude {
            args.push(format!("--exclude={}", pattern));
        }
        // Keeps --delete away from the scratch directory
        args.push(format!("--exclude=/{}/", TRANSFER_SCRATCH_DIR));

        args.push("-e".to_string());
        args.push(ssh::rsync_remote_shell(&request.host.ssh));

        let target = request.host.ssh_target();
        if files_from {
            args.push("--files-from=-".to_string());
            args.push(format!("{}:{}", target, source_base(request.source)));
        } else {
            args.push(format!("{}:{}", target, request.source));
        }

        let mut destination = request.destination.display().to_string();
        if !destination.ends_with('/') {
            destination.push('/');
        }
        args.push(destination);
        args
    }

    /// Remote files under `source` modified within `days`, one absolute path per line.
    async fn list_recent(request: &SyncRequest<'_>, days: u32) -> std::io::Result<CommandOutput> {
        let remote = format!(
            "find {} -type f -mtime -{}",
            ssh::quote_glob(request.source),
            days
        );
        let output = ssh::command(request.host, &remote)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(CommandOutput::from_output(output))
    }
}

/// The directory an rsync of `source` copies relative to, with a trailing `/`.
///
/// `/var/log/nginx/*.log` and `/var/log/syslog` are anchored at their parent
/// directory, `/var/log/app/` at itself.
pub fn source_base(source: &str) -> &str {
    let literal_end = source.find(['*', '?', '[']).unwrap_or(source.len());
    if literal_end == source.len() && source.ends_with('/') {
        return source;
    }
    match source[..literal_end].rfind('/') {
        Some(i) => &source[..=i],
        None => "",
    }
}

/// Turn `find` output into a `--files-from` list relative to `base`
pub fn relative_file_list(listing: &str, base: &str) -> String {
    let mut list = String::with_capacity(listing.len());
    for line in listing.lines() {
        let Some(relative) = line.strip_prefix(base) else {
            continue;
        };
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            continue;
        }
        list.push_str(relative);
        list.push('\n');
    }
    list
}

impl TransferCapability for RsyncTransfer {
    async fn sync(&self, request: SyncRequest<'_>) -> std::io::Result<CommandOutput> {
        tokio::fs::create_dir_all(request.destination).await?;
        let scratch = tokio::fs::canonicalize(request.destination)
            .await?
            .join(TRANSFER_SCRATCH_DIR);
        tokio::fs::create_dir_all(&scratch).await?;

        let mut file_list = None;
        if let Some(days) = request.date_filter {
            let listing = Self::list_recent(&request, days).await?;
            let list = relative_file_list(&listing.stdout, source_base(request.source));
            if list.is_empty() {
                if listing.success() {
                    info!(
                        host = %request.host.name,
                        "No files under {} newer than {} days",
                        request.source,
                        days
                    );
                }
                return Ok(listing);
            }
            file_list = Some(list);
        }

        let args = Self::build_args(&request, &scratch, file_list.is_some());
        debug!(host = %request.host.name, "{} {}", self.program.display(), args.join(" "));

        let mut cmd = child_command(&self.program);
        cmd.args(&args).stdout(Stdio::piped()).stderr(Stdio::piped());

        let Some(list) = file_list else {
            let output = cmd.stdin(Stdio::null()).output().await?;
            return Ok(CommandOutput::from_output(output));
        };

        let mut child = cmd.stdin(Stdio::piped()).spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                // A write error means rsync exited early; its status says why
                let _ = stdin.write_all(list.as_bytes()).await;
            });
        }
        let output = child.wait_with_output().await?;
        Ok(CommandOutput::from_output(output))
    }

    async fn export_journal(&self, request: ExportRequest<'_>) -> std::io::Result<CommandOutput> {
        journal::export(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backoff, TransferOptions};
    use crate::executor::RetryPolicy;
    use crate::inventory::{Host, SshParams};
    use std::path::Path;
    use std::time::Duration;

    fn options() -> TransferOptions {
        TransferOptions {
            timeout: Duration::from_secs(300),
            retry: RetryPolicy {
                attempts: 3,
                delay: Duration::from_secs(5),
                backoff: Backoff::Fixed,
                max_delay: Duration::from_secs(300),
            },
            compress_in_transit: true,
            date_filter: None,
            bwlimit: Some(500),
            additional_flags: vec!["-a".to_string()],
            exclude: vec!["*.gz".to_string()],
            include: vec!["keep.gz".to_string()],
        }
    }

    fn host() -> Host {
        let mut host = Host::new(
            "web01",
            SshParams {
                user: "collector".to_string(),
                port: 22,
                strict_host_key_checking: true,
                gateway: None,
            },
        );
        host.address = "10.0.0.5".to_string();
        host
    }

    fn request<'a>(
        host: &'a Host,
        options: &'a TransferOptions,
        source: &'a str,
    ) -> SyncRequest<'a> {
        SyncRequest {
            host,
            source,
            destination: Path::new("logs/web01/nginx"),
            options,
            date_filter: None,
        }
    }

    #[test]
    fn test_build_args() {
        let host = host();
        let options = options();
        let request = request(&host, &options, "/var/log/nginx/*.log");

        let scratch = Path::new("/srv/logs/web01/nginx/.rsync-tmp");
        let args = RsyncTransfer::build_args(&request, scratch, false);
        assert_eq!(
            args,
            vec![
                "-a",
                "-z",
                "--bwlimit=500",
                "--temp-dir=/srv/logs/web01/nginx/.rsync-tmp",
                "--include=keep.gz",
                "--exclude=*.gz",
                "--exclude=/.rsync-tmp/",
                "-e",
                "ssh -p 22 -o BatchMode=yes",
                "collector@10.0.0.5:/var/log/nginx/*.log",
                "logs/web01/nginx/",
            ]
        );
    }

    #[test]
    fn test_build_args_with_file_list_keeps_layout() {
        let host = host();
        let options = options();
        let request = request(&host, &options, "/var/log/journal/");

        let args = RsyncTransfer::build_args(&request, Path::new("/tmp/scratch"), true);
        let tail: Vec<_> = args.iter().rev().take(3).rev().cloned().collect();
        assert_eq!(
            tail,
            vec![
                "--files-from=-",
                "collector@10.0.0.5:/var/log/journal/",
                "logs/web01/nginx/",
            ]
        );
        assert!(!args.iter().any(|a| a == "--no-relative"));
    }

    #[test]
    fn test_source_base() {
        assert_eq!(source_base("/var/log/nginx/*.log"), "/var/log/nginx/");
        assert_eq!(source_base("/var/log/*/app.log"), "/var/log/");
        assert_eq!(source_base("/var/log/app/"), "/var/log/app/");
        assert_eq!(source_base("/var/log/syslog"), "/var/log/");
        assert_eq!(source_base("*.log"), "");
    }

    #[test]
    fn test_relative_file_list_keeps_subdirectories() {
        let listing = "/var/log/journal/A/system.journal\n\
                       /var/log/journal/B/system.journal\n\
                       /elsewhere/x.log\n";
        assert_eq!(
            relative_file_list(listing, "/var/log/journal/"),
            "A/system.journal\nB/system.journal\n"
        );
        let listing = "/var/log/app/2024/app.log\n/var/log/app/2025/app.log\n";
        assert_eq!(
            relative_file_list(listing, "/var/log/app/"),
            "2024/app.log\n2025/app.log\n"
        );
    }
}
