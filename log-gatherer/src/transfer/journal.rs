//! Remote journal export through journalctl.

use super::{ssh, CommandOutput, ExportRequest};
use std::process::Stdio;

const JSON_FORMATS: &[&str] = &["json", "json-pretty", "json-sse", "json-seq"];

/// The journalctl invocation run on the remote host
pub fn remote_command(request: &ExportRequest<'_>) -> String {
    let mut cmd = format!("journalctl --no-pager -o {}", ssh::quote(request.format));
    if let Some(unit) = request.unit {
        cmd.push_str(" -u ");
        cmd.push_str(&ssh::quote(unit));
    }
    if let Some(since) = request.since {
        cmd.push_str(" --since ");
        cmd.push_str(&ssh::quote(since));
    }
    cmd
}

/// Local file name for an export in `format`
pub fn export_file_name(format: &str) -> &'static str {
    if JSON_FORMATS.contains(&format) {
        "journal.json"
    } else {
        "journal.log"
    }
}

pub async fn export(request: &ExportRequest<'_>) -> std::io::Result<CommandOutput> {
    let output = ssh::command(request.host, &remote_command(request))
        .stdin(Stdio::null())
        .output()
        .await?;
    Ok(CommandOutput::from_output(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Host, SshParams};

    #[test]
    fn test_remote_command() {
        let host = Host::new(
            "h1",
            SshParams {
                user: "root".to_string(),
                port: 22,
                strict_host_key_checking: true,
                gateway: None,
            },
        );
        let request = ExportRequest {
            host: &host,
            unit: Some("nginx.service"),
            since: Some("7 days ago"),
            format: "short-iso",
        };
        assert_eq!(
            remote_command(&request),
            "journalctl --no-pager -o 'short-iso' -u 'nginx.service' --since '7 days ago'"
        );

        let whole = ExportRequest {
            unit: None,
            since: None,
            ..request
        };
        assert_eq!(remote_command(&whole), "journalctl --no-pager -o 'short-iso'");
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name("json"), "journal.json");
        assert_eq!(export_file_name("short-iso"), "journal.log");
    }
}
