//! SSH command construction shared by rsync, journal export, explore and probe.

use super::child_command;
use crate::inventory::{Host, SshParams};
use std::time::Duration;
use tokio::process::Command;

/// Options passed to `ssh` for a host, without the target itself.
pub fn ssh_options(ssh: &SshParams) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        ssh.port.to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
    ];
    if !ssh.strict_host_key_checking {
        args.push("-o".to_string());
        args.push("StrictHostKeyChecking=no".to_string());
        args.push("-o".to_string());
        args.push("UserKnownHostsFile=/dev/null".to_string());
    }
    if let Some(gateway) = &ssh.gateway {
        args.push("-J".to_string());
        args.push(format!("{}@{}:{}", gateway.user, gateway.host, gateway.port));
    }
    args
}

/// The remote shell string handed to `rsync -e`
pub fn rsync_remote_shell(ssh: &SshParams) -> String {
    let mut shell = String::from("ssh");
    for arg in ssh_options(ssh) {
        shell.push(' ');
        shell.push_str(&arg);
    }
    shell
}

/// `ssh [opts] user@host <remote command>`
pub fn command(host: &Host, remote: &str) -> Command {
    command_with_timeout(host, remote, None)
}

pub fn command_with_timeout(
    host: &Host,
    remote: &str,
    connect_timeout: Option<Duration>,
) -> Command {
    let mut cmd = child_command("ssh");
    cmd.args(ssh_options(&host.ssh));
    if let Some(timeout) = connect_timeout {
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", timeout.as_secs().max(1)));
    }
    cmd.arg(host.ssh_target()).arg(remote);
    cmd
}

/// Quote a value for the remote POSIX shell.
///
/// Glob characters are left unquoted so the remote shell still expands them.
pub fn quote_glob(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '*' | '?' | '[' | ']' | '/' | '.' | '-' | '_' | '~' => out.push(c),
            c if c.is_ascii_alphanumeric() => out.push(c),
            c => {
                out.push('\\');
                out.push(c);
            }
        }
    }
    out
}

/// Quote a value literally for the remote POSIX shell
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Gateway;

    fn params() -> SshParams {
        SshParams {
            user: "root".to_string(),
            port: 2222,
            strict_host_key_checking: false,
            gateway: Some(Gateway {
                host: "bastion".to_string(),
                user: "jump".to_string(),
                port: 22,
            }),
        }
    }

    #[test]
    fn test_remote_shell() {
        assert_eq!(
            rsync_remote_shell(&params()),
            "ssh -p 2222 -o BatchMode=yes -o StrictHostKeyChecking=no \
             -o UserKnownHostsFile=/dev/null -J jump@bastion:22"
        );
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_glob("/var/log/nginx/*.log"), "/var/log/nginx/*.log");
        assert_eq!(quote_glob("/var/log/my app/*.log"), r"/var/log/my\ app/*.log");
        assert_eq!(quote("3 days ago"), "'3 days ago'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }
}
