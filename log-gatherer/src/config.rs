//! Configuration management for the log gatherer.
//!
//! Loads the collection configuration from a TOML file and resolves it into
//! the immutable option values handed to the planner, scheduler and archiver.

use crate::executor::RetryPolicy;
use crate::inventory::{Gateway, SshParams};
use crate::utils::{GathererError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collection: CollectionConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub log: LogConfig,

    /// Application catalog, keyed by application name
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationConfig>,

    /// Group name -> application names collected from members of that group
    #[serde(default)]
    pub node_groups: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Root directory for collected logs (`<local_storage>/<host>/<app>/...`)
    #[serde(default = "default_local_storage")]
    pub local_storage: PathBuf,

    /// Maximum concurrently running transfer jobs
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,

    /// Compress newly collected files after every sync
    #[serde(default = "default_compress")]
    pub compress: bool,

    /// Group whose applications are collected from every host
    #[serde(default = "default_universal_group")]
    pub universal_group: String,

    /// Append-only failure log (default: `<local_storage>/failures.log`)
    #[serde(default)]
    pub failure_log: Option<PathBuf>,

    /// Run-level deadline in seconds
    #[serde(default)]
    pub run_timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    #[serde(default = "default_strict_host_key_checking")]
    pub strict_host_key_checking: bool,

    /// SSH jump host used for every connection
    #[serde(default)]
    pub gateway_host: Option<String>,

    #[serde(default)]
    pub gateway_user: Option<String>,

    #[serde(default = "default_ssh_port")]
    pub gateway_port: u16,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Total number of attempts per job
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Delay between attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    #[serde(default)]
    pub retry_backoff: Backoff,

    /// Upper bound for exponential backoff in seconds
    #[serde(default = "default_retry_delay_max")]
    pub retry_delay_max: u64,

    /// Pass `-z` to rsync
    #[serde(default)]
    pub compress_in_transit: bool,

    /// Only collect data newer than this many days
    #[serde(default)]
    pub date_filter: Option<u32>,

    /// rsync `--bwlimit` in KiB/s
    #[serde(default)]
    pub bwlimit: Option<u32>,

    #[serde(default = "default_additional_flags")]
    pub additional_flags: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Remote log path glob patterns
    #[serde(default)]
    pub log_paths: Vec<String>,

    #[serde(default)]
    pub journal: JournalConfig,

    /// Per-application replacements for `[transfer]` fields
    #[serde(default)]
    pub overrides: OptionOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub mode: JournalMode,

    /// Remote journal directories copied in binary mode
    #[serde(default = "default_journal_paths")]
    pub paths: Vec<String>,

    /// systemd unit used in export mode, overriding the built-in table
    #[serde(default)]
    pub unit: Option<String>,

    /// journalctl output format used in export mode
    #[serde(default = "default_journal_format")]
    pub format: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Binary,
    Export,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

/// Per-field overrides of the global transfer options. Unset fields fall back
/// to the global value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionOverrides {
    pub timeout: Option<u64>,
    pub retry_count: Option<u32>,
    pub retry_delay: Option<u64>,
    pub retry_backoff: Option<Backoff>,
    pub retry_delay_max: Option<u64>,
    pub compress_in_transit: Option<bool>,
    pub date_filter: Option<u32>,
    pub bwlimit: Option<u32>,
    pub additional_flags: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub include: Option<Vec<String>>,
}

/// Fully resolved options for a single transfer job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub compress_in_transit: bool,
    pub date_filter: Option<u32>,
    pub bwlimit: Option<u32>,
    pub additional_flags: Vec<String>,
    pub exclude: Vec<String>,
    pub include: Vec<String>,
}

// Default values
fn default_local_storage() -> PathBuf {
    PathBuf::from("logs")
}

fn default_max_parallel_jobs() -> usize {
    5
}

fn default_compress() -> bool {
    true
}

fn default_universal_group() -> String {
    "_all_nodes".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_strict_host_key_checking() -> bool {
    true
}

fn default_timeout() -> u64 {
    300
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_retry_delay_max() -> u64 {
    300
}

fn default_additional_flags() -> Vec<String> {
    vec!["-a".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_journal_paths() -> Vec<String> {
    vec!["/var/log/journal/".to_string()]
}

fn default_journal_format() -> String {
    "short-iso".to_string()
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            local_storage: default_local_storage(),
            max_parallel_jobs: default_max_parallel_jobs(),
            compress: default_compress(),
            universal_group: default_universal_group(),
            failure_log: None,
            run_timeout: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
            strict_host_key_checking: default_strict_host_key_checking(),
            gateway_host: None,
            gateway_user: None,
            gateway_port: default_ssh_port(),
            timeout: default_timeout(),
            retry_count: default_retry_count(),
            retry_delay: default_retry_delay(),
            retry_backoff: Backoff::default(),
            retry_delay_max: default_retry_delay_max(),
            compress_in_transit: false,
            date_filter: None,
            bwlimit: None,
            additional_flags: default_additional_flags(),
            exclude: Vec::new(),
            include: Vec::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: JournalMode::default(),
            paths: default_journal_paths(),
            unit: None,
            format: default_journal_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file without validating it
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GathererError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Any validation problem is a configuration error.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(GathererError::Config(errors.join("; ")));
        }
        Ok(())
    }

    /// Validate the configuration, returning every problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.applications.is_empty() {
            errors.push("No applications defined in configuration".to_string());
        }

        if self.node_groups.is_empty() {
            errors.push("No node groups defined in configuration".to_string());
        }

        for (group, apps) in &self.node_groups {
            for app in apps {
                if !self.applications.contains_key(app) {
                    errors.push(format!(
                        "Application '{}' in group '{}' not defined in applications section",
                        app, group
                    ));
                }
            }
        }

        for (name, app) in &self.applications {
            if app.log_paths.is_empty() && !app.journal.enabled {
                errors.push(format!(
                    "Application '{}' has no log_paths and journal collection disabled",
                    name
                ));
            }
            if app.journal.enabled
                && app.journal.mode == JournalMode::Binary
                && app.journal.paths.is_empty()
            {
                errors.push(format!(
                    "Application '{}' uses binary journal mode without journal paths",
                    name
                ));
            }
            if app.overrides.retry_count == Some(0) {
                errors.push(format!("Application '{}' overrides retry_count to 0", name));
            }
            if app.overrides.timeout == Some(0) {
                errors.push(format!("Application '{}' overrides timeout to 0", name));
            }
        }

        if self.collection.max_parallel_jobs == 0 {
            errors.push("max_parallel_jobs must be at least 1".to_string());
        }
        if self.transfer.retry_count == 0 {
            errors.push("retry_count must be at least 1".to_string());
        }
        if self.transfer.timeout == 0 {
            errors.push("timeout must be at least 1 second".to_string());
        }

        errors
    }

    /// SSH parameters applied to hosts that do not set their own
    pub fn ssh_defaults(&self) -> SshParams {
        let t = &self.transfer;
        SshParams {
            user: t.ssh_user.clone(),
            port: t.ssh_port,
            strict_host_key_checking: t.strict_host_key_checking,
            gateway: t.gateway_host.as_ref().map(|host| Gateway {
                host: host.clone(),
                user: t.gateway_user.clone().unwrap_or_else(|| t.ssh_user.clone()),
                port: t.gateway_port,
            }),
        }
    }
}

impl CollectionConfig {
    pub fn failure_log_path(&self) -> PathBuf {
        self.failure_log
            .clone()
            .unwrap_or_else(|| self.local_storage.join("failures.log"))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout.map(Duration::from_secs)
    }
}

impl OptionOverrides {
    /// Resolve against the global options, field by field.
    pub fn apply(&self, global: &TransferConfig) -> TransferOptions {
        let attempts = self.retry_count.unwrap_or(global.retry_count);
        let delay = self.retry_delay.unwrap_or(global.retry_delay);
        let backoff = self.retry_backoff.unwrap_or(global.retry_backoff);
        let max_delay = self.retry_delay_max.unwrap_or(global.retry_delay_max);

        TransferOptions {
            timeout: Duration::from_secs(self.timeout.unwrap_or(global.timeout)),
            retry: RetryPolicy {
                attempts,
                delay: Duration::from_secs(delay),
                backoff,
                max_delay: Duration::from_secs(max_delay),
            },
            compress_in_transit: self
                .compress_in_transit
                .unwrap_or(global.compress_in_transit),
            date_filter: self.date_filter.or(global.date_filter),
            bwlimit: self.bwlimit.or(global.bwlimit),
            additional_flags: self
                .additional_flags
                .clone()
                .unwrap_or_else(|| global.additional_flags.clone()),
            exclude: self.exclude.clone().unwrap_or_else(|| global.exclude.clone()),
            include: self.include.clone().unwrap_or_else(|| global.include.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[collection]
local_storage = "/srv/logs"
max_parallel_jobs = 8

[transfer]
ssh_user = "collector"
timeout = 120
retry_count = 4
date_filter = 7

[applications.system]
log_paths = ["/var/log/messages", "/var/log/secure"]

[applications.nginx]
log_paths = ["/var/log/nginx/*.log"]
journal = { enabled = true, mode = "export" }

[applications.nginx.overrides]
timeout = 600
exclude = ["*.gz"]

[node_groups]
_all_nodes = ["system"]
webservers = ["nginx"]
"#;

    #[test]
    fn test_parse_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert!(config.validate().is_empty());
        assert_eq!(config.collection.max_parallel_jobs, 8);
        assert!(config.collection.compress);
        assert_eq!(config.collection.universal_group, "_all_nodes");
        assert_eq!(
            config.collection.failure_log_path(),
            PathBuf::from("/srv/logs/failures.log")
        );
        assert_eq!(config.transfer.ssh_port, 22);
        assert_eq!(config.applications["nginx"].journal.mode, JournalMode::Export);
        assert_eq!(config.applications["nginx"].journal.format, "short-iso");
    }

    #[test]
    fn test_overrides_are_per_field() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let nginx = config.applications["nginx"].overrides.apply(&config.transfer);

        assert_eq!(nginx.timeout, Duration::from_secs(600));
        assert_eq!(nginx.exclude, vec!["*.gz".to_string()]);
        // Unset fields fall back to the global value
        assert_eq!(nginx.retry.attempts, 4);
        assert_eq!(nginx.date_filter, Some(7));
        assert_eq!(nginx.additional_flags, vec!["-a".to_string()]);

        let global = OptionOverrides::default().apply(&config.transfer);
        assert_eq!(global.timeout, Duration::from_secs(120));
        assert!(global.exclude.is_empty());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let config: Config = toml::from_str(
            r#"
[transfer]
retry_count = 0

[applications.empty]

[node_groups]
web = ["nginx", "empty"]
"#,
        )
        .unwrap();

        let errors = config.validate();
        assert!(config.ensure_valid().is_err());
        assert!(errors.iter().any(|e| e.contains("'nginx' in group 'web'")));
        assert!(errors.iter().any(|e| e.contains("'empty' has no log_paths")));
        assert!(errors.iter().any(|e| e.contains("retry_count")));
    }

    #[test]
    fn test_unknown_journal_mode_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
[applications.app]
journal = { enabled = true, mode = "stream" }
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_ssh_defaults_with_gateway() {
        let config: Config = toml::from_str(
            r#"
[transfer]
ssh_user = "ops"
gateway_host = "bastion.example.org"
"#,
        )
        .unwrap();

        let ssh = config.ssh_defaults();
        assert_eq!(ssh.user, "ops");
        let gateway = ssh.gateway.unwrap();
        assert_eq!(gateway.host, "bastion.example.org");
        assert_eq!(gateway.user, "ops");
        assert_eq!(gateway.port, 22);
    }
}
