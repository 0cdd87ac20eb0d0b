//! Transfer job types produced by the planner.

use crate::config::TransferOptions;
use crate::inventory::Host;
use std::fmt;
use std::path::PathBuf;

/// What a job collects. Each variant carries only the fields its transfer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    /// Remote files matching a glob, copied with rsync
    FileGlob { pattern: String },

    /// Raw systemd journal directory, copied into `journal_<index>`
    JournalBinary { remote_path: String, index: usize },

    /// Text export through journalctl on the remote host
    JournalExport {
        /// `None` collects the whole journal
        unit: Option<String>,
        /// journalctl `--since` expression
        since: Option<String>,
        format: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    FileGlob,
    JournalBinary,
    JournalExport,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::FileGlob => "file-glob",
            SourceKind::JournalBinary => "journal-binary",
            SourceKind::JournalExport => "journal-export",
        }
    }
}

impl JobSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            JobSource::FileGlob { .. } => SourceKind::FileGlob,
            JobSource::JournalBinary { .. } => SourceKind::JournalBinary,
            JobSource::JournalExport { .. } => SourceKind::JournalExport,
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSource::FileGlob { pattern } => write!(f, "file-glob:{}", pattern),
            JobSource::JournalBinary { remote_path, index } => {
                write!(f, "journal-binary:{} (journal_{})", remote_path, index)
            }
            JobSource::JournalExport { unit, .. } => {
                write!(f, "journal-export:{}", unit.as_deref().unwrap_or("*"))
            }
        }
    }
}

/// One unit of transfer work. Consumed once by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub host: Host,
    pub application: String,
    pub source: JobSource,
    /// `<local_storage>/<host>/<application>[/journal_<n>]`
    pub destination: PathBuf,
    pub options: TransferOptions,
}

impl TransferJob {
    pub fn label(&self) -> JobLabel {
        JobLabel {
            host: self.host.name.clone(),
            application: self.application.clone(),
            source: self.source.to_string(),
        }
    }
}

/// Identifies a job in results, logs and the failure log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobLabel {
    pub host: String,
    pub application: String,
    pub source: String,
}

impl fmt::Display for JobLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} [{}]", self.host, self.application, self.source)
    }
}
