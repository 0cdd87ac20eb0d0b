//! Tracked state for incremental archiving.
//!
//! Records every file already bundled into an archive for a host, keyed by
//! its path relative to the host directory, so the next pass only archives
//! new or changed files.

use crate::fs::CollectedFile;
use crate::utils::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Serialized as `.<host>_tracked.json` in the archive directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedState {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files: BTreeMap<String, FileIdentity>,
}

/// Size and mtime; the same change heuristic rsync uses by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub size: u64,
    pub mtime: i64,
}

impl From<&CollectedFile> for FileIdentity {
    fn from(file: &CollectedFile) -> Self {
        Self {
            size: file.size,
            mtime: file.mtime,
        }
    }
}

impl TrackedState {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Load the state for `host`. A missing file is an empty state; an
    /// unreadable one is treated as empty with a warning, which costs one
    /// extra full archive instead of losing files.
    pub fn load(path: &Path, host: &str) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::new(host),
            Err(e) => {
                warn!(host, "Cannot read tracked state {}: {}; starting empty", path.display(), e);
                return Self::new(host);
            }
        };

        match serde_json::from_str::<TrackedState>(&content) {
            Ok(mut state) => {
                state.host = host.to_string();
                state
            }
            Err(e) => {
                warn!(host, "Corrupt tracked state {}: {}; starting empty", path.display(), e);
                Self::new(host)
            }
        }
    }

    /// Write to a sibling temp file and rename it over `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files that are not tracked, or whose identity changed
    pub fn untracked<'a>(&self, walked: &'a [CollectedFile]) -> Vec<&'a CollectedFile> {
        walked
            .iter()
            .filter(|file| self.files.get(&file.relative_path) != Some(&FileIdentity::from(*file)))
            .collect()
    }

    /// Union with `files`; a new identity replaces the old one for the same path
    pub fn track<'a>(&mut self, files: impl IntoIterator<Item = &'a CollectedFile>) {
        for file in files {
            self.files.insert(file.relative_path.clone(), FileIdentity::from(file));
        }
        self.updated_at = Some(Utc::now());
    }
}
