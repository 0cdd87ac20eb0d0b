//! Incremental, timestamped archives of collected logs.
//!
//! Each pass bundles only the files of a host that are not in its tracked
//! state yet into `<host>_<YYYYMMDD_HHMMSS>.tar.gz`, then advances the state.
//! The archive is fully written and renamed into place before the state is
//! replaced, so a crash in between leads to a duplicate archive on the next
//! pass, never to a lost file.

pub mod state;

pub use state::{FileIdentity, TrackedState};

use crate::fs::{walk_collected, CollectedFile};
use crate::utils::{GathererError, Result};
use chrono::{Local, NaiveDateTime, Timelike};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Directory under the storage root that holds archives and tracked state
pub const ARCHIVE_DIR: &str = "archives";

const ARCHIVE_EXT: &str = ".tar.gz";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// An archive on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub host: String,
    pub path: PathBuf,
    pub size: u64,
    pub created: NaiveDateTime,
    /// Same-second collision counter, 0 for the first archive of a second
    pub sequence: u32,
}

impl ArchiveInfo {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Result of a compress pass that produced an archive
#[derive(Debug, Clone)]
pub struct CreatedArchive {
    pub archive: ArchiveInfo,
    pub files: usize,
    pub bytes: u64,
}

/// Builds archives and owns the per-host tracked state files.
///
/// At most one compress pass runs per host at a time.
#[derive(Clone)]
pub struct ArchiveTracker {
    local_storage: PathBuf,
    archive_dir: PathBuf,
    host_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ArchiveTracker {
    pub fn new(local_storage: impl Into<PathBuf>) -> Self {
        let local_storage = local_storage.into();
        Self {
            archive_dir: local_storage.join(ARCHIVE_DIR),
            local_storage,
            host_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn state_path(&self, host: &str) -> PathBuf {
        self.archive_dir.join(format!(".{}_tracked.json", host))
    }

    async fn host_lock(&self, host: &str) -> Arc<Mutex<()>> {
        let mut map = self.host_locks.lock().await;
        map.entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Archive the files of `host` that are not tracked yet. With `force`
    /// the tracked state is ignored and every file is archived.
    ///
    /// Returns `None` when there is nothing new.
    pub async fn compress(&self, host: &str, force: bool) -> Result<Option<CreatedArchive>> {
        let lock = self.host_lock(host).await;
        let _guard = lock.lock().await;

        let tracker = self.clone();
        let host = host.to_string();
        let now = Local::now().naive_local();
        tokio::task::spawn_blocking(move || tracker.compress_blocking(&host, force, now))
            .await
            .map_err(|e| GathererError::Archive(format!("compress task failed: {}", e)))?
    }

    /// Compress every host directory under the storage root. One host
    /// failing does not stop the others.
    pub async fn compress_all(
        &self,
        force: bool,
    ) -> Result<Vec<(String, Result<Option<CreatedArchive>>)>> {
        let hosts = self.collected_hosts()?;
        let mut outcomes = Vec::with_capacity(hosts.len());
        for host in hosts {
            let outcome = self.compress(&host, force).await;
            if let Err(e) = &outcome {
                warn!(host = %host, "Compression failed: {}", e);
            }
            outcomes.push((host, outcome));
        }
        Ok(outcomes)
    }

    /// Host directories present under the storage root, sorted
    pub fn collected_hosts(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.local_storage) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut hosts = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ARCHIVE_DIR || name.starts_with('.') {
                continue;
            }
            hosts.push(name);
        }
        hosts.sort();
        Ok(hosts)
    }

    /// Archives on disk, newest first, optionally for a single host
    pub fn list_archives(&self, host: Option<&str>) -> Result<Vec<ArchiveInfo>> {
        let entries = match std::fs::read_dir(&self.archive_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((archive_host, created, sequence)) = parse_archive_name(&name) else {
                continue;
            };
            if host.is_some_and(|h| h != archive_host) {
                continue;
            }
            archives.push(ArchiveInfo {
                host: archive_host,
                size: entry.metadata()?.len(),
                path: entry.path(),
                created,
                sequence,
            });
        }

        archives.sort_by(|a, b| {
            (b.created, b.sequence, &b.host).cmp(&(a.created, a.sequence, &a.host))
        });
        Ok(archives)
    }

    fn compress_blocking(
        &self,
        host: &str,
        force: bool,
        now: NaiveDateTime,
    ) -> Result<Option<CreatedArchive>> {
        let host_dir = self.local_storage.join(host);
        if !host_dir.is_dir() {
            return Err(GathererError::Archive(format!(
                "no collected logs for {} under {}",
                host,
                self.local_storage.display()
            )));
        }

        let walked = walk_collected(&host_dir)?;
        let state_path = self.state_path(host);
        let mut state = if force {
            info!(host, "Forced compression, ignoring tracked state");
            TrackedState::new(host)
        } else {
            TrackedState::load(&state_path, host)
        };

        let new_files = state.untracked(&walked);
        if new_files.is_empty() {
            info!(host, "No new files to archive ({} tracked)", state.len());
            return Ok(None);
        }

        std::fs::create_dir_all(&self.archive_dir)?;
        let (path, sequence) = next_archive_path(&self.archive_dir, host, &now);
        let bytes = write_archive(&path, host, &new_files)?;

        state.track(new_files.iter().copied());
        state.save(&state_path)?;

        let created = CreatedArchive {
            archive: ArchiveInfo {
                host: host.to_string(),
                size: std::fs::metadata(&path)?.len(),
                path,
                created: now.with_nanosecond(0).unwrap_or(now),
                sequence,
            },
            files: new_files.len(),
            bytes,
        };
        info!(
            host,
            "Archived {} files ({} bytes) into {}",
            created.files,
            created.bytes,
            created.archive.path.display()
        );
        Ok(Some(created))
    }
}

/// Write `files` as `<host>/<relative path>` entries into a `.partial` file
/// and rename it to `path` once complete.
fn write_archive(path: &Path, host: &str, files: &[&CollectedFile]) -> Result<u64> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let result = (|| -> Result<u64> {
        let encoder = GzEncoder::new(File::create(&partial)?, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut bytes = 0;
        for file in files {
            debug!(host, "Adding {}", file.relative_path);
            builder.append_path_with_name(&file.path, Path::new(host).join(&file.relative_path))?;
            bytes += file.size;
        }
        let file = builder.into_inner()?.finish()?;
        file.sync_all()?;
        std::fs::rename(&partial, path)?;
        Ok(bytes)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

/// `<host>_<stamp>.tar.gz`, or `<host>_<stamp>_<n>.tar.gz` if that exists
fn next_archive_path(dir: &Path, host: &str, now: &NaiveDateTime) -> (PathBuf, u32) {
    let stem = format!("{}_{}", host, now.format(STAMP_FORMAT));
    let mut sequence = 0;
    loop {
        let name = if sequence == 0 {
            format!("{}{}", stem, ARCHIVE_EXT)
        } else {
            format!("{}_{}{}", stem, sequence, ARCHIVE_EXT)
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return (candidate, sequence);
        }
        sequence += 1;
    }
}

/// Split an archive file name into host, timestamp and collision counter
fn parse_archive_name(name: &str) -> Option<(String, NaiveDateTime, u32)> {
    let stem = name.strip_suffix(ARCHIVE_EXT)?;
    let parts: Vec<&str> = stem.split('_').collect();

    let parse = |date: &str, time: &str| {
        NaiveDateTime::parse_from_str(&format!("{}_{}", date, time), STAMP_FORMAT).ok()
    };

    let n = parts.len();
    if n >= 3 {
        if let Some(created) = parse(parts[n - 2], parts[n - 1]) {
            return Some((parts[..n - 2].join("_"), created, 0));
        }
    }
    if n >= 4 {
        let sequence = parts[n - 1].parse::<u32>().ok()?;
        let created = parse(parts[n - 3], parts[n - 2])?;
        return Some((parts[..n - 3].join("_"), created, sequence));
    }
    None
}
