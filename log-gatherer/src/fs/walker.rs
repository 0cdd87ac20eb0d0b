//! Traversal of a host's collected-log tree.

use crate::utils::Result;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Per-destination directory where transfers keep files until they complete
pub const TRANSFER_SCRATCH_DIR: &str = ".rsync-tmp";

/// A regular file found under a host directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedFile {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the host directory, `/`-separated
    pub relative_path: String,

    pub size: u64,

    /// Modification time (seconds since Unix epoch)
    pub mtime: i64,
}

impl CollectedFile {
    fn from_entry(entry: &DirEntry, root: &Path) -> Result<Option<Self>> {
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            return Ok(None);
        }

        let path = entry.path().to_path_buf();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Ok(Some(Self {
            path,
            relative_path,
            size: metadata.len(),
            mtime: metadata.mtime(),
        }))
    }
}

/// Walk `root` and return every regular file below it, sorted by relative
/// path. A missing root yields an empty list and transfer scratch
/// directories are skipped.
///
/// Symlinks are not followed; rsync `-a` recreates them as links and their
/// targets live outside the collected tree.
pub fn walk_collected(root: &Path) -> Result<Vec<CollectedFile>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == TRANSFER_SCRATCH_DIR));
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Some(file) = CollectedFile::from_entry(&entry, root)? {
            files.push(file);
        }
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_missing_root() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_collected(&temp_dir.path().join("nope"))?;
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("nginx/journal_0"))?;
        fs::write(temp_dir.path().join("nginx/access.log"), b"12345")?;
        fs::write(temp_dir.path().join("nginx/journal_0/system.journal"), b"1234567")?;
        fs::create_dir_all(temp_dir.path().join("nginx/.rsync-tmp"))?;
        fs::write(temp_dir.path().join("nginx/.rsync-tmp/access.log.AbC123"), b"partial")?;

        let files = walk_collected(temp_dir.path())?;
        let names: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["nginx/access.log", "nginx/journal_0/system.journal"]);
        assert_eq!(files[0].size, 5);
        assert!(files[0].mtime > 0);

        Ok(())
    }

    #[test]
    fn test_walk_keeps_hidden_files() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("app"))?;
        fs::write(temp_dir.path().join("app/.cache.sqlite"), b"db")?;
        fs::write(temp_dir.path().join("app/.audit.backup"), b"audit")?;

        let files = walk_collected(temp_dir.path())?;
        let names: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["app/.audit.backup", "app/.cache.sqlite"]);

        Ok(())
    }
}
