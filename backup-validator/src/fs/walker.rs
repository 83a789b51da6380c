//! Canonical directory traversal.
//!
//! Every component that needs to enumerate a tree (archive building, copying,
//! composite digests) walks it through here, so they all agree on membership
//! and order: lexicographic by `/`-joined relative path.

use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// Relative path with `/` separators, used for ordering and digests
    pub key: String,

    /// File size in bytes (0 for directories)
    pub size: u64,

    /// Is this a directory?
    pub is_dir: bool,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// For symlinks, resolves to the target to get the real file size.
    /// Returns None for anything that is neither a regular file nor a
    /// directory once resolved: symlinked directories, broken links, sockets,
    /// FIFOs and device nodes.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.path().symlink_metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let (size, is_dir) = if raw_metadata.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => {
                    warn!(path = %path.display(), "Skipping symlink to directory");
                    return Ok(None);
                }
                Ok(resolved) if resolved.is_file() => (resolved.len(), false),
                Ok(_) => {
                    warn!(path = %path.display(), "Skipping symlink to special file");
                    return Ok(None);
                }
                Err(_) => {
                    warn!(path = %path.display(), "Skipping broken symlink");
                    return Ok(None);
                }
            }
        } else if raw_metadata.is_dir() {
            (0, true)
        } else if raw_metadata.is_file() {
            (raw_metadata.len(), false)
        } else {
            warn!(path = %path.display(), "Skipping special file");
            return Ok(None);
        };

        let key = relative_key(&relative_path);

        Ok(Some(Self {
            path,
            relative_path,
            key,
            size,
            is_dir,
        }))
    }
}

/// Join the normal components of a relative path with `/`.
pub fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk a directory tree and collect every file and directory below the root,
/// in canonical order. The root itself is not included, and symlinks to
/// directories are never descended into.
///
/// # Example
/// ```no_run
/// use backup_validator::fs::walker::walk_directory;
/// use std::path::Path;
///
/// let entries = walk_directory(Path::new("/data")).unwrap();
/// println!("Found {} entries", entries.len());
/// ```
pub fn walk_directory(root: &Path) -> std::io::Result<Vec<FileInfo>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if let Some(file_info) = FileInfo::from_entry(&entry, root)? {
            entries.push(file_info);
        }
    }

    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

/// Calculate total size of all files in a directory
pub fn calculate_total_size(root: &Path) -> std::io::Result<u64> {
    Ok(walk_directory(root)?
        .iter()
        .filter(|entry| !entry.is_dir)
        .map(|entry| entry.size)
        .sum())
}
