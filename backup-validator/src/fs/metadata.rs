//! Best-effort metadata carry-over for direct copies.
//!
//! Permissions and modification times are copied when the platform allows it.
//! They are not part of the integrity contract: only content is digested.

use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

/// Metadata carried from a source entry to its copy
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last modified time
    pub modified: Option<SystemTime>,

    /// File permissions (Unix mode bits)
    pub permissions: Option<u32>,

    /// Is this a directory?
    pub is_dir: bool,
}

impl FileMetadata {
    /// Extract metadata from a path (symlinks are followed)
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode())
        };

        #[cfg(not(unix))]
        let permissions = None;

        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
            permissions,
            is_dir: metadata.is_dir(),
        })
    }

    /// Apply this metadata to a copy. Failures are logged and ignored.
    pub fn apply_best_effort(&self, path: &Path) {
        if let Err(e) = self.apply_to_path(path) {
            debug!(path = %path.display(), error = %e, "Could not preserve metadata");
        }
    }

    fn apply_to_path(&self, path: &Path) -> std::io::Result<()> {
        // Directories keep their mtime only if nothing is written into them
        // afterwards, so callers apply directory metadata last.
        if let Some(modified) = self.modified {
            if !self.is_dir {
                let file = fs::OpenOptions::new().write(true).open(path)?;
                file.set_modified(modified)?;
            }
        }

        #[cfg(unix)]
        if let Some(mode) = self.permissions {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }

        Ok(())
    }
}
