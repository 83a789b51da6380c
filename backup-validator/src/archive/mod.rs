//! Backup artifact production.
//!
//! An artifact is either a zstd-compressed tar archive or a direct copy of the
//! source. Both are produced from the same canonical walk, and both can be
//! unpacked back into a directory so that validation and restore share one
//! comparison (the tree digest).

pub mod naming;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::checksum::Digest;
use crate::fs::metadata::FileMetadata;
use crate::fs::walker::{calculate_total_size, walk_directory};
use crate::utils::errors::BackupError;
use crate::utils::format::format_bytes;
pub use naming::{ArtifactName, SourceIdentity};

/// How the artifact is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Direct copy of the file or tree
    None,
    /// tar stream compressed with zstd
    Archive,
}

impl CompressionMode {
    pub fn from_flag(compress: bool) -> Self {
        if compress {
            CompressionMode::Archive
        } else {
            CompressionMode::None
        }
    }

    /// File name suffix appended after the timestamp.
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionMode::None => "",
            CompressionMode::Archive => ".tar.zst",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMode::None => "none",
            CompressionMode::Archive => "archive",
        }
    }
}

/// A validated source and the directory its artifacts go to.
#[derive(Debug, Clone)]
pub struct BackupTarget {
    pub source: PathBuf,
    pub dest_dir: PathBuf,
    pub mode: CompressionMode,
    pub identity: SourceIdentity,
}

impl BackupTarget {
    /// Check that the source is readable and the destination writable.
    ///
    /// The destination directory is created if it does not exist yet.
    pub fn resolve(source: &Path, dest_dir: &Path, mode: CompressionMode) -> io::Result<Self> {
        let source = source.canonicalize().map_err(|e| {
            io::Error::new(e.kind(), format!("source {}: {}", source.display(), e))
        })?;

        if source.is_dir() {
            fs::read_dir(&source)?;
        } else {
            fs::File::open(&source)?;
        }

        fs::create_dir_all(dest_dir)?;
        let dest_dir = dest_dir.canonicalize()?;
        tempfile::NamedTempFile::new_in(&dest_dir).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("destination {} is not writable: {}", dest_dir.display(), e),
            )
        })?;

        if dest_dir.starts_with(&source) && source.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "destination {} is inside source {}",
                    dest_dir.display(),
                    source.display()
                ),
            ));
        }

        let identity = SourceIdentity::for_path(&source);
        Ok(Self {
            source,
            dest_dir,
            mode,
            identity,
        })
    }

    pub fn basename(&self) -> &str {
        &self.identity.basename
    }
}

/// A backup produced by one attempt.
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub name: ArtifactName,
    pub created_at: DateTime<Utc>,
    pub mode: CompressionMode,
    pub size_bytes: u64,
    /// Filled in once the artifact has been validated
    pub digest: Option<Digest>,
}

/// Produces artifacts for a target.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    compression_level: i32,
}

impl ArchiveBuilder {
    pub fn new(compression_level: i32) -> Self {
        Self { compression_level }
    }

    /// Produce a fresh artifact. A partial artifact is removed on failure.
    pub fn build(&self, target: &BackupTarget, attempt: u32) -> Result<BackupArtifact, BackupError> {
        let (name, path) = self.allocate_name(target);

        debug!(attempt, artifact = %path.display(), mode = target.mode.as_str(), "Building artifact");

        let written = match target.mode {
            CompressionMode::Archive => {
                self.write_archive(&target.source, &path, target.basename())
            }
            CompressionMode::None => copy_tree(&target.source, &path),
        };

        if let Err(e) = written {
            discard_artifact(&path);
            return Err(BackupError::Build(format!(
                "attempt {} could not write {}: {}",
                attempt,
                path.display(),
                e
            )));
        }

        let size_bytes = artifact_size(&path).map_err(|e| {
            BackupError::Build(format!("artifact {} vanished: {}", path.display(), e))
        })?;

        info!(
            attempt,
            artifact = %path.display(),
            size = %format_bytes(size_bytes),
            "Artifact written"
        );

        Ok(BackupArtifact {
            path,
            created_at: name.created_at,
            mode: name.mode,
            name,
            size_bytes,
            digest: None,
        })
    }

    /// Pick a name that is not taken yet in the destination directory.
    fn allocate_name(&self, target: &BackupTarget) -> (ArtifactName, PathBuf) {
        let mut created_at = Utc::now();
        loop {
            let name = ArtifactName::new(target.identity.clone(), created_at, target.mode);
            let path = target.dest_dir.join(name.file_name());
            if fs::symlink_metadata(&path).is_err() {
                return (name, path);
            }
            created_at = name.created_at + chrono::Duration::microseconds(1);
        }
    }

    fn write_archive(&self, source: &Path, archive_path: &Path, root_name: &str) -> io::Result<()> {
        let file = fs::File::create(archive_path)?;
        let mut encoder = zstd::Encoder::new(file, self.compression_level)?;
        encoder.include_checksum(true)?;

        let mut builder = tar::Builder::new(encoder);
        builder.mode(tar::HeaderMode::Deterministic);

        if source.is_dir() {
            builder.append_dir(root_name, source)?;
            for entry in walk_directory(source)? {
                let member = Path::new(root_name).join(&entry.relative_path);
                if entry.is_dir {
                    builder.append_dir(&member, &entry.path)?;
                } else {
                    builder.append_path_with_name(&entry.path, &member)?;
                }
            }
        } else {
            builder.append_path_with_name(source, root_name)?;
        }

        let encoder = builder.into_inner()?;
        let file = encoder.finish()?;
        file.sync_all()?;
        Ok(())
    }
}

/// Materialise an artifact's content at `into/root_name` and return that path.
pub fn unpack(
    artifact: &Path,
    mode: CompressionMode,
    into: &Path,
    root_name: &str,
) -> io::Result<PathBuf> {
    fs::create_dir_all(into)?;
    let root = into.join(root_name);

    match mode {
        CompressionMode::Archive => {
            let file = fs::File::open(artifact)?;
            let decoder = zstd::Decoder::new(file)?;
            let mut archive = tar::Archive::new(decoder);
            archive.unpack(into)?;

            // tar stops at its end marker; read the rest of the frame so the
            // zstd content checksum is verified too
            let mut decoder = archive.into_inner();
            io::copy(&mut decoder, &mut io::sink())?;

            if fs::symlink_metadata(&root).is_err() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("archive does not contain {}", root_name),
                ));
            }
        }
        CompressionMode::None => {
            copy_tree(artifact, &root)?;
        }
    }

    Ok(root)
}

/// Remove an artifact (file or copied tree). Missing artifacts are fine.
pub fn discard_artifact(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return,
    };

    if let Err(e) = result {
        warn!(artifact = %path.display(), error = %e, "Failed to discard artifact");
    }
}

/// Copy a file, or a tree in canonical order, carrying metadata best-effort.
fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    if !fs::metadata(source)?.is_dir() {
        fs::copy(source, dest)?;
        FileMetadata::from_path(source)?.apply_best_effort(dest);
        return Ok(());
    }

    fs::create_dir(dest)?;
    let entries = walk_directory(source)?;
    let mut directories = vec![(source.to_path_buf(), dest.to_path_buf())];

    for entry in &entries {
        let target = dest.join(&entry.relative_path);
        if entry.is_dir {
            fs::create_dir(&target)?;
            directories.push((entry.path.clone(), target));
        } else {
            fs::copy(&entry.path, &target)?;
            FileMetadata::from_path(&entry.path)?.apply_best_effort(&target);
        }
    }

    // Deepest first, so a read-only parent does not block its children
    for (src, dst) in directories.iter().rev() {
        if let Ok(meta) = FileMetadata::from_path(src) {
            meta.apply_best_effort(dst);
        }
    }

    Ok(())
}

fn artifact_size(path: &Path) -> io::Result<u64> {
    let meta = fs::metadata(path)?;
    if meta.is_dir() {
        calculate_total_size(path)
    } else {
        Ok(meta.len())
    }
}
