//! Artifact file names.
//!
//! `{basename}--{source id}--{YYYYmmddTHHMMSSffffffZ}[.tar.zst]`
//!
//! The source id is derived from the canonical source path, so two sources
//! with the same basename never share retention groups. The timestamp orders
//! artifacts without consulting the operation log.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::path::Path;

use super::CompressionMode;

const SEPARATOR: &str = "--";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%6fZ";
const SOURCE_ID_LEN: usize = 8;

/// Stable identity of a backup source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceIdentity {
    pub basename: String,
    pub id: String,
}

impl SourceIdentity {
    /// Derive the identity from a canonical source path.
    pub fn for_path(canonical: &Path) -> Self {
        let basename = canonical
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "root".to_string());

        let hash = Sha256::digest(canonical.to_string_lossy().as_bytes());
        let id = hex::encode(hash)[..SOURCE_ID_LEN].to_string();

        Self { basename, id }
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.basename, SEPARATOR, self.id)
    }
}

/// Parsed artifact file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub identity: SourceIdentity,
    pub created_at: DateTime<Utc>,
    pub mode: CompressionMode,
}

impl ArtifactName {
    /// Build a name; the timestamp is truncated to what the name can carry.
    pub fn new(identity: SourceIdentity, created_at: DateTime<Utc>, mode: CompressionMode) -> Self {
        Self {
            identity,
            created_at: created_at.trunc_subsecs(6),
            mode,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}{}{}{}",
            self.identity,
            SEPARATOR,
            self.created_at.format(TIMESTAMP_FORMAT),
            self.mode.extension()
        )
    }

    /// Parse a file name. Returns None for anything that is not an artifact.
    pub fn parse(file_name: &str) -> Option<Self> {
        let archive_ext = CompressionMode::Archive.extension();
        let (stem, mode) = match file_name.strip_suffix(archive_ext) {
            Some(stem) => (stem, CompressionMode::Archive),
            None => (file_name, CompressionMode::None),
        };

        let mut parts = stem.rsplitn(3, SEPARATOR);
        let timestamp = parts.next()?;
        let id = parts.next()?;
        let basename = parts.next()?;

        if basename.is_empty()
            || id.len() != SOURCE_ID_LEN
            || !id.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return None;
        }

        let created_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .ok()?
            .and_utc();

        Some(Self {
            identity: SourceIdentity {
                basename: basename.to_string(),
                id: id.to_string(),
            },
            created_at,
            mode,
        })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(Self::parse)
    }
}
