//! Streaming content digests.
//!
//! Files are hashed with SHA-256 in bounded chunks. Directory trees get a
//! composite digest built from every member's relative path and content
//! digest in canonical order, so renames, additions and deletions change it
//! just like content drift does.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use crate::fs::walker::walk_directory;

/// Default read buffer for hashing (64KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A SHA-256 content digest, displayed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Digest([u8; 32]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_hex()
    }
}

impl TryFrom<String> for Digest {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Computes file and tree digests with a fixed read buffer size.
#[derive(Debug, Clone)]
pub struct ChecksumComputer {
    chunk_size: usize,
}

impl Default for ChecksumComputer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ChecksumComputer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Stream a file through SHA-256.
    pub fn file_digest(&self, path: &Path) -> io::Result<Digest> {
        let mut file = File::open(path)?;
        self.reader_digest(&mut file)
    }

    /// Stream any reader through SHA-256.
    pub fn reader_digest<R: Read>(&self, reader: &mut R) -> io::Result<Digest> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..n]);
        }

        Ok(finish(hasher))
    }

    /// Digest of a file, or the composite digest of a directory tree.
    ///
    /// The name of `path` itself does not contribute, so a tree and its copy
    /// under another name compare equal.
    pub fn tree_digest(&self, path: &Path) -> io::Result<Digest> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_dir() {
            return self.file_digest(path);
        }

        let mut hasher = Sha256::new();
        for entry in walk_directory(path)? {
            hasher.update(entry.key.as_bytes());
            hasher.update([0u8]);
            if entry.is_dir {
                hasher.update(b"dir");
            } else {
                let digest = self.file_digest(&entry.path)?;
                hasher.update(digest.to_hex().as_bytes());
            }
            hasher.update(b"\n");
        }

        Ok(finish(hasher))
    }
}

fn finish(hasher: Sha256) -> Digest {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    Digest(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample_tree(root: &Path) -> io::Result<()> {
        fs::create_dir_all(root.join("nested"))?;
        fs::write(root.join("a.txt"), b"alpha")?;
        fs::write(root.join("b.txt"), b"bravo")?;
        fs::write(root.join("nested/c.txt"), b"charlie")?;
        Ok(())
    }

    #[test]
    fn test_known_sha256() -> io::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("abc");
        fs::write(&path, b"abc")?;

        let digest = ChecksumComputer::default().file_digest(&path)?;
        assert_eq!(
            digest.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        Ok(())
    }

    #[test]
    fn test_chunk_size_does_not_change_digest() -> io::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("data.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data)?;

        let small = ChecksumComputer::new(7).file_digest(&path)?;
        let large = ChecksumComputer::new(1 << 20).file_digest(&path)?;
        assert_eq!(small, large);
        Ok(())
    }

    #[test]
    fn test_digest_ignores_path_and_mtime() -> io::Result<()> {
        let temp = TempDir::new()?;
        fs::write(temp.path().join("one"), b"same bytes")?;
        fs::write(temp.path().join("two"), b"same bytes")?;

        let computer = ChecksumComputer::default();
        assert_eq!(
            computer.file_digest(&temp.path().join("one"))?,
            computer.file_digest(&temp.path().join("two"))?
        );
        Ok(())
    }

    #[test]
    fn test_tree_digest_is_stable_and_name_independent() -> io::Result<()> {
        let temp = TempDir::new()?;
        sample_tree(&temp.path().join("first"))?;
        sample_tree(&temp.path().join("second"))?;

        let computer = ChecksumComputer::default();
        let first = computer.tree_digest(&temp.path().join("first"))?;
        assert_eq!(first, computer.tree_digest(&temp.path().join("first"))?);
        assert_eq!(first, computer.tree_digest(&temp.path().join("second"))?);
        Ok(())
    }

    #[test]
    fn test_tree_digest_detects_structure_changes() -> io::Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path().join("tree");
        sample_tree(&root)?;

        let computer = ChecksumComputer::default();
        let original = computer.tree_digest(&root)?;

        fs::rename(root.join("b.txt"), root.join("renamed.txt"))?;
        let renamed = computer.tree_digest(&root)?;
        assert_ne!(original, renamed);

        fs::create_dir(root.join("empty"))?;
        let with_empty_dir = computer.tree_digest(&root)?;
        assert_ne!(renamed, with_empty_dir);

        fs::remove_file(root.join("a.txt"))?;
        assert_ne!(with_empty_dir, computer.tree_digest(&root)?);
        Ok(())
    }

    #[test]
    fn test_digest_hex_round_trip() {
        let digest: Digest = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
            .parse()
            .unwrap();
        assert_eq!(digest.to_string().parse::<Digest>().unwrap(), digest);
        assert!("not-hex".parse::<Digest>().is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let result = ChecksumComputer::default().file_digest(&temp.path().join("missing"));
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
