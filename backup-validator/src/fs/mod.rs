//! Filesystem helpers shared by the archive builder and the digest walk.

pub mod metadata;
pub mod walker;
