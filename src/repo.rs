//! Where saved objects come from - any content-addressed store that can
//! resolve an oid to typed bytes and enumerate refs.
//!
//! The VFS is a pure consumer of this interface; writing objects is the
//! business of whatever took the backup.

use anyhow::Result;

use crate::hashing::ObjectId;

pub mod memory;

/// The kinds of objects a store can hold.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Kind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Blob => "blob",
            Kind::Tree => "tree",
            Kind::Commit => "commit",
            Kind::Tag => "tag",
        }
    }
}

/// One entry of a first-parent commit log.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Rev {
    /// The commit itself
    pub coid: ObjectId,
    /// The tree the commit saved
    pub tree: ObjectId,
    /// Author timestamp, seconds since the epoch
    pub author_sec: i64,
}

/// A read-only view of an object store.
///
/// Reads are idempotent and pure - an oid always names the same bytes.
/// Ref enumeration is a point-in-time snapshot; it may race with writers
/// in the underlying store.
pub trait Repo {
    /// Resolve an oid to its kind and raw bytes,
    /// or `None` if the store has no such object.
    fn read(&self, id: &ObjectId) -> Result<Option<(Kind, Vec<u8>)>>;

    /// List refs with the given prefix as `(name, oid)` pairs,
    /// names stripped of the prefix, sorted.
    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>>;

    /// Resolve a full ref name to its oid, or `None` if absent.
    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>>;

    /// Walk the first-parent chain starting at the given commit,
    /// newest first.
    fn log_first_parents(&self, id: &ObjectId) -> Result<Vec<Rev>>;
}
