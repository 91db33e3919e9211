//! Browse saved snapshots as a directory tree.
//!
//! Everything in the store is immutable and addressed by a 20-byte
//! [`ObjectId`](hashing::ObjectId). The [`vfs`] module presents the
//! store's branches, tags, and saves as a rooted, POSIX-like hierarchy:
//! archive browsers, FUSE mounts, and restore tooling all resolve paths
//! through it.

pub mod counters;
pub mod hashing;
pub mod metadata;
pub mod repo;
pub mod tree;
pub mod vfs;
