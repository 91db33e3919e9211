//! Tallies of the I/O and cache traffic behind VFS calls.
//!
//! Relaxed atomics all around; these numbers feed debug logs, never
//! control flow.

use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

use log::*;

/// One tallied operation.
pub struct Tally {
    what: &'static str,
    count: AtomicUsize,
}

impl Tally {
    const fn new(what: &'static str) -> Self {
        Self {
            what,
            count: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn bump(&self) {
        self.count.fetch_add(1, Relaxed);
    }

    pub fn value(&self) -> usize {
        self.count.load(Relaxed)
    }
}

pub static COMMIT_CACHE_HITS: Tally = Tally::new("commit cache hits");
pub static COMMIT_CACHE_MISSES: Tally = Tally::new("commit cache misses");
pub static REVLIST_CACHE_HITS: Tally = Tally::new("revision list cache hits");
pub static REVLIST_CACHE_MISSES: Tally = Tally::new("revision list cache misses");
pub static TREE_CACHE_HITS: Tally = Tally::new("tree listing cache hits");
pub static TREE_CACHE_MISSES: Tally = Tally::new("tree listing cache misses");
pub static TREES_READ: Tally = Tally::new("trees read");
pub static BLOBS_READ: Tally = Tally::new("blobs read");
pub static META_RECORDS_READ: Tally = Tally::new("metadata records read");
pub static SYMLINKS_CHASED: Tally = Tally::new("symlinks chased");

/// Log every tally that counted something, at debug level.
pub fn log_tallies() {
    let all = [
        &COMMIT_CACHE_HITS,
        &COMMIT_CACHE_MISSES,
        &REVLIST_CACHE_HITS,
        &REVLIST_CACHE_MISSES,
        &TREE_CACHE_HITS,
        &TREE_CACHE_MISSES,
        &TREES_READ,
        &BLOBS_READ,
        &META_RECORDS_READ,
        &SYMLINKS_CHASED,
    ];
    for tally in all {
        let count = tally.value();
        if count > 0 {
            debug!("{count} {}", tally.what);
        }
    }
}
