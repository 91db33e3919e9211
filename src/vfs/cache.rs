//! A hinted cache of decoded items, keyed by oid.
//!
//! Everything in the store is immutable and content-addressed, so a
//! cached value never goes stale - at worst it gets *better*, when a
//! commit first seen with a bare mode is replaced under the same key
//! once its tree has been read. Every lookup must be correct with an
//! empty cache; this is an optimization, never the source of truth.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use clru::CLruCache;
use lazy_static::lazy_static;

use super::Item;
use crate::counters;
use crate::hashing::ObjectId;

const CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
enum Key {
    Commit(ObjectId),
    RevList(ObjectId),
    Tree(ObjectId),
}

enum Cached {
    Item(Item),
    Listing(Arc<Vec<(String, Item)>>),
}

lazy_static! {
    static ref CACHE: Mutex<CLruCache<Key, Cached>> = Mutex::new(CLruCache::new(
        NonZeroUsize::new(CACHE_CAPACITY).unwrap()
    ));
}

/// Drop everything; lookups after this hit the store again.
pub fn clear_cache() {
    CACHE.lock().unwrap().clear();
}

pub(super) fn get_commit(coid: &ObjectId) -> Option<Item> {
    match CACHE.lock().unwrap().get(&Key::Commit(*coid)) {
        Some(Cached::Item(item)) => {
            counters::COMMIT_CACHE_HITS.bump();
            Some(item.clone())
        }
        _ => {
            counters::COMMIT_CACHE_MISSES.bump();
            None
        }
    }
}

pub(super) fn put_commit(coid: ObjectId, item: Item) {
    CACHE
        .lock()
        .unwrap()
        .put(Key::Commit(coid), Cached::Item(item));
}

pub(super) fn get_revlist(tip: &ObjectId) -> Option<Arc<Vec<(String, Item)>>> {
    match CACHE.lock().unwrap().get(&Key::RevList(*tip)) {
        Some(Cached::Listing(entries)) => {
            counters::REVLIST_CACHE_HITS.bump();
            Some(entries.clone())
        }
        _ => {
            counters::REVLIST_CACHE_MISSES.bump();
            None
        }
    }
}

pub(super) fn put_revlist(tip: ObjectId, entries: Arc<Vec<(String, Item)>>) {
    CACHE
        .lock()
        .unwrap()
        .put(Key::RevList(tip), Cached::Listing(entries));
}

pub(super) fn get_tree(oid: &ObjectId) -> Option<Arc<Vec<(String, Item)>>> {
    match CACHE.lock().unwrap().get(&Key::Tree(*oid)) {
        Some(Cached::Listing(entries)) => {
            counters::TREE_CACHE_HITS.bump();
            Some(entries.clone())
        }
        _ => {
            counters::TREE_CACHE_MISSES.bump();
            None
        }
    }
}

pub(super) fn put_tree(oid: ObjectId, entries: Arc<Vec<(String, Item)>>) {
    CACHE
        .lock()
        .unwrap()
        .put(Key::Tree(oid), Cached::Listing(entries));
}
