//! Browse saved snapshots as a rooted, POSIX-like hierarchy
//!
//! The root lists one directory per branch, plus `/.tag` for tags.
//! Each branch is a virtual directory with one timestamped entry per
//! save and a `latest` alias; below a save sits the tree it captured.
//! Paths resolve the way a Unix kernel would resolve them, symlinks and
//! all, except that everything here is read-only.
//!
//! Items are immutable: anything that would change one (like filling in
//! its metadata) returns a new value instead, and the [`cache`] keeps
//! the upgraded copy. The cache is a hint - every operation is correct
//! with an empty cache, and [`clear_cache`] drops the lot.

use std::io::Cursor;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{Local, LocalResult, TimeZone};
use log::*;

use crate::counters;
use crate::hashing::ObjectId;
use crate::metadata::{self, Metadata};
use crate::repo::{Kind, Repo, Rev};
use crate::tree::{self, EntryKind, TreeEntry};

pub mod cache;

pub use cache::clear_cache;

pub const DEFAULT_FILE_MODE: u32 = 0o100644;
pub const DEFAULT_DIR_MODE: u32 = 0o040755;
pub const DEFAULT_SYMLINK_MODE: u32 = 0o120755;

/// How many symlinks we'll chase in a single resolution before giving
/// up and calling it a loop.
const MAX_SYMLINK_HOPS: u32 = 100;

/// The chain of `(name, item)` pairs a resolution walks through.
///
/// The first element is always `("", Root)`; only the final element's
/// item may be `None` (the name doesn't exist in its directory).
pub type Chain = Vec<(String, Option<Item>)>;

/// Errors surfaced by path resolution and listing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A path component had to be traversed, but the item there isn't a
    /// directory.
    #[error("not a directory")]
    NotADirectory {
        /// The chain resolved so far; `None` when the failure predates
        /// any progress (a bad `parent` argument).
        terminus: Option<Chain>,
    },
    /// Too many symlinks chased in one resolution.
    #[error("too many levels of symbolic links")]
    TooManyLinks { terminus: Chain },
    /// Raw object bytes failed to decode.
    #[error("invalid object {}: {source}", oid.short_name())]
    InvalidObject {
        oid: ObjectId,
        #[source]
        source: anyhow::Error,
    },
    /// `readlink` of something that isn't a symlink.
    #[error("not a symlink")]
    NotASymlink,
    /// The store has no object for an oid we were told exists.
    #[error("object {} missing from the store", oid.short_name())]
    NotFound { oid: ObjectId },
    /// The store failed outright; its error passes through unchanged.
    #[error(transparent)]
    Repo(#[from] anyhow::Error),
}

impl Error {
    /// The POSIX-analog error kind, for callers (FUSE shims, copy
    /// tools) that speak errno.
    pub fn io_kind(&self) -> std::io::ErrorKind {
        use std::io::ErrorKind;
        match self {
            Error::NotADirectory { .. } => ErrorKind::NotADirectory,
            // `ErrorKind::FilesystemLoop` requires the unstable `io_error_more`
            // feature on this toolchain; `Other` is the closest stable kind.
            Error::TooManyLinks { .. } => ErrorKind::Other,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::InvalidObject { .. } => ErrorKind::InvalidData,
            Error::NotASymlink | Error::Repo(_) => ErrorKind::Other,
        }
    }

    /// The partial resolution chain attached to resolver errors.
    pub fn terminus(&self) -> Option<&Chain> {
        match self {
            Error::NotADirectory { terminus } => terminus.as_ref(),
            Error::TooManyLinks { terminus } => Some(terminus),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn invalid(oid: &ObjectId, source: anyhow::Error) -> Error {
    Error::InvalidObject { oid: *oid, source }
}

/// An item's metadata: either a bare mode (a cheap placeholder) or the
/// full record from the save.
///
/// Operations that need real metadata must go through
/// [`augment_item_meta`] first.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemMeta {
    Mode(u32),
    Full(Box<Metadata>),
}

impl ItemMeta {
    pub fn mode(&self) -> u32 {
        match self {
            ItemMeta::Mode(mode) => *mode,
            ItemMeta::Full(meta) => meta.mode,
        }
    }

    pub fn full(&self) -> Option<&Metadata> {
        match self {
            ItemMeta::Mode(_) => None,
            ItemMeta::Full(meta) => Some(meta),
        }
    }
}

impl From<Metadata> for ItemMeta {
    fn from(meta: Metadata) -> Self {
        ItemMeta::Full(Box::new(meta))
    }
}

impl From<u32> for ItemMeta {
    fn from(mode: u32) -> Self {
        ItemMeta::Mode(mode)
    }
}

/// A node in the virtual hierarchy.
///
/// A closed sum: listing, sizing, and augmentation all dispatch on the
/// variant. Cloning is a deep copy (`Metadata` is owned), so a clone
/// can be modified without aliasing the original.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// The root `/`
    Root,
    /// The synthesized `/.tag` directory
    Tags,
    /// A branch: a virtual directory of its saves. `oid` is the tip
    /// commit.
    RevList { oid: ObjectId, meta: ItemMeta },
    /// One saved snapshot. `oid` is the commit's tree; `coid` the
    /// commit itself.
    Commit {
        oid: ObjectId,
        coid: ObjectId,
        meta: ItemMeta,
    },
    /// A file, symlink, or subtree
    Entry { oid: ObjectId, meta: ItemMeta },
    /// A file whose content is a tree of extents rather than one blob
    Chunked { oid: ObjectId, meta: ItemMeta },
    /// A synthesized symlink with no backing object
    FakeLink { target: String, meta: ItemMeta },
}

impl Item {
    pub fn meta(&self) -> Option<&ItemMeta> {
        match self {
            Item::Root | Item::Tags => None,
            Item::RevList { meta, .. }
            | Item::Commit { meta, .. }
            | Item::Entry { meta, .. }
            | Item::Chunked { meta, .. }
            | Item::FakeLink { meta, .. } => Some(meta),
        }
    }

    fn replace_meta(&self, meta: ItemMeta) -> Item {
        match self {
            Item::Root => Item::Root,
            Item::Tags => Item::Tags,
            Item::RevList { oid, .. } => Item::RevList { oid: *oid, meta },
            Item::Commit { oid, coid, .. } => Item::Commit {
                oid: *oid,
                coid: *coid,
                meta,
            },
            Item::Entry { oid, .. } => Item::Entry { oid: *oid, meta },
            Item::Chunked { oid, .. } => Item::Chunked { oid: *oid, meta },
            Item::FakeLink { target, .. } => Item::FakeLink {
                target: target.clone(),
                meta,
            },
        }
    }
}

/// The item's mode, whether its meta is bare or full.
pub fn item_mode(item: &Item) -> u32 {
    match item.meta() {
        None => DEFAULT_DIR_MODE,
        Some(meta) => meta.mode(),
    }
}

fn is_dir_item(item: &Item) -> bool {
    metadata::is_dir(item_mode(item))
}

/// Resolve an oid through the store, with kind bookkeeping.
fn read_object(repo: &dyn Repo, oid: &ObjectId) -> Result<(Kind, Vec<u8>)> {
    let (kind, bytes) = repo.read(oid)?.ok_or(Error::NotFound { oid: *oid })?;
    match kind {
        Kind::Tree => counters::TREES_READ.bump(),
        Kind::Blob => counters::BLOBS_READ.bump(),
        _ => {}
    }
    Ok((kind, bytes))
}

fn read_blob(repo: &dyn Repo, oid: &ObjectId) -> Result<Vec<u8>> {
    let (kind, bytes) = read_object(repo, oid)?;
    if kind != Kind::Blob {
        return Err(invalid(oid, anyhow!("expected a blob, found a {}", kind.as_str())));
    }
    Ok(bytes)
}

/// A file's full content: a blob's bytes, or the spliced-together
/// extents when the object is a chunked tree.
fn read_file_bytes(repo: &dyn Repo, oid: &ObjectId) -> Result<Vec<u8>> {
    let (kind, bytes) = read_object(repo, oid)?;
    match kind {
        Kind::Blob => Ok(bytes),
        Kind::Tree => {
            let mut out = Vec::new();
            for entry in tree::decode(&bytes) {
                let entry = entry.map_err(|e| invalid(oid, e))?;
                out.extend_from_slice(&read_file_bytes(repo, &entry.oid)?);
            }
            Ok(out)
        }
        _ => Err(invalid(
            oid,
            anyhow!("a file can't be a {}", kind.as_str()),
        )),
    }
}

/// A tree's raw bytes, with kind checking.
fn read_tree(repo: &dyn Repo, oid: &ObjectId) -> Result<Vec<u8>> {
    let (kind, data) = read_object(repo, oid)?;
    if kind != Kind::Tree {
        return Err(invalid(oid, anyhow!("expected a tree, found a {}", kind.as_str())));
    }
    Ok(data)
}

/// Read a tree's raw bytes and, separately, the oid of its embedded
/// `.bupm` metadata entry when it has one.
pub fn tree_data_and_bupm(repo: &dyn Repo, oid: &ObjectId) -> Result<(Vec<u8>, Option<ObjectId>)> {
    let data = read_tree(repo, oid)?;
    let mut bupm = None;
    for entry in tree::decode(&data) {
        let entry = entry.map_err(|e| invalid(oid, e))?;
        if entry.mangled_name == tree::METADATA_NAME {
            bupm = Some(entry.oid);
            break;
        }
    }
    Ok((data, bupm))
}

/// Pulls [`Metadata`] records out of a directory's `.bupm` stream.
struct MetaStream {
    oid: ObjectId,
    reader: Cursor<Vec<u8>>,
}

impl MetaStream {
    fn open(repo: &dyn Repo, oid: &ObjectId) -> Result<Self> {
        // The stream itself may be chunked if the directory is huge.
        let bytes = read_file_bytes(repo, oid)?;
        Ok(Self {
            oid: *oid,
            reader: Cursor::new(bytes),
        })
    }

    fn next_record(&mut self) -> Result<Option<Metadata>> {
        Metadata::read_from(&mut self.reader).map_err(|e| invalid(&self.oid, e))
    }
}

/// Return a symlink's target.
///
/// Prefers the saved metadata; falls back to reading the target blob.
pub fn readlink(repo: &dyn Repo, item: &Item) -> Result<String> {
    if !metadata::is_symlink(item_mode(item)) {
        return Err(Error::NotASymlink);
    }
    match item {
        Item::FakeLink { target, .. } => Ok(target.clone()),
        Item::Entry { oid, meta } => {
            if let Some(target) = meta.full().and_then(|m| m.symlink_target.as_ref()) {
                return Ok(target.clone());
            }
            let bytes = read_blob(repo, oid)?;
            String::from_utf8(bytes)
                .map_err(|e| invalid(oid, anyhow::Error::new(e).context("symlink target isn't UTF-8")))
        }
        _ => Err(Error::NotASymlink),
    }
}

/// The logical byte size of an item: a symlink's target length, a
/// file's content length, 0 for anything else.
///
/// Costs no I/O when the metadata already carries a size.
pub fn item_size(repo: &dyn Repo, item: &Item) -> Result<u64> {
    if let Some(size) = item.meta().and_then(ItemMeta::full).and_then(|m| m.size) {
        return Ok(size);
    }
    compute_item_size(repo, item)
}

fn compute_item_size(repo: &dyn Repo, item: &Item) -> Result<u64> {
    let mode = item_mode(item);
    if metadata::is_symlink(mode) {
        Ok(readlink(repo, item)?.len() as u64)
    } else if metadata::is_file(mode) {
        match item {
            Item::Entry { oid, .. } => Ok(read_blob(repo, oid)?.len() as u64),
            Item::Chunked { oid, .. } => chunked_size(repo, oid),
            _ => Ok(0),
        }
    } else {
        Ok(0)
    }
}

/// Sum a chunked file's extents without splicing the file together.
fn chunked_size(repo: &dyn Repo, oid: &ObjectId) -> Result<u64> {
    let (kind, bytes) = read_object(repo, oid)?;
    match kind {
        Kind::Blob => Ok(bytes.len() as u64),
        Kind::Tree => {
            let mut total = 0;
            for entry in tree::decode(&bytes) {
                let entry = entry.map_err(|e| invalid(oid, e))?;
                total += chunked_size(repo, &entry.oid)?;
            }
            Ok(total)
        }
        _ => Err(invalid(
            oid,
            anyhow!("a chunked extent can't be a {}", kind.as_str()),
        )),
    }
}

/// Ensure the item carries a full [`Metadata`], synthesizing one from
/// the bare mode if that's all we have. Symlink targets are always
/// filled in; sizes only when `include_size` asks for them.
///
/// Returns the input unchanged when there's nothing to add.
pub fn augment_item_meta(repo: &dyn Repo, item: Item, include_size: bool) -> Result<Item> {
    let Some(meta) = item.meta() else {
        return Ok(item); // root and /.tag have nothing to augment
    };
    if let ItemMeta::Full(m) = meta {
        if !include_size || m.size.is_some() {
            return Ok(item);
        }
    }
    let mut m = match meta {
        ItemMeta::Full(m) => (**m).clone(),
        ItemMeta::Mode(mode) => Metadata::from_mode(*mode),
    };
    if metadata::is_symlink(m.mode) {
        let target = match &m.symlink_target {
            Some(t) => t.clone(),
            None => readlink(repo, &item)?,
        };
        m.size = Some(target.len() as u64);
        m.symlink_target = Some(target);
    } else if include_size && m.size.is_none() {
        m.size = Some(compute_item_size(repo, &item)?);
    }
    Ok(item.replace_meta(ItemMeta::from(m)))
}

/// If the item is a directory whose meta is still a bare mode, look up
/// the metadata its own tree records for `.`. Useful for the output of
/// [`contents`], which leaves subdirectories bare.
pub fn fill_in_metadata_if_dir(repo: &dyn Repo, item: Item) -> Result<Item> {
    if !is_dir_item(&item) || matches!(item.meta(), Some(ItemMeta::Full(_))) {
        return Ok(item);
    }
    match &item {
        Item::Entry { oid, .. } => match tree_dot_meta(repo, oid)? {
            Some(meta) => Ok(item.replace_meta(ItemMeta::from(meta))),
            None => Ok(item),
        },
        Item::Commit { oid, coid, .. } => match tree_dot_meta(repo, oid)? {
            Some(meta) => {
                let upgraded = item.replace_meta(ItemMeta::from(meta));
                cache::put_commit(*coid, upgraded.clone());
                Ok(upgraded)
            }
            None => Ok(item),
        },
        _ => Ok(item),
    }
}

/// The metadata a tree records for itself: the first record of its
/// `.bupm` stream, if it has one.
fn tree_dot_meta(repo: &dyn Repo, tree_oid: &ObjectId) -> Result<Option<Metadata>> {
    match tree_data_and_bupm(repo, tree_oid)?.1 {
        None => Ok(None),
        Some(bupm_oid) => MetaStream::open(repo, &bupm_oid)?.next_record(),
    }
}

/// The commit item for `coid`, cached. With `require_meta`, the item
/// carries the metadata of the commit's tree (the tree's own `.bupm`
/// record); without it, a bare directory mode is enough.
///
/// `known_tree` skips the log walk when the caller already has the
/// commit's tree oid.
fn commit_item(
    repo: &dyn Repo,
    coid: &ObjectId,
    known_tree: Option<ObjectId>,
    require_meta: bool,
) -> Result<Item> {
    let cached = cache::get_commit(coid);
    if let Some(item) = &cached {
        if !require_meta || matches!(item.meta(), Some(ItemMeta::Full(_))) {
            return Ok(item.clone());
        }
    }
    let tree_oid = match (known_tree, &cached) {
        (Some(t), _) => t,
        (None, Some(Item::Commit { oid, .. })) => *oid,
        (None, _) => first_rev(repo, coid)?.tree,
    };
    let meta = if require_meta {
        match tree_dot_meta(repo, &tree_oid)? {
            Some(m) => ItemMeta::from(m),
            None => ItemMeta::Mode(DEFAULT_DIR_MODE),
        }
    } else {
        ItemMeta::Mode(DEFAULT_DIR_MODE)
    };
    let item = Item::Commit {
        oid: tree_oid,
        coid: *coid,
        meta,
    };
    cache::put_commit(*coid, item.clone());
    Ok(item)
}

fn first_rev(repo: &dyn Repo, coid: &ObjectId) -> Result<Rev> {
    repo.log_first_parents(coid)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Repo(anyhow!("empty log for commit {}", coid.short_name())))
}

/// A branch's virtual directory, carrying the tip tree's own metadata.
fn revlist_item(repo: &dyn Repo, tip: &ObjectId) -> Result<Item> {
    let commit = commit_item(repo, tip, None, true)?;
    let meta = commit
        .meta()
        .cloned()
        .unwrap_or(ItemMeta::Mode(DEFAULT_DIR_MODE));
    Ok(Item::RevList { oid: *tip, meta })
}

/// A tag's entry: the commit it points at, or `None` for tags of
/// non-commit objects.
fn tag_item(repo: &dyn Repo, oid: &ObjectId) -> Result<Option<Item>> {
    let (kind, _) = read_object(repo, oid)?;
    match kind {
        Kind::Commit => commit_item(repo, oid, None, false).map(Some),
        _ => Ok(None),
    }
}

/// Format a save's name from its author timestamp, in local time.
///
/// The timestamp comes straight out of commit bytes, so nothing about
/// it can be trusted: out-of-range values are an error, and a local
/// time made ambiguous by a DST fold takes the earlier reading.
pub fn save_name(author_sec: i64) -> Result<String> {
    let when = match Local.timestamp_opt(author_sec, 0) {
        LocalResult::Single(when) => when,
        LocalResult::Ambiguous(earlier, _) => earlier,
        LocalResult::None => {
            return Err(Error::Repo(anyhow!(
                "author timestamp {author_sec} is out of range"
            )));
        }
    };
    Ok(when.format("%Y-%m-%d-%H%M%S").to_string())
}

/// Append reverse-numbered suffixes to runs of duplicate names: a run
/// of `n` equal names becomes `name-(n-1)` .. `name-0` in encounter
/// order, zero-padded to a common width. Unique names pass through
/// untouched.
pub fn reverse_suffix_duplicates(names: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(names.len());
    let mut i = 0;
    while i < names.len() {
        let mut j = i + 1;
        while j < names.len() && names[j] == names[i] {
            j += 1;
        }
        let run = j - i;
        if run == 1 {
            out.push(names[i].clone());
        } else {
            let width = (run - 1).to_string().len();
            for k in (0..run).rev() {
                out.push(format!("{}-{:0width$}", names[i], k));
            }
        }
        i = j;
    }
    out
}

/// Every entry of a branch's virtual directory except `"."`:
/// one per save, newest first, then `"latest"`. Cached by tip commit.
fn revlist_entries(repo: &dyn Repo, tip: &ObjectId) -> Result<Arc<Vec<(String, Item)>>> {
    if let Some(entries) = cache::get_revlist(tip) {
        return Ok(entries);
    }
    let log = repo.log_first_parents(tip)?;
    let names = log
        .iter()
        .map(|rev| save_name(rev.author_sec))
        .collect::<Result<Vec<_>>>()?;
    let names = reverse_suffix_duplicates(&names);
    let mut entries = Vec::with_capacity(log.len() + 1);
    for (name, rev) in names.into_iter().zip(&log) {
        entries.push((name, commit_item(repo, &rev.coid, Some(rev.tree), true)?));
    }
    if let Some(tip_rev) = log.first() {
        entries.push((
            "latest".to_owned(),
            commit_item(repo, &tip_rev.coid, Some(tip_rev.tree), true)?,
        ));
    }
    let entries = Arc::new(entries);
    cache::put_revlist(*tip, entries.clone());
    Ok(entries)
}

/// Lazily yields the `(name, item)` pairs of a directory-like item,
/// starting with `"."`.
///
/// Tree listings decode their metadata records as they go, so a caller
/// that stops early doesn't pay for the rest.
pub struct Contents {
    inner: ContentsInner,
}

enum ContentsInner {
    Fixed(std::vec::IntoIter<(String, Item)>),
    Tree(TreeContents),
}

impl Iterator for Contents {
    type Item = Result<(String, Item)>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            ContentsInner::Fixed(it) => it.next().map(Ok),
            ContentsInner::Tree(it) => it.next(),
        }
    }
}

struct TreeContents {
    oid: ObjectId,
    entries: std::vec::IntoIter<TreeEntry>,
    bupm: Option<MetaStream>,
    dot: Option<(String, Item)>,
    /// Everything handed out so far; becomes the cached listing if the
    /// caller walks the whole tree.
    yielded: Vec<(String, Item)>,
    done: bool,
    failed: bool,
}

impl Iterator for TreeContents {
    type Item = Result<(String, Item)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.done {
            return None;
        }
        if let Some(dot) = self.dot.take() {
            self.yielded.push(dot.clone());
            return Some(Ok(dot));
        }
        match self.next_child() {
            Ok(Some(pair)) => {
                self.yielded.push(pair.clone());
                Some(Ok(pair))
            }
            // A fully-walked tree is worth remembering.
            Ok(None) => {
                self.done = true;
                cache::put_tree(self.oid, Arc::new(std::mem::take(&mut self.yielded)));
                None
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl TreeContents {
    fn next_child(&mut self) -> Result<Option<(String, Item)>> {
        let Some(entry) = self.entries.next() else {
            return Ok(None);
        };
        let item = match entry.kind {
            EntryKind::Directory => Item::Entry {
                oid: entry.oid,
                meta: ItemMeta::Mode(DEFAULT_DIR_MODE),
            },
            EntryKind::File | EntryKind::Commit => Item::Entry {
                oid: entry.oid,
                meta: self.take_meta(DEFAULT_FILE_MODE)?,
            },
            EntryKind::Symlink => Item::Entry {
                oid: entry.oid,
                meta: self.take_meta(DEFAULT_SYMLINK_MODE)?,
            },
            EntryKind::Chunked => Item::Chunked {
                oid: entry.oid,
                meta: self.take_meta(DEFAULT_FILE_MODE)?,
            },
        };
        Ok(Some((entry.name, item)))
    }

    /// The next record of the metadata stream, or a bare default mode
    /// when the tree has no stream (or it ran dry).
    fn take_meta(&mut self, fallback_mode: u32) -> Result<ItemMeta> {
        if let Some(stream) = &mut self.bupm {
            match stream.next_record()? {
                Some(meta) => return Ok(ItemMeta::from(meta)),
                None => warn!(
                    "metadata stream {} ran dry; falling back to default modes",
                    stream.oid.short_name()
                ),
            }
        }
        Ok(ItemMeta::Mode(fallback_mode))
    }
}

/// Descending into a commit's tree teaches us its real metadata;
/// keep the upgraded item around for the next lookup.
fn upgrade_commit(listed: &Item, dot_meta: &ItemMeta) {
    if let (Item::Commit { coid, .. }, ItemMeta::Full(_)) = (listed, dot_meta) {
        cache::put_commit(*coid, listed.replace_meta(dot_meta.clone()));
    }
}

/// The listing of a real tree, served from the cache when a previous
/// full walk of the same oid is still around.
fn tree_listing(repo: &dyn Repo, tree_oid: ObjectId, listed: &Item) -> Result<ContentsInner> {
    if let Some(cached) = cache::get_tree(&tree_oid) {
        if let Some(dot_meta) = cached.first().and_then(|(_, dot)| dot.meta()) {
            upgrade_commit(listed, dot_meta);
        }
        return Ok(ContentsInner::Fixed(cached.to_vec().into_iter()));
    }
    Ok(ContentsInner::Tree(tree_contents(repo, tree_oid, listed)?))
}

fn tree_contents(repo: &dyn Repo, tree_oid: ObjectId, listed: &Item) -> Result<TreeContents> {
    let data = read_tree(repo, &tree_oid)?;
    let (entries, bupm_entry) = tree::entries_and_bupm(&data).map_err(|e| invalid(&tree_oid, e))?;
    let mut bupm = match &bupm_entry {
        Some(entry) => Some(MetaStream::open(repo, &entry.oid)?),
        None => None,
    };
    // Entries and metadata records only zip up in name order.
    let entries = tree::ordered_entries(entries, bupm.is_some());
    let dot_meta = match &mut bupm {
        Some(stream) => match stream.next_record()? {
            Some(meta) => ItemMeta::from(meta),
            None => ItemMeta::Mode(DEFAULT_DIR_MODE),
        },
        None => ItemMeta::Mode(DEFAULT_DIR_MODE),
    };
    upgrade_commit(listed, &dot_meta);
    let dot = (
        ".".to_owned(),
        Item::Entry {
            oid: tree_oid,
            meta: dot_meta,
        },
    );
    Ok(TreeContents {
        oid: tree_oid,
        entries: entries.into_iter(),
        bupm,
        dot: Some(dot),
        yielded: Vec::new(),
        done: false,
        failed: false,
    })
}

/// List a directory-like item.
///
/// Every listing starts with `(".", ...)` carrying the directory's own
/// metadata. Listing anything that isn't directory-like (including a
/// chunked file, whatever its gitmode says) is `NotADirectory`.
pub fn contents(repo: &dyn Repo, item: &Item) -> Result<Contents> {
    let fixed = |v: Vec<(String, Item)>| ContentsInner::Fixed(v.into_iter());
    let inner = match item {
        Item::Root => fixed(root_contents(repo)?),
        Item::Tags => fixed(tags_contents(repo)?),
        Item::RevList { oid, .. } => {
            let mut listing = vec![(".".to_owned(), item.clone())];
            listing.extend(revlist_entries(repo, oid)?.iter().cloned());
            fixed(listing)
        }
        Item::Commit { oid, .. } => tree_listing(repo, *oid, item)?,
        Item::Entry { oid, .. } if is_dir_item(item) => tree_listing(repo, *oid, item)?,
        _ => return Err(Error::NotADirectory { terminus: None }),
    };
    Ok(Contents { inner })
}

fn root_contents(repo: &dyn Repo) -> Result<Vec<(String, Item)>> {
    let mut listing = vec![
        (".".to_owned(), Item::Root),
        (".tag".to_owned(), Item::Tags),
    ];
    for (name, tip) in repo.list_refs("refs/heads/")? {
        listing.push((name, revlist_item(repo, &tip)?));
    }
    Ok(listing)
}

fn tags_contents(repo: &dyn Repo) -> Result<Vec<(String, Item)>> {
    let mut listing = vec![(".".to_owned(), Item::Tags)];
    for (name, oid) in repo.list_refs("refs/tags/")? {
        match tag_item(repo, &oid)? {
            Some(item) => listing.push((name, item)),
            None => debug!("tag {name} doesn't point at a commit; skipping"),
        }
    }
    Ok(listing)
}

/// Find a single name in a directory-like item without materializing
/// the whole listing.
fn lookup(repo: &dyn Repo, parent: &Item, name: &str) -> Result<Option<Item>> {
    match parent {
        Item::Root => {
            if name == ".tag" {
                return Ok(Some(Item::Tags));
            }
            match repo.resolve_ref(&format!("refs/heads/{name}"))? {
                Some(tip) => Ok(Some(revlist_item(repo, &tip)?)),
                None => Ok(None),
            }
        }
        Item::Tags => match repo.resolve_ref(&format!("refs/tags/{name}"))? {
            Some(oid) => tag_item(repo, &oid),
            None => Ok(None),
        },
        Item::RevList { oid, .. } => Ok(revlist_entries(repo, oid)?
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, item)| item.clone())),
        Item::Commit { .. } | Item::Entry { .. } => {
            for pair in contents(repo, parent)? {
                let (n, item) = pair?;
                if n == name {
                    return Ok(Some(item));
                }
            }
            Ok(None)
        }
        _ => Err(Error::NotADirectory { terminus: None }),
    }
}

/// Break a path into (is_absolute, must_treat_as_dir, reversed
/// components). Empty components and `.` are no-ops; a trailing `/` or
/// `/.` (or a path that boils down to nothing at all) forces directory
/// interpretation of whatever the path lands on.
fn decompose_path(path: &str) -> (bool, bool, Vec<String>) {
    let is_absolute = path.starts_with('/');
    let mut must_be_dir = path.ends_with('/') || path.ends_with("/.");
    let mut parts: Vec<String> = path
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_owned)
        .collect();
    if parts.is_empty() {
        must_be_dir = true;
    }
    parts.reverse();
    (is_absolute, must_be_dir, parts)
}

/// Resolve `path` to a chain of `(name, item)` pairs, following
/// symlinks everywhere - including one the path ends on.
///
/// A relative path resolves against `parent` (its last item must be a
/// directory); an absolute one anchors at the root. A missing *final*
/// component isn't an error: the chain comes back ending in
/// `(name, None)`. Anything else that goes wrong is an [`Error`]
/// carrying the chain walked so far as its terminus.
pub fn resolve(repo: &dyn Repo, path: &str, parent: Option<&[(String, Option<Item>)]>) -> Result<Chain> {
    resolve_path(repo, path, parent, true)
}

/// [`resolve`], except a symlink in the *last* position is returned
/// itself rather than followed. A trailing `/` still forces the follow,
/// since it promises a directory.
pub fn lresolve(repo: &dyn Repo, path: &str, parent: Option<&[(String, Option<Item>)]>) -> Result<Chain> {
    resolve_path(repo, path, parent, false)
}

fn resolve_path(
    repo: &dyn Repo,
    path: &str,
    parent: Option<&[(String, Option<Item>)]>,
    follow: bool,
) -> Result<Chain> {
    trace!("resolving {path:?}");
    if let Some(parent) = parent {
        let parent_is_dir = parent
            .last()
            .and_then(|(_, item)| item.as_ref())
            .is_some_and(is_dir_item);
        if !parent_is_dir {
            return Err(Error::NotADirectory { terminus: None });
        }
    }
    let (is_absolute, must_be_dir, mut future) = decompose_path(path);
    let follow = follow || must_be_dir;
    let root_chain = || vec![(String::new(), Some(Item::Root))];
    if future.is_empty() {
        // The path was effectively "/" or "."
        if is_absolute {
            return Ok(root_chain());
        }
        if let Some(parent) = parent {
            return Ok(parent.to_vec());
        }
        return Ok(root_chain());
    }
    let mut past: Chain = if is_absolute {
        root_chain()
    } else {
        parent.map(|p| p.to_vec()).unwrap_or_else(root_chain)
    };
    let mut hops = 0;
    loop {
        let Some(segment) = future.pop() else {
            let tail_is_dir = past
                .last()
                .and_then(|(_, item)| item.as_ref())
                .is_some_and(is_dir_item);
            if must_be_dir && !tail_is_dir {
                return Err(Error::NotADirectory {
                    terminus: Some(past),
                });
            }
            return Ok(past);
        };
        if segment == ".." {
            // ".." from the root is a no-op
            if past.len() > 1 {
                let tail = past
                    .last()
                    .and_then(|(_, item)| item.as_ref())
                    .expect("only the final chain entry can be absent");
                if !is_dir_item(tail) {
                    return Err(Error::NotADirectory {
                        terminus: Some(past),
                    });
                }
                past.pop();
            }
            continue;
        }
        let tail = past
            .last()
            .and_then(|(_, item)| item.as_ref())
            .expect("only the final chain entry can be absent")
            .clone();
        if !is_dir_item(&tail) {
            return Err(Error::NotADirectory {
                terminus: Some(past),
            });
        }
        let Some(mut item) = lookup(repo, &tail, &segment)? else {
            past.push((segment, None));
            if future.is_empty() {
                return Ok(past);
            }
            return Err(Error::NotADirectory {
                terminus: Some(past),
            });
        };
        if is_dir_item(&item) {
            item = fill_in_metadata_if_dir(repo, item)?;
        }
        let chase = metadata::is_symlink(item_mode(&item)) && (follow || !future.is_empty());
        past.push((segment, Some(item)));
        if chase {
            hops += 1;
            counters::SYMLINKS_CHASED.bump();
            if hops > MAX_SYMLINK_HOPS {
                return Err(Error::TooManyLinks { terminus: past });
            }
            let target = {
                let (_, link) = past.last().unwrap();
                readlink(repo, link.as_ref().unwrap())?
            };
            let (target_absolute, _, target_parts) = decompose_path(&target);
            if target_absolute {
                past = root_chain();
            } else {
                // The link itself doesn't belong in the chain;
                // whatever it points at does.
                past.pop();
            }
            // Both stacks are reversed, so this queues the target's
            // components ahead of the rest of the path.
            future.extend(target_parts);
        }
    }
}
