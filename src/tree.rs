//! Decode and encode the tree objects that name a directory's children
//!
//! A tree is a concatenation of `gitmode SP mangled_name NUL oid20`
//! tuples, sorted the way git sorts them: byte-lexicographically over
//! the stored names, with directories compared as if their names ended
//! in `/`. Names are mangled on the way in - a chunked file gains a
//! `.bup` suffix (its content is a tree of extents, not a blob), and a
//! name that could be mistaken for a mangled one gains a `.bupl`
//! escape. A tree may also carry a `.bupm` entry holding the
//! directory's metadata stream; it is not a child, and decoding splits
//! it off into a side channel.

use std::cmp::Ordering;
use std::io::Write;

use anyhow::{Context, Result, bail, ensure};

use crate::hashing::ObjectId;
use crate::metadata;

/// The stored name of the per-directory metadata stream.
pub const METADATA_NAME: &str = ".bupm";

pub const MODE_FILE: u32 = 0o100644;
pub const MODE_FILE_EXEC: u32 = 0o100755;
pub const MODE_SYMLINK: u32 = 0o120000;
pub const MODE_DIR: u32 = 0o040000;
pub const MODE_COMMIT: u32 = 0o160000;

/// What a tree entry points at, taking its gitmode and mangled name
/// together.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EntryKind {
    File,
    Chunked,
    Symlink,
    Directory,
    Commit,
}

/// A single decoded tree entry.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TreeEntry {
    /// The user-visible (demangled) name
    pub name: String,
    /// The name as stored in the tree
    pub mangled_name: String,
    pub kind: EntryKind,
    pub gitmode: u32,
    pub oid: ObjectId,
}

impl TreeEntry {
    /// Build an entry from its user-visible name, computing the stored
    /// name and gitmode.
    pub fn new(name: &str, kind: EntryKind, oid: ObjectId) -> Self {
        let gitmode = match kind {
            EntryKind::File => MODE_FILE,
            EntryKind::Symlink => MODE_SYMLINK,
            EntryKind::Directory | EntryKind::Chunked => MODE_DIR,
            EntryKind::Commit => MODE_COMMIT,
        };
        Self {
            name: name.to_owned(),
            mangled_name: mangle_name(name, kind),
            kind,
            gitmode,
            oid,
        }
    }

    /// The entry for a directory's own metadata stream.
    pub fn bupm(oid: ObjectId) -> Self {
        Self {
            name: METADATA_NAME.to_owned(),
            mangled_name: METADATA_NAME.to_owned(),
            kind: EntryKind::File,
            gitmode: MODE_FILE,
            oid,
        }
    }
}

/// Mangle a leaf name for storage.
pub fn mangle_name(name: &str, kind: EntryKind) -> String {
    if kind == EntryKind::Chunked {
        format!("{name}.bup")
    } else if name.ends_with(".bup") || name.ends_with(".bupl") || name.ends_with(METADATA_NAME) {
        format!("{name}.bupl")
    } else {
        name.to_owned()
    }
}

/// Recover the user-visible name and kind from a stored name and its
/// gitmode.
pub fn demangle_name(mangled: &str, gitmode: u32) -> Result<(String, EntryKind)> {
    if let Some(stem) = mangled.strip_suffix(".bupl") {
        Ok((stem.to_owned(), kind_for_gitmode(gitmode)?))
    } else if let Some(stem) = mangled.strip_suffix(".bup") {
        ensure!(
            metadata::is_dir(gitmode),
            "Chunked entry {mangled} isn't stored as a tree"
        );
        Ok((stem.to_owned(), EntryKind::Chunked))
    } else {
        Ok((mangled.to_owned(), kind_for_gitmode(gitmode)?))
    }
}

fn kind_for_gitmode(gitmode: u32) -> Result<EntryKind> {
    if metadata::is_dir(gitmode) {
        Ok(EntryKind::Directory)
    } else if metadata::is_symlink(gitmode) {
        Ok(EntryKind::Symlink)
    } else if metadata::is_file(gitmode) {
        Ok(EntryKind::File)
    } else if gitmode & 0o170000 == MODE_COMMIT {
        Ok(EntryKind::Commit)
    } else {
        bail!("Unknown gitmode {gitmode:o}")
    }
}

/// Lazily decodes entries from raw tree bytes.
///
/// Fuses on the first malformed entry.
pub struct TreeIter<'a> {
    data: &'a [u8],
}

pub fn decode(data: &[u8]) -> TreeIter<'_> {
    TreeIter { data }
}

impl Iterator for TreeIter<'_> {
    type Item = Result<TreeEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let parsed = self.parse_next();
        if parsed.is_err() {
            self.data = &[];
        }
        Some(parsed)
    }
}

impl TreeIter<'_> {
    fn parse_next(&mut self) -> Result<TreeEntry> {
        let data = self.data;
        let sp = data
            .iter()
            .position(|b| *b == b' ')
            .context("Truncated tree entry (no mode)")?;
        let gitmode = parse_octal(&data[..sp])?;
        let rest = &data[sp + 1..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .context("Truncated tree entry (no name)")?;
        let mangled = std::str::from_utf8(&rest[..nul]).context("Entry name isn't UTF-8")?;
        let oid_bytes = rest
            .get(nul + 1..nul + 21)
            .context("Truncated tree entry (short oid)")?;
        let oid = ObjectId::from_bytes(oid_bytes)?;
        let (name, kind) = demangle_name(mangled, gitmode)?;
        let entry = TreeEntry {
            name,
            mangled_name: mangled.to_owned(),
            kind,
            gitmode,
            oid,
        };
        self.data = &rest[nul + 21..];
        Ok(entry)
    }
}

fn parse_octal(bytes: &[u8]) -> Result<u32> {
    ensure!(
        !bytes.is_empty() && bytes.len() <= 7,
        "Bad gitmode field length"
    );
    let mut mode = 0u32;
    for b in bytes {
        ensure!(b.is_ascii_digit() && *b <= b'7', "Gitmode isn't octal");
        mode = (mode << 3) | u32::from(b - b'0');
    }
    Ok(mode)
}

/// Parse a whole tree, splitting the metadata entry off from the
/// directory's actual children.
pub fn entries_and_bupm(data: &[u8]) -> Result<(Vec<TreeEntry>, Option<TreeEntry>)> {
    let mut entries = Vec::new();
    let mut bupm = None;
    for entry in decode(data) {
        let entry = entry?;
        if entry.mangled_name == METADATA_NAME {
            bupm = Some(entry);
        } else {
            entries.push(entry);
        }
    }
    Ok((entries, bupm))
}

/// Git sorts tree entries as if directory names (chunked trees
/// included) ended with `/`.
pub fn gitsort_cmp(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let an = a.mangled_name.as_bytes();
    let bn = b.mangled_name.as_bytes();
    let common = an.len().min(bn.len());
    an[..common].cmp(&bn[..common]).then_with(|| {
        let ax = an
            .get(common)
            .copied()
            .or_else(|| metadata::is_dir(a.gitmode).then_some(b'/'));
        let bx = bn
            .get(common)
            .copied()
            .or_else(|| metadata::is_dir(b.gitmode).then_some(b'/'));
        ax.cmp(&bx)
    })
}

/// Put entries in iteration order: git's own order normally, or sorted
/// by demangled name when pairing them with the metadata stream
/// (which is written in name order, not git order).
pub fn ordered_entries(mut entries: Vec<TreeEntry>, for_metadata: bool) -> Vec<TreeEntry> {
    if for_metadata {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
    } else {
        entries.sort_by(gitsort_cmp);
    }
    entries
}

/// Encode entries as raw tree bytes, sorting them into git order.
pub fn encode(entries: &[TreeEntry]) -> Result<Vec<u8>> {
    let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| gitsort_cmp(a, b));
    for pair in sorted.windows(2) {
        ensure!(
            pair[0].mangled_name != pair[1].mangled_name,
            "Duplicate tree entry {}",
            pair[0].mangled_name
        );
    }
    let mut out = Vec::new();
    for entry in sorted {
        write!(out, "{:o} {}", entry.gitmode, entry.mangled_name)?;
        out.push(0);
        out.extend_from_slice(entry.oid.as_bytes());
    }
    Ok(out)
}
