#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};

use holdfast_vfs::hashing::ObjectId;
use holdfast_vfs::metadata::Metadata;
use holdfast_vfs::repo::memory::MemoryRepo;
use holdfast_vfs::tree::{EntryKind, TreeEntry};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const SAVE_TIME: i64 = 100_000;

pub fn timestamp(sec: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(sec, 0).unwrap()
}

pub fn posix_meta(mode: u32, size: Option<u64>) -> Metadata {
    let mut m = Metadata::from_mode(mode);
    m.uid = 1000;
    m.gid = 1000;
    m.user = Some("ahab".to_owned());
    m.group = Some("crew".to_owned());
    m.atime = timestamp(SAVE_TIME);
    m.mtime = timestamp(SAVE_TIME);
    m.ctime = timestamp(SAVE_TIME);
    m.size = size;
    m
}

pub fn file_meta(size: u64) -> Metadata {
    posix_meta(0o100644, Some(size))
}

pub fn symlink_meta(target: &str) -> Metadata {
    let mut m = posix_meta(0o120777, Some(target.len() as u64));
    m.symlink_target = Some(target.to_owned());
    m
}

pub fn dir_meta() -> Metadata {
    posix_meta(0o040755, None)
}

/// A directory child to hand to [`write_dir`].
pub struct Child {
    pub name: &'static str,
    pub kind: EntryKind,
    pub oid: ObjectId,
    /// `None` for plain subdirectories, which keep their metadata in
    /// their own trees.
    pub meta: Option<Metadata>,
}

impl Child {
    pub fn file(name: &'static str, oid: ObjectId, meta: Metadata) -> Self {
        Self {
            name,
            kind: EntryKind::File,
            oid,
            meta: Some(meta),
        }
    }

    pub fn symlink(name: &'static str, oid: ObjectId, meta: Metadata) -> Self {
        Self {
            name,
            kind: EntryKind::Symlink,
            oid,
            meta: Some(meta),
        }
    }

    pub fn dir(name: &'static str, oid: ObjectId) -> Self {
        Self {
            name,
            kind: EntryKind::Directory,
            oid,
            meta: None,
        }
    }

    pub fn chunked(name: &'static str, oid: ObjectId, meta: Metadata) -> Self {
        Self {
            name,
            kind: EntryKind::Chunked,
            oid,
            meta: Some(meta),
        }
    }
}

/// Write one saved directory: the `.bupm` stream (the directory's own
/// record first, then one per non-directory child in name order),
/// then the tree pointing at it all.
pub fn write_dir(repo: &mut MemoryRepo, own_meta: &Metadata, children: &[Child]) -> ObjectId {
    let mut by_name: Vec<&Child> = children.iter().collect();
    by_name.sort_by_key(|c| c.name);

    let mut bupm = Vec::new();
    own_meta.write_to(&mut bupm).unwrap();
    for child in &by_name {
        if child.kind != EntryKind::Directory {
            child
                .meta
                .as_ref()
                .expect("non-directory children need metadata")
                .write_to(&mut bupm)
                .unwrap();
        }
    }
    let bupm_oid = repo.put_blob(&bupm);

    let mut entries: Vec<TreeEntry> = children
        .iter()
        .map(|c| TreeEntry::new(c.name, c.kind, c.oid))
        .collect();
    entries.push(TreeEntry::bupm(bupm_oid));
    repo.put_tree(&entries).unwrap()
}

/// The canonical save the resolver scenarios poke at:
///
/// ```text
/// file          "canary\n"
/// file-symlink  -> file
/// dir/          (empty)
/// dir-symlink   -> dir
/// bad-symlink   -> not-there
/// ```
///
/// saved on branch `test` at [`SAVE_TIME`], tagged `test-tag`.
pub struct TestRepo {
    pub repo: MemoryRepo,
    pub tip: ObjectId,
    pub tip_tree: ObjectId,
    /// The save's own metadata (the first record of its bupm)
    pub dot_meta: Metadata,
    pub file_oid: ObjectId,
    pub dir_oid: ObjectId,
    /// `dir`'s own metadata, recorded in `dir`'s tree
    pub dir_dot_meta: Metadata,
    pub file_symlink_oid: ObjectId,
    pub dir_symlink_oid: ObjectId,
    pub bad_symlink_oid: ObjectId,
}

pub fn canonical_repo() -> TestRepo {
    let mut repo = MemoryRepo::new();

    let file_oid = repo.put_blob(b"canary\n");
    let file_symlink_oid = repo.put_blob(b"file");
    let dir_symlink_oid = repo.put_blob(b"dir");
    let bad_symlink_oid = repo.put_blob(b"not-there");

    let mut dir_dot_meta = dir_meta();
    dir_dot_meta.uid = 1001; // tell it apart from the save's own record
    let dir_oid = write_dir(&mut repo, &dir_dot_meta, &[]);

    let dot_meta = dir_meta();
    let tip_tree = write_dir(
        &mut repo,
        &dot_meta,
        &[
            Child::file("file", file_oid, file_meta(7)),
            Child::symlink("file-symlink", file_symlink_oid, symlink_meta("file")),
            Child::dir("dir", dir_oid),
            Child::symlink("dir-symlink", dir_symlink_oid, symlink_meta("dir")),
            Child::symlink("bad-symlink", bad_symlink_oid, symlink_meta("not-there")),
        ],
    );
    let tip = repo.put_commit(&tip_tree, None, SAVE_TIME, "save /src\n");
    repo.update_ref("refs/heads/test", tip);
    repo.put_tag("test-tag", tip);

    TestRepo {
        repo,
        tip,
        tip_tree,
        dot_meta,
        file_oid,
        dir_oid,
        dir_dot_meta,
        file_symlink_oid,
        dir_symlink_oid,
        bad_symlink_oid,
    }
}
