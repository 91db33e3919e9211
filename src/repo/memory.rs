use super::*;

use std::collections::BTreeMap;

use anyhow::{Context, anyhow, bail, ensure};
use rustc_hash::FxHashMap;

use crate::tree::{self, TreeEntry};

/// A store that keeps every object in a hash map.
///
/// Great for testing
#[derive(Debug, Default)]
pub struct MemoryRepo {
    objects: FxHashMap<ObjectId, (Kind, Vec<u8>)>,
    refs: BTreeMap<String, ObjectId>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_blob(&mut self, bytes: &[u8]) -> ObjectId {
        self.put(Kind::Blob, bytes.to_vec())
    }

    pub fn put_tree(&mut self, entries: &[TreeEntry]) -> Result<ObjectId> {
        let data = tree::encode(entries)?;
        Ok(self.put(Kind::Tree, data))
    }

    /// Store a commit of `tree`, git-style: text headers, then a blank
    /// line and the message.
    pub fn put_commit(
        &mut self,
        tree: &ObjectId,
        parent: Option<&ObjectId>,
        author_sec: i64,
        message: &str,
    ) -> ObjectId {
        let mut text = format!("tree {tree}\n");
        if let Some(p) = parent {
            text.push_str(&format!("parent {p}\n"));
        }
        text.push_str(&format!(
            "author A U Thor <author@example.com> {author_sec} +0000\n"
        ));
        text.push_str(&format!(
            "committer A U Thor <author@example.com> {author_sec} +0000\n"
        ));
        text.push('\n');
        text.push_str(message);
        self.put(Kind::Commit, text.into_bytes())
    }

    pub fn update_ref(&mut self, name: &str, id: ObjectId) {
        self.refs.insert(name.to_owned(), id);
    }

    /// A lightweight tag: just a ref under `refs/tags/`.
    pub fn put_tag(&mut self, name: &str, id: ObjectId) {
        self.update_ref(&format!("refs/tags/{name}"), id);
    }

    fn put(&mut self, kind: Kind, bytes: Vec<u8>) -> ObjectId {
        // Hash over a git-style `<kind> <len>\0` header so objects of
        // different kinds can't collide.
        let mut buf = Vec::with_capacity(bytes.len() + 16);
        buf.extend_from_slice(kind.as_str().as_bytes());
        buf.extend_from_slice(format!(" {}\0", bytes.len()).as_bytes());
        buf.extend_from_slice(&bytes);
        let id = ObjectId::hash(&buf);
        self.objects.insert(id, (kind, bytes));
        id
    }
}

impl Repo for MemoryRepo {
    fn read(&self, id: &ObjectId) -> Result<Option<(Kind, Vec<u8>)>> {
        Ok(self.objects.get(id).map(|(k, b)| (*k, b.clone())))
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>> {
        Ok(self
            .refs
            .iter()
            .filter_map(|(name, id)| name.strip_prefix(prefix).map(|n| (n.to_owned(), *id)))
            .collect())
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        Ok(self.refs.get(name).copied())
    }

    fn log_first_parents(&self, id: &ObjectId) -> Result<Vec<Rev>> {
        let mut revs = Vec::new();
        let mut next = Some(*id);
        while let Some(coid) = next {
            let (kind, bytes) = self
                .read(&coid)?
                .ok_or_else(|| anyhow!("No object {coid}"))?;
            ensure!(
                kind == Kind::Commit,
                "{} is a {}, not a commit",
                coid.short_name(),
                kind.as_str()
            );
            let fields = parse_commit(&bytes)
                .with_context(|| format!("Couldn't parse commit {}", coid.short_name()))?;
            revs.push(Rev {
                coid,
                tree: fields.tree,
                author_sec: fields.author_sec,
            });
            next = fields.parent;
        }
        Ok(revs)
    }
}

struct CommitFields {
    tree: ObjectId,
    parent: Option<ObjectId>,
    author_sec: i64,
}

fn parse_commit(bytes: &[u8]) -> Result<CommitFields> {
    let text = std::str::from_utf8(bytes).context("Commit isn't UTF-8")?;
    let mut tree = None;
    let mut parent = None;
    let mut author_sec = None;
    for line in text.lines() {
        // Headers end at the blank line; the rest is the message.
        if line.is_empty() {
            break;
        }
        let Some((key, rest)) = line.split_once(' ') else {
            bail!("Malformed commit header {line:?}");
        };
        match key {
            "tree" => tree = Some(rest.parse()?),
            // Only the first parent matters for our logs.
            "parent" => {
                if parent.is_none() {
                    parent = Some(rest.parse()?);
                }
            }
            "author" => {
                // author NAME <EMAIL> SECONDS ZONE
                let mut fields = rest.rsplitn(3, ' ');
                let _zone = fields.next();
                let secs = fields
                    .next()
                    .ok_or_else(|| anyhow!("Malformed author line {rest:?}"))?;
                author_sec = Some(secs.parse().context("Bad author timestamp")?);
            }
            _ => {} // committer, encoding, ...
        }
    }
    Ok(CommitFields {
        tree: tree.ok_or_else(|| anyhow!("Commit has no tree"))?,
        parent,
        author_sec: author_sec.ok_or_else(|| anyhow!("Commit has no author"))?,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn blobs_round_trip() -> Result<()> {
        init();

        let mut repo = MemoryRepo::new();
        let id = repo.put_blob(b"canary\n");
        let (kind, bytes) = repo.read(&id)?.unwrap();
        assert_eq!(kind, Kind::Blob);
        assert_eq!(bytes, b"canary\n");
        assert_eq!(repo.read(&ObjectId::hash(b"missing"))?, None);
        Ok(())
    }

    #[test]
    fn kinds_do_not_collide() {
        init();

        let mut repo = MemoryRepo::new();
        let blob = repo.put_blob(b"");
        let tree = repo.put_tree(&[]).unwrap();
        assert_ne!(blob, tree);
    }

    #[test]
    fn logs_follow_first_parents() -> Result<()> {
        init();

        let mut repo = MemoryRepo::new();
        let tree = repo.put_tree(&[])?;
        let first = repo.put_commit(&tree, None, 100, "first");
        let second = repo.put_commit(&tree, Some(&first), 200, "second");

        let log = repo.log_first_parents(&second)?;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], Rev { coid: second, tree, author_sec: 200 });
        assert_eq!(log[1], Rev { coid: first, tree, author_sec: 100 });
        Ok(())
    }

    #[test]
    fn refs_list_by_prefix() -> Result<()> {
        init();

        let mut repo = MemoryRepo::new();
        let tree = repo.put_tree(&[])?;
        let c = repo.put_commit(&tree, None, 100, "save");
        repo.update_ref("refs/heads/test", c);
        repo.put_tag("test-tag", c);

        assert_eq!(repo.list_refs("refs/heads/")?, vec![("test".to_owned(), c)]);
        assert_eq!(
            repo.list_refs("refs/tags/")?,
            vec![("test-tag".to_owned(), c)]
        );
        assert_eq!(repo.resolve_ref("refs/heads/test")?, Some(c));
        assert_eq!(repo.resolve_ref("refs/heads/nope")?, None);
        Ok(())
    }
}
