//! The synthesized per-branch revision list.

mod common;

use common::*;

use holdfast_vfs::counters;
use holdfast_vfs::repo::memory::MemoryRepo;
use holdfast_vfs::vfs::{self, Item};

type Result<T = ()> = vfs::Result<T>;

/// One tree saved `count` times in a row, every save at `sec`.
fn repeated_saves(count: usize, sec: i64) -> (MemoryRepo, Vec<holdfast_vfs::hashing::ObjectId>) {
    let mut repo = MemoryRepo::new();
    let canary_oid = repo.put_blob(b"canary\n");
    let tree = write_dir(
        &mut repo,
        &dir_meta(),
        &[Child::file("file", canary_oid, file_meta(7))],
    );
    let mut commits: Vec<holdfast_vfs::hashing::ObjectId> = Vec::with_capacity(count);
    for i in 0..count {
        let parent = commits.last().copied();
        let commit = repo.put_commit(&tree, parent.as_ref(), sec, &format!("save {i}\n"));
        commits.push(commit);
    }
    repo.update_ref("refs/heads/test", *commits.last().unwrap());
    (repo, commits)
}

#[test]
fn eleven_saves_in_one_second_stay_distinct() -> Result {
    init();
    let (repo, commits) = repeated_saves(11, SAVE_TIME);

    vfs::clear_cache();
    let res = vfs::resolve(&repo, "/test", None)?;
    assert_eq!(res.len(), 2);
    let revlist = res.last().unwrap().1.clone().unwrap();

    let listing: Vec<(String, Item)> = vfs::contents(&repo, &revlist)?.collect::<Result<_>>()?;
    let mut names: Vec<&str> = listing.iter().map(|(n, _)| n.as_str()).collect();
    names.sort_unstable();

    let stem = vfs::save_name(SAVE_TIME)?;
    let mut expected: Vec<String> = (0..11).map(|n| format!("{stem}-{n:02}")).collect();
    expected.insert(0, ".".to_owned());
    expected.push("latest".to_owned());
    assert_eq!(names, expected.iter().map(String::as_str).collect::<Vec<_>>());

    // The highest suffix is the newest save; the lowest, the oldest.
    let find = |wanted: String| {
        listing
            .iter()
            .find(|(n, _)| *n == wanted)
            .unwrap()
            .1
            .clone()
    };
    let tip = *commits.last().unwrap();
    let oldest = commits[0];
    assert!(matches!(
        find(format!("{stem}-10")),
        Item::Commit { coid, .. } if coid == tip
    ));
    assert!(matches!(
        find(format!("{stem}-00")),
        Item::Commit { coid, .. } if coid == oldest
    ));
    assert!(matches!(
        find("latest".to_owned()),
        Item::Commit { coid, .. } if coid == tip
    ));
    Ok(())
}

#[test]
fn two_duplicates_get_single_digit_suffixes() -> Result {
    init();
    let (repo, _) = repeated_saves(2, SAVE_TIME);

    vfs::clear_cache();
    let res = vfs::resolve(&repo, "/test", None)?;
    let revlist = res.last().unwrap().1.clone().unwrap();
    let mut names: Vec<String> = vfs::contents(&repo, &revlist)?
        .map(|pair| pair.map(|(n, _)| n))
        .collect::<Result<_>>()?;
    names.sort_unstable();

    let stem = vfs::save_name(SAVE_TIME)?;
    assert_eq!(
        names,
        [".".to_owned(), format!("{stem}-0"), format!("{stem}-1"), "latest".to_owned()]
    );
    Ok(())
}

#[test]
fn distinct_save_times_keep_plain_names() -> Result {
    init();

    let mut repo = MemoryRepo::new();
    let canary_oid = repo.put_blob(b"canary\n");
    let tree = write_dir(
        &mut repo,
        &dir_meta(),
        &[Child::file("file", canary_oid, file_meta(7))],
    );
    let first = repo.put_commit(&tree, None, SAVE_TIME, "save 0\n");
    let second = repo.put_commit(&tree, Some(&first), SAVE_TIME + 60, "save 1\n");
    repo.update_ref("refs/heads/test", second);

    vfs::clear_cache();
    let res = vfs::resolve(&repo, "/test", None)?;
    let revlist = res.last().unwrap().1.clone().unwrap();
    let names: Vec<String> = vfs::contents(&repo, &revlist)?
        .map(|pair| pair.map(|(n, _)| n))
        .collect::<Result<_>>()?;

    // Newest first, then the alias.
    assert_eq!(
        names,
        [
            ".".to_owned(),
            vfs::save_name(SAVE_TIME + 60)?,
            vfs::save_name(SAVE_TIME)?,
            "latest".to_owned(),
        ]
    );
    Ok(())
}

#[test]
fn saves_resolve_by_their_timestamped_names() -> Result {
    init();
    let (repo, commits) = repeated_saves(2, SAVE_TIME);

    let stem = vfs::save_name(SAVE_TIME)?;
    vfs::clear_cache();
    let res = vfs::resolve(&repo, &format!("/test/{stem}-1"), None)?;
    match &res.last().unwrap().1 {
        Some(Item::Commit { coid, .. }) => assert_eq!(*coid, *commits.last().unwrap()),
        other => panic!("expected a commit, got {other:?}"),
    }

    counters::log_tallies();
    Ok(())
}
