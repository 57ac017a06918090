//! Committing an overlay and reading it back through a fresh session.

mod common;

use common::{commit_files, init_tracing, memory_store, open, read_text, write_file};
use gitvfs_kernel::{GfsError, ObjectStore, SessionTarget};

#[test]
fn test_dirty_paths_roundtrip_and_untouched_ids_survive() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(
        &store,
        None,
        &[
            ("README.md", "hello\n"),
            ("src/lib.rs", "pub fn one() {}\n"),
            ("src/util/mod.rs", "// util\n"),
            ("docs/guide.md", "guide\n"),
        ],
        "initial",
    );

    let (_r, before) = open(&store, SessionTarget::Commit(base));
    let untouched = ["/docs/guide.md", "/src/util/mod.rs", "/docs", "/src/util"];
    let ids: Vec<_> = untouched
        .iter()
        .map(|p| before.resolve(*p).unwrap().unwrap().object_id().unwrap())
        .collect();

    let (_r, session) = open(&store, SessionTarget::Commit(base));
    write_file(&session, "/src/lib.rs", b"pub fn two() {}\n");
    session.create_file("/src/new.rs", b"\0binary\xff", true).unwrap();
    session.delete("/README.md").unwrap();
    session.create_directory("/empty").unwrap();
    session.create_symlink("/latest", "docs/guide.md").unwrap();
    assert!(session.has_uncommitted_changes().unwrap());

    let commit = session.commit("second", false).unwrap();
    assert!(!session.has_uncommitted_changes().unwrap());
    assert_eq!(session.base_commit().unwrap(), Some(commit));
    assert_eq!(store.fetch_commit(&commit).unwrap().parents, vec![base]);

    let (_r, fresh) = open(&store, SessionTarget::Commit(commit));
    assert_eq!(read_text(&fresh, "/src/lib.rs"), "pub fn two() {}\n");
    assert_eq!(fresh.read_bytes("/src/new.rs").unwrap(), b"\0binary\xff");
    assert!(fresh.attr("/src/new.rs").unwrap().executable);
    assert!(!fresh.exists("/README.md").unwrap());
    assert!(fresh.list("/empty").unwrap().is_empty());
    assert_eq!(fresh.read_symlink("/latest").unwrap(), "docs/guide.md");

    for (path, id) in untouched.iter().zip(ids) {
        assert_eq!(
            fresh.resolve(*path).unwrap().unwrap().object_id(),
            Some(id),
            "{path} changed id"
        );
    }
}

#[test]
fn test_second_commit_without_changes_is_empty() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("a", "1")], "initial");
    let (_r, session) = open(&store, SessionTarget::Commit(base));

    assert!(matches!(session.commit("noop", false), Err(GfsError::EmptyCommit)));
    let forced = session.commit("noop", true).unwrap();
    assert_eq!(
        store.fetch_commit(&forced).unwrap().tree,
        store.fetch_commit(&base).unwrap().tree
    );

    // Changing a file back to its committed content is also empty.
    write_file(&session, "/a", b"2");
    write_file(&session, "/a", b"1");
    assert!(matches!(session.commit("back", false), Err(GfsError::EmptyCommit)));
}

#[test]
fn test_executable_bit_alone_is_a_change() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("run.sh", "#!/bin/sh\n")], "initial");
    let (_r, session) = open(&store, SessionTarget::Commit(base));
    let before = session.resolve("/run.sh").unwrap().unwrap().object_id();

    session.set_executable("/run.sh", true).unwrap();
    assert!(session.has_uncommitted_changes().unwrap());
    let commit = session.commit("chmod", false).unwrap();

    let (_r, fresh) = open(&store, SessionTarget::Commit(commit));
    let node = fresh.resolve("/run.sh").unwrap().unwrap();
    assert!(node.is_executable());
    assert_eq!(node.object_id(), before);
}

#[test]
fn test_moves_and_copies_commit() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(
        &store,
        None,
        &[("a/one.txt", "one\n"), ("a/two.txt", "two\n")],
        "initial",
    );
    let (_r, session) = open(&store, SessionTarget::Commit(base));
    session.copy("/a", "/b", false).unwrap();
    session.move_node("/a/one.txt", "/one.txt", false).unwrap();
    write_file(&session, "/b/two.txt", b"TWO\n");
    let commit = session.commit("shuffle", false).unwrap();

    let (_r, fresh) = open(&store, SessionTarget::Commit(commit));
    assert_eq!(read_text(&fresh, "/one.txt"), "one\n");
    assert_eq!(read_text(&fresh, "/a/two.txt"), "two\n");
    assert_eq!(read_text(&fresh, "/b/one.txt"), "one\n");
    assert_eq!(read_text(&fresh, "/b/two.txt"), "TWO\n");
    assert!(!fresh.exists("/a/one.txt").unwrap());
}

#[test]
fn test_tree_session_first_commit_has_no_parent() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("x", "x")], "initial");
    let tree = store.fetch_commit(&base).unwrap().tree;

    let (_r, session) = open(&store, SessionTarget::Tree(tree));
    assert_eq!(session.base_commit().unwrap(), None);
    let commit = session.commit("from tree", false).unwrap();
    let data = store.fetch_commit(&commit).unwrap();
    assert!(data.parents.is_empty());
    assert_eq!(data.tree, tree);
}

#[test]
fn test_eviction_keeps_content_readable() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("d/f", "content")], "initial");
    let (_r, session) = open(&store, SessionTarget::Commit(base));
    assert_eq!(read_text(&session, "/d/f"), "content");
    assert!(session.evict_clean().unwrap() > 0);
    assert_eq!(read_text(&session, "/d/f"), "content");

    write_file(&session, "/d/g", b"dirty");
    session.evict_clean().unwrap();
    assert_eq!(read_text(&session, "/d/g"), "dirty");
    assert!(session.has_uncommitted_changes().unwrap());
}
