//! Three-way merges between sessions.

mod common;

use common::{commit_files, init_tracing, memory_store, open, read_text, write_file};
use gitvfs_kernel::merge::diff3::{OURS_MARKER, THEIRS_MARKER};
use gitvfs_kernel::{GfsError, MergeKind, ObjectStore, SessionTarget};

const BASE_TEXT: &str = "one\ntwo\nthree\nfour\nfive\nsix\nseven\n";

#[test]
fn test_disjoint_changes_merge_into_two_parent_commit() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(
        &store,
        None,
        &[("notes.txt", BASE_TEXT), ("keep.txt", "keep\n")],
        "base",
    );
    let ours = commit_files(
        &store,
        Some(base),
        &[
            ("notes.txt", "ONE\ntwo\nthree\nfour\nfive\nsix\nseven\n"),
            ("ours.txt", "mine\n"),
        ],
        "ours",
    );
    let theirs = commit_files(
        &store,
        Some(base),
        &[
            ("notes.txt", "one\ntwo\nthree\nfour\nfive\nsix\nSEVEN\n"),
            ("dir/theirs.txt", "yours\n"),
        ],
        "theirs",
    );

    let (_r, session) = open(&store, SessionTarget::Commit(ours));
    let result = session.merge(theirs).unwrap();
    assert!(result.succeeded);
    assert!(result.conflicted_paths.is_empty());
    assert_eq!(result.kind, MergeKind::Merged);

    let merge_commit = result.commit.unwrap();
    assert_eq!(session.base_commit().unwrap(), Some(merge_commit));
    assert_eq!(
        store.fetch_commit(&merge_commit).unwrap().parents,
        vec![ours, theirs]
    );
    assert!(!session.has_uncommitted_changes().unwrap());

    let (_r, fresh) = open(&store, SessionTarget::Commit(merge_commit));
    assert_eq!(
        read_text(&fresh, "/notes.txt"),
        "ONE\ntwo\nthree\nfour\nfive\nsix\nSEVEN\n"
    );
    assert_eq!(read_text(&fresh, "/ours.txt"), "mine\n");
    assert_eq!(read_text(&fresh, "/dir/theirs.txt"), "yours\n");
    assert_eq!(read_text(&fresh, "/keep.txt"), "keep\n");
}

#[test]
fn test_conflicting_edits_leave_session_uncommitted() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("notes.txt", BASE_TEXT)], "base");
    let ours = commit_files(
        &store,
        Some(base),
        &[("notes.txt", "one\ntwo\nours\nfour\nfive\nsix\nseven\n")],
        "ours",
    );
    let theirs = commit_files(
        &store,
        Some(base),
        &[("notes.txt", "one\ntwo\ntheirs\nfour\nfive\nsix\nseven\n")],
        "theirs",
    );

    let (_r, session) = open(&store, SessionTarget::Commit(ours));
    let result = session.merge(theirs).unwrap();
    assert!(!result.succeeded);
    assert_eq!(result.kind, MergeKind::Conflicted);
    assert_eq!(result.commit, None);
    let conflicted: Vec<String> = result
        .conflicted_paths
        .iter()
        .map(|p| p.to_string())
        .collect();
    assert_eq!(conflicted, vec!["/notes.txt"]);

    assert_eq!(session.base_commit().unwrap(), Some(ours));
    assert!(session.has_uncommitted_changes().unwrap());
    let text = read_text(&session, "/notes.txt");
    assert!(text.contains(OURS_MARKER));
    assert!(text.contains("ours\n=======\ntheirs\n"));
    assert!(text.contains(THEIRS_MARKER));

    // A second merge is refused until the conflict is committed.
    assert!(matches!(
        session.merge(theirs),
        Err(GfsError::UncommittedChanges)
    ));

    write_file(&session, "/notes.txt", b"resolved\n");
    let resolved = session.commit("resolve", false).unwrap();
    assert_eq!(
        store.fetch_commit(&resolved).unwrap().parents,
        vec![ours, theirs]
    );
    assert!(!session.has_uncommitted_changes().unwrap());
}

#[test]
fn test_binary_conflict_keeps_ours() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("blob.bin", "\0base")], "base");
    let ours = commit_files(&store, Some(base), &[("blob.bin", "\0ours")], "ours");
    let theirs = commit_files(&store, Some(base), &[("blob.bin", "\0theirs")], "theirs");

    let (_r, session) = open(&store, SessionTarget::Commit(ours));
    let result = session.merge(theirs).unwrap();
    assert!(!result.succeeded);
    assert_eq!(result.conflicted_paths.len(), 1);
    assert_eq!(session.read_bytes("/blob.bin").unwrap(), b"\0ours");
}

#[test]
fn test_delete_against_modify_conflicts() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("f", "base\n"), ("g", "g\n")], "base");

    let (_r, deleter) = open(&store, SessionTarget::Commit(base));
    deleter.delete("/f").unwrap();
    let ours = deleter.commit("delete f", false).unwrap();
    let theirs = commit_files(&store, Some(base), &[("f", "changed\n")], "modify f");

    let (_r, session) = open(&store, SessionTarget::Commit(ours));
    let result = session.merge(theirs).unwrap();
    assert!(!result.succeeded);
    assert_eq!(result.conflicted_paths[0].to_string(), "/f");
    // Their version is kept so the conflict can be resolved either way.
    assert_eq!(read_text(&session, "/f"), "changed\n");
}

#[test]
fn test_fast_forward_and_up_to_date() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("a", "1\n")], "base");
    let ahead = commit_files(&store, Some(base), &[("a", "2\n")], "ahead");

    let (_r, session) = open(&store, SessionTarget::Commit(base));
    let result = session.merge(ahead).unwrap();
    assert!(result.succeeded);
    assert_eq!(result.kind, MergeKind::FastForward);
    assert_eq!(result.commit, Some(ahead));
    assert_eq!(session.base_commit().unwrap(), Some(ahead));
    assert_eq!(read_text(&session, "/a"), "2\n");

    let result = session.merge(base).unwrap();
    assert!(result.succeeded);
    assert_eq!(result.kind, MergeKind::UpToDate);
    assert_eq!(result.commit, None);
    assert_eq!(session.base_commit().unwrap(), Some(ahead));
}

#[test]
fn test_fast_forward_carries_uncommitted_edits() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("a", "1\n")], "base");
    let other = commit_files(&store, Some(base), &[("b", "2\n")], "other");

    let (_r, session) = open(&store, SessionTarget::Commit(base));
    write_file(&session, "/a", b"dirty\n");
    let result = session.merge(other).unwrap();
    assert_eq!(result.kind, MergeKind::FastForward);
    assert_eq!(session.base_commit().unwrap(), Some(other));
    assert!(session.has_uncommitted_changes().unwrap());
    assert_eq!(read_text(&session, "/a"), "dirty\n");
    assert_eq!(read_text(&session, "/b"), "2\n");

    let commit = session.commit("on top", false).unwrap();
    assert_eq!(store.fetch_commit(&commit).unwrap().parents, vec![other]);
    let (_r, fresh) = open(&store, SessionTarget::Commit(commit));
    assert_eq!(read_text(&fresh, "/a"), "dirty\n");
    assert_eq!(read_text(&fresh, "/b"), "2\n");
}

#[test]
fn test_merge_refuses_to_overwrite_uncommitted_edits() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("a", "1\n")], "base");
    let other = commit_files(&store, Some(base), &[("a", "2\n"), ("b", "2\n")], "other");

    let (_r, session) = open(&store, SessionTarget::Commit(base));
    write_file(&session, "/a", b"dirty\n");
    assert!(matches!(
        session.merge(other),
        Err(GfsError::UncommittedChanges)
    ));
    assert_eq!(session.base_commit().unwrap(), Some(base));
    assert_eq!(read_text(&session, "/a"), "dirty\n");
    assert!(!session.exists("/b").unwrap());

    // A local deletion of a path theirs changed is refused the same way.
    let (_r, session) = open(&store, SessionTarget::Commit(base));
    session.delete("/a").unwrap();
    assert!(matches!(
        session.merge(other),
        Err(GfsError::UncommittedChanges)
    ));
    assert!(!session.exists("/a").unwrap());
}

#[test]
fn test_diverged_merge_stages_alongside_uncommitted_edits() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("x", "x\n")], "base");
    let ours = commit_files(&store, Some(base), &[("x", "ours\n")], "ours");
    let theirs = commit_files(&store, Some(base), &[("t/new.txt", "t\n")], "theirs");

    let (_r, session) = open(&store, SessionTarget::Commit(ours));
    write_file(&session, "/local.txt", b"local\n");
    let result = session.merge(theirs).unwrap();
    assert!(result.succeeded);
    assert_eq!(result.kind, MergeKind::Staged);
    assert_eq!(result.commit, None);
    assert_eq!(session.base_commit().unwrap(), Some(ours));
    assert_eq!(read_text(&session, "/t/new.txt"), "t\n");

    let commit = session.commit("merge with local work", false).unwrap();
    assert_eq!(
        store.fetch_commit(&commit).unwrap().parents,
        vec![ours, theirs]
    );
    let (_r, fresh) = open(&store, SessionTarget::Commit(commit));
    assert_eq!(read_text(&fresh, "/x"), "ours\n");
    assert_eq!(read_text(&fresh, "/local.txt"), "local\n");
    assert_eq!(read_text(&fresh, "/t/new.txt"), "t\n");
}

#[test]
fn test_empty_session_fast_forwards() {
    init_tracing();
    let store = memory_store();
    let theirs = commit_files(&store, None, &[("a", "1\n")], "theirs");

    let (_r, session) = open(&store, SessionTarget::Empty);
    let result = session.merge(theirs).unwrap();
    assert_eq!(result.kind, MergeKind::FastForward);
    assert_eq!(session.base_commit().unwrap(), Some(theirs));
    assert!(!session.has_uncommitted_changes().unwrap());
    assert_eq!(read_text(&session, "/a"), "1\n");
}

#[test]
fn test_tree_session_merge_has_theirs_as_only_parent() {
    init_tracing();
    let store = memory_store();
    let own = commit_files(&store, None, &[("own.txt", "o\n")], "own");
    let own_tree = store.fetch_commit(&own).unwrap().tree;
    let theirs = commit_files(&store, None, &[("theirs.txt", "t\n")], "theirs");

    let (_r, session) = open(&store, SessionTarget::Tree(own_tree));
    let result = session.merge(theirs).unwrap();
    assert_eq!(result.kind, MergeKind::Merged);
    let commit = result.commit.unwrap();
    assert_eq!(store.fetch_commit(&commit).unwrap().parents, vec![theirs]);
    assert_eq!(read_text(&session, "/own.txt"), "o\n");
    assert_eq!(read_text(&session, "/theirs.txt"), "t\n");
}

#[test]
fn test_unrelated_histories_merge_against_empty_tree() {
    init_tracing();
    let store = memory_store();
    let ours = commit_files(&store, None, &[("ours.txt", "o\n")], "ours root");
    let theirs = commit_files(&store, None, &[("theirs.txt", "t\n")], "theirs root");

    let (_r, session) = open(&store, SessionTarget::Commit(ours));
    let result = session.merge(theirs).unwrap();
    assert!(result.succeeded);
    assert_eq!(read_text(&session, "/ours.txt"), "o\n");
    assert_eq!(read_text(&session, "/theirs.txt"), "t\n");
}

#[test]
fn test_add_add_same_path_conflicts() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("seed", "s\n")], "base");
    let ours = commit_files(&store, Some(base), &[("new.txt", "ours\n")], "ours");
    let theirs = commit_files(&store, Some(base), &[("new.txt", "theirs\n")], "theirs");

    let (_r, session) = open(&store, SessionTarget::Commit(ours));
    let result = session.merge(theirs).unwrap();
    assert!(!result.succeeded);
    let text = read_text(&session, "/new.txt");
    assert_eq!(text, "<<<<<<< ours\nours\n=======\ntheirs\n>>>>>>> theirs\n");
}

#[test]
fn test_one_sided_mode_change_is_adopted() {
    init_tracing();
    let store = memory_store();
    let base = commit_files(&store, None, &[("run.sh", "echo\n"), ("x", "x\n")], "base");

    let (_r, chmod) = open(&store, SessionTarget::Commit(base));
    chmod.set_executable("/run.sh", true).unwrap();
    let theirs = chmod.commit("chmod", false).unwrap();
    let ours = commit_files(&store, Some(base), &[("x", "y\n")], "edit x");

    let (_r, session) = open(&store, SessionTarget::Commit(ours));
    assert!(session.merge(theirs).unwrap().succeeded);
    assert!(session.attr("/run.sh").unwrap().executable);
    assert_eq!(read_text(&session, "/x"), "y\n");
}
