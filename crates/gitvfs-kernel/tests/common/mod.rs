//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use gitvfs_kernel::{
    ObjectId, ObjectStore, Session, SessionRegistry, SessionTarget, MemoryObjectStore,
};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test subscriber once per binary. `RUST_LOG` controls output.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn memory_store() -> Arc<dyn ObjectStore> {
    Arc::new(MemoryObjectStore::new())
}

/// Open a session on `target` in a private registry.
pub fn open(store: &Arc<dyn ObjectStore>, target: SessionTarget) -> (SessionRegistry, Arc<Session>) {
    let registry = SessionRegistry::new();
    let session = registry
        .open_session(store.clone(), target, None)
        .expect("open session");
    (registry, session)
}

/// Write `files` (creating parent directories) on top of `parent` and
/// commit. Returns the new commit.
pub fn commit_files(
    store: &Arc<dyn ObjectStore>,
    parent: Option<ObjectId>,
    files: &[(&str, &str)],
    message: &str,
) -> ObjectId {
    let target = parent.map_or(SessionTarget::Empty, SessionTarget::Commit);
    let (_registry, session) = open(store, target);
    for (path, content) in files {
        write_file(&session, path, content.as_bytes());
    }
    session.commit(message, false).expect("commit")
}

/// Create or overwrite a file, creating parents as needed.
pub fn write_file(session: &Session, path: &str, content: &[u8]) {
    let path = session.path(path).expect("path");
    if let Some(parent) = path.parent() {
        session.create_directories(&parent).expect("parents");
    }
    if session.exists(&path).expect("exists") {
        session.truncate(&path, 0).expect("truncate");
        session.write_bytes(&path, 0, content).expect("write");
    } else {
        session.create_file(&path, content, false).expect("create");
    }
}

pub fn read_text(session: &Session, path: &str) -> String {
    String::from_utf8(session.read_bytes(path).expect("read")).expect("utf-8")
}
