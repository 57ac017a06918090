//! Commit builder.
//!
//! A commit runs in two phases under the exclusive structural lock. The
//! write phase walks the overlay post-order, storing dirty blobs and every
//! tree that changed beneath it, and only records which nodes should become
//! clean. Nothing in the overlay is touched until the commit object (and the
//! branch, if any) is written; a store failure anywhere before that leaves
//! every dirty flag as it was. Objects already stored by the failed attempt
//! are unreachable garbage, never visible through the overlay.

use gitvfs_cas::{CommitMetadata, EntryMode, ObjectId, ObjectStore, TreeEntry};
use tracing::{info, trace};

use crate::error::{GfsError, GfsResult};
use crate::node::{Content, Listing, NodeRef, NodeState};
use crate::overlay::OverlayState;

/// A node as its parent tree will record it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Written {
    pub(crate) id: ObjectId,
    pub(crate) mode: EntryMode,
    /// Differs from what the parent tree recorded before.
    pub(crate) changed: bool,
}

enum Settle {
    File(NodeRef, ObjectId),
    Directory(NodeRef, ObjectId),
}

/// Write phase of a commit.
pub(crate) struct TreeWriter<'a> {
    store: &'a dyn ObjectStore,
    settle: Vec<Settle>,
}

impl<'a> TreeWriter<'a> {
    pub(crate) fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            settle: Vec::new(),
        }
    }

    /// Store `node` and everything changed beneath it.
    pub(crate) fn write(&mut self, node: &NodeRef) -> GfsResult<Written> {
        let (children, base, modified) = {
            let state = node.lock();
            match &*state {
                NodeState::File(file) | NodeState::Symlink(file) => {
                    let mode = file.entry_mode(matches!(&*state, NodeState::Symlink(_)));
                    let mode_changed = file.executable != file.base_executable;
                    let (id, changed) = match &file.content {
                        Content::Clean { id, .. } => (*id, mode_changed),
                        Content::Dirty { data, .. } => (self.store.store_blob(data)?, true),
                    };
                    if changed {
                        self.settle.push(Settle::File(node.clone(), id));
                    }
                    return Ok(Written { id, mode, changed });
                }
                NodeState::Directory(Listing::Unloaded(id)) => {
                    return Ok(Written {
                        id: *id,
                        mode: EntryMode::Tree,
                        changed: false,
                    });
                }
                NodeState::Directory(Listing::Loaded {
                    children,
                    base,
                    modified,
                }) => (
                    children
                        .iter()
                        .map(|(name, child)| (name.clone(), child.clone()))
                        .collect::<Vec<_>>(),
                    *base,
                    *modified,
                ),
            }
        };

        let mut changed = modified || base.is_none();
        let mut entries = Vec::with_capacity(children.len());
        for (name, child) in &children {
            let written = self.write(child)?;
            changed |= written.changed;
            entries.push(TreeEntry::new(name.clone(), written.id, written.mode));
        }

        let id = match base {
            Some(id) if !changed => id,
            _ => {
                let id = self.store.store_tree(&entries)?;
                trace!(tree = %id.short(), entries = entries.len(), "wrote tree");
                self.settle.push(Settle::Directory(node.clone(), id));
                id
            }
        };
        Ok(Written {
            id,
            mode: EntryMode::Tree,
            changed,
        })
    }

    /// Mark every written node clean at its new id. Cannot fail.
    pub(crate) fn settle(self) {
        for item in self.settle {
            match item {
                Settle::File(node, id) => {
                    if let NodeState::File(file) | NodeState::Symlink(file) = &mut *node.lock() {
                        let cache = match std::mem::replace(
                            &mut file.content,
                            Content::Clean { id, cache: None },
                        ) {
                            Content::Dirty { data, .. } => Some(data),
                            Content::Clean { cache, .. } => cache,
                        };
                        file.content = Content::Clean { id, cache };
                        file.base_executable = file.executable;
                    }
                }
                Settle::Directory(node, id) => {
                    if let NodeState::Directory(Listing::Loaded { base, modified, .. }) =
                        &mut *node.lock()
                    {
                        *base = Some(id);
                        *modified = false;
                    }
                }
            }
        }
    }
}

/// Options of one commit.
pub(crate) struct CommitRequest<'a> {
    pub(crate) metadata: &'a CommitMetadata,
    pub(crate) allow_empty: bool,
    /// Branch to advance from the old base commit to the new one.
    pub(crate) branch: Option<&'a str>,
}

/// Persist the overlay and rebind it to the new commit.
///
/// Parents are the base commit (if any) followed by a pending merge head.
/// Without a merge head, a root tree equal to the base tree is an empty
/// commit.
pub(crate) fn commit_overlay(
    store: &dyn ObjectStore,
    st: &mut OverlayState,
    request: CommitRequest<'_>,
) -> GfsResult<ObjectId> {
    let mut writer = TreeWriter::new(store);
    let root = writer.write(&st.root)?;

    let unchanged = st.base_commit.is_some() && st.base_tree == Some(root.id);
    if unchanged && st.merge_head.is_none() && !request.allow_empty {
        return Err(GfsError::EmptyCommit);
    }

    let parents: Vec<ObjectId> = st.base_commit.into_iter().chain(st.merge_head).collect();
    let commit = store.store_commit(&root.id, &parents, request.metadata)?;
    if let Some(branch) = request.branch {
        store.update_ref(branch, &commit, st.base_commit.as_ref())?;
    }

    writer.settle();
    st.base_commit = Some(commit);
    st.base_tree = Some(root.id);
    st.merge_head = None;
    info!(
        commit = %commit.short(),
        tree = %root.id.short(),
        parents = parents.len(),
        "committed overlay"
    );
    Ok(commit)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::node::Node;
    use crate::overlay::Overlay;
    use crate::path::GfsPath;
    use crate::session::SessionId;
    use gitvfs_cas::{MemoryObjectStore, Signature, StoreError, StoreResult, CommitData};

    fn meta() -> CommitMetadata {
        CommitMetadata::new("test", Signature::at("Test", "test@example.com", 1_700_000_000))
    }

    fn request(metadata: &CommitMetadata) -> CommitRequest<'_> {
        CommitRequest {
            metadata,
            allow_empty: false,
            branch: None,
        }
    }

    /// Store that fails every blob write once armed.
    struct FailingBlobs {
        inner: MemoryObjectStore,
        armed: std::sync::atomic::AtomicBool,
    }

    impl ObjectStore for FailingBlobs {
        fn fetch_blob(&self, id: &ObjectId) -> StoreResult<Vec<u8>> {
            self.inner.fetch_blob(id)
        }
        fn fetch_tree(&self, id: &ObjectId) -> StoreResult<Vec<TreeEntry>> {
            self.inner.fetch_tree(id)
        }
        fn fetch_commit(&self, id: &ObjectId) -> StoreResult<CommitData> {
            self.inner.fetch_commit(id)
        }
        fn store_blob(&self, data: &[u8]) -> StoreResult<ObjectId> {
            if self.armed.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::other("disk full"));
            }
            self.inner.store_blob(data)
        }
        fn store_tree(&self, entries: &[TreeEntry]) -> StoreResult<ObjectId> {
            self.inner.store_tree(entries)
        }
        fn store_commit(
            &self,
            tree: &ObjectId,
            parents: &[ObjectId],
            metadata: &CommitMetadata,
        ) -> StoreResult<ObjectId> {
            self.inner.store_commit(tree, parents, metadata)
        }
        fn read_ref(&self, name: &str) -> StoreResult<Option<ObjectId>> {
            self.inner.read_ref(name)
        }
        fn update_ref(
            &self,
            name: &str,
            new: &ObjectId,
            expected: Option<&ObjectId>,
        ) -> StoreResult<()> {
            self.inner.update_ref(name, new, expected)
        }
    }

    #[test]
    fn test_clean_subtree_reuses_ids() {
        let store = MemoryObjectStore::new();
        let blob = store.store_blob(b"x").unwrap();
        let sub = store
            .store_tree(&[TreeEntry::new("x", blob, EntryMode::Blob)])
            .unwrap();
        let node = Node::stub(&TreeEntry::new("", sub, EntryMode::Tree));
        let before = store.len();

        let mut writer = TreeWriter::new(&store);
        let written = writer.write(&node).unwrap();
        assert_eq!(written.id, sub);
        assert!(!written.changed);
        assert_eq!(store.len(), before);
    }

    #[test]
    fn test_empty_commit_rejected_unless_allowed() {
        let store = Arc::new(MemoryObjectStore::new());
        let tree = store.store_tree(&[]).unwrap();
        let metadata = meta();
        let base = store.store_commit(&tree, &[], &metadata).unwrap();
        let overlay = Overlay::new(SessionId::from("commit-tests"), store.clone(), Some(base), Some(tree));

        let mut st = overlay.write_state().unwrap();
        assert!(matches!(
            commit_overlay(store.as_ref(), &mut st, request(&metadata)),
            Err(GfsError::EmptyCommit)
        ));
        let forced = commit_overlay(
            store.as_ref(),
            &mut st,
            CommitRequest {
                allow_empty: true,
                ..request(&metadata)
            },
        )
        .unwrap();
        assert_eq!(store.fetch_commit(&forced).unwrap().parents, vec![base]);
    }

    #[test]
    fn test_store_failure_leaves_overlay_dirty() {
        let store = Arc::new(FailingBlobs {
            inner: MemoryObjectStore::new(),
            armed: std::sync::atomic::AtomicBool::new(true),
        });
        let id = SessionId::from("commit-failure");
        let overlay = Overlay::new(id.clone(), store.clone(), None, None);
        let path = GfsPath::parse(id, "/dir/file").unwrap();
        overlay.create_directory(&path.parent().unwrap()).unwrap();
        overlay.create_file(&path, b"payload", false).unwrap();

        let metadata = meta();
        {
            let mut st = overlay.write_state().unwrap();
            let err = commit_overlay(store.as_ref(), &mut st, request(&metadata)).unwrap_err();
            assert!(matches!(err, GfsError::StoreIo(StoreError::Other(_))));
            assert_eq!(st.base_commit, None);
        }
        assert!(overlay.has_uncommitted_changes().unwrap());
        assert!(overlay.resolve(&path).unwrap().unwrap().is_dirty());
        assert_eq!(overlay.read_bytes(&path).unwrap(), b"payload");

        store.armed.store(false, std::sync::atomic::Ordering::SeqCst);
        let mut st = overlay.write_state().unwrap();
        commit_overlay(store.as_ref(), &mut st, request(&metadata)).unwrap();
        drop(st);
        assert!(!overlay.has_uncommitted_changes().unwrap());
    }
}
