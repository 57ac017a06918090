//! Node model and cache.
//!
//! The overlay layers mutable nodes over an immutable base tree. One
//! `RwLock` guards the tree structure: create, delete, move, copy, commit
//! and merge take it exclusively, while lookups and content access share
//! it and then serialize on the node's own mutex. Lazy directory loads run
//! under the shared lock; the tree fetch happens with no node locked, and
//! if two readers race the loser throws its listing away.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gitvfs_cas::{ObjectId, ObjectStore};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use crate::error::{GfsError, GfsResult};
use crate::node::{Children, Content, FileState, Listing, Node, NodeRef, NodeState};
use crate::path::GfsPath;
use crate::session::SessionId;
use crate::vfs::{DirEntry, FileType};

/// Mutable part of an overlay, guarded by the structural lock.
pub(crate) struct OverlayState {
    pub(crate) root: NodeRef,
    pub(crate) base_commit: Option<ObjectId>,
    pub(crate) base_tree: Option<ObjectId>,
    /// Other parent of the next commit, left behind by a conflicted merge.
    pub(crate) merge_head: Option<ObjectId>,
}

impl OverlayState {
    /// Rebind to a commit and drop every node.
    pub(crate) fn rebind(&mut self, commit: Option<ObjectId>, tree: Option<ObjectId>) {
        self.root = Node::root(tree);
        self.base_commit = commit;
        self.base_tree = tree;
        self.merge_head = None;
    }
}

/// An in-memory overlay over one base tree.
pub struct Overlay {
    id: SessionId,
    store: Arc<dyn ObjectStore>,
    state: RwLock<OverlayState>,
    closed: AtomicBool,
}

impl Overlay {
    pub(crate) fn new(
        id: SessionId,
        store: Arc<dyn ObjectStore>,
        base_commit: Option<ObjectId>,
        base_tree: Option<ObjectId>,
    ) -> Self {
        Self {
            id,
            store,
            state: RwLock::new(OverlayState {
                root: Node::root(base_tree),
                base_commit,
                base_tree,
                merge_head: None,
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark closed. Returns false if it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        let _guard = self.state.write();
        !self.closed.swap(true, Ordering::AcqRel)
    }

    fn ensure_open(&self) -> GfsResult<()> {
        if self.is_closed() {
            return Err(GfsError::SessionClosed(self.id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn read_state(&self) -> GfsResult<RwLockReadGuard<'_, OverlayState>> {
        self.ensure_open()?;
        let guard = self.state.read();
        self.ensure_open()?;
        Ok(guard)
    }

    pub(crate) fn write_state(&self) -> GfsResult<RwLockWriteGuard<'_, OverlayState>> {
        self.ensure_open()?;
        let guard = self.state.write();
        self.ensure_open()?;
        Ok(guard)
    }

    /// Reject paths owned by another session and anchor relative paths at
    /// the root.
    fn absolute(&self, path: &GfsPath) -> GfsResult<GfsPath> {
        if path.session() != &self.id {
            return Err(GfsError::invalid_path(format!(
                "{path} belongs to session {}",
                path.session()
            )));
        }
        Ok(path.to_absolute())
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Materialize a directory's children from its tree.
    ///
    /// No-op for loaded directories and for non-directories.
    pub(crate) fn load_children(&self, dir: &NodeRef) -> GfsResult<()> {
        let id = match &*dir.lock() {
            NodeState::Directory(Listing::Unloaded(id)) => *id,
            _ => return Ok(()),
        };

        let entries = self.store.fetch_tree(&id)?;
        let children: Children = entries
            .iter()
            .map(|entry| (entry.name.clone(), Node::stub(entry)))
            .collect();

        let mut state = dir.lock();
        if let NodeState::Directory(listing @ Listing::Unloaded(_)) = &mut *state {
            debug!(tree = %id.short(), entries = children.len(), "loaded directory");
            *listing = Listing::Loaded {
                children,
                base: Some(id),
                modified: false,
            };
        } else {
            trace!(tree = %id.short(), "directory already loaded, discarding fetch");
        }
        Ok(())
    }

    /// Look up one child. `None` if missing or if `dir` is not a directory.
    pub(crate) fn child(&self, dir: &NodeRef, name: &str) -> GfsResult<Option<NodeRef>> {
        self.load_children(dir)?;
        match &*dir.lock() {
            NodeState::Directory(Listing::Loaded { children, .. }) => {
                Ok(children.get(name).cloned())
            }
            _ => Ok(None),
        }
    }

    /// Walk `names` from the root, returning every node visited.
    ///
    /// `..` pops the stack (and stays put at the root). Symbolic links are
    /// not followed.
    fn walk(&self, st: &OverlayState, names: &[String]) -> GfsResult<Option<Vec<NodeRef>>> {
        let mut stack = vec![st.root.clone()];
        for name in names {
            if name == ".." {
                if stack.len() > 1 {
                    stack.pop();
                }
                continue;
            }
            let current = stack[stack.len() - 1].clone();
            match self.child(&current, name)? {
                Some(next) => stack.push(next),
                None => return Ok(None),
            }
        }
        Ok(Some(stack))
    }

    fn lookup(&self, st: &OverlayState, path: &GfsPath) -> GfsResult<Option<NodeRef>> {
        let path = self.absolute(path)?;
        Ok(self
            .walk(st, path.names())?
            .and_then(|mut stack| stack.pop()))
    }

    /// Resolve the parent directory and leaf name of `path`.
    ///
    /// Also returns the nodes visited on the way to the parent.
    fn parent_of(
        &self,
        st: &OverlayState,
        path: &GfsPath,
    ) -> GfsResult<(NodeRef, String, Vec<NodeRef>)> {
        let abs = self.absolute(path)?;
        let Some((leaf, parent_names)) = abs.names().split_last() else {
            return Err(GfsError::invalid_path(format!("{path}: operation not valid on the root")));
        };
        if leaf == ".." {
            return Err(GfsError::invalid_path(path.to_string()));
        }
        let stack = self
            .walk(st, parent_names)?
            .ok_or_else(|| GfsError::no_such_directory(path.to_string()))?;
        let parent = stack[stack.len() - 1].clone();
        if !parent.is_directory() {
            return Err(GfsError::no_such_directory(path.to_string()));
        }
        self.load_children(&parent)?;
        Ok((parent, leaf.clone(), stack))
    }

    /// Resolve a path to its node.
    pub fn resolve(&self, path: &GfsPath) -> GfsResult<Option<NodeRef>> {
        let st = self.read_state()?;
        self.lookup(&st, path)
    }

    // ========================================================================
    // Structure
    // ========================================================================

    fn attach(dir: &NodeRef, name: String, node: NodeRef) {
        if let NodeState::Directory(Listing::Loaded {
            children, modified, ..
        }) = &mut *dir.lock()
        {
            children.insert(name, node);
            *modified = true;
        }
    }

    fn detach(dir: &NodeRef, name: &str) -> Option<NodeRef> {
        match &mut *dir.lock() {
            NodeState::Directory(Listing::Loaded {
                children, modified, ..
            }) => {
                let removed = children.remove(name);
                *modified |= removed.is_some();
                removed
            }
            _ => None,
        }
    }

    /// Fail if `node` is a directory with entries.
    fn ensure_removable(&self, node: &NodeRef, path: &GfsPath) -> GfsResult<()> {
        self.load_children(node)?;
        match &*node.lock() {
            NodeState::Directory(Listing::Loaded { children, .. }) if !children.is_empty() => {
                Err(GfsError::directory_not_empty(path.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn create_node(&self, path: &GfsPath, node: NodeRef) -> GfsResult<NodeRef> {
        let st = self.write_state()?;
        let (parent, name, _) = self.parent_of(&st, path)?;
        if self.child(&parent, &name)?.is_some() {
            return Err(GfsError::already_exists(path.to_string()));
        }
        trace!(%path, "create");
        Self::attach(&parent, name, node.clone());
        Ok(node)
    }

    /// Create a regular file. All parents must exist.
    pub fn create_file(&self, path: &GfsPath, content: &[u8], executable: bool) -> GfsResult<NodeRef> {
        self.create_node(path, Node::new_file(content.to_vec(), executable))
    }

    /// Create an empty directory. All parents must exist.
    pub fn create_directory(&self, path: &GfsPath) -> GfsResult<NodeRef> {
        self.create_node(path, Node::new_directory())
    }

    /// Create a symbolic link pointing at `target`.
    pub fn create_symlink(&self, path: &GfsPath, target: &str) -> GfsResult<NodeRef> {
        self.create_node(path, Node::new_symlink(target))
    }

    /// Remove a file, link or empty directory.
    pub fn delete(&self, path: &GfsPath) -> GfsResult<()> {
        let st = self.write_state()?;
        let (parent, name, _) = self.parent_of(&st, path)?;
        let node = self
            .child(&parent, &name)?
            .ok_or_else(|| GfsError::no_such_file(path.to_string()))?;
        self.ensure_removable(&node, path)?;
        Self::detach(&parent, &name);
        trace!(%path, "delete");
        Ok(())
    }

    /// Check a move/copy destination. Returns true when `target` already
    /// names `node` itself.
    fn check_target(
        &self,
        node: &NodeRef,
        parent: &NodeRef,
        name: &str,
        target: &GfsPath,
        replace_existing: bool,
    ) -> GfsResult<bool> {
        let Some(existing) = self.child(parent, name)? else {
            return Ok(false);
        };
        if Arc::ptr_eq(&existing, node) {
            return Ok(true);
        }
        if !replace_existing {
            return Err(GfsError::already_exists(target.to_string()));
        }
        self.ensure_removable(&existing, target)?;
        Ok(false)
    }

    /// Re-parent a node. Open channels keep working on the moved node.
    pub fn move_node(&self, source: &GfsPath, target: &GfsPath, replace_existing: bool) -> GfsResult<()> {
        let st = self.write_state()?;
        let (src_parent, src_name, _) = self.parent_of(&st, source)?;
        let node = self
            .child(&src_parent, &src_name)?
            .ok_or_else(|| GfsError::no_such_file(source.to_string()))?;
        let (dst_parent, dst_name, dst_stack) = self.parent_of(&st, target)?;
        if dst_stack.iter().any(|visited| Arc::ptr_eq(visited, &node)) {
            return Err(GfsError::invalid_path(format!(
                "cannot move {source} into its own subtree {target}"
            )));
        }
        if self.check_target(&node, &dst_parent, &dst_name, target, replace_existing)? {
            return Ok(());
        }
        Self::detach(&src_parent, &src_name);
        Self::attach(&dst_parent, dst_name, node);
        trace!(%source, %target, "move");
        Ok(())
    }

    /// Copy a subtree. Clean content is shared by object id.
    pub fn copy(&self, source: &GfsPath, target: &GfsPath, replace_existing: bool) -> GfsResult<()> {
        let st = self.write_state()?;
        let node = self
            .lookup(&st, source)?
            .ok_or_else(|| GfsError::no_such_file(source.to_string()))?;
        let (dst_parent, dst_name, _) = self.parent_of(&st, target)?;
        if self.check_target(&node, &dst_parent, &dst_name, target, replace_existing)? {
            return Ok(());
        }
        Self::attach(&dst_parent, dst_name, node.deep_copy());
        trace!(%source, %target, "copy");
        Ok(())
    }

    /// Entries of a directory, sorted by name.
    pub fn list(&self, path: &GfsPath) -> GfsResult<Vec<DirEntry>> {
        let st = self.read_state()?;
        let node = self
            .lookup(&st, path)?
            .ok_or_else(|| GfsError::no_such_file(path.to_string()))?;
        self.load_children(&node)?;
        let children: Vec<(String, NodeRef)> = match &*node.lock() {
            NodeState::Directory(Listing::Loaded { children, .. }) => children
                .iter()
                .map(|(name, child)| (name.clone(), child.clone()))
                .collect(),
            _ => return Err(GfsError::not_a_directory(path.to_string())),
        };
        Ok(children
            .into_iter()
            .map(|(name, child)| DirEntry::new(name, child.kind()))
            .collect())
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// Run `f` against a file's (or link's) state with its bytes loaded.
    ///
    /// The blob fetch happens without the node locked.
    pub(crate) fn with_content<R>(
        &self,
        node: &NodeRef,
        path: &GfsPath,
        want: FileType,
        f: impl FnOnce(&mut FileState) -> R,
    ) -> GfsResult<R> {
        let _st = self.read_state()?;
        let pending = {
            let mut state = node.lock();
            let file = content_state(&mut state, path, want)?;
            match &file.content {
                Content::Clean { id, cache: None } => Some(*id),
                _ => None,
            }
        };
        let fetched = match pending {
            Some(id) => Some(self.store.fetch_blob(&id)?),
            None => None,
        };

        let mut state = node.lock();
        let file = content_state(&mut state, path, want)?;
        if let (Some(data), Content::Clean { cache: cache @ None, .. }) = (fetched, &mut file.content) {
            *cache = Some(data);
        }
        Ok(f(file))
    }

    /// Whole content of a regular file.
    pub fn read_bytes(&self, path: &GfsPath) -> GfsResult<Vec<u8>> {
        let node = self.existing(path)?;
        self.with_content(&node, path, FileType::File, |file| {
            file.bytes().cloned().unwrap_or_default()
        })
    }

    /// Write `data` at `offset`, marking the file dirty.
    pub fn write_bytes(&self, path: &GfsPath, offset: u64, data: &[u8]) -> GfsResult<usize> {
        let node = self.existing(path)?;
        self.with_content(&node, path, FileType::File, |file| file.write_at(offset, data))?
            .ok_or_else(|| GfsError::file_too_large(path.to_string()))
    }

    /// Shrink a regular file. Growing is a no-op.
    pub fn truncate(&self, path: &GfsPath, size: u64) -> GfsResult<()> {
        let node = self.existing(path)?;
        self.with_content(&node, path, FileType::File, |file| file.truncate(size))
    }

    /// Target of a symbolic link.
    pub fn read_symlink(&self, path: &GfsPath) -> GfsResult<String> {
        let node = self.existing(path)?;
        let bytes = self.with_content(&node, path, FileType::Symlink, |file| {
            file.bytes().cloned().unwrap_or_default()
        })?;
        String::from_utf8(bytes)
            .map_err(|_| GfsError::invalid_path(format!("{path}: link target is not UTF-8")))
    }

    /// Set or clear the executable bit of a regular file.
    pub fn set_executable(&self, path: &GfsPath, executable: bool) -> GfsResult<()> {
        let st = self.read_state()?;
        let node = self.existing_locked(&st, path)?;
        let mut state = node.lock();
        let file = content_state(&mut state, path, FileType::File)?;
        file.executable = executable;
        Ok(())
    }

    /// Size of a file or link target.
    pub fn size(&self, path: &GfsPath) -> GfsResult<u64> {
        let node = self.existing(path)?;
        let want = node.kind();
        if want.is_dir() {
            return Ok(0);
        }
        self.with_content(&node, path, want, |file| file.size())
    }

    fn existing(&self, path: &GfsPath) -> GfsResult<NodeRef> {
        let st = self.read_state()?;
        self.existing_locked(&st, path)
    }

    fn existing_locked(&self, st: &OverlayState, path: &GfsPath) -> GfsResult<NodeRef> {
        self.lookup(st, path)?
            .ok_or_else(|| GfsError::no_such_file(path.to_string()))
    }

    // ========================================================================
    // Cache
    // ========================================================================

    /// Drop clean cached content and clean directory listings.
    ///
    /// Nodes held outside the tree (by open channels) keep their listing
    /// position; only unreferenced clean subtrees collapse back into
    /// stubs. Dirty nodes are never touched. Returns how many buffers and
    /// listings were released.
    pub fn evict_clean(&self) -> GfsResult<usize> {
        let st = self.write_state()?;
        let released = evict(&st.root);
        debug!(released, "evicted clean overlay state");
        Ok(released)
    }

    /// Returns true if anything would go into the next commit.
    pub fn has_uncommitted_changes(&self) -> GfsResult<bool> {
        let st = self.read_state()?;
        Ok(st.merge_head.is_some() || !st.root.is_clean_deep())
    }

    /// Commit the overlay is currently based on.
    pub fn base_commit(&self) -> GfsResult<Option<ObjectId>> {
        Ok(self.read_state()?.base_commit)
    }

    /// Tree the overlay is currently based on.
    pub fn base_tree(&self) -> GfsResult<Option<ObjectId>> {
        Ok(self.read_state()?.base_tree)
    }
}

fn content_state<'a>(
    state: &'a mut NodeState,
    path: &GfsPath,
    want: FileType,
) -> GfsResult<&'a mut FileState> {
    match (state, want) {
        (NodeState::File(file), FileType::File) => Ok(file),
        (NodeState::Symlink(file), FileType::Symlink) => Ok(file),
        (NodeState::Directory(_), _) => Err(GfsError::is_a_directory(path.to_string())),
        (_, FileType::Symlink) => Err(GfsError::not_a_link(path.to_string())),
        _ => Err(GfsError::not_a_file(path.to_string())),
    }
}

fn evict(node: &NodeRef) -> usize {
    let mut state = node.lock();
    match &mut *state {
        NodeState::File(file) | NodeState::Symlink(file) => match &mut file.content {
            Content::Clean { cache, .. } if cache.is_some() => {
                *cache = None;
                1
            }
            _ => 0,
        },
        NodeState::Directory(listing) => {
            let Listing::Loaded {
                children,
                base,
                modified,
            } = listing
            else {
                return 0;
            };
            let released: usize = children.values().map(evict).sum();
            let collapsible = !*modified && children.values().all(detachable);
            match (collapsible, *base) {
                (true, Some(id)) => {
                    *listing = Listing::Unloaded(id);
                    released + 1
                }
                _ => released,
            }
        }
    }
}

/// A child can be forgotten if only its parent holds it and it is clean.
fn detachable(child: &NodeRef) -> bool {
    Arc::strong_count(child) == 1
        && match &*child.lock() {
            NodeState::File(file) | NodeState::Symlink(file) => !file.is_dirty(),
            NodeState::Directory(Listing::Unloaded(_)) => true,
            NodeState::Directory(Listing::Loaded { .. }) => false,
        }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitvfs_cas::{EntryMode, MemoryObjectStore, TreeEntry};

    fn sid() -> SessionId {
        SessionId::from("overlay-tests")
    }

    fn p(text: &str) -> GfsPath {
        GfsPath::parse(sid(), text).unwrap()
    }

    /// `/README` and `/src/lib.rs` (executable) plus `/link -> README`.
    fn seeded() -> (Arc<MemoryObjectStore>, Overlay) {
        let store = Arc::new(MemoryObjectStore::new());
        let readme = store.store_blob(b"read me\n").unwrap();
        let lib = store.store_blob(b"fn main() {}\n").unwrap();
        let target = store.store_blob(b"README").unwrap();
        let src = store
            .store_tree(&[TreeEntry::new("lib.rs", lib, EntryMode::Executable)])
            .unwrap();
        let root = store
            .store_tree(&[
                TreeEntry::new("README", readme, EntryMode::Blob),
                TreeEntry::new("src", src, EntryMode::Tree),
                TreeEntry::new("link", target, EntryMode::Symlink),
            ])
            .unwrap();
        let overlay = Overlay::new(sid(), store.clone(), None, Some(root));
        (store, overlay)
    }

    #[test]
    fn test_resolve_lazily_loads() {
        let (_store, overlay) = seeded();
        let lib = overlay.resolve(&p("/src/lib.rs")).unwrap().unwrap();
        assert_eq!(lib.kind(), FileType::File);
        assert!(lib.is_executable());
        assert!(overlay.resolve(&p("/missing")).unwrap().is_none());
        // Intermediate segment is a file.
        assert!(overlay.resolve(&p("/README/x")).unwrap().is_none());
        // Relative paths resolve from the root; `..` is walked.
        let same = overlay.resolve(&p("src/../src/lib.rs")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&lib, &same));
        let root = overlay.resolve(&p("/../..")).unwrap().unwrap();
        assert!(root.is_directory());
    }

    #[test]
    fn test_foreign_path_rejected() {
        let (_store, overlay) = seeded();
        let other = GfsPath::parse(SessionId::from("someone-else"), "/README").unwrap();
        assert!(matches!(overlay.resolve(&other), Err(GfsError::InvalidPath(_))));
    }

    #[test]
    fn test_create_file_rules() {
        let (_store, overlay) = seeded();
        overlay.create_file(&p("/src/new.rs"), b"new", false).unwrap();
        assert_eq!(overlay.read_bytes(&p("/src/new.rs")).unwrap(), b"new");

        assert!(matches!(
            overlay.create_file(&p("/README"), b"", false),
            Err(GfsError::FileAlreadyExists(_))
        ));
        assert!(matches!(
            overlay.create_file(&p("/nope/file"), b"", false),
            Err(GfsError::NoSuchDirectory(_))
        ));
        assert!(matches!(
            overlay.create_file(&p("/README/file"), b"", false),
            Err(GfsError::NoSuchDirectory(_))
        ));
    }

    #[test]
    fn test_delete_rules() {
        let (_store, overlay) = seeded();
        assert!(matches!(
            overlay.delete(&p("/src")),
            Err(GfsError::DirectoryNotEmpty(_))
        ));
        overlay.delete(&p("/src/lib.rs")).unwrap();
        overlay.delete(&p("/src")).unwrap();
        assert!(overlay.resolve(&p("/src")).unwrap().is_none());
        assert!(matches!(
            overlay.delete(&p("/src")),
            Err(GfsError::NoSuchFile(_))
        ));
        assert!(matches!(overlay.delete(&p("/")), Err(GfsError::InvalidPath(_))));
    }

    #[test]
    fn test_move_keeps_node_identity() {
        let (_store, overlay) = seeded();
        let node = overlay.resolve(&p("/README")).unwrap().unwrap();
        overlay.move_node(&p("/README"), &p("/src/README.md"), false).unwrap();
        assert!(overlay.resolve(&p("/README")).unwrap().is_none());
        let moved = overlay.resolve(&p("/src/README.md")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&node, &moved));

        overlay.create_file(&p("/other"), b"x", false).unwrap();
        assert!(matches!(
            overlay.move_node(&p("/other"), &p("/src/README.md"), false),
            Err(GfsError::FileAlreadyExists(_))
        ));
        overlay.move_node(&p("/other"), &p("/src/README.md"), true).unwrap();
        assert_eq!(overlay.read_bytes(&p("/src/README.md")).unwrap(), b"x");

        assert!(matches!(
            overlay.move_node(&p("/gone"), &p("/x"), false),
            Err(GfsError::NoSuchFile(_))
        ));
        assert!(matches!(
            overlay.move_node(&p("/src"), &p("/src/inner"), false),
            Err(GfsError::InvalidPath(_))
        ));
        // Moving onto itself is a no-op.
        overlay.move_node(&p("/src"), &p("/src/../src"), false).unwrap();
        assert!(overlay.resolve(&p("/src")).unwrap().is_some());
    }

    #[test]
    fn test_copy_shares_clean_ids() {
        let (_store, overlay) = seeded();
        let original = overlay.resolve(&p("/src/lib.rs")).unwrap().unwrap();
        overlay.copy(&p("/src"), &p("/src2"), false).unwrap();
        let copied = overlay.resolve(&p("/src2/lib.rs")).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&original, &copied));
        assert_eq!(copied.object_id(), original.object_id());

        overlay.write_bytes(&p("/src2/lib.rs"), 0, b"//").unwrap();
        assert_eq!(overlay.read_bytes(&p("/src/lib.rs")).unwrap(), b"fn main() {}\n");
    }

    #[test]
    fn test_list_and_symlink() {
        let (_store, overlay) = seeded();
        let names: Vec<_> = overlay
            .list(&p("/"))
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.kind))
            .collect();
        assert_eq!(
            names,
            vec![
                ("README".to_string(), FileType::File),
                ("link".to_string(), FileType::Symlink),
                ("src".to_string(), FileType::Directory),
            ]
        );
        assert_eq!(overlay.read_symlink(&p("/link")).unwrap(), "README");
        assert!(matches!(
            overlay.read_symlink(&p("/README")),
            Err(GfsError::NotALink(_))
        ));
        assert!(matches!(
            overlay.list(&p("/README")),
            Err(GfsError::NotADirectory(_))
        ));
        // Links are not followed.
        assert!(overlay.resolve(&p("/link/x")).unwrap().is_none());
    }

    #[test]
    fn test_write_makes_dirty_and_stops_fetching() {
        let (_store, overlay) = seeded();
        assert!(!overlay.has_uncommitted_changes().unwrap());
        overlay.write_bytes(&p("/README"), 0, b"READ").unwrap();
        assert!(overlay.has_uncommitted_changes().unwrap());
        assert_eq!(overlay.read_bytes(&p("/README")).unwrap(), b"READ me\n");

        // Eviction never drops dirty content.
        overlay.evict_clean().unwrap();
        assert_eq!(overlay.read_bytes(&p("/README")).unwrap(), b"READ me\n");
    }

    #[test]
    fn test_set_executable() {
        let (_store, overlay) = seeded();
        overlay.set_executable(&p("/README"), true).unwrap();
        assert!(overlay.resolve(&p("/README")).unwrap().unwrap().is_executable());
        assert!(overlay.has_uncommitted_changes().unwrap());
        overlay.set_executable(&p("/README"), false).unwrap();
        assert!(!overlay.has_uncommitted_changes().unwrap());
        assert!(matches!(
            overlay.set_executable(&p("/src"), true),
            Err(GfsError::IsADirectory(_))
        ));
    }

    #[test]
    fn test_evict_collapses_unreferenced_clean_listings() {
        let (_store, overlay) = seeded();
        overlay.read_bytes(&p("/src/lib.rs")).unwrap();
        let released = overlay.evict_clean().unwrap();
        // lib.rs buffer, /src listing, root listing.
        assert_eq!(released, 3);
        assert_eq!(overlay.read_bytes(&p("/src/lib.rs")).unwrap(), b"fn main() {}\n");

        // A held node pins its parent listing.
        let held = overlay.resolve(&p("/src/lib.rs")).unwrap().unwrap();
        overlay.evict_clean().unwrap();
        let again = overlay.resolve(&p("/src/lib.rs")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[test]
    fn test_concurrent_lazy_loads_agree() {
        let (_store, overlay) = seeded();
        let overlay = Arc::new(overlay);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let overlay = overlay.clone();
                std::thread::spawn(move || {
                    GfsPath::parse(sid(), "/src/lib.rs")
                        .and_then(|path| overlay.resolve(&path))
                        .unwrap()
                        .unwrap()
                })
            })
            .collect();
        let nodes: Vec<NodeRef> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(nodes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
