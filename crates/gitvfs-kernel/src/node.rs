//! Overlay nodes.
//!
//! A node is a tagged union of directory, regular file and symbolic link
//! behind its own mutex. Parents own their children through `Arc`s in a
//! name-ordered map; there are no back pointers, so moving a node is a
//! detach from one map and an insert into another.
//!
//! Directories start out as unloaded stubs that only know their tree id.
//! Files start out clean: an object id and, once read, a cached copy of the
//! blob. The first write turns the content into an owned dirty buffer that
//! only a commit turns back into an object id.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use gitvfs_cas::{EntryMode, ObjectId, TreeEntry};
use parking_lot::{Mutex, MutexGuard};

use crate::vfs::FileType;

/// Shared handle to a node.
pub type NodeRef = Arc<Node>;

/// Children of a directory, ordered by name.
pub(crate) type Children = BTreeMap<String, NodeRef>;

/// One node of the overlay tree.
pub struct Node {
    state: Mutex<NodeState>,
}

pub(crate) enum NodeState {
    Directory(Listing),
    File(FileState),
    Symlink(FileState),
}

/// Directory contents.
pub(crate) enum Listing {
    /// Not materialized yet; lookups must consult the tree.
    Unloaded(ObjectId),
    Loaded {
        children: Children,
        /// Tree id this listing was loaded from or last committed as.
        base: Option<ObjectId>,
        /// Entries were added, removed or renamed since `base`.
        modified: bool,
    },
}

/// Bytes of a file or link target.
pub(crate) enum Content {
    Clean {
        id: ObjectId,
        cache: Option<Vec<u8>>,
    },
    Dirty {
        data: Vec<u8>,
        base: Option<ObjectId>,
    },
}

pub(crate) struct FileState {
    pub(crate) content: Content,
    pub(crate) executable: bool,
    pub(crate) base_executable: bool,
}

impl FileState {
    fn clean(id: ObjectId, executable: bool) -> Self {
        Self {
            content: Content::Clean { id, cache: None },
            executable,
            base_executable: executable,
        }
    }

    fn dirty(data: Vec<u8>, executable: bool) -> Self {
        Self {
            content: Content::Dirty { data, base: None },
            executable,
            base_executable: executable,
        }
    }

    /// Content or mode differs from what was last loaded or committed.
    pub(crate) fn is_dirty(&self) -> bool {
        matches!(self.content, Content::Dirty { .. }) || self.executable != self.base_executable
    }

    /// The loaded bytes, if any.
    pub(crate) fn bytes(&self) -> Option<&Vec<u8>> {
        match &self.content {
            Content::Clean { cache, .. } => cache.as_ref(),
            Content::Dirty { data, .. } => Some(data),
        }
    }

    /// Mutable access to the bytes, flipping the content dirty.
    ///
    /// Returns `None` when clean content has not been fetched yet.
    pub(crate) fn bytes_mut(&mut self) -> Option<&mut Vec<u8>> {
        if let Content::Clean { id, cache } = &mut self.content {
            let data = cache.take()?;
            let base = Some(*id);
            self.content = Content::Dirty { data, base };
        }
        match &mut self.content {
            Content::Dirty { data, .. } => Some(data),
            Content::Clean { .. } => None,
        }
    }

    /// Length of the loaded bytes.
    pub(crate) fn size(&self) -> u64 {
        self.bytes().map_or(0, |data| data.len() as u64)
    }

    /// Copy bytes starting at `offset` into `buf`.
    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Some(data) = self.bytes() else {
            return 0;
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        n
    }

    /// Overwrite bytes at `offset`, zero-filling any gap past the end.
    ///
    /// Returns `None` when the write would end past what a buffer can hold.
    pub(crate) fn write_at(&mut self, offset: u64, src: &[u8]) -> Option<usize> {
        if src.is_empty() {
            return Some(0);
        }
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(src.len())?;
        let Some(data) = self.bytes_mut() else {
            return Some(0);
        };
        if data.len() < end {
            data.try_reserve(end - data.len()).ok()?;
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(src);
        Some(src.len())
    }

    /// Drop bytes past `size`. Growing is a no-op.
    pub(crate) fn truncate(&mut self, size: u64) {
        if size >= self.size() {
            return;
        }
        if let Some(data) = self.bytes_mut() {
            data.truncate(size as usize);
        }
    }

    /// Id of the clean content.
    pub(crate) fn clean_id(&self) -> Option<ObjectId> {
        match &self.content {
            Content::Clean { id, .. } => Some(*id),
            Content::Dirty { .. } => None,
        }
    }

    pub(crate) fn entry_mode(&self, symlink: bool) -> EntryMode {
        if symlink {
            EntryMode::Symlink
        } else if self.executable {
            EntryMode::Executable
        } else {
            EntryMode::Blob
        }
    }

    /// Copy for a duplicated node: clean content by id, dirty by value.
    fn duplicate(&self) -> Self {
        let content = match &self.content {
            Content::Clean { id, .. } => Content::Clean { id: *id, cache: None },
            Content::Dirty { data, .. } => Content::Dirty {
                data: data.clone(),
                base: None,
            },
        };
        Self {
            content,
            executable: self.executable,
            base_executable: self.base_executable,
        }
    }
}

impl Node {
    fn wrap(state: NodeState) -> NodeRef {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    /// A clean stub for a tree entry.
    pub(crate) fn stub(entry: &TreeEntry) -> NodeRef {
        Self::wrap(match entry.mode {
            EntryMode::Tree => NodeState::Directory(Listing::Unloaded(entry.id)),
            EntryMode::Blob => NodeState::File(FileState::clean(entry.id, false)),
            EntryMode::Executable => NodeState::File(FileState::clean(entry.id, true)),
            EntryMode::Symlink => NodeState::Symlink(FileState::clean(entry.id, false)),
        })
    }

    /// Root of a session bound to `tree`, or an empty root without a tree.
    ///
    /// The empty root counts as clean; it still has no tree id until the
    /// first commit writes one.
    pub(crate) fn root(tree: Option<ObjectId>) -> NodeRef {
        Self::wrap(NodeState::Directory(match tree {
            Some(id) => Listing::Unloaded(id),
            None => Listing::Loaded {
                children: Children::new(),
                base: None,
                modified: false,
            },
        }))
    }

    pub(crate) fn new_directory() -> NodeRef {
        Self::wrap(NodeState::Directory(Listing::Loaded {
            children: Children::new(),
            base: None,
            modified: true,
        }))
    }

    pub(crate) fn new_file(data: Vec<u8>, executable: bool) -> NodeRef {
        Self::wrap(NodeState::File(FileState::dirty(data, executable)))
    }

    pub(crate) fn new_symlink(target: &str) -> NodeRef {
        Self::wrap(NodeState::Symlink(FileState::dirty(
            target.as_bytes().to_vec(),
            false,
        )))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock()
    }

    /// Node kind.
    pub fn kind(&self) -> FileType {
        match &*self.lock() {
            NodeState::Directory(_) => FileType::Directory,
            NodeState::File(_) => FileType::File,
            NodeState::Symlink(_) => FileType::Symlink,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind().is_dir()
    }

    /// Executable bit (always false for directories and links).
    pub fn is_executable(&self) -> bool {
        match &*self.lock() {
            NodeState::File(file) => file.executable,
            _ => false,
        }
    }

    /// Returns true if this node itself has unpersisted changes.
    ///
    /// For directories this covers the entry set only, not the contents
    /// of children.
    pub fn is_dirty(&self) -> bool {
        match &*self.lock() {
            NodeState::Directory(Listing::Unloaded(_)) => false,
            NodeState::Directory(Listing::Loaded { modified, .. }) => *modified,
            NodeState::File(file) | NodeState::Symlink(file) => file.is_dirty(),
        }
    }

    /// Object id, when the node matches a stored object.
    ///
    /// Directories report their tree id only while the entry set is
    /// unmodified; children may still carry their own changes.
    pub fn object_id(&self) -> Option<ObjectId> {
        match &*self.lock() {
            NodeState::Directory(Listing::Unloaded(id)) => Some(*id),
            NodeState::Directory(Listing::Loaded {
                base,
                modified: false,
                ..
            }) => *base,
            NodeState::Directory(_) => None,
            NodeState::File(file) | NodeState::Symlink(file) => file.clean_id(),
        }
    }

    /// Object id this node was loaded from or last committed as, even
    /// while it carries uncommitted changes. `None` for nodes created in
    /// the overlay.
    pub fn base_id(&self) -> Option<ObjectId> {
        match &*self.lock() {
            NodeState::Directory(Listing::Unloaded(id)) => Some(*id),
            NodeState::Directory(Listing::Loaded { base, .. }) => *base,
            NodeState::File(file) | NodeState::Symlink(file) => match &file.content {
                Content::Clean { id, .. } => Some(*id),
                Content::Dirty { base, .. } => *base,
            },
        }
    }

    /// `(id, mode)` as this node would appear in its parent's tree, if the
    /// whole subtree is clean.
    pub(crate) fn clean_entry(self: &NodeRef) -> Option<(ObjectId, EntryMode)> {
        if !self.is_clean_deep() {
            return None;
        }
        match &*self.lock() {
            NodeState::Directory(Listing::Unloaded(id)) => Some((*id, EntryMode::Tree)),
            NodeState::Directory(Listing::Loaded { base, .. }) => base.map(|id| (id, EntryMode::Tree)),
            NodeState::File(file) => file.clean_id().map(|id| (id, file.entry_mode(false))),
            NodeState::Symlink(file) => file.clean_id().map(|id| (id, file.entry_mode(true))),
        }
    }

    /// Returns true if neither this node nor anything below it is dirty.
    pub(crate) fn is_clean_deep(&self) -> bool {
        let children: Vec<NodeRef> = match &*self.lock() {
            NodeState::Directory(Listing::Unloaded(_)) => return true,
            NodeState::Directory(Listing::Loaded {
                children, modified, ..
            }) => {
                if *modified {
                    return false;
                }
                children.values().cloned().collect()
            }
            NodeState::File(file) | NodeState::Symlink(file) => return !file.is_dirty(),
        };
        children.iter().all(|child| child.is_clean_deep())
    }

    /// Duplicate this subtree for a copy.
    ///
    /// Clean subtrees are shared by object id without touching the store;
    /// dirty content is cloned. The result is detached from any parent.
    pub(crate) fn deep_copy(self: &NodeRef) -> NodeRef {
        if let Some((id, mode)) = self.clean_entry() {
            return Self::stub(&TreeEntry::new(String::new(), id, mode));
        }
        let state = match &*self.lock() {
            NodeState::Directory(Listing::Loaded { children, .. }) => {
                let copied = children
                    .iter()
                    .map(|(name, child)| (name.clone(), child.clone()))
                    .collect::<Vec<_>>();
                return Self::copy_directory(copied);
            }
            NodeState::Directory(Listing::Unloaded(id)) => {
                NodeState::Directory(Listing::Unloaded(*id))
            }
            NodeState::File(file) => NodeState::File(file.duplicate()),
            NodeState::Symlink(file) => NodeState::Symlink(file.duplicate()),
        };
        Self::wrap(state)
    }

    fn copy_directory(children: Vec<(String, NodeRef)>) -> NodeRef {
        let children = children
            .into_iter()
            .map(|(name, child)| (name, child.deep_copy()))
            .collect();
        Self::wrap(NodeState::Directory(Listing::Loaded {
            children,
            base: None,
            modified: true,
        }))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Node");
        s.field("kind", &self.kind());
        s.field("dirty", &self.is_dirty());
        if let Some(id) = self.object_id() {
            s.field("id", &id);
        }
        s.finish()
    }
}
