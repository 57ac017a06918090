//! Sessions: one overlay bound to a commit, tree, or branch.
//!
//! A [`Session`] is the unit callers work with. It owns an [`Overlay`],
//! turns path text into [`GfsPath`]s scoped to itself, and carries the
//! commit defaults from its [`SessionConfig`]. Sessions live in a
//! [`SessionRegistry`](crate::SessionRegistry) until closed.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use gitvfs_cas::{CommitMetadata, ObjectId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::channel::{GfsChannel, OpenOptions};
use crate::commit::{CommitRequest, commit_overlay};
use crate::config::SessionConfig;
use crate::error::{GfsError, GfsResult};
use crate::merge::{MergeResult, merge_into};
use crate::node::NodeRef;
use crate::overlay::Overlay;
use crate::path::{AsGfsPath, GfsPath};
use crate::registry::Tables;
use crate::vfs::{DirEntry, FileAttr, FileType};

/// URI scheme for session paths.
pub const URI_SCHEME: &str = "gfs";

/// A session identifier.
///
/// Generated ids are UUIDv7 in simple hex form, so they sort by creation
/// time. Callers may also pick their own; any non-empty string without a
/// `/` works.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new time-ordered id.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7().as_simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for logs.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }

    /// `gfs://<id>/`
    pub fn uri_prefix(&self) -> String {
        format!("{URI_SCHEME}://{}/", self.0)
    }

    pub fn validate(&self) -> GfsResult<()> {
        if self.0.is_empty() || self.0.contains('/') {
            return Err(GfsError::invalid_config(format!(
                "invalid session id {:?}",
                self.0
            )));
        }
        Ok(())
    }

    /// Split a `gfs://<id>/<path>` URI into the session id and the
    /// absolute path text.
    pub fn split_uri(uri: &str) -> GfsResult<(SessionId, String)> {
        let rest = uri
            .strip_prefix(URI_SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| GfsError::invalid_path(uri))?;
        let (id, path) = match rest.split_once('/') {
            Some((id, path)) => (id, path),
            None => (rest, ""),
        };
        let id = SessionId::from(id);
        id.validate().map_err(|_| GfsError::invalid_path(uri))?;
        Ok((id, format!("/{path}")))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for SessionId {
    type Err = GfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Self::from(s);
        id.validate()?;
        Ok(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// What [`Session::close`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
}

impl CloseOutcome {
    /// Treat a repeated close as an error.
    pub fn into_result(self, id: &SessionId) -> GfsResult<()> {
        match self {
            CloseOutcome::Closed => Ok(()),
            CloseOutcome::AlreadyClosed => Err(GfsError::SessionAlreadyClosed(id.to_string())),
        }
    }
}

/// A live overlay session.
pub struct Session {
    overlay: Arc<Overlay>,
    config: SessionConfig,
    registry: Weak<Mutex<Tables>>,
}

impl Session {
    pub(crate) fn new(
        overlay: Arc<Overlay>,
        config: SessionConfig,
        registry: Weak<Mutex<Tables>>,
    ) -> Self {
        Self {
            overlay,
            config,
            registry,
        }
    }

    pub fn id(&self) -> &SessionId {
        self.overlay.id()
    }

    /// `gfs://<id>/`
    pub fn uri(&self) -> String {
        self.id().uri_prefix()
    }

    /// Branch commits advance, if the session is bound to one.
    pub fn branch(&self) -> Option<&str> {
        self.config.branch.as_deref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn overlay(&self) -> &Arc<Overlay> {
        &self.overlay
    }

    pub fn is_closed(&self) -> bool {
        self.overlay.is_closed()
    }

    // ========================================================================
    // Paths
    // ========================================================================

    /// Parse path text against this session.
    pub fn path(&self, path: impl AsGfsPath) -> GfsResult<GfsPath> {
        path.as_gfs_path(self.id())
    }

    pub fn root_path(&self) -> GfsPath {
        GfsPath::root(self.id().clone())
    }

    // ========================================================================
    // Tree
    // ========================================================================

    pub fn resolve(&self, path: impl AsGfsPath) -> GfsResult<Option<NodeRef>> {
        self.overlay.resolve(&self.path(path)?)
    }

    pub fn exists(&self, path: impl AsGfsPath) -> GfsResult<bool> {
        Ok(self.resolve(path)?.is_some())
    }

    pub fn list(&self, path: impl AsGfsPath) -> GfsResult<Vec<DirEntry>> {
        self.overlay.list(&self.path(path)?)
    }

    /// Attributes of the node at `path`.
    pub fn attr(&self, path: impl AsGfsPath) -> GfsResult<FileAttr> {
        let path = self.path(path)?;
        let node = self
            .overlay
            .resolve(&path)?
            .ok_or_else(|| GfsError::no_such_file(path.to_string()))?;
        let size = match node.kind() {
            FileType::Directory => 0,
            _ => self.overlay.size(&path)?,
        };
        Ok(FileAttr::new(
            node.kind(),
            size,
            node.is_executable(),
            node.object_id(),
        ))
    }

    pub fn create_file(
        &self,
        path: impl AsGfsPath,
        content: &[u8],
        executable: bool,
    ) -> GfsResult<NodeRef> {
        self.overlay
            .create_file(&self.path(path)?, content, executable)
    }

    pub fn create_directory(&self, path: impl AsGfsPath) -> GfsResult<NodeRef> {
        self.overlay.create_directory(&self.path(path)?)
    }

    /// Create every missing directory along `path`.
    pub fn create_directories(&self, path: impl AsGfsPath) -> GfsResult<()> {
        let path = self.path(path)?.to_absolute().normalize();
        let mut current = self.root_path();
        for name in path.names() {
            current = current.join(name)?;
            match self.overlay.resolve(&current)? {
                Some(node) if node.is_directory() => {}
                Some(_) => return Err(GfsError::not_a_directory(current.to_string())),
                None => match self.overlay.create_directory(&current) {
                    Ok(_) | Err(GfsError::FileAlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }

    pub fn create_symlink(&self, path: impl AsGfsPath, target: &str) -> GfsResult<NodeRef> {
        self.overlay.create_symlink(&self.path(path)?, target)
    }

    pub fn delete(&self, path: impl AsGfsPath) -> GfsResult<()> {
        self.overlay.delete(&self.path(path)?)
    }

    pub fn move_node(
        &self,
        source: impl AsGfsPath,
        target: impl AsGfsPath,
        replace_existing: bool,
    ) -> GfsResult<()> {
        self.overlay
            .move_node(&self.path(source)?, &self.path(target)?, replace_existing)
    }

    pub fn copy(
        &self,
        source: impl AsGfsPath,
        target: impl AsGfsPath,
        replace_existing: bool,
    ) -> GfsResult<()> {
        self.overlay
            .copy(&self.path(source)?, &self.path(target)?, replace_existing)
    }

    // ========================================================================
    // Content
    // ========================================================================

    pub fn read_bytes(&self, path: impl AsGfsPath) -> GfsResult<Vec<u8>> {
        self.overlay.read_bytes(&self.path(path)?)
    }

    pub fn write_bytes(&self, path: impl AsGfsPath, offset: u64, data: &[u8]) -> GfsResult<usize> {
        self.overlay.write_bytes(&self.path(path)?, offset, data)
    }

    pub fn truncate(&self, path: impl AsGfsPath, size: u64) -> GfsResult<()> {
        self.overlay.truncate(&self.path(path)?, size)
    }

    pub fn read_symlink(&self, path: impl AsGfsPath) -> GfsResult<String> {
        self.overlay.read_symlink(&self.path(path)?)
    }

    pub fn set_executable(&self, path: impl AsGfsPath, executable: bool) -> GfsResult<()> {
        self.overlay.set_executable(&self.path(path)?, executable)
    }

    pub fn size(&self, path: impl AsGfsPath) -> GfsResult<u64> {
        self.overlay.size(&self.path(path)?)
    }

    /// Open a byte channel on a regular file.
    pub fn open_channel(&self, path: impl AsGfsPath, options: &OpenOptions) -> GfsResult<GfsChannel> {
        let path = self.path(path)?;
        let exclusive = options.creates() && options.create_new;

        let node = match self.overlay.resolve(&path)? {
            Some(_) if exclusive => return Err(GfsError::already_exists(path.to_string())),
            Some(node) => node,
            None if options.creates() => match self.overlay.create_file(&path, &[], false) {
                Ok(node) => node,
                // Lost a race with another creator.
                Err(GfsError::FileAlreadyExists(_)) if !exclusive => self
                    .overlay
                    .resolve(&path)?
                    .ok_or_else(|| GfsError::no_such_file(path.to_string()))?,
                Err(e) => return Err(e),
            },
            None => return Err(GfsError::no_such_file(path.to_string())),
        };

        match node.kind() {
            FileType::File => {}
            FileType::Directory => return Err(GfsError::is_a_directory(path.to_string())),
            FileType::Symlink => return Err(GfsError::not_a_file(path.to_string())),
        }
        if options.truncate && options.writable() {
            self.overlay
                .with_content(&node, &path, FileType::File, |file| file.truncate(0))?;
        }
        Ok(GfsChannel::new(self.overlay.clone(), node, path, options))
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Release clean cached content. Returns how much was dropped.
    pub fn evict_clean(&self) -> GfsResult<usize> {
        self.overlay.evict_clean()
    }

    pub fn has_uncommitted_changes(&self) -> GfsResult<bool> {
        self.overlay.has_uncommitted_changes()
    }

    pub fn base_commit(&self) -> GfsResult<Option<ObjectId>> {
        self.overlay.base_commit()
    }

    pub fn base_tree(&self) -> GfsResult<Option<ObjectId>> {
        self.overlay.base_tree()
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Commit the overlay as the configured committer.
    ///
    /// Fails with [`GfsError::EmptyCommit`] when nothing changed, unless
    /// `allow_empty` (or the session default) says otherwise.
    pub fn commit(&self, message: impl Into<String>, allow_empty: bool) -> GfsResult<ObjectId> {
        let metadata = CommitMetadata::new(message, self.config.committer.signature());
        self.commit_with(&metadata, allow_empty)
    }

    /// Commit with explicit author and committer.
    #[instrument(skip_all, fields(session = %self.id().short(), branch = ?self.branch()))]
    pub fn commit_with(&self, metadata: &CommitMetadata, allow_empty: bool) -> GfsResult<ObjectId> {
        let mut st = self.overlay.write_state()?;
        commit_overlay(
            self.overlay.store().as_ref(),
            &mut st,
            CommitRequest {
                metadata,
                allow_empty: allow_empty || self.config.allow_empty_commits,
                branch: self.branch(),
            },
        )
    }

    /// Merge commit `theirs` into this session.
    ///
    /// Uncommitted changes are kept unless theirs touches the same paths,
    /// in which case the merge fails with [`GfsError::UncommittedChanges`]
    /// and nothing moves. On conflict, or when there were uncommitted
    /// changes, the overlay holds the merged tree and the next
    /// [`commit`](Self::commit) records `theirs` as a second parent.
    #[instrument(skip(self), fields(session = %self.id().short()))]
    pub fn merge(&self, theirs: ObjectId) -> GfsResult<MergeResult> {
        let metadata = CommitMetadata::new(
            self.config.merge_message_for(&theirs),
            self.config.committer.signature(),
        );
        let mut st = self.overlay.write_state()?;
        merge_into(&self.overlay, &mut st, theirs, &metadata, self.branch())
    }

    /// Close the session and drop it from its registry.
    ///
    /// Open channels start failing with [`GfsError::ClosedChannel`].
    pub fn close(&self) -> CloseOutcome {
        if !self.overlay.mark_closed() {
            return CloseOutcome::AlreadyClosed;
        }
        if let Some(tables) = self.registry.upgrade() {
            tables.lock().remove(self.id(), &self.overlay);
        }
        info!(session = %self.id(), "session closed");
        CloseOutcome::Closed
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", self.id())
            .field("branch", &self.config.branch)
            .field("closed", &self.is_closed())
            .finish()
    }
}
