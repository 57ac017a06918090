//! # gitvfs-cas
//!
//! Content-addressed object storage for gitvfs.
//!
//! The overlay engine only ever talks to storage through [`ObjectStore`]:
//! typed lookup of blobs, trees and commits by id, and store primitives that
//! return the id of what was written. Two stores ship with the crate:
//!
//! - [`MemoryObjectStore`] - process-local, BLAKE3-addressed. Used by tests
//!   and scratch sessions that never touch disk.
//! - [`GitObjectStore`] - a real repository through libgit2.
//!
//! ## Identity
//!
//! Ids are 20-byte content hashes. Equal content always yields an equal id,
//! which is what lets the commit builder detect a no-op commit by comparing
//! root tree ids.

mod git;
mod memory;

pub use git::GitObjectStore;
pub use memory::MemoryObjectStore;

use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of an object id in bytes.
pub const OBJECT_ID_LEN: usize = 20;

// ============================================================================
// Object ids
// ============================================================================

/// A content hash naming an immutable object.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// Wrap raw hash bytes.
    pub const fn new(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an id from a byte slice of exactly [`OBJECT_ID_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> StoreResult<Self> {
        let raw: [u8; OBJECT_ID_LEN] = bytes
            .try_into()
            .map_err(|_| StoreError::InvalidId(hex::encode(bytes)))?;
        Ok(Self(raw))
    }

    /// Parse a 40-character hex id.
    pub fn from_hex(s: &str) -> StoreResult<Self> {
        let bytes = hex::decode(s).map_err(|_| StoreError::InvalidId(s.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    /// Full 40-character hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 7 hex characters, for logs and messages only.
    pub fn short(&self) -> String {
        self.to_hex()[..7].to_string()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

impl FromStr for ObjectId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_hex()
    }
}

// ============================================================================
// Object model
// ============================================================================

/// Kind of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

/// Mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum EntryMode {
    /// Subdirectory (`040000`).
    Tree,
    /// Regular file (`100644`).
    Blob,
    /// Executable regular file (`100755`).
    Executable,
    /// Symbolic link (`120000`).
    Symlink,
}

impl EntryMode {
    /// The git file mode bits.
    pub fn bits(self) -> u32 {
        match self {
            EntryMode::Tree => 0o040000,
            EntryMode::Blob => 0o100644,
            EntryMode::Executable => 0o100755,
            EntryMode::Symlink => 0o120000,
        }
    }

    /// Decode git file mode bits. Legacy group-writable blobs (`100664`)
    /// decode as plain blobs; gitlinks are not supported.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0o040000 => Some(EntryMode::Tree),
            0o100644 | 0o100664 => Some(EntryMode::Blob),
            0o100755 => Some(EntryMode::Executable),
            0o120000 => Some(EntryMode::Symlink),
            _ => None,
        }
    }

    /// Returns true for subdirectory entries.
    pub fn is_tree(self) -> bool {
        matches!(self, EntryMode::Tree)
    }

    /// The kind of object this entry points at.
    pub fn object_kind(self) -> ObjectKind {
        match self {
            EntryMode::Tree => ObjectKind::Tree,
            _ => ObjectKind::Blob,
        }
    }
}

/// One name -> object mapping inside a tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub id: ObjectId,
    pub mode: EntryMode,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, id: ObjectId, mode: EntryMode) -> Self {
        Self {
            name: name.into(),
            id,
            mode,
        }
    }
}

/// Canonical tree ordering.
///
/// Names compare as raw UTF-8 bytes, with tree names compared as if they
/// carried a trailing `/`. This is git's ordering, so `a.txt` sorts before
/// the directory `a` only when `.` (0x2e) < `/` (0x2f).
pub fn tree_order(a_name: &str, a_is_tree: bool, b_name: &str, b_is_tree: bool) -> Ordering {
    let a = a_name.as_bytes();
    let b = b_name.as_bytes();
    let common = a.len().min(b.len());
    match a[..common].cmp(&b[..common]) {
        Ordering::Equal => {}
        other => return other,
    }
    let a_next = a.get(common).copied().or(a_is_tree.then_some(b'/'));
    let b_next = b.get(common).copied().or(b_is_tree.then_some(b'/'));
    a_next.cmp(&b_next)
}

/// Sort entries into canonical tree order.
pub fn sort_tree_entries(entries: &mut [TreeEntry]) {
    entries.sort_by(|a, b| tree_order(&a.name, a.mode.is_tree(), &b.name, b.mode.is_tree()));
}

/// Validate a tree entry name: non-empty, no separator, no NUL, not `.`/`..`.
pub fn validate_entry_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(StoreError::Corrupt(format!("invalid tree entry name: {name:?}")));
    }
    Ok(())
}

/// Author or committer identity with a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub when: i64,
    /// Timezone offset in minutes.
    #[serde(default)]
    pub offset_minutes: i32,
}

impl Signature {
    /// A signature stamped with the current time (UTC).
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        let when = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::at(name, email, when)
    }

    /// A signature with an explicit timestamp (UTC).
    pub fn at(name: impl Into<String>, email: impl Into<String>, when: i64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when,
            offset_minutes: 0,
        }
    }
}

/// Descriptive data attached to a new commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
}

impl CommitMetadata {
    /// Metadata where author and committer are the same identity.
    pub fn new(message: impl Into<String>, signature: Signature) -> Self {
        Self {
            message: message.into(),
            author: signature.clone(),
            committer: signature,
        }
    }
}

/// A commit as seen by the overlay: its tree and its parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitData {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub message: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Object store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object with this id.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// The object exists but is not of the requested kind.
    #[error("object {id} is not a {expected}")]
    WrongKind { id: ObjectId, expected: ObjectKind },

    /// Malformed id text or bytes.
    #[error("invalid object id: {0}")]
    InvalidId(String),

    /// Malformed object content.
    #[error("corrupt object: {0}")]
    Corrupt(String),

    /// A reference moved underneath a compare-and-swap update.
    #[error("reference {name} was updated concurrently")]
    RefConflict { name: String },

    /// libgit2 failure.
    #[error("git: {0}")]
    Git(#[from] git2::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Store trait
// ============================================================================

/// Content-addressed object storage.
///
/// Implementations must be deterministic: storing equal content twice
/// returns the same id. All calls are synchronous; callers that live on an
/// async runtime should move them onto a blocking thread.
pub trait ObjectStore: Send + Sync {
    /// Fetch the bytes of a blob.
    fn fetch_blob(&self, id: &ObjectId) -> StoreResult<Vec<u8>>;

    /// Fetch the entries of a tree in canonical order.
    fn fetch_tree(&self, id: &ObjectId) -> StoreResult<Vec<TreeEntry>>;

    /// Fetch a commit's tree and parents.
    fn fetch_commit(&self, id: &ObjectId) -> StoreResult<CommitData>;

    /// Store a blob and return its id.
    fn store_blob(&self, data: &[u8]) -> StoreResult<ObjectId>;

    /// Store a tree. Entries may be given in any order.
    fn store_tree(&self, entries: &[TreeEntry]) -> StoreResult<ObjectId>;

    /// Store a commit object.
    fn store_commit(
        &self,
        tree: &ObjectId,
        parents: &[ObjectId],
        metadata: &CommitMetadata,
    ) -> StoreResult<ObjectId>;

    /// Resolve a named reference. Short names are branch names.
    fn read_ref(&self, name: &str) -> StoreResult<Option<ObjectId>>;

    /// Point a reference at `new`.
    ///
    /// When `expected` is given the update only happens if the reference
    /// still holds that value; when it is `None` the reference must not
    /// exist yet. Either mismatch is [`StoreError::RefConflict`].
    fn update_ref(&self, name: &str, new: &ObjectId, expected: Option<&ObjectId>)
        -> StoreResult<()>;
}

/// Expand a short branch name to a full reference name.
pub fn full_ref_name(name: &str) -> String {
    if name.starts_with("refs/") || name == "HEAD" {
        name.to_string()
    } else {
        format!("refs/heads/{name}")
    }
}
