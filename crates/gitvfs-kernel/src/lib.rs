//! # gitvfs-kernel
//!
//! A copy-on-write filesystem overlay over an immutable, content-addressed
//! object graph (git's blob/tree/commit model).
//!
//! A session:
//! - Binds to a commit, a bare tree, a branch, or nothing at all
//! - Loads directories lazily and keeps every change in memory
//! - Commits the overlay as new tree and commit objects, advancing its branch
//! - Merges another commit three-way, leaving conflicts in the overlay
//!
//! Sessions are addressed as `gfs://<session-id>/<path>` and tracked in a
//! [`SessionRegistry`].

pub mod channel;
mod commit;
pub mod config;
pub mod error;
pub mod merge;
pub mod node;
pub mod overlay;
pub mod path;
pub mod registry;
pub mod session;
pub mod vfs;

pub use channel::{GfsChannel, OpenOptions};
pub use config::{Committer, SessionBuilder, SessionConfig, SessionTarget};
pub use error::{GfsError, GfsResult};
pub use merge::{MergeKind, MergeResult, TextMerge};
pub use node::{Node, NodeRef};
pub use overlay::Overlay;
pub use path::{AsGfsPath, GfsPath};
pub use registry::SessionRegistry;
pub use session::{CloseOutcome, Session, SessionId};
pub use vfs::{DirEntry, FileAttr, FileType, VfsOps};

pub use gitvfs_cas::{
    CommitMetadata, EntryMode, GitObjectStore, MemoryObjectStore, ObjectId, ObjectStore,
    Signature, StoreError,
};
