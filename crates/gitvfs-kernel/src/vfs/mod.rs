//! Path-based filesystem façade.
//!
//! - [`VfsOps`] - async, path-based operations over a session
//! - [`FileAttr`], [`DirEntry`] - attribute projections of nodes
//!
//! Paths are `std::path::Path`s interpreted against the session root;
//! relative paths are anchored there too.

mod ops;
mod types;

pub use ops::VfsOps;
pub use types::{
    DirEntry, FileAttr, FileType, MODE_DIRECTORY, MODE_EXECUTABLE, MODE_FILE, MODE_SYMLINK,
};
