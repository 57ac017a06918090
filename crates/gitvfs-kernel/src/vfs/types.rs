//! Attribute projections of overlay nodes.
//!
//! These are what the path-based façade hands out. Nothing here mutates
//! the overlay.

use gitvfs_cas::ObjectId;
use serde::{Deserialize, Serialize};

/// Permission bits of a regular file.
pub const MODE_FILE: u32 = 0o644;
/// Permission bits of an executable file.
pub const MODE_EXECUTABLE: u32 = 0o755;
/// Type and permission bits of a symbolic link.
pub const MODE_SYMLINK: u32 = 0o120777;
/// Type and permission bits of a directory.
pub const MODE_DIRECTORY: u32 = 0o040755;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// Node attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    pub kind: FileType,
    /// Size in bytes; the target length for links, 0 for directories.
    pub size: u64,
    pub executable: bool,
    /// POSIX mode.
    pub mode: u32,
    /// Object id while the node matches a stored object.
    pub id: Option<ObjectId>,
}

impl FileAttr {
    pub fn new(kind: FileType, size: u64, executable: bool, id: Option<ObjectId>) -> Self {
        let mode = match kind {
            FileType::File if executable => MODE_EXECUTABLE,
            FileType::File => MODE_FILE,
            FileType::Directory => MODE_DIRECTORY,
            FileType::Symlink => MODE_SYMLINK,
        };
        Self {
            kind,
            size,
            executable: executable && kind.is_file(),
            mode,
            id,
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}
