//! Overlay error types.

use std::io;

use gitvfs_cas::StoreError;
use thiserror::Error;

/// Overlay filesystem error type.
#[derive(Debug, Error)]
pub enum GfsError {
    /// Path text could not be parsed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Two paths cannot be relativized against each other.
    #[error("cannot relativize {other} against {base}")]
    IllegalRelativization { base: String, other: String },

    /// File or directory not found.
    #[error("no such file: {0}")]
    NoSuchFile(String),

    /// A parent segment does not resolve to a directory.
    #[error("no such directory: {0}")]
    NoSuchDirectory(String),

    /// Path already exists.
    #[error("file already exists: {0}")]
    FileAlreadyExists(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file or symlink, found a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Expected a regular file (e.g. opening a channel on a symlink).
    #[error("not a regular file: {0}")]
    NotAFile(String),

    /// Expected a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotALink(String),

    /// A write would grow the file past what memory can hold.
    #[error("file too large: {0}")]
    FileTooLarge(String),

    /// Channel was opened without read capability.
    #[error("channel is not readable")]
    NonReadableChannel,

    /// Channel was opened without write capability.
    #[error("channel is not writable")]
    NonWritableChannel,

    /// Channel has been closed.
    #[error("channel is closed")]
    ClosedChannel,

    /// Commit would not change anything.
    #[error("nothing to commit")]
    EmptyCommit,

    /// The overlay has changes that a merge would clobber.
    #[error("uncommitted changes in the overlay")]
    UncommittedChanges,

    /// Object store failure.
    #[error("object store: {0}")]
    StoreIo(#[from] StoreError),

    /// Operation against a closed session.
    #[error("session is closed: {0}")]
    SessionClosed(String),

    /// Close on a session that was already closed.
    #[error("session already closed: {0}")]
    SessionAlreadyClosed(String),

    /// A live session with this id already exists.
    #[error("duplicate session: {0}")]
    DuplicateSession(String),

    /// Session configuration is incomplete or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GfsError {
    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a NoSuchFile error.
    pub fn no_such_file(path: impl Into<String>) -> Self {
        Self::NoSuchFile(path.into())
    }

    /// Create a NoSuchDirectory error.
    pub fn no_such_directory(path: impl Into<String>) -> Self {
        Self::NoSuchDirectory(path.into())
    }

    /// Create a FileAlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::FileAlreadyExists(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a NotAFile error.
    pub fn not_a_file(path: impl Into<String>) -> Self {
        Self::NotAFile(path.into())
    }

    /// Create a NotALink error.
    pub fn not_a_link(path: impl Into<String>) -> Self {
        Self::NotALink(path.into())
    }

    /// Create a FileTooLarge error.
    pub fn file_too_large(path: impl Into<String>) -> Self {
        Self::FileTooLarge(path.into())
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Convert GfsError to std::io::Error for the `std::io` channel traits.
impl From<GfsError> for io::Error {
    fn from(e: GfsError) -> Self {
        let e = match e {
            GfsError::StoreIo(StoreError::Io(inner)) => return inner,
            other => other,
        };
        let kind = match &e {
            GfsError::InvalidPath(_)
            | GfsError::IllegalRelativization { .. }
            | GfsError::NotALink(_)
            | GfsError::InvalidConfig(_) => io::ErrorKind::InvalidInput,
            GfsError::NoSuchFile(_) | GfsError::NoSuchDirectory(_) => io::ErrorKind::NotFound,
            GfsError::FileAlreadyExists(_) | GfsError::DuplicateSession(_) => {
                io::ErrorKind::AlreadyExists
            }
            GfsError::DirectoryNotEmpty(_) => io::ErrorKind::DirectoryNotEmpty,
            GfsError::NotADirectory(_) => io::ErrorKind::NotADirectory,
            GfsError::IsADirectory(_) => io::ErrorKind::IsADirectory,
            GfsError::FileTooLarge(_) => io::ErrorKind::FileTooLarge,
            GfsError::NonReadableChannel | GfsError::NonWritableChannel => {
                io::ErrorKind::PermissionDenied
            }
            GfsError::ClosedChannel
            | GfsError::SessionClosed(_)
            | GfsError::SessionAlreadyClosed(_) => io::ErrorKind::BrokenPipe,
            GfsError::NotAFile(_)
            | GfsError::EmptyCommit
            | GfsError::UncommittedChanges
            | GfsError::StoreIo(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

/// Overlay result type.
pub type GfsResult<T> = Result<T, GfsError>;
