//! VFS operations trait.
//!
//! Path-based, no inodes, explicit offset/size, so it can sit behind an
//! RPC or FUSE layer that keeps its own handle state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::types::{DirEntry, FileAttr};
use crate::channel::OpenOptions;
use crate::error::{GfsError, GfsResult};
use crate::session::Session;

/// Core VFS operations trait.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get node attributes.
    async fn getattr(&self, path: &Path) -> GfsResult<FileAttr>;

    /// Read directory entries, sorted by name.
    async fn readdir(&self, path: &Path) -> GfsResult<Vec<DirEntry>>;

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes at end of file.
    async fn read(&self, path: &Path, offset: u64, size: u32) -> GfsResult<Vec<u8>>;

    /// Read symbolic link target.
    async fn readlink(&self, path: &Path) -> GfsResult<PathBuf>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `data` at `offset`. Returns the number of bytes written.
    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> GfsResult<u32>;

    /// Create an empty file. Any execute bit in `mode` makes it executable.
    async fn create(&self, path: &Path, mode: u32) -> GfsResult<FileAttr>;

    /// Create a new directory. `mode` is ignored; trees carry no
    /// directory permissions.
    async fn mkdir(&self, path: &Path, mode: u32) -> GfsResult<FileAttr>;

    /// Remove a file or symbolic link.
    async fn unlink(&self, path: &Path) -> GfsResult<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &Path) -> GfsResult<()>;

    /// Rename a node, replacing a file or empty directory at `to`.
    async fn rename(&self, from: &Path, to: &Path) -> GfsResult<()>;

    /// Shrink a file to `size`.
    async fn truncate(&self, path: &Path, size: u64) -> GfsResult<()>;

    /// Create a symbolic link at `path` pointing to `target`.
    async fn symlink(&self, path: &Path, target: &Path) -> GfsResult<FileAttr>;

    /// Set or clear the executable bit.
    async fn set_executable(&self, path: &Path, executable: bool) -> GfsResult<FileAttr>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &Path) -> GfsResult<Vec<u8>> {
        let attr = self.getattr(path).await?;
        let size = u32::try_from(attr.size)
            .map_err(|_| GfsError::invalid_path(format!("{}: file too large", path.display())))?;
        self.read(path, 0, size).await
    }

    /// Replace entire file contents, creating the file if needed.
    async fn write_all(&self, path: &Path, data: &[u8]) -> GfsResult<()> {
        if self.exists(path).await {
            self.truncate(path, 0).await?;
        } else {
            self.create(path, 0o644).await?;
        }
        self.write(path, 0, data).await?;
        Ok(())
    }
}

fn text(path: &Path) -> GfsResult<&str> {
    path.to_str()
        .ok_or_else(|| GfsError::invalid_path(path.to_string_lossy()))
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[async_trait]
impl VfsOps for Session {
    async fn getattr(&self, path: &Path) -> GfsResult<FileAttr> {
        self.attr(text(path)?)
    }

    async fn readdir(&self, path: &Path) -> GfsResult<Vec<DirEntry>> {
        self.list(text(path)?)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> GfsResult<Vec<u8>> {
        let mut channel = self.open_channel(text(path)?, &OpenOptions::new().read(true))?;
        channel.set_position(offset)?;
        let remaining = channel.size()?.saturating_sub(offset).min(u64::from(size));
        let mut buf = vec![0u8; usize::try_from(remaining).unwrap_or(usize::MAX)];
        let mut filled = 0;
        while filled < buf.len() {
            match channel.read(&mut buf[filled..])? {
                Some(n) if n > 0 => filled += n,
                _ => break,
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    async fn readlink(&self, path: &Path) -> GfsResult<PathBuf> {
        Ok(PathBuf::from(self.read_symlink(text(path)?)?))
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> GfsResult<u32> {
        Ok(to_u32(self.write_bytes(text(path)?, offset, data)?))
    }

    async fn create(&self, path: &Path, mode: u32) -> GfsResult<FileAttr> {
        let path = text(path)?;
        self.create_file(path, &[], mode & 0o111 != 0)?;
        self.attr(path)
    }

    async fn mkdir(&self, path: &Path, _mode: u32) -> GfsResult<FileAttr> {
        let path = text(path)?;
        self.create_directory(path)?;
        self.attr(path)
    }

    async fn unlink(&self, path: &Path) -> GfsResult<()> {
        let path = text(path)?;
        match self.resolve(path)? {
            Some(node) if node.is_directory() => Err(GfsError::is_a_directory(path)),
            Some(_) => self.delete(path),
            None => Err(GfsError::no_such_file(path)),
        }
    }

    async fn rmdir(&self, path: &Path) -> GfsResult<()> {
        let path = text(path)?;
        match self.resolve(path)? {
            Some(node) if node.is_directory() => self.delete(path),
            Some(_) => Err(GfsError::not_a_directory(path)),
            None => Err(GfsError::no_such_file(path)),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> GfsResult<()> {
        self.move_node(text(from)?, text(to)?, true)
    }

    async fn truncate(&self, path: &Path, size: u64) -> GfsResult<()> {
        Session::truncate(self, text(path)?, size)
    }

    async fn symlink(&self, path: &Path, target: &Path) -> GfsResult<FileAttr> {
        let path = text(path)?;
        self.create_symlink(path, text(target)?)?;
        self.attr(path)
    }

    async fn set_executable(&self, path: &Path, executable: bool) -> GfsResult<FileAttr> {
        let path = text(path)?;
        Session::set_executable(self, path, executable)?;
        self.attr(path)
    }
}
