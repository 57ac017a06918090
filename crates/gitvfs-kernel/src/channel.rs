//! Random-access byte channels over file nodes.
//!
//! A channel pins its node, not its path: moving or deleting the file
//! leaves the channel working on the same node. Every operation goes
//! through the node's mutex, so channels on one file serialize while
//! channels on different files run in parallel.

use std::io;
use std::sync::Arc;

use tracing::debug;

use crate::error::{GfsError, GfsResult};
use crate::node::NodeRef;
use crate::overlay::Overlay;
use crate::path::GfsPath;
use crate::vfs::FileType;

/// How to open a channel.
///
/// Mirrors `std::fs::OpenOptions`. A channel opened with neither `read`
/// nor `write` is read-only; `append` implies `write`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub(crate) read: bool,
    pub(crate) write: bool,
    pub(crate) append: bool,
    pub(crate) create: bool,
    pub(crate) create_new: bool,
    pub(crate) truncate: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Create the file if it does not exist.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Create the file, failing if it exists.
    pub fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    /// Empty an existing file on open. Ignored without write access.
    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub(crate) fn readable(&self) -> bool {
        self.read || !self.writable()
    }

    pub(crate) fn writable(&self) -> bool {
        self.write || self.append
    }

    pub(crate) fn creates(&self) -> bool {
        self.writable() && (self.create || self.create_new)
    }
}

/// A random-access handle on one file.
pub struct GfsChannel {
    overlay: Arc<Overlay>,
    node: NodeRef,
    path: GfsPath,
    position: u64,
    readable: bool,
    writable: bool,
    append: bool,
    open: bool,
}

impl GfsChannel {
    pub(crate) fn new(
        overlay: Arc<Overlay>,
        node: NodeRef,
        path: GfsPath,
        options: &OpenOptions,
    ) -> Self {
        debug!(%path, read = options.readable(), write = options.writable(), "channel open");
        Self {
            overlay,
            node,
            path,
            position: 0,
            readable: options.readable(),
            writable: options.writable(),
            append: options.append,
            open: true,
        }
    }

    /// Path the channel was opened with. The file may have moved since.
    pub fn path(&self) -> &GfsPath {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.open && !self.overlay.is_closed()
    }

    fn ensure_open(&self) -> GfsResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(GfsError::ClosedChannel)
        }
    }

    fn ensure_readable(&self) -> GfsResult<()> {
        self.ensure_open()?;
        if !self.readable {
            return Err(GfsError::NonReadableChannel);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> GfsResult<()> {
        self.ensure_open()?;
        if !self.writable {
            return Err(GfsError::NonWritableChannel);
        }
        Ok(())
    }

    fn with_file<R>(&self, f: impl FnOnce(&mut crate::node::FileState) -> R) -> GfsResult<R> {
        self.overlay
            .with_content(&self.node, &self.path, FileType::File, f)
            .map_err(|e| match e {
                GfsError::SessionClosed(_) => GfsError::ClosedChannel,
                other => other,
            })
    }

    /// Read into `buf` from the current position.
    ///
    /// Returns `None` at end of data, otherwise the number of bytes copied.
    pub fn read(&mut self, buf: &mut [u8]) -> GfsResult<Option<usize>> {
        self.ensure_readable()?;
        let position = self.position;
        let n = self.with_file(|file| {
            (position < file.size()).then(|| file.read_at(position, buf))
        })?;
        if let Some(n) = n {
            self.position += n as u64;
        }
        Ok(n)
    }

    /// Write `buf` at the current position (or at the end in append mode),
    /// zero-filling any gap.
    pub fn write(&mut self, buf: &[u8]) -> GfsResult<usize> {
        self.ensure_writable()?;
        let append = self.append;
        let mut position = self.position;
        let n = self
            .with_file(|file| {
                if append {
                    position = file.size();
                }
                file.write_at(position, buf)
            })?
            .ok_or_else(|| GfsError::file_too_large(self.path.to_string()))?;
        // The write succeeded, so its end fits in memory and in a u64.
        self.position = position + n as u64;
        Ok(n)
    }

    /// Drop bytes past `size`, clamping the position. Growing is a no-op.
    pub fn truncate(&mut self, size: u64) -> GfsResult<()> {
        self.ensure_writable()?;
        self.with_file(|file| file.truncate(size))?;
        self.position = self.position.min(size);
        Ok(())
    }

    pub fn size(&self) -> GfsResult<u64> {
        self.ensure_open()?;
        self.with_file(|file| file.size())
    }

    pub fn position(&self) -> GfsResult<u64> {
        self.ensure_open()?;
        Ok(self.position)
    }

    /// Seek to an absolute position. Positions past the end are allowed.
    pub fn set_position(&mut self, position: u64) -> GfsResult<()> {
        self.ensure_open()?;
        self.position = position;
        Ok(())
    }

    /// Close the channel. Idempotent.
    pub fn close(&mut self) {
        self.open = false;
    }
}

impl std::fmt::Debug for GfsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GfsChannel")
            .field("path", &self.path)
            .field("position", &self.position)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("open", &self.open)
            .finish()
    }
}

impl io::Read for GfsChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(GfsChannel::read(self, buf)?.unwrap_or(0))
    }
}

impl io::Write for GfsChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(GfsChannel::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        Ok(())
    }
}

impl io::Seek for GfsChannel {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(n) => Some(n),
            io::SeekFrom::End(delta) => self.size()?.checked_add_signed(delta),
            io::SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        self.set_position(target)?;
        Ok(target)
    }
}
