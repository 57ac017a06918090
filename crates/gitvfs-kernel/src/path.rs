//! Path algebra.
//!
//! A [`GfsPath`] is an immutable sequence of names plus an absolute flag and
//! the id of the session that owns it. Parsing drops `.` segments but keeps
//! `..` literally: the overlay is mutable, so `..` is resolved against the
//! visited-node stack at lookup time rather than collapsed up front.
//!
//! The empty path (`""`) is relative and distinct from the root (`"/"`).

use std::fmt;

use crate::error::{GfsError, GfsResult};
use crate::session::SessionId;

/// The path separator.
pub const SEPARATOR: char = '/';

const PARENT: &str = "..";
const CURRENT: &str = ".";

/// A path inside one overlay session.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GfsPath {
    fs: SessionId,
    absolute: bool,
    names: Vec<String>,
}

impl GfsPath {
    /// Parse path text.
    ///
    /// Fails on an embedded NUL or on an empty segment (`a//b`). A leading
    /// `//` is accepted as a UNC-style spelling of the root, and a single
    /// trailing separator is ignored.
    pub fn parse(fs: SessionId, text: &str) -> GfsResult<Self> {
        if text.contains('\0') {
            return Err(GfsError::invalid_path(text.replace('\0', "\\0")));
        }

        let absolute = text.starts_with(SEPARATOR);
        let mut body = text
            .strip_prefix("//")
            .or_else(|| text.strip_prefix(SEPARATOR))
            .unwrap_or(text);
        if let Some(stripped) = body.strip_suffix(SEPARATOR) {
            body = stripped;
        }

        let mut names = Vec::new();
        if !body.is_empty() {
            for segment in body.split(SEPARATOR) {
                match segment {
                    "" => return Err(GfsError::invalid_path(text)),
                    CURRENT => {}
                    name => names.push(name.to_string()),
                }
            }
        }

        Ok(Self {
            fs,
            absolute,
            names,
        })
    }

    /// The root path `/`.
    pub fn root(fs: SessionId) -> Self {
        Self {
            fs,
            absolute: true,
            names: Vec::new(),
        }
    }

    /// The empty path.
    pub fn empty(fs: SessionId) -> Self {
        Self {
            fs,
            absolute: false,
            names: Vec::new(),
        }
    }

    /// The owning session.
    pub fn session(&self) -> &SessionId {
        &self.fs
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Returns true for `/`.
    pub fn is_root(&self) -> bool {
        self.absolute && self.names.is_empty()
    }

    /// Returns true for the empty path.
    pub fn is_empty(&self) -> bool {
        !self.absolute && self.names.is_empty()
    }

    /// Name segments, `..` included.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// The last name, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.names.last().map(String::as_str)
    }

    /// The parent path.
    ///
    /// `/a` has parent `/`; a single relative name and the root have none.
    pub fn parent(&self) -> Option<GfsPath> {
        match self.names.len() {
            0 => None,
            1 if !self.absolute => None,
            n => Some(Self {
                fs: self.fs.clone(),
                absolute: self.absolute,
                names: self.names[..n - 1].to_vec(),
            }),
        }
    }

    /// Resolve `other` against this path.
    ///
    /// An absolute `other` wins outright; the empty path resolves to `self`.
    pub fn resolve(&self, other: &GfsPath) -> GfsPath {
        if other.absolute {
            return other.clone();
        }
        if other.names.is_empty() {
            return self.clone();
        }
        let mut names = self.names.clone();
        names.extend(other.names.iter().cloned());
        Self {
            fs: self.fs.clone(),
            absolute: self.absolute,
            names,
        }
    }

    /// Parse `text` and resolve it against this path.
    pub fn join(&self, text: &str) -> GfsResult<GfsPath> {
        let other = Self::parse(self.fs.clone(), text)?;
        Ok(self.resolve(&other))
    }

    /// Resolve against the root.
    pub fn to_absolute(&self) -> GfsPath {
        Self::root(self.fs.clone()).resolve(self)
    }

    /// Collapse `..` segments lexically.
    ///
    /// `..` directly under the root is dropped; leading `..` of a relative
    /// path is kept.
    pub fn normalize(&self) -> GfsPath {
        let mut names: Vec<String> = Vec::with_capacity(self.names.len());
        for name in &self.names {
            if name != PARENT {
                names.push(name.clone());
                continue;
            }
            match names.last() {
                Some(last) if last != PARENT => {
                    names.pop();
                }
                _ if self.absolute => {}
                _ => names.push(PARENT.to_string()),
            }
        }
        Self {
            fs: self.fs.clone(),
            absolute: self.absolute,
            names,
        }
    }

    /// Build the relative path that leads from `self` to `other`.
    ///
    /// Both paths must belong to the same session and agree on
    /// absoluteness (the empty path is relative). The result climbs out of
    /// the unshared tail of `self` with `..` and then descends into the
    /// unshared tail of `other`.
    pub fn relativize(&self, other: &GfsPath) -> GfsResult<GfsPath> {
        let illegal = || GfsError::IllegalRelativization {
            base: self.to_string(),
            other: other.to_string(),
        };
        if self.fs != other.fs || self.absolute != other.absolute {
            return Err(illegal());
        }

        let base = self.normalize();
        let target = other.normalize();
        let common = base
            .names
            .iter()
            .zip(&target.names)
            .take_while(|(a, b)| a == b)
            .count();
        if base.names[common..].iter().any(|n| n == PARENT) {
            return Err(illegal());
        }

        let mut names = vec![PARENT.to_string(); base.names.len() - common];
        names.extend(target.names[common..].iter().cloned());
        Ok(Self {
            fs: self.fs.clone(),
            absolute: false,
            names,
        })
    }

    /// Returns true if `other` is a leading prefix of this path.
    pub fn starts_with(&self, other: &GfsPath) -> bool {
        self.fs == other.fs
            && self.absolute == other.absolute
            && self.names.len() >= other.names.len()
            && self.names[..other.names.len()] == other.names[..]
    }

    /// Returns true if `other` is a trailing suffix of this path.
    ///
    /// An absolute `other` must equal this path; the empty path only ends
    /// the empty path.
    pub fn ends_with(&self, other: &GfsPath) -> bool {
        if self.fs != other.fs {
            return false;
        }
        if other.absolute {
            return self == other;
        }
        if other.names.is_empty() {
            return self.is_empty();
        }
        self.names.len() >= other.names.len()
            && self.names[self.names.len() - other.names.len()..] == other.names[..]
    }

    /// `gfs://<session>/<path>` form of the absolute path.
    pub fn to_uri(&self) -> String {
        format!("{}{}", self.fs.uri_prefix(), self.to_absolute().names.join("/"))
    }
}

/// Anything a session accepts as a path: text to parse or a parsed path.
pub trait AsGfsPath {
    fn as_gfs_path(&self, session: &SessionId) -> GfsResult<GfsPath>;
}

impl AsGfsPath for str {
    fn as_gfs_path(&self, session: &SessionId) -> GfsResult<GfsPath> {
        GfsPath::parse(session.clone(), self)
    }
}

impl AsGfsPath for String {
    fn as_gfs_path(&self, session: &SessionId) -> GfsResult<GfsPath> {
        GfsPath::parse(session.clone(), self)
    }
}

impl AsGfsPath for GfsPath {
    fn as_gfs_path(&self, _session: &SessionId) -> GfsResult<GfsPath> {
        Ok(self.clone())
    }
}

impl<T: AsGfsPath + ?Sized> AsGfsPath for &T {
    fn as_gfs_path(&self, session: &SessionId) -> GfsResult<GfsPath> {
        (**self).as_gfs_path(session)
    }
}

impl fmt::Display for GfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str("/")?;
        }
        f.write_str(&self.names.join("/"))
    }
}

impl fmt::Debug for GfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GfsPath({:?})", self.to_string())
    }
}
