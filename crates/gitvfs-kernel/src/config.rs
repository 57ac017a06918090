//! Session configuration.
//!
//! A session is described by what it is bound to (a branch, a commit, a
//! bare tree, or nothing), who signs its commits, and a few commit
//! defaults. Configs load from TOML:
//!
//! ```toml
//! branch = "main"
//! merge_message = "Merge {theirs}"
//!
//! [committer]
//! name = "Build Bot"
//! email = "bot@example.com"
//! ```
//!
//! [`SessionBuilder`] is the programmatic equivalent.

use std::sync::Arc;

use gitvfs_cas::{ObjectId, ObjectStore, Signature};
use serde::{Deserialize, Serialize};

use crate::error::{GfsError, GfsResult};
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionId};

/// What a session's overlay starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// An empty root with no history.
    Empty,
    /// A commit; the next commit is its child.
    Commit(ObjectId),
    /// A bare tree; the first commit has no parent.
    Tree(ObjectId),
    /// The commit a branch points at. Commits advance the branch. A
    /// missing branch starts empty and is created by the first commit.
    Branch(String),
}

/// Identity used for commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

impl Committer {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// A signature stamped now.
    pub fn signature(&self) -> Signature {
        Signature::now(&self.name, &self.email)
    }
}

impl Default for Committer {
    fn default() -> Self {
        Self::new("gitvfs", "gitvfs@localhost")
    }
}

/// Default merge commit message. `{theirs}` expands to the merged commit id.
pub const DEFAULT_MERGE_MESSAGE: &str = "Merge commit {theirs}";

/// Serializable session configuration.
///
/// At most one of `branch`, `commit` and `tree` may be set; none means an
/// empty session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session_id: Option<SessionId>,
    pub branch: Option<String>,
    pub commit: Option<ObjectId>,
    pub tree: Option<ObjectId>,
    pub committer: Committer,
    pub merge_message: String,
    pub allow_empty_commits: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            branch: None,
            commit: None,
            tree: None,
            committer: Committer::default(),
            merge_message: DEFAULT_MERGE_MESSAGE.to_string(),
            allow_empty_commits: false,
        }
    }
}

impl SessionConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> GfsResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| GfsError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> GfsResult<String> {
        toml::to_string(self).map_err(|e| GfsError::invalid_config(e.to_string()))
    }

    /// Check the config is usable.
    pub fn validate(&self) -> GfsResult<()> {
        self.target()?;
        if let Some(id) = &self.session_id {
            id.validate()?;
        }
        if self.committer.name.trim().is_empty() || self.committer.email.trim().is_empty() {
            return Err(GfsError::invalid_config("committer name and email must be set"));
        }
        Ok(())
    }

    /// The single target this config names.
    pub fn target(&self) -> GfsResult<SessionTarget> {
        match (&self.branch, self.commit, self.tree) {
            (None, None, None) => Ok(SessionTarget::Empty),
            (Some(branch), None, None) if !branch.trim().is_empty() => {
                Ok(SessionTarget::Branch(branch.clone()))
            }
            (Some(_), None, None) => Err(GfsError::invalid_config("branch name is empty")),
            (None, Some(commit), None) => Ok(SessionTarget::Commit(commit)),
            (None, None, Some(tree)) => Ok(SessionTarget::Tree(tree)),
            _ => Err(GfsError::invalid_config(
                "set at most one of branch, commit, tree",
            )),
        }
    }

    pub fn with_target(mut self, target: SessionTarget) -> Self {
        self.branch = None;
        self.commit = None;
        self.tree = None;
        match target {
            SessionTarget::Empty => {}
            SessionTarget::Commit(id) => self.commit = Some(id),
            SessionTarget::Tree(id) => self.tree = Some(id),
            SessionTarget::Branch(name) => self.branch = Some(name),
        }
        self
    }

    /// Expand the merge message for `theirs`.
    pub fn merge_message_for(&self, theirs: &ObjectId) -> String {
        self.merge_message.replace("{theirs}", &theirs.to_hex())
    }
}

/// Fluent session construction.
///
/// ```ignore
/// let session = SessionBuilder::new(store)
///     .branch("main")
///     .committer("Build Bot", "bot@example.com")
///     .build(SessionRegistry::global())?;
/// ```
pub struct SessionBuilder {
    store: Arc<dyn ObjectStore>,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            config: SessionConfig::default(),
        }
    }

    /// Start from a loaded config.
    pub fn from_config(store: Arc<dyn ObjectStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    pub fn branch(self, name: impl Into<String>) -> Self {
        self.target(SessionTarget::Branch(name.into()))
    }

    pub fn commit(self, id: ObjectId) -> Self {
        self.target(SessionTarget::Commit(id))
    }

    pub fn tree(self, id: ObjectId) -> Self {
        self.target(SessionTarget::Tree(id))
    }

    pub fn target(mut self, target: SessionTarget) -> Self {
        self.config = self.config.with_target(target);
        self
    }

    pub fn session_id(mut self, id: impl Into<SessionId>) -> Self {
        self.config.session_id = Some(id.into());
        self
    }

    pub fn committer(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.config.committer = Committer::new(name, email);
        self
    }

    pub fn merge_message(mut self, template: impl Into<String>) -> Self {
        self.config.merge_message = template.into();
        self
    }

    pub fn allow_empty_commits(mut self, allow: bool) -> Self {
        self.config.allow_empty_commits = allow;
        self
    }

    /// Open the session and register it.
    pub fn build(self, registry: &SessionRegistry) -> GfsResult<Arc<Session>> {
        self.config.validate()?;
        registry.open(self.store, self.config)
    }
}
