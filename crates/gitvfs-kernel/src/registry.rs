//! Session registry.
//!
//! Maps session ids (and so `gfs://<id>/` URIs) to live sessions. At most
//! one live session exists per id; a session removes itself when closed.
//! [`SessionRegistry::global`] is the process-wide table, empty at start.
//! Independent registries are cheap and useful for tests.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use gitvfs_cas::{ObjectId, ObjectStore};
use parking_lot::Mutex;
use tracing::info;

use crate::config::{SessionConfig, SessionTarget};
use crate::error::{GfsError, GfsResult};
use crate::overlay::Overlay;
use crate::path::GfsPath;
use crate::session::{CloseOutcome, Session, SessionId};

static GLOBAL: LazyLock<SessionRegistry> = LazyLock::new(SessionRegistry::new);

#[derive(Default)]
pub(crate) struct Tables {
    by_id: HashMap<SessionId, Arc<Session>>,
}

impl Tables {
    /// Drop `id` if it still maps to the session owning `overlay`.
    pub(crate) fn remove(&mut self, id: &SessionId, overlay: &Arc<Overlay>) {
        if self
            .by_id
            .get(id)
            .is_some_and(|s| Arc::ptr_eq(s.overlay(), overlay))
        {
            self.by_id.remove(id);
        }
    }
}

/// Table of live sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    tables: Arc<Mutex<Tables>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static SessionRegistry {
        &GLOBAL
    }

    /// Open a session on `target`, with a fresh id unless one is given.
    pub fn open_session(
        &self,
        store: Arc<dyn ObjectStore>,
        target: SessionTarget,
        id: Option<SessionId>,
    ) -> GfsResult<Arc<Session>> {
        let config = SessionConfig {
            session_id: id,
            ..SessionConfig::default()
        }
        .with_target(target);
        self.open(store, config)
    }

    /// Open a session described by `config`.
    pub fn open(&self, store: Arc<dyn ObjectStore>, config: SessionConfig) -> GfsResult<Arc<Session>> {
        config.validate()?;
        let target = config.target()?;
        // Resolve before taking the table lock; the store may be slow.
        let (base_commit, base_tree) = resolve_target(store.as_ref(), &target)?;

        let id = config.session_id.clone().unwrap_or_default();
        let mut tables = self.tables.lock();
        if tables.by_id.contains_key(&id) {
            return Err(GfsError::DuplicateSession(id.to_string()));
        }
        let overlay = Arc::new(Overlay::new(id.clone(), store, base_commit, base_tree));
        let session = Arc::new(Session::new(
            overlay,
            config,
            Arc::downgrade(&self.tables),
        ));
        tables.by_id.insert(id.clone(), session.clone());
        info!(
            session = %id,
            commit = ?base_commit.map(|c| c.short()),
            tree = ?base_tree.map(|t| t.short()),
            "session opened"
        );
        Ok(session)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.tables.lock().by_id.get(id).cloned()
    }

    /// Session addressed by a `gfs://<id>/...` URI.
    pub fn get_by_uri(&self, uri: &str) -> GfsResult<Option<Arc<Session>>> {
        let (id, _) = SessionId::split_uri(uri)?;
        Ok(self.get(&id))
    }

    /// Session and path addressed by a `gfs://<id>/<path>` URI.
    pub fn resolve_uri(&self, uri: &str) -> GfsResult<Option<(Arc<Session>, GfsPath)>> {
        let (id, text) = SessionId::split_uri(uri)?;
        let Some(session) = self.get(&id) else {
            return Ok(None);
        };
        let path = GfsPath::parse(id, &text)?;
        Ok(Some((session, path)))
    }

    /// Close the session with this id.
    pub fn close(&self, id: &SessionId) -> CloseOutcome {
        // Release the table lock before the session takes it again.
        let session = self.get(id);
        match session {
            Some(session) => session.close(),
            None => CloseOutcome::AlreadyClosed,
        }
    }

    pub fn len(&self) -> usize {
        self.tables.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of live sessions, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.tables.lock().by_id.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

fn resolve_target(
    store: &dyn ObjectStore,
    target: &SessionTarget,
) -> GfsResult<(Option<ObjectId>, Option<ObjectId>)> {
    match target {
        SessionTarget::Empty => Ok((None, None)),
        SessionTarget::Commit(commit) => {
            let tree = store.fetch_commit(commit)?.tree;
            Ok((Some(*commit), Some(tree)))
        }
        SessionTarget::Tree(tree) => {
            store.fetch_tree(tree)?;
            Ok((None, Some(*tree)))
        }
        SessionTarget::Branch(name) => match store.read_ref(name)? {
            Some(commit) => {
                let tree = store.fetch_commit(&commit)?.tree;
                Ok((Some(commit), Some(tree)))
            }
            // Unborn branch: the first commit creates it.
            None => Ok((None, None)),
        },
    }
}
