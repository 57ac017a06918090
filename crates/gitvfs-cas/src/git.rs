//! Repository-backed object store via libgit2.
//!
//! Thin wrapper around a git2 `Repository`: objects go straight into the
//! repository's object database, references are ordinary git refs. The
//! repository handle is not `Sync`, so it lives behind a mutex.

use std::path::{Path, PathBuf};

use git2::{ErrorCode, Oid, Repository};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    CommitData, CommitMetadata, EntryMode, ObjectId, ObjectKind, ObjectStore, Signature,
    StoreError, StoreResult, TreeEntry, full_ref_name, sort_tree_entries, validate_entry_name,
};

/// Object store over a git repository.
pub struct GitObjectStore {
    repo: Mutex<Repository>,
    root: PathBuf,
}

impl GitObjectStore {
    /// Open an existing repository (worktree or bare) at `path`.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let root: PathBuf = path.into();
        let repo = Repository::open(&root)?;
        debug!(root = %root.display(), "opened git object store");
        Ok(Self {
            repo: Mutex::new(repo),
            root,
        })
    }

    /// Initialize a new bare repository at `path`.
    pub fn init_bare(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let root: PathBuf = path.into();
        let repo = Repository::init_bare(&root)?;
        Ok(Self {
            repo: Mutex::new(repo),
            root,
        })
    }

    /// Wrap an already-open repository.
    pub fn from_repository(repo: Repository) -> Self {
        let root = repo.path().to_path_buf();
        Self {
            repo: Mutex::new(repo),
            root,
        }
    }

    /// Repository path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn oid(id: &ObjectId) -> StoreResult<Oid> {
        Ok(Oid::from_bytes(id.as_bytes())?)
    }

    fn object_id(oid: Oid) -> StoreResult<ObjectId> {
        ObjectId::from_slice(oid.as_bytes())
    }

    fn signature(sig: &Signature) -> StoreResult<git2::Signature<'static>> {
        let time = git2::Time::new(sig.when, sig.offset_minutes);
        Ok(git2::Signature::new(&sig.name, &sig.email, &time)?)
    }
}

/// Map a typed lookup failure.
///
/// libgit2 reports a type mismatch as not-found too, so the message is
/// checked to tell the two apart.
fn lookup_error(id: &ObjectId, expected: ObjectKind, err: git2::Error) -> StoreError {
    match err.code() {
        ErrorCode::NotFound if err.message().contains("does not match") => {
            StoreError::WrongKind { id: *id, expected }
        }
        ErrorCode::NotFound => StoreError::NotFound(*id),
        _ => StoreError::Git(err),
    }
}

impl ObjectStore for GitObjectStore {
    fn fetch_blob(&self, id: &ObjectId) -> StoreResult<Vec<u8>> {
        let repo = self.repo.lock();
        let blob = repo
            .find_blob(Self::oid(id)?)
            .map_err(|e| lookup_error(id, ObjectKind::Blob, e))?;
        Ok(blob.content().to_vec())
    }

    fn fetch_tree(&self, id: &ObjectId) -> StoreResult<Vec<TreeEntry>> {
        let repo = self.repo.lock();
        let tree = repo
            .find_tree(Self::oid(id)?)
            .map_err(|e| lookup_error(id, ObjectKind::Tree, e))?;

        let mut entries = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let name = entry
                .name()
                .ok_or_else(|| StoreError::Corrupt(format!("non UTF-8 entry name in tree {id}")))?;
            let mode = EntryMode::from_bits(entry.filemode() as u32).ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "unsupported mode {:o} for {name} in tree {id}",
                    entry.filemode()
                ))
            })?;
            entries.push(TreeEntry::new(name, Self::object_id(entry.id())?, mode));
        }
        Ok(entries)
    }

    fn fetch_commit(&self, id: &ObjectId) -> StoreResult<CommitData> {
        let repo = self.repo.lock();
        let commit = repo
            .find_commit(Self::oid(id)?)
            .map_err(|e| lookup_error(id, ObjectKind::Commit, e))?;
        let parents = commit
            .parent_ids()
            .map(Self::object_id)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(CommitData {
            tree: Self::object_id(commit.tree_id())?,
            parents,
            message: commit.message().unwrap_or("").to_string(),
        })
    }

    fn store_blob(&self, data: &[u8]) -> StoreResult<ObjectId> {
        let repo = self.repo.lock();
        let oid = repo.blob(data)?;
        trace!(%oid, len = data.len(), "store blob");
        Self::object_id(oid)
    }

    fn store_tree(&self, entries: &[TreeEntry]) -> StoreResult<ObjectId> {
        let mut sorted = entries.to_vec();
        sort_tree_entries(&mut sorted);

        let repo = self.repo.lock();
        let mut builder = repo.treebuilder(None)?;
        for entry in &sorted {
            validate_entry_name(&entry.name)?;
            builder.insert(&entry.name, Self::oid(&entry.id)?, entry.mode.bits() as i32)?;
        }
        if builder.len() != sorted.len() {
            return Err(StoreError::Corrupt("duplicate tree entry names".to_string()));
        }
        let oid = builder.write()?;
        trace!(%oid, entries = sorted.len(), "store tree");
        Self::object_id(oid)
    }

    fn store_commit(
        &self,
        tree: &ObjectId,
        parents: &[ObjectId],
        metadata: &CommitMetadata,
    ) -> StoreResult<ObjectId> {
        let repo = self.repo.lock();
        let tree = repo.find_tree(Self::oid(tree)?)?;
        let parent_commits = parents
            .iter()
            .map(|p| Ok(repo.find_commit(Self::oid(p)?)?))
            .collect::<StoreResult<Vec<_>>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();

        let author = Self::signature(&metadata.author)?;
        let committer = Self::signature(&metadata.committer)?;
        let oid = repo.commit(
            None,
            &author,
            &committer,
            &metadata.message,
            &tree,
            &parent_refs,
        )?;
        trace!(%oid, parents = parents.len(), "store commit");
        Self::object_id(oid)
    }

    fn read_ref(&self, name: &str) -> StoreResult<Option<ObjectId>> {
        let repo = self.repo.lock();
        match repo.refname_to_id(&full_ref_name(name)) {
            Ok(oid) => Ok(Some(Self::object_id(oid)?)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn update_ref(
        &self,
        name: &str,
        new: &ObjectId,
        expected: Option<&ObjectId>,
    ) -> StoreResult<()> {
        let full = full_ref_name(name);
        let repo = self.repo.lock();
        let new_oid = Self::oid(new)?;
        let log_message = format!("gitvfs: update {full}");

        let result = match expected {
            Some(old) => repo
                .reference_matching(&full, new_oid, true, Self::oid(old)?, &log_message)
                .map(|_| ()),
            None => repo.reference(&full, new_oid, false, &log_message).map(|_| ()),
        };

        match result {
            Ok(()) => {
                debug!(reference = %full, target = %new.short(), "reference updated");
                Ok(())
            }
            Err(e)
                if matches!(
                    e.code(),
                    ErrorCode::Exists | ErrorCode::Modified | ErrorCode::NotFound
                ) =>
            {
                Err(StoreError::RefConflict { name: full })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for GitObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitObjectStore")
            .field("root", &self.root)
            .finish()
    }
}
