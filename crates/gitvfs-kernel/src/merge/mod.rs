//! Three-way merge of another commit into an overlay.
//!
//! The merge plans first and mutates second. Planning walks the base, ours
//! and theirs trees together and produces replacement child maps for the
//! overlay directories that change; it only reads from the store (apart
//! from lazily loading the clean overlay itself). The maps are then swapped
//! in. A clean plan goes straight through the commit builder with both
//! parents; if that commit fails the old maps are swapped back.
//!
//! Uncommitted changes survive a merge as long as theirs did not change the
//! same paths; otherwise the merge is refused before anything moves. A
//! fast-forward carries such changes over onto theirs, and a real merge
//! leaves them staged with theirs as the pending second parent.
//!
//! | base vs ours vs theirs              | outcome                         |
//! |-------------------------------------|---------------------------------|
//! | ours == theirs, or theirs == base   | keep ours                       |
//! | ours == base                        | adopt theirs (incl. deletion)   |
//! | both trees                          | recurse                         |
//! | both files, content differs         | diff3 if text, else conflict    |
//! | deleted on one side, changed on other | conflict (modify/delete)      |
//! | added on both sides                 | conflict (add/add)              |
//! | anything else (type clash, links)   | conflict, keep ours             |

pub mod diff3;

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use gitvfs_cas::{CommitMetadata, EntryMode, ObjectId, ObjectStore, TreeEntry};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::commit::{CommitRequest, commit_overlay};
use crate::error::{GfsError, GfsResult};
use crate::node::{Children, Listing, Node, NodeRef, NodeState};
use crate::overlay::{Overlay, OverlayState};
use crate::path::GfsPath;

pub use diff3::TextMerge;

/// How a merge concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum MergeKind {
    /// Theirs was already part of our history.
    UpToDate,
    /// Our history was part of theirs; the session now points at theirs.
    FastForward,
    /// A merge commit was written.
    Merged,
    /// Merged into an overlay that already had uncommitted changes; the
    /// next commit records theirs as a second parent.
    Staged,
    /// Conflicts were left in the overlay for the caller to resolve.
    Conflicted,
}

/// Result of [`Session::merge`](crate::Session::merge).
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub succeeded: bool,
    pub conflicted_paths: Vec<GfsPath>,
    /// Commit the session points at afterwards, when it moved.
    pub commit: Option<ObjectId>,
    pub kind: MergeKind,
}

impl MergeResult {
    fn done(kind: MergeKind, commit: Option<ObjectId>) -> Self {
        Self {
            succeeded: true,
            conflicted_paths: Vec::new(),
            commit,
            kind,
        }
    }
}

type Side = Option<(ObjectId, EntryMode)>;

enum Outcome {
    Keep,
    Remove,
    Replace(NodeRef),
}

/// The entry set of a modified directory differs from its last commit at
/// this name.
fn relinked(node: Option<&NodeRef>, committed: Option<&TreeEntry>) -> bool {
    match (node, committed) {
        (None, None) => false,
        (Some(node), Some(entry)) => node.base_id() != Some(entry.id),
        _ => true,
    }
}

fn is_file(mode: EntryMode) -> bool {
    matches!(mode, EntryMode::Blob | EntryMode::Executable)
}

/// Text for merging purposes: UTF-8 without NUL bytes.
fn as_text(bytes: &[u8]) -> Option<&str> {
    if bytes.contains(&0) {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}

struct Planner<'a> {
    overlay: &'a Overlay,
    store: &'a dyn ObjectStore,
    conflicts: Vec<GfsPath>,
    updates: Vec<(NodeRef, Children)>,
}

impl Planner<'_> {
    fn entries(&self, tree: Option<ObjectId>) -> GfsResult<BTreeMap<String, TreeEntry>> {
        let Some(id) = tree else {
            return Ok(BTreeMap::new());
        };
        Ok(self
            .store
            .fetch_tree(&id)?
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect())
    }

    fn conflict(&mut self, path: &GfsPath, reason: &str) {
        warn!(%path, reason, "merge conflict");
        self.conflicts.push(path.clone());
    }

    fn merge_directory(
        &mut self,
        dir: &NodeRef,
        path: &GfsPath,
        base: Option<ObjectId>,
        theirs: Option<ObjectId>,
    ) -> GfsResult<()> {
        self.overlay.load_children(dir)?;
        let (ours, last_commit, modified) = match &*dir.lock() {
            NodeState::Directory(Listing::Loaded {
                children,
                base,
                modified,
            }) => (children.clone(), *base, *modified),
            _ => return Ok(()),
        };
        let base_entries = self.entries(base)?;
        let theirs_entries = self.entries(theirs)?;
        // Entries as last committed, when the listing changed since.
        let committed = if modified {
            Some(self.entries(last_commit)?)
        } else {
            None
        };

        let names: BTreeSet<&String> = ours
            .keys()
            .chain(base_entries.keys())
            .chain(theirs_entries.keys())
            .collect();

        let mut merged = ours.clone();
        let mut changed = false;
        for name in names {
            let node = ours.get(name);
            let o = node.and_then(|n| n.clean_entry());
            let b = base_entries.get(name).map(|e| (e.id, e.mode));
            let t = theirs_entries.get(name).map(|e| (e.id, e.mode));
            let moved = committed
                .as_ref()
                .is_some_and(|c| relinked(node, c.get(name.as_str())));
            let child_path = path.join(name)?;
            match self.merge_entry(&child_path, name, node, moved, b, o, t)? {
                Outcome::Keep => {}
                Outcome::Remove => {
                    merged.remove(name);
                    changed = true;
                }
                Outcome::Replace(replacement) => {
                    merged.insert(name.clone(), replacement);
                    changed = true;
                }
            }
        }
        if changed {
            self.updates.push((dir.clone(), merged));
        }
        Ok(())
    }

    /// `moved` is set when the name was added, removed or replaced in the
    /// overlay since the last commit.
    #[allow(clippy::too_many_arguments)]
    fn merge_entry(
        &mut self,
        path: &GfsPath,
        name: &str,
        node: Option<&NodeRef>,
        moved: bool,
        b: Side,
        o: Side,
        t: Side,
    ) -> GfsResult<Outcome> {
        let dirty = node.is_some_and(|n| !n.is_clean_deep());
        if b == t || (!dirty && !moved && o == t) {
            return Ok(Outcome::Keep);
        }
        if dirty || moved {
            // Theirs changed something with uncommitted work under it. Only
            // a directory that is still in place can be merged into.
            if let (false, Some(dir), Some((tid, tm))) = (moved, node, t) {
                if tm.is_tree() && dir.is_directory() {
                    let base_tree = b.filter(|(_, m)| m.is_tree()).map(|(id, _)| id);
                    self.merge_directory(dir, path, base_tree, Some(tid))?;
                    return Ok(Outcome::Keep);
                }
            }
            warn!(%path, "merge would overwrite uncommitted changes");
            return Err(GfsError::UncommittedChanges);
        }
        if b == o {
            return Ok(match t {
                Some((id, mode)) => Outcome::Replace(Node::stub(&TreeEntry::new(name, id, mode))),
                None => Outcome::Remove,
            });
        }

        match (o, t) {
            (Some((_, om)), Some((tid, tm))) if om.is_tree() && tm.is_tree() => {
                let base_tree = b.filter(|(_, m)| m.is_tree()).map(|(id, _)| id);
                if let Some(dir) = node {
                    self.merge_directory(dir, path, base_tree, Some(tid))?;
                }
                Ok(Outcome::Keep)
            }
            (Some(o), Some(t)) if is_file(o.1) && is_file(t.1) => self.merge_file(path, name, b, o, t),
            (None, Some((id, mode))) => {
                self.conflict(path, "deleted in ours, modified in theirs");
                Ok(Outcome::Replace(Node::stub(&TreeEntry::new(name, id, mode))))
            }
            (Some(_), None) => {
                self.conflict(path, "modified in ours, deleted in theirs");
                Ok(Outcome::Keep)
            }
            _ => {
                self.conflict(path, "incompatible changes");
                Ok(Outcome::Keep)
            }
        }
    }

    fn merge_file(
        &mut self,
        path: &GfsPath,
        name: &str,
        b: Side,
        (oid, omode): (ObjectId, EntryMode),
        (tid, tmode): (ObjectId, EntryMode),
    ) -> GfsResult<Outcome> {
        let base_mode = b.map(|(_, mode)| mode);
        let mode = if base_mode == Some(omode) { tmode } else { omode };
        let mode_conflict =
            omode != tmode && base_mode != Some(omode) && base_mode != Some(tmode);

        let base_id = b.filter(|(_, mode)| is_file(*mode)).map(|(id, _)| id);
        let content = if oid == tid || base_id == Some(tid) {
            Some(oid)
        } else if base_id == Some(oid) {
            Some(tid)
        } else {
            None
        };

        if let Some(id) = content {
            if mode_conflict {
                self.conflict(path, "executable bit changed on both sides");
                return Ok(Outcome::Keep);
            }
            if id == oid && mode == omode {
                return Ok(Outcome::Keep);
            }
            return Ok(Outcome::Replace(Node::stub(&TreeEntry::new(name, id, mode))));
        }

        // Content changed on both sides.
        let ours = self.store.fetch_blob(&oid)?;
        let theirs = self.store.fetch_blob(&tid)?;
        let base = match base_id {
            Some(id) => self.store.fetch_blob(&id)?,
            None => Vec::new(),
        };
        let (Some(base_text), Some(ours_text), Some(theirs_text)) =
            (as_text(&base), as_text(&ours), as_text(&theirs))
        else {
            self.conflict(path, "binary content changed on both sides");
            return Ok(Outcome::Keep);
        };

        let executable = mode == EntryMode::Executable;
        match diff3::merge(base_text, ours_text, theirs_text) {
            TextMerge::Clean(text) if base_id.is_some() && !mode_conflict => {
                debug!(%path, "merged text cleanly");
                Ok(Outcome::Replace(Node::new_file(text.into_bytes(), executable)))
            }
            merged => {
                let text = match merged {
                    TextMerge::Conflicted(text) => text,
                    TextMerge::Clean(_) => diff3::conflict_block(ours_text, theirs_text),
                };
                let reason = if base_id.is_none() {
                    "added on both sides"
                } else {
                    "overlapping edits"
                };
                self.conflict(path, reason);
                Ok(Outcome::Replace(Node::new_file(
                    text.into_bytes(),
                    omode == EntryMode::Executable,
                )))
            }
        }
    }
}

/// Every commit reachable from `start`, including itself.
fn ancestry(store: &dyn ObjectStore, start: ObjectId) -> GfsResult<HashSet<ObjectId>> {
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        for parent in store.fetch_commit(&id)?.parents {
            if seen.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(seen)
}

/// Nearest commit of `theirs`'s history that is also in `ours`.
fn merge_base(
    store: &dyn ObjectStore,
    ours: &HashSet<ObjectId>,
    theirs: ObjectId,
) -> GfsResult<Option<ObjectId>> {
    let mut seen = HashSet::from([theirs]);
    let mut queue = VecDeque::from([theirs]);
    while let Some(id) = queue.pop_front() {
        if ours.contains(&id) {
            return Ok(Some(id));
        }
        for parent in store.fetch_commit(&id)?.parents {
            if seen.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(None)
}

/// Child maps a merge replaced, with each directory's old modified flag.
type Installed = Vec<(NodeRef, Children, bool)>;

/// Swap planned child maps in, returning what they replaced.
fn install(updates: Vec<(NodeRef, Children)>) -> Installed {
    let mut previous = Vec::with_capacity(updates.len());
    for (dir, merged) in updates {
        if let NodeState::Directory(Listing::Loaded {
            children, modified, ..
        }) = &mut *dir.lock()
        {
            let old = std::mem::replace(children, merged);
            previous.push((dir.clone(), old, std::mem::replace(modified, true)));
        }
    }
    previous
}

fn restore(previous: Installed) {
    for (dir, old, was_modified) in previous {
        if let NodeState::Directory(Listing::Loaded {
            children, modified, ..
        }) = &mut *dir.lock()
        {
            *children = old;
            *modified = was_modified;
        }
    }
}

/// Plan a merge of `theirs` over the overlay root against `base`.
fn plan(
    overlay: &Overlay,
    st: &OverlayState,
    base: Option<ObjectId>,
    theirs: ObjectId,
) -> GfsResult<(Vec<GfsPath>, Vec<(NodeRef, Children)>)> {
    let mut planner = Planner {
        overlay,
        store: overlay.store().as_ref(),
        conflicts: Vec::new(),
        updates: Vec::new(),
    };
    let root_path = GfsPath::root(overlay.id().clone());
    planner.merge_directory(&st.root, &root_path, base, Some(theirs))?;
    Ok((planner.conflicts, planner.updates))
}

/// Move the session to `theirs`, which contains everything ours has
/// committed. Uncommitted changes are carried over.
fn fast_forward(
    overlay: &Overlay,
    st: &mut OverlayState,
    theirs: ObjectId,
    theirs_tree: ObjectId,
    branch: Option<&str>,
) -> GfsResult<MergeResult> {
    let store = overlay.store().as_ref();
    let clean = st.root.is_clean_deep();
    let updates = if clean {
        Vec::new()
    } else {
        // With our own tree as the base, only local edits can collide, and
        // those were refused while planning.
        let (conflicts, updates) = plan(overlay, st, st.base_tree, theirs_tree)?;
        if !conflicts.is_empty() {
            return Err(GfsError::UncommittedChanges);
        }
        updates
    };

    if let Some(branch) = branch {
        // The branch may already be there, e.g. after losing a commit race.
        if store.read_ref(branch)? != Some(theirs) {
            store.update_ref(branch, &theirs, st.base_commit.as_ref())?;
        }
    }
    if clean {
        st.rebind(Some(theirs), Some(theirs_tree));
    } else {
        install(updates);
        st.base_commit = Some(theirs);
        st.base_tree = Some(theirs_tree);
    }
    info!(theirs = %theirs.short(), carried = !clean, "fast-forward");
    Ok(MergeResult::done(MergeKind::FastForward, Some(theirs)))
}

/// Merge commit `theirs` into the overlay.
pub(crate) fn merge_into(
    overlay: &Overlay,
    st: &mut OverlayState,
    theirs: ObjectId,
    metadata: &CommitMetadata,
    branch: Option<&str>,
) -> GfsResult<MergeResult> {
    if st.merge_head.is_some() {
        return Err(GfsError::UncommittedChanges);
    }
    let store = overlay.store().as_ref();
    let theirs_tree = store.fetch_commit(&theirs)?.tree;

    let base_tree = match st.base_commit {
        Some(ours) => {
            let ours_history = ancestry(store, ours)?;
            if ours_history.contains(&theirs) {
                info!(theirs = %theirs.short(), "already up to date");
                return Ok(MergeResult::done(MergeKind::UpToDate, None));
            }
            let theirs_history = ancestry(store, theirs)?;
            if theirs_history.contains(&ours) {
                return fast_forward(overlay, st, theirs, theirs_tree, branch);
            }
            match merge_base(store, &ours_history, theirs)? {
                Some(base) => Some(store.fetch_commit(&base)?.tree),
                None => None,
            }
        }
        // No history of our own: when there is nothing to lose, theirs
        // simply becomes the history.
        None if st.base_tree.is_none() || st.base_tree == Some(theirs_tree) => {
            return fast_forward(overlay, st, theirs, theirs_tree, branch);
        }
        // A bare tree merges against the empty tree; the merge commit's
        // only parent is theirs.
        None => None,
    };

    let clean = st.root.is_clean_deep();
    let (conflicts, updates) = plan(overlay, st, base_tree, theirs_tree)?;
    let previous = install(updates);
    st.merge_head = Some(theirs);

    if !conflicts.is_empty() {
        warn!(conflicts = conflicts.len(), theirs = %theirs.short(), "merge left conflicts");
        return Ok(MergeResult {
            succeeded: false,
            conflicted_paths: conflicts,
            commit: None,
            kind: MergeKind::Conflicted,
        });
    }
    if !clean {
        info!(theirs = %theirs.short(), "merged into uncommitted changes");
        return Ok(MergeResult::done(MergeKind::Staged, None));
    }

    let request = CommitRequest {
        metadata,
        allow_empty: true,
        branch,
    };
    match commit_overlay(store, st, request) {
        Ok(commit) => {
            info!(commit = %commit.short(), theirs = %theirs.short(), "merged");
            Ok(MergeResult::done(MergeKind::Merged, Some(commit)))
        }
        Err(e) => {
            st.merge_head = None;
            restore(previous);
            Err(e)
        }
    }
}
