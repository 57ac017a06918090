//! In-memory object store.
//!
//! Objects are addressed by the first 20 bytes of the BLAKE3 digest of a
//! git-like canonical encoding (`<kind> <len>\0<payload>`). Trees are
//! normalized into canonical order before hashing so the same listing always
//! gets the same id. All data is lost when the store is dropped.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::{
    CommitData, CommitMetadata, OBJECT_ID_LEN, ObjectId, ObjectKind, ObjectStore, Signature,
    StoreError, StoreResult, TreeEntry, full_ref_name, sort_tree_entries, validate_entry_name,
};

#[derive(Debug, Clone)]
enum StoredObject {
    Blob(Vec<u8>),
    Tree(Vec<TreeEntry>),
    Commit(CommitData),
}

/// Process-local content-addressed store.
///
/// Thread-safe: objects live in a `DashMap`, references behind a mutex so
/// compare-and-swap updates are atomic.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<ObjectId, StoredObject>,
    refs: Mutex<HashMap<String, ObjectId>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Returns true if an object with this id exists.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    fn hash(kind: ObjectKind, payload: &[u8]) -> ObjectId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("{kind} {}\0", payload.len()).as_bytes());
        hasher.update(payload);
        let digest = hasher.finalize();
        let mut raw = [0u8; OBJECT_ID_LEN];
        raw.copy_from_slice(&digest.as_bytes()[..OBJECT_ID_LEN]);
        ObjectId::new(raw)
    }

    fn insert(&self, id: ObjectId, object: StoredObject) -> ObjectId {
        self.objects.entry(id).or_insert(object);
        id
    }

    fn encode_tree(entries: &[TreeEntry]) -> Vec<u8> {
        let mut payload = Vec::new();
        for entry in entries {
            payload.extend_from_slice(format!("{:o} {}\0", entry.mode.bits(), entry.name).as_bytes());
            payload.extend_from_slice(entry.id.as_bytes());
        }
        payload
    }

    fn encode_signature(role: &str, sig: &Signature) -> String {
        format!(
            "{role} {} <{}> {} {:+05}\n",
            sig.name,
            sig.email,
            sig.when,
            (sig.offset_minutes / 60) * 100 + sig.offset_minutes % 60
        )
    }

    fn get(&self, id: &ObjectId) -> StoreResult<StoredObject> {
        self.objects
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(*id))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn fetch_blob(&self, id: &ObjectId) -> StoreResult<Vec<u8>> {
        match self.get(id)? {
            StoredObject::Blob(data) => Ok(data),
            _ => Err(StoreError::WrongKind {
                id: *id,
                expected: ObjectKind::Blob,
            }),
        }
    }

    fn fetch_tree(&self, id: &ObjectId) -> StoreResult<Vec<TreeEntry>> {
        match self.get(id)? {
            StoredObject::Tree(entries) => Ok(entries),
            _ => Err(StoreError::WrongKind {
                id: *id,
                expected: ObjectKind::Tree,
            }),
        }
    }

    fn fetch_commit(&self, id: &ObjectId) -> StoreResult<CommitData> {
        match self.get(id)? {
            StoredObject::Commit(commit) => Ok(commit),
            _ => Err(StoreError::WrongKind {
                id: *id,
                expected: ObjectKind::Commit,
            }),
        }
    }

    fn store_blob(&self, data: &[u8]) -> StoreResult<ObjectId> {
        let id = Self::hash(ObjectKind::Blob, data);
        trace!(%id, len = data.len(), "store blob");
        Ok(self.insert(id, StoredObject::Blob(data.to_vec())))
    }

    fn store_tree(&self, entries: &[TreeEntry]) -> StoreResult<ObjectId> {
        let mut sorted = entries.to_vec();
        sort_tree_entries(&mut sorted);
        for pair in sorted.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(StoreError::Corrupt(format!(
                    "duplicate tree entry: {}",
                    pair[0].name
                )));
            }
        }
        for entry in &sorted {
            validate_entry_name(&entry.name)?;
        }
        let id = Self::hash(ObjectKind::Tree, &Self::encode_tree(&sorted));
        trace!(%id, entries = sorted.len(), "store tree");
        Ok(self.insert(id, StoredObject::Tree(sorted)))
    }

    fn store_commit(
        &self,
        tree: &ObjectId,
        parents: &[ObjectId],
        metadata: &CommitMetadata,
    ) -> StoreResult<ObjectId> {
        let mut payload = format!("tree {tree}\n");
        for parent in parents {
            payload.push_str(&format!("parent {parent}\n"));
        }
        payload.push_str(&Self::encode_signature("author", &metadata.author));
        payload.push_str(&Self::encode_signature("committer", &metadata.committer));
        payload.push('\n');
        payload.push_str(&metadata.message);

        let id = Self::hash(ObjectKind::Commit, payload.as_bytes());
        trace!(%id, parents = parents.len(), "store commit");
        Ok(self.insert(
            id,
            StoredObject::Commit(CommitData {
                tree: *tree,
                parents: parents.to_vec(),
                message: metadata.message.clone(),
            }),
        ))
    }

    fn read_ref(&self, name: &str) -> StoreResult<Option<ObjectId>> {
        Ok(self.refs.lock().get(&full_ref_name(name)).copied())
    }

    fn update_ref(
        &self,
        name: &str,
        new: &ObjectId,
        expected: Option<&ObjectId>,
    ) -> StoreResult<()> {
        let full = full_ref_name(name);
        let mut refs = self.refs.lock();
        match (refs.entry(full.clone()), expected) {
            (Entry::Occupied(mut slot), Some(old)) if slot.get() == old => {
                slot.insert(*new);
                Ok(())
            }
            (Entry::Vacant(slot), None) => {
                slot.insert(*new);
                Ok(())
            }
            _ => Err(StoreError::RefConflict { name: full }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntryMode;

    #[test]
    fn test_blob_ids_are_content_addressed() {
        let store = MemoryObjectStore::new();
        let a = store.store_blob(b"hello").unwrap();
        let b = store.store_blob(b"hello").unwrap();
        let c = store.store_blob(b"world").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
        assert_eq!(store.fetch_blob(&a).unwrap(), b"hello");
    }

    #[test]
    fn test_tree_order_does_not_affect_id() {
        let store = MemoryObjectStore::new();
        let blob = store.store_blob(b"x").unwrap();
        let sub = store.store_tree(&[]).unwrap();
        let forward = store
            .store_tree(&[
                TreeEntry::new("a", sub, EntryMode::Tree),
                TreeEntry::new("a.txt", blob, EntryMode::Blob),
            ])
            .unwrap();
        let backward = store
            .store_tree(&[
                TreeEntry::new("a.txt", blob, EntryMode::Blob),
                TreeEntry::new("a", sub, EntryMode::Tree),
            ])
            .unwrap();
        assert_eq!(forward, backward);

        let names: Vec<_> = store
            .fetch_tree(&forward)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "a"]);
    }

    #[test]
    fn test_duplicate_tree_entry_rejected() {
        let store = MemoryObjectStore::new();
        let blob = store.store_blob(b"x").unwrap();
        let result = store.store_tree(&[
            TreeEntry::new("same", blob, EntryMode::Blob),
            TreeEntry::new("same", blob, EntryMode::Executable),
        ]);
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_wrong_kind_and_missing() {
        let store = MemoryObjectStore::new();
        let blob = store.store_blob(b"x").unwrap();
        assert!(matches!(
            store.fetch_tree(&blob),
            Err(StoreError::WrongKind { expected: ObjectKind::Tree, .. })
        ));
        let missing = ObjectId::new([7; OBJECT_ID_LEN]);
        assert!(matches!(store.fetch_blob(&missing), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_commit_roundtrip() {
        let store = MemoryObjectStore::new();
        let tree = store.store_tree(&[]).unwrap();
        let meta = CommitMetadata::new("init", Signature::at("Test", "test@example.com", 1));
        let first = store.store_commit(&tree, &[], &meta).unwrap();
        let second = store.store_commit(&tree, &[first], &meta).unwrap();
        assert_ne!(first, second);

        let commit = store.fetch_commit(&second).unwrap();
        assert_eq!(commit.tree, tree);
        assert_eq!(commit.parents, vec![first]);
        assert_eq!(commit.message, "init");
    }

    #[test]
    fn test_ref_compare_and_swap() {
        let store = MemoryObjectStore::new();
        let a = store.store_blob(b"a").unwrap();
        let b = store.store_blob(b"b").unwrap();

        assert_eq!(store.read_ref("main").unwrap(), None);
        store.update_ref("main", &a, None).unwrap();
        assert_eq!(store.read_ref("refs/heads/main").unwrap(), Some(a));

        // Creating again must fail; a stale expectation must fail.
        assert!(matches!(
            store.update_ref("main", &b, None),
            Err(StoreError::RefConflict { .. })
        ));
        assert!(matches!(
            store.update_ref("main", &b, Some(&b)),
            Err(StoreError::RefConflict { .. })
        ));

        store.update_ref("main", &b, Some(&a)).unwrap();
        assert_eq!(store.read_ref("main").unwrap(), Some(b));
    }
}
