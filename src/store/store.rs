//! The connection entry arena.
//!
//! Entries are indexed by their fixed id; parent links are ids, never
//! owning references, so the hierarchy is a flat arena and acyclicity is
//! validated once at configuration load instead of per build.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info};

use super::{ConnectionEntry, FixedId, StoreDef};
use crate::error::{OperationError, RelayError, Result, ValidationError};
use crate::identity::{IdentityDirectory, LocalIdentity};

struct EntryCell {
    entry: ConnectionEntry,
    /// Serializes refresh/start/stop/pause and blob writes on this entry.
    op_lock: Arc<TokioMutex<()>>,
}

/// Thread-safe arena of connection entries.
pub struct ConnectionStore {
    entries: RwLock<HashMap<FixedId, EntryCell>>,
}

impl ConnectionStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Add an entry. Returns its fixed id.
    pub fn add(&self, entry: ConnectionEntry) -> Result<FixedId> {
        let id = entry.id();
        let mut entries = write_ignore_poison(&self.entries);

        if entries.contains_key(&id) {
            return Err(RelayError::Validation(ValidationError::TypeMismatch {
                expected: "unique entry",
                actual: format!("duplicate id {id} ({})", entry.name),
            }));
        }

        debug!(name = %entry.name, %id, kind = entry.store.kind(), "entry added");
        entries.insert(
            id,
            EntryCell {
                entry,
                op_lock: Arc::new(TokioMutex::new(())),
            },
        );
        Ok(id)
    }

    /// Get a clone of the entry with the given id.
    pub fn get(&self, id: FixedId) -> Option<ConnectionEntry> {
        read_ignore_poison(&self.entries)
            .get(&id)
            .map(|cell| cell.entry.clone())
    }

    /// Look an entry up by its display name.
    pub fn by_name(&self, name: &str) -> Option<ConnectionEntry> {
        read_ignore_poison(&self.entries)
            .values()
            .find(|cell| cell.entry.name == name)
            .map(|cell| cell.entry.clone())
    }

    /// Update an entry through a closure.
    ///
    /// Writers are serialized by the arena lock; callers observe either
    /// the pre- or post-update entry, never a partial one.
    pub fn update<F>(&self, id: FixedId, f: F) -> Result<()>
    where
        F: FnOnce(&mut ConnectionEntry),
    {
        let mut entries = write_ignore_poison(&self.entries);
        let cell = entries
            .get_mut(&id)
            .ok_or_else(|| RelayError::EntryNotFound(id.to_string()))?;
        f(&mut cell.entry);
        Ok(())
    }

    /// Remove an entry.
    ///
    /// Refused while the entry is marked protected (e.g. currently in use).
    pub fn remove(&self, id: FixedId) -> Result<Option<ConnectionEntry>> {
        let mut entries = write_ignore_poison(&self.entries);

        if let Some(cell) = entries.get(&id) {
            if cell.entry.protected {
                return Err(OperationError::EntryInUse(cell.entry.name.clone()).into());
            }
        }

        Ok(entries.remove(&id).map(|cell| cell.entry))
    }

    /// List all entries.
    pub fn list(&self) -> Vec<ConnectionEntry> {
        read_ignore_poison(&self.entries)
            .values()
            .map(|cell| cell.entry.clone())
            .collect()
    }

    /// Number of entries.
    pub fn count(&self) -> usize {
        read_ignore_poison(&self.entries).len()
    }

    /// The per-entry operation lock.
    pub(crate) fn op_lock(&self, id: FixedId) -> Result<Arc<TokioMutex<()>>> {
        read_ignore_poison(&self.entries)
            .get(&id)
            .map(|cell| Arc::clone(&cell.op_lock))
            .ok_or_else(|| RelayError::EntryNotFound(id.to_string()))
    }

    /// Validate the whole configuration: parent links exist, are
    /// connectable, required parents are present, and the hierarchy is
    /// acyclic.
    ///
    /// Runs at configuration load; composition assumes it has passed.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let entries = read_ignore_poison(&self.entries);

        for cell in entries.values() {
            let entry = &cell.entry;

            if entry.store.requires_parent() && entry.parent.is_none() {
                return Err(ValidationError::MissingValue("parent connection"));
            }

            if let Some(parent_id) = entry.parent {
                let parent = entries
                    .get(&parent_id)
                    .ok_or_else(|| ValidationError::DanglingReference(parent_id.to_string()))?;
                if !parent.entry.store.is_connectable() {
                    return Err(ValidationError::TypeMismatch {
                        expected: "connectable parent",
                        actual: parent.entry.store.kind().to_string(),
                    });
                }
            }
        }

        // Cycle check: walk each parent chain with a visited set
        for (id, cell) in entries.iter() {
            let mut visited = HashSet::new();
            visited.insert(*id);
            let mut cursor = cell.entry.parent;
            while let Some(next) = cursor {
                if !visited.insert(next) {
                    return Err(ValidationError::CyclicParentChain(
                        cell.entry.name.clone(),
                    ));
                }
                cursor = entries.get(&next).and_then(|c| c.entry.parent);
            }
        }

        Ok(())
    }

    /// Validate one entry's required references and identity completeness.
    ///
    /// Must pass before any session is built for the entry.
    pub fn check_complete(&self, id: FixedId) -> std::result::Result<(), ValidationError> {
        self.check_complete_guarded(id, &mut HashSet::new())
    }

    fn check_complete_guarded(
        &self,
        id: FixedId,
        seen: &mut HashSet<FixedId>,
    ) -> std::result::Result<(), ValidationError> {
        let entry = self
            .get(id)
            .ok_or_else(|| ValidationError::DanglingReference(id.to_string()))?;

        if !seen.insert(id) {
            return Err(ValidationError::CyclicParentChain(entry.name));
        }

        match &entry.store {
            StoreDef::Local => {}
            StoreDef::SshHost { host, .. } => {
                if host.is_empty() {
                    return Err(ValidationError::MissingValue("ssh host"));
                }
            }
            StoreDef::Container { container_name, .. } => {
                if container_name.is_empty() {
                    return Err(ValidationError::MissingValue("container name"));
                }
                let parent_id = entry
                    .parent
                    .ok_or(ValidationError::MissingValue("parent connection"))?;
                let parent = self
                    .get(parent_id)
                    .ok_or_else(|| ValidationError::DanglingReference(parent_id.to_string()))?;
                if !parent.store.is_connectable() {
                    return Err(ValidationError::TypeMismatch {
                        expected: "connectable parent",
                        actual: parent.store.kind().to_string(),
                    });
                }
                // The parent must itself be complete before we layer on it
                self.check_complete_guarded(parent_id, seen)?;
            }
            StoreDef::Identity { .. } => {}
        }

        if let Some(identity) = entry.store.identity() {
            identity.check_complete(self, false, false, false)?;
        }

        Ok(())
    }

    /// Load entries from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<ConnectionEntry> = serde_json::from_str(&content)?;

        let store = Self::new();
        let count = entries.len();
        for entry in entries {
            store.add(entry)?;
        }
        store.validate()?;

        info!(count, path = %path.display(), "connection store loaded");
        Ok(store)
    }

    /// Persist all entries to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let entries = self.list();
        let json = serde_json::to_string_pretty(&entries)?;
        std::fs::write(path, json)?;
        Ok(())
    }

}

impl Default for ConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityDirectory for ConnectionStore {
    fn lookup_identity(&self, id: FixedId) -> std::result::Result<LocalIdentity, ValidationError> {
        let entry = self
            .get(id)
            .ok_or_else(|| ValidationError::DanglingReference(id.to_string()))?;
        match entry.store {
            StoreDef::Identity { identity } => Ok(identity),
            other => Err(ValidationError::TypeMismatch {
                expected: "identity",
                actual: other.kind().to_string(),
            }),
        }
    }
}

fn read_ignore_poison<K, V>(
    lock: &RwLock<HashMap<K, V>>,
) -> std::sync::RwLockReadGuard<'_, HashMap<K, V>> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_ignore_poison<K, V>(
    lock: &RwLock<HashMap<K, V>>,
) -> std::sync::RwLockWriteGuard<'_, HashMap<K, V>> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
