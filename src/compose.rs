//! Session composition.
//!
//! Builds sessions for entries by resolving the parent chain first:
//! a live cached parent is reused, a dead one is rebuilt transparently,
//! and only then does the entry's own connector attach on top. A child
//! failure leaves the parent session open and reusable.
//!
//! The cache lock is held only for map access, never across a build, so
//! composing one entry cannot stall unrelated sessions.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};

use tracing::{debug, warn};

use crate::backend::{ConnectorContext, ConnectorRegistry};
use crate::error::StartupError;
use crate::session::{SessionState, ShellSession, StartupFailHook};
use crate::store::{ConnectionStore, ContainerState, EntryCondition, FixedId, HostState, StoreDef};

/// Builds and caches sessions for connection entries.
pub struct SessionComposer {
    registry: Arc<ConnectorRegistry>,
    sessions: StdMutex<HashMap<FixedId, Arc<ShellSession>>>,
}

impl SessionComposer {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self {
            registry,
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ConnectorContext {
        self.registry.context()
    }

    /// Get or build the session for an entry.
    ///
    /// Callers are expected to have run `check_complete` on the entry;
    /// composition itself only reports establishment failures.
    pub async fn build_session(
        &self,
        store: &Arc<ConnectionStore>,
        id: FixedId,
    ) -> Result<Arc<ShellSession>, StartupError> {
        self.session_for(store, id).await
    }

    /// Get or build the session of an entry's parent.
    pub async fn parent_session(
        &self,
        store: &Arc<ConnectionStore>,
        id: FixedId,
    ) -> Result<Arc<ShellSession>, StartupError> {
        let entry = store
            .get(id)
            .ok_or_else(|| StartupError::Other(format!("unknown entry {id}")))?;
        let parent_id = entry
            .parent
            .ok_or_else(|| StartupError::Other(format!("entry {} has no parent", entry.name)))?;
        self.session_for(store, parent_id).await
    }

    // Boxed because composition recurses up the parent chain
    fn session_for<'a>(
        &'a self,
        store: &'a Arc<ConnectionStore>,
        id: FixedId,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<ShellSession>, StartupError>> + Send + 'a>> {
        Box::pin(self.session_for_inner(store, id))
    }

    async fn session_for_inner(
        &self,
        store: &Arc<ConnectionStore>,
        id: FixedId,
    ) -> Result<Arc<ShellSession>, StartupError> {
        let cached = {
            let sessions = lock_ignore_poison(&self.sessions);
            sessions.get(&id).cloned()
        };
        if let Some(session) = cached {
            if session.is_alive().await {
                debug!(%id, "reusing live session");
                return Ok(session);
            }
            // Dead or closed: drop it and rebuild transparently
            debug!(%id, state = ?session.state(), "cached session dead, rebuilding");
            session.close().await;
            let mut sessions = lock_ignore_poison(&self.sessions);
            if let Some(current) = sessions.get(&id) {
                if Arc::ptr_eq(current, &session) {
                    sessions.remove(&id);
                }
            }
        }

        let entry = store
            .get(id)
            .ok_or_else(|| StartupError::Other(format!("unknown entry {id}")))?;
        if !entry.store.is_connectable() {
            return Err(StartupError::Other(format!(
                "entry {} is not connectable",
                entry.name
            )));
        }

        let parent = match entry.parent {
            Some(parent_id) => Some(self.session_for(store, parent_id).await?),
            None => None,
        };

        let connector = self.registry.connector_for(&entry.store).ok_or_else(|| {
            StartupError::Other(format!("no connector for kind {}", entry.store.kind()))
        })?;
        let chain_prefix = self.chain_prefix(store, entry.parent)?;
        let hook = startup_fail_hook(Arc::clone(store), id);

        let result = connector
            .open(
                &entry,
                parent,
                chain_prefix,
                store,
                self.registry.context(),
                Some(hook),
            )
            .await;

        let session = match result {
            Ok(session) => session,
            Err(err) => {
                // Failures before the handshake starts bypass the session
                // hook; classify here so both paths agree
                if !err.is_soft() {
                    mark_entry_failed(store, id);
                }
                return Err(err);
            }
        };

        let dialect = session.dialect();
        let _ = store.update(id, |entry| {
            entry.condition = EntryCondition::Usable;
            entry.protected = true;
            if entry.store.is_connectable() && !matches!(entry.store, StoreDef::Container { .. }) {
                entry.set_state(&HostState {
                    dialect: Some(dialect),
                });
            }
        });

        let mut sessions = lock_ignore_poison(&self.sessions);
        sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    /// Flattened wrapper argv of all ancestors, root first.
    fn chain_prefix(
        &self,
        store: &Arc<ConnectionStore>,
        mut cursor: Option<FixedId>,
    ) -> Result<Vec<String>, StartupError> {
        let mut segments: Vec<Vec<String>> = Vec::new();
        while let Some(id) = cursor {
            let entry = store
                .get(id)
                .ok_or_else(|| StartupError::Other(format!("missing ancestor {id}")))?;
            let connector = self.registry.connector_for(&entry.store).ok_or_else(|| {
                StartupError::Other(format!("no connector for kind {}", entry.store.kind()))
            })?;
            segments.push(connector.launch_prefix(&entry, store));
            cursor = entry.parent;
        }
        segments.reverse();
        Ok(segments.concat())
    }

    /// Close and drop the cached session of one entry.
    pub async fn close_session(&self, store: &Arc<ConnectionStore>, id: FixedId) {
        let session = lock_ignore_poison(&self.sessions).remove(&id);
        if let Some(session) = session {
            session.close().await;
        }
        let _ = store.update(id, |entry| entry.protected = false);
    }

    /// Close every cached session. Parents close their children first.
    pub async fn close_all(&self, store: &Arc<ConnectionStore>) {
        let sessions: Vec<(FixedId, Arc<ShellSession>)> = {
            let mut cache = lock_ignore_poison(&self.sessions);
            cache.drain().collect()
        };
        for (id, session) in sessions {
            if session.state() != SessionState::Closed {
                session.close().await;
            }
            let _ = store.update(id, |entry| entry.protected = false);
        }
    }
}

fn mark_entry_failed(store: &Arc<ConnectionStore>, id: FixedId) {
    let _ = store.update(id, |entry| {
        entry.condition = EntryCondition::Failed;
        if matches!(entry.store, StoreDef::Container { .. }) {
            entry.set_state(&ContainerState {
                running: false,
                container_state: Some("Connection failed".to_string()),
            });
        }
    });
}

/// Hook handed to the session engine so a hard startup failure marks the
/// owning entry. Soft conditions never reach it.
fn startup_fail_hook(store: Arc<ConnectionStore>, id: FixedId) -> StartupFailHook {
    Box::new(move |err| {
        warn!(%id, "startup failed, marking entry: {err}");
        mark_entry_failed(&store, id);
    })
}

fn lock_ignore_poison<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
