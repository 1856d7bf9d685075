//! Entry control operations.
//!
//! Refresh, start, stop and pause drive the entry classification machine
//! through sessions obtained from the composer. All mutating operations
//! on one entry serialize on that entry's operation lock, so a refresh
//! racing a stop blocks instead of interleaving blob writes.

use std::sync::Arc;

use tracing::debug;

use super::{ConnectionStore, ContainerState, EntryCondition, FixedId, StoreDef};
use crate::backend::ContainerCli;
use crate::compose::SessionComposer;
use crate::error::{OperationError, RelayError, Result};

/// A capability-gated control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Pause,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Pause => "pause",
        }
    }
}

/// Re-query the entry's live state and update its classification.
///
/// Query failures downgrade the entry to `Incomplete`, never `Failed`:
/// the configuration itself may still be sound. Validation failures are
/// surfaced to the caller.
pub async fn refresh(
    store: &Arc<ConnectionStore>,
    composer: &SessionComposer,
    id: FixedId,
    force: bool,
) -> Result<()> {
    let lock = store.op_lock(id)?;
    let _guard = lock.lock().await;
    refresh_inner(store, composer, id, force).await
}

/// Issue a control action through the parent's session, then refresh.
pub async fn control(
    store: &Arc<ConnectionStore>,
    composer: &SessionComposer,
    id: FixedId,
    action: ControlAction,
) -> Result<()> {
    let lock = store.op_lock(id)?;
    let _guard = lock.lock().await;

    let entry = store
        .get(id)
        .ok_or_else(|| RelayError::EntryNotFound(id.to_string()))?;

    let caps = entry.store.capabilities();
    let supported = match action {
        ControlAction::Start => caps.start,
        ControlAction::Stop => caps.stop,
        ControlAction::Pause => caps.pause,
    };
    if !supported {
        return Err(OperationError::UnsupportedAction {
            action: action.as_str(),
            entry: entry.name.clone(),
        }
        .into());
    }

    let StoreDef::Container { container_name, .. } = &entry.store else {
        return Err(OperationError::UnsupportedAction {
            action: action.as_str(),
            entry: entry.name.clone(),
        }
        .into());
    };

    // The target may not be running, so the command goes through the
    // parent's session, not the entry's own
    let session = composer
        .parent_session(store, id)
        .await
        .map_err(|_| OperationError::ParentUnreachable(entry.name.clone()))?;

    let cli = ContainerCli::new(&session);
    match action {
        ControlAction::Start => cli.start(container_name).await?,
        ControlAction::Stop => cli.stop(container_name).await?,
        ControlAction::Pause => cli.pause(container_name).await?,
    }

    refresh_inner(store, composer, id, true).await
}

pub async fn start(
    store: &Arc<ConnectionStore>,
    composer: &SessionComposer,
    id: FixedId,
) -> Result<()> {
    control(store, composer, id, ControlAction::Start).await
}

pub async fn stop(
    store: &Arc<ConnectionStore>,
    composer: &SessionComposer,
    id: FixedId,
) -> Result<()> {
    control(store, composer, id, ControlAction::Stop).await
}

pub async fn pause(
    store: &Arc<ConnectionStore>,
    composer: &SessionComposer,
    id: FixedId,
) -> Result<()> {
    control(store, composer, id, ControlAction::Pause).await
}

async fn refresh_inner(
    store: &Arc<ConnectionStore>,
    composer: &SessionComposer,
    id: FixedId,
    force: bool,
) -> Result<()> {
    let entry = store
        .get(id)
        .ok_or_else(|| RelayError::EntryNotFound(id.to_string()))?;

    if !force && entry.condition == EntryCondition::Usable {
        return Ok(());
    }

    if let Err(e) = store.check_complete(id) {
        store.update(id, |entry| entry.condition = EntryCondition::Incomplete)?;
        return Err(e.into());
    }

    match &entry.store {
        StoreDef::Container { container_name, .. } => {
            let session = match composer.parent_session(store, id).await {
                Ok(session) => session,
                Err(e) => {
                    debug!(entry = %entry.name, "refresh: parent unreachable: {e}");
                    store.update(id, |entry| entry.condition = EntryCondition::Incomplete)?;
                    return Ok(());
                }
            };

            match ContainerCli::new(&session).query_state(container_name).await {
                Ok(state_display) => {
                    debug!(entry = %entry.name, display = %state_display, "refresh: container state");
                    store.update(id, |entry| {
                        entry.set_state(&ContainerState::with_display(&state_display));
                        entry.condition = EntryCondition::Usable;
                    })?;
                }
                Err(e) => {
                    debug!(entry = %entry.name, "refresh: state query failed: {e}");
                    store.update(id, |entry| entry.condition = EntryCondition::Incomplete)?;
                }
            }
        }
        _ => {
            // Non-controllable entries have no live state to query;
            // passing completeness is what makes them usable
            store.update(id, |entry| entry.condition = EntryCondition::Usable)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use crate::backend::{ConnectorContext, ConnectorRegistry};
    use crate::session::testing::{ScriptedBackend, ScriptedResponse};
    use crate::store::ConnectionEntry;

    /// Scripted incus host: keeps one container's display state and
    /// answers list/start/stop/pause like the real CLI.
    fn container_host_backend(initial: &str) -> (ScriptedBackend, Arc<StdMutex<String>>) {
        let state = Arc::new(StdMutex::new(initial.to_string()));
        let state_clone = Arc::clone(&state);

        let backend = ScriptedBackend::new(move |cmd| {
            let mut state = state_clone.lock().unwrap();
            if cmd.starts_with("incus list") {
                ScriptedResponse::stdout(&state)
            } else if cmd.starts_with("incus start") {
                *state = "RUNNING".to_string();
                ScriptedResponse::exit(0)
            } else if cmd.starts_with("incus stop") {
                *state = "STOPPED".to_string();
                ScriptedResponse::exit(0)
            } else if cmd.starts_with("incus pause") {
                *state = "FROZEN".to_string();
                ScriptedResponse::exit(0)
            } else {
                ScriptedResponse::exit(0)
            }
        });

        (backend, state)
    }

    fn composer_for(backend: &ScriptedBackend) -> SessionComposer {
        let context = ConnectorContext::new(backend.factory())
            .with_command_timeout(Duration::from_secs(2));
        SessionComposer::new(Arc::new(ConnectorRegistry::with_defaults(context)))
    }

    fn fixture() -> (Arc<ConnectionStore>, FixedId, FixedId) {
        let store = Arc::new(ConnectionStore::new());
        let host_id = store
            .add(ConnectionEntry::new("host", StoreDef::Local))
            .unwrap();
        let web_id = store
            .add(
                ConnectionEntry::new(
                    "web",
                    StoreDef::Container {
                        container_name: "web-1".into(),
                        identity: None,
                    },
                )
                .with_parent(host_id),
            )
            .unwrap();
        store.validate().unwrap();
        (store, host_id, web_id)
    }

    #[tokio::test]
    async fn test_refresh_start_stop_roundtrip() {
        let (backend, _) = container_host_backend("STOPPED");
        let composer = composer_for(&backend);
        let (store, _, web_id) = fixture();

        refresh(&store, &composer, web_id, true).await.unwrap();
        let state: ContainerState = store.get(web_id).unwrap().decode_state();
        assert!(!state.running);
        assert_eq!(state.container_state.as_deref(), Some("STOPPED"));

        start(&store, &composer, web_id).await.unwrap();
        let state: ContainerState = store.get(web_id).unwrap().decode_state();
        assert!(state.running);
        assert_eq!(state.container_state.as_deref(), Some("RUNNING"));

        stop(&store, &composer, web_id).await.unwrap();
        let state: ContainerState = store.get(web_id).unwrap().decode_state();
        assert!(!state.running);
        assert_eq!(state.container_state.as_deref(), Some("STOPPED"));
    }

    #[tokio::test]
    async fn test_pause_records_frozen() {
        let (backend, _) = container_host_backend("RUNNING");
        let composer = composer_for(&backend);
        let (store, _, web_id) = fixture();

        pause(&store, &composer, web_id).await.unwrap();
        let state: ContainerState = store.get(web_id).unwrap().decode_state();
        assert_eq!(state.container_state.as_deref(), Some("FROZEN"));
        assert!(!state.running);
    }

    #[tokio::test]
    async fn test_control_on_uncontrollable_entry() {
        let (backend, _) = container_host_backend("STOPPED");
        let composer = composer_for(&backend);
        let (store, host_id, _) = fixture();

        let err = start(&store, &composer, host_id).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Operation(OperationError::UnsupportedAction { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_query_failure_downgrades_to_incomplete() {
        let backend = ScriptedBackend::new(|cmd| {
            if cmd.starts_with("incus list") {
                ScriptedResponse {
                    stderr: "Error: not authorized".into(),
                    exit_code: 1,
                    ..Default::default()
                }
            } else {
                ScriptedResponse::exit(0)
            }
        });
        let composer = composer_for(&backend);
        let (store, _, web_id) = fixture();

        refresh(&store, &composer, web_id, true).await.unwrap();
        assert_eq!(
            store.get(web_id).unwrap().condition,
            EntryCondition::Incomplete
        );
    }

    #[tokio::test]
    async fn test_refresh_parent_unreachable_downgrades_to_incomplete() {
        let (backend, _) = container_host_backend("STOPPED");
        let composer = composer_for(&backend);
        let (store, _, web_id) = fixture();

        backend.refuse_spawns(true);

        refresh(&store, &composer, web_id, true).await.unwrap();
        assert_eq!(
            store.get(web_id).unwrap().condition,
            EntryCondition::Incomplete
        );
    }

    #[tokio::test]
    async fn test_refresh_incomplete_configuration_surfaces_validation() {
        let (backend, _) = container_host_backend("STOPPED");
        let composer = composer_for(&backend);

        let store = Arc::new(ConnectionStore::new());
        let web_id = store
            .add(ConnectionEntry::new(
                "web",
                StoreDef::Container {
                    container_name: "web-1".into(),
                    identity: None,
                },
            ))
            .unwrap();

        let err = refresh(&store, &composer, web_id, true).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
        assert_eq!(
            store.get(web_id).unwrap().condition,
            EntryCondition::Incomplete
        );
    }

    #[tokio::test]
    async fn test_refresh_without_force_skips_usable() {
        let (backend, state) = container_host_backend("RUNNING");
        let composer = composer_for(&backend);
        let (store, _, web_id) = fixture();

        refresh(&store, &composer, web_id, true).await.unwrap();
        *state.lock().unwrap() = "STOPPED".to_string();

        // Unforced refresh on a usable entry keeps the cached state
        refresh(&store, &composer, web_id, false).await.unwrap();
        let blob: ContainerState = store.get(web_id).unwrap().decode_state();
        assert!(blob.running);

        refresh(&store, &composer, web_id, true).await.unwrap();
        let blob: ContainerState = store.get(web_id).unwrap().decode_state();
        assert!(!blob.running);
    }

    #[tokio::test]
    async fn test_refresh_local_entry_marks_usable() {
        let (backend, _) = container_host_backend("STOPPED");
        let composer = composer_for(&backend);
        let (store, host_id, _) = fixture();

        assert_eq!(
            store.get(host_id).unwrap().condition,
            EntryCondition::Incomplete
        );
        refresh(&store, &composer, host_id, true).await.unwrap();
        assert_eq!(store.get(host_id).unwrap().condition, EntryCondition::Usable);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_and_stop_serialize() {
        let (backend, _) = container_host_backend("RUNNING");
        let composer = Arc::new(composer_for(&backend));
        let (store, _, web_id) = fixture();

        let mut handles = Vec::new();
        for i in 0..6 {
            let store = Arc::clone(&store);
            let composer = Arc::clone(&composer);
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    refresh(&store, &composer, web_id, true).await
                } else {
                    stop(&store, &composer, web_id).await
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Operations serialized; final state is a coherent blob
        let blob: ContainerState = store.get(web_id).unwrap().decode_state();
        assert_eq!(blob.running, blob.container_state.as_deref() == Some("RUNNING"));
    }
}
