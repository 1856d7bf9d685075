//! The launch exchange.
//!
//! An external process asks "give me the command line that would launch
//! connection X" and gets back the literal argument vector: the
//! ancestors' wrapper prefixes chained root to leaf, then the target's
//! own interactive launch command. Pure lookup and rendering, no side
//! effects; an unknown name is the only error.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backend::ConnectorRegistry;
use crate::error::NotFound;
use crate::store::{ConnectionEntry, ConnectionStore};

/// Ancestor chains longer than this indicate a corrupt (unvalidated)
/// hierarchy; rendering bails instead of walking forever.
const MAX_CHAIN_DEPTH: usize = 64;

/// Request: identifies a launch target by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub name: String,
}

/// Response: the argument vector that starts the connection.
///
/// Never empty on success; the first element is the executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResponse {
    pub command: Vec<String>,
}

/// Handler for launch lookups against a store.
pub struct LaunchExchange {
    store: Arc<ConnectionStore>,
    registry: Arc<ConnectorRegistry>,
}

impl LaunchExchange {
    pub fn new(store: Arc<ConnectionStore>, registry: Arc<ConnectorRegistry>) -> Self {
        Self { store, registry }
    }

    /// Render the launch command for a named entry.
    pub fn handle(&self, name: &str) -> Result<LaunchResponse, NotFound> {
        let entry = self
            .store
            .by_name(name)
            .ok_or_else(|| NotFound(name.to_string()))?;

        if !entry.store.is_connectable() {
            return Err(NotFound(name.to_string()));
        }

        let mut command = Vec::new();
        for ancestor in self.ancestors(&entry)? {
            let connector = self
                .registry
                .connector_for(&ancestor.store)
                .ok_or_else(|| NotFound(name.to_string()))?;
            command.extend(connector.launch_prefix(&ancestor, &self.store));
        }

        let connector = self
            .registry
            .connector_for(&entry.store)
            .ok_or_else(|| NotFound(name.to_string()))?;
        command.extend(connector.launch_command(&entry, &self.store));

        if let Some(first) = command.first_mut() {
            if let Some(resolved) = resolve_executable(first) {
                *first = resolved;
            }
        }

        debug_assert!(!command.is_empty());
        Ok(LaunchResponse { command })
    }

    /// The entry's ancestor chain, root first.
    fn ancestors(&self, entry: &ConnectionEntry) -> Result<Vec<ConnectionEntry>, NotFound> {
        let mut chain = Vec::new();
        let mut cursor = entry.parent;
        while let Some(id) = cursor {
            if chain.len() >= MAX_CHAIN_DEPTH {
                warn!(entry = %entry.name, "ancestor chain too deep, refusing to render");
                return Err(NotFound(entry.name.clone()));
            }
            let ancestor = self
                .store
                .get(id)
                .ok_or_else(|| NotFound(entry.name.clone()))?;
            cursor = ancestor.parent;
            chain.push(ancestor);
        }
        chain.reverse();
        Ok(chain)
    }
}

/// Resolve an executable name to an absolute path.
///
/// Absolute paths pass through; bare names search `PATH`. A name that
/// resolves nowhere is returned as `None` and the caller keeps it as-is.
pub fn resolve_executable(name: &str) -> Option<String> {
    resolve_in(name, std::env::var_os("PATH").as_deref())
}

fn resolve_in(name: &str, path_var: Option<&OsStr>) -> Option<String> {
    if Path::new(name).is_absolute() {
        return Some(name.to_string());
    }
    for dir in std::env::split_paths(path_var?) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return candidate.to_str().map(str::to_string);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ConnectorContext;
    use crate::session::testing::{ScriptedBackend, ScriptedResponse};
    use crate::store::StoreDef;

    fn exchange(store: Arc<ConnectionStore>) -> LaunchExchange {
        let backend = ScriptedBackend::new(|_| ScriptedResponse::exit(0));
        let registry = Arc::new(ConnectorRegistry::with_defaults(ConnectorContext::new(
            backend.factory(),
        )));
        LaunchExchange::new(store, registry)
    }

    #[test]
    fn test_missing_name_is_not_found() {
        let store = Arc::new(ConnectionStore::new());
        let err = exchange(store).handle("missing").unwrap_err();
        assert_eq!(err, NotFound("missing".into()));
    }

    #[test]
    #[cfg(unix)]
    fn test_local_entry_renders_absolute_shell() {
        let store = Arc::new(ConnectionStore::new());
        store
            .add(ConnectionEntry::new("this machine", StoreDef::Local))
            .unwrap();

        let response = exchange(store).handle("this machine").unwrap();
        assert!(!response.command.is_empty());
        assert!(Path::new(&response.command[0]).is_absolute());
    }

    #[test]
    fn test_container_chain_renders_exec_wrapper() {
        let store = Arc::new(ConnectionStore::new());
        let host_id = store
            .add(ConnectionEntry::new("host", StoreDef::Local))
            .unwrap();
        store
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

        let response = exchange(store).handle("web").unwrap();
        // Local parent contributes no prefix, so the command is the exec argv
        assert!(response.command[0].ends_with("incus"));
        assert_eq!(
            response.command[1..],
            ["exec", "web-1", "--", "sh"].map(String::from)
        );
    }

    #[test]
    fn test_ssh_nested_container_chain() {
        let store = Arc::new(ConnectionStore::new());
        let host_id = store
            .add(ConnectionEntry::new(
                "jump",
                StoreDef::SshHost {
                    host: "jump.example.org".into(),
                    port: 22,
                    identity: None,
                },
            ))
            .unwrap();
        store
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

        let response = exchange(store).handle("web").unwrap();
        assert!(response.command[0].ends_with("ssh"));
        assert_eq!(
            response.command[1..],
            [
                "-oBatchMode=yes",
                "jump.example.org",
                "incus",
                "exec",
                "web-1",
                "--",
                "sh"
            ]
            .map(String::from)
        );
    }

    #[test]
    fn test_identity_entry_not_launchable() {
        let store = Arc::new(ConnectionStore::new());
        store
            .add(ConnectionEntry::new(
                "creds",
                StoreDef::Identity {
                    identity: crate::identity::LocalIdentity::user("root"),
                },
            ))
            .unwrap();

        assert!(exchange(store).handle("creds").is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_in_finds_executable() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("fakebin");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();

        let path_var = std::ffi::OsString::from(dir.path());
        let resolved = resolve_in("fakebin", Some(path_var.as_os_str())).unwrap();
        assert_eq!(resolved, exe.to_str().unwrap());
    }

    #[test]
    fn test_resolve_in_absolute_passthrough() {
        assert_eq!(
            resolve_in("/bin/sh", None).as_deref(),
            Some("/bin/sh")
        );
    }

    #[test]
    fn test_resolve_in_miss() {
        assert!(resolve_in("definitely-not-a-real-binary", None).is_none());
    }

    #[test]
    fn test_request_response_serde() {
        let request: LaunchRequest = serde_json::from_str(r#"{"name":"web"}"#).unwrap();
        assert_eq!(request.name, "web");

        let response = LaunchResponse {
            command: vec!["/bin/sh".into()],
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("/bin/sh"));
    }
}
