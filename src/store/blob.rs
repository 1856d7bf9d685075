//! Typed state blobs.
//!
//! Each store kind has its own blob schema, versioned implicitly by the
//! kind. All fields carry defaults so loading an older or partial blob
//! never fails.

use serde::{Deserialize, Serialize};

use crate::session::ShellDialect;

/// Live state of a container-style entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerState {
    /// Whether the container was running at the last refresh.
    pub running: bool,
    /// Backend display string, e.g. `RUNNING`, `STOPPED`, `FROZEN`.
    pub container_state: Option<String>,
}

impl ContainerState {
    pub fn with_display(display: impl Into<String>) -> Self {
        let display = display.into();
        Self {
            running: display == "RUNNING",
            container_state: Some(display),
        }
    }
}

/// Shell-level state recorded for connectable host entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostState {
    /// Dialect negotiated by the last successful session.
    pub dialect: Option<ShellDialect>,
}
