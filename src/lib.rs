//! # shell-relay
//!
//! Connection manager and layered shell session engine for heterogeneous
//! execution targets.
//!
//! This crate tracks configured connections (local machine, SSH hosts,
//! containers nested inside hosts) as a persistent hierarchy of entries
//! and exposes a uniform way to open, authenticate and drive a shell on
//! any of them. Sessions compose transitively: a container session is
//! layered on its host's connection, which may itself go through SSH.
//!
//! ## Features
//!
//! - **Shell negotiation**: probe handshake, user resolution, dialect
//!   detection and privilege elevation on every backend
//! - **Composition**: recursive parent resolution with live-session
//!   reuse and transparent rebuild of dead parents
//! - **Connection state machine**: usable/incomplete/failed entries with
//!   start/stop/pause semantics for controllable targets
//! - **Launch exchange**: render the exact command line that starts a
//!   configured connection
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use shell_relay::{
//!     ConnectionEntry, ConnectionStore, ConnectorContext, ConnectorRegistry,
//!     NativePtyFactory, SessionComposer, StoreDef,
//! };
//!
//! #[tokio::main]
//! async fn main() -> shell_relay::Result<()> {
//!     shell_relay::logging::try_init().ok();
//!
//!     let store = Arc::new(ConnectionStore::new());
//!     let id = store.add(ConnectionEntry::new("this machine", StoreDef::Local))?;
//!     store.validate()?;
//!
//!     let context = ConnectorContext::new(Arc::new(NativePtyFactory::new()));
//!     let composer = SessionComposer::new(Arc::new(ConnectorRegistry::with_defaults(context)));
//!
//!     let session = composer.build_session(&store, id).await?;
//!     let out = session.execute("uname -a").await?;
//!     println!("{}", out.stdout);
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backend;
pub mod cli;
pub mod compose;
pub mod config;
pub mod error;
pub mod identity;
pub mod launch;
pub mod logging;
pub mod output;
pub mod pty;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use backend::{
    Connector, ConnectorContext, ConnectorRegistry, ContainerCli, LicenseGate, OpenGate,
};
pub use compose::SessionComposer;
pub use config::Config;
pub use error::{
    ExecutionError, NotFound, OperationError, RelayError, Result, StartupError, ValidationError,
};
pub use identity::{IdentityValue, LocalIdentity, SecretProvider, SecretStrategy};
pub use launch::{LaunchExchange, LaunchRequest, LaunchResponse};
pub use pty::{ChannelFactory, NativePtyFactory, PtySize, ShellChannel};
pub use session::{CommandOutput, SessionState, ShellDialect, ShellSession};
pub use store::{
    ConnectionEntry, ConnectionStore, ContainerState, ControlAction, EntryCondition, FixedId,
    HostState, StoreDef,
};
