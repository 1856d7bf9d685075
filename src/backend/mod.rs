//! Backend connectors.
//!
//! Each store kind maps to one connector implementing the same
//! open/attach contract. Connectors are looked up through an explicit
//! registry populated at process start; nothing global, so tests inject
//! scripted factories and fake gates.

mod container;
mod local;
mod ssh;

pub use container::{container_exec_argv, ContainerCli, ContainerConnector};
pub use local::LocalConnector;
pub use ssh::SshConnector;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StartupError;
use crate::pty::ChannelFactory;
use crate::session::{ShellSession, StartupFailHook, DEFAULT_COMMAND_TIMEOUT};
use crate::store::{ConnectionEntry, ConnectionStore, StoreDef};

/// Gate for license-restricted backend features.
pub trait LicenseGate: Send + Sync {
    /// Err([`StartupError::LicenseRequired`]) when the feature is gated.
    fn check(&self, feature: &str) -> Result<(), StartupError>;
}

/// Gate that allows everything.
pub struct OpenGate;

impl LicenseGate for OpenGate {
    fn check(&self, _feature: &str) -> Result<(), StartupError> {
        Ok(())
    }
}

/// Everything a connector needs besides the entry itself.
pub struct ConnectorContext {
    /// Spawns channels from argv vectors.
    pub factory: Arc<dyn ChannelFactory>,
    /// License gate consulted before opening gated backends.
    pub license: Arc<dyn LicenseGate>,
    /// Deadline for handshake and init commands.
    pub command_timeout: Duration,
}

impl ConnectorContext {
    pub fn new(factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            factory,
            license: Arc::new(OpenGate),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_license(mut self, license: Arc<dyn LicenseGate>) -> Self {
        self.license = license;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// The open/attach capability contract every backend implements.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Store kind tag this connector serves.
    fn kind(&self) -> &'static str;

    /// Wrapper argv that runs a command on this backend from outside it.
    ///
    /// Empty for the local machine; `ssh host`-style for remote hosts;
    /// `incus exec name --`-style for containers. Chained root-to-leaf
    /// these render the full launch command for a nested target.
    fn launch_prefix(&self, entry: &ConnectionEntry, store: &ConnectionStore) -> Vec<String>;

    /// Argv that opens an interactive shell on this backend, relative to
    /// its parent. The launch exchange appends this to the ancestors'
    /// prefixes.
    fn launch_command(&self, entry: &ConnectionEntry, store: &ConnectionStore) -> Vec<String>;

    /// Open a negotiated session on this backend.
    ///
    /// `chain_prefix` is the flattened wrapper argv of all ancestors;
    /// `parent` is the ancestor session for lifetime coordination and is
    /// present exactly when the store requires a parent.
    async fn open(
        &self,
        entry: &ConnectionEntry,
        parent: Option<Arc<ShellSession>>,
        chain_prefix: Vec<String>,
        store: &Arc<ConnectionStore>,
        ctx: &ConnectorContext,
        on_startup_fail: Option<StartupFailHook>,
    ) -> Result<Arc<ShellSession>, StartupError>;
}

/// Resolve an entry's configured identity against the store's directory.
///
/// Validation has already vetted the reference; a failure here means the
/// configuration changed under us and surfaces as a startup error.
pub(crate) fn resolve_entry_identity(
    entry: &ConnectionEntry,
    store: &Arc<ConnectionStore>,
) -> Result<Option<crate::identity::ResolvedIdentity>, StartupError> {
    match entry.store.identity() {
        Some(value) => value
            .resolve(store.as_ref())
            .map(Some)
            .map_err(|e| StartupError::Other(format!("identity resolution failed: {e}"))),
        None => Ok(None),
    }
}

/// Connector lookup by store kind.
pub struct ConnectorRegistry {
    connectors: HashMap<&'static str, Arc<dyn Connector>>,
    context: ConnectorContext,
}

impl ConnectorRegistry {
    /// An empty registry; callers register connectors explicitly.
    pub fn new(context: ConnectorContext) -> Self {
        Self {
            connectors: HashMap::new(),
            context,
        }
    }

    /// Registry with the built-in connectors.
    pub fn with_defaults(context: ConnectorContext) -> Self {
        let mut registry = Self::new(context);
        registry.register(Arc::new(LocalConnector));
        registry.register(Arc::new(SshConnector));
        registry.register(Arc::new(ContainerConnector));
        registry
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.kind(), connector);
    }

    /// The connector serving a store definition, if registered.
    pub fn connector_for(&self, store: &StoreDef) -> Option<Arc<dyn Connector>> {
        self.connectors.get(store.kind()).map(Arc::clone)
    }

    pub fn context(&self) -> &ConnectorContext {
        &self.context
    }
}
