//! Connector for the local machine.

use std::sync::Arc;

use async_trait::async_trait;

use super::{resolve_entry_identity, Connector, ConnectorContext};
use crate::error::StartupError;
use crate::pty::default_shell;
use crate::session::{Discovery, OpenOptions, ShellSession, StartupFailHook};
use crate::store::{ConnectionEntry, ConnectionStore};

/// Opens shells on the machine this process runs on.
pub struct LocalConnector;

#[async_trait]
impl Connector for LocalConnector {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn launch_prefix(&self, _entry: &ConnectionEntry, _store: &ConnectionStore) -> Vec<String> {
        Vec::new()
    }

    fn launch_command(&self, _entry: &ConnectionEntry, _store: &ConnectionStore) -> Vec<String> {
        vec![default_shell().to_string()]
    }

    async fn open(
        &self,
        entry: &ConnectionEntry,
        parent: Option<Arc<ShellSession>>,
        chain_prefix: Vec<String>,
        store: &Arc<ConnectionStore>,
        ctx: &ConnectorContext,
        on_startup_fail: Option<StartupFailHook>,
    ) -> Result<Arc<ShellSession>, StartupError> {
        ctx.license.check(self.kind())?;
        let identity = resolve_entry_identity(entry, store)?;

        let mut probe_command = chain_prefix.clone();
        probe_command.push(default_shell().to_string());

        let build_prefix = chain_prefix;
        let options = OpenOptions {
            name: entry.name.clone(),
            factory: Arc::clone(&ctx.factory),
            probe_command,
            build_command: Box::new(move |d: &Discovery| {
                let mut command = build_prefix;
                command.push(d.dialect.binary().to_string());
                command
            }),
            identity,
            parent,
            // Pin the locale so downstream parsers see stable output
            init_commands: vec!["export LC_ALL=C HISTFILE=".to_string()],
            on_startup_fail,
            command_timeout: ctx.command_timeout,
        };

        ShellSession::open(options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreDef;

    #[test]
    fn test_launch_prefix_empty() {
        let store = ConnectionStore::new();
        let entry = ConnectionEntry::new("local machine", StoreDef::Local);
        assert!(LocalConnector.launch_prefix(&entry, &store).is_empty());
    }
}
