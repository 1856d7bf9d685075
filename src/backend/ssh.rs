//! Connector for SSH hosts.

use std::sync::Arc;

use async_trait::async_trait;

use super::{resolve_entry_identity, Connector, ConnectorContext};
use crate::error::StartupError;
use crate::identity::SshIdentityStrategy;
use crate::session::{Discovery, OpenOptions, ShellSession, StartupFailHook};
use crate::store::{ConnectionEntry, ConnectionStore, StoreDef};

/// Opens shells on hosts reached through the system `ssh` client.
///
/// Authentication is key- or agent-based; `BatchMode` keeps the client
/// from prompting into the framed stream.
pub struct SshConnector;

impl SshConnector {
    fn wrapper(&self, entry: &ConnectionEntry, store: &ConnectionStore) -> Vec<String> {
        let StoreDef::SshHost {
            host,
            port,
            identity,
        } = &entry.store
        else {
            return Vec::new();
        };

        let mut argv = vec!["ssh".to_string(), "-oBatchMode=yes".to_string()];

        if *port != 22 {
            argv.push("-p".to_string());
            argv.push(port.to_string());
        }

        let mut target = host.clone();
        if let Some(identity) = identity {
            // Inline and resolvable references contribute the login user
            // and key file; an unresolvable ref is caught by validation.
            if let Ok(concrete) = identity.unwrap(store) {
                if let Some(user) = concrete.username.as_deref().filter(|u| !u.is_empty()) {
                    target = format!("{user}@{host}");
                }
                if let Some(SshIdentityStrategy::File { path, .. }) = &concrete.ssh_identity {
                    argv.push("-i".to_string());
                    argv.push(path.clone());
                }
            }
        }

        argv.push(target);
        argv
    }
}

#[async_trait]
impl Connector for SshConnector {
    fn kind(&self) -> &'static str {
        "ssh_host"
    }

    fn launch_prefix(&self, entry: &ConnectionEntry, store: &ConnectionStore) -> Vec<String> {
        self.wrapper(entry, store)
    }

    // Interactive login shell: the wrapper with no remote command
    fn launch_command(&self, entry: &ConnectionEntry, store: &ConnectionStore) -> Vec<String> {
        self.wrapper(entry, store)
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

        let mut prefix = chain_prefix;
        prefix.extend(self.wrapper(entry, store));

        let mut probe_command = prefix.clone();
        probe_command.push("sh".to_string());

        let options = OpenOptions {
            name: entry.name.clone(),
            factory: Arc::clone(&ctx.factory),
            probe_command,
            build_command: Box::new(move |d: &Discovery| {
                let mut command = prefix;
                command.push(d.dialect.binary().to_string());
                command
            }),
            identity,
            parent,
            init_commands: vec!["export LC_ALL=C HISTFILE=".to_string()],
            on_startup_fail,
            command_timeout: ctx.command_timeout,
        };

        ShellSession::open(options).await
    }
}
