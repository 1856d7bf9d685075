//! Connector and command surface for containers.
//!
//! Containers are layered stores: the exec and control commands run on
//! the parent host's session, never on the container's own.

use std::sync::Arc;

use async_trait::async_trait;

use super::{resolve_entry_identity, Connector, ConnectorContext};
use crate::error::{OperationError, StartupError};
use crate::session::{Discovery, OpenOptions, ShellSession, StartupFailHook};
use crate::store::{ConnectionEntry, ConnectionStore, StoreDef};

/// Build the exec argv for entering a container.
pub fn container_exec_argv(
    name: &str,
    uid: Option<u32>,
    cwd: Option<&str>,
    shell: &str,
) -> Vec<String> {
    let mut argv = vec!["incus".to_string(), "exec".to_string(), name.to_string()];
    if let Some(uid) = uid {
        argv.push("--user".to_string());
        argv.push(uid.to_string());
    }
    if let Some(cwd) = cwd {
        argv.push("--cwd".to_string());
        argv.push(cwd.to_string());
    }
    argv.push("--".to_string());
    argv.push(shell.to_string());
    argv
}

/// Opens shells inside containers through their parent host.
pub struct ContainerConnector;

#[async_trait]
impl Connector for ContainerConnector {
    fn kind(&self) -> &'static str {
        "container"
    }

    fn launch_prefix(&self, entry: &ConnectionEntry, _store: &ConnectionStore) -> Vec<String> {
        let StoreDef::Container { container_name, .. } = &entry.store else {
            return Vec::new();
        };
        vec![
            "incus".to_string(),
            "exec".to_string(),
            container_name.clone(),
            "--".to_string(),
        ]
    }

    fn launch_command(&self, entry: &ConnectionEntry, _store: &ConnectionStore) -> Vec<String> {
        let StoreDef::Container { container_name, .. } = &entry.store else {
            return Vec::new();
        };
        container_exec_argv(container_name, None, None, "sh")
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
        let StoreDef::Container { container_name, .. } = &entry.store else {
            return Err(StartupError::Other(format!(
                "connector mismatch for entry {}",
                entry.name
            )));
        };
        let parent = parent.ok_or_else(|| {
            StartupError::Other(format!("container {} has no parent session", entry.name))
        })?;

        ctx.license.check(self.kind())?;
        let identity = resolve_entry_identity(entry, store)?;

        let mut probe_command = chain_prefix.clone();
        probe_command.extend(container_exec_argv(container_name, None, None, "sh"));

        let name = container_name.clone();
        let options = OpenOptions {
            name: entry.name.clone(),
            factory: Arc::clone(&ctx.factory),
            probe_command,
            build_command: Box::new(move |d: &Discovery| {
                let mut command = chain_prefix;
                command.extend(container_exec_argv(
                    &name,
                    d.uid,
                    d.home.as_deref(),
                    d.dialect.binary(),
                ));
                command
            }),
            identity,
            parent: Some(parent),
            init_commands: vec!["export LC_ALL=C HISTFILE=".to_string()],
            on_startup_fail,
            command_timeout: ctx.command_timeout,
        };

        ShellSession::open(options).await
    }
}

/// Container control commands issued through a host session.
pub struct ContainerCli<'a> {
    session: &'a ShellSession,
}

impl<'a> ContainerCli<'a> {
    pub fn new(session: &'a ShellSession) -> Self {
        Self { session }
    }

    /// Query the backend's display state, e.g. `RUNNING` or `STOPPED`.
    pub async fn query_state(&self, name: &str) -> Result<String, OperationError> {
        let out = self
            .session
            .execute(&format!(
                "incus list '^{name}$' --columns s --format csv"
            ))
            .await
            .map_err(|_| OperationError::ParentUnreachable(name.to_string()))?;

        if !out.success() {
            return Err(OperationError::ControlFailed {
                action: "query",
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }

        Ok(out.stdout.lines().next().unwrap_or("").trim().to_string())
    }

    pub async fn start(&self, name: &str) -> Result<(), OperationError> {
        self.control("start", name).await
    }

    pub async fn stop(&self, name: &str) -> Result<(), OperationError> {
        self.control("stop", name).await
    }

    pub async fn pause(&self, name: &str) -> Result<(), OperationError> {
        self.control("pause", name).await
    }

    async fn control(&self, action: &'static str, name: &str) -> Result<(), OperationError> {
        let out = self
            .session
            .execute(&format!("incus {action} '{name}'"))
            .await
            .map_err(|_| OperationError::ParentUnreachable(name.to_string()))?;

        if !out.success() {
            return Err(OperationError::ControlFailed {
                action,
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_argv_minimal() {
        let argv = container_exec_argv("web-1", None, None, "sh");
        assert_eq!(argv, ["incus", "exec", "web-1", "--", "sh"]);
    }

    #[test]
    fn test_exec_argv_with_user_and_cwd() {
        let argv = container_exec_argv("web-1", Some(1000), Some("/home/deploy"), "bash");
        assert_eq!(
            argv,
            [
                "incus",
                "exec",
                "web-1",
                "--user",
                "1000",
                "--cwd",
                "/home/deploy",
                "--",
                "bash"
            ]
        );
    }

    #[test]
    fn test_launch_prefix() {
        let store = ConnectionStore::new();
        let entry = ConnectionEntry::new(
            "web",
            StoreDef::Container {
                container_name: "web-1".into(),
                identity: None,
            },
        );
        assert_eq!(
            ContainerConnector.launch_prefix(&entry, &store),
            ["incus", "exec", "web-1", "--"]
        );
    }
}
