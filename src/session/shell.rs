//! The shell session engine.
//!
//! A [`ShellSession`] owns one negotiated shell process on one backend.
//! Opening performs the startup handshake: a transient POSIX-`sh` probe
//! drives user resolution and dialect detection, then the real session is
//! spawned with the resolved user, home and dialect, elevation is
//! attached, and backend init hooks run.
//!
//! Commands are framed with per-command markers so stdout, stderr and the
//! exit code can be separated on a single PTY stream. The markers are
//! emitted by `printf` in two pieces, so a shell that echoes its input
//! can never produce a contiguous marker and desync the framing.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, warn};

use super::{ElevationHandler, PasswdFile, SessionState, ShellDialect};
use crate::error::{ExecutionError, StartupError};
use crate::identity::ResolvedIdentity;
use crate::output::OutputSanitizer;
use crate::pty::{ChannelFactory, ShellChannel};

/// Default per-command deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Process-wide counter for command framing markers.
static MARKER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Callback fired when session startup fails hard.
///
/// Soft conditions ([`StartupError::LicenseRequired`]) never reach it.
pub type StartupFailHook = Box<dyn Fn(&StartupError) + Send + Sync>;

/// Result of one framed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Whether the command exited 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// What the probe handshake learned about the target.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Numeric uid of the configured user, when a user switch occurred.
    pub uid: Option<u32>,
    /// Home directory of the configured user.
    pub home: Option<String>,
    /// Richest shell dialect available on the target.
    pub dialect: ShellDialect,
}

/// Everything needed to open a session.
pub struct OpenOptions {
    /// Display name, used for logging only.
    pub name: String,
    /// Channel factory the argv vectors are spawned through.
    pub factory: Arc<dyn ChannelFactory>,
    /// Argv of the transient discovery probe (minimal `sh` dialect).
    pub probe_command: Vec<String>,
    /// Builds the real session argv from the probe's discovery.
    pub build_command: Box<dyn FnOnce(&Discovery) -> Vec<String> + Send>,
    /// Identity supplying the user to resolve and the elevation secret.
    pub identity: Option<ResolvedIdentity>,
    /// Parent session this one tunnels through, for lifetime coordination.
    pub parent: Option<Arc<ShellSession>>,
    /// Backend-specific state initialization commands.
    pub init_commands: Vec<String>,
    /// Fired on hard startup failure so the owning entry can mark itself.
    pub on_startup_fail: Option<StartupFailHook>,
    /// Deadline applied to each handshake and init command.
    pub command_timeout: Duration,
}

/// One live, negotiated shell process.
pub struct ShellSession {
    name: String,
    dialect: ShellDialect,
    uid: Option<u32>,
    home: Option<String>,
    launch_command: Vec<String>,
    elevation: Option<ElevationHandler>,
    state: StdMutex<SessionState>,
    channel: TokioMutex<Box<dyn ShellChannel>>,
    parent: Option<Weak<ShellSession>>,
    children: StdMutex<Vec<Weak<ShellSession>>>,
    command_timeout: Duration,
}

impl ShellSession {
    /// Open a session, running the full startup handshake.
    ///
    /// Hard failures fire `on_startup_fail` before returning; a
    /// [`StartupError::LicenseRequired`] propagates without firing it.
    pub async fn open(opts: OpenOptions) -> Result<Arc<ShellSession>, StartupError> {
        let OpenOptions {
            name,
            factory,
            probe_command,
            build_command,
            identity,
            parent,
            init_commands,
            on_startup_fail,
            command_timeout,
        } = opts;

        let result = Self::open_inner(
            &name,
            factory.as_ref(),
            &probe_command,
            build_command,
            identity.as_ref(),
            &init_commands,
            command_timeout,
        )
        .await;

        match result {
            Ok((channel, discovery, launch_command, state)) => {
                let elevation = identity
                    .as_ref()
                    .and_then(|i| i.password_provider())
                    .map(ElevationHandler::new);

                let session = Arc::new(ShellSession {
                    name,
                    dialect: discovery.dialect,
                    uid: discovery.uid,
                    home: discovery.home,
                    launch_command,
                    elevation,
                    state: StdMutex::new(state),
                    channel: TokioMutex::new(channel),
                    parent: parent.as_ref().map(Arc::downgrade),
                    children: StdMutex::new(Vec::new()),
                    command_timeout,
                });

                if let Some(parent) = &parent {
                    parent.register_child(&session);
                }

                debug!(
                    name = %session.name,
                    dialect = %session.dialect,
                    uid = ?session.uid,
                    "session open"
                );
                Ok(session)
            }
            Err(err) => {
                if err.is_soft() {
                    debug!(name = %name, "soft startup condition: {err}");
                } else {
                    warn!(name = %name, "session startup failed: {err}");
                    if let Some(hook) = &on_startup_fail {
                        hook(&err);
                    }
                }
                Err(err)
            }
        }
    }

    async fn open_inner(
        name: &str,
        factory: &dyn ChannelFactory,
        probe_command: &[String],
        build_command: Box<dyn FnOnce(&Discovery) -> Vec<String> + Send>,
        identity: Option<&ResolvedIdentity>,
        init_commands: &[String],
        timeout: Duration,
    ) -> Result<(Box<dyn ShellChannel>, Discovery, Vec<String>, SessionState), StartupError> {
        let mut state = SessionState::Uninitialized;
        advance(&mut state, SessionState::Probing)?;

        debug!(name, command = ?probe_command, "opening probe shell");
        let mut probe = factory.open(probe_command)?;

        if let Err(e) = init_channel(&mut *probe, timeout).await {
            probe.terminate();
            return Err(StartupError::DialectUnavailable(format!(
                "probe shell did not respond: {e}"
            )));
        }

        let discovery = match discover(&mut *probe, identity, &mut state, timeout).await {
            Ok(discovery) => discovery,
            Err(e) => {
                probe.terminate();
                return Err(e);
            }
        };
        probe.terminate();

        let launch_command = build_command(&discovery);
        debug!(name, command = ?launch_command, "opening negotiated session");
        let mut channel = factory.open(&launch_command)?;

        if let Err(e) = init_channel(&mut *channel, timeout).await {
            channel.terminate();
            return Err(StartupError::Other(format!(
                "negotiated shell did not respond: {e}"
            )));
        }

        for command in init_commands {
            match run_framed(&mut *channel, command, None, timeout).await {
                Ok(out) if !out.success() => {
                    channel.terminate();
                    return Err(StartupError::Other(format!(
                        "state init {:?} failed: {}",
                        command,
                        out.stderr.trim()
                    )));
                }
                Ok(_) => {}
                Err(e) => {
                    channel.terminate();
                    return Err(StartupError::Other(format!(
                        "state init {:?} failed: {e}",
                        command
                    )));
                }
            }
        }

        advance(&mut state, SessionState::Running)?;
        Ok((channel, discovery, launch_command, state))
    }

    /// Display name of this session.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Negotiated shell dialect.
    pub fn dialect(&self) -> ShellDialect {
        self.dialect
    }

    /// Resolved numeric uid, when a user switch occurred.
    pub fn uid(&self) -> Option<u32> {
        self.uid
    }

    /// Resolved home directory, when a user switch occurred.
    pub fn home(&self) -> Option<&str> {
        self.home.as_deref()
    }

    /// The argv this session was spawned from.
    pub fn launch_command(&self) -> &[String] {
        &self.launch_command
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *lock_ignore_poison(&self.state)
    }

    /// Whether this session can still execute commands.
    ///
    /// Checks the live process, so a session whose shell died since the
    /// last command reports dead here.
    pub async fn is_alive(&self) -> bool {
        if !self.state().can_execute() {
            return false;
        }
        self.channel.lock().await.is_alive()
    }

    /// Execute a command with the session's default deadline.
    pub async fn execute(&self, command: &str) -> Result<CommandOutput, ExecutionError> {
        self.run_internal(command, None, self.command_timeout).await
    }

    /// Execute a command with a caller-specified deadline.
    pub async fn execute_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutionError> {
        self.run_internal(command, None, timeout).await
    }

    /// Execute a command through the elevation handler.
    ///
    /// Without a handler the command runs unelevated; targets logged in as
    /// root need no wrapping.
    pub async fn execute_elevated(&self, command: &str) -> Result<CommandOutput, ExecutionError> {
        let handler = match &self.elevation {
            Some(handler) => handler,
            None => return self.execute(command).await,
        };

        let wrapped = handler.wrap(command);
        let secret = handler
            .secret()
            .map_err(|e| ExecutionError::Elevation(e.to_string()))?;
        let mut feed = secret.expose().as_bytes().to_vec();
        feed.push(b'\n');

        self.run_internal(&wrapped, Some(feed), self.command_timeout)
            .await
    }

    /// Whether an elevation handler is attached.
    pub fn can_elevate(&self) -> bool {
        self.elevation.is_some()
    }

    async fn run_internal(
        &self,
        command: &str,
        extra_input: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutionError> {
        {
            let state = lock_ignore_poison(&self.state);
            if !state.can_execute() {
                return Err(ExecutionError::NotExecutable(*state));
            }
        }

        // Serialization point: one command at a time per session
        let mut channel = self.channel.lock().await;

        if !channel.is_alive() {
            drop(channel);
            self.mark_failed();
            return Err(ExecutionError::ProcessDied);
        }

        let result = run_framed(&mut **channel, command, extra_input.as_deref(), timeout).await;

        if matches!(
            result,
            Err(ExecutionError::Timeout) | Err(ExecutionError::ProcessDied)
        ) {
            drop(channel);
            self.mark_failed();
        }

        result
    }

    /// Close the session and release its process.
    ///
    /// Idempotent. Dependent child sessions are closed first, then the
    /// channel gets a polite `exit` and a termination signal. Boxed
    /// because closing recurses down the child tree.
    pub fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            {
                let mut state = lock_ignore_poison(&self.state);
                if matches!(*state, SessionState::Closed) {
                    return;
                }
                if state.transition_to(SessionState::Closed).is_err() {
                    // Closing from a mid-handshake state releases resources too
                    *state = SessionState::Closed;
                }
            }

            let children: Vec<Arc<ShellSession>> = {
                let mut children = lock_ignore_poison(&self.children);
                children.drain(..).filter_map(|w| w.upgrade()).collect()
            };
            for child in children {
                child.close().await;
            }

            let mut channel = self.channel.lock().await;
            let _ = channel.send(b"exit\n").await;
            channel.terminate();
            debug!(name = %self.name, "session closed");
        })
    }

    /// Parent session, if still alive.
    pub fn parent(&self) -> Option<Arc<ShellSession>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    fn register_child(&self, child: &Arc<ShellSession>) {
        lock_ignore_poison(&self.children).push(Arc::downgrade(child));
    }

    fn mark_failed(&self) {
        let mut state = lock_ignore_poison(&self.state);
        let _ = state.transition_to(SessionState::Failed);
    }
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("name", &self.name)
            .field("dialect", &self.dialect)
            .field("state", &self.state())
            .finish()
    }
}

fn lock_ignore_poison<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn advance(state: &mut SessionState, to: SessionState) -> Result<(), StartupError> {
    state
        .transition_to(to)
        .map_err(|e| StartupError::Other(e.to_string()))
}

/// Drive user resolution and dialect detection on the probe shell.
async fn discover(
    probe: &mut dyn ShellChannel,
    identity: Option<&ResolvedIdentity>,
    state: &mut SessionState,
    timeout: Duration,
) -> Result<Discovery, StartupError> {
    let mut discovery = Discovery::default();

    if let Some(user) = identity.and_then(|i| i.username()) {
        advance(state, SessionState::UserResolution)?;

        let out = probe_run(probe, "cat /etc/passwd", timeout).await?;
        let passwd = PasswdFile::parse(&out.stdout);
        let uid = passwd
            .uid_for_user(user)
            .ok_or_else(|| StartupError::UserNotFound(user.to_string()))?;
        discovery.uid = Some(uid);

        let out = probe_run(probe, &format!("eval echo ~{user}"), timeout).await?;
        let home = out.stdout.trim();
        discovery.home = if home.is_empty() {
            passwd.home_for_user(user).map(str::to_string)
        } else {
            Some(home.to_string())
        };
    }

    for candidate in ShellDialect::PREFERENCE {
        if candidate == ShellDialect::Sh {
            break;
        }
        let out = probe_run(probe, &candidate.probe_command(), timeout).await?;
        if out.success() {
            discovery.dialect = candidate;
            break;
        }
    }
    advance(state, SessionState::DialectDetected)?;

    Ok(discovery)
}

async fn probe_run(
    probe: &mut dyn ShellChannel,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, StartupError> {
    run_framed(probe, command, None, timeout)
        .await
        .map_err(|e| StartupError::Other(format!("discovery command {command:?} failed: {e}")))
}

/// Quiet the shell and verify it responds to framing.
pub(crate) async fn init_channel(
    channel: &mut dyn ShellChannel,
    timeout: Duration,
) -> Result<(), ExecutionError> {
    channel
        .send(b"export PS1= PS2=\nstty -echo 2>/dev/null || true\n")
        .await
        .map_err(|_| ExecutionError::ProcessDied)?;

    run_framed(channel, "true", None, timeout).await.map(|_| ())
}

/// Run one marker-framed command on a raw channel.
///
/// `extra_input` is written right after the command, for feeding an
/// elevation password into `sudo -S`.
pub(crate) async fn run_framed(
    channel: &mut dyn ShellChannel,
    command: &str,
    extra_input: Option<&[u8]>,
    timeout: Duration,
) -> Result<CommandOutput, ExecutionError> {
    let tag = format!("{:08x}", MARKER_SEQ.fetch_add(1, Ordering::Relaxed));
    let done_marker = format!("__SRD_{tag}__");
    let err_marker = format!("__SRE_{tag}__");
    let errfile = format!("${{TMPDIR:-/tmp}}/.sr_{tag}.err");

    let script = format!(
        "{{ {command}\n}} 2>\"{errfile}\"\n\
         printf '\\n__SRD_%s %s\\n' '{tag}__' \"$?\"\n\
         cat \"{errfile}\" 2>/dev/null\n\
         rm -f \"{errfile}\"\n\
         printf '\\n__SRE_%s\\n' '{tag}__'\n"
    );

    channel
        .send(script.as_bytes())
        .await
        .map_err(|_| ExecutionError::ProcessDied)?;
    if let Some(extra) = extra_input {
        channel
            .send(extra)
            .await
            .map_err(|_| ExecutionError::ProcessDied)?;
    }

    let deadline = tokio::time::Instant::now() + timeout;
    let mut text = String::new();

    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            channel.terminate();
            return Err(ExecutionError::Timeout);
        }

        match tokio::time::timeout(deadline - now, channel.recv()).await {
            Err(_) => {
                channel.terminate();
                return Err(ExecutionError::Timeout);
            }
            Ok(None) => return Err(ExecutionError::ProcessDied),
            Ok(Some(chunk)) => {
                text.push_str(&OutputSanitizer::strip_ansi(&chunk));
                if text.lines().any(|l| l.trim() == err_marker) {
                    return parse_framed(&text, &done_marker, &err_marker);
                }
            }
        }
    }
}

fn parse_framed(text: &str, done: &str, errm: &str) -> Result<CommandOutput, ExecutionError> {
    let lines: Vec<&str> = text.lines().collect();

    let err_idx = lines
        .iter()
        .position(|l| l.trim() == errm)
        .ok_or_else(|| ExecutionError::Protocol("end marker missing".into()))?;
    let done_idx = lines[..err_idx]
        .iter()
        .position(|l| l.trim().starts_with(done))
        .ok_or_else(|| ExecutionError::Protocol("exit marker missing".into()))?;

    let done_line = lines[done_idx].trim();
    let exit_code = done_line[done.len()..]
        .trim()
        .parse::<i32>()
        .map_err(|_| ExecutionError::Protocol(format!("unparseable exit status: {done_line:?}")))?;

    Ok(CommandOutput {
        stdout: join_block(&lines[..done_idx]),
        stderr: join_block(&lines[done_idx + 1..err_idx]),
        exit_code,
    })
}

// The marker printf emits a leading newline so output without a trailing
// newline cannot swallow the marker; drop that artifact line here.
fn join_block(lines: &[&str]) -> String {
    let mut lines: Vec<&str> = lines.iter().map(|l| l.trim_end_matches('\r')).collect();
    if matches!(lines.last(), Some(l) if l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
