//! Scripted channels for exercising the session engine without real
//! processes.
//!
//! A [`ScriptedBackend`] plays the role of the channel factory: every
//! spawned channel parses the framed scripts the engine writes and
//! answers them through a responder closure, producing the same marker
//! framing a real shell would.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StartupError, ValidationError};
use crate::identity::{IdentityDirectory, LocalIdentity};
use crate::pty::{ChannelFactory, ShellChannel};
use crate::store::FixedId;

type Responder = dyn Fn(&str) -> ScriptedResponse + Send + Sync;

/// What a scripted channel answers for one command.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Never answer; the caller's deadline fires.
    pub hang: bool,
    /// Drop dead instead of answering.
    pub die: bool,
}

impl ScriptedResponse {
    pub fn exit(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    pub fn stdout(text: &str) -> Self {
        Self {
            stdout: text.to_string(),
            ..Default::default()
        }
    }

    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn die() -> Self {
        Self {
            die: true,
            ..Default::default()
        }
    }
}

/// Factory plus bookkeeping shared by all channels it spawns.
pub(crate) struct ScriptedBackend {
    responder: Arc<Responder>,
    commands: Arc<StdMutex<Vec<String>>>,
    spawns: Arc<StdMutex<Vec<Vec<String>>>>,
    alive_flags: Arc<StdMutex<Vec<Arc<AtomicBool>>>>,
    refuse_spawn: Arc<AtomicBool>,
}

impl ScriptedBackend {
    pub fn new(responder: impl Fn(&str) -> ScriptedResponse + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            commands: Arc::new(StdMutex::new(Vec::new())),
            spawns: Arc::new(StdMutex::new(Vec::new())),
            alive_flags: Arc::new(StdMutex::new(Vec::new())),
            refuse_spawn: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn factory(&self) -> Arc<dyn ChannelFactory> {
        Arc::new(ScriptedFactory {
            responder: Arc::clone(&self.responder),
            commands: Arc::clone(&self.commands),
            spawns: Arc::clone(&self.spawns),
            alive_flags: Arc::clone(&self.alive_flags),
            refuse_spawn: Arc::clone(&self.refuse_spawn),
        })
    }

    /// Kill every channel spawned so far, as if the processes died.
    pub fn kill_all(&self) {
        for flag in self.alive_flags.lock().unwrap().iter() {
            flag.store(false, Ordering::SeqCst);
        }
    }

    /// Make subsequent spawns fail with a channel-open error.
    pub fn refuse_spawns(&self, refuse: bool) {
        self.refuse_spawn.store(refuse, Ordering::SeqCst);
    }

    /// All framed commands seen across all channels, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// All argv vectors spawned so far.
    pub fn spawns(&self) -> Vec<Vec<String>> {
        self.spawns.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.lock().unwrap().len()
    }
}

struct ScriptedFactory {
    responder: Arc<Responder>,
    commands: Arc<StdMutex<Vec<String>>>,
    spawns: Arc<StdMutex<Vec<Vec<String>>>>,
    alive_flags: Arc<StdMutex<Vec<Arc<AtomicBool>>>>,
    refuse_spawn: Arc<AtomicBool>,
}

impl ChannelFactory for ScriptedFactory {
    fn open(&self, command: &[String]) -> Result<Box<dyn ShellChannel>, StartupError> {
        if self.refuse_spawn.load(Ordering::SeqCst) {
            return Err(StartupError::ChannelOpen("scripted spawn refused".into()));
        }

        self.spawns.lock().unwrap().push(command.to_vec());

        let alive = Arc::new(AtomicBool::new(true));
        self.alive_flags.lock().unwrap().push(Arc::clone(&alive));

        Ok(Box::new(ScriptedChannel {
            responder: Arc::clone(&self.responder),
            commands: Arc::clone(&self.commands),
            pending: VecDeque::new(),
            alive,
        }))
    }
}

struct ScriptedChannel {
    responder: Arc<Responder>,
    commands: Arc<StdMutex<Vec<String>>>,
    pending: VecDeque<Vec<u8>>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl ShellChannel for ScriptedChannel {
    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        }

        let text = String::from_utf8_lossy(data).into_owned();
        let Some((command, tag)) = parse_script(&text) else {
            // Init preamble or fed secrets; remember them for assertions
            self.commands
                .lock()
                .unwrap()
                .push(format!("raw: {}", text.trim_end()));
            return Ok(());
        };

        self.commands.lock().unwrap().push(command.clone());
        let response = (self.responder)(&command);

        if response.die {
            self.alive.store(false, Ordering::SeqCst);
            return Ok(());
        }
        if response.hang {
            return Ok(());
        }

        let mut out = String::new();
        out.push_str(&response.stdout);
        out.push_str(&format!("\n__SRD_{tag} {}\n", response.exit_code));
        out.push_str(&response.stderr);
        out.push_str(&format!("\n__SRE_{tag}\n"));
        self.pending.push_back(out.into_bytes());

        Ok(())
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(chunk);
            }
            if !self.alive.load(Ordering::SeqCst) {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn terminate(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Extract the wrapped command and the framing tag from a framed script.
///
/// Matches the shape produced by `run_framed`: the command sits inside a
/// brace group, the tag is the single-quoted argument after the marker
/// format string.
fn parse_script(text: &str) -> Option<(String, String)> {
    let rest = text.strip_prefix("{ ")?;
    let cmd_end = rest.find("\n} 2>")?;
    let command = rest[..cmd_end].to_string();

    let idx = rest.find("__SRD_%s %s")?;
    let after = &rest[idx..];
    let open = after.find("' '")? + 3;
    let len = after[open..].find('\'')?;
    let tag = after[open..open + len].to_string();

    Some((command, tag))
}

/// Directory with no entries; inline identities only.
pub(crate) struct NoDirectory;

impl IdentityDirectory for NoDirectory {
    fn lookup_identity(&self, id: FixedId) -> Result<LocalIdentity, ValidationError> {
        Err(ValidationError::DanglingReference(id.to_string()))
    }
}
