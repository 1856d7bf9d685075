//! Channel layer: raw bidirectional byte streams to shell processes.
//!
//! A [`ShellChannel`] is the boundary this crate treats as opaque: bytes
//! in, bytes out, plus a termination signal. The native implementation
//! spawns local PTY processes; composed backends reach remote targets by
//! spawning the flattened wrapper command (`ssh`, `incus exec`, ...)
//! through the same local factory. Tests substitute scripted channels.

mod native;

pub use native::{default_shell, NativePtyFactory};

use async_trait::async_trait;

use crate::error::StartupError;

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Raw bidirectional byte stream to one shell process.
#[async_trait]
pub trait ShellChannel: Send {
    /// Send raw bytes to the process input.
    async fn send(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Receive the next output chunk. `None` means the stream ended.
    async fn recv(&mut self) -> Option<Vec<u8>>;

    /// Whether the underlying process is still running.
    fn is_alive(&mut self) -> bool;

    /// Send a termination signal and release process resources.
    ///
    /// Must be safe to call more than once.
    fn terminate(&mut self);
}

/// Opens channels for a command vector.
///
/// Passed explicitly through the connector context so tests can inject
/// scripted implementations.
pub trait ChannelFactory: Send + Sync {
    /// Spawn the command and return a channel attached to it.
    fn open(&self, command: &[String]) -> Result<Box<dyn ShellChannel>, StartupError>;
}
