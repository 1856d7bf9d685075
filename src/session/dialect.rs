//! Shell dialect negotiation.

use serde::{Deserialize, Serialize};

/// The shell interpreter grammar a session speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellDialect {
    /// Minimal POSIX shell; always the probe dialect.
    #[default]
    Sh,
    /// Featureful bash, preferred when present.
    Bash,
}

impl ShellDialect {
    /// Detection preference, richest first.
    pub const PREFERENCE: [ShellDialect; 2] = [ShellDialect::Bash, ShellDialect::Sh];

    /// The interpreter binary name.
    pub fn binary(&self) -> &'static str {
        match self {
            ShellDialect::Sh => "sh",
            ShellDialect::Bash => "bash",
        }
    }

    /// Command that exits 0 iff the interpreter is present on the target.
    pub fn probe_command(&self) -> String {
        format!("command -v {} >/dev/null 2>&1", self.binary())
    }
}

impl std::fmt::Display for ShellDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}
