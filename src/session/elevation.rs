//! Privilege elevation.

use crate::error::StartupError;
use crate::identity::{SecretProvider, SecretValue};

/// Wraps commands for privileged execution and supplies the password on
/// demand.
///
/// The secret is not read when the handler is attached; it is retrieved
/// the first time an elevated command actually runs.
#[derive(Debug, Clone)]
pub struct ElevationHandler {
    username: Option<String>,
    password: SecretProvider,
}

impl ElevationHandler {
    pub fn new(password: SecretProvider) -> Self {
        Self {
            username: None,
            password,
        }
    }

    /// Elevate to a specific user instead of root.
    pub fn for_user(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Wrap a command line for elevated execution.
    ///
    /// `-S` reads the password from stdin, `-p ''` suppresses the prompt
    /// so it never pollutes the output framing.
    pub fn wrap(&self, command: &str) -> String {
        match &self.username {
            Some(user) => format!("sudo -S -p '' -u {} {}", user, command),
            None => format!("sudo -S -p '' {}", command),
        }
    }

    /// Materialize the elevation password.
    pub fn secret(&self) -> Result<SecretValue, StartupError> {
        self.password.retrieve()
    }
}
