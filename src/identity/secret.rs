//! Secret retrieval strategies.
//!
//! Secrets are configured as *strategies* and only materialized when a
//! consuming session asks its provider. Connections that never elevate
//! or log in never read their secrets.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StartupError, ValidationError};

/// How a secret is obtained when it is actually needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecretStrategy {
    /// No secret configured.
    None,
    /// Stored directly in the configuration.
    InPlace { value: String },
    /// Obtained by running a local command and taking its first output line.
    Command { command: Vec<String> },
    /// Read from an environment variable.
    EnvVar { name: String },
}

impl SecretStrategy {
    /// Whether this strategy can produce a secret at all.
    pub fn expects_value(&self) -> bool {
        !matches!(self, SecretStrategy::None)
    }

    /// Validate the strategy configuration without touching the secret.
    pub fn check_complete(&self) -> Result<(), ValidationError> {
        match self {
            SecretStrategy::None => Ok(()),
            SecretStrategy::InPlace { value } => {
                if value.is_empty() {
                    Err(ValidationError::MissingValue("secret value"))
                } else {
                    Ok(())
                }
            }
            SecretStrategy::Command { command } => {
                if command.is_empty() {
                    Err(ValidationError::MissingValue("secret command"))
                } else {
                    Ok(())
                }
            }
            SecretStrategy::EnvVar { name } => {
                if name.is_empty() {
                    Err(ValidationError::MissingValue("secret variable name"))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Build the lazy provider for this strategy.
    ///
    /// Returns `None` for [`SecretStrategy::None`].
    pub fn provider(&self) -> Option<SecretProvider> {
        if self.expects_value() {
            Some(SecretProvider {
                strategy: self.clone(),
            })
        } else {
            None
        }
    }
}

impl Default for SecretStrategy {
    fn default() -> Self {
        SecretStrategy::None
    }
}

/// Deferred handle on a secret; reading happens at point of use.
#[derive(Debug, Clone)]
pub struct SecretProvider {
    strategy: SecretStrategy,
}

impl SecretProvider {
    /// Materialize the secret now.
    pub fn retrieve(&self) -> Result<SecretValue, StartupError> {
        match &self.strategy {
            SecretStrategy::None => Err(StartupError::AuthenticationFailed(
                "no secret configured".into(),
            )),
            SecretStrategy::InPlace { value } => Ok(SecretValue::new(value.clone())),
            SecretStrategy::Command { command } => {
                let (program, args) = command.split_first().ok_or_else(|| {
                    StartupError::AuthenticationFailed("empty secret command".into())
                })?;
                let output = std::process::Command::new(program)
                    .args(args)
                    .output()
                    .map_err(|e| {
                        StartupError::AuthenticationFailed(format!(
                            "secret command failed to run: {e}"
                        ))
                    })?;
                if !output.status.success() {
                    return Err(StartupError::AuthenticationFailed(format!(
                        "secret command exited with {}",
                        output.status
                    )));
                }
                let text = String::from_utf8_lossy(&output.stdout);
                let line = text.lines().next().unwrap_or("").to_string();
                if line.is_empty() {
                    return Err(StartupError::AuthenticationFailed(
                        "secret command produced no output".into(),
                    ));
                }
                Ok(SecretValue::new(line))
            }
            SecretStrategy::EnvVar { name } => std::env::var(name)
                .map(SecretValue::new)
                .map_err(|_| {
                    StartupError::AuthenticationFailed(format!(
                        "secret variable {name} not set"
                    ))
                }),
        }
    }
}

/// A materialized secret. The Debug representation is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the raw secret for feeding into a channel.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(<redacted>)")
    }
}

/// How SSH key material is supplied for a login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SshIdentityStrategy {
    /// No key-based auth.
    None,
    /// Use a key file, optionally passphrase-protected.
    File {
        path: String,
        #[serde(default)]
        passphrase: Option<SecretStrategy>,
    },
    /// Defer to a running SSH agent.
    Agent,
}

impl SshIdentityStrategy {
    pub fn expects_value(&self) -> bool {
        !matches!(self, SshIdentityStrategy::None)
    }

    pub fn check_complete(&self) -> Result<(), ValidationError> {
        match self {
            SshIdentityStrategy::None | SshIdentityStrategy::Agent => Ok(()),
            SshIdentityStrategy::File { path, passphrase } => {
                if path.is_empty() {
                    return Err(ValidationError::MissingValue("ssh key path"));
                }
                if let Some(p) = passphrase {
                    p.check_complete()?;
                }
                Ok(())
            }
        }
    }
}

impl Default for SshIdentityStrategy {
    fn default() -> Self {
        SshIdentityStrategy::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_has_no_provider() {
        assert!(SecretStrategy::None.provider().is_none());
    }

    #[test]
    fn test_in_place_retrieve() {
        let strategy = SecretStrategy::InPlace {
            value: "hunter2".into(),
        };
        let provider = strategy.provider().unwrap();
        assert_eq!(provider.retrieve().unwrap().expose(), "hunter2");
    }

    #[test]
    fn test_env_var_retrieve() {
        std::env::set_var("RELAY_TEST_SECRET", "from-env");
        let strategy = SecretStrategy::EnvVar {
            name: "RELAY_TEST_SECRET".into(),
        };
        let provider = strategy.provider().unwrap();
        assert_eq!(provider.retrieve().unwrap().expose(), "from-env");
    }

    #[test]
    fn test_env_var_missing() {
        let strategy = SecretStrategy::EnvVar {
            name: "RELAY_TEST_SECRET_MISSING".into(),
        };
        let provider = strategy.provider().unwrap();
        assert!(matches!(
            provider.retrieve(),
            Err(StartupError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_check_complete_empty_in_place() {
        let strategy = SecretStrategy::InPlace { value: "".into() };
        assert!(strategy.check_complete().is_err());
    }

    #[test]
    fn test_secret_value_debug_redacted() {
        let secret = SecretValue::new("hunter2");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_ssh_identity_file_requires_path() {
        let strategy = SshIdentityStrategy::File {
            path: "".into(),
            passphrase: None,
        };
        assert!(strategy.check_complete().is_err());

        let strategy = SshIdentityStrategy::File {
            path: "/home/user/.ssh/id_ed25519".into(),
            passphrase: None,
        };
        assert!(strategy.check_complete().is_ok());
    }

    #[test]
    fn test_strategy_serde_roundtrip() {
        let strategy = SecretStrategy::Command {
            command: vec!["pass".into(), "show".into(), "host".into()],
        };
        let json = serde_json::to_string(&strategy).unwrap();
        let back: SecretStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(strategy, back);
    }
}
