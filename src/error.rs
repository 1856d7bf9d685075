//! Error types for shell-relay.
//!
//! The taxonomy separates configuration problems detected before any I/O
//! (`ValidationError`), session establishment failures (`StartupError`),
//! failures of individual commands on a live session (`ExecutionError`),
//! and misuse of entry control actions (`OperationError`).

use thiserror::Error;

/// Bad or incomplete configuration, detected before any I/O happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required value is missing.
    #[error("missing required value: {0}")]
    MissingValue(&'static str),

    /// A reference points at an entry of the wrong kind.
    #[error("reference type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// A referenced entry does not exist in the store.
    #[error("dangling reference: no entry with id {0}")]
    DanglingReference(String),

    /// The parent chain of an entry contains a cycle.
    #[error("cyclic parent chain involving entry {0}")]
    CyclicParentChain(String),
}

/// Session establishment failed.
#[derive(Error, Debug)]
pub enum StartupError {
    /// The configured user does not exist in the backend's user database.
    #[error("user {0} not found on target")]
    UserNotFound(String),

    /// No usable shell interpreter was found on the target.
    #[error("no usable shell dialect on target: {0}")]
    DialectUnavailable(String),

    /// The backend rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A gated feature was requested without a license.
    ///
    /// Soft condition: callers must not mark the entry failed because of it.
    #[error("feature requires a license: {0}")]
    LicenseRequired(String),

    /// The underlying channel could not be opened.
    #[error("failed to open channel: {0}")]
    ChannelOpen(String),

    /// Any other establishment failure.
    #[error("session startup failed: {0}")]
    Other(String),
}

impl StartupError {
    /// Whether this failure must leave the owning entry's state untouched.
    pub fn is_soft(&self) -> bool {
        matches!(self, StartupError::LicenseRequired(_))
    }
}

/// A command on a live session failed.
///
/// A nonzero exit code is reported as data, not as an error.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The command exceeded its deadline. The process has been terminated.
    #[error("command execution timeout")]
    Timeout,

    /// The underlying shell process died.
    #[error("shell process died")]
    ProcessDied,

    /// The session is closed or failed and cannot execute.
    #[error("session not executable: current state is {0:?}")]
    NotExecutable(crate::session::SessionState),

    /// The output stream desynchronized from the command framing.
    #[error("output framing desync: {0}")]
    Protocol(String),

    /// Elevation was required but its secret could not be materialized.
    #[error("elevation failed: {0}")]
    Elevation(String),

    /// I/O error on the channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An entry control action was misused.
#[derive(Error, Debug)]
pub enum OperationError {
    /// The entry's capability set does not include this action.
    #[error("entry {entry} does not support {action}")]
    UnsupportedAction {
        action: &'static str,
        entry: String,
    },

    /// The parent connection could not be reached to issue the action.
    #[error("parent of {0} is unreachable")]
    ParentUnreachable(String),

    /// The control command itself failed on the parent.
    #[error("{action} failed with exit code {exit_code}: {stderr}")]
    ControlFailed {
        action: &'static str,
        exit_code: i32,
        stderr: String,
    },

    /// The entry is currently in use and cannot be deleted.
    #[error("entry {0} is in use and cannot be deleted")]
    EntryInUse(String),
}

/// A launch lookup missed. The only error class of the launch exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no launchable entry named {0}")]
pub struct NotFound(pub String);

/// Main error type for shell-relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    NotFound(#[from] NotFound),

    /// Invalid session state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: crate::session::SessionState,
        to: crate::session::SessionState,
    },

    /// Entry lookup by id or name missed.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted data could not be decoded.
    #[error("storage decode error: {0}")]
    StorageDecode(#[from] serde_json::Error),
}

/// Convenience Result type for shell-relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_not_found_display() {
        let err = StartupError::UserNotFound("deploy".into());
        assert!(err.to_string().contains("deploy"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_license_required_is_soft() {
        assert!(StartupError::LicenseRequired("container backends".into()).is_soft());
        assert!(!StartupError::UserNotFound("root".into()).is_soft());
        assert!(!StartupError::Other("boom".into()).is_soft());
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = ValidationError::TypeMismatch {
            expected: "identity",
            actual: "container".into(),
        };
        assert!(err.to_string().contains("identity"));
        assert!(err.to_string().contains("container"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ExecutionError = io_err.into();
        assert!(matches!(err, ExecutionError::Io(_)));
    }

    #[test]
    fn test_not_found_display() {
        let err = NotFound("missing".into());
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_relay_error_transparent() {
        let err: RelayError = ValidationError::MissingValue("username").into();
        assert!(err.to_string().contains("username"));
    }
}
