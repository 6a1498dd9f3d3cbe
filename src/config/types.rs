use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// errno reported when no entropy source is available (`getentropy` -> ENOSYS)
pub const NO_ENTROPY_ERRNO: i32 = libc::ENOSYS;

/// Entropy draw refused by the gate.
///
/// Mirrors the OS "no entropy source" condition so that code already written
/// to fall back on that errno keeps working unmodified.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("entropy source unavailable before the first request (errno {errno})")]
pub struct EntropyDenied {
    pub errno: i32,
}

impl EntropyDenied {
    pub fn new() -> Self {
        Self {
            errno: NO_ENTROPY_ERRNO,
        }
    }

    /// Raw OS error code carried by this denial
    pub fn raw_os_error(&self) -> i32 {
        self.errno
    }
}

impl Default for EntropyDenied {
    fn default() -> Self {
        Self::new()
    }
}

impl From<EntropyDenied> for std::io::Error {
    fn from(err: EntropyDenied) -> Self {
        std::io::Error::from_raw_os_error(err.errno)
    }
}

/// One isolated failure raised by a before-first-request callback
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackFailure {
    pub module: String,
    pub message: String,
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.module, self.message)
    }
}

fn join_failures(failures: &[CallbackFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Custom error types for seedbox
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error(transparent)]
    EntropyDenied(#[from] EntropyDenied),

    #[error("Cannot use {module}.{attribute}() outside of request context")]
    UsedOutsideRequestContext { module: String, attribute: String },

    #[error("{leftover} unexpected leftover entropy calls (allowance was {requested})")]
    LeftoverEntropyAllowance { leftover: u32, requested: u32 },

    #[error("No module named '{0}'")]
    ModuleNotFound(String),

    #[error("module '{module}' has no attribute '{attribute}'")]
    AttributeNotFound { module: String, attribute: String },

    #[error("'{module}.{attribute}' is not callable")]
    NotCallable { module: String, attribute: String },

    #[error("Error executing module '{module}': {message}")]
    ModuleExec { module: String, message: String },

    #[error("{} before-first-request callback(s) failed: {}", .0.len(), join_failures(.0))]
    CallbackFailures(Vec<CallbackFailure>),

    #[error("Entropy error: {0}")]
    Entropy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SandboxError {
    /// Raw OS error code, if this error mirrors one
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            SandboxError::EntropyDenied(denied) => Some(denied.raw_os_error()),
            SandboxError::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }

    pub fn is_entropy_denied(&self) -> bool {
        matches!(self, SandboxError::EntropyDenied(_))
    }
}

/// Result type alias for seedbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_denied_mirrors_enosys() {
        let denied = EntropyDenied::new();
        assert_eq!(denied.raw_os_error(), libc::ENOSYS);

        let io: std::io::Error = denied.into();
        assert_eq!(io.raw_os_error(), Some(libc::ENOSYS));

        let err = SandboxError::from(denied);
        assert!(err.is_entropy_denied());
        assert_eq!(err.raw_os_error(), Some(libc::ENOSYS));
    }

    #[test]
    fn test_blocked_call_message_names_module_and_attribute() {
        let err = SandboxError::UsedOutsideRequestContext {
            module: "random".to_string(),
            attribute: "random".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot use random.random() outside of request context"
        );
    }

    #[test]
    fn test_callback_failures_are_listed() {
        let err = SandboxError::CallbackFailures(vec![
            CallbackFailure {
                module: "random".to_string(),
                message: "boom".to_string(),
            },
            CallbackFailure {
                module: "tempfile".to_string(),
                message: "bang".to_string(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 before-first-request callback(s) failed"));
        assert!(msg.contains("random: boom"));
        assert!(msg.contains("tempfile: bang"));
    }
}
