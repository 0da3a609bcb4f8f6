// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Shellbridge.

use thiserror::Error;

/// Top-level error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    // -- Channel errors --
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed call payload: {0}")]
    MalformedCall(String),

    #[error("malformed event payload: {0}")]
    MalformedEvent(String),

    #[error("native function not found: {0}")]
    NotFound(String),

    #[error("native function failed: {0}")]
    Remote(String),

    #[error("call to {function} timed out after {after_ms}ms")]
    Timeout { function: String, after_ms: u64 },

    #[error("UI snapshot publish failed: {0}")]
    Publish(String),

    // -- Hosted-side handlers --
    #[error("listener failed: {0}")]
    Listener(String),

    // -- Setup --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Native side --
    #[error("feature not available on this platform")]
    PlatformUnavailable,
}

impl BridgeError {
    /// Whether the error was produced before the other side saw the request.
    ///
    /// Only connection-level failures qualify; a `Timeout` may still have
    /// executed natively.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_function_and_bound() {
        let err = BridgeError::Timeout {
            function: "Biometric.Authenticate".into(),
            after_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "call to Biometric.Authenticate timed out after 5000ms"
        );
    }

    #[test]
    fn io_errors_count_as_transport() {
        let err: BridgeError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(err.is_transport());
        assert!(!BridgeError::Remote("denied".into()).is_transport());
    }
}
