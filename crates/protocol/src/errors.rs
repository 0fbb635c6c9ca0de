//! Error taxonomy shared by every crate in the workspace.
//!
//! [`LxdError`] is the single error type surfaced to callers. Each operation is
//! attempted exactly once; nothing in this workspace retries on error, so the
//! variants only describe *where* a failure happened, never what to do next.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T, E = LxdError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Every failure a caller of the LXD client can observe.
#[derive(Debug, Error)]
pub enum LxdError {
    /// Network or I/O failure, or a non-success HTTP status that did not carry
    /// an LXD envelope.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the underlying failure.
        message: String,
    },

    /// The server answered with something that is not a valid LXD envelope
    /// (missing `type`, async response without an operation `id`, ...).
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the malformed response.
        message: String,
    },

    /// The server reported that the operation failed, either through an
    /// `error` envelope or a completion status code at or above the
    /// configured failure threshold.
    #[error("Remote operation failed ({status_code:?}): {message}")]
    RemoteOperation {
        /// Status or error code reported by the server, when present.
        status_code: Option<u16>,
        /// Message reported by the server.
        message: String,
    },

    /// No registered endpoint pattern matches the URL.
    #[error("No endpoint class registered for url '{url}'")]
    RegistryLookup {
        /// The URL that could not be dispatched.
        url: String,
    },

    /// A registry entry resolved to a different class than the caller asked for.
    #[error("Endpoint '{url}' is not a {expected}")]
    UnexpectedEndpoint {
        /// The resolved URL.
        url: String,
        /// The class the caller expected.
        expected: &'static str,
    },

    /// Attempted to assign a readonly field inside an edit scope.
    #[error("Field '{name}' is readonly")]
    ReadonlyField {
        /// Name of the readonly field.
        name: String,
    },

    /// The object was reloaded while an edit was open; the edit was
    /// discarded and nothing was sent.
    #[error("Edit of '{url}' was discarded by a reload")]
    StaleEdit {
        /// URL of the reloaded object.
        url: String,
    },

    /// The object has no field with this name.
    #[error("Unknown field '{name}'")]
    UnknownField {
        /// Name of the missing field.
        name: String,
    },

    /// A collection has no item with this leaf key.
    #[error("Key '{key}' not found in collection")]
    KeyNotFound {
        /// The requested key.
        key: String,
    },

    /// The server state contradicts what a completed operation implies
    /// (e.g. a created item is absent after reload).
    #[error("Inconsistent server state: {message}")]
    Inconsistent {
        /// Description of the inconsistency.
        message: String,
    },

    /// A typed payload could not be converted to or from JSON.
    #[error("Serialization error: {source}")]
    Serialization {
        /// The underlying conversion failure.
        #[from]
        source: serde_json::Error,
    },

    /// Client or transport configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl LxdError {
    /// Shorthand for [`LxdError::Transport`].
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Shorthand for [`LxdError::Protocol`].
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns `true` if the error was raised locally, before any request was
    /// sent to the server.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::RegistryLookup { .. }
                | Self::UnexpectedEndpoint { .. }
                | Self::ReadonlyField { .. }
                | Self::StaleEdit { .. }
                | Self::UnknownField { .. }
                | Self::KeyNotFound { .. }
                | Self::Configuration { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_errors_are_classified() {
        assert!(LxdError::KeyNotFound { key: "c1".into() }.is_local());
        assert!(LxdError::ReadonlyField {
            name: "status".into()
        }
        .is_local());
        assert!(!LxdError::transport("connection reset").is_local());
        assert!(!LxdError::RemoteOperation {
            status_code: Some(400),
            message: "boom".into()
        }
        .is_local());
    }

    #[test]
    fn serialization_error_keeps_its_source() {
        let json_err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err = LxdError::from(json_err);

        assert!(matches!(err, LxdError::Serialization { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn remote_error_displays_server_message() {
        let err = LxdError::RemoteOperation {
            status_code: Some(400),
            message: "boom".into(),
        };
        assert!(err.to_string().contains("boom"));
    }
}
