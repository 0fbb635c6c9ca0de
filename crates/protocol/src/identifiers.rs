//! Newtype identifiers.
//!
//! Server-issued strings that must never be interchanged (an operation id is
//! not a websocket secret) get their own newtype. URLs stay plain strings: they
//! flow through the registry as map keys and are compared verbatim.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: server-issued
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a background operation on the server.
    ///
    /// Taken from the `id` field of an async response; used to build the
    /// `wait` and `websocket` sub-resource URLs.
    OperationId
}

string_id! {
    /// One-time secret authorising a single websocket connection to a
    /// background operation.
    ChannelSecret
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one logical request issued through the operation engine.
///
/// Generated fresh for every query and attached to its tracing span so the
/// primary request, the wait poll, and all channel activity can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(Uuid);

impl QueryId {
    /// Generates a new random query identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// Returns the final path segment of `url`, ignoring any query string.
///
/// Collections are keyed by this value: `/1.0/instances/web1` has key `web1`.
pub fn leaf_key(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ids_are_rejected() {
        assert!(OperationId::new("").is_none());
        assert_eq!(OperationId::new("op1").unwrap().as_str(), "op1");
    }

    #[test]
    fn leaf_key_ignores_query_and_trailing_slash() {
        assert_eq!(leaf_key("/1.0/instances/web1"), "web1");
        assert_eq!(leaf_key("/1.0/instances/web1/"), "web1");
        assert_eq!(leaf_key("/1.0/storage-pools/default?project=p"), "default");
        assert_eq!(leaf_key("web1"), "web1");
    }
}
