//! Core protocol domain for the LXD client.
//!
//! This crate contains the wire envelope types, newtype identifiers, the
//! shared error taxonomy, and the port traits through which every other crate
//! reaches the server. Infrastructure crates implement the traits defined
//! here; they never add protocol rules.
//!
//! ## Architectural Layer
//!
//! **Domain + port definitions.** This crate has no I/O dependencies.
//! It defines *what* a transport must do; the `transport` crate defines *how*.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`OperationId`, `ChannelSecret`, `QueryId`) |
//! | [`types`] | Envelope, async metadata, channel roles, operation records |
//! | [`errors`] | The [`LxdError`] taxonomy |
//! | [`transport`] | [`Transport`] and [`ChannelSocket`] port traits |

pub mod errors;
pub mod identifiers;
pub mod transport;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{LxdError, Result};
pub use identifiers::{leaf_key, ChannelSecret, OperationId, QueryId};
pub use transport::{ChannelSocket, Transport};
pub use types::{
    ApiVersion, AsyncMetadata, ChannelRole, ChannelSecrets, Envelope, Method, OperationRecord,
    RawRequest, ResponseType, Timestamp,
};
