//! Operation engine, endpoint registry, and the object/collection model.
//!
//! This crate turns the raw request/websocket primitives of a
//! [`protocol::Transport`] into typed, cached endpoint handles.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The engine sequences transport calls; resource
//! wrappers in the `endpoints` crate add LXD-specific payloads on top. No
//! concrete transport is referenced here.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`operation`] | [`OperationEngine`]: sync/async normalization and channel coordination |
//! | [`channel`] | [`ChannelJob`]: reader, writer and control websocket exchanges |
//! | [`registry`] | [`Registry`]: URL-to-endpoint cache with ordered pattern dispatch |
//! | [`endpoint`] | [`Endpoint`] variants, [`EndpointClass`], the [`Loadable`] capability |
//! | [`object`] | [`Object`] and its [`Edit`] scope |
//! | [`collection`] | [`Collection`] membership, dereference, create/delete, iteration |
//! | [`config`] | [`EngineConfig`] |
//! | `testing` | In-memory transport (feature `testing`) |

pub mod channel;
pub mod collection;
pub mod config;
pub mod endpoint;
pub mod object;
pub mod operation;
pub mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channel::{ChannelJob, ChannelKind, InputStream, OutputHandler};
pub use collection::Collection;
pub use config::EngineConfig;
pub use endpoint::{Endpoint, EndpointClass, Loadable, Variant};
pub use object::{Edit, Object};
pub use operation::{ChannelFactory, OperationEngine};
pub use registry::Registry;
