//! Typed LXD resources on top of the engine's object/collection model.
//!
//! [`Client`] is the entry point: it owns the endpoint registry, built with
//! the default pattern table, and hands out typed wrappers that share it.
//!
//! ## Architectural Layer
//!
//! **Resource layer.** Wrappers add LXD payload shapes and sub-resource
//! operations (state changes, exec, file transfer) to the generic endpoints
//! of the `engine` crate. They never talk to a concrete transport.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`client`] | [`Client`], [`default_classes`] |
//! | [`api`] | [`Api`]: the server root |
//! | [`certificates`] | [`Certificates`], [`Certificate`], [`CertificateAdd`] |
//! | [`instances`] | [`Instances`], [`Instance`], creation bodies, state actions |
//! | [`exec`] | [`ExecRequest`], [`ExecStreams`], [`ExecOutput`] |
//! | [`file`] | [`InstanceFile`], [`FileOptions`] |
//! | [`storage_pools`] | [`StoragePools`], [`StoragePool`] |
//! | [`projects`] | [`Projects`], [`Project`] |
//! | [`events`] | [`EventLog`]: server log forwarding |

mod wrapper;

pub mod api;
pub mod certificates;
pub mod client;
pub mod events;
pub mod exec;
pub mod file;
pub mod instances;
pub mod projects;
pub mod storage_pools;

pub use api::{Api, ServerEnvironment};
pub use certificates::{Certificate, CertificateAdd, Certificates};
pub use client::{classes, default_classes, Client};
pub use events::{EventLog, LogRecord, ServerLevel};
pub use exec::{ExecOutput, ExecRequest, ExecStreams};
pub use file::{FileOptions, InstanceFile};
pub use instances::{Instance, InstanceCreate, InstanceSource, Instances, StateAction};
pub use projects::{Project, ProjectCreate, Projects};
pub use storage_pools::{StoragePool, StoragePoolCreate, StoragePools};
