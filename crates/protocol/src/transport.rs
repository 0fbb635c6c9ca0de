//! Port traits implemented by infrastructure crates.
//!
//! The operation engine only ever talks to the server through [`Transport`]
//! and the [`ChannelSocket`]s it hands out. The `transport` crate implements
//! both over HTTPS; the engine's test support implements them in memory.

use async_trait::async_trait;
use serde_json::Value;

use crate::{Method, RawRequest, Result};

/// Primitive request and websocket operations against one LXD server.
///
/// URLs are relative to the server base URL (e.g. `/1.0/instances`).
/// Implementations own timeouts and TLS; the engine adds neither.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a JSON request and returns the decoded response body.
    ///
    /// A non-success HTTP status whose body is an LXD `error` envelope must be
    /// returned as `Ok` so the engine can surface the server's message; any
    /// other non-success status is a [`crate::LxdError::Transport`].
    async fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value>;

    /// Sends a request whose body and response are raw bytes.
    async fn request_raw(&self, request: RawRequest) -> Result<Vec<u8>>;

    /// Opens a websocket to `url`.
    async fn connect_websocket(&self, url: &str) -> Result<Box<dyn ChannelSocket>>;
}

/// A connected, bidirectional byte-message stream.
#[async_trait]
pub trait ChannelSocket: Send {
    /// Sends one binary message.
    async fn send(&mut self, data: Vec<u8>) -> Result<()>;

    /// Receives the next data message. Text messages are returned as their
    /// UTF-8 bytes. Returns `None` once the peer has closed the socket.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    /// Closes the socket. Closing an already-closed socket is not an error.
    async fn close(&mut self) -> Result<()>;
}
