//! LXD transport adapter.
//!
//! Implements [`protocol::Transport`] over HTTPS: JSON envelope requests and
//! raw file transfers go through `reqwest`, operation and event websockets
//! through `tokio-tungstenite`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** URL joining, TLS material loading, status mapping and
//! websocket framing all live here. The `engine` crate sees only
//! [`protocol::Transport`] and [`protocol::ChannelSocket`].
//!
//! ## TLS
//!
//! Requests and websockets share one `native-tls` connector, so the client
//! certificate authenticates both. Generating certificates or adding them
//! to the server's trust store happens elsewhere.

pub mod config;
pub mod http;
pub mod websocket;

mod tls;

pub use config::TransportConfig;
pub use http::HttpTransport;
pub use websocket::WebSocketChannel;
