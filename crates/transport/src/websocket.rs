//! Operation websockets over tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use protocol::{ChannelSocket, LxdError, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::trace;
use url::Url;

/// Joins an `http(s)` origin and a request path into the matching `ws(s)` URL.
pub(crate) fn websocket_url(origin: &str, url: &str) -> Result<Url> {
    let mut target = Url::parse(&format!("{origin}{url}"))
        .map_err(|err| LxdError::transport(format!("invalid websocket url '{url}': {err}")))?;
    let scheme = match target.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(LxdError::Configuration {
                message: format!("no websocket scheme for '{other}'"),
            })
        }
    };
    target.set_scheme(scheme).map_err(|()| LxdError::Configuration {
        message: format!("cannot switch '{origin}' to {scheme}"),
    })?;
    Ok(target)
}

/// A connected operation or event websocket.
pub struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketChannel {
    pub(crate) fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl ChannelSocket for WebSocketChannel {
    async fn send(&mut self, data: Vec<u8>) -> Result<()> {
        self.stream
            .send(Message::Binary(data))
            .await
            .map_err(|err| LxdError::transport(format!("websocket send failed: {err}")))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Binary(data)) => return Ok(Some(data)),
                Ok(Message::Text(text)) => return Ok(Some(text.into_bytes())),
                Ok(Message::Close(frame)) => {
                    trace!(?frame, "peer closed websocket");
                    return Ok(None);
                }
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(None),
                Err(err) => {
                    return Err(LxdError::transport(format!("websocket receive failed: {err}")))
                }
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(LxdError::transport(format!("websocket close failed: {err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_is_rewritten() {
        assert_eq!(
            websocket_url("https://lxd:8443", "/1.0/events?type=logging")
                .unwrap()
                .as_str(),
            "wss://lxd:8443/1.0/events?type=logging"
        );
        assert_eq!(
            websocket_url("http://127.0.0.1:8080", "/1.0/operations/op1/websocket?secret=s")
                .unwrap()
                .as_str(),
            "ws://127.0.0.1:8080/1.0/operations/op1/websocket?secret=s"
        );
    }

    #[test]
    fn unknown_scheme_has_no_websocket() {
        assert!(matches!(
            websocket_url("ftp://lxd", "/1.0/events"),
            Err(LxdError::Configuration { .. })
        ));
    }
}
