//! [`HttpTransport`]: the production [`Transport`].

use async_trait::async_trait;
use native_tls::TlsConnector;
use protocol::{ChannelSocket, Envelope, LxdError, Method, RawRequest, Result, ResponseType, Transport};
use reqwest::StatusCode;
use serde_json::Value;
use tokio_tungstenite::Connector;
use tracing::debug;

use crate::config::TransportConfig;
use crate::tls;
use crate::websocket::{websocket_url, WebSocketChannel};

/// Requests over reqwest, websockets over tokio-tungstenite, one TLS
/// connector for both.
#[derive(Clone)]
pub struct HttpTransport {
    origin: String,
    client: reqwest::Client,
    tls: TlsConnector,
}

impl HttpTransport {
    /// Loads TLS material and builds the HTTP client. No connection is made.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let origin = config.origin()?;
        let tls = tls::connector(config)?;
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls.clone())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|err| LxdError::Configuration {
                message: format!("cannot build HTTP client: {err}"),
            })?;
        debug!(%origin, "transport ready");
        Ok(Self {
            origin,
            client,
            tls,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn builder(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(reqwest_method(method), format!("{}{}", self.origin, url))
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("origin", &self.origin)
            .finish()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        let mut builder = self.builder(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| LxdError::transport(format!("{method} {url}: {err}")))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| LxdError::transport(format!("{method} {url}: {err}")))?;
        debug!(%method, url, status = status.as_u16(), bytes = bytes.len(), "response");
        decode(status, &bytes)
    }

    async fn request_raw(&self, request: RawRequest) -> Result<Vec<u8>> {
        let RawRequest {
            method,
            url,
            headers,
            body,
        } = request;
        let mut builder = self.builder(method, &url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| LxdError::transport(format!("{method} {url}: {err}")))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| LxdError::transport(format!("{method} {url}: {err}")))?;
        debug!(%method, %url, status = status.as_u16(), bytes = bytes.len(), "raw response");
        if status.is_success() {
            return Ok(bytes.to_vec());
        }
        Err(raw_failure(status, &bytes))
    }

    async fn connect_websocket(&self, url: &str) -> Result<Box<dyn ChannelSocket>> {
        let target = websocket_url(&self.origin, url)?;
        let (stream, _) = tokio_tungstenite::connect_async_tls_with_config(
            target.as_str(),
            None,
            false,
            Some(Connector::NativeTls(self.tls.clone())),
        )
        .await
        .map_err(|err| LxdError::transport(format!("websocket {url}: {err}")))?;
        debug!(url, "websocket connected");
        Ok(Box::new(WebSocketChannel::new(stream)))
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Post => reqwest::Method::POST,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Decodes an envelope response. Error envelopes are returned as values on
/// any status so the engine can report the server's message; any other
/// non-2xx response is a transport failure.
fn decode(status: StatusCode, body: &[u8]) -> Result<Value> {
    let parsed = serde_json::from_slice::<Value>(body);
    if status.is_success() {
        return parsed.map_err(|err| LxdError::protocol(format!("response is not JSON: {err}")));
    }
    match parsed {
        Ok(value) if is_error_envelope(&value) => Ok(value),
        _ => Err(LxdError::transport(format!("HTTP {status}"))),
    }
}

fn is_error_envelope(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("error")
}

/// Maps a failed raw request, preferring the server's error envelope.
fn raw_failure(status: StatusCode, body: &[u8]) -> LxdError {
    let envelope = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| Envelope::from_value(value).ok())
        .filter(|envelope| envelope.kind == Some(ResponseType::Error));
    match envelope {
        Some(envelope) => LxdError::RemoteOperation {
            status_code: envelope.error_code.or(Some(status.as_u16())),
            message: envelope
                .error_message()
                .unwrap_or("unspecified server error")
                .to_string(),
        },
        None => LxdError::transport(format!("HTTP {status}")),
    }
}
