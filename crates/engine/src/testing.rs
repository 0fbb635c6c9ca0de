//! In-memory [`Transport`] for tests.
//!
//! Responses are scripted per `(method, url)` and served in order. The last
//! response scripted for a route keeps answering until another one is
//! scripted, so repeated loads of a stable resource need a single `on` call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use protocol::{ChannelSocket, LxdError, Method, RawRequest, Result, Transport};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Envelope builders
// ---------------------------------------------------------------------------

/// A `sync` envelope around `metadata`.
pub fn sync_response(metadata: Value) -> Value {
    json!({"type": "sync", "status_code": 200, "metadata": metadata})
}

/// An `async` envelope for operation `id`; `extra` is merged into its metadata.
pub fn async_response(id: &str, extra: Value) -> Value {
    let mut metadata = json!({"id": id, "class": "task"});
    if let (Some(target), Some(extra)) = (metadata.as_object_mut(), extra.as_object()) {
        target.extend(extra.clone());
    }
    json!({"type": "async", "status_code": 100, "metadata": metadata})
}

/// A `wait` response for an operation that finished with `status_code`.
pub fn completed(status_code: u16) -> Value {
    sync_response(json!({"status_code": status_code, "err": ""}))
}

/// A `wait` response for an operation that failed with `err`.
pub fn failed(status_code: u16, err: &str) -> Value {
    sync_response(json!({"status_code": status_code, "err": err}))
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct Route {
    response: Scripted,
    served: bool,
}

#[derive(Clone)]
enum Scripted {
    Json(Value),
    Gated(Value, Arc<Notify>),
    Raw(Vec<u8>),
    Fail(String),
}

/// A request observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub raw_body: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Route>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    sockets: Mutex<HashMap<String, MockSocket>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a JSON response for `method url`.
    pub fn on(&self, method: Method, url: &str, response: Value) {
        self.push(method, url, Scripted::Json(response));
    }

    /// Scripts a JSON response that is only returned once `gate` is notified.
    pub fn on_gated(&self, method: Method, url: &str, response: Value, gate: Arc<Notify>) {
        self.push(method, url, Scripted::Gated(response, gate));
    }

    /// Scripts a raw byte response for `method url`.
    pub fn on_raw(&self, method: Method, url: &str, body: Vec<u8>) {
        self.push(method, url, Scripted::Raw(body));
    }

    /// Scripts a transport failure for `method url`.
    pub fn fail(&self, method: Method, url: &str, message: &str) {
        self.push(method, url, Scripted::Fail(message.to_string()));
    }

    /// Registers a websocket for `url` and returns the test's end of it.
    pub fn socket(&self, url: &str) -> SocketHandle {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let state = Arc::new(SocketState::default());
        lock(&self.sockets).insert(
            url.to_string(),
            MockSocket {
                incoming: incoming_rx,
                state: state.clone(),
            },
        );
        SocketHandle {
            incoming: incoming_tx,
            state,
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Number of requests received for `method url`.
    pub fn count(&self, method: Method, url: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|request| request.method == method && request.url == url)
            .count()
    }

    fn push(&self, method: Method, url: &str, response: Scripted) {
        lock(&self.routes)
            .entry((method, url.to_string()))
            .or_default()
            .push_back(Route {
                response,
                served: false,
            });
    }

    fn next(&self, method: Method, url: &str) -> Result<Scripted> {
        let missing = || LxdError::transport(format!("no response scripted for {method} {url}"));
        let mut routes = lock(&self.routes);
        let queue = routes.get_mut(&(method, url.to_string())).ok_or_else(missing)?;
        // A served sticky response gives way to anything scripted after it.
        while queue.len() > 1 && queue.front().is_some_and(|route| route.served) {
            queue.pop_front();
        }
        if queue.len() > 1 {
            return queue.pop_front().map(|route| route.response).ok_or_else(missing);
        }
        let route = queue.front_mut().ok_or_else(missing)?;
        route.served = true;
        Ok(route.response.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        lock(&self.requests).push(RecordedRequest {
            method,
            url: url.to_string(),
            body: body.cloned(),
            raw_body: None,
            headers: Vec::new(),
        });
        match self.next(method, url)? {
            Scripted::Json(value) => Ok(value),
            Scripted::Gated(value, gate) => {
                gate.notified().await;
                Ok(value)
            }
            Scripted::Raw(_) => Err(LxdError::protocol(format!("{method} {url} is a raw route"))),
            Scripted::Fail(message) => Err(LxdError::transport(message)),
        }
    }

    async fn request_raw(&self, request: RawRequest) -> Result<Vec<u8>> {
        let scripted = self.next(request.method, &request.url);
        lock(&self.requests).push(RecordedRequest {
            method: request.method,
            url: request.url,
            body: None,
            raw_body: request.body,
            headers: request.headers,
        });
        match scripted? {
            Scripted::Raw(bytes) => Ok(bytes),
            Scripted::Json(value) | Scripted::Gated(value, _) => Ok(value.to_string().into_bytes()),
            Scripted::Fail(message) => Err(LxdError::transport(message)),
        }
    }

    async fn connect_websocket(&self, url: &str) -> Result<Box<dyn ChannelSocket>> {
        let socket = lock(&self.sockets)
            .remove(url)
            .ok_or_else(|| LxdError::transport(format!("no websocket at {url}")))?;
        Ok(Box::new(socket))
    }
}

// ---------------------------------------------------------------------------
// Sockets
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SocketState {
    sent: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

struct MockSocket {
    incoming: mpsc::UnboundedReceiver<Option<Vec<u8>>>,
    state: Arc<SocketState>,
}

#[async_trait]
impl ChannelSocket for MockSocket {
    async fn send(&mut self, data: Vec<u8>) -> Result<()> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(LxdError::transport("send on closed socket"));
        }
        lock(&self.state.sent).push(data);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        // A dropped handle or an explicit peer close both end the stream.
        Ok(self.incoming.recv().await.flatten())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The test's end of a scripted websocket. While the handle is alive and no
/// peer close was sent, the socket stays open.
pub struct SocketHandle {
    incoming: mpsc::UnboundedSender<Option<Vec<u8>>>,
    state: Arc<SocketState>,
}

impl SocketHandle {
    /// Queues a message for the client to receive.
    pub fn push(&self, data: Vec<u8>) {
        let _ = self.incoming.send(Some(data));
    }

    /// Closes the socket from the server side.
    pub fn close_from_peer(&self) {
        let _ = self.incoming.send(None);
    }

    /// Messages the client sent, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.state.sent).clone()
    }

    /// Whether the client closed its end.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}
