//! The operation engine.
//!
//! Every request to the server goes through [`OperationEngine::query`] or
//! [`OperationEngine::query_with_channels`], which hide whether the server
//! answered inline or spawned a background operation:
//!
//! 1. Issue the primary request.
//! 2. `sync` responses return their metadata after a single round trip.
//! 3. `async` responses yield an operation id; the caller's factory turns the
//!    async metadata into zero or more [`ChannelJob`]s.
//! 4. All channels are connected and exchanged while the `wait` sub-resource
//!    is polled.
//! 5. Once the wait poll resolves, still-open channels are told to close.
//! 6. All channel jobs are awaited before the engine returns; no channel
//!    outlives its operation.
//! 7. A completion `status_code` at or above the configured threshold fails
//!    the query with [`LxdError::RemoteOperation`].
//!
//! Channels and the poll are polled concurrently within the caller's task;
//! nothing is spawned, so no channel can outlive the call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use protocol::{
    AsyncMetadata, ChannelSecret, Envelope, LxdError, Method, OperationId, QueryId, RawRequest,
    ResponseType, Result, Transport,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::channel::ChannelJob;
use crate::config::EngineConfig;

/// Turns async metadata into the channel jobs to run for that operation.
pub type ChannelFactory<'a> = Box<dyn FnOnce(&AsyncMetadata) -> Result<Vec<ChannelJob>> + Send + 'a>;

/// Executes requests against one server, normalizing sync and async
/// responses.
pub struct OperationEngine {
    transport: Arc<dyn Transport>,
    config: EngineConfig,
}

impl OperationEngine {
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Runs one request and returns its final metadata. Background
    /// operations are awaited without opening any channel.
    pub async fn query(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        self.query_with_channels(method, url, body, Box::new(|_| Ok(Vec::new())))
            .await
    }

    /// Runs one request, opening the channels produced by `channels` if the
    /// server spawns a background operation.
    pub async fn query_with_channels(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        channels: ChannelFactory<'_>,
    ) -> Result<Value> {
        let query_id = QueryId::new_random();
        let span = info_span!("operation", %query_id, %method, url);
        async move {
            let response = self.transport.request(method, url, body).await?;
            let envelope = Envelope::from_value(response)?;
            match envelope.kind {
                Some(ResponseType::Sync) => {
                    debug!("sync response");
                    Ok(envelope.metadata)
                }
                Some(ResponseType::Error) => Err(remote_error(&envelope)),
                Some(ResponseType::Async) => {
                    let operation = AsyncMetadata::from_metadata(envelope.metadata)?;
                    info!(operation = %operation.id, "background operation started");
                    let jobs = channels(&operation)?;
                    self.complete(&operation.id, jobs).await
                }
                None => Err(LxdError::protocol("response without a 'type' discriminator")),
            }
        }
        .instrument(span)
        .await
    }

    /// Sends a raw request, bypassing the envelope.
    pub async fn request_raw(&self, request: RawRequest) -> Result<Vec<u8>> {
        debug!(method = %request.method, url = %request.url, "raw request");
        self.transport.request_raw(request).await
    }

    /// URL of the blocking `wait` sub-resource of an operation.
    pub fn wait_url(&self, id: &OperationId) -> String {
        format!("{}/operations/{}/wait", self.config.api_root, id)
    }

    /// URL of the websocket sub-resource of an operation for one secret.
    pub fn websocket_url(&self, id: &OperationId, secret: &ChannelSecret) -> String {
        format!(
            "{}/operations/{}/websocket?secret={}",
            self.config.api_root, id, secret
        )
    }

    // -----------------------------------------------------------------------
    // Background operations
    // -----------------------------------------------------------------------

    async fn complete(&self, id: &OperationId, jobs: Vec<ChannelJob>) -> Result<Value> {
        let (close_tx, close_rx) = watch::channel(false);
        let open = AtomicUsize::new(0);

        let channels = join_all(jobs.into_iter().map(|job| {
            let role = job.role();
            let closing = close_rx.clone();
            let open = &open;
            async move {
                let url = self.websocket_url(id, job.secret());
                let socket = self.transport.connect_websocket(&url).await?;
                open.fetch_add(1, Ordering::SeqCst);
                debug!("channel connected");
                job.run(socket, closing, open).await
            }
            .instrument(info_span!("channel", %role))
        }));

        let poll = async {
            let completion = self.wait(id).await;
            let still_open = open.load(Ordering::SeqCst);
            if still_open > 0 {
                debug!(still_open, "operation finished; closing remaining channels");
            }
            close_tx.send_replace(true);
            completion
        };

        let (completion, channel_results) = tokio::join!(poll, channels);
        debug_assert_eq!(open.load(Ordering::SeqCst), 0);

        let metadata = completion?;
        for result in channel_results {
            if let Err(err) = result {
                warn!(error = %err, "channel failed");
                return Err(err);
            }
        }
        self.check_completion(metadata)
    }

    async fn wait(&self, id: &OperationId) -> Result<Value> {
        let response = self
            .transport
            .request(Method::Get, &self.wait_url(id), None)
            .await?;
        let envelope = Envelope::from_value(response)?;
        if envelope.kind == Some(ResponseType::Error) {
            return Err(remote_error(&envelope));
        }
        Ok(envelope.metadata)
    }

    fn check_completion(&self, metadata: Value) -> Result<Value> {
        let status_code = metadata
            .get("status_code")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok());

        match status_code {
            Some(code) if self.config.is_failure(code) => {
                let message = metadata
                    .get("err")
                    .and_then(Value::as_str)
                    .filter(|err| !err.is_empty())
                    .or_else(|| metadata.get("status").and_then(Value::as_str))
                    .unwrap_or("operation failed")
                    .to_string();
                warn!(status_code = code, %message, "background operation failed");
                Err(LxdError::RemoteOperation {
                    status_code: Some(code),
                    message,
                })
            }
            _ => {
                info!(?status_code, "background operation completed");
                Ok(metadata)
            }
        }
    }
}

fn remote_error(envelope: &Envelope) -> LxdError {
    LxdError::RemoteOperation {
        status_code: envelope.error_code.or(envelope.status_code),
        message: envelope
            .error_message()
            .unwrap_or("unspecified server error")
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use futures::{stream, StreamExt};
    use protocol::ChannelRole;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::testing::{async_response, completed, failed, sync_response, MockTransport};

    fn engine(transport: &Arc<MockTransport>) -> OperationEngine {
        OperationEngine::new(transport.clone(), EngineConfig::default())
    }

    #[tokio::test]
    async fn sync_response_returns_metadata_after_one_request() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Get, "/1.0/thing", sync_response(json!({"k": "v"})));

        let metadata = engine(&transport)
            .query(Method::Get, "/1.0/thing", None)
            .await
            .unwrap();

        assert_eq!(metadata, json!({"k": "v"}));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn async_response_without_channels_polls_wait() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Post, "/1.0/instances", async_response("op1", json!({})));
        transport.on(
            Method::Get,
            "/1.0/operations/op1/wait",
            json!({"metadata": {"status_code": 200}}),
        );

        let metadata = engine(&transport)
            .query(Method::Post, "/1.0/instances", Some(&json!({"name": "c1"})))
            .await
            .unwrap();

        assert_eq!(metadata, json!({"status_code": 200}));
        assert_eq!(transport.count(Method::Get, "/1.0/operations/op1/wait"), 1);
    }

    #[tokio::test]
    async fn completion_failure_carries_server_message() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Put, "/1.0/instances/c1/state", async_response("op1", json!({})));
        transport.on(Method::Get, "/1.0/operations/op1/wait", failed(400, "boom"));

        let err = engine(&transport)
            .query(Method::Put, "/1.0/instances/c1/state", None)
            .await
            .unwrap_err();

        match err {
            LxdError::RemoteOperation {
                status_code,
                message,
            } => {
                assert_eq!(status_code, Some(400));
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn failure_threshold_is_configurable() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Post, "/1.0/x", async_response("op1", json!({})));
        transport.on(Method::Get, "/1.0/operations/op1/wait", completed(301));

        let legacy = OperationEngine::new(
            transport.clone(),
            EngineConfig {
                failure_status: 301,
                ..EngineConfig::default()
            },
        );
        assert!(legacy.query(Method::Post, "/1.0/x", None).await.is_err());
        assert!(engine(&transport).query(Method::Post, "/1.0/x", None).await.is_ok());
    }

    #[tokio::test]
    async fn error_envelope_is_a_remote_error() {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            Method::Get,
            "/1.0/missing",
            json!({"type": "error", "error": "not found", "error_code": 404}),
        );

        let err = engine(&transport)
            .query(Method::Get, "/1.0/missing", None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LxdError::RemoteOperation { status_code: Some(404), ref message } if message == "not found"
        ));
    }

    #[tokio::test]
    async fn malformed_envelopes_are_protocol_errors() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Get, "/1.0/untyped", json!({"metadata": {}}));
        transport.on(Method::Get, "/1.0/anonymous", json!({"type": "async", "metadata": {}}));

        let engine = engine(&transport);
        for url in ["/1.0/untyped", "/1.0/anonymous"] {
            let err = engine.query(Method::Get, url, None).await.unwrap_err();
            assert!(matches!(err, LxdError::Protocol { .. }), "{url}: {err}");
        }
    }

    #[tokio::test]
    async fn completion_force_closes_open_channels() {
        let transport = Arc::new(MockTransport::new());
        let fds = json!({"0": "s0", "1": "s1", "2": "s2", "control": "sc"});
        transport.on(
            Method::Post,
            "/1.0/instances/c1/exec",
            async_response("op1", json!({"fds": fds})),
        );
        let stdout_seen = Arc::new(Notify::new());
        transport.on_gated(
            Method::Get,
            "/1.0/operations/op1/wait",
            completed(200),
            stdout_seen.clone(),
        );

        let stdin = transport.socket("/1.0/operations/op1/websocket?secret=s0");
        let stdout = transport.socket("/1.0/operations/op1/websocket?secret=s1");
        let stderr = transport.socket("/1.0/operations/op1/websocket?secret=s2");
        let control = transport.socket("/1.0/operations/op1/websocket?secret=sc");
        stdout.push(b"hello".to_vec());

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = received.clone();
        let notify = stdout_seen.clone();
        let factory: ChannelFactory<'_> = Box::new(move |operation| {
            let secret = |role| operation.fds.get(role).cloned().unwrap();
            Ok(vec![
                // stdin never ends on its own
                ChannelJob::writer(
                    ChannelRole::Stdin,
                    secret(ChannelRole::Stdin),
                    stream::pending().boxed(),
                ),
                ChannelJob::reader(
                    ChannelRole::Stdout,
                    secret(ChannelRole::Stdout),
                    Box::new(move |data| {
                        sink.lock().unwrap().extend(data);
                        notify.notify_one();
                    }),
                ),
                ChannelJob::reader(
                    ChannelRole::Stderr,
                    secret(ChannelRole::Stderr),
                    Box::new(|_| {}),
                ),
                ChannelJob::control(secret(ChannelRole::Control)),
            ])
        });

        let metadata = engine(&transport)
            .query_with_channels(Method::Post, "/1.0/instances/c1/exec", None, factory)
            .await
            .unwrap();

        assert_eq!(metadata["status_code"], 200);
        assert_eq!(received.lock().unwrap().as_slice(), b"hello");
        for socket in [&stdin, &stdout, &stderr, &control] {
            assert!(socket.is_closed());
        }
    }

    #[test]
    fn channel_queries_are_send() {
        fn assert_send<T: Send>(_: &T) {}

        let transport = Arc::new(MockTransport::new());
        let engine = engine(&transport);
        let factory: ChannelFactory<'_> = Box::new(|_| Ok(Vec::new()));
        let future = engine.query_with_channels(Method::Get, "/1.0", None, factory);

        assert_send(&future);
    }

    #[tokio::test]
    async fn output_queued_before_completion_is_delivered() {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            Method::Post,
            "/1.0/x",
            async_response("op1", json!({"fds": {"1": "s1"}})),
        );
        // Answered at once: completion is signalled before the reader runs.
        transport.on(Method::Get, "/1.0/operations/op1/wait", completed(200));
        let stdout = transport.socket("/1.0/operations/op1/websocket?secret=s1");
        stdout.push(b"hel".to_vec());
        stdout.push(b"lo".to_vec());
        stdout.close_from_peer();

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = received.clone();
        let factory: ChannelFactory<'_> = Box::new(move |operation| {
            Ok(vec![ChannelJob::reader(
                ChannelRole::Stdout,
                operation.fds.get(ChannelRole::Stdout).cloned().unwrap(),
                Box::new(move |data| sink.lock().unwrap().extend(data)),
            )])
        });
        engine(&transport)
            .query_with_channels(Method::Post, "/1.0/x", None, factory)
            .await
            .unwrap();

        assert_eq!(received.lock().unwrap().as_slice(), b"hello");
        assert!(stdout.is_closed());
    }

    #[tokio::test]
    async fn writer_sends_input_then_closes_normally() {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            Method::Post,
            "/1.0/x",
            async_response("op1", json!({"fds": {"0": "s0"}})),
        );
        transport.on(Method::Get, "/1.0/operations/op1/wait", completed(200));
        let stdin = transport.socket("/1.0/operations/op1/websocket?secret=s0");

        let input = stream::iter(vec![b"a".to_vec(), b"b".to_vec()]).boxed();

        let factory: ChannelFactory<'_> = Box::new(move |operation| {
            let secret = operation.fds.get(ChannelRole::Stdin).cloned().unwrap();
            Ok(vec![ChannelJob::writer(ChannelRole::Stdin, secret, input)])
        });
        engine(&transport)
            .query_with_channels(Method::Post, "/1.0/x", None, factory)
            .await
            .unwrap();

        assert!(stdin.is_closed());
        // The wait poll resolves immediately, so the writer may be closed
        // before draining its input; whatever was sent arrives in order.
        let sent = stdin.sent();
        let expected = [b"a".to_vec(), b"b".to_vec()];
        assert_eq!(sent.as_slice(), &expected[..sent.len()]);
    }

    #[tokio::test]
    async fn channel_errors_propagate_after_all_channels_end() {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            Method::Post,
            "/1.0/x",
            async_response("op1", json!({"fds": {"1": "s1", "2": "s2"}})),
        );
        transport.on(Method::Get, "/1.0/operations/op1/wait", completed(200));
        // Only stdout has a socket; connecting stderr fails.
        let stdout = transport.socket("/1.0/operations/op1/websocket?secret=s1");

        let factory: ChannelFactory<'_> = Box::new(|operation| {
            Ok(vec![
                ChannelJob::reader(
                    ChannelRole::Stdout,
                    operation.fds.get(ChannelRole::Stdout).cloned().unwrap(),
                    Box::new(|_| {}),
                ),
                ChannelJob::reader(
                    ChannelRole::Stderr,
                    operation.fds.get(ChannelRole::Stderr).cloned().unwrap(),
                    Box::new(|_| {}),
                ),
            ])
        });
        let err = engine(&transport)
            .query_with_channels(Method::Post, "/1.0/x", None, factory)
            .await
            .unwrap_err();

        assert!(matches!(err, LxdError::Transport { .. }));
        assert!(stdout.is_closed());
    }
}
