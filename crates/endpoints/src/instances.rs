//! Instances (containers and virtual machines).

use std::collections::BTreeMap;

use protocol::{leaf_key, Method, Result};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::classes;
use crate::exec::{ExecOutput, ExecRequest, ExecStreams};
use crate::file::InstanceFile;
use crate::wrapper::{collection_wrapper, object_wrapper};

collection_wrapper! {
    /// The instance listing, under either `instances` or the legacy `containers`.
    Instances, classes = [classes::INSTANCES], child = Instance
}

object_wrapper! {
    /// One instance.
    Instance, classes = [classes::INSTANCE]
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Where a new instance's root filesystem comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceSource {
    /// `image`, `none`, `copy` or `migration`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Remote image server URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Remote image server protocol, `lxd` or `simplestreams`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// PEM certificate of the remote image server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

impl InstanceSource {
    /// An image resolved by alias on the local server.
    pub fn image_alias(alias: impl Into<String>) -> Self {
        Self {
            kind: "image".to_string(),
            alias: Some(alias.into()),
            ..Self::default()
        }
    }

    /// An image resolved by fingerprint on the local server.
    pub fn image_fingerprint(fingerprint: impl Into<String>) -> Self {
        Self {
            kind: "image".to_string(),
            fingerprint: Some(fingerprint.into()),
            ..Self::default()
        }
    }

    /// An image pulled from a remote server.
    pub fn remote_image(
        server: impl Into<String>,
        protocol: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            kind: "image".to_string(),
            mode: Some("pull".to_string()),
            server: Some(server.into()),
            protocol: Some(protocol.into()),
            alias: Some(alias.into()),
            ..Self::default()
        }
    }

    /// An empty root filesystem.
    pub fn none() -> Self {
        Self {
            kind: "none".to_string(),
            ..Self::default()
        }
    }
}

/// Body of an instance creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceCreate {
    pub name: String,
    pub source: InstanceSource,
    /// `container` or `virtual-machine`; the server default when absent.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub devices: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ephemeral: bool,
}

impl InstanceCreate {
    pub fn new(name: impl Into<String>, source: InstanceSource) -> Self {
        Self {
            name: name.into(),
            source,
            kind: None,
            profiles: Vec::new(),
            config: BTreeMap::new(),
            devices: BTreeMap::new(),
            ephemeral: false,
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.push(profile.into());
        self
    }

    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

impl Instances {
    /// Creates an instance and returns it once the server reports it listed.
    pub async fn create(&self, request: &InstanceCreate) -> Result<Instance> {
        let body = serde_json::to_value(request)?;
        let instance = self.create_child(&body, &request.name).await?;
        info!(name = %request.name, "instance created");
        Ok(instance)
    }
}

// ---------------------------------------------------------------------------
// Instance operations
// ---------------------------------------------------------------------------

/// A state transition accepted by `<instance>/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateAction {
    Start,
    Stop,
    Restart,
    Freeze,
    Unfreeze,
}

impl StateAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Freeze => "freeze",
            Self::Unfreeze => "unfreeze",
        }
    }
}

impl std::fmt::Display for StateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Instance {
    /// The instance name, taken from its URL.
    pub fn name(&self) -> &str {
        leaf_key(self.url())
    }

    /// Server-reported status, e.g. `Running` or `Stopped`.
    pub fn status(&self) -> Result<String> {
        self.object.get_as("status")
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status().as_deref(), Ok("Running"))
    }

    pub async fn start(&self) -> Result<()> {
        self.change_state(StateAction::Start, false).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.change_state(StateAction::Stop, false).await
    }

    /// Requests a state transition, waits for it to complete, then reloads.
    pub async fn change_state(&self, action: StateAction, force: bool) -> Result<()> {
        let url = format!("{}/state", self.url());
        let mut body = json!({"action": action.as_str()});
        if force {
            body["force"] = Value::Bool(true);
        }
        debug!(instance = %self.name(), %action, "changing state");
        self.registry.query(Method::Put, &url, Some(&body)).await?;
        self.object.load().await
    }

    /// Runs a command in the instance.
    ///
    /// With empty `streams` the command runs detached from any channel and
    /// only its return code is collected.
    pub async fn exec(&self, request: &ExecRequest, streams: ExecStreams) -> Result<ExecOutput> {
        let url = format!("{}/exec", self.url());
        let body = request.body(!streams.is_empty())?;
        debug!(instance = %self.name(), command = ?request.command, "exec");
        let completion = self
            .registry
            .query_with_channels(Method::Post, &url, Some(&body), streams.into_channels())
            .await?;
        ExecOutput::from_completion(&completion)
    }

    /// A handle to `path` inside the instance. Nothing is sent until the
    /// handle is read or written.
    pub fn file(&self, path: &str) -> InstanceFile {
        InstanceFile::new(self.registry.clone(), self.url(), path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use engine::testing::{async_response, completed, failed, sync_response, MockTransport};
    use engine::EngineConfig;
    use futures::{stream, StreamExt};
    use protocol::LxdError;
    use tokio::sync::Notify;

    use super::*;
    use crate::file::FileOptions;
    use crate::Client;

    fn transport() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            Method::Get,
            "/1.0/instances",
            sync_response(json!(["/1.0/instances/c1"])),
        );
        transport.on(
            Method::Get,
            "/1.0/instances/c1",
            sync_response(json!({"name": "c1", "status": "Stopped", "config": {}})),
        );
        transport
    }

    async fn instance(transport: &Arc<MockTransport>) -> Instance {
        let client = Client::new(transport.clone(), EngineConfig::default()).unwrap();
        client.instances().await.unwrap().get("c1").await.unwrap()
    }

    #[tokio::test]
    async fn create_posts_source_and_returns_instance() {
        let transport = transport();
        let client = Client::new(transport.clone(), EngineConfig::default()).unwrap();
        let instances = client.instances().await.unwrap();
        transport.on(Method::Post, "/1.0/instances", async_response("op1", json!({})));
        transport.on(Method::Get, "/1.0/operations/op1/wait", completed(200));
        transport.on(
            Method::Get,
            "/1.0/instances",
            sync_response(json!(["/1.0/instances/c1", "/1.0/instances/c2"])),
        );
        transport.on(
            Method::Get,
            "/1.0/instances/c2",
            sync_response(json!({"name": "c2", "status": "Stopped"})),
        );

        let request = InstanceCreate::new("c2", InstanceSource::image_alias("ubuntu/24.04"))
            .profile("default");
        let created = instances.create(&request).await.unwrap();

        assert_eq!(created.name(), "c2");
        assert_eq!(instances.keys(), vec!["c1", "c2"]);
        let post = transport
            .requests()
            .into_iter()
            .find(|request| request.method == Method::Post)
            .unwrap();
        assert_eq!(
            post.body.unwrap(),
            json!({
                "name": "c2",
                "source": {"type": "image", "alias": "ubuntu/24.04"},
                "profiles": ["default"]
            })
        );
    }

    #[tokio::test]
    async fn start_waits_then_reloads() {
        let transport = transport();
        let instance = instance(&transport).await;
        transport.on(
            Method::Put,
            "/1.0/instances/c1/state",
            async_response("op1", json!({})),
        );
        transport.on(Method::Get, "/1.0/operations/op1/wait", completed(200));
        transport.on(
            Method::Get,
            "/1.0/instances/c1",
            sync_response(json!({"name": "c1", "status": "Running"})),
        );

        instance.start().await.unwrap();

        assert!(instance.is_running());
        let put = transport
            .requests()
            .into_iter()
            .find(|request| request.method == Method::Put)
            .unwrap();
        assert_eq!(put.body.unwrap(), json!({"action": "start"}));
    }

    #[tokio::test]
    async fn failed_stop_leaves_status_unchanged() {
        let transport = transport();
        let instance = instance(&transport).await;
        transport.on(
            Method::Put,
            "/1.0/instances/c1/state",
            async_response("op1", json!({})),
        );
        transport.on(
            Method::Get,
            "/1.0/operations/op1/wait",
            failed(400, "instance is not running"),
        );

        let err = instance.stop().await.unwrap_err();

        assert!(matches!(err, LxdError::RemoteOperation { .. }));
        assert_eq!(instance.status().unwrap(), "Stopped");
        assert_eq!(transport.count(Method::Get, "/1.0/instances/c1"), 1);
    }

    #[tokio::test]
    async fn status_is_readonly() {
        let transport = transport();
        let instance = instance(&transport).await;

        let err = instance
            .object()
            .edit(|edit| edit.set("status", "Running"))
            .await
            .unwrap_err();

        assert!(matches!(err, LxdError::ReadonlyField { ref name } if name == "status"));
    }

    #[tokio::test]
    async fn exec_with_streams_wires_all_channels() {
        let transport = transport();
        let instance = instance(&transport).await;
        let fds = json!({"0": "s0", "1": "s1", "2": "s2", "control": "sc"});
        transport.on(
            Method::Post,
            "/1.0/instances/c1/exec",
            async_response("op1", json!({"metadata": {"fds": fds}})),
        );
        let output_seen = Arc::new(Notify::new());
        transport.on_gated(
            Method::Get,
            "/1.0/operations/op1/wait",
            sync_response(json!({"status_code": 200, "metadata": {"return": 3}})),
            output_seen.clone(),
        );
        let stdin = transport.socket("/1.0/operations/op1/websocket?secret=s0");
        let stdout = transport.socket("/1.0/operations/op1/websocket?secret=s1");
        let stderr = transport.socket("/1.0/operations/op1/websocket?secret=s2");
        let control = transport.socket("/1.0/operations/op1/websocket?secret=sc");
        stdout.push(b"out".to_vec());

        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let streams = ExecStreams::new()
            .stdin(stream::iter(vec![b"in".to_vec()]).boxed())
            .stdout(move |data| {
                sink.lock().unwrap().extend(data);
                output_seen.notify_one();
            });

        let output = instance
            .exec(&ExecRequest::new(["cat"]), streams)
            .await
            .unwrap();

        assert_eq!(output.return_code, Some(3));
        assert_eq!(captured.lock().unwrap().as_slice(), b"out");
        assert_eq!(stdin.sent(), vec![b"in".to_vec()]);
        for socket in [&stdin, &stdout, &stderr, &control] {
            assert!(socket.is_closed());
        }
        let post = transport
            .requests()
            .into_iter()
            .find(|request| request.method == Method::Post)
            .unwrap();
        assert_eq!(post.body.unwrap()["wait-for-websocket"], true);
    }

    #[tokio::test]
    async fn exec_without_streams_opens_no_channels() {
        let transport = transport();
        let instance = instance(&transport).await;
        transport.on(
            Method::Post,
            "/1.0/instances/c1/exec",
            async_response("op1", json!({})),
        );
        transport.on(
            Method::Get,
            "/1.0/operations/op1/wait",
            sync_response(json!({"status_code": 200, "metadata": {"return": 0}})),
        );

        let output = instance
            .exec(&ExecRequest::new(["true"]), ExecStreams::new())
            .await
            .unwrap();

        assert!(output.success());
        let post = transport
            .requests()
            .into_iter()
            .find(|request| request.method == Method::Post)
            .unwrap();
        assert_eq!(post.body.unwrap()["wait-for-websocket"], false);
    }

    #[tokio::test]
    async fn files_use_raw_requests() {
        let transport = transport();
        let instance = instance(&transport).await;
        transport.on_raw(
            Method::Get,
            "/1.0/instances/c1/files?path=%2Fetc%2Fhostname",
            b"c1\n".to_vec(),
        );
        transport.on_raw(
            Method::Post,
            "/1.0/instances/c1/files?path=%2Fetc%2Fhostname",
            Vec::new(),
        );
        let file = instance.file("/etc/hostname");

        assert_eq!(file.read().await.unwrap(), b"c1\n");
        file.write(
            b"renamed\n".to_vec(),
            &FileOptions {
                uid: 1000,
                gid: 1000,
                mode: "0644".to_string(),
            },
        )
        .await
        .unwrap();

        let write = transport
            .requests()
            .into_iter()
            .find(|request| request.method == Method::Post)
            .unwrap();
        assert_eq!(write.raw_body.as_deref(), Some(&b"renamed\n"[..]));
        assert_eq!(
            write.headers,
            vec![
                ("X-LXD-uid".to_string(), "1000".to_string()),
                ("X-LXD-gid".to_string(), "1000".to_string()),
                ("X-LXD-mode".to_string(), "0644".to_string()),
            ]
        );
    }
}
