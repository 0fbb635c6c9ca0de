//! Command execution inside an instance.
//!
//! An exec request spawns a background operation. When the caller supplies
//! any stream, the server holds the command until the three standard
//! streams and the control channel are connected; the engine then pumps
//! them until the operation completes.

use std::collections::BTreeMap;

use engine::{ChannelFactory, ChannelJob, InputStream, OutputHandler};
use futures::stream::{self, StreamExt};
use protocol::{AsyncMetadata, ChannelRole, ChannelSecret, LxdError, OperationRecord, Result};
use serde::Serialize;
use serde_json::Value;

/// Body of an exec request, minus `wait-for-websocket`, which is derived
/// from the supplied [`ExecStreams`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecRequest {
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
    pub interactive: bool,
    pub record_output: bool,
}

impl ExecRequest {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub(crate) fn body(&self, wait_for_websocket: bool) -> Result<Value> {
        let mut body = serde_json::to_value(self)?;
        if let Some(fields) = body.as_object_mut() {
            fields.insert(
                "wait-for-websocket".to_string(),
                Value::Bool(wait_for_websocket),
            );
        }
        Ok(body)
    }
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// Local ends of the command's standard streams.
#[derive(Default)]
pub struct ExecStreams {
    stdin: Option<InputStream>,
    stdout: Option<OutputHandler>,
    stderr: Option<OutputHandler>,
}

impl ExecStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `input` to the command's stdin. The stdin channel closes when
    /// the stream ends.
    pub fn stdin(mut self, input: InputStream) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn stdout(mut self, handler: impl FnMut(Vec<u8>) + Send + 'static) -> Self {
        self.stdout = Some(Box::new(handler));
        self
    }

    pub fn stderr(mut self, handler: impl FnMut(Vec<u8>) + Send + 'static) -> Self {
        self.stderr = Some(Box::new(handler));
        self
    }

    /// `true` if no stream was supplied, in which case no channel is opened.
    pub fn is_empty(&self) -> bool {
        self.stdin.is_none() && self.stdout.is_none() && self.stderr.is_none()
    }

    /// Builds the channel jobs for an exec operation. Missing streams are
    /// replaced by an empty input or a discarding handler so that the server
    /// sees all of its channels connected.
    pub(crate) fn into_channels(self) -> ChannelFactory<'static> {
        Box::new(move |operation: &AsyncMetadata| {
            if self.is_empty() {
                return Ok(Vec::new());
            }
            let Self {
                stdin,
                stdout,
                stderr,
            } = self;
            Ok(vec![
                ChannelJob::writer(
                    ChannelRole::Stdin,
                    secret(operation, ChannelRole::Stdin)?,
                    stdin.unwrap_or_else(|| stream::empty().boxed()),
                ),
                ChannelJob::reader(
                    ChannelRole::Stdout,
                    secret(operation, ChannelRole::Stdout)?,
                    stdout.unwrap_or_else(discard),
                ),
                ChannelJob::reader(
                    ChannelRole::Stderr,
                    secret(operation, ChannelRole::Stderr)?,
                    stderr.unwrap_or_else(discard),
                ),
                ChannelJob::control(secret(operation, ChannelRole::Control)?),
            ])
        })
    }
}

impl std::fmt::Debug for ExecStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecStreams")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

fn secret(operation: &AsyncMetadata, role: ChannelRole) -> Result<ChannelSecret> {
    operation.fds.get(role).cloned().ok_or_else(|| {
        LxdError::protocol(format!(
            "exec operation {} has no '{}' channel secret",
            operation.id,
            role.fd_key()
        ))
    })
}

fn discard() -> OutputHandler {
    Box::new(|_| {})
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Result of a completed exec operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    /// Exit code reported by the server, if any.
    pub return_code: Option<i64>,
    /// The operation's completion record.
    pub record: OperationRecord,
}

impl ExecOutput {
    pub(crate) fn from_completion(metadata: &Value) -> Result<Self> {
        let record = OperationRecord::from_metadata(metadata)?;
        let return_code = record.metadata.get("return").and_then(Value::as_i64);
        Ok(Self {
            return_code,
            record,
        })
    }

    pub fn success(&self) -> bool {
        self.return_code == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn body_carries_kebab_case_flags() {
        let body = ExecRequest::new(["ls", "-l"])
            .env("HOME", "/root")
            .body(true)
            .unwrap();

        assert_eq!(
            body,
            json!({
                "command": ["ls", "-l"],
                "environment": {"HOME": "/root"},
                "interactive": false,
                "record-output": false,
                "wait-for-websocket": true
            })
        );
    }

    #[test]
    fn return_code_is_read_from_nested_metadata() {
        let output = ExecOutput::from_completion(&json!({
            "id": "op1",
            "status": "Success",
            "status_code": 200,
            "created_at": "2024-05-01T10:00:00.123456Z",
            "metadata": {"return": 0}
        }))
        .unwrap();
        assert!(output.success());
        assert_eq!(output.record.status.as_deref(), Some("Success"));
        assert!(output.record.created_at.is_some());

        let missing = ExecOutput::from_completion(&json!({"status_code": 200})).unwrap();
        assert_eq!(missing.return_code, None);
        assert!(!missing.success());
    }

    #[test]
    fn missing_secret_is_a_protocol_error() {
        let operation = AsyncMetadata::from_metadata(json!({
            "id": "op1",
            "metadata": {"fds": {"0": "s0", "1": "s1", "2": "s2"}}
        }))
        .unwrap();

        let factory = ExecStreams::new().stdout(|_| {}).into_channels();
        let err = factory(&operation).unwrap_err();

        assert!(matches!(err, LxdError::Protocol { .. }));
    }

    #[test]
    fn no_streams_means_no_channels() {
        let operation = AsyncMetadata::from_metadata(json!({"id": "op1"})).unwrap();

        let jobs = ExecStreams::new().into_channels()(&operation).unwrap();

        assert!(jobs.is_empty());
    }
}
