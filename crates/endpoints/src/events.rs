//! Server log forwarding.
//!
//! The server publishes its own log records on the `events` websocket.
//! [`EventLog`] subscribes to the `logging` type and replays each record as a
//! `tracing` event under the `lxd_server` target.

use std::collections::BTreeMap;

use protocol::{ChannelSocket, Result, Transport};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

/// Severity of a server log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl ServerLevel {
    /// Maps the server's four-letter level names. Unknown names are treated
    /// as informational.
    pub fn parse(level: &str) -> Self {
        match level {
            "dbug" | "debug" => Self::Debug,
            "warn" => Self::Warn,
            "eror" | "error" | "crit" => Self::Error,
            _ => Self::Info,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    metadata: Value,
}

/// One server log record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogRecord {
    pub message: String,
    pub level: String,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

/// A subscription to server log records.
pub struct EventLog {
    socket: Box<dyn ChannelSocket>,
}

impl EventLog {
    /// Opens `<api_root>/events?type=logging`.
    pub async fn connect(transport: &dyn Transport, api_root: &str) -> Result<Self> {
        let url = format!("{api_root}/events?type=logging");
        let socket = transport.connect_websocket(&url).await?;
        debug!(%url, "subscribed to server logs");
        Ok(Self { socket })
    }

    /// Waits for the next log record. Returns `None` once the server closes
    /// the socket. Messages that are not log records are skipped.
    pub async fn next_record(&mut self) -> Result<Option<LogRecord>> {
        while let Some(message) = self.socket.recv().await? {
            match parse(&message) {
                Some(record) => return Ok(Some(record)),
                None => trace!(bytes = message.len(), "skipped non-logging event"),
            }
        }
        Ok(None)
    }

    /// Forwards every record into `tracing` until the socket closes and
    /// returns how many were forwarded.
    pub async fn run(mut self) -> Result<usize> {
        let mut forwarded = 0;
        while let Some(record) = self.next_record().await? {
            forward(&record);
            forwarded += 1;
        }
        self.socket.close().await?;
        debug!(forwarded, "server log stream ended");
        Ok(forwarded)
    }
}

fn parse(message: &[u8]) -> Option<LogRecord> {
    let event: Event = match serde_json::from_slice(message) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "malformed server event");
            return None;
        }
    };
    if event.kind != "logging" {
        return None;
    }
    serde_json::from_value(event.metadata).ok()
}

fn forward(record: &LogRecord) {
    let context = &record.context;
    match ServerLevel::parse(&record.level) {
        ServerLevel::Debug => debug!(target: "lxd_server", ?context, "{}", record.message),
        ServerLevel::Info => info!(target: "lxd_server", ?context, "{}", record.message),
        ServerLevel::Warn => warn!(target: "lxd_server", ?context, "{}", record.message),
        ServerLevel::Error => error!(target: "lxd_server", ?context, "{}", record.message),
    }
}

#[cfg(test)]
mod tests {
    use engine::testing::MockTransport;
    use serde_json::json;

    use super::*;

    fn log(level: &str, message: &str) -> Vec<u8> {
        json!({
            "type": "logging",
            "timestamp": "2024-05-01T10:00:00Z",
            "metadata": {"level": level, "message": message, "context": {"instance": "c1"}}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn levels_map_to_tracing_severities() {
        assert_eq!(ServerLevel::parse("dbug"), ServerLevel::Debug);
        assert_eq!(ServerLevel::parse("info"), ServerLevel::Info);
        assert_eq!(ServerLevel::parse("warn"), ServerLevel::Warn);
        assert_eq!(ServerLevel::parse("eror"), ServerLevel::Error);
        assert_eq!(ServerLevel::parse("crit"), ServerLevel::Error);
        assert_eq!(ServerLevel::parse("trace"), ServerLevel::Info);
    }

    #[tokio::test]
    async fn forwards_logging_records_until_close() {
        let transport = MockTransport::new();
        let socket = transport.socket("/1.0/events?type=logging");
        socket.push(log("info", "started"));
        socket.push(json!({"type": "operation", "metadata": {}}).to_string().into_bytes());
        socket.push(b"not json".to_vec());
        socket.push(log("eror", "failed to mount"));
        socket.close_from_peer();

        let events = EventLog::connect(&transport, "/1.0").await.unwrap();
        let forwarded = events.run().await.unwrap();

        assert_eq!(forwarded, 2);
        assert!(socket.is_closed());
    }

    #[tokio::test]
    async fn next_record_exposes_context() {
        let transport = MockTransport::new();
        let socket = transport.socket("/1.0/events?type=logging");
        socket.push(log("dbug", "handling"));
        socket.close_from_peer();

        let mut events = EventLog::connect(&transport, "/1.0").await.unwrap();
        let record = events.next_record().await.unwrap().unwrap();

        assert_eq!(record.message, "handling");
        assert_eq!(record.context["instance"], "c1");
        assert!(events.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_endpoint_fails_to_connect() {
        let transport = MockTransport::new();
        assert!(EventLog::connect(&transport, "/1.0").await.is_err());
    }
}
