//! Wire-level value types for the LXD REST API.
//!
//! Every response from the server is an [`Envelope`] whose `type`
//! discriminator says whether the request completed inline (`sync`), spawned
//! a background operation (`async`), or failed (`error`). Async responses
//! carry [`AsyncMetadata`]; the completion of a background operation is
//! described by an [`OperationRecord`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ChannelSecret, LxdError, OperationId, Result};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Put,
    Patch,
    Post,
    Delete,
}

impl Method {
    /// Returns the method as an upper-case HTTP verb.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------

/// A request whose body and response bypass the JSON envelope (file
/// transfers).
#[derive(Debug, Clone, PartialEq)]
pub struct RawRequest {
    pub method: Method,
    /// URL relative to the server base URL, including any query string.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RawRequest {
    /// Creates a body-less request with no extra headers.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Adds a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the raw request body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The `type` discriminator of an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// The request completed; `metadata` is the result.
    Sync,
    /// A background operation was spawned; `metadata` describes it.
    Async,
    /// The request failed; `error` and `error_code` describe why.
    Error,
}

// ---------------------------------------------------------------------------

/// A JSON response from the LXD API.
///
/// `kind` is optional at the type level because the `wait` sub-resource is
/// only required to return `metadata`; the operation engine rejects a primary
/// response without a discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub kind: Option<ResponseType>,

    #[serde(default)]
    pub metadata: Value,

    /// Error message of an `error` envelope. The server sends an empty string
    /// on success.
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub error_code: Option<u16>,

    #[serde(default)]
    pub status_code: Option<u16>,
}

impl Envelope {
    /// Parses an envelope from a decoded JSON body.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(LxdError::protocol(format!(
                "expected a JSON object envelope, got {value}"
            )));
        }
        serde_json::from_value(value)
            .map_err(|err| LxdError::protocol(format!("malformed envelope: {err}")))
    }

    /// Returns the error message, treating an empty string as absent.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|message| !message.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Background operations
// ---------------------------------------------------------------------------

/// Role of a websocket channel attached to a background operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Stdin,
    Stdout,
    Stderr,
    Control,
}

impl ChannelRole {
    /// Returns the key under which the server lists this role's secret in `fds`.
    pub fn fd_key(self) -> &'static str {
        match self {
            Self::Stdin => "0",
            Self::Stdout => "1",
            Self::Stderr => "2",
            Self::Control => "control",
        }
    }
}

impl std::fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Control => "control",
        })
    }
}

// ---------------------------------------------------------------------------

/// Role-to-secret mapping (`fds`) of an async response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSecrets(HashMap<String, ChannelSecret>);

impl ChannelSecrets {
    /// Returns the secret for `role`, if the server issued one.
    pub fn get(&self, role: ChannelRole) -> Option<&ChannelSecret> {
        self.0.get(role.fd_key())
    }

    /// Returns `true` if no secrets were issued.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn from_value(fds: &Value) -> Result<Self> {
        let Some(map) = fds.as_object() else {
            return Err(LxdError::protocol("'fds' is not an object"));
        };
        let mut secrets = HashMap::with_capacity(map.len());
        for (key, secret) in map {
            let secret = secret
                .as_str()
                .and_then(ChannelSecret::new)
                .ok_or_else(|| LxdError::protocol(format!("invalid secret for fd '{key}'")))?;
            secrets.insert(key.clone(), secret);
        }
        Ok(Self(secrets))
    }
}

// ---------------------------------------------------------------------------

/// The `metadata` of an async response.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncMetadata {
    pub id: OperationId,
    /// Websocket secrets, when the operation exposes channels. Looked up at
    /// `fds` and then at `metadata.fds`.
    pub fds: ChannelSecrets,
    /// The raw metadata, for wrappers that need more than `id` and `fds`.
    pub raw: Value,
}

impl AsyncMetadata {
    /// Extracts the operation id and channel secrets from async metadata.
    pub fn from_metadata(metadata: Value) -> Result<Self> {
        let id = metadata
            .get("id")
            .and_then(Value::as_str)
            .and_then(OperationId::new)
            .ok_or_else(|| LxdError::protocol("async response without an operation id"))?;

        let fds = match metadata
            .get("fds")
            .or_else(|| metadata.get("metadata").and_then(|nested| nested.get("fds")))
        {
            Some(fds) if !fds.is_null() => ChannelSecrets::from_value(fds)?,
            _ => ChannelSecrets::default(),
        };

        Ok(Self { id, fds, raw: metadata })
    }
}

// ---------------------------------------------------------------------------

/// Typed view of a background operation's completion metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    /// Numeric status; compared against the engine's failure threshold.
    #[serde(default)]
    pub status_code: Option<u16>,

    /// Failure message; empty on success.
    #[serde(default)]
    pub err: Option<String>,

    #[serde(default)]
    pub created_at: Option<Timestamp>,

    #[serde(default)]
    pub updated_at: Option<Timestamp>,

    /// Operation-specific result data (e.g. the exit code of an exec).
    #[serde(default)]
    pub metadata: Value,
}

impl OperationRecord {
    /// Parses a record from completion metadata.
    pub fn from_metadata(metadata: &Value) -> Result<Self> {
        serde_json::from_value(metadata.clone())
            .map_err(|err| LxdError::protocol(format!("malformed operation metadata: {err}")))
    }

    /// Returns the failure message, treating an empty string as absent.
    pub fn error_message(&self) -> Option<&str> {
        self.err.as_deref().filter(|message| !message.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// Version of the REST API reported by the server root (`"1.0"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    /// Creates a new [`ApiVersion`].
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parses a `"major.minor"` string.
    pub fn parse(value: &str) -> Option<Self> {
        let (major, minor) = value.split_once('.')?;
        Some(Self::new(major.parse().ok()?, minor.parse().ok()?))
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
