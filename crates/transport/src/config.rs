//! Transport configuration.

use std::path::PathBuf;
use std::time::Duration;

use protocol::{LxdError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

fn default_verify_host_certificate() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// Where the server is and how to authenticate to it.
///
/// Certificate and key paths point at PEM files. The key must be PKCS#8
/// (`BEGIN PRIVATE KEY`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Server origin, e.g. `https://lxd.example:8443`. Request URLs are
    /// appended to it verbatim.
    pub base_url: String,

    /// Verify the server certificate and hostname. Disable only for servers
    /// with self-signed certificates that are not pinned via `ca_cert`.
    #[serde(default = "default_verify_host_certificate")]
    pub verify_host_certificate: bool,

    #[serde(default)]
    pub client_cert: Option<PathBuf>,

    #[serde(default)]
    pub client_key: Option<PathBuf>,

    /// Additional trusted root, typically the server's own certificate.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            verify_host_certificate: default_verify_host_certificate(),
            client_cert: None,
            client_key: None,
            ca_cert: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// The parsed base URL without a trailing slash. Only `http` and `https`
    /// URLs with a host are accepted.
    pub(crate) fn origin(&self) -> Result<String> {
        let invalid = |reason: String| LxdError::Configuration {
            message: format!("base_url '{}' {reason}", self.base_url),
        };
        let url = Url::parse(&self.base_url).map_err(|err| invalid(format!("is not a URL: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
            return Err(invalid("must be an http:// or https:// URL with a host".to_string()));
        }
        Ok(url.as_str().trim_end_matches('/').to_string())
    }
}
