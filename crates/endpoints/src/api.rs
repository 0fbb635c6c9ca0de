//! The server root object.

use std::collections::BTreeMap;

use protocol::{ApiVersion, LxdError, Result};
use serde::Deserialize;

use crate::client::classes;
use crate::wrapper::object_wrapper;

object_wrapper! {
    /// The API root: server identity, trust state and server-wide config.
    Api, classes = [classes::API]
}

/// The `environment` block of the API root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerEnvironment {
    pub server_name: String,
    pub server_version: String,
    pub kernel: String,
    pub kernel_version: String,
    pub storage: String,
    pub storage_version: String,
    pub architectures: Vec<String>,
}

impl Api {
    pub fn api_version(&self) -> Result<ApiVersion> {
        let raw: String = self.object.get_as("api_version")?;
        ApiVersion::parse(&raw)
            .ok_or_else(|| LxdError::protocol(format!("unparseable api_version '{raw}'")))
    }

    pub fn api_extensions(&self) -> Result<Vec<String>> {
        self.object.get_as("api_extensions")
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.api_extensions()
            .map(|extensions| extensions.iter().any(|extension| extension == name))
            .unwrap_or(false)
    }

    /// Whether the server trusts the client certificate.
    pub fn is_trusted(&self) -> bool {
        matches!(self.object.get_as::<String>("auth").as_deref(), Ok("trusted"))
    }

    /// The `environment` block. Untrusted clients only see a subset.
    pub fn environment(&self) -> Result<ServerEnvironment> {
        self.object.get_as("environment")
    }

    /// Server-wide configuration keys.
    pub fn config(&self) -> Result<BTreeMap<String, String>> {
        match self.object.get("config") {
            Ok(config) => Ok(serde_json::from_value(config)?),
            Err(LxdError::UnknownField { .. }) => Ok(BTreeMap::new()),
            Err(err) => Err(err),
        }
    }

    /// Sets one server config key and writes the change back.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let mut config = self.config()?;
        config.insert(key.to_string(), value.to_string());
        self.object
            .edit(|edit| edit.set("config", &config))
            .await
    }
}
