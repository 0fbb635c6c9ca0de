//! `lxdctl` configuration file.
//!
//! ```toml
//! [transport]
//! base_url = "https://lxd.example:8443"
//! client_cert = "/home/me/.config/lxdctl/client.crt"
//! client_key = "/home/me/.config/lxdctl/client.key"
//!
//! [engine]
//! failure_status = 400
//!
//! [log]
//! format = "json"
//! filter = "info,engine=debug"
//! ```

use std::path::Path;

use anyhow::{bail, Context};
use engine::EngineConfig;
use serde::Deserialize;
use transport::TransportConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CliConfig {
    pub transport: TransportConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl CliConfig {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    /// Reads the file at `path` if given, then applies `url` on top. Without a
    /// file, `url` alone is enough to connect with default settings.
    pub fn load(path: Option<&Path>, url: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match (path, url) {
            (Some(path), _) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                Self::parse(&text).with_context(|| format!("in {}", path.display()))?
            }
            (None, Some(url)) => Self {
                transport: TransportConfig::new(url),
                engine: EngineConfig::default(),
                log: LogConfig::default(),
            },
            (None, None) => bail!("no server given: pass --url or --config (or set LXDCTL_CONFIG)"),
        };
        if let Some(url) = url {
            config.transport.base_url = url.to_string();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_file_parses() {
        let config = CliConfig::parse(
            r#"
            [transport]
            base_url = "https://lxd:8443"
            verify_host_certificate = false

            [engine]
            api_root = "/1.0"
            failure_status = 301

            [log]
            format = "json"
            "#,
        )
        .unwrap();

        assert!(!config.transport.verify_host_certificate);
        assert_eq!(config.engine.failure_status, 301);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn sections_other_than_transport_are_optional() {
        let config = CliConfig::parse("[transport]\nbase_url = \"https://lxd:8443\"\n").unwrap();

        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn url_alone_is_enough() {
        let config = CliConfig::load(None, Some("https://lxd:8443")).unwrap();
        assert_eq!(config.transport.base_url, "https://lxd:8443");
        assert!(CliConfig::load(None, None).is_err());
    }
}
