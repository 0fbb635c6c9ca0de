//! The TLS connector shared by HTTP requests and websockets.

use std::path::Path;

use native_tls::{Certificate, Identity, TlsConnector};
use protocol::{LxdError, Result};
use tracing::{debug, warn};

use crate::config::TransportConfig;

/// Builds a connector presenting the configured client identity and trusting
/// the configured root.
pub(crate) fn connector(config: &TransportConfig) -> Result<TlsConnector> {
    let mut builder = TlsConnector::builder();

    if !config.verify_host_certificate {
        warn!("server certificate verification is disabled");
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    if let Some(path) = &config.ca_cert {
        let root = Certificate::from_pem(&read(path)?)
            .map_err(|err| tls_error(format!("invalid CA certificate {}: {err}", path.display())))?;
        builder.add_root_certificate(root);
        debug!(path = %path.display(), "trusting additional root");
    }

    match (&config.client_cert, &config.client_key) {
        (Some(cert), Some(key)) => {
            let identity = Identity::from_pkcs8(&read(cert)?, &read(key)?)
                .map_err(|err| tls_error(format!("invalid client identity: {err}")))?;
            builder.identity(identity);
            debug!(cert = %cert.display(), "client certificate loaded");
        }
        (None, None) => {}
        _ => {
            return Err(tls_error(
                "client_cert and client_key must be set together".to_string(),
            ))
        }
    }

    builder
        .build()
        .map_err(|err| tls_error(format!("cannot build TLS connector: {err}")))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|err| tls_error(format!("cannot read {}: {err}", path.display())))
}

fn tls_error(message: String) -> LxdError {
    LxdError::Configuration { message }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn plain_config_builds() {
        assert!(connector(&TransportConfig::new("https://lxd:8443")).is_ok());
    }

    #[test]
    fn lone_client_cert_is_rejected() {
        let mut config = TransportConfig::new("https://lxd:8443");
        config.client_cert = Some(PathBuf::from("/nonexistent/client.crt"));

        let Err(err) = connector(&config) else {
            panic!("connector accepted a certificate without a key");
        };

        assert!(matches!(err, LxdError::Configuration { ref message } if message.contains("together")));
    }

    #[test]
    fn unreadable_ca_is_a_configuration_error() {
        let mut config = TransportConfig::new("https://lxd:8443");
        config.ca_cert = Some(PathBuf::from("/nonexistent/ca.crt"));

        assert!(matches!(
            connector(&config),
            Err(LxdError::Configuration { .. })
        ));
    }
}
