//! Trusted client certificates.

use protocol::Result;
use serde::Serialize;
use tracing::info;

use crate::client::classes;
use crate::wrapper::{collection_wrapper, object_wrapper};

collection_wrapper! {
    /// The server's trust store.
    Certificates, classes = [classes::CERTIFICATES], child = Certificate
}

object_wrapper! {
    /// One trusted certificate, keyed by its fingerprint.
    Certificate, classes = [classes::CERTIFICATE]
}

/// Body of a trust store addition.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateAdd {
    #[serde(rename = "type")]
    pub kind: String,
    /// PEM or base64 DER encoded certificate. When absent the server trusts
    /// the certificate the request was made with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Trust password, required when adding the client's own certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub restricted: bool,
}

impl CertificateAdd {
    /// A client certificate addition.
    pub fn client(certificate: impl Into<String>) -> Self {
        Self {
            kind: "client".to_string(),
            certificate: Some(certificate.into()),
            name: None,
            password: None,
            restricted: false,
        }
    }

    /// Trust the certificate of the current connection, authenticated by `password`.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            kind: "client".to_string(),
            certificate: None,
            name: None,
            password: Some(password.into()),
            restricted: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl Certificates {
    /// Adds a certificate and returns it.
    ///
    /// The server does not report the new URL, so the caller supplies the
    /// certificate's `fingerprint` as the expected key.
    pub async fn add(&self, request: &CertificateAdd, fingerprint: &str) -> Result<Certificate> {
        let body = serde_json::to_value(request)?;
        let certificate = self.create_child(&body, fingerprint).await?;
        info!(fingerprint, "certificate trusted");
        Ok(certificate)
    }
}

impl Certificate {
    pub fn fingerprint(&self) -> Result<String> {
        self.object.get_as("fingerprint")
    }

    pub fn name(&self) -> Result<String> {
        self.object.get_as("name")
    }

    /// The PEM encoded certificate.
    pub fn certificate(&self) -> Result<String> {
        self.object.get_as("certificate")
    }

    pub async fn rename(&self, name: &str) -> Result<()> {
        self.object.edit(|edit| edit.set("name", name)).await
    }
}
