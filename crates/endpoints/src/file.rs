//! Files inside an instance.
//!
//! File transfer bypasses the JSON envelope: reads return the raw body and
//! writes carry ownership and mode in `X-LXD-*` headers.

use std::sync::Arc;

use engine::Registry;
use protocol::{Method, RawRequest, Result};
use tracing::debug;
use url::form_urlencoded;

/// Ownership and permissions applied to a written file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOptions {
    pub uid: u32,
    pub gid: u32,
    /// Octal permission string, e.g. `"0644"`.
    pub mode: String,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            uid: 0,
            gid: 0,
            mode: "0700".to_string(),
        }
    }
}

/// A path inside an instance's filesystem.
#[derive(Clone)]
pub struct InstanceFile {
    registry: Arc<Registry>,
    path: String,
    url: String,
}

impl InstanceFile {
    pub(crate) fn new(registry: Arc<Registry>, instance_url: &str, path: &str) -> Self {
        Self {
            registry,
            path: path.to_string(),
            url: format!("{instance_url}/files?{}", path_query(path)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the file's contents.
    pub async fn read(&self) -> Result<Vec<u8>> {
        let contents = self
            .registry
            .request_raw(RawRequest::new(Method::Get, self.url.clone()))
            .await?;
        debug!(path = %self.path, bytes = contents.len(), "file read");
        Ok(contents)
    }

    /// Creates or replaces the file with `contents`.
    pub async fn write(&self, contents: Vec<u8>, options: &FileOptions) -> Result<()> {
        let bytes = contents.len();
        let request = RawRequest::new(Method::Post, self.url.clone())
            .header("X-LXD-uid", options.uid.to_string())
            .header("X-LXD-gid", options.gid.to_string())
            .header("X-LXD-mode", options.mode.clone())
            .body(contents);
        self.registry.request_raw(request).await?;
        debug!(path = %self.path, bytes, "file written");
        Ok(())
    }
}

impl std::fmt::Debug for InstanceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceFile").field("url", &self.url).finish()
    }
}

fn path_query(path: &str) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair("path", path)
        .finish()
}
