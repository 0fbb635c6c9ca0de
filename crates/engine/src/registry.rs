//! The endpoint registry.
//!
//! [`Registry::get`] resolves a URL to a cached [`Endpoint`], constructing
//! and loading it on first access. The registry also owns the
//! [`OperationEngine`] and is the entry point for every request made on
//! behalf of its endpoints.
//!
//! ## First-access race
//!
//! Concurrent first access to the same unseen URL is not deduplicated: each
//! caller constructs and loads its own endpoint, and the later insert wins.
//! Callers holding the losing instance keep a working but uncached handle.
//! The cache lock is never held across an await, so a slow load does not
//! block lookups of other URLs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use protocol::{LxdError, Method, RawRequest, Result, Transport};
use serde_json::Value;
use tracing::{debug, info_span, Instrument};

use crate::config::EngineConfig;
use crate::endpoint::{Endpoint, EndpointClass};
use crate::operation::{ChannelFactory, OperationEngine};

/// URL-to-endpoint cache with ordered pattern dispatch.
pub struct Registry {
    engine: Arc<OperationEngine>,
    classes: Vec<EndpointClass>,
    cache: Mutex<HashMap<String, Endpoint>>,
}

impl Registry {
    /// Creates a registry dispatching over `classes` in order.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: EngineConfig,
        classes: Vec<EndpointClass>,
    ) -> Self {
        Self {
            engine: Arc::new(OperationEngine::new(transport, config)),
            classes,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<OperationEngine> {
        &self.engine
    }

    /// Returns the cached endpoint for `url`, or constructs, loads and caches
    /// one from the first class whose pattern matches.
    pub async fn get(&self, url: &str) -> Result<Endpoint> {
        if let Some(endpoint) = self.cache().get(url) {
            return Ok(endpoint.clone());
        }

        let class = self
            .classes
            .iter()
            .find(|class| class.matches(url))
            .ok_or_else(|| LxdError::RegistryLookup {
                url: url.to_string(),
            })?;

        let endpoint = class.construct(url, self.engine.clone());
        endpoint
            .load()
            .instrument(info_span!("endpoint_load", class = class.name(), url))
            .await?;
        debug!(class = class.name(), url, "endpoint cached");

        self.cache().insert(url.to_string(), endpoint.clone());
        Ok(endpoint)
    }

    /// Returns `true` if `url` currently has a cached endpoint.
    pub fn is_cached(&self, url: &str) -> bool {
        self.cache().contains_key(url)
    }

    /// Drops the cached endpoint for `url`. Existing handles stay usable but
    /// the next [`Registry::get`] constructs a fresh one.
    pub fn evict(&self, url: &str) -> Option<Endpoint> {
        self.cache().remove(url)
    }

    /// Runs one request through the operation engine.
    pub async fn query(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        self.engine.query(method, url, body).await
    }

    /// Runs one request, opening the channels built by `channels` if the
    /// server spawns a background operation.
    pub async fn query_with_channels(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        channels: ChannelFactory<'_>,
    ) -> Result<Value> {
        self.engine
            .query_with_channels(method, url, body, channels)
            .await
    }

    /// Sends a request that bypasses the envelope.
    pub async fn request_raw(&self, request: RawRequest) -> Result<Vec<u8>> {
        self.engine.request_raw(request).await
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Endpoint>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
