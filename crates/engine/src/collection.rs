//! Collections: endpoints listing child resource URLs.
//!
//! Children are addressed by leaf key, the final path segment of their URL.
//! Dereferencing goes through the [`Registry`] so a child is constructed and
//! loaded once and shared afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use protocol::{leaf_key, LxdError, Method, Result};
use serde_json::Value;
use tracing::debug;

use crate::endpoint::{Endpoint, Loadable};
use crate::operation::OperationEngine;
use crate::registry::Registry;

/// An ordered list of child URLs as of the last load.
pub struct Collection {
    url: String,
    class: &'static str,
    engine: Arc<OperationEngine>,
    items: Mutex<Vec<String>>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("url", &self.url)
            .field("class", &self.class)
            .field("items", &*self.items())
            .finish()
    }
}

impl Collection {
    pub fn new(url: impl Into<String>, class: &'static str, engine: Arc<OperationEngine>) -> Self {
        Self {
            url: url.into(),
            class,
            engine,
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    /// GETs the URL and replaces the item list.
    pub async fn load(&self) -> Result<()> {
        let metadata = self.engine.query(Method::Get, &self.url, None).await?;
        let Value::Array(entries) = metadata else {
            return Err(LxdError::protocol(format!(
                "collection '{}' did not load as a JSON array",
                self.url
            )));
        };
        let urls = entries
            .into_iter()
            .map(|entry| match entry {
                Value::String(url) => Ok(url),
                other => Err(LxdError::protocol(format!(
                    "collection '{}' lists a non-string item: {other}",
                    self.url
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        *self.items() = urls;
        Ok(())
    }

    /// Number of items as of the last load.
    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Item URLs in load order.
    pub fn urls(&self) -> Vec<String> {
        self.items().clone()
    }

    /// Leaf keys of all items in load order.
    pub fn keys(&self) -> Vec<String> {
        self.items()
            .iter()
            .map(|url| leaf_key(url).to_string())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.child_url(key).is_some()
    }

    /// URL of the item whose leaf key is `key`.
    pub fn child_url(&self, key: &str) -> Option<String> {
        self.items()
            .iter()
            .find(|url| leaf_key(url) == key)
            .cloned()
    }

    /// Dereferences the item `key` through the registry.
    pub async fn get(&self, registry: &Registry, key: &str) -> Result<Endpoint> {
        let url = self.child_url(key).ok_or_else(|| LxdError::KeyNotFound {
            key: key.to_string(),
        })?;
        registry.get(&url).await
    }

    /// DELETEs item `key`, evicts it from the registry and reloads. Fails
    /// without sending anything if `key` is not listed.
    pub async fn delete(&self, registry: &Registry, key: &str) -> Result<()> {
        let url = self.child_url(key).ok_or_else(|| LxdError::KeyNotFound {
            key: key.to_string(),
        })?;
        debug!(collection = %self.url, %url, "deleting item");
        self.engine.query(Method::Delete, &url, None).await?;
        registry.evict(&url);
        self.load().await
    }

    /// POSTs `body` to the collection, reloads, and returns the item `key`.
    pub async fn create(&self, registry: &Registry, body: &Value, key: &str) -> Result<Endpoint> {
        debug!(collection = %self.url, key, "creating item");
        self.engine.query(Method::Post, &self.url, Some(body)).await?;
        self.load().await?;
        match self.get(registry, key).await {
            Err(LxdError::KeyNotFound { key }) => Err(LxdError::Inconsistent {
                message: format!("'{key}' is missing from '{}' after creation", self.url),
            }),
            other => other,
        }
    }

    /// Dereferences every item in load order, one at a time.
    ///
    /// The stream works on a snapshot of the item list; calling `iter` again
    /// restarts from the current list.
    pub fn iter<'a>(&self, registry: &'a Registry) -> BoxStream<'a, Result<Endpoint>> {
        stream::iter(self.urls())
            .then(move |url| async move { registry.get(&url).await })
            .boxed()
    }

    fn items(&self) -> MutexGuard<'_, Vec<String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Loadable for Collection {
    fn url(&self) -> &str {
        &self.url
    }

    fn class(&self) -> &'static str {
        self.class
    }

    async fn load(&self) -> Result<()> {
        Collection::load(self).await
    }
}
