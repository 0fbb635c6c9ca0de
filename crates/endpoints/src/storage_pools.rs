//! Storage pools.

use std::collections::BTreeMap;

use protocol::Result;
use serde::Serialize;
use tracing::info;

use crate::client::classes;
use crate::wrapper::{collection_wrapper, object_wrapper};

collection_wrapper! {
    StoragePools, classes = [classes::STORAGE_POOLS], child = StoragePool
}

object_wrapper! {
    /// One storage pool. Only `description` and `config` are writable.
    StoragePool, classes = [classes::STORAGE_POOL]
}

/// Body of a storage pool creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoragePoolCreate {
    pub name: String,
    /// Backend driver, e.g. `dir`, `zfs`, `btrfs`, `lvm`.
    pub driver: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

impl StoragePoolCreate {
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            description: String::new(),
            config: BTreeMap::new(),
        }
    }

    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

impl StoragePools {
    pub async fn create(&self, request: &StoragePoolCreate) -> Result<StoragePool> {
        let body = serde_json::to_value(request)?;
        let pool = self.create_child(&body, &request.name).await?;
        info!(name = %request.name, driver = %request.driver, "storage pool created");
        Ok(pool)
    }
}

impl StoragePool {
    pub fn name(&self) -> Result<String> {
        self.object.get_as("name")
    }

    pub fn driver(&self) -> Result<String> {
        self.object.get_as("driver")
    }

    /// URLs of the volumes, profiles and instances that reference the pool.
    pub fn used_by(&self) -> Result<Vec<String>> {
        self.object.get_as("used_by")
    }
}
