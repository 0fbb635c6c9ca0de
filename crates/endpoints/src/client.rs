//! Client entry point and the default endpoint pattern table.

use std::sync::Arc;

use engine::{EndpointClass, EngineConfig, Registry};
use protocol::{Result, Transport};

use crate::api::Api;
use crate::certificates::Certificates;
use crate::events::EventLog;
use crate::instances::Instances;
use crate::projects::Projects;
use crate::storage_pools::StoragePools;

/// Endpoint class names used by the default pattern table.
pub mod classes {
    pub const API: &str = "api";
    pub const CERTIFICATES: &str = "certificates";
    pub const CERTIFICATE: &str = "certificate";
    pub const INSTANCES: &str = "instances";
    pub const INSTANCE: &str = "instance";
    pub const STORAGE_POOLS: &str = "storage_pools";
    pub const STORAGE_POOL: &str = "storage_pool";
    pub const PROJECTS: &str = "projects";
    pub const PROJECT: &str = "project";
}

const API_READONLY: &[&str] = &[
    "api_extensions",
    "api_status",
    "api_version",
    "auth",
    "public",
    "environment",
    "auth_methods",
];
const CERTIFICATE_READONLY: &[&str] = &["fingerprint", "certificate"];
const INSTANCE_READONLY: &[&str] = &[
    "status",
    "status_code",
    "created_at",
    "last_used_at",
    "location",
    "type",
];
const STORAGE_POOL_READONLY: &[&str] = &["status", "locations", "used_by", "driver", "name"];
const PROJECT_READONLY: &[&str] = &["name", "used_by"];

/// The ordered pattern table for an API rooted at `api_root`.
///
/// Collection patterns are anchored at both ends, so a collection URL never
/// falls through to the item pattern below it.
pub fn default_classes(api_root: &str) -> Result<Vec<EndpointClass>> {
    let root = regex::escape(api_root);
    Ok(vec![
        EndpointClass::object(classes::API, &format!("^{root}$"), API_READONLY)?,
        EndpointClass::collection(classes::CERTIFICATES, &format!("^{root}/certificates$"))?,
        EndpointClass::object(
            classes::CERTIFICATE,
            &format!("^{root}/certificates/[^/]+$"),
            CERTIFICATE_READONLY,
        )?,
        EndpointClass::collection(
            classes::INSTANCES,
            &format!("^{root}/(instances|containers)$"),
        )?,
        EndpointClass::object(
            classes::INSTANCE,
            &format!("^{root}/(instances|containers)/[^/?]+$"),
            INSTANCE_READONLY,
        )?,
        EndpointClass::collection(classes::STORAGE_POOLS, &format!("^{root}/storage-pools$"))?,
        EndpointClass::object(
            classes::STORAGE_POOL,
            &format!("^{root}/storage-pools/[^/]+$"),
            STORAGE_POOL_READONLY,
        )?,
        EndpointClass::collection(classes::PROJECTS, &format!("^{root}/projects$"))?,
        EndpointClass::object(
            classes::PROJECT,
            &format!("^{root}/projects/[^/]+$"),
            PROJECT_READONLY,
        )?,
    ])
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A connection to one LXD server.
///
/// Owns the [`Registry`]; every typed handle obtained from the client shares
/// it, so repeated lookups of the same URL return the same cached resource.
#[derive(Clone)]
pub struct Client {
    registry: Arc<Registry>,
    api_root: String,
}

impl Client {
    /// Builds a client with the default pattern table.
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Result<Self> {
        let classes = default_classes(&config.api_root)?;
        Ok(Self::with_classes(transport, config, classes))
    }

    /// Builds a client dispatching over a caller-supplied pattern table.
    pub fn with_classes(
        transport: Arc<dyn Transport>,
        config: EngineConfig,
        classes: Vec<EndpointClass>,
    ) -> Self {
        let api_root = config.api_root.clone();
        Self {
            registry: Arc::new(Registry::new(transport, config, classes)),
            api_root,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    /// The server root, `<api_root>`.
    pub async fn api(&self) -> Result<Api> {
        let endpoint = self.registry.get(&self.api_root).await?;
        Api::from_endpoint(self.registry.clone(), endpoint)
    }

    pub async fn instances(&self) -> Result<Instances> {
        let endpoint = self.registry.get(&self.url("instances")).await?;
        Instances::from_endpoint(self.registry.clone(), endpoint)
    }

    /// The legacy `containers` listing; items are ordinary instances.
    pub async fn containers(&self) -> Result<Instances> {
        let endpoint = self.registry.get(&self.url("containers")).await?;
        Instances::from_endpoint(self.registry.clone(), endpoint)
    }

    pub async fn certificates(&self) -> Result<Certificates> {
        let endpoint = self.registry.get(&self.url("certificates")).await?;
        Certificates::from_endpoint(self.registry.clone(), endpoint)
    }

    pub async fn storage_pools(&self) -> Result<StoragePools> {
        let endpoint = self.registry.get(&self.url("storage-pools")).await?;
        StoragePools::from_endpoint(self.registry.clone(), endpoint)
    }

    pub async fn projects(&self) -> Result<Projects> {
        let endpoint = self.registry.get(&self.url("projects")).await?;
        Projects::from_endpoint(self.registry.clone(), endpoint)
    }

    /// Subscribes to the server's log records.
    pub async fn events(&self) -> Result<EventLog> {
        EventLog::connect(self.registry.engine().transport().as_ref(), &self.api_root).await
    }

    fn url(&self, collection: &str) -> String {
        format!("{}/{}", self.api_root, collection)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("api_root", &self.api_root)
            .finish()
    }
}
