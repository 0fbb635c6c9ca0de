//! Endpoint variants and the classes that select them.
//!
//! An [`EndpointClass`] pairs a URL pattern with the variant to construct for
//! matching URLs. The registry scans classes in order and the first match
//! wins, so more specific patterns must be listed before broader ones.

use std::sync::Arc;

use async_trait::async_trait;
use protocol::{LxdError, Result};
use regex::Regex;

use crate::collection::Collection;
use crate::object::Object;
use crate::operation::OperationEngine;

/// Capability shared by both endpoint variants.
#[async_trait]
pub trait Loadable: Send + Sync {
    fn url(&self) -> &str;

    /// Name of the class the endpoint was constructed from.
    fn class(&self) -> &'static str;

    /// Refreshes the endpoint from the server.
    async fn load(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

/// Which endpoint variant a class constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// An [`Object`] whose listed fields are never written back.
    Object { readonly: &'static [&'static str] },
    /// A [`Collection`] of child URLs.
    Collection,
}

/// A URL pattern and the endpoint variant it dispatches to.
#[derive(Debug, Clone)]
pub struct EndpointClass {
    name: &'static str,
    pattern: Regex,
    variant: Variant,
}

impl EndpointClass {
    /// A class constructing [`Object`]s for URLs matching `pattern`.
    pub fn object(
        name: &'static str,
        pattern: &str,
        readonly: &'static [&'static str],
    ) -> Result<Self> {
        Self::new(name, pattern, Variant::Object { readonly })
    }

    /// A class constructing [`Collection`]s for URLs matching `pattern`.
    pub fn collection(name: &'static str, pattern: &str) -> Result<Self> {
        Self::new(name, pattern, Variant::Collection)
    }

    fn new(name: &'static str, pattern: &str, variant: Variant) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|err| LxdError::Configuration {
            message: format!("invalid pattern for endpoint class '{name}': {err}"),
        })?;
        Ok(Self {
            name,
            pattern,
            variant,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    /// Constructs an unloaded endpoint of this class for `url`.
    pub(crate) fn construct(&self, url: &str, engine: Arc<OperationEngine>) -> Endpoint {
        match self.variant {
            Variant::Object { readonly } => {
                Endpoint::Object(Arc::new(Object::new(url, self.name, readonly, engine)))
            }
            Variant::Collection => {
                Endpoint::Collection(Arc::new(Collection::new(url, self.name, engine)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// A registry-cached wrapper bound to one URL.
///
/// Cloning an endpoint clones the handle, not the resource: both clones
/// observe the same loads and edits.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Object(Arc<Object>),
    Collection(Arc<Collection>),
}

impl Endpoint {
    fn as_loadable(&self) -> &dyn Loadable {
        match self {
            Self::Object(object) => object.as_ref(),
            Self::Collection(collection) => collection.as_ref(),
        }
    }

    pub fn url(&self) -> &str {
        self.as_loadable().url()
    }

    pub fn class(&self) -> &'static str {
        self.as_loadable().class()
    }

    pub async fn load(&self) -> Result<()> {
        self.as_loadable().load().await
    }

    /// Returns `true` if both handles refer to the same cached instance.
    pub fn same_instance(&self, other: &Endpoint) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::Collection(a), Self::Collection(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Returns the object, failing if this endpoint is a collection.
    pub fn into_object(self) -> Result<Arc<Object>> {
        match self {
            Self::Object(object) => Ok(object),
            Self::Collection(collection) => Err(LxdError::UnexpectedEndpoint {
                url: collection.url().to_string(),
                expected: "object",
            }),
        }
    }

    /// Returns the collection, failing if this endpoint is an object.
    pub fn into_collection(self) -> Result<Arc<Collection>> {
        match self {
            Self::Collection(collection) => Ok(collection),
            Self::Object(object) => Err(LxdError::UnexpectedEndpoint {
                url: object.url().to_string(),
                expected: "collection",
            }),
        }
    }
}
