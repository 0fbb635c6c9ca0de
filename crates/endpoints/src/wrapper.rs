//! Macros generating typed wrappers over registry endpoints.
//!
//! A wrapper pairs the shared [`engine::Registry`] with one cached object or
//! collection and checks, on construction, that the endpoint was built from
//! one of the wrapper's classes.

// ---------------------------------------------------------------------------
// Macro for object wrappers.
// Generates: struct, CLASSES, from_endpoint(), object(), registry(), url(),
// load(), Debug.
// ---------------------------------------------------------------------------
macro_rules! object_wrapper {
    (
        $(#[$attr:meta])*
        $name:ident, classes = [$($class:expr),+ $(,)?]
    ) => {
        $(#[$attr])*
        #[derive(Clone)]
        pub struct $name {
            registry: std::sync::Arc<engine::Registry>,
            object: std::sync::Arc<engine::Object>,
        }

        impl $name {
            /// Endpoint classes this wrapper accepts.
            pub const CLASSES: &'static [&'static str] = &[$($class),+];

            /// Wraps `endpoint`, failing if it is not an object of one of [`Self::CLASSES`].
            pub fn from_endpoint(
                registry: std::sync::Arc<engine::Registry>,
                endpoint: engine::Endpoint,
            ) -> protocol::Result<Self> {
                let object = endpoint.into_object()?;
                if !Self::CLASSES.contains(&object.class()) {
                    return Err(protocol::LxdError::UnexpectedEndpoint {
                        url: object.url().to_string(),
                        expected: stringify!($name),
                    });
                }
                Ok(Self { registry, object })
            }

            /// The underlying cached object.
            pub fn object(&self) -> &std::sync::Arc<engine::Object> {
                &self.object
            }

            /// The registry this handle was resolved from.
            pub fn registry(&self) -> &std::sync::Arc<engine::Registry> {
                &self.registry
            }

            pub fn url(&self) -> &str {
                self.object.url()
            }

            /// Refreshes the fields from the server.
            pub async fn load(&self) -> protocol::Result<()> {
                self.object.load().await
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("url", &self.object.url())
                    .finish()
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for collection wrappers.
// Generates: struct, CLASSES, from_endpoint(), collection(), registry(), url(),
// load(), len(), is_empty(), keys(), contains(), get(), delete(), iter(), Debug.
// ---------------------------------------------------------------------------
macro_rules! collection_wrapper {
    (
        $(#[$attr:meta])*
        $name:ident, classes = [$($class:expr),+ $(,)?], child = $child:ident
    ) => {
        $(#[$attr])*
        #[derive(Clone)]
        pub struct $name {
            registry: std::sync::Arc<engine::Registry>,
            collection: std::sync::Arc<engine::Collection>,
        }

        impl $name {
            /// Endpoint classes this wrapper accepts.
            pub const CLASSES: &'static [&'static str] = &[$($class),+];

            /// Wraps `endpoint`, failing if it is not a collection of one of [`Self::CLASSES`].
            pub fn from_endpoint(
                registry: std::sync::Arc<engine::Registry>,
                endpoint: engine::Endpoint,
            ) -> protocol::Result<Self> {
                let collection = endpoint.into_collection()?;
                if !Self::CLASSES.contains(&collection.class()) {
                    return Err(protocol::LxdError::UnexpectedEndpoint {
                        url: collection.url().to_string(),
                        expected: stringify!($name),
                    });
                }
                Ok(Self {
                    registry,
                    collection,
                })
            }

            /// The underlying cached collection.
            pub fn collection(&self) -> &std::sync::Arc<engine::Collection> {
                &self.collection
            }

            /// The registry this handle was resolved from.
            pub fn registry(&self) -> &std::sync::Arc<engine::Registry> {
                &self.registry
            }

            pub fn url(&self) -> &str {
                self.collection.url()
            }

            /// Refreshes the item list from the server.
            pub async fn load(&self) -> protocol::Result<()> {
                self.collection.load().await
            }

            pub fn len(&self) -> usize {
                self.collection.len()
            }

            pub fn is_empty(&self) -> bool {
                self.collection.is_empty()
            }

            /// Leaf keys of all items, in load order.
            pub fn keys(&self) -> Vec<String> {
                self.collection.keys()
            }

            pub fn contains(&self, key: &str) -> bool {
                self.collection.contains(key)
            }

            /// Dereferences the item `key`.
            pub async fn get(&self, key: &str) -> protocol::Result<$child> {
                let endpoint = self.collection.get(&self.registry, key).await?;
                $child::from_endpoint(self.registry.clone(), endpoint)
            }

            /// Deletes the item `key` and reloads the collection.
            pub async fn delete(&self, key: &str) -> protocol::Result<()> {
                self.collection.delete(&self.registry, key).await
            }

            /// Dereferences every item in load order.
            pub fn iter(&self) -> futures::stream::BoxStream<'_, protocol::Result<$child>> {
                use futures::StreamExt;

                let registry = self.registry.clone();
                self.collection
                    .iter(&self.registry)
                    .map(move |endpoint| $child::from_endpoint(registry.clone(), endpoint?))
                    .boxed()
            }

            async fn create_child(
                &self,
                body: &serde_json::Value,
                key: &str,
            ) -> protocol::Result<$child> {
                let endpoint = self.collection.create(&self.registry, body, key).await?;
                $child::from_endpoint(self.registry.clone(), endpoint)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("url", &self.collection.url())
                    .field("items", &self.collection.len())
                    .finish()
            }
        }
    };
}

pub(crate) use collection_wrapper;
pub(crate) use object_wrapper;
