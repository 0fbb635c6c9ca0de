//! Objects: endpoints for a single remote resource.
//!
//! An [`Object`] holds the field map last loaded from its URL. Fields are
//! read directly; they change only through [`Object::load`] or a committed
//! [`Edit`]. An edit works on a private copy of the fields: committing PUTs
//! the writable fields and reloads, dropping it leaves the object untouched.
//!
//! Unsaved changes live only on the [`Edit`], so the object itself is always
//! clean: its fields are exactly what the last load returned. A reload wins
//! over any edit opened before it; committing such an edit fails with
//! [`LxdError::StaleEdit`] and sends nothing.
//!
//! ```text
//! Unloaded ──load──▶ Loaded ──begin_edit──▶ Editing ──commit──▶ Loaded
//!                                              ├──drop/abort──▶ Loaded (unchanged)
//!                                              └──load──▶ Loaded (edit discarded)
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use protocol::{LxdError, Method, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::endpoint::Loadable;
use crate::operation::OperationEngine;

#[derive(Debug, Default)]
struct ObjectState {
    fields: Map<String, Value>,
    loaded: bool,
    /// Bumped by every load; edits remember the one they started from.
    generation: u64,
}

/// A single remote resource with a field map.
pub struct Object {
    url: String,
    class: &'static str,
    readonly: &'static [&'static str],
    engine: Arc<OperationEngine>,
    state: Mutex<ObjectState>,
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("url", &self.url)
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}

impl Object {
    /// Creates an unloaded object. The registry loads it before handing it out.
    pub fn new(
        url: impl Into<String>,
        class: &'static str,
        readonly: &'static [&'static str],
        engine: Arc<OperationEngine>,
    ) -> Self {
        Self {
            url: url.into(),
            class,
            readonly,
            engine,
            state: Mutex::new(ObjectState::default()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn is_loaded(&self) -> bool {
        self.state().loaded
    }

    /// Returns `true` if `name` is excluded from writes.
    pub fn is_readonly(&self, name: &str) -> bool {
        self.readonly.contains(&name)
    }

    /// GETs the URL and replaces the field map wholesale. Edits started
    /// before the reload are discarded: their commit fails.
    pub async fn load(&self) -> Result<()> {
        let metadata = self.engine.query(Method::Get, &self.url, None).await?;
        let Value::Object(fields) = metadata else {
            return Err(LxdError::protocol(format!(
                "object '{}' did not load as a JSON object",
                self.url
            )));
        };
        let mut state = self.state();
        state.fields = fields;
        state.loaded = true;
        state.generation += 1;
        Ok(())
    }

    /// Returns the value of field `name`.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.state()
            .fields
            .get(name)
            .cloned()
            .ok_or_else(|| LxdError::UnknownField {
                name: name.to_string(),
            })
    }

    /// Returns field `name` converted to `T`.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        Ok(serde_json::from_value(self.get(name)?)?)
    }

    /// Returns a snapshot of every field.
    pub fn fields(&self) -> Map<String, Value> {
        self.state().fields.clone()
    }

    /// Converts the whole field map into a typed record. Unknown fields are
    /// left to the record's own serde attributes.
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields()))?)
    }

    /// Starts an edit over a copy of the current fields.
    pub fn begin_edit(&self) -> Edit<'_> {
        let state = self.state();
        Edit {
            object: self,
            fields: state.fields.clone(),
            generation: state.generation,
            dirty: BTreeSet::new(),
        }
    }

    /// Runs `apply` against a fresh edit and commits it if `apply` succeeds.
    /// If `apply` fails, no request is sent and the object is unchanged.
    pub async fn edit<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Edit<'_>) -> Result<()>,
    {
        let mut edit = self.begin_edit();
        apply(&mut edit)?;
        edit.commit().await
    }

    /// PUTs the writable subset of `fields`, then reloads.
    async fn save(&self, fields: Map<String, Value>) -> Result<()> {
        let payload: Map<String, Value> = fields
            .into_iter()
            .filter(|(name, _)| !self.is_readonly(name))
            .collect();
        debug!(url = %self.url, fields = payload.len(), "saving object");
        self.engine
            .query(Method::Put, &self.url, Some(&Value::Object(payload)))
            .await?;
        // The server may derive fields from the ones written.
        self.load().await
    }

    fn state(&self) -> MutexGuard<'_, ObjectState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Loadable for Object {
    fn url(&self) -> &str {
        &self.url
    }

    fn class(&self) -> &'static str {
        self.class
    }

    async fn load(&self) -> Result<()> {
        Object::load(self).await
    }
}

// ---------------------------------------------------------------------------
// Edit scope
// ---------------------------------------------------------------------------

/// A mutable copy of an object's fields.
///
/// Assignments are checked immediately: readonly and unknown fields fail
/// before anything is sent. [`Edit::commit`] writes the copy back; dropping
/// the edit discards it.
#[derive(Debug)]
pub struct Edit<'a> {
    object: &'a Object,
    fields: Map<String, Value>,
    generation: u64,
    dirty: BTreeSet<String>,
}

impl Edit<'_> {
    pub fn get(&self, name: &str) -> Result<&Value> {
        self.fields.get(name).ok_or_else(|| LxdError::UnknownField {
            name: name.to_string(),
        })
    }

    /// Assigns `value` to an existing, writable field.
    pub fn set(&mut self, name: &str, value: impl Serialize) -> Result<()> {
        if self.object.is_readonly(name) {
            return Err(LxdError::ReadonlyField {
                name: name.to_string(),
            });
        }
        let value = serde_json::to_value(value)?;
        let slot = self
            .fields
            .get_mut(name)
            .ok_or_else(|| LxdError::UnknownField {
                name: name.to_string(),
            })?;
        if *slot != value {
            *slot = value;
            self.dirty.insert(name.to_string());
        }
        Ok(())
    }

    /// Returns `true` if at least one field was changed.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Names of the fields changed so far.
    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    /// PUTs every writable field and reloads the object.
    ///
    /// Fails with [`LxdError::StaleEdit`], without sending anything, if the
    /// object was reloaded after the edit began.
    pub async fn commit(self) -> Result<()> {
        if self.object.state().generation != self.generation {
            debug!(url = %self.object.url, dirty = ?self.dirty, "edit discarded by reload");
            return Err(LxdError::StaleEdit {
                url: self.object.url.clone(),
            });
        }
        debug!(url = %self.object.url, dirty = ?self.dirty, "committing edit");
        self.object.save(self.fields).await
    }

    /// Discards the edit. Equivalent to dropping it.
    pub fn abort(self) {}
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::config::EngineConfig;
    use crate::testing::{async_response, completed, sync_response, MockTransport};

    const URL: &str = "/1.0/instances/c1";

    fn object(transport: &Arc<MockTransport>) -> Object {
        let engine = Arc::new(OperationEngine::new(transport.clone(), EngineConfig::default()));
        Object::new(URL, "instance", &["status"], engine)
    }

    fn transport() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            Method::Get,
            URL,
            sync_response(json!({"description": "old", "ephemeral": true, "status": "Running"})),
        );
        transport
    }

    #[tokio::test]
    async fn load_populates_fields() {
        let transport = transport();
        let object = object(&transport);
        assert!(!object.is_loaded());

        object.load().await.unwrap();

        assert!(object.is_loaded());
        assert_eq!(object.get("description").unwrap(), json!("old"));
        assert!(object.get_as::<bool>("ephemeral").unwrap());
        assert!(matches!(
            object.get("missing"),
            Err(LxdError::UnknownField { .. })
        ));
    }

    #[tokio::test]
    async fn repeated_loads_yield_identical_fields() {
        let transport = transport();
        let object = object(&transport);

        object.load().await.unwrap();
        let first = object.fields();
        object.load().await.unwrap();

        assert_eq!(first, object.fields());
    }

    #[tokio::test]
    async fn commit_puts_writable_fields_and_reloads() {
        let transport = transport();
        let object = object(&transport);
        object.load().await.unwrap();
        transport.on(Method::Put, URL, async_response("op1", json!({})));
        transport.on(Method::Get, "/1.0/operations/op1/wait", completed(200));
        transport.on(
            Method::Get,
            URL,
            sync_response(json!({"description": "new", "ephemeral": true, "status": "Running"})),
        );

        object
            .edit(|edit| {
                edit.set("description", "new")?;
                assert!(edit.is_dirty());
                Ok(())
            })
            .await
            .unwrap();

        let put = transport
            .requests()
            .into_iter()
            .find(|request| request.method == Method::Put)
            .unwrap();
        assert_eq!(put.body, Some(json!({"description": "new", "ephemeral": true})));
        assert_eq!(object.get("description").unwrap(), json!("new"));
        assert_eq!(transport.count(Method::Get, URL), 2);
    }

    #[tokio::test]
    async fn readonly_assignment_fails_without_network() {
        let transport = transport();
        let object = object(&transport);
        object.load().await.unwrap();
        let before = transport.requests().len();

        let err = object
            .edit(|edit| edit.set("status", "Stopped"))
            .await
            .unwrap_err();

        assert!(matches!(err, LxdError::ReadonlyField { ref name } if name == "status"));
        assert_eq!(transport.requests().len(), before);
        assert_eq!(object.get("status").unwrap(), json!("Running"));
    }

    #[tokio::test]
    async fn failed_edit_leaves_object_unchanged() {
        let transport = transport();
        let object = object(&transport);
        object.load().await.unwrap();

        let err = object
            .edit(|edit| {
                edit.set("description", "changed")?;
                Err(LxdError::Inconsistent {
                    message: "caller bailed out".into(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LxdError::Inconsistent { .. }));
        assert_eq!(object.get("description").unwrap(), json!("old"));
        assert_eq!(transport.count(Method::Put, URL), 0);
    }

    #[tokio::test]
    async fn dropped_edit_is_discarded() {
        let transport = transport();
        let object = object(&transport);
        object.load().await.unwrap();

        let mut edit = object.begin_edit();
        edit.set("description", "draft").unwrap();
        assert_eq!(edit.dirty_fields().collect::<Vec<_>>(), vec!["description"]);
        edit.abort();

        assert_eq!(object.get("description").unwrap(), json!("old"));
    }

    #[tokio::test]
    async fn reload_discards_open_edit() {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            Method::Get,
            URL,
            sync_response(json!({"description": "old", "limit": 1})),
        );
        let object = object(&transport);
        object.load().await.unwrap();

        let mut edit = object.begin_edit();
        edit.set("description", "draft").unwrap();
        transport.on(
            Method::Get,
            URL,
            sync_response(json!({"description": "old", "limit": 2})),
        );
        object.load().await.unwrap();

        let err = edit.commit().await.unwrap_err();

        assert!(matches!(err, LxdError::StaleEdit { ref url } if url == URL));
        assert!(err.is_local());
        assert_eq!(transport.count(Method::Put, URL), 0);
        assert_eq!(object.get("limit").unwrap(), json!(2));
        assert_eq!(object.get("description").unwrap(), json!("old"));
    }

    #[tokio::test]
    async fn edit_started_after_reload_commits() {
        let transport = transport();
        let object = object(&transport);
        object.load().await.unwrap();
        object.load().await.unwrap();
        transport.on(Method::Put, URL, sync_response(json!({})));

        let mut edit = object.begin_edit();
        edit.set("description", "new").unwrap();
        edit.commit().await.unwrap();

        assert_eq!(transport.count(Method::Put, URL), 1);
    }

    #[tokio::test]
    async fn assigning_the_same_value_is_not_dirty() {
        let transport = transport();
        let object = object(&transport);
        object.load().await.unwrap();

        let mut edit = object.begin_edit();
        edit.set("ephemeral", true).unwrap();
        assert!(!edit.is_dirty());
        assert!(matches!(
            edit.set("nope", 1),
            Err(LxdError::UnknownField { .. })
        ));
    }

    #[tokio::test]
    async fn fields_convert_to_typed_record() {
        #[derive(Deserialize)]
        struct Record {
            description: String,
            status: String,
        }

        let transport = transport();
        let object = object(&transport);
        object.load().await.unwrap();

        let record: Record = object.to_record().unwrap();
        assert_eq!(record.description, "old");
        assert_eq!(record.status, "Running");
    }
}
