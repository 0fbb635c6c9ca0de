//! Projects.

use std::collections::BTreeMap;

use protocol::Result;
use serde::Serialize;
use tracing::info;

use crate::client::classes;
use crate::wrapper::{collection_wrapper, object_wrapper};

collection_wrapper! {
    Projects, classes = [classes::PROJECTS], child = Project
}

object_wrapper! {
    Project, classes = [classes::PROJECT]
}

/// Body of a project creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectCreate {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

impl ProjectCreate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            config: BTreeMap::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

impl Projects {
    pub async fn create(&self, request: &ProjectCreate) -> Result<Project> {
        let body = serde_json::to_value(request)?;
        let project = self.create_child(&body, &request.name).await?;
        info!(name = %request.name, "project created");
        Ok(project)
    }
}

impl Project {
    pub fn name(&self) -> Result<String> {
        self.object.get_as("name")
    }

    pub fn description(&self) -> Result<String> {
        self.object.get_as("description")
    }

    pub async fn set_description(&self, description: &str) -> Result<()> {
        self.object
            .edit(|edit| edit.set("description", description))
            .await
    }
}
