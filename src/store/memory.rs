//! In-memory graph client for testing.
//!
//! Stored resources are tile maps keyed by nodegroup alias. A resource is
//! materialized (tiles filtered by the model's permissions at that moment)
//! when it is streamed through [`GraphClient::load_all`] or first looked up
//! with [`GraphClient::find`], and the materialized view is cached by
//! resource identifier.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::policy::PermittedNodegroups;
use crate::types::{BusinessData, ResourceId};
use super::{GraphClient, ModelDescriptor, ResourceView};

/// Error type for the in-memory client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryClientError {
    /// No model registered under this graph id.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Resources requested before the graph was loaded.
    #[error("Graph not loaded: {0}")]
    GraphNotLoaded(String),

    /// No such resource in the model.
    #[error("Resource {id} not found in model {model_id}")]
    ResourceNotFound {
        /// Model searched.
        model_id: String,
        /// Missing resource.
        id: ResourceId,
    },

    /// A stored document without a usable header.
    #[error("Malformed resource document: {0}")]
    MalformedResource(String),

    /// A source file that could not be read.
    #[error("Could not read source file {path}: {reason}")]
    SourceFile {
        /// File path.
        path: String,
        /// Read or parse failure.
        reason: String,
    },
}

/// A stored, unpermissioned resource.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResource {
    /// Resource identifier.
    pub id: ResourceId,
    /// Display name.
    pub name: Option<String>,
    /// Tile data by nodegroup alias.
    pub tiles: BTreeMap<String, Value>,
}

impl StoredResource {
    /// Create an empty resource.
    pub fn new(id: impl Into<ResourceId>, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            tiles: BTreeMap::new(),
        }
    }

    /// Add a tile.
    pub fn with_tile(mut self, alias: impl Into<String>, data: Value) -> Self {
        self.tiles.insert(alias.into(), data);
        self
    }

    /// Parse a stored resource document.
    ///
    /// ```json
    /// {"resourceinstance": {"resourceinstanceid": "..", "graph_id": "..", "name": ".."},
    ///  "tiles": [{"nodegroup_alias": "names", "data": {..}}]}
    /// ```
    pub fn from_document(document: &Value) -> Result<(String, Self), MemoryClientError> {
        let header = document
            .get("resourceinstance")
            .ok_or_else(|| MemoryClientError::MalformedResource("missing resourceinstance".into()))?;
        let field = |key: &str| header.get(key).and_then(Value::as_str);
        let id = field("resourceinstanceid")
            .ok_or_else(|| MemoryClientError::MalformedResource("missing resourceinstanceid".into()))?;
        let graph_id = field("graph_id")
            .ok_or_else(|| MemoryClientError::MalformedResource(format!("{id} has no graph_id")))?;

        let mut resource = Self::new(id, field("name"));
        for tile in document.get("tiles").and_then(Value::as_array).into_iter().flatten() {
            if let Some(alias) = tile.get("nodegroup_alias").and_then(Value::as_str) {
                resource
                    .tiles
                    .insert(alias.to_string(), tile.get("data").cloned().unwrap_or(Value::Null));
            }
        }
        Ok((graph_id.to_string(), resource))
    }
}

/// A materialized resource handle.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryResource {
    id: ResourceId,
    graph_id: String,
    model_class_name: String,
    name: Option<String>,
    view: Value,
    document: Value,
}

impl MemoryResource {
    /// Aliases of the tiles that survived permission filtering.
    pub fn visible_aliases(&self) -> Vec<&str> {
        self.view
            .as_object()
            .map(|view| view.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResourceView for MemoryResource {
    type Error = MemoryClientError;

    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn graph_id(&self) -> &str {
        &self.graph_id
    }

    fn model_class_name(&self) -> &str {
        &self.model_class_name
    }

    async fn display_name(&self) -> Result<Option<String>, Self::Error> {
        Ok(self.name.clone())
    }

    async fn for_json(&self, _detailed: bool) -> Result<Value, Self::Error> {
        Ok(self.view.clone())
    }

    async fn resource_document(&self) -> Result<Value, Self::Error> {
        Ok(self.document.clone())
    }
}

#[derive(Debug)]
struct ModelState {
    descriptor: ModelDescriptor,
    loaded: bool,
    default_allow_all: bool,
    permitted: Option<PermittedNodegroups>,
    resources: BTreeMap<ResourceId, StoredResource>,
}

impl ModelState {
    fn effective_permissions(&self) -> PermittedNodegroups {
        if self.default_allow_all {
            return PermittedNodegroups::All;
        }
        self.permitted.clone().unwrap_or(PermittedNodegroups::None)
    }
}

/// In-memory graph client for testing.
///
/// Uses BTreeMap for deterministic enumeration order.
#[derive(Debug, Default)]
pub struct InMemoryGraphClient {
    models: RwLock<HashMap<String, ModelState>>,
    cache: RwLock<HashMap<ResourceId, MemoryResource>>,
    materialized: AtomicUsize,
    uncached_finds: AtomicUsize,
}

impl InMemoryGraphClient {
    /// Create an empty client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model.
    pub fn add_model(&mut self, descriptor: ModelDescriptor) {
        self.models.get_mut().insert(
            descriptor.graph_id.clone(),
            ModelState {
                descriptor,
                loaded: false,
                default_allow_all: false,
                permitted: None,
                resources: BTreeMap::new(),
            },
        );
    }

    /// Register a model from a graph definition.
    pub fn add_graph(&mut self, graph: &Value) {
        self.add_model(ModelDescriptor::from_graph(graph));
    }

    /// Store a resource under a registered model.
    pub fn add_resource(&mut self, model_id: &str, resource: StoredResource) -> Result<(), MemoryClientError> {
        insert_resource(self.models.get_mut(), model_id, resource)
    }

    /// Store every resource of a business-data file.
    pub fn add_business_data(&self, data: &BusinessData) -> Result<usize, MemoryClientError> {
        let mut models = self.models.write();
        let mut added = 0;
        for document in &data.business_data.resources {
            let (graph_id, resource) = StoredResource::from_document(document)?;
            insert_resource(&mut models, &graph_id, resource)?;
            added += 1;
        }
        Ok(added)
    }

    /// Number of materializations performed so far.
    pub fn materialized_count(&self) -> usize {
        self.materialized.load(Ordering::Relaxed)
    }

    /// Number of [`GraphClient::find`] calls that missed the cache.
    pub fn uncached_finds(&self) -> usize {
        self.uncached_finds.load(Ordering::Relaxed)
    }

    /// Number of cached resources.
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    fn resource_ids(&self, model_id: &str) -> Result<Vec<ResourceId>, MemoryClientError> {
        let models = self.models.read();
        let state = models
            .get(model_id)
            .ok_or_else(|| MemoryClientError::UnknownModel(model_id.to_string()))?;
        if !state.loaded {
            return Err(MemoryClientError::GraphNotLoaded(model_id.to_string()));
        }
        Ok(state.resources.keys().cloned().collect())
    }

    fn materialize(&self, model_id: &str, id: &ResourceId) -> Result<MemoryResource, MemoryClientError> {
        let models = self.models.read();
        let state = models
            .get(model_id)
            .ok_or_else(|| MemoryClientError::UnknownModel(model_id.to_string()))?;
        if !state.loaded {
            return Err(MemoryClientError::GraphNotLoaded(model_id.to_string()));
        }
        let stored = state
            .resources
            .get(id)
            .ok_or_else(|| MemoryClientError::ResourceNotFound {
                model_id: model_id.to_string(),
                id: id.clone(),
            })?;

        let permitted = state.effective_permissions();
        let mut view = Map::new();
        let mut tiles = Vec::new();
        for (alias, data) in &stored.tiles {
            let mut tile = Map::new();
            tile.insert(alias.clone(), data.clone());
            if permitted.permits(alias, &Value::Object(tile)) {
                view.insert(alias.clone(), data.clone());
                tiles.push(json!({"nodegroup_alias": alias, "data": data}));
            }
        }

        let document = json!({
            "resourceinstance": {
                "resourceinstanceid": id.as_str(),
                "graph_id": model_id,
                "name": stored.name,
            },
            "tiles": tiles,
        });
        self.materialized.fetch_add(1, Ordering::Relaxed);

        Ok(MemoryResource {
            id: id.clone(),
            graph_id: model_id.to_string(),
            model_class_name: state.descriptor.model_class_name.clone(),
            name: stored.name.clone(),
            view: Value::Object(view),
            document,
        })
    }

    fn with_model<F>(&self, model_id: &str, f: F) -> Result<(), MemoryClientError>
    where
        F: FnOnce(&mut ModelState),
    {
        let mut models = self.models.write();
        let state = models
            .get_mut(model_id)
            .ok_or_else(|| MemoryClientError::UnknownModel(model_id.to_string()))?;
        f(state);
        Ok(())
    }
}

fn insert_resource(
    models: &mut HashMap<String, ModelState>,
    model_id: &str,
    resource: StoredResource,
) -> Result<(), MemoryClientError> {
    let state = models
        .get_mut(model_id)
        .ok_or_else(|| MemoryClientError::UnknownModel(model_id.to_string()))?;
    state.resources.insert(resource.id.clone(), resource);
    Ok(())
}

#[async_trait]
impl GraphClient for InMemoryGraphClient {
    type Error = MemoryClientError;
    type Resource = MemoryResource;

    async fn add_source_files(&self, files: &[PathBuf]) -> Result<usize, Self::Error> {
        let mut added = 0;
        for path in files {
            let source_error = |reason: String| MemoryClientError::SourceFile {
                path: path.display().to_string(),
                reason,
            };
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| source_error(e.to_string()))?;
            let data: BusinessData =
                serde_json::from_str(&content).map_err(|e| source_error(e.to_string()))?;
            added += self.add_business_data(&data)?;
        }
        Ok(added)
    }

    async fn load_graph(
        &self,
        model_id: &str,
        include_private: bool,
    ) -> Result<ModelDescriptor, Self::Error> {
        let mut models = self.models.write();
        let state = models
            .get_mut(model_id)
            .ok_or_else(|| MemoryClientError::UnknownModel(model_id.to_string()))?;
        state.loaded = true;
        state.default_allow_all = include_private;
        Ok(state.descriptor.clone())
    }

    async fn set_permitted_nodegroups(
        &self,
        model_id: &str,
        permitted: PermittedNodegroups,
    ) -> Result<(), Self::Error> {
        self.with_model(model_id, |state| state.permitted = Some(permitted))
    }

    async fn set_default_allow_all_nodegroups(
        &self,
        model_id: &str,
        allow: bool,
    ) -> Result<(), Self::Error> {
        self.with_model(model_id, |state| state.default_allow_all = allow)
    }

    fn load_all<'a>(&'a self, model_id: &'a str) -> BoxStream<'a, Result<ResourceId, Self::Error>> {
        let ids = match self.resource_ids(model_id) {
            Ok(ids) => ids,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        stream::iter(ids)
            .map(move |id| {
                let resource = self.materialize(model_id, &id)?;
                self.cache.write().insert(id.clone(), resource);
                Ok(id)
            })
            .boxed()
    }

    async fn find(&self, model_id: &str, id: &ResourceId) -> Result<Self::Resource, Self::Error> {
        if let Some(cached) = self.cache.read().get(id) {
            if cached.graph_id == model_id {
                return Ok(cached.clone());
            }
            return Err(MemoryClientError::ResourceNotFound {
                model_id: model_id.to_string(),
                id: id.clone(),
            });
        }
        self.uncached_finds.fetch_add(1, Ordering::Relaxed);
        let resource = self.materialize(model_id, id)?;
        self.cache.write().insert(id.clone(), resource.clone());
        Ok(resource)
    }
}
