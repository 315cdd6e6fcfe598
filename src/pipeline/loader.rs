//! Permission-ordered resource loading.
//!
//! Loading runs in three phases, each completed for every model before the
//! next begins:
//!
//! 1. graph definitions are loaded with the run's default visibility,
//! 2. permissions are computed and applied to every model,
//! 3. resources are materialized by draining the client's enumeration.
//!
//! The phases are encoded as states of [`ResourceLoader`]; each transition
//! consumes the previous state, and lookups exist only on
//! [`ResourcesMaterialized`]. There is no way to materialize a resource
//! before its model's permissions are in place.

use futures::future::try_join_all;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::policy::PermissionGate;
use crate::progress::Progress;
use crate::safe_fs::read_json;
use crate::store::{GraphClient, ModelDescriptor, ResourceView};
use crate::types::{BusinessData, ResourceId, ResourceRequest};

const MISSING_RESOURCE_HINT: &str = "Could not load a resource, perhaps the graph is not in \
    prebuild/graphs.json or a dependency is missing in prebuild/prebuild.json?";

/// Models named, nothing loaded.
#[derive(Debug)]
pub struct Unloaded {
    model_ids: Vec<String>,
}

/// Graph definitions loaded.
#[derive(Debug)]
pub struct GraphsLoaded {
    models: Vec<ModelDescriptor>,
}

/// Permissions applied to every loaded model.
#[derive(Debug)]
pub struct PermissionsApplied {
    models: Vec<ModelDescriptor>,
}

/// Every resource of every model materialized into the client cache.
#[derive(Debug)]
pub struct ResourcesMaterialized {
    models: BTreeMap<String, ModelDescriptor>,
    resources: BTreeMap<String, Vec<ResourceId>>,
}

/// Loader over a graph client, in one of the loading states.
pub struct ResourceLoader<'c, C, S> {
    client: &'c C,
    include_private: bool,
    state: S,
}

impl<'c, C: GraphClient> ResourceLoader<'c, C, Unloaded> {
    /// Start loading the given models.
    pub fn new(client: &'c C, model_ids: Vec<String>, include_private: bool) -> Self {
        Self {
            client,
            include_private,
            state: Unloaded { model_ids },
        }
    }

    /// Phase 1: load every graph definition.
    pub async fn load_graphs(self, progress: &dyn Progress) -> Result<ResourceLoader<'c, C, GraphsLoaded>> {
        let total = self.state.model_ids.len();
        let mut models = Vec::with_capacity(total);
        for (i, model_id) in self.state.model_ids.iter().enumerate() {
            progress.log(&format!("Loading graph: {model_id}"));
            progress.progress("graph-loading", "Loading graphs", i + 1, total);
            let descriptor = self
                .client
                .load_graph(model_id, self.include_private)
                .await
                .map_err(|e| PipelineError::from_collaborator("graph client", e))?;
            models.push(descriptor);
        }
        Ok(ResourceLoader {
            client: self.client,
            include_private: self.include_private,
            state: GraphsLoaded { models },
        })
    }
}

impl<'c, C: GraphClient> ResourceLoader<'c, C, GraphsLoaded> {
    /// Phase 2: compute and apply permissions for every model.
    pub async fn apply_permissions(
        self,
        gate: &mut PermissionGate,
        progress: &dyn Progress,
    ) -> Result<ResourceLoader<'c, C, PermissionsApplied>> {
        for model in &self.state.models {
            progress.log(&format!("Applying permissions for: {}", model.model_class_name));
            if self.include_private || gate.include_private() {
                self.client
                    .set_default_allow_all_nodegroups(&model.graph_id, true)
                    .await
                    .map_err(|e| PipelineError::from_collaborator("graph client", e))?;
                continue;
            }
            let permitted = gate.permitted_nodegroups(model).await?;
            self.client
                .set_permitted_nodegroups(&model.graph_id, permitted)
                .await
                .map_err(|e| PipelineError::from_collaborator("graph client", e))?;
        }
        Ok(ResourceLoader {
            client: self.client,
            include_private: self.include_private,
            state: PermissionsApplied {
                models: self.state.models,
            },
        })
    }

    /// Loaded model definitions.
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.state.models
    }
}

impl<'c, C: GraphClient> ResourceLoader<'c, C, PermissionsApplied> {
    /// Phase 3: drain every model's enumeration into the client cache.
    pub async fn materialize(self, progress: &dyn Progress) -> Result<ResourceLoader<'c, C, ResourcesMaterialized>> {
        let mut resources = BTreeMap::new();
        for model in &self.state.models {
            progress.log(&format!("Loading resources for: {}", model.graph_id));
            let task = format!("resource-loading-{}", model.graph_id);
            let mut ids = Vec::new();
            let mut stream = self.client.load_all(&model.graph_id);
            while let Some(id) = stream.next().await {
                let id = id.map_err(|e| {
                    tracing::error!(graph_id = %model.graph_id, "{MISSING_RESOURCE_HINT}");
                    PipelineError::from_collaborator("graph client", e)
                })?;
                ids.push(id);
                if ids.len() % 100 == 0 {
                    progress.progress(&task, "Loading resources", ids.len(), ids.len() + 1);
                }
            }
            progress.progress(&task, "Loading resources", ids.len(), ids.len());
            tracing::info!(graph_id = %model.graph_id, count = ids.len(), "Loaded resources");
            resources.insert(model.graph_id.clone(), ids);
        }
        let models = self
            .state
            .models
            .into_iter()
            .map(|m| (m.graph_id.clone(), m))
            .collect();
        Ok(ResourceLoader {
            client: self.client,
            include_private: self.include_private,
            state: ResourcesMaterialized { models, resources },
        })
    }
}

impl<'c, C: GraphClient> ResourceLoader<'c, C, ResourcesMaterialized> {
    /// Loaded model definition by graph id.
    pub fn model(&self, graph_id: &str) -> Option<&ModelDescriptor> {
        self.state.models.get(graph_id)
    }

    /// Identifiers materialized for a model.
    pub fn resource_ids(&self, graph_id: &str) -> &[ResourceId] {
        self.state
            .resources
            .get(graph_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Resolve `requests` in batches of `batch_size`.
    ///
    /// Lookups within a batch run concurrently; batches run one after the
    /// other with control yielded in between. The first failed lookup fails
    /// the whole call.
    pub async fn resolve(
        &self,
        requests: &[ResourceRequest],
        batch_size: usize,
        progress: &dyn Progress,
    ) -> Result<Vec<C::Resource>> {
        let total = requests.len();
        let mut resolved = Vec::with_capacity(total);
        for batch in requests.chunks(batch_size.max(1)) {
            let lookups = batch.iter().map(|request| async move {
                self.client
                    .find(&request.graph_id, &request.resource_id)
                    .await
                    .map_err(|e| PipelineError::LookupFailure {
                        graph_id: request.graph_id.clone(),
                        resource_id: request.resource_id.to_string(),
                        reason: e.to_string(),
                    })
            });
            let handles = try_join_all(lookups).await.map_err(|e| {
                tracing::error!("{MISSING_RESOURCE_HINT}");
                e
            })?;
            resolved.extend(handles);
            progress.progress("resource-resolve", "Resolving resources", resolved.len(), total);
            tokio::task::yield_now().await;
        }
        Ok(resolved)
    }

    /// Resolve every materialized resource of one model.
    pub async fn resolve_model(
        &self,
        graph_id: &str,
        batch_size: usize,
        progress: &dyn Progress,
    ) -> Result<Vec<C::Resource>> {
        let requests: Vec<ResourceRequest> = self
            .resource_ids(graph_id)
            .iter()
            .map(|id| ResourceRequest {
                graph_id: graph_id.to_string(),
                resource_id: id.clone(),
            })
            .collect();
        self.resolve(&requests, batch_size, progress).await
    }

    /// Build the id → display name directory of the registry model.
    ///
    /// Resources without a display name are left out of the directory.
    pub async fn registry_directory(
        &self,
        registry_graph_id: &str,
        batch_size: usize,
        progress: &dyn Progress,
    ) -> Result<BTreeMap<String, String>> {
        let registries = self
            .resolve_model(registry_graph_id, batch_size, progress)
            .await?;

        let mut directory = BTreeMap::new();
        for registry in &registries {
            let name = registry
                .display_name()
                .await
                .map_err(|e| PipelineError::from_collaborator("graph client", e))?;
            match name {
                Some(name) => {
                    directory.insert(registry.id().to_string(), name);
                }
                None => tracing::warn!(registry = %registry.id(), "Registry has no primary name"),
            }
        }
        tracing::info!(count = directory.len(), "Loaded registries");
        Ok(directory)
    }
}

/// Run all three phases for `model_ids`.
pub async fn load_models<'c, C: GraphClient>(
    client: &'c C,
    model_ids: Vec<String>,
    gate: &mut PermissionGate,
    progress: &dyn Progress,
) -> Result<ResourceLoader<'c, C, ResourcesMaterialized>> {
    let include_private = gate.include_private();
    ResourceLoader::new(client, model_ids, include_private)
        .load_graphs(progress)
        .await?
        .apply_permissions(gate, progress)
        .await?
        .materialize(progress)
        .await
}

/// Load the registry model on its own and build its id → display name directory.
pub async fn load_registries<C: GraphClient>(
    client: &C,
    registry_graph_id: &str,
    gate: &mut PermissionGate,
    batch_size: usize,
    progress: &dyn Progress,
) -> Result<BTreeMap<String, String>> {
    load_models(client, vec![registry_graph_id.to_string()], gate, progress)
        .await?
        .registry_directory(registry_graph_id, batch_size, progress)
        .await
}

/// Registry model first, then every other model once, in the given order.
fn with_registry_first(registry_graph_id: &str, model_ids: Vec<String>) -> Vec<String> {
    let mut ordered = vec![registry_graph_id.to_string()];
    ordered.extend(model_ids.into_iter().filter(|id| id != registry_graph_id));
    ordered
}

/// Load every configured model and resolve the resources declared in `files`.
///
/// The registry model is always loaded, ahead of the others and in the same
/// three-phase pass; its directory is recorded in `ctx`. Resources are
/// returned in file order.
pub async fn get_all_from<C: GraphClient>(
    client: &C,
    ctx: &mut RunContext,
    config: &PipelineConfig,
    model_ids: Vec<String>,
    gate: &mut PermissionGate,
    files: &[PathBuf],
    progress: &dyn Progress,
) -> Result<Vec<C::Resource>> {
    let mut requests = Vec::new();
    for file in files {
        let data: BusinessData = read_json(file).await?;
        requests.extend(data.requests()?);
    }

    let model_ids = with_registry_first(&config.registry_graph_id, model_ids);
    let loader = load_models(client, model_ids, gate, progress).await?;
    ctx.registry_directory = loader
        .registry_directory(&config.registry_graph_id, config.resolve_batch_size, progress)
        .await?;

    progress.log(&format!(
        "Resolving {} resources from {} files",
        requests.len(),
        files.len()
    ));
    loader
        .resolve(&requests, config.resolve_batch_size, progress)
        .await
}
