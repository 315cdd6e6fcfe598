//! Graph/resource client boundary.
//!
//! The resource-graph data model and its resolution engine live outside
//! this crate. The pipeline drives them through [`GraphClient`], which must
//! keep a cache keyed by resource identifier: resources materialized by
//! [`GraphClient::load_all`] are later served by [`GraphClient::find`]
//! without a fresh, unpermissioned load.

pub mod accessor;
pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::policy::PermittedNodegroups;
use crate::types::ResourceId;

/// One node of a graph definition, as far as permissions need to know it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node identifier.
    pub node_id: String,
    /// Node alias.
    pub alias: String,
    /// Nodegroup the node belongs to.
    pub nodegroup_id: Option<String>,
    /// Reference-data collection configured on the node.
    pub collection: Option<String>,
}

/// Loaded graph definition summary returned by [`GraphClient::load_graph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Graph identifier.
    pub graph_id: String,
    /// Model class name used as the permission policy key.
    pub model_class_name: String,
    /// Nodes by alias.
    pub nodes: BTreeMap<String, NodeInfo>,
}

impl ModelDescriptor {
    /// Summarize a graph definition (one element of a graph file's `graph` array).
    pub fn from_graph(graph: &Value) -> Self {
        let str_field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);
        let graph_id = str_field(graph, "graphid").unwrap_or_default();
        let name = str_field(graph, "name").unwrap_or_default();
        let nodes = graph
            .get("nodes")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|node| {
                let alias = str_field(node, "alias")?;
                Some((
                    alias.clone(),
                    NodeInfo {
                        node_id: str_field(node, "nodeid").unwrap_or_default(),
                        alias,
                        nodegroup_id: str_field(node, "nodegroup_id"),
                        collection: node
                            .pointer("/config/rdmCollection")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    },
                ))
            })
            .collect();
        Self {
            graph_id,
            model_class_name: model_class_name(&name),
            nodes,
        }
    }

    /// Alias of the node that names a nodegroup (the node whose id is the nodegroup id).
    pub fn nodegroup_alias(&self, nodegroup_id: &str) -> Option<&str> {
        self.nodes
            .values()
            .find(|node| node.node_id == nodegroup_id)
            .map(|node| node.alias.as_str())
    }
}

/// Derive a model class name from a graph display name (`Heritage Asset` → `HeritageAsset`).
pub fn model_class_name(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// A resolved resource.
#[async_trait]
pub trait ResourceView: Send + Sync {
    /// Error type for lazy reads.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resource identifier.
    fn id(&self) -> &ResourceId;

    /// Owning graph identifier.
    fn graph_id(&self) -> &str;

    /// Model class name of the owning graph.
    fn model_class_name(&self) -> &str;

    /// Display name, if the model defines one.
    async fn display_name(&self) -> Result<Option<String>, Self::Error>;

    /// Plain JSON tree of the permitted data.
    async fn for_json(&self, detailed: bool) -> Result<Value, Self::Error>;

    /// Stored resource document to publish, restricted to permitted data.
    async fn resource_document(&self) -> Result<Value, Self::Error>;
}

/// External graph/resource client.
///
/// Implementations must guarantee that permissions set for a model apply to
/// every resource of that model materialized afterwards.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Error type for client operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resolved resource handle.
    type Resource: ResourceView<Error = Self::Error>;

    /// Make the resources of business-data files available to [`GraphClient::load_all`].
    ///
    /// Returns the number of resources added.
    async fn add_source_files(&self, files: &[PathBuf]) -> Result<usize, Self::Error>;

    /// Load a graph definition with the given default nodegroup visibility.
    async fn load_graph(
        &self,
        model_id: &str,
        include_private: bool,
    ) -> Result<ModelDescriptor, Self::Error>;

    /// Restrict the nodegroups of a model.
    async fn set_permitted_nodegroups(
        &self,
        model_id: &str,
        permitted: PermittedNodegroups,
    ) -> Result<(), Self::Error>;

    /// Allow every nodegroup of a model regardless of restrictions.
    async fn set_default_allow_all_nodegroups(
        &self,
        model_id: &str,
        allow: bool,
    ) -> Result<(), Self::Error>;

    /// Stream every resource of a model into the cache.
    fn load_all<'a>(&'a self, model_id: &'a str) -> BoxStream<'a, Result<ResourceId, Self::Error>>;

    /// Look up one resource.
    async fn find(&self, model_id: &str, id: &ResourceId) -> Result<Self::Resource, Self::Error>;
}

pub use accessor::{is_present, FieldAccessor, FieldPath};
pub use memory::{InMemoryGraphClient, MemoryClientError, MemoryResource, StoredResource};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_class_name() {
        assert_eq!(model_class_name("Heritage Asset"), "HeritageAsset");
        assert_eq!(model_class_name("registry"), "Registry");
        assert_eq!(model_class_name("person_or-group"), "PersonOrGroup");
    }

    #[test]
    fn test_descriptor_from_graph() {
        let graph = json!({
            "graphid": "g1",
            "name": "Heritage Asset",
            "nodes": [
                {"nodeid": "n1", "alias": "names", "nodegroup_id": "n1"},
                {"nodeid": "n2", "alias": "status", "nodegroup_id": "n1",
                 "config": {"rdmCollection": "c1"}},
                {"nodeid": "root", "alias": "heritage_asset", "nodegroup_id": null}
            ]
        });
        let descriptor = ModelDescriptor::from_graph(&graph);
        assert_eq!(descriptor.model_class_name, "HeritageAsset");
        assert_eq!(descriptor.nodes["status"].collection.as_deref(), Some("c1"));
        assert_eq!(descriptor.nodes["heritage_asset"].nodegroup_id, None);
        assert_eq!(descriptor.nodegroup_alias("n1"), Some("names"));
    }
}
