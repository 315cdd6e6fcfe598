//! Named predicates for data-dependent nodegroup visibility.
//!
//! A permission policy can map a nodegroup alias to a predicate name
//! instead of a boolean. The name is looked up among providers registered
//! on the [`PermissionGate`](super::PermissionGate); each provider is bound
//! to a model once, before any resource of that model is loaded.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::store::ModelDescriptor;

/// Decides per tile whether a nodegroup's data is visible.
pub trait NodegroupPredicate: Send + Sync + fmt::Debug {
    /// Whether the tile data may be published.
    fn permits(&self, tile: &Value) -> bool;
}

/// Builds a [`NodegroupPredicate`] for one model.
#[async_trait]
pub trait PredicateProvider: Send + Sync {
    /// Bind the predicate to a loaded model definition.
    async fn bind(&self, model: &ModelDescriptor) -> Result<Arc<dyn NodegroupPredicate>>;
}

/// Visible only when a concept-valued node holds a member of its reference collection.
///
/// The collection is the one configured on the node (`config.rdmCollection`)
/// and is resolved from `collections` when the provider is bound.
#[derive(Debug, Clone)]
pub struct CollectionMembershipProvider {
    alias: String,
    collections: BTreeMap<String, BTreeSet<String>>,
}

impl CollectionMembershipProvider {
    /// Check node `alias` against the given collection contents.
    pub fn new(alias: impl Into<String>, collections: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self {
            alias: alias.into(),
            collections,
        }
    }
}

#[async_trait]
impl PredicateProvider for CollectionMembershipProvider {
    async fn bind(&self, model: &ModelDescriptor) -> Result<Arc<dyn NodegroupPredicate>> {
        let node = model.nodes.get(&self.alias).ok_or_else(|| {
            PipelineError::MissingConfiguration(format!(
                "node {} not found on model {}",
                self.alias, model.model_class_name
            ))
        })?;
        let collection = node.collection.as_deref().ok_or_else(|| {
            PipelineError::MissingConfiguration(format!(
                "node {} on model {} has no reference collection",
                self.alias, model.model_class_name
            ))
        })?;
        let members = self.collections.get(collection).cloned().ok_or_else(|| {
            PipelineError::MissingConfiguration(format!("reference collection {collection} not loaded"))
        })?;
        tracing::debug!(
            model = %model.model_class_name,
            alias = %self.alias,
            collection,
            members = members.len(),
            "Bound collection membership predicate"
        );
        Ok(Arc::new(CollectionMembership {
            alias: self.alias.clone(),
            members,
        }))
    }
}

/// Bound form of [`CollectionMembershipProvider`].
#[derive(Debug, Clone)]
pub struct CollectionMembership {
    alias: String,
    members: BTreeSet<String>,
}

impl NodegroupPredicate for CollectionMembership {
    fn permits(&self, tile: &Value) -> bool {
        match tile.get(&self.alias) {
            Some(Value::String(concept)) => self.members.contains(concept),
            Some(Value::Array(concepts)) => {
                !concepts.is_empty()
                    && concepts
                        .iter()
                        .all(|c| c.as_str().is_some_and(|c| self.members.contains(c)))
            }
            _ => false,
        }
    }
}
