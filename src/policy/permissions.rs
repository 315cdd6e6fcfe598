//! Nodegroup permission policy and gate.
//!
//! ## Policy shape
//!
//! ```json
//! {
//!   "HeritageAsset": {"names": true, "status": "public_status", "notes": false},
//!   "Registry": true,
//!   "Person": false
//! }
//! ```
//!
//! | Entry | Decision |
//! |-------|----------|
//! | absent or `false` | [`PermittedNodegroups::None`] |
//! | `true` | [`PermittedNodegroups::All`] |
//! | object | [`PermittedNodegroups::Subset`], strings bound to named predicates |
//!
//! Private builds (`include_private`) always get [`PermittedNodegroups::All`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::store::ModelDescriptor;
use super::predicate::{NodegroupPredicate, PredicateProvider};

/// Policy entry for one nodegroup alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodegroupPolicy {
    /// Always visible or always hidden.
    Flag(bool),
    /// Visible per tile according to a named predicate.
    Predicate(String),
}

/// Policy entry for one model class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelPolicy {
    /// Allow all or allow none.
    Flag(bool),
    /// Per-nodegroup entries.
    Nodegroups(BTreeMap<String, NodegroupPolicy>),
}

/// Mapping from model class name to its policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionPolicy(BTreeMap<String, ModelPolicy>);

impl PermissionPolicy {
    /// Build a policy from entries.
    pub fn new(entries: BTreeMap<String, ModelPolicy>) -> Self {
        Self(entries)
    }

    /// Policy for a model class, if any.
    pub fn get(&self, model_class_name: &str) -> Option<&ModelPolicy> {
        self.0.get(model_class_name)
    }

    /// Model classes with an entry.
    pub fn model_classes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Resolved visibility of one nodegroup.
#[derive(Clone)]
pub enum NodegroupRule {
    /// Fixed decision.
    Allow(bool),
    /// Per-tile decision.
    Predicate {
        /// Name the predicate was registered under.
        name: String,
        /// Bound predicate.
        predicate: Arc<dyn NodegroupPredicate>,
    },
}

impl fmt::Debug for NodegroupRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow(allow) => f.debug_tuple("Allow").field(allow).finish(),
            Self::Predicate { name, .. } => f.debug_struct("Predicate").field("name", name).finish(),
        }
    }
}

impl NodegroupRule {
    /// Whether this nodegroup can ever be visible (keeps it in pruned schemas).
    pub fn may_permit(&self) -> bool {
        match self {
            Self::Allow(allow) => *allow,
            Self::Predicate { .. } => true,
        }
    }

    /// Whether a tile of this nodegroup is visible.
    pub fn permits(&self, tile: &Value) -> bool {
        match self {
            Self::Allow(allow) => *allow,
            Self::Predicate { predicate, .. } => predicate.permits(tile),
        }
    }
}

/// Inclusion decision for one model.
#[derive(Debug, Clone)]
pub enum PermittedNodegroups {
    /// Every nodegroup is visible.
    All,
    /// Nothing is visible.
    None,
    /// Only the listed aliases, per their rules.
    Subset(BTreeMap<String, NodegroupRule>),
}

impl PermittedNodegroups {
    /// Whether a tile of nodegroup `alias` is visible.
    pub fn permits(&self, alias: &str, tile: &Value) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Subset(rules) => rules.get(alias).is_some_and(|rule| rule.permits(tile)),
        }
    }

    /// Whether nodegroup `alias` can be visible at all.
    pub fn may_permit(&self, alias: &str) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Subset(rules) => rules.get(alias).is_some_and(NodegroupRule::may_permit),
        }
    }

    /// Whether no nodegroup is available; such models are not exported.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::All => false,
            Self::None => true,
            Self::Subset(rules) => !rules.values().any(NodegroupRule::may_permit),
        }
    }
}

/// Resolves and caches per-model permissions for one run.
pub struct PermissionGate {
    policy: PermissionPolicy,
    include_private: bool,
    providers: HashMap<String, Arc<dyn PredicateProvider>>,
    resolved: HashMap<String, PermittedNodegroups>,
}

impl fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionGate")
            .field("policy", &self.policy)
            .field("include_private", &self.include_private)
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("resolved", &self.resolved.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PermissionGate {
    /// Create a gate for one run.
    pub fn new(policy: PermissionPolicy, include_private: bool) -> Self {
        Self {
            policy,
            include_private,
            providers: HashMap::new(),
            resolved: HashMap::new(),
        }
    }

    /// Register a named predicate provider.
    pub fn register_predicate(&mut self, name: impl Into<String>, provider: Arc<dyn PredicateProvider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Whether this run bypasses publishing restrictions.
    pub fn include_private(&self) -> bool {
        self.include_private
    }

    /// The policy being applied.
    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    /// Resolve the permitted nodegroups of a model.
    ///
    /// Predicates are bound on first resolution and the decision is cached
    /// for the rest of the run.
    pub async fn permitted_nodegroups(&mut self, model: &ModelDescriptor) -> Result<PermittedNodegroups> {
        if self.include_private {
            return Ok(PermittedNodegroups::All);
        }
        if let Some(cached) = self.resolved.get(&model.model_class_name) {
            return Ok(cached.clone());
        }

        let decision = match self.policy.get(&model.model_class_name) {
            None | Some(ModelPolicy::Flag(false)) => PermittedNodegroups::None,
            Some(ModelPolicy::Flag(true)) => PermittedNodegroups::All,
            Some(ModelPolicy::Nodegroups(entries)) => {
                let mut rules = BTreeMap::new();
                for (alias, entry) in entries {
                    let rule = match entry {
                        NodegroupPolicy::Flag(allow) => NodegroupRule::Allow(*allow),
                        NodegroupPolicy::Predicate(name) => {
                            let provider = self.providers.get(name).ok_or_else(|| {
                                PipelineError::MissingConfiguration(format!(
                                    "permission predicate {name} for {}.{alias} is not registered",
                                    model.model_class_name
                                ))
                            })?;
                            NodegroupRule::Predicate {
                                name: name.clone(),
                                predicate: provider.bind(model).await?,
                            }
                        }
                    };
                    rules.insert(alias.clone(), rule);
                }
                PermittedNodegroups::Subset(rules)
            }
        };

        if decision.is_empty() {
            tracing::info!(model = %model.model_class_name, "No nodegroups available for model");
        }
        self.resolved
            .insert(model.model_class_name.clone(), decision.clone());
        Ok(decision)
    }
}

/// Remove every field group of a graph definition that `permitted` can never expose.
///
/// Works on one element of a graph file's `graph` array. Child nodegroups
/// of a removed nodegroup are removed with it; nodes outside any nodegroup
/// (the root) are kept. Returns the number of nodegroups removed.
pub fn prune_graph(graph: &mut Value, permitted: &PermittedNodegroups) -> usize {
    if matches!(permitted, PermittedNodegroups::All) {
        return 0;
    }
    let descriptor = ModelDescriptor::from_graph(graph);

    let nodegroups: Vec<(String, Option<String>)> = graph
        .get("nodegroups")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|ng| {
            let id = ng.get("nodegroupid")?.as_str()?.to_string();
            let parent = ng
                .get("parentnodegroup_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some((id, parent))
        })
        .collect();

    let mut removed: Vec<String> = nodegroups
        .iter()
        .filter(|(id, _)| {
            descriptor
                .nodegroup_alias(id)
                .map_or(true, |alias| !permitted.may_permit(alias))
        })
        .map(|(id, _)| id.clone())
        .collect();

    // Cascade to descendants.
    loop {
        let before = removed.len();
        for (id, parent) in &nodegroups {
            if let Some(parent) = parent {
                if removed.contains(parent) && !removed.contains(id) {
                    removed.push(id.clone());
                }
            }
        }
        if removed.len() == before {
            break;
        }
    }

    let removed_nodes: Vec<String> = descriptor
        .nodes
        .values()
        .filter(|node| node.nodegroup_id.as_ref().is_some_and(|ng| removed.contains(ng)))
        .map(|node| node.node_id.clone())
        .collect();

    let retain = |graph: &mut Value, key: &str, keep: &dyn Fn(&Value) -> bool| {
        if let Some(items) = graph.get_mut(key).and_then(Value::as_array_mut) {
            items.retain(|item| keep(item));
        }
    };
    let field_in = |item: &Value, field: &str, set: &[String]| {
        item.get(field)
            .and_then(Value::as_str)
            .is_some_and(|v| set.iter().any(|s| s == v))
    };

    retain(graph, "nodegroups", &|ng| !field_in(ng, "nodegroupid", &removed));
    retain(graph, "nodes", &|node| !field_in(node, "nodegroup_id", &removed));
    retain(graph, "cards", &|card| !field_in(card, "nodegroup_id", &removed));
    retain(graph, "edges", &|edge| !field_in(edge, "rangenode_id", &removed_nodes));
    retain(graph, "cards_x_nodes_x_widgets", &|w| !field_in(w, "node_id", &removed_nodes));

    removed.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::predicate::CollectionMembershipProvider;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn policy() -> PermissionPolicy {
        serde_json::from_value(json!({
            "HeritageAsset": {"names": true, "notes": false, "status": "public_status"},
            "Registry": true,
            "Person": false
        }))
        .unwrap()
    }

    fn graph() -> Value {
        json!({
            "graphid": "g-ha",
            "name": "Heritage Asset",
            "nodegroups": [
                {"nodegroupid": "ng-names", "parentnodegroup_id": null},
                {"nodegroupid": "ng-notes", "parentnodegroup_id": null},
                {"nodegroupid": "ng-note-detail", "parentnodegroup_id": "ng-notes"},
                {"nodegroupid": "ng-status", "parentnodegroup_id": null}
            ],
            "nodes": [
                {"nodeid": "root", "alias": "heritage_asset", "nodegroup_id": null},
                {"nodeid": "ng-names", "alias": "names", "nodegroup_id": "ng-names"},
                {"nodeid": "ng-notes", "alias": "notes", "nodegroup_id": "ng-notes"},
                {"nodeid": "ng-note-detail", "alias": "note_detail", "nodegroup_id": "ng-note-detail"},
                {"nodeid": "ng-status", "alias": "status", "nodegroup_id": "ng-status",
                 "config": {"rdmCollection": "c-status"}}
            ],
            "edges": [
                {"domainnode_id": "root", "rangenode_id": "ng-names"},
                {"domainnode_id": "root", "rangenode_id": "ng-notes"},
                {"domainnode_id": "ng-notes", "rangenode_id": "ng-note-detail"},
                {"domainnode_id": "root", "rangenode_id": "ng-status"}
            ],
            "cards": [
                {"nodegroup_id": "ng-names"},
                {"nodegroup_id": "ng-notes"}
            ]
        })
    }

    fn gate(include_private: bool) -> PermissionGate {
        let mut gate = PermissionGate::new(policy(), include_private);
        let mut collections = BTreeMap::new();
        collections.insert("c-status".to_string(), BTreeSet::from(["listed".to_string()]));
        gate.register_predicate(
            "public_status",
            Arc::new(CollectionMembershipProvider::new("status", collections)),
        );
        gate
    }

    fn descriptor(class: &str) -> ModelDescriptor {
        ModelDescriptor {
            graph_id: class.to_lowercase(),
            model_class_name: class.to_string(),
            nodes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_flag_policies() {
        let mut gate = gate(false);
        assert!(matches!(
            gate.permitted_nodegroups(&descriptor("Registry")).await.unwrap(),
            PermittedNodegroups::All
        ));
        let person = gate.permitted_nodegroups(&descriptor("Person")).await.unwrap();
        assert!(person.is_empty());
        let unknown = gate.permitted_nodegroups(&descriptor("Unknown")).await.unwrap();
        assert!(matches!(unknown, PermittedNodegroups::None));
    }

    #[tokio::test]
    async fn test_include_private_overrides_policy() {
        let mut gate = gate(true);
        let person = gate.permitted_nodegroups(&descriptor("Person")).await.unwrap();
        assert!(matches!(person, PermittedNodegroups::All));
    }

    #[tokio::test]
    async fn test_subset_with_predicate() {
        let mut gate = gate(false);
        let model = ModelDescriptor::from_graph(&graph());
        let permitted = gate.permitted_nodegroups(&model).await.unwrap();

        assert!(permitted.permits("names", &json!({})));
        assert!(!permitted.permits("notes", &json!({})));
        assert!(!permitted.permits("unlisted", &json!({})));
        assert!(permitted.permits("status", &json!({"status": "listed"})));
        assert!(!permitted.permits("status", &json!({"status": "draft"})));
        assert!(!permitted.is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_predicate_fails() {
        let mut gate = PermissionGate::new(policy(), false);
        let model = ModelDescriptor::from_graph(&graph());
        let err = gate.permitted_nodegroups(&model).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingConfiguration(_)));
    }

    #[test]
    fn test_subset_of_false_entries_is_empty() {
        let mut rules = BTreeMap::new();
        rules.insert("a".to_string(), NodegroupRule::Allow(false));
        assert!(PermittedNodegroups::Subset(rules).is_empty());
    }

    #[tokio::test]
    async fn test_prune_graph_removes_private_groups() {
        let mut gate = gate(false);
        let mut graph = graph();
        let model = ModelDescriptor::from_graph(&graph);
        let permitted = gate.permitted_nodegroups(&model).await.unwrap();

        let removed = prune_graph(&mut graph, &permitted);
        assert_eq!(removed, 2);

        let aliases: Vec<&str> = graph["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["alias"].as_str().unwrap())
            .collect();
        assert_eq!(aliases, vec!["heritage_asset", "names", "status"]);
        assert_eq!(graph["edges"].as_array().unwrap().len(), 2);
        assert_eq!(graph["cards"].as_array().unwrap().len(), 1);
        assert_eq!(graph["nodegroups"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_prune_graph_all_is_noop() {
        let mut graph = graph();
        let before = graph.clone();
        assert_eq!(prune_graph(&mut graph, &PermittedNodegroups::All), 0);
        assert_eq!(graph, before);
    }
}
