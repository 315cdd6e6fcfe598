//! Business-data files and model declarations.
//!
//! Only the resource header (`resourceinstance`) is interpreted here; the
//! rest of each stored resource belongs to the graph client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};
use super::asset::ResourceId;

/// A `{"business_data": {"resources": [...]}}` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessData {
    /// Wrapped resources.
    pub business_data: BusinessDataResources,
}

/// Resource list inside a business-data file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessDataResources {
    /// Stored resources, opaque apart from their header.
    #[serde(default)]
    pub resources: Vec<Value>,
}

/// A resource to resolve against its model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRequest {
    /// Graph the resource belongs to.
    pub graph_id: String,
    /// Resource identifier.
    pub resource_id: ResourceId,
}

impl BusinessData {
    /// Wrap resources into a business-data document.
    pub fn new(resources: Vec<Value>) -> Self {
        Self {
            business_data: BusinessDataResources { resources },
        }
    }

    /// Extract the lookup requests declared by this file, in file order.
    pub fn requests(&self) -> Result<Vec<ResourceRequest>> {
        self.business_data
            .resources
            .iter()
            .enumerate()
            .map(|(i, resource)| {
                let graph_id = resource_graph_id(resource);
                let resource_id = resource
                    .pointer("/resourceinstance/resourceinstanceid")
                    .and_then(Value::as_str);
                match (graph_id, resource_id) {
                    (Some(graph_id), Some(resource_id)) => Ok(ResourceRequest {
                        graph_id: graph_id.to_string(),
                        resource_id: ResourceId::new(resource_id),
                    }),
                    _ => Err(PipelineError::InvalidInput(format!(
                        "resource {i} has no resourceinstance header"
                    ))),
                }
            })
            .collect()
    }

    /// Distinct graph identifiers referenced by this file, in first-seen order.
    pub fn graph_ids(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for resource in &self.business_data.resources {
            if let Some(graph_id) = resource_graph_id(resource) {
                if !seen.iter().any(|g: &String| g == graph_id) {
                    seen.push(graph_id.to_string());
                }
            }
        }
        seen
    }
}

/// The `resourceinstance.graph_id` of a stored resource document.
pub fn resource_graph_id(resource: &Value) -> Option<&str> {
    resource
        .pointer("/resourceinstance/graph_id")
        .and_then(Value::as_str)
}

/// Declares, for one graph, its definition name and source-data files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Display name of the graph definition (also its file stem).
    #[serde(alias = "graph")]
    pub name: String,
    /// Source-data files populating this model.
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
}

/// Summary line of a per-graph resource index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    /// Display name.
    pub name: String,
    /// Resource identifier.
    pub resourceinstanceid: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_requests_in_file_order() {
        let data: BusinessData = serde_json::from_value(json!({
            "business_data": {"resources": [
                {"resourceinstance": {"resourceinstanceid": "r1", "graph_id": "g1"}},
                {"resourceinstance": {"resourceinstanceid": "r2", "graph_id": "g2"}},
                {"resourceinstance": {"resourceinstanceid": "r3", "graph_id": "g1"}}
            ]}
        }))
        .unwrap();

        let requests = data.requests().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].resource_id.as_str(), "r2");
        assert_eq!(data.graph_ids(), vec!["g1", "g2"]);
    }

    #[test]
    fn test_missing_header_is_invalid() {
        let data = BusinessData::new(vec![json!({"tiles": []})]);
        assert!(matches!(data.requests(), Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn test_model_entry_accepts_graph_alias() {
        let entry: ModelEntry = serde_json::from_value(json!({"graph": "Heritage Asset"})).unwrap();
        assert_eq!(entry.name, "Heritage Asset");
        assert!(entry.resources.is_empty());
    }
}
