//! Graph definitions: load, prune, write.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::config::{OutputMode, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::policy::{prune_graph, PermissionGate};
use crate::safe_fs::{exists, read_json, reset_dir, safe_join, write_json};
use crate::store::ModelDescriptor;

/// Which directory a graph definition comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    /// `graphs/resource_models`.
    Model,
    /// `graphs/branches`.
    Branch,
}

impl GraphKind {
    /// Directory name under `graphs/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Model => "resource_models",
            Self::Branch => "branches",
        }
    }
}

/// One graph definition file with its single graph element.
#[derive(Debug, Clone)]
pub struct GraphFile {
    /// Source directory kind.
    pub kind: GraphKind,
    /// Source path.
    pub path: PathBuf,
    /// File name, reused for the output.
    pub file_name: String,
    /// The graph element.
    pub graph: Value,
}

/// Summary of a published graph, with element counts in place of arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMeta {
    /// Graph identifier.
    pub graphid: String,
    /// Display name.
    pub name: Option<String>,
    /// Graph slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
    /// Subtitle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<Value>,
    /// Author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Value>,
    /// Color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Value>,
    /// Icon class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iconclass: Option<Value>,
    /// Whether the graph is a resource model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isresource: Option<bool>,
    /// Ontology identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ontology_id: Option<Value>,
    /// Version, always as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Relatable resource models.
    #[serde(default)]
    pub relatable_resource_model_ids: Vec<Value>,
    /// Number of cards.
    pub cards: usize,
    /// Number of card/node/widget bindings.
    pub cards_x_nodes_x_widgets: usize,
    /// Number of edges.
    pub edges: usize,
    /// Number of function bindings.
    pub functions_x_graphs: usize,
    /// Number of nodegroups.
    pub nodegroups: usize,
    /// Number of nodes.
    pub nodes: usize,
}

impl GraphMeta {
    /// Summarize a graph element.
    pub fn from_graph(graph: &Value) -> Self {
        let count = |key: &str| graph.get(key).and_then(Value::as_array).map_or(0, Vec::len);
        let field = |key: &str| graph.get(key).filter(|v| !v.is_null()).cloned();
        let text = |key: &str| graph.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            graphid: text("graphid").unwrap_or_default(),
            name: text("name"),
            slug: text("slug"),
            description: field("description"),
            subtitle: field("subtitle"),
            author: field("author"),
            color: field("color"),
            iconclass: field("iconclass"),
            isresource: graph.get("isresource").and_then(Value::as_bool),
            ontology_id: field("ontology_id"),
            version: graph.get("version").filter(|v| !v.is_null()).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            relatable_resource_model_ids: graph
                .get("relatable_resource_model_ids")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            cards: count("cards"),
            cards_x_nodes_x_widgets: count("cards_x_nodes_x_widgets"),
            edges: count("edges"),
            functions_x_graphs: count("functions_x_graphs"),
            nodegroups: count("nodegroups"),
            nodes: count("nodes"),
        }
    }
}

/// A model retained for publication.
#[derive(Debug, Clone)]
pub struct PublishedModel {
    /// Summary of the pruned definition.
    pub descriptor: ModelDescriptor,
    /// Pruned graph element.
    pub graph: Value,
}

impl PublishedModel {
    /// Reference-data collections configured on retained nodes.
    pub fn collections(&self) -> BTreeSet<String> {
        self.descriptor
            .nodes
            .values()
            .filter_map(|node| node.collection.clone())
            .collect()
    }
}

/// Outcome of [`process_graphs`].
#[derive(Debug, Clone, Default)]
pub struct ProcessedGraphs {
    /// Published models.
    pub models: Vec<PublishedModel>,
    /// Branch publication ids referenced by written graphs.
    pub branches: BTreeSet<String>,
    /// Branch publication ids that were written.
    pub branches_found: BTreeSet<String>,
    /// Model summaries by graph id.
    pub all_meta: BTreeMap<String, GraphMeta>,
    /// Definition files written.
    pub written: Vec<PathBuf>,
}

impl ProcessedGraphs {
    /// Referenced branch publication ids with no written branch.
    pub fn missing_branches(&self) -> Vec<String> {
        self.branches.difference(&self.branches_found).cloned().collect()
    }

    /// Graph id to model class name for published models.
    pub fn model_names(&self) -> BTreeMap<String, String> {
        self.models
            .iter()
            .map(|m| (m.descriptor.graph_id.clone(), m.descriptor.model_class_name.clone()))
            .collect()
    }
}

fn output_graphs_dir(config: &PipelineConfig, kind: GraphKind) -> PathBuf {
    config.definitions_dir().join("graphs").join(kind.dir_name())
}

async fn graph_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PipelineError::io(dir, e))?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| PipelineError::io(dir, e))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with("json") && !name.starts_with('_') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Read the single graph element of a graph file.
pub async fn read_graph_file(path: &Path) -> Result<Value> {
    let mut content: Value = read_json(path).await?;
    let malformed = |reason: String| PipelineError::MalformedGraph {
        path: path.to_path_buf(),
        reason,
    };
    let graphs = content
        .get_mut("graph")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| malformed("missing or invalid 'graph' array".to_string()))?;
    if graphs.len() != 1 {
        return Err(malformed(format!(
            "expected exactly 1 graph element, found {}",
            graphs.len()
        )));
    }
    Ok(graphs.remove(0))
}

/// Load resource-model definitions, plus branches in chunked mode.
///
/// Output graph directories are cleared once their sources are read.
pub async fn load_graph_files(config: &PipelineConfig) -> Result<Vec<GraphFile>> {
    let mut kinds = vec![GraphKind::Model];
    if config.output_mode == OutputMode::Chunked {
        kinds.push(GraphKind::Branch);
    }

    let mut files = Vec::new();
    for kind in kinds {
        let source = config.graphs_dir().join(kind.dir_name());
        if !exists(&source).await {
            if kind == GraphKind::Model {
                return Err(PipelineError::MissingConfiguration(format!(
                    "graph directory {} does not exist",
                    source.display()
                )));
            }
            tracing::warn!(dir = %source.display(), "No branch definitions found");
        } else {
            for file_name in graph_file_names(&source).await? {
                let path = source.join(&file_name);
                let graph = read_graph_file(&path).await?;
                files.push(GraphFile {
                    kind,
                    path,
                    file_name,
                    graph,
                });
            }
        }
        reset_dir(output_graphs_dir(config, kind)).await?;
    }
    tracing::info!(graphs = files.len(), "Loaded graph definitions");
    Ok(files)
}

fn branch_publication_ids(graph: &Value) -> impl Iterator<Item = &str> {
    graph
        .get("nodes")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|node| node.get("sourcebranchpublication_id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
}

/// Filter, prune and write graph definitions.
///
/// Public builds keep only allow-listed models and branches referenced by
/// an already written graph; models keep only the nodegroups the gate may
/// expose and are dropped when none remain.
pub async fn process_graphs(
    files: Vec<GraphFile>,
    config: &PipelineConfig,
    gate: &mut PermissionGate,
) -> Result<ProcessedGraphs> {
    let mut out = ProcessedGraphs::default();

    for GraphFile {
        kind,
        path,
        file_name,
        mut graph,
    } in files
    {
        let descriptor = ModelDescriptor::from_graph(&graph);
        if !config.include_private {
            match kind {
                GraphKind::Model => {
                    if !config.is_public_model(&descriptor.model_class_name) {
                        tracing::debug!(model = %descriptor.model_class_name, "Model is not public, skipping");
                        continue;
                    }
                }
                GraphKind::Branch => {
                    let publication_id = graph
                        .pointer("/publication/publicationid")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let Some(publication_id) = publication_id else {
                        tracing::warn!(file = %path.display(), "Branch has no publication ID");
                        continue;
                    };
                    if !out.branches.contains(&publication_id) {
                        continue;
                    }
                    out.branches_found.insert(publication_id);
                }
            }
        } else {
            tracing::warn!(
                kind = kind.dir_name(),
                model = %descriptor.model_class_name,
                "Building NON-PUBLIC reindex, including graph"
            );
        }

        if kind == GraphKind::Model {
            let permitted = gate.permitted_nodegroups(&descriptor).await?;
            if permitted.is_empty() {
                tracing::warn!(model = %descriptor.model_class_name, "Not exporting model, no nodegroups available");
                continue;
            }
            let removed = prune_graph(&mut graph, &permitted);
            if removed > 0 {
                tracing::info!(model = %descriptor.model_class_name, removed, "Pruned nodegroups");
            }
        }

        let target = safe_join(output_graphs_dir(config, kind), &file_name)?;
        write_json(&target, &json!({"graph": [&graph], "__scope": ["public"]}), true).await?;
        tracing::info!(path = %target.display(), "Wrote graph");
        out.written.push(target);

        out.branches
            .extend(branch_publication_ids(&graph).map(str::to_string));
        if kind == GraphKind::Model {
            let meta = GraphMeta::from_graph(&graph);
            out.all_meta.insert(meta.graphid.clone(), meta);
            out.models.push(PublishedModel {
                descriptor: ModelDescriptor::from_graph(&graph),
                graph,
            });
        }
    }
    Ok(out)
}

/// Write `definitions/graphs/_all.json`.
pub async fn write_all_meta(config: &PipelineConfig, all_meta: &BTreeMap<String, GraphMeta>) -> Result<PathBuf> {
    let path = config.definitions_dir().join("graphs").join("_all.json");
    write_json(&path, &json!({ "models": all_meta }), true).await?;
    Ok(path)
}
