//! Reference-data collections.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::{OutputMode, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::safe_fs::{create_dir_all, exists, files_matching, reset_dir, safe_join};
use super::graphs::PublishedModel;

async fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| PipelineError::io(from, e))?;
    Ok(())
}

/// Copy reference-data collections into the output tree.
///
/// Private spatial builds copy every collection. Other builds copy only the
/// collections referenced by published models; missing files are skipped
/// with a warning. Returns the written paths.
pub async fn copy_reference_data(config: &PipelineConfig, models: &[PublishedModel]) -> Result<Vec<PathBuf>> {
    let source = config.collections_dir();
    let target = config.reference_data_output_dir().join("collections");
    reset_dir(config.reference_data_output_dir()).await?;
    create_dir_all(&target).await?;

    let mut written = Vec::new();
    if config.include_private && config.output_mode != OutputMode::Chunked {
        tracing::warn!("NON-PUBLIC build, including even unused collections");
        let everything = regex_lite::Regex::new(".*").map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        for file in files_matching(&source, &everything).await? {
            let relative = file.strip_prefix(&source).unwrap_or(&file);
            let to = safe_join(&target, relative)?;
            copy_file(&file, &to).await?;
            written.push(to);
        }
        return Ok(written);
    }

    let referenced: BTreeSet<String> = models.iter().flat_map(PublishedModel::collections).collect();
    for collection_id in &referenced {
        let file_name = format!("{collection_id}.json");
        let from = safe_join(&source, &file_name)?;
        if !exists(&from).await {
            tracing::warn!(collection = %collection_id, "Referenced collection missing, skipping");
            continue;
        }
        let to = safe_join(&target, &file_name)?;
        copy_file(&from, &to).await?;
        written.push(to);
    }

    if config.include_private {
        tracing::warn!(
            collections = written.len(),
            "Chunked build, only copying the referenced collections included in used graphs"
        );
    } else {
        tracing::warn!(
            collections = written.len(),
            "Building for PUBLIC, only including referenced collections; these are not a security boundary"
        );
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safe_fs::write_json;
    use crate::store::ModelDescriptor;
    use serde_json::json;

    fn model() -> PublishedModel {
        let graph = json!({
            "graphid": "g1",
            "name": "Heritage Asset",
            "nodes": [
                {"nodeid": "n1", "alias": "type", "nodegroup_id": "n1", "config": {"rdmCollection": "c1"}},
                {"nodeid": "n2", "alias": "period", "nodegroup_id": "n2", "config": {"rdmCollection": "c-missing"}}
            ]
        });
        PublishedModel {
            descriptor: ModelDescriptor::from_graph(&graph),
            graph,
        }
    }

    async fn seed(config: &PipelineConfig) {
        for id in ["c1", "c2"] {
            write_json(config.collections_dir().join(format!("{id}.json")), &json!({"id": id}), false)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_public_copies_referenced_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path());
        seed(&config).await;
        let written = copy_reference_data(&config, &[model()]).await.unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("collections/c1.json"));
    }

    #[tokio::test]
    async fn test_private_copies_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path());
        config.include_private = true;
        seed(&config).await;
        let written = copy_reference_data(&config, &[]).await.unwrap();
        assert_eq!(written.len(), 2);
        assert!(config
            .reference_data_output_dir()
            .join("collections/c2.json")
            .exists());
    }
}
