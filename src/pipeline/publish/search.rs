//! Search records and spatial index entries.

use futures::future::try_join_all;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::index::{SearchIndexer, SearchRecord};
use crate::registry::RegistryTable;
use crate::safe_fs::{files_matching, read_json, reset_dir};
use crate::types::{Asset, Feature, Geometry, IndexEntry};

/// Page URL of an asset.
pub fn asset_url(slug: &str) -> String {
    format!("/asset/?slug={slug}")
}

/// Whether an asset belongs in this build's index.
pub fn is_published(config: &PipelineConfig, asset: &Asset) -> bool {
    config.include_private || config.is_public_model(&asset.model_type)
}

fn record_filters(asset: &Asset) -> Result<BTreeMap<String, Vec<String>>> {
    Ok(BTreeMap::from([
        ("tags".to_string(), asset.meta.registry_names()?),
        ("designations".to_string(), asset.meta.designation_names()?),
    ]))
}

/// Read metadata lists: the given files, or every `*.pi` in the pre-index directory.
pub async fn read_metadata_lists(config: &PipelineConfig, files: Option<&[PathBuf]>) -> Result<Vec<Asset>> {
    let files = match files {
        Some(files) => files.to_vec(),
        None => {
            let pattern = regex_lite::Regex::new(r"\.pi$")
                .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
            files_matching(config.preindex_dir(), &pattern).await?
        }
    };
    tracing::info!(files = files.len(), "Loading metadata lists");
    let lists = try_join_all(files.iter().map(|f| read_json::<Vec<Asset>>(f))).await?;
    let assets: Vec<Asset> = lists.into_iter().flatten().collect();
    tracing::info!(assets = assets.len(), "Loaded metadata lists");
    Ok(assets)
}

/// Feed published assets to the search indexer and write its files.
///
/// Registries seen on indexed assets and missing from `registries` are
/// appended to it. Returns the number of records added.
pub async fn build_search_index<I: SearchIndexer>(
    indexer: &mut I,
    assets: &[Asset],
    registries: &mut RegistryTable,
    config: &PipelineConfig,
) -> Result<usize> {
    let mut records = 0;
    for asset in assets.iter().filter(|a| is_published(config, a)) {
        for registry in asset.meta.registry_names()? {
            if registries.position(&registry).is_none() {
                if let Some(position) = registries.insert(&registry) {
                    tracing::warn!(
                        registry = %registry,
                        position,
                        "Registry missing from pre-index table, appending"
                    );
                }
            }
        }
        let record = SearchRecord {
            url: asset_url(&asset.meta.slug),
            content: asset.content.clone(),
            language: config.language.clone(),
            filters: record_filters(asset)?,
            meta: asset.meta.clone(),
        };
        indexer
            .add_custom_record(record)
            .await
            .map_err(|e| PipelineError::from_collaborator("search indexer", e))?;
        records += 1;
    }
    tracing::info!(records, "Indexed assets");

    let output = config.search_output_dir();
    reset_dir(&output).await?;
    indexer
        .write_files(&output)
        .await
        .map_err(|e| PipelineError::from_collaborator("search indexer", e))?;
    Ok(records)
}

/// Map each catalogue entry's `meta.slug` to its hash.
pub async fn hashes_by_slug<I: SearchIndexer>(indexer: &I) -> Result<HashMap<String, String>> {
    let catalogue = indexer
        .index_catalogue()
        .await
        .map_err(|e| PipelineError::from_collaborator("search indexer", e))?;
    let mut hashes = HashMap::with_capacity(catalogue.len());
    for (hash, entry) in catalogue {
        let entry: Value = serde_json::from_str(&entry)
            .map_err(|e| PipelineError::json(format!("search entry with hash {hash}"), e))?;
        if let Some(slug) = entry.pointer("/meta/slug").and_then(Value::as_str) {
            hashes.insert(slug.to_string(), hash);
        }
    }
    Ok(hashes)
}

/// Join published assets with their hash and registry bitmask.
///
/// Assets without a valid point or without a search hash are skipped.
pub fn index_entries(
    assets: &[Asset],
    hashes: &HashMap<String, String>,
    registries: &RegistryTable,
    config: &PipelineConfig,
) -> Result<Vec<(IndexEntry, Feature)>> {
    let mut entries = Vec::new();
    for asset in assets.iter().filter(|a| is_published(config, a)) {
        let Some(loc) = asset.location() else {
            continue;
        };
        let Some(hash) = hashes.get(&asset.meta.slug) else {
            tracing::warn!(slug = %asset.meta.slug, "Located asset has no search record, skipping");
            continue;
        };
        let regcode = registries.encode(&asset.meta.registry_names()?);
        let filters = record_filters(asset)?;

        let mut properties = Map::new();
        properties.insert("url".into(), Value::from(asset_url(&asset.meta.slug)));
        properties.insert("content".into(), Value::from(asset.content.clone()));
        properties.insert("language".into(), Value::from(config.language.clone()));
        properties.insert("regcode".into(), Value::from(regcode));
        properties.insert(
            "filters".into(),
            serde_json::to_value(&filters).map_err(|e| PipelineError::json("search filters", e))?,
        );
        properties.insert(
            "meta".into(),
            serde_json::to_value(&asset.meta)
                .map_err(|e| PipelineError::json(format!("asset {} metadata", asset.slug), e))?,
        );

        let mut feature = Feature::new(Geometry::Point { coordinates: loc }, properties);
        feature.id = Some(hash.clone());
        entries.push((
            IndexEntry {
                loc,
                hash: hash.clone(),
                regcode,
            },
            feature,
        ));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemorySearchIndex;
    use crate::types::ResourceId;

    fn asset(id: &str, slug: &str, model: &str, location: Option<[f64; 2]>, registries: &[&str]) -> Asset {
        let mut asset = Asset::new(&ResourceId::new(id), "g1", None, location, slug, slug, model);
        asset.content = slug.to_string();
        let registries: Vec<String> = registries.iter().map(|r| r.to_string()).collect();
        asset.meta.set_registries(&registries).unwrap();
        asset
    }

    #[tokio::test]
    async fn test_public_filter_and_registry_append() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path());
        let assets = vec![
            asset("r1", "mill-r1", "HeritageAsset", Some([1.0, 2.0]), &["County Register"]),
            asset("r2", "secret-r2", "Secret", Some([3.0, 4.0]), &["Hidden List"]),
            asset("r3", "fort-r3", "HeritageAsset", None, &["Listed Buildings"]),
        ];
        let mut table = RegistryTable::from_names(["Listed Buildings"]);
        let mut index = InMemorySearchIndex::new();

        let records = build_search_index(&mut index, &assets, &mut table, &config).await.unwrap();
        assert_eq!(records, 2);
        assert_eq!(table.names(), &["listed-buildings", "county-register"]);
        assert!(config.search_output_dir().join("catalogue.json").exists());

        let hashes = hashes_by_slug(&index).await.unwrap();
        assert_eq!(hashes.len(), 2);

        let entries = index_entries(&assets, &hashes, &table, &config).unwrap();
        assert_eq!(entries.len(), 1);
        let (entry, feature) = &entries[0];
        assert_eq!(entry.loc, [1.0, 2.0]);
        assert_eq!(entry.regcode, 2);
        assert_eq!(feature.id.as_deref(), Some(entry.hash.as_str()));
        assert_eq!(feature.properties["url"], "/asset/?slug=mill-r1");
    }

    #[tokio::test]
    async fn test_private_build_indexes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path());
        config.include_private = true;
        let assets = vec![asset("r2", "secret-r2", "Secret", None, &[])];
        let mut table = RegistryTable::new();
        let mut index = InMemorySearchIndex::new();
        let records = build_search_index(&mut index, &assets, &mut table, &config).await.unwrap();
        assert_eq!(records, 1);
    }

    #[tokio::test]
    async fn test_read_metadata_lists() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path());
        let list = vec![asset("r1", "mill-r1", "HeritageAsset", None, &[])];
        crate::safe_fs::write_json(config.preindex_dir().join("a.json.pi"), &list, true).await.unwrap();
        crate::safe_fs::write_json(config.preindex_dir().join("a.json.pi.assoc"), &list, true).await.unwrap();

        let assets = read_metadata_lists(&config, None).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].slug, "mill-r1");
    }
}
