//! Filesystem helpers with path containment and contextual errors.
//!
//! Every output path derived from data (slugs, collection ids, registry
//! names) goes through [`safe_join`] so that a crafted value cannot write
//! outside its target directory.

use std::path::{Component, Path, PathBuf};

use regex_lite::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PipelineError, Result};

/// Read and parse a JSON file.
pub async fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| PipelineError::json(format!("file: {}", path.display()), e))
}

/// Serialize `value` as JSON into `path`, creating parent directories.
pub async fn write_json<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
    pretty: bool,
) -> Result<()> {
    let path = path.as_ref();
    let context = || format!("file: {}", path.display());
    let serial = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| PipelineError::json(context(), e))?;
    write_string(path, &serial).await
}

/// Write a string into `path`, creating parent directories.
pub async fn write_string(path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| PipelineError::io(path, e))
}

/// `mkdir -p`.
pub async fn create_dir_all(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| PipelineError::io(path, e))
}

/// Remove a directory tree if it exists, then recreate it empty.
pub async fn reset_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(PipelineError::io(path, e)),
    }
    create_dir_all(path).await
}

/// Whether `path` exists.
pub async fn exists(path: impl AsRef<Path>) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Lexically resolve `.` and `..` components against an absolute root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize(path));
    }
    let cwd = std::env::current_dir().map_err(|e| PipelineError::io(path, e))?;
    Ok(normalize(&cwd.join(path)))
}

/// Resolve `path` against `base` and fail if the result leaves `base`.
pub fn validate_path_within_base(path: impl AsRef<Path>, base: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let base = base.as_ref();
    let resolved_base = absolute(base)?;
    let resolved = normalize(&resolved_base.join(path));
    if !resolved.starts_with(&resolved_base) {
        return Err(PipelineError::PathTraversal {
            path: path.to_path_buf(),
            base: base.to_path_buf(),
        });
    }
    Ok(resolved)
}

/// Join `segment` onto `base`, refusing results outside `base`.
pub fn safe_join(base: impl AsRef<Path>, segment: impl AsRef<Path>) -> Result<PathBuf> {
    validate_path_within_base(segment, base)
}

/// Recursively list files under `dir` whose path matches `pattern`.
///
/// Results are sorted. Entries resolving outside `dir` are skipped with a
/// warning.
pub async fn files_matching(dir: impl AsRef<Path>, pattern: &Regex) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && current == dir => {
                tracing::warn!(dir = %dir.display(), "Directory does not exist, nothing to match");
                return Ok(found);
            }
            Err(e) => return Err(PipelineError::io(&current, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io(&current, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| PipelineError::io(&path, e))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && pattern.is_match(&path.to_string_lossy()) {
                let relative = path.strip_prefix(dir).unwrap_or(&path);
                if validate_path_within_base(relative, dir).is_ok() {
                    tracing::debug!(path = %path.display(), "Found");
                    found.push(path);
                } else {
                    tracing::warn!(path = %path.display(), dir = %dir.display(), "Found file outside directory, skipping");
                }
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Expand a `%` placeholder into consecutive numbered files.
///
/// `data/part-%.json` yields `part-0.json`, `part-1.json`, ... up to the
/// first missing file. Paths without `%` are returned unchanged.
pub async fn expand_numbered(path: &str) -> Vec<PathBuf> {
    if !path.contains('%') {
        return vec![PathBuf::from(path)];
    }
    let mut files = Vec::new();
    for i in 0.. {
        let candidate = PathBuf::from(path.replacen('%', &i.to_string(), 1));
        if !exists(&candidate).await {
            break;
        }
        files.push(candidate);
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_within_base() {
        let joined = safe_join("docs/business_data", "old-mill-abcdef.json").unwrap();
        assert!(joined.ends_with("docs/business_data/old-mill-abcdef.json"));
    }

    #[test]
    fn test_safe_join_rejects_escape() {
        let err = safe_join("docs/business_data", "../../etc/passwd").unwrap_err();
        assert!(matches!(err, PipelineError::PathTraversal { .. }));
        let err = safe_join("docs", "/etc/passwd").unwrap_err();
        assert!(matches!(err, PipelineError::PathTraversal { .. }));
    }

    #[test]
    fn test_inner_parent_dir_allowed() {
        assert!(safe_join("docs", "a/../b.json").is_ok());
    }

    #[tokio::test]
    async fn test_json_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/points.json");
        write_json(&path, &vec![[1.0, 2.0]], false).await.unwrap();
        let back: Vec<[f64; 2]> = read_json(&path).await.unwrap();
        assert_eq!(back, vec![[1.0, 2.0]]);

        let err = read_json::<Vec<u8>>(dir.path().join("missing.json")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[tokio::test]
    async fn test_files_matching_and_numbered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a/part-0.json", "a/part-1.json", "b/other.txt"] {
            write_string(dir.path().join(name), "{}").await.unwrap();
        }
        let re = Regex::new(r"part-\d+\.json$").unwrap();
        let found = files_matching(dir.path(), &re).await.unwrap();
        assert_eq!(found.len(), 2);

        let pattern = dir.path().join("a/part-%.json");
        let numbered = expand_numbered(&pattern.to_string_lossy()).await;
        assert_eq!(numbered.len(), 2);
        assert!(numbered[1].ends_with("part-1.json"));
    }
}
