//! Bundle collection and name translation.
//!
//! Collection is a pure data step: descriptor files are gathered into
//! `(relative path, parsed value)` pairs with no side effects, so
//! validation and registration stay separate concerns of the loader.

use std::path::{Path, PathBuf};

use async_recursion::async_recursion;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::ModuleResult;

/// One collected descriptor file.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleItem {
    pub relative_path: PathBuf,
    pub value: JsonValue,
}

/// Collects every `.json` descriptor under `root`, sorted by relative
/// path for deterministic registration order. A missing root yields an
/// empty bundle; files that fail to parse are skipped with a warning and
/// do not affect their siblings.
pub async fn collect_bundle(root: &Path) -> ModuleResult<Vec<BundleItem>> {
    let mut items = Vec::new();
    if tokio::fs::metadata(root).await.is_err() {
        debug!("Bundle directory {} not present, skipping", root.display());
        return Ok(items);
    }
    scan_directory(root, root, &mut items).await?;
    items.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(items)
}

#[async_recursion]
async fn scan_directory(root: &Path, dir: &Path, items: &mut Vec<BundleItem>) -> ModuleResult<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            scan_directory(root, &path, items).await?;
        } else if path.extension().map(|ext| ext == "json").unwrap_or(false) {
            match read_descriptor(&path).await {
                Ok(value) => {
                    let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                    items.push(BundleItem {
                        relative_path: relative,
                        value,
                    });
                }
                Err(message) => warn!("Skipping descriptor {}: {}", path.display(), message),
            }
        }
    }
    Ok(())
}

async fn read_descriptor(path: &Path) -> Result<JsonValue, String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}

/// Route path from a descriptor's relative location: extension stripped,
/// `$` rewritten to the `:` parameter marker, rooted with `/`.
///
/// `users/$id.json` becomes `/users/:id`.
pub fn route_path_name(relative: &Path) -> String {
    let stem = relative.with_extension("");
    let joined = stem
        .components()
        .filter_map(|component| component.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{}", joined.replace('$', ":"))
}

/// Hook event suffix from a descriptor's relative location: extension
/// stripped, path separators and `.` both acting as the `:` namespace
/// separator.
///
/// `engine.ready.json` and `engine/ready.json` both become
/// `engine:ready`.
pub fn hook_event_name(relative: &Path) -> String {
    let stem = relative.with_extension("");
    stem.components()
        .filter_map(|component| component.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join(":")
        .replace('.', ":")
}
