//! Local override files layered over the base configuration document.

use std::path::{Path, PathBuf};

use serde_json::Value;
use walkdir::WalkDir;

use crate::error::{EtlError, Result};

/// Deep-merges `overlay` into `base`.
///
/// Objects merge key by key and an explicit `null` removes the key. Arrays
/// whose elements are all objects carrying a `name` merge element-wise by
/// that name, with unknown names appended. Anything else is replaced.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    base_map.remove(&key);
                    continue;
                }
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(overlay_items))
            if is_named_list(base_items.as_slice()) && is_named_list(&overlay_items) =>
        {
            for item in overlay_items {
                let name = item_name(&item).map(str::to_string);
                match base_items
                    .iter_mut()
                    .find(|existing| item_name(existing) == name.as_deref())
                {
                    Some(existing) => merge(existing, item),
                    None => base_items.push(item),
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn item_name(item: &Value) -> Option<&str> {
    item.get("name").and_then(Value::as_str)
}

fn is_named_list(items: &[Value]) -> bool {
    items.iter().all(|item| item_name(item).is_some())
}

/// `*.json` files directly inside `dir`, sorted by file name. A missing
/// directory yields no files.
pub fn override_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        log::debug!("No local override directory at {}", dir.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| EtlError::ReadFile {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}
