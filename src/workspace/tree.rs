use serde_json::{Map, Value};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Exclusions;

/// Key holding the project root inside every tree
pub const ROOT_KEY: &str = "__path__";

/// Build `{dir: {...}, file: "rel/path"}` for everything under `root`,
/// skipping excluded directories, extensions and file names.
pub fn build_nested_tree(root: &Path, exclusions: &Exclusions) -> Map<String, Value> {
    let mut tree = Map::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir() && exclusions.dirs.contains(&*entry.file_name().to_string_lossy()))
        });

    for entry in walker.filter_map(|e| e.ok()) {
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        if entry.file_type().is_dir() {
            node_at(&mut tree, &parts);
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        if is_excluded_file(&file_name, exclusions) {
            continue;
        }

        let (_, dirs) = match parts.split_last() {
            Some(split) => split,
            None => continue,
        };
        if let Some(node) = node_at(&mut tree, dirs) {
            node.insert(file_name, Value::String(parts.join("/")));
        }
    }

    tree
}

fn is_excluded_file(file_name: &str, exclusions: &Exclusions) -> bool {
    if exclusions.file_names.contains(file_name) {
        return true;
    }
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => exclusions.extensions.contains(&file_name[idx..]),
        _ => false,
    }
}

// Walks (creating as needed) the nested object for `parts`
fn node_at<'a>(tree: &'a mut Map<String, Value>, parts: &[String]) -> Option<&'a mut Map<String, Value>> {
    let mut node = tree;
    for part in parts {
        let slot = node
            .entry(part.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(map) = slot else {
            return None;
        };
        node = map;
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_tree_nests_directories_and_skips_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("users/__pycache__")).unwrap();
        fs::create_dir_all(root.join("node_modules/react")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("users/models.py"), "class User: pass").unwrap();
        fs::write(root.join("users/models.pyc"), "").unwrap();
        fs::write(root.join("users/__pycache__/models.cpython.pyc"), "").unwrap();
        fs::write(root.join("node_modules/react/index.js"), "").unwrap();
        fs::write(root.join(".DS_Store"), "").unwrap();
        fs::write(root.join("manage.py"), "").unwrap();

        let tree = build_nested_tree(root, &Exclusions::default());

        assert_eq!(tree["manage.py"], "manage.py");
        assert_eq!(tree["users"]["models.py"], "users/models.py");
        assert!(tree["users"].get("models.pyc").is_none());
        assert!(tree["users"].get("__pycache__").is_none());
        assert!(tree.get("node_modules").is_none());
        assert!(tree.get(".DS_Store").is_none());
        assert_eq!(tree["empty"], serde_json::json!({}));
    }

    #[test]
    fn test_missing_root_yields_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let tree = build_nested_tree(&dir.path().join("absent"), &Exclusions::default());
        assert!(tree.is_empty());
    }
}
