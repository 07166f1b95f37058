pub mod tree;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

use crate::config::Exclusions;

pub use tree::{build_nested_tree, ROOT_KEY};

/// Read-only view of the project files handed to operations and tools
pub trait ProjectIndex: Send + Sync {
    /// Cached tree for a project, `{}` when the project is unknown
    fn tree(&self, project: &str) -> Value;

    /// Contents of a project file, `None` if it does not exist
    fn read_file(&self, project: &str, path: &str) -> Option<String>;

    /// Absolute location of a project file, `None` for unknown projects
    fn file_path(&self, project: &str, path: &str) -> Option<PathBuf>;
}

/// Project roots on disk plus a tree cache refreshed after every mutation
pub struct Workspace {
    projects: BTreeMap<String, PathBuf>,
    exclusions: Exclusions,
    trees: RwLock<BTreeMap<String, Value>>,
}

impl Workspace {
    pub fn new(projects: BTreeMap<String, PathBuf>, exclusions: Exclusions) -> Self {
        let workspace = Self {
            projects,
            exclusions,
            trees: RwLock::new(BTreeMap::new()),
        };
        workspace.refresh();
        workspace
    }

    pub fn projects(&self) -> impl Iterator<Item = &str> {
        self.projects.keys().map(|s| s.as_str())
    }

    /// Rebuild every project tree from disk
    pub fn refresh(&self) {
        let rebuilt: BTreeMap<String, Value> = self
            .projects
            .iter()
            .map(|(project, root)| {
                let mut tree = Map::new();
                tree.insert(ROOT_KEY.to_string(), Value::String(slashes(root)));
                tree.extend(build_nested_tree(root, &self.exclusions));
                (project.clone(), Value::Object(tree))
            })
            .collect();

        debug!("Refreshed {} project trees", rebuilt.len());
        match self.trees.write() {
            Ok(mut trees) => *trees = rebuilt,
            Err(poisoned) => *poisoned.into_inner() = rebuilt,
        }
    }

    /// Snapshot of all cached trees
    pub fn trees(&self) -> Value {
        let trees = match self.trees.read() {
            Ok(trees) => trees.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Value::Object(trees.into_iter().collect())
    }

    fn resolve(&self, project: &str, relative_path: &str) -> Result<PathBuf> {
        let root = self
            .projects
            .get(project)
            .with_context(|| format!("Unknown project '{}'", project))?;

        let relative = Path::new(relative_path);
        if relative_path.trim().is_empty()
            || relative.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("Invalid path '{}' for project '{}'", relative_path, project);
        }

        Ok(root.join(relative))
    }

    pub fn create_file(&self, project: &str, relative_path: &str, content: &str) -> Result<()> {
        let path = self.resolve(project, relative_path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.refresh();
        Ok(())
    }

    /// Overwrite an existing file; returns false when there is nothing to update
    pub fn update_file(&self, project: &str, relative_path: &str, content: &str) -> Result<bool> {
        let path = self.resolve(project, relative_path)?;
        if !path.is_file() {
            return Ok(false);
        }
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.refresh();
        Ok(true)
    }

    pub fn delete_file(&self, project: &str, relative_path: &str) -> Result<bool> {
        let path = self.resolve(project, relative_path)?;
        if !path.is_file() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to delete {}", path.display()))?;
        self.refresh();
        Ok(true)
    }

    pub fn create_directory(&self, project: &str, relative_path: &str) -> Result<()> {
        let path = self.resolve(project, relative_path)?;
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        self.refresh();
        Ok(())
    }

    pub fn delete_directory(&self, project: &str, relative_path: &str) -> Result<bool> {
        let path = self.resolve(project, relative_path)?;
        if !path.is_dir() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&path)
            .with_context(|| format!("Failed to delete {}", path.display()))?;
        self.refresh();
        Ok(true)
    }
}

impl ProjectIndex for Workspace {
    fn tree(&self, project: &str) -> Value {
        let trees = match self.trees.read() {
            Ok(trees) => trees,
            Err(poisoned) => poisoned.into_inner(),
        };
        trees
            .get(project)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    fn read_file(&self, project: &str, path: &str) -> Option<String> {
        let path = self.resolve(project, path).ok()?;
        if !path.is_file() {
            return None;
        }
        std::fs::read_to_string(path).ok()
    }

    fn file_path(&self, project: &str, path: &str) -> Option<PathBuf> {
        self.resolve(project, path).ok()
    }
}

fn slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace_in(dir: &Path) -> Workspace {
        let mut projects = BTreeMap::new();
        projects.insert("backend".to_string(), dir.join("apps"));
        Workspace::new(projects, Exclusions::default())
    }

    #[test]
    fn test_mutations_refresh_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_in(dir.path());
        assert!(workspace.tree("backend").get("users").is_none());

        workspace.create_file("backend", "users/endpoints.py", "def ping(): pass").unwrap();
        assert_eq!(workspace.tree("backend")["users"]["endpoints.py"], "users/endpoints.py");
        assert_eq!(
            workspace.read_file("backend", "users/endpoints.py").as_deref(),
            Some("def ping(): pass")
        );

        assert!(workspace.delete_file("backend", "users/endpoints.py").unwrap());
        assert!(workspace.tree("backend")["users"].get("endpoints.py").is_none());

        assert!(workspace.delete_directory("backend", "users").unwrap());
        assert!(workspace.tree("backend").get("users").is_none());
    }

    #[test]
    fn test_create_directory_shows_up_empty() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_in(dir.path());

        workspace.create_directory("backend", "billing/migrations").unwrap();
        assert!(dir.path().join("apps/billing/migrations").is_dir());
        assert_eq!(workspace.tree("backend")["billing"]["migrations"], serde_json::json!({}));

        assert!(workspace.create_directory("backend", "../escape").is_err());
        assert!(workspace.create_directory("frontend", "src").is_err());
    }

    #[test]
    fn test_update_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_in(dir.path());

        assert!(!workspace.update_file("backend", "missing.py", "x = 1").unwrap());
        assert!(workspace.read_file("backend", "missing.py").is_none());

        workspace.create_file("backend", "present.py", "x = 1").unwrap();
        assert!(workspace.update_file("backend", "present.py", "x = 2").unwrap());
        assert_eq!(workspace.read_file("backend", "present.py").as_deref(), Some("x = 2"));
    }

    #[test]
    fn test_paths_cannot_escape_the_project() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_in(dir.path());

        assert!(workspace.create_file("backend", "../outside.py", "").is_err());
        assert!(workspace.create_file("backend", "/etc/passwd", "").is_err());
        assert!(workspace.create_file("frontend", "app.tsx", "").is_err());
        assert!(workspace.read_file("backend", "../outside.py").is_none());
    }

    #[test]
    fn test_unknown_project_tree_is_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_in(dir.path());
        assert_eq!(workspace.tree("nope"), serde_json::json!({}));
        assert!(workspace.tree("backend").get(ROOT_KEY).is_some());
    }
}
