use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::agents::team::AgentProfile;
use crate::providers::ProviderConfig;

pub const DEFAULT_GPT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainerConfig {
    pub default_model: String,
    pub results_dir: PathBuf,
    pub provider: ProviderSettings,
    /// Project name -> root directory
    pub projects: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub exclusions: Exclusions,
    #[serde(default)]
    pub operation: OperationDefaults,
    /// Replaces the built-in roster when non-empty
    #[serde(default)]
    pub agents: Vec<AgentProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exclusions {
    pub dirs: BTreeSet<String>,
    pub extensions: BTreeSet<String>,
    pub file_names: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDefaults {
    pub timeout_seconds: u64,
    pub max_steps: Option<u32>,
    /// Model round trips allowed within a single agent invocation
    pub max_turns: u32,
}

impl Default for Exclusions {
    fn default() -> Self {
        let set = |items: &[&str]| -> BTreeSet<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            dirs: set(&[
                "__pycache__", ".idea", ".vscode", ".pytest_cache", ".mypy_cache",
                ".git", ".venv", "env", "venv", "node_modules", "migrations", "target",
            ]),
            extensions: set(&[".pyc", ".pyo"]),
            file_names: set(&[".DS_Store", "Thumbs.db"]),
        }
    }
}

impl Default for OperationDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            max_steps: Some(10),
            max_turns: 13,
        }
    }
}

impl Default for RainerConfig {
    fn default() -> Self {
        let mut projects = BTreeMap::new();
        projects.insert("backend".to_string(), PathBuf::from("apps"));
        projects.insert("frontend".to_string(), PathBuf::from("_frontend/src"));

        Self {
            default_model: DEFAULT_GPT_MODEL.to_string(),
            results_dir: PathBuf::from("op_results"),
            provider: ProviderSettings {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: None, // User must provide
                timeout_secs: 120,
            },
            projects,
            exclusions: Exclusions::default(),
            operation: OperationDefaults::default(),
            agents: vec![],
        }
    }
}

impl RainerConfig {
    /// Load from the default location, writing a default file on first use
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        let config = if config_path.exists() {
            Self::read(&config_path)?
        } else {
            let default_config = Self::default();
            default_config.save_to(&config_path)?;
            default_config
        };

        Ok(config.with_env_overrides())
    }

    /// Load from an explicit path; the file must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        Ok(Self::read(path)?.with_env_overrides())
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn config_file_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".config").join("rainer").join("config.toml"))
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.provider.api_key = Some(key);
            }
        }
        self
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            api_key: self.provider.api_key.clone(),
            base_url: Some(self.provider.base_url.clone()),
            timeout_secs: Some(self.provider.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        RainerConfig::default().save_to(&path).unwrap();
        let loaded = RainerConfig::read(&path).unwrap();

        assert_eq!(loaded.default_model, DEFAULT_GPT_MODEL);
        assert_eq!(loaded.projects.get("backend"), Some(&PathBuf::from("apps")));
        assert_eq!(loaded.operation.max_steps, Some(10));
        assert!(loaded.exclusions.dirs.contains("node_modules"));
    }

    #[test]
    fn test_partial_config_uses_section_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, r#"
default_model = "gpt-4o"
results_dir = "runs"

[provider]
base_url = "http://localhost:11434/v1"
timeout_secs = 30

[projects]
web = "site/src"
"#).unwrap();

        let config = RainerConfig::read(&path).unwrap();
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.operation.timeout_seconds, 300);
        assert_eq!(config.operation.max_turns, 13);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RainerConfig::read(&dir.path().join("nope.toml")).is_err());
    }
}
