use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::providers::Function;
use crate::workspace::ProjectIndex;

/// Capabilities an agent may call while answering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ProjectFileLookup,
    ProjectTree,
}

impl ToolKind {
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::ProjectFileLookup => "project_file_lookup",
            ToolKind::ProjectTree => "project_tree",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "project_file_lookup" => Some(ToolKind::ProjectFileLookup),
            "project_tree" => Some(ToolKind::ProjectTree),
            _ => None,
        }
    }

    pub fn definition(&self) -> Function {
        match self {
            ToolKind::ProjectFileLookup => Function {
                name: self.name().to_string(),
                description: "Lookup files in the project directory by providing a relative file path".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "project": { "type": "string", "description": "Project name (case sensitive)" },
                        "path": { "type": "string", "description": "File path relative to the project root" }
                    },
                    "required": ["project", "path"]
                }),
            },
            ToolKind::ProjectTree => Function {
                name: self.name().to_string(),
                description: "Provides the tree structure of the given project".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "project": { "type": "string", "description": "Project name (case sensitive)" }
                    },
                    "required": ["project"]
                }),
            },
        }
    }

    /// Execute against the project index. Bad arguments are reported back to
    /// the model as text rather than failing the run.
    pub fn invoke(&self, arguments: &str, index: &dyn ProjectIndex) -> String {
        let args: serde_json::Value = match serde_json::from_str(arguments) {
            Ok(args) => args,
            Err(e) => return format!("Invalid arguments for {}: {}", self.name(), e),
        };
        let arg = |key: &str| args.get(key).and_then(|v| v.as_str()).unwrap_or("").trim().to_string();

        match self {
            ToolKind::ProjectFileLookup => {
                let project = arg("project");
                let path = arg("path");
                if project.is_empty() {
                    return "No project name provided".to_string();
                }
                if path.is_empty() {
                    return "No path provided".to_string();
                }
                index
                    .read_file(&project, &path)
                    .filter(|content| !content.is_empty())
                    .unwrap_or_else(|| "File does not exist".to_string())
            }
            ToolKind::ProjectTree => index.tree(&arg("project")).to_string(),
        }
    }
}
