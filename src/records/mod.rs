//! Durable traces of finished runs: a per-operation results ledger and an
//! append-only code generation log.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::conversation::ConversationMessage;

/// `results` and `errors` keyed `run_N`, sharing one numbering
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerFile {
    #[serde(default)]
    pub results: Map<String, Value>,
    #[serde(default)]
    pub errors: Map<String, Value>,
}

impl LedgerFile {
    fn next_run_key(&self) -> String {
        let next = self
            .results
            .keys()
            .chain(self.errors.keys())
            .filter_map(|key| key.strip_prefix("run_")?.parse::<u64>().ok())
            .max()
            .map_or(0, |max| max + 1);
        format!("run_{}", next)
    }
}

/// JSON results ledger stored as `<root>/<op>/<file>.json`
pub struct RunLedger {
    root: PathBuf,
}

impl RunLedger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, op: &str, file: &str) -> PathBuf {
        self.root.join(op).join(format!("{}.json", file))
    }

    /// Record one run and return its key
    pub fn store(&self, op: &str, file: &str, success: bool, value: Value) -> Result<String> {
        let path = self.path_for(op, file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create ledger directory {}", parent.display()))?;
        }

        let mut ledger = Self::load(&path);
        let key = ledger.next_run_key();
        if success {
            ledger.results.insert(key.clone(), value);
        } else {
            ledger.errors.insert(key.clone(), value);
        }

        let content = serde_json::to_string_pretty(&ledger)?;
        fs::write(&path, content).with_context(|| format!("Failed to write ledger {}", path.display()))?;
        debug!("Stored {} in {}", key, path.display());
        Ok(key)
    }

    /// Missing or unreadable ledgers start over empty
    pub fn load(path: &Path) -> LedgerFile {
        let Ok(content) = fs::read_to_string(path) else {
            return LedgerFile::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Resetting corrupt ledger {}: {}", path.display(), e);
            LedgerFile::default()
        })
    }
}

/// One model answer kept for later review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeGenerationRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub llm_model: String,
    pub instructions: Vec<ConversationMessage>,
    pub response: String,
    pub project: String,
    pub path: String,
    pub drop_number: u32,
}

impl CodeGenerationRecord {
    pub fn new(
        llm_model: impl Into<String>,
        instructions: Vec<ConversationMessage>,
        response: impl Into<String>,
        project: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            llm_model: llm_model.into(),
            instructions,
            response: response.into(),
            project: project.into(),
            path: path.into(),
            drop_number: drop_number(),
        }
    }
}

/// JSON-lines log of generated code
pub struct CodeGenerationLog {
    path: PathBuf,
}

impl CodeGenerationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, record: &CodeGenerationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<CodeGenerationRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        fs::read_to_string(&self.path)?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("Malformed code generation record"))
            .collect()
    }
}

/// Pick a value with probability proportional to its weight. `None` when
/// every weight is zero.
pub fn weighted_choice<T: Copy>(choices: &[(T, u32)]) -> Option<T> {
    let total: u64 = choices.iter().map(|(_, w)| u64::from(*w)).sum();
    if total == 0 {
        return None;
    }
    let roll = rand::rng().random_range(1..=total);
    pick(choices, roll)
}

fn pick<T: Copy>(choices: &[(T, u32)], roll: u64) -> Option<T> {
    let mut cumulative = 0u64;
    for (value, weight) in choices {
        cumulative += u64::from(*weight);
        if roll <= cumulative {
            return Some(*value);
        }
    }
    None
}

/// 1 is the common drop, 2 to 10 are uncommon and 0 almost never happens
pub fn drop_number() -> u32 {
    let mut weights = vec![(0, 1), (1, 1000)];
    weights.extend((2..=10).map(|n| (n, 100)));
    weighted_choice(&weights).unwrap_or(0)
}
