pub mod runtime;
pub mod scripted;
pub mod team;
pub mod tools;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationMessage;

pub use runtime::ProviderRuntime;
pub use scripted::ScriptedRuntime;
pub use team::{AgentProfile, AgentRoster, LEAD};
pub use tools::ToolKind;

/// A named persona that can be asked to continue a conversation.
/// Immutable for the lifetime of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: Vec<ToolKind>,
    pub intro: String,
}

/// Items produced by one agent invocation, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum RunItem {
    Message { agent: String, text: String },
    ToolCall { agent: String, tool: String, arguments: String },
    ToolOutput { agent: String, tool: String, output: String },
    Handoff { from: String, to: String },
}

/// The LLM runtime: run an agent against the full transcript and return
/// whatever it produced
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, agent: &Agent, conversation: &[ConversationMessage]) -> Result<Vec<RunItem>>;
}
