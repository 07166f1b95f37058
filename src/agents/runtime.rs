use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Agent, AgentRuntime, RunItem, ToolKind};
use crate::conversation::{ConversationMessage, Role};
use crate::providers::{CompletionRequest, LLMProvider, Message, ToolChoice};
use crate::workspace::ProjectIndex;

/// Agent runtime backed by a chat-completions provider. Function calls
/// returned by the model are executed against the project index and fed
/// back until the model answers with a plain message.
pub struct ProviderRuntime {
    provider: Arc<dyn LLMProvider>,
    index: Arc<dyn ProjectIndex>,
    max_turns: u32,
}

impl ProviderRuntime {
    pub fn new(provider: Arc<dyn LLMProvider>, index: Arc<dyn ProjectIndex>, max_turns: u32) -> Self {
        Self {
            provider,
            index,
            max_turns,
        }
    }

    fn to_messages(agent: &Agent, conversation: &[ConversationMessage]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(agent.instructions.clone()));

        for entry in conversation {
            messages.push(match entry.role {
                Role::User => Message::user(entry.content.clone()),
                Role::Assistant => Message::assistant(entry.content.clone()),
                Role::Tool => Message::function(
                    entry.name.clone().unwrap_or_else(|| "tool".to_string()),
                    entry.content.clone(),
                ),
            });
        }

        messages
    }
}

#[async_trait]
impl AgentRuntime for ProviderRuntime {
    async fn run(&self, agent: &Agent, conversation: &[ConversationMessage]) -> Result<Vec<RunItem>> {
        let mut messages = Self::to_messages(agent, conversation);
        let functions = (!agent.tools.is_empty())
            .then(|| agent.tools.iter().map(|t| t.definition()).collect::<Vec<_>>());
        let mut items = Vec::new();

        for turn in 1..=self.max_turns {
            let prompt_tokens: u32 = messages.iter().map(|m| self.provider.estimate_tokens(&m.content)).sum();
            debug!("{} turn {} (~{} prompt tokens)", agent.name, turn, prompt_tokens);

            let request = CompletionRequest {
                messages: messages.clone(),
                model: agent.model.clone(),
                temperature: None,
                max_tokens: None,
                tool_choice: functions.as_ref().map(|_| ToolChoice::Auto),
                functions: functions.clone(),
            };
            let response = self.provider.complete(request).await?;

            let Some(call) = response.function_call else {
                items.push(RunItem::Message {
                    agent: agent.name.clone(),
                    text: response.content,
                });
                return Ok(items);
            };

            info!("{}: calling tool {}", agent.name, call.name);
            items.push(RunItem::ToolCall {
                agent: agent.name.clone(),
                tool: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            let output = match ToolKind::from_name(&call.name).filter(|t| agent.tools.contains(t)) {
                Some(tool) => tool.invoke(&call.arguments, self.index.as_ref()),
                None => {
                    warn!("{} requested unavailable tool {}", agent.name, call.name);
                    format!("Tool '{}' is not available", call.name)
                }
            };
            debug!("{}: tool {} returned {} bytes", agent.name, call.name, output.len());

            items.push(RunItem::ToolOutput {
                agent: agent.name.clone(),
                tool: call.name.clone(),
                output: output.clone(),
            });

            let mut assistant = Message::assistant(response.content);
            assistant.function_call = Some(call.clone());
            messages.push(assistant);
            messages.push(Message::function(call.name, output));
        }

        bail!("{} exceeded {} turns without answering", agent.name, self.max_turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, FunctionCall, MessageRole};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct StaticIndex;

    impl ProjectIndex for StaticIndex {
        fn tree(&self, _project: &str) -> Value {
            json!({"api.py": "api.py"})
        }

        fn read_file(&self, _project: &str, _path: &str) -> Option<String> {
            Some("print('hi')".to_string())
        }

        fn file_path(&self, _project: &str, path: &str) -> Option<PathBuf> {
            Some(PathBuf::from(path))
        }
    }

    /// Replies with queued responses and keeps every request it saw
    struct QueuedProvider {
        responses: Mutex<Vec<CompletionResponse>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl QueuedProvider {
        fn new(mut responses: Vec<CompletionResponse>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for QueuedProvider {
        fn name(&self) -> &str {
            "queued"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("no more responses"))
        }

        async fn validate_config(&self) -> Result<()> {
            Ok(())
        }
    }

    fn text(content: &str) -> CompletionResponse {
        CompletionResponse {
            content: content.to_string(),
            model: "test".to_string(),
            usage: None,
            function_call: None,
        }
    }

    fn call(name: &str, arguments: &str) -> CompletionResponse {
        CompletionResponse {
            content: String::new(),
            model: "test".to_string(),
            usage: None,
            function_call: Some(FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            }),
        }
    }

    fn agent() -> Agent {
        Agent {
            name: "OVERDRIVE".to_string(),
            instructions: "Lead.".to_string(),
            model: "gpt-4o-mini".to_string(),
            tools: vec![ToolKind::ProjectFileLookup, ToolKind::ProjectTree],
            intro: String::new(),
        }
    }

    #[tokio::test]
    async fn test_tool_output_precedes_final_message() {
        let provider = Arc::new(QueuedProvider::new(vec![
            call("project_file_lookup", r#"{"project": "backend", "path": "api.py"}"#),
            text("TASK_OUTPUT\nprint('hi')"),
        ]));
        let runtime = ProviderRuntime::new(provider.clone(), Arc::new(StaticIndex), 13);
        let conversation = vec![ConversationMessage::user("--- START ---")];

        let items = runtime.run(&agent(), &conversation).await.unwrap();

        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], RunItem::ToolCall { tool, .. } if tool == "project_file_lookup"));
        assert!(matches!(&items[1], RunItem::ToolOutput { output, .. } if output == "print('hi')"));
        assert!(matches!(&items[2], RunItem::Message { text, .. } if text.starts_with("TASK_OUTPUT")));

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages[0].role, MessageRole::System);
        assert!(requests[0].functions.as_ref().is_some_and(|f| f.len() == 2));
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, MessageRole::Function);
        assert_eq!(last.content, "print('hi')");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_turns() {
        let provider = Arc::new(QueuedProvider::new(vec![
            call("project_tree", r#"{"project": "backend"}"#),
            call("project_tree", r#"{"project": "backend"}"#),
            call("project_tree", r#"{"project": "backend"}"#),
        ]));
        let runtime = ProviderRuntime::new(provider, Arc::new(StaticIndex), 2);

        let err = runtime.run(&agent(), &[]).await.unwrap_err();
        assert!(err.to_string().contains("exceeded 2 turns"));
    }

    #[tokio::test]
    async fn test_unavailable_tool_is_reported_to_model() {
        let provider = Arc::new(QueuedProvider::new(vec![call("delete_everything", "{}"), text("NOOP")]));
        let runtime = ProviderRuntime::new(provider, Arc::new(StaticIndex), 13);

        let items = runtime.run(&agent(), &[]).await.unwrap();
        assert!(matches!(&items[1], RunItem::ToolOutput { output, .. } if output.contains("not available")));
        assert!(matches!(&items[2], RunItem::Message { text, .. } if text == "NOOP"));
    }

    #[test]
    fn test_transcript_roles_map_to_provider_roles() {
        let conversation = vec![
            ConversationMessage::user("go"),
            ConversationMessage::assistant("NEONRAIL", "done"),
            ConversationMessage::tool("project_tree", "{}"),
        ];
        let messages = ProviderRuntime::to_messages(&agent(), &conversation);
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, [MessageRole::System, MessageRole::User, MessageRole::Assistant, MessageRole::Function]);
        assert_eq!(messages[3].function_call.as_ref().unwrap().name, "project_tree");
    }
}
