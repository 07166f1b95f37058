use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{Agent, AgentRuntime, RunItem};
use crate::conversation::{ConversationMessage, Role};

type Responder = Box<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

/// One recorded invocation: who was asked, and the framing message they saw last
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedCall {
    pub agent: String,
    pub prompt: String,
}

/// Offline runtime that answers from a script instead of a model.
///
/// Replies are looked up in order: queued replies for the agent, the
/// responder closure, then the default reply.
pub struct ScriptedRuntime {
    queued: Mutex<HashMap<String, VecDeque<String>>>,
    responder: Option<Responder>,
    default_reply: String,
    stall: bool,
    failing: Option<(String, String)>,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(HashMap::new()),
            responder: None,
            default_reply: "NOOP".to_string(),
            stall: false,
            failing: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Answer `(agent, prompt)` pairs; `None` falls through to the default
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Queue a reply for the next time `agent` is invoked
    pub fn reply(self, agent: &str, text: impl Into<String>) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.entry(agent.to_string()).or_default().push_back(text.into());
        }
        self
    }

    /// Never answer, simulating a call that hangs
    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Fail whenever `agent` is invoked
    pub fn failing_on(mut self, agent: &str, error: impl Into<String>) -> Self {
        self.failing = Some((agent.to_string(), error.into()));
        self
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next_reply(&self, agent: &str, prompt: &str) -> String {
        let queued = self
            .queued
            .lock()
            .ok()
            .and_then(|mut q| q.get_mut(agent).and_then(|replies| replies.pop_front()));

        queued
            .or_else(|| self.responder.as_ref().and_then(|r| r(agent, prompt)))
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn run(&self, agent: &Agent, conversation: &[ConversationMessage]) -> Result<Vec<RunItem>> {
        let prompt = conversation
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ScriptedCall {
                agent: agent.name.clone(),
                prompt: prompt.clone(),
            });
        }

        if self.stall {
            std::future::pending::<()>().await;
        }

        if let Some((failing, error)) = &self.failing {
            if failing == &agent.name {
                bail!("{}", error);
            }
        }

        let text = self.next_reply(&agent.name, &prompt);
        Ok(vec![RunItem::Message {
            agent: agent.name.clone(),
            text,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ToolKind;

    fn agent(name: &str) -> Agent {
        Agent {
            name: name.to_string(),
            instructions: String::new(),
            model: "scripted".to_string(),
            tools: vec![ToolKind::ProjectTree],
            intro: String::new(),
        }
    }

    #[tokio::test]
    async fn test_queue_then_responder_then_default() {
        let runtime = ScriptedRuntime::new()
            .with_default("fallback")
            .with_responder(|agent, prompt| (agent == "A" && prompt == "ping").then(|| "pong".to_string()))
            .reply("A", "first");

        let ping = vec![ConversationMessage::user("ping")];
        let texts: Vec<String> = [
            runtime.run(&agent("A"), &ping).await.unwrap(),
            runtime.run(&agent("A"), &ping).await.unwrap(),
            runtime.run(&agent("B"), &ping).await.unwrap(),
        ]
        .into_iter()
        .map(|items| match &items[0] {
            RunItem::Message { text, .. } => text.clone(),
            other => panic!("unexpected item {:?}", other),
        })
        .collect();

        assert_eq!(texts, ["first", "pong", "fallback"]);
        assert_eq!(runtime.calls().len(), 3);
        assert_eq!(runtime.calls()[2], ScriptedCall { agent: "B".to_string(), prompt: "ping".to_string() });
    }

    #[tokio::test]
    async fn test_failing_agent_errors() {
        let runtime = ScriptedRuntime::new().failing_on("B", "network down");
        assert!(runtime.run(&agent("A"), &[]).await.is_ok());
        let err = runtime.run(&agent("B"), &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "network down");
    }
}
