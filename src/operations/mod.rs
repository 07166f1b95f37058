//! Turn-based orchestration of an agent team.
//!
//! An [`Operation`] owns the transcript and drives its [`OperationSpec`]
//! through phase cycles until the lead answers with a sentinel-prefixed
//! message or the step budget runs out. [`runner`] executes it on a
//! dedicated worker under a wall-clock timeout.

pub mod make_file;
pub mod phases;
pub mod refactor;
pub mod requirements;
pub mod runner;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::agents::{Agent, AgentRoster, AgentRuntime, RunItem};
use crate::config::OperationDefaults;
use crate::conversation::ConversationMessage;
use crate::workspace::ProjectIndex;

pub use make_file::MakeFileSpec;
pub use refactor::RefactorSpec;
pub use requirements::RequirementsSpec;

pub const TASK_OUTPUT: &str = "TASK_OUTPUT";
pub const TASK_FAILED: &str = "TASK_FAILED";

/// Prefixes the lead uses to end a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels {
    pub complete: &'static str,
    pub failed: Option<&'static str>,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            complete: TASK_OUTPUT,
            failed: Some(TASK_FAILED),
        }
    }
}

/// How a run ended when the lead emitted a sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Everything after the completion sentinel, untouched
    Delivered(String),
    /// Everything after the failure sentinel, trimmed
    Failed(String),
}

impl Sentinels {
    /// True iff the trimmed message starts with one of the sentinels
    pub fn done(&self, message: &str) -> bool {
        self.parse(message).is_some()
    }

    pub fn parse(&self, message: &str) -> Option<Completion> {
        let anchored = message.trim_start();
        if let Some(rest) = anchored.strip_prefix(self.complete) {
            return Some(Completion::Delivered(rest.to_string()));
        }
        let failed = self.failed?;
        anchored
            .strip_prefix(failed)
            .map(|rest| Completion::Failed(rest.trim().to_string()))
    }
}

/// Terminal output of a run, the `(success, message)` pair callers consume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }

    /// Nothing was asked for, so nothing was run
    pub fn noop() -> Self {
        Self::failure("No instruction provided; nothing to do.")
    }

    pub fn into_tuple(self) -> (bool, String) {
        (self.success, self.message)
    }
}

impl From<Completion> for OperationResult {
    fn from(completion: Completion) -> Self {
        match completion {
            Completion::Delivered(content) => Self::success(content),
            Completion::Failed(reason) if reason.is_empty() => {
                Self::failure("The team could not complete the task.")
            }
            Completion::Failed(reason) => Self::failure(reason),
        }
    }
}

impl From<OperationResult> for (bool, String) {
    fn from(result: OperationResult) -> Self {
        result.into_tuple()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("Maximum operation loop steps ({max_steps}) exceeded")]
    StepBudgetExceeded { max_steps: u32 },

    #[error("Operation timed out after {} seconds.", .after.as_secs_f64())]
    Timeout { after: Duration },

    #[error("Operation has already been run")]
    AlreadyStarted,

    #[error("Operation worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Agent(#[from] anyhow::Error),
}

/// Per-use-case behaviour: task framing, completion prompt and sentinels.
/// The phase structure itself is shared.
#[async_trait]
pub trait OperationSpec: Send + Sync {
    /// Short label for logs and ledgers
    fn kind(&self) -> &'static str;

    /// Framing messages appended once, before the first cycle
    fn init(&self, state: &OperationState) -> Vec<String>;

    /// Final question to the lead at the end of every summary phase
    fn completion_prompt(&self, state: &OperationState) -> String;

    fn sentinels(&self) -> Sentinels {
        Sentinels::default()
    }

    /// One full cycle: assess, implement, summarise
    async fn run_cycle(&self, state: &mut OperationState) -> Result<()> {
        let completion_prompt = self.completion_prompt(state);
        phases::assess(state).await?;
        phases::implement(state).await?;
        phases::summarize(state, &completion_prompt).await
    }
}

/// Everything needed to assemble an operation
#[derive(Clone)]
pub struct OperationParams {
    pub project: String,
    pub path: Option<String>,
    pub instruction: String,
    pub output_instruction: String,
    pub lead: Arc<Agent>,
    pub agents: Vec<Arc<Agent>>,
    pub max_steps: Option<u32>,
    pub timeout: Duration,
    pub trace: String,
}

/// A request aimed at a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    pub project: String,
    pub path: String,
    pub instruction: String,
}

/// A project-wide request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub project: String,
    pub instruction: String,
}

/// Shared collaborators the use cases build operations from
#[derive(Clone)]
pub struct OperationContext {
    pub roster: AgentRoster,
    pub runtime: Arc<dyn AgentRuntime>,
    pub index: Arc<dyn ProjectIndex>,
    pub defaults: OperationDefaults,
}

impl OperationContext {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.defaults.timeout_seconds)
    }

    /// Params with the configured lead, the given team and the default budgets
    pub fn params(
        &self,
        team: &[&str],
        project: &str,
        path: Option<&str>,
        instruction: &str,
        output_instruction: &str,
        trace: String,
    ) -> Result<OperationParams> {
        Ok(OperationParams {
            project: project.to_string(),
            path: path.map(str::to_string),
            instruction: instruction.to_string(),
            output_instruction: output_instruction.to_string(),
            lead: self.roster.lead()?,
            agents: self.roster.team(team)?,
            max_steps: self.defaults.max_steps,
            timeout: self.timeout(),
            trace,
        })
    }
}

/// Build with `prepare` and run to completion; blank instructions never
/// reach an agent.
pub(crate) async fn prepare_and_run<F>(instruction: &str, prepare: F) -> OperationResult
where
    F: FnOnce() -> Result<Operation>,
{
    if instruction.trim().is_empty() {
        info!("Empty instruction, nothing to run");
        return OperationResult::noop();
    }
    match prepare() {
        Ok(operation) => runner::run_async(operation).await,
        Err(e) => {
            tracing::error!("Could not prepare operation: {:#}", e);
            OperationResult::failure(e.to_string())
        }
    }
}

/// The mutable state of one run. Owned exclusively by its [`Operation`].
pub struct OperationState {
    pub conversation_id: String,
    pub project: String,
    pub path: Option<String>,
    pub instruction: String,
    pub output_instruction: String,
    pub lead: Arc<Agent>,
    pub agents: Vec<Arc<Agent>>,
    pub conversation: Vec<ConversationMessage>,
    pub last_message: String,
    pub message_history: Vec<String>,
    pub current_step: u32,
    pub max_steps: Option<u32>,
    pub timeout: Duration,
    pub trace: String,
    runtime: Arc<dyn AgentRuntime>,
}

impl OperationState {
    pub fn add_as_user<I, S>(&mut self, messages: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conversation
            .extend(messages.into_iter().map(ConversationMessage::user));
        self
    }

    /// Invoke one agent against the full transcript and append what it produced
    pub async fn run_with_agent(&mut self, agent: &Agent) -> Result<()> {
        debug!("{} is up (round {})", agent.name, self.current_step);
        let runtime = self.runtime.clone();
        let items = runtime.run(agent, &self.conversation).await?;

        for item in items {
            match item {
                RunItem::Message { agent, text } => {
                    self.last_message = text.clone();
                    self.message_history.push(text.clone());
                    self.conversation.push(ConversationMessage::assistant(agent, text));
                }
                RunItem::ToolCall { agent, tool, arguments } => {
                    debug!("{}: called {} with {}", agent, tool, arguments);
                }
                RunItem::ToolOutput { agent, tool, output } => {
                    debug!("{}: {} returned {} bytes", agent, tool, output.len());
                    self.conversation.push(ConversationMessage::tool(tool, output));
                }
                RunItem::Handoff { from, to } => {
                    info!("Handed off from {} to {}", from, to);
                }
            }
        }

        Ok(())
    }

    pub fn get_agent(&self, name: &str) -> Option<&Arc<Agent>> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Introductions of the lead followed by the team, in team order
    pub fn agent_intros(&self) -> String {
        std::iter::once(&self.lead)
            .chain(self.agents.iter())
            .map(|a| format!("{}: \"{}\"", a.name, if a.intro.is_empty() { "NO_INTRO" } else { a.intro.as_str() }))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Target path, or an empty string for project-wide operations
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }
}

/// One run of a use case: the state plus the behaviour driving it
pub struct Operation {
    state: OperationState,
    spec: Box<dyn OperationSpec>,
    started: bool,
}

impl Operation {
    pub fn new(spec: Box<dyn OperationSpec>, params: OperationParams, runtime: Arc<dyn AgentRuntime>) -> Self {
        let conversation_id = uuid::Uuid::new_v4().simple().to_string()[..16].to_string();
        Self {
            state: OperationState {
                conversation_id,
                project: params.project,
                path: params.path.filter(|p| !p.is_empty()),
                instruction: params.instruction,
                output_instruction: params.output_instruction,
                lead: params.lead,
                agents: params.agents,
                conversation: Vec::new(),
                last_message: String::new(),
                message_history: Vec::new(),
                current_step: 1,
                max_steps: params.max_steps,
                timeout: params.timeout,
                trace: params.trace,
                runtime,
            },
            spec,
            started: false,
        }
    }

    pub fn state(&self) -> &OperationState {
        &self.state
    }

    pub fn kind(&self) -> &'static str {
        self.spec.kind()
    }

    pub fn timeout(&self) -> Duration {
        self.state.timeout
    }

    pub fn done_if(&self) -> bool {
        self.spec.sentinels().done(&self.state.last_message)
    }

    /// Seed the transcript and cycle until a sentinel shows up or the step
    /// budget is spent. Runs at most once per operation.
    pub async fn execute(&mut self) -> Result<OperationResult, OperationError> {
        if self.started {
            return Err(OperationError::AlreadyStarted);
        }
        self.started = true;

        info!("Starting {} ({})", self.spec.kind(), self.state.trace);
        self.state.add_as_user(["--- START ---"]);
        let framing = self.spec.init(&self.state);
        self.state.add_as_user(framing);

        loop {
            if let Some(completion) = self.spec.sentinels().parse(&self.state.last_message) {
                info!("{} finished after {} step(s)", self.spec.kind(), self.state.current_step - 1);
                return Ok(completion.into());
            }

            if let Some(max_steps) = self.state.max_steps {
                if self.state.current_step > max_steps {
                    return Err(OperationError::StepBudgetExceeded { max_steps });
                }
            }

            let step = self.state.current_step;
            self.state.add_as_user([format!("--- ITERATION {} ---", step)]);
            self.spec.run_cycle(&mut self.state).await?;
            self.state.current_step += 1;
        }
    }
}

pub(crate) fn conversation_label(kind: &str, project: &str, detail: &str) -> String {
    format!("{} : {} | {}", kind, project, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ScriptedRuntime, ToolKind};

    fn agent(name: &str) -> Arc<Agent> {
        Arc::new(Agent {
            name: name.to_string(),
            instructions: String::new(),
            model: "scripted".to_string(),
            tools: vec![ToolKind::ProjectTree],
            intro: format!("I am {}", name),
        })
    }

    struct PlainSpec;

    #[async_trait]
    impl OperationSpec for PlainSpec {
        fn kind(&self) -> &'static str {
            "PLAIN"
        }

        fn init(&self, state: &OperationState) -> Vec<String> {
            vec![format!("TASK: {}", state.instruction)]
        }

        fn completion_prompt(&self, state: &OperationState) -> String {
            format!("{}, are we done?", state.lead.name)
        }
    }

    fn operation(runtime: Arc<ScriptedRuntime>, max_steps: Option<u32>) -> Operation {
        Operation::new(
            Box::new(PlainSpec),
            OperationParams {
                project: "backend".to_string(),
                path: None,
                instruction: "do it".to_string(),
                output_instruction: "plaintext".to_string(),
                lead: agent("LEAD"),
                agents: vec![agent("A"), agent("B")],
                max_steps,
                timeout: Duration::from_secs(5),
                trace: "PLAIN : backend | do it".to_string(),
            },
            runtime,
        )
    }

    #[test]
    fn test_sentinel_determinism() {
        let sentinels = Sentinels::default();
        assert!(sentinels.done("TASK_OUTPUT"));
        assert!(sentinels.done("  \n TASK_OUTPUT\nfn main() {}"));
        assert!(sentinels.done("TASK_FAILED ambiguous"));
        assert!(!sentinels.done(""));
        assert!(!sentinels.done("Result: TASK_OUTPUT"));
        assert!(!sentinels.done("TASK _OUTPUT"));
        assert!(!sentinels.done("task_output"));
        assert!(!sentinels.done(">>>TASK_OUTPUT"));
        assert!(!sentinels.done("TASK_REFINEMENT"));

        let no_failure = Sentinels { complete: TASK_OUTPUT, failed: None };
        assert!(!no_failure.done("TASK_FAILED"));
    }

    #[test]
    fn test_sentinel_stripping_keeps_remainder() {
        let sentinels = Sentinels::default();
        assert_eq!(
            sentinels.parse("TASK_OUTPUT\ndef foo(): pass"),
            Some(Completion::Delivered("\ndef foo(): pass".to_string()))
        );
        assert_eq!(
            sentinels.parse("  TASK_OUTPUT  x  "),
            Some(Completion::Delivered("  x  ".to_string()))
        );
        assert_eq!(
            sentinels.parse("TASK_FAILED  the path is ambiguous \n"),
            Some(Completion::Failed("the path is ambiguous".to_string()))
        );
    }

    #[test]
    fn test_failure_completion_maps_to_unsuccessful_result() {
        let result: OperationResult = Completion::Failed(String::new()).into();
        assert!(!result.success);
        assert!(!result.message.is_empty());
        assert_eq!(OperationResult::success("x").into_tuple(), (true, "x".to_string()));
    }

    #[tokio::test]
    async fn test_cycle_order_is_deterministic() {
        let runtime = Arc::new(
            ScriptedRuntime::new()
                .reply("LEAD", "assessed")
                .reply("LEAD", "plan")
                .reply("LEAD", "summary")
                .reply("LEAD", "TASK_OUTPUT done"),
        );
        let mut op = operation(runtime.clone(), None);

        let result = op.execute().await.unwrap();
        assert_eq!(result, OperationResult::success(" done"));

        let order: Vec<String> = runtime.calls().into_iter().map(|c| c.agent).collect();
        assert_eq!(order, ["LEAD", "A", "B", "LEAD", "A", "B", "LEAD", "LEAD"]);

        let prompts: Vec<String> = runtime.calls().into_iter().map(|c| c.prompt).collect();
        assert_eq!(prompts[0], "LEAD, assess the current TASK state.");
        assert!(prompts[1].starts_with("A, provide your ASSESSMENT"));
        assert!(prompts[3].starts_with("LEAD, generate tasks"));
        assert!(prompts[4].starts_with("A, IMPLEMENT"));
        assert!(prompts[6].starts_with("LEAD, compile a SUMMARY"));
        assert_eq!(prompts[7], "LEAD, are we done?");
    }

    #[tokio::test]
    async fn test_transcript_framing_precedes_each_response() {
        let runtime = Arc::new(ScriptedRuntime::new().with_default("TASK_OUTPUT"));
        let mut op = operation(runtime, Some(3));
        let _ = op.execute().await.unwrap();

        let conversation = &op.state().conversation;
        assert_eq!(conversation[0].content, "--- START ---");
        assert_eq!(conversation[1].content, "TASK: do it");
        assert_eq!(conversation[2].content, "--- ITERATION 1 ---");

        for (i, entry) in conversation.iter().enumerate() {
            if entry.role == crate::conversation::Role::Assistant {
                assert_eq!(conversation[i - 1].role, crate::conversation::Role::User);
            }
        }
        assert_eq!(op.state().message_history.len(), 8);
        assert_eq!(op.state().current_step, 2);
    }

    #[tokio::test]
    async fn test_step_budget_stops_after_exactly_n_cycles() {
        let runtime = Arc::new(ScriptedRuntime::new().with_default("still thinking"));
        let mut op = operation(runtime.clone(), Some(3));

        let err = op.execute().await.unwrap_err();
        assert!(matches!(err, OperationError::StepBudgetExceeded { max_steps: 3 }));
        assert_eq!(err.to_string(), "Maximum operation loop steps (3) exceeded");

        // 8 invocations per cycle with a lead and two supporting agents
        assert_eq!(runtime.calls().len(), 24);
        assert_eq!(op.state().current_step, 4);
    }

    #[tokio::test]
    async fn test_failure_sentinel_is_a_normal_outcome() {
        let runtime = Arc::new(ScriptedRuntime::new().with_responder(|agent, prompt| {
            (agent == "LEAD" && prompt == "LEAD, are we done?").then(|| "TASK_FAILED no such module".to_string())
        }));
        let mut op = operation(runtime.clone(), Some(5));

        let result = op.execute().await.unwrap();
        assert_eq!(result, OperationResult::failure("no such module"));
        assert_eq!(runtime.calls().len(), 8);
    }

    #[tokio::test]
    async fn test_agent_errors_propagate() {
        let runtime = Arc::new(ScriptedRuntime::new().failing_on("B", "connection reset"));
        let mut op = operation(runtime, Some(5));

        let err = op.execute().await.unwrap_err();
        assert!(matches!(err, OperationError::Agent(_)));
        assert_eq!(err.to_string(), "connection reset");
    }

    #[tokio::test]
    async fn test_execute_runs_once() {
        let runtime = Arc::new(ScriptedRuntime::new().with_default("TASK_OUTPUT ok"));
        let mut op = operation(runtime, None);
        assert!(!op.done_if());
        assert!(op.execute().await.is_ok());
        assert!(op.done_if());
        assert!(matches!(op.execute().await, Err(OperationError::AlreadyStarted)));
    }

    #[test]
    fn test_intros_and_lookup() {
        let op = operation(Arc::new(ScriptedRuntime::new()), None);
        assert_eq!(
            op.state().agent_intros(),
            "LEAD: \"I am LEAD\"\nA: \"I am A\"\nB: \"I am B\""
        );
        assert!(op.state().get_agent("B").is_some());
        assert!(op.state().get_agent("LEAD").is_none());
        assert_eq!(op.state().conversation_id.len(), 16);
    }
}
