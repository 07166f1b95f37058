use anyhow::{bail, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::agents::{AgentRoster, AgentRuntime, ProviderRuntime};
use crate::cli::Command;
use crate::config::RainerConfig;
use crate::conversation::ConversationMessage;
use crate::operations::{
    make_file, refactor, requirements, FileRequest, OperationContext, OperationResult, TaskRequest,
};
use crate::providers::openai::OpenAIProvider;
use crate::providers::{CompletionRequest, LLMProvider, Message};
use crate::records::{CodeGenerationLog, CodeGenerationRecord, RunLedger};
use crate::workspace::Workspace;

const PLAINTEXT_DIRECTIVE: &str =
    "Respond in plaintext only. Code is never wrapped in markdown fences or annotated.";

/// Wires configuration, the workspace, the roster and the model provider
/// together and serves the CLI commands.
pub struct Application {
    config: RainerConfig,
    workspace: Arc<Workspace>,
    provider: Arc<dyn LLMProvider>,
    context: OperationContext,
    ledger: RunLedger,
    codegen_log: CodeGenerationLog,
}

impl Application {
    pub fn new(config: RainerConfig) -> Result<Self> {
        let provider: Arc<dyn LLMProvider> = Arc::new(OpenAIProvider::new(config.provider_config())?);
        Self::with_provider(config, provider, None)
    }

    /// Agents run through `runtime` when given, through `provider` otherwise
    pub fn with_provider(
        config: RainerConfig,
        provider: Arc<dyn LLMProvider>,
        runtime: Option<Arc<dyn AgentRuntime>>,
    ) -> Result<Self> {
        let workspace = Arc::new(Workspace::new(config.projects.clone(), config.exclusions.clone()));
        let roster = AgentRoster::from_config(&config.agents, &config.default_model)?;
        let runtime: Arc<dyn AgentRuntime> = match runtime {
            Some(runtime) => runtime,
            None => Arc::new(ProviderRuntime::new(
                provider.clone(),
                workspace.clone(),
                config.operation.max_turns,
            )),
        };

        let context = OperationContext {
            roster,
            runtime,
            index: workspace.clone(),
            defaults: config.operation.clone(),
        };

        Ok(Self {
            ledger: RunLedger::new(&config.results_dir),
            codegen_log: CodeGenerationLog::new(config.results_dir.join("code_generation.jsonl")),
            config,
            workspace,
            provider,
            context,
        })
    }

    /// Run one command, print its output and report whether it succeeded
    pub async fn dispatch(&self, command: Command) -> Result<bool> {
        match command {
            Command::Scan { project } => {
                println!("{:#}", self.scan(project.as_deref())?);
                Ok(true)
            }
            Command::MakeFile { project, path, instruction } => {
                let result = self.make_file(FileRequest { project, path, instruction }).await?;
                Ok(report(result))
            }
            Command::Refactor { project, path, instruction } => {
                let result = self.refactor(FileRequest { project, path, instruction }).await?;
                Ok(report(result))
            }
            Command::Requirements { project, instruction } => {
                match self.requirements(TaskRequest { project, instruction }).await? {
                    Ok(checklist) => {
                        println!("{:#}", checklist);
                        Ok(true)
                    }
                    Err(failure) => Ok(report(failure)),
                }
            }
            Command::Ask { message } => {
                println!("{}", self.ask(&message).await?);
                Ok(true)
            }
            Command::Team => {
                for (name, intro) in self.team() {
                    println!("{:<13} {}", name, intro);
                }
                Ok(true)
            }
        }
    }

    /// Fresh tree for one project, or every project keyed by name
    pub fn scan(&self, project: Option<&str>) -> Result<Value> {
        self.workspace.refresh();
        match project {
            None => Ok(self.workspace.trees()),
            Some(name) => match self.workspace.trees().get(name) {
                Some(tree) => Ok(tree.clone()),
                None => bail!(
                    "Unknown project '{}', expected one of: {}",
                    name,
                    self.workspace.projects().collect::<Vec<_>>().join(", ")
                ),
            },
        }
    }

    /// Run the file creation team and write its output verbatim on success
    pub async fn make_file(&self, request: FileRequest) -> Result<OperationResult> {
        let mut result = make_file::make_file(request.clone(), &self.context).await;
        if result.success {
            match self
                .workspace
                .create_file(&request.project, &request.path, &result.message)
            {
                Ok(()) => info!("Created {}/{}", request.project, request.path),
                Err(e) => {
                    error!("Could not write {}/{}: {:#}", request.project, request.path, e);
                    result = OperationResult::failure(format!("{:#}", e));
                }
            }
        }
        self.record("makefile", &request, &result)?;
        Ok(result)
    }

    /// Run the refactor team and overwrite the file on success
    pub async fn refactor(&self, request: FileRequest) -> Result<OperationResult> {
        let mut result = refactor::refactor(request.clone(), &self.context).await;
        if result.success {
            match self
                .workspace
                .update_file(&request.project, &request.path, &result.message)
            {
                Ok(true) => info!("Updated {}/{}", request.project, request.path),
                Ok(false) => {
                    error!("{}/{} vanished before it could be updated", request.project, request.path);
                    result = OperationResult::failure(format!("File {} no longer exists", request.path));
                }
                Err(e) => {
                    error!("Could not write {}/{}: {:#}", request.project, request.path, e);
                    result = OperationResult::failure(format!("{:#}", e));
                }
            }
        }
        self.record("refactor", &request, &result)?;
        Ok(result)
    }

    /// Checklist items as JSON, or the failed run
    pub async fn requirements(&self, request: TaskRequest) -> Result<Result<Value, OperationResult>> {
        let outcome = requirements::requirements(request.clone(), &self.context).await;
        let (success, value) = match &outcome {
            Ok(items) => (true, serde_json::to_value(items)?),
            Err(failure) => (false, Value::String(failure.message.clone())),
        };
        self.ledger
            .store("checklist", &ledger_key(&request.instruction), success, value.clone())?;
        Ok(outcome.map(|_| value))
    }

    /// One completion with the plaintext directive, no team involved
    pub async fn ask(&self, message: &str) -> Result<String> {
        self.provider.validate_config().await?;
        let response = self
            .provider
            .complete(CompletionRequest {
                messages: vec![Message::system(PLAINTEXT_DIRECTIVE), Message::user(message)],
                model: self.config.default_model.clone(),
                temperature: None,
                max_tokens: None,
                functions: None,
                tool_choice: None,
            })
            .await?;
        Ok(response.content)
    }

    /// `(name, intro)` for every roster member
    pub fn team(&self) -> Vec<(String, String)> {
        self.context
            .roster
            .profiles()
            .iter()
            .map(|p| (p.name.clone(), p.intro.clone()))
            .collect()
    }

    fn record(&self, op: &str, request: &FileRequest, result: &OperationResult) -> Result<()> {
        let entry = json!({
            "project": request.project,
            "path": request.path,
            "instruction": request.instruction,
            "output": result.message,
        });
        self.ledger
            .store(op, &ledger_key(&request.path), result.success, entry)?;

        if result.success {
            self.codegen_log.append(&CodeGenerationRecord::new(
                self.config.default_model.clone(),
                vec![ConversationMessage::user(request.instruction.clone())],
                result.message.clone(),
                request.project.clone(),
                request.path.clone(),
            ))?;
        }
        Ok(())
    }
}

fn report(result: OperationResult) -> bool {
    if result.success {
        println!("{}", result.message.trim());
    } else {
        eprintln!("{}", result.message);
    }
    result.success
}

/// File-system safe ledger name derived from a path or instruction
fn ledger_key(source: &str) -> String {
    let key: String = source
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if key.is_empty() {
        "untitled".to_string()
    } else {
        key
    }
}
