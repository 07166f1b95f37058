use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::{
    conversation_label, prepare_and_run, FileRequest, Operation, OperationContext, OperationResult,
    OperationSpec, OperationState,
};
use crate::workspace::ProjectIndex;

pub const TEAM: [&str; 3] = ["BLACKSOCKET", "NEONRAIL", "GUTTERZEN"];

const OUTPUT_INSTRUCTION: &str = "Output the full updated code for the file.";

/// Rewrites an existing file according to an instruction
pub struct RefactorSpec {
    index: Arc<dyn ProjectIndex>,
}

impl RefactorSpec {
    pub fn new(index: Arc<dyn ProjectIndex>) -> Self {
        Self { index }
    }

    /// The target must already exist; creating files is the make-file team's job
    pub fn prepare(request: &FileRequest, ctx: &OperationContext) -> Result<Operation> {
        match ctx.index.file_path(&request.project, &request.path) {
            Some(path) if path.is_file() => {}
            _ => bail!("File {} does not exist in project {}", request.path, request.project),
        }
        if ctx.index.read_file(&request.project, &request.path).is_none() {
            bail!("File {} in project {} is not valid UTF-8 text", request.path, request.project);
        }
        let params = ctx.params(
            &TEAM,
            &request.project,
            Some(&request.path),
            &request.instruction,
            OUTPUT_INSTRUCTION,
            conversation_label("REFACTOR", &request.project, &request.path),
        )?;
        Ok(Operation::new(Box::new(Self::new(ctx.index.clone())), params, ctx.runtime.clone()))
    }
}

#[async_trait]
impl OperationSpec for RefactorSpec {
    fn kind(&self) -> &'static str {
        "REFACTOR"
    }

    fn init(&self, state: &OperationState) -> Vec<String> {
        let current = self
            .index
            .read_file(&state.project, state.path())
            .unwrap_or_default();

        vec![
            format!("### Meet the A-Team\n{}", state.agent_intros()),
            format!(
                "--- TARGET FILE ---\nPROJECT (CASE SENSITIVE): {}\nPATH: {}\n--- CURRENT CONTENTS ---\n{}",
                state.project,
                state.path(),
                current
            ),
            format!(
                "--- REFACTOR REQUEST ---\nINSTRUCTION: {}\nOUTPUT INSTRUCTION: {}",
                state.instruction, state.output_instruction
            ),
            "--- GUIDELINES ---\n\
             - Change only what the INSTRUCTION requires; keep the rest of the file intact.\n\
             - Preserve public names other files import, or list every caller that must change.\n\
             - If the request cannot be fulfilled, the final answer is TASK_FAILED followed by the reason."
                .to_string(),
        ]
    }

    fn completion_prompt(&self, state: &OperationState) -> String {
        format!(
            "{}, if the team's work satisfies the REFACTOR REQUEST:\n\
             > OUTPUT THE FULL UPDATED CONTENTS OF {} AS PLAINTEXT, NO MARKDOWN ANNOTATIONS\n\
             > THE OUTPUT MUST BEGIN WITH 'TASK_OUTPUT'\n\
             If the request cannot be fulfilled, answer 'TASK_FAILED' followed by the reason.\n\
             Otherwise, list what is still missing.",
            state.lead.name,
            state.path()
        )
    }
}

/// Run the refactor team. On success the message is the file's new contents.
pub async fn refactor(request: FileRequest, ctx: &OperationContext) -> OperationResult {
    prepare_and_run(&request.instruction, || RefactorSpec::prepare(&request, ctx)).await
}
