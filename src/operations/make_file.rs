use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::{
    conversation_label, prepare_and_run, FileRequest, Operation, OperationContext, OperationResult,
    OperationSpec, OperationState,
};
use crate::workspace::ProjectIndex;

/// Supporting agents, in the order they speak
pub const TEAM: [&str; 3] = ["NEONRAIL", "SUGARBYTE", "HEXLACE"];

const OUTPUT_INSTRUCTION: &str = "Output the full contents of the new file as plaintext.";

/// Creates one new file in a project
pub struct MakeFileSpec {
    index: Arc<dyn ProjectIndex>,
}

impl MakeFileSpec {
    pub fn new(index: Arc<dyn ProjectIndex>) -> Self {
        Self { index }
    }

    pub fn prepare(request: &FileRequest, ctx: &OperationContext) -> Result<Operation> {
        if request.path.trim().is_empty() {
            bail!("No target path provided");
        }
        if ctx.index.file_path(&request.project, &request.path).is_none() {
            bail!(
                "Cannot create {} in project {}: unknown project or path outside it",
                request.path,
                request.project
            );
        }
        let params = ctx.params(
            &TEAM,
            &request.project,
            Some(&request.path),
            &request.instruction,
            OUTPUT_INSTRUCTION,
            conversation_label("MAKEFILE", &request.project, &request.path),
        )?;
        Ok(Operation::new(Box::new(Self::new(ctx.index.clone())), params, ctx.runtime.clone()))
    }
}

#[async_trait]
impl OperationSpec for MakeFileSpec {
    fn kind(&self) -> &'static str {
        "MAKEFILE"
    }

    fn init(&self, state: &OperationState) -> Vec<String> {
        vec![
            format!("### Meet the A-Team\n{}", state.agent_intros()),
            format!(
                "--- PROJECT FILES ---\n--- THESE ARE ALL THE FILES THAT CURRENTLY EXIST IN THE PROJECT ---\n{:#}",
                self.index.tree(&state.project)
            ),
            format!(
                "--- FILE CREATION REQUEST ---\n\
                 PROJECT (CASE SENSITIVE): {}\n\
                 TARGET FILE: {}\n\
                 INSTRUCTION: {}\n\
                 OUTPUT INSTRUCTION: {}",
                state.project,
                state.path(),
                state.instruction,
                state.output_instruction
            ),
            "--- GUIDELINES ---\n\
             - Build only what the INSTRUCTION asks for.\n\
             - Check existing files with project_file_lookup before importing from them.\n\
             - Imports must resolve against the PROJECT FILES above.\n\
             - If the request cannot be fulfilled, the final answer is TASK_FAILED followed by the reason."
                .to_string(),
        ]
    }

    fn completion_prompt(&self, state: &OperationState) -> String {
        format!(
            "{}, if the team's work satisfies the FILE CREATION REQUEST:\n\
             > OUTPUT THE FULL CONTENTS OF {} AS PLAINTEXT, NO MARKDOWN ANNOTATIONS\n\
             > THE OUTPUT MUST BEGIN WITH 'TASK_OUTPUT'\n\
             If the request cannot be fulfilled, answer 'TASK_FAILED' followed by the reason.\n\
             Otherwise, list what is still missing.",
            state.lead.name,
            state.path()
        )
    }
}

/// Run the file creation team. On success the message is the new file's contents.
pub async fn make_file(request: FileRequest, ctx: &OperationContext) -> OperationResult {
    prepare_and_run(&request.instruction, || MakeFileSpec::prepare(&request, ctx)).await
}
