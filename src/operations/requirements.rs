use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{
    conversation_label, prepare_and_run, Operation, OperationContext, OperationResult, OperationSpec,
    OperationState, TaskRequest,
};
use crate::workspace::ProjectIndex;

const OUTPUT_INSTRUCTION: &str = "Generate a PLAINTEXT JSON list of strings representing minimal, explicit, \
actionable checklist items which, if implemented, result in the INTENDED OUTCOME.";

/// One checklist entry as the front end stores it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub label: String,
    pub checked: bool,
}

/// Parse the lead's delivered JSON list of strings into unchecked items
pub fn parse_checklist(payload: &str) -> Result<Vec<ChecklistItem>> {
    let labels: Vec<String> =
        serde_json::from_str(payload.trim()).context("Requirements output is not a JSON list of strings")?;
    Ok(labels
        .into_iter()
        .map(|label| ChecklistItem { label, checked: false })
        .collect())
}

/// Turns an intended outcome into a checklist. The lead works alone.
pub struct RequirementsSpec {
    index: Arc<dyn ProjectIndex>,
}

impl RequirementsSpec {
    pub fn new(index: Arc<dyn ProjectIndex>) -> Self {
        Self { index }
    }

    pub fn prepare(request: &TaskRequest, ctx: &OperationContext) -> Result<Operation> {
        let params = ctx.params(
            &[],
            &request.project,
            None,
            &request.instruction,
            OUTPUT_INSTRUCTION,
            conversation_label("CHECKLIST", &request.project, &request.instruction),
        )?;
        Ok(Operation::new(Box::new(Self::new(ctx.index.clone())), params, ctx.runtime.clone()))
    }
}

#[async_trait]
impl OperationSpec for RequirementsSpec {
    fn kind(&self) -> &'static str {
        "CHECKLIST"
    }

    fn init(&self, state: &OperationState) -> Vec<String> {
        vec![
            format!("### Meet the A-Team\n{}", state.agent_intros()),
            format!(
                "--- PROJECT FILES ---\n{:#}",
                self.index.tree(&state.project)
            ),
            format!(
                "--- REQUIREMENTS REQUEST ---\n\
                 PROJECT (CASE SENSITIVE): {}\n\
                 INTENDED OUTCOME: {}\n\
                 OUTPUT INSTRUCTION: {}",
                state.project, state.instruction, state.output_instruction
            ),
        ]
    }

    fn completion_prompt(&self, state: &OperationState) -> String {
        format!(
            "{}, if the checklist covers the INTENDED OUTCOME:\n\
             > OUTPUT 'TASK_OUTPUT' FOLLOWED BY THE JSON LIST OF STRINGS, NO MARKDOWN ANNOTATIONS\n\
             If the outcome is too vague to plan, answer 'TASK_FAILED' followed by the reason.\n\
             Otherwise, refine the list.",
            state.lead.name
        )
    }
}

/// Run the lead alone and parse its delivered list
pub async fn requirements(request: TaskRequest, ctx: &OperationContext) -> Result<Vec<ChecklistItem>, OperationResult> {
    let result = prepare_and_run(&request.instruction, || RequirementsSpec::prepare(&request, ctx)).await;
    if !result.success {
        return Err(result);
    }
    parse_checklist(&result.message).map_err(|e| OperationResult::failure(format!("{:#}", e)))
}
