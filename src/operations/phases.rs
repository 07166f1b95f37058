use anyhow::Result;
use tracing::info;

use super::OperationState;

/// Lead assesses, every supporting agent gives its assessment in team
/// order, then the lead hands out tasks for the round.
pub async fn assess(state: &mut OperationState) -> Result<()> {
    let step = state.current_step;
    let lead = state.lead.clone();
    info!("Entering TURN {} | ASSESSMENT PHASE", step);

    state.add_as_user([
        format!("PRAGMA OVERRIDE: All responses start with 'ROUND {} ASSESSMENT'", step),
        format!("{}, assess the current TASK state.", lead.name),
    ]);
    state.run_with_agent(&lead).await?;

    for agent in state.agents.clone() {
        state.add_as_user([format!(
            "{}, provide your ASSESSMENT of the current TASK state, or answer NOOP if nothing applies to you.",
            agent.name
        )]);
        state.run_with_agent(&agent).await?;
    }

    state.add_as_user([format!(
        "{}, generate tasks for agents for ROUND {}, if needed.",
        lead.name, step
    )]);
    state.run_with_agent(&lead).await
}

/// Each supporting agent implements whatever it was assigned
pub async fn implement(state: &mut OperationState) -> Result<()> {
    if state.agents.is_empty() {
        return Ok(());
    }
    let step = state.current_step;
    info!("Entering TURN {} | IMPLEMENTATION PHASE", step);

    state.add_as_user([format!(
        "PRAGMA OVERRIDE: All responses start with 'ROUND {} IMPLEMENTATION'",
        step
    )]);

    for agent in state.agents.clone() {
        state.add_as_user([format!(
            "{}, IMPLEMENT your assigned instruction, output NOOP otherwise.",
            agent.name
        )]);
        state.run_with_agent(&agent).await?;
    }

    Ok(())
}

/// Lead summarises the round, then answers the completion check. Its last
/// answer is what the loop tests for a sentinel.
pub async fn summarize(state: &mut OperationState, completion_prompt: &str) -> Result<()> {
    let lead = state.lead.clone();
    info!("Entering TURN {} | SUMMARY PHASE", state.current_step);

    state.add_as_user([format!(
        "{}, compile a SUMMARY of the changes implemented so far.",
        lead.name
    )]);
    state.run_with_agent(&lead).await?;

    state.add_as_user([completion_prompt]);
    state.run_with_agent(&lead).await
}
