//! A4: turn the analysis into an action plan.

use super::{AgentStage, StageContext, context_block, extract_json, thought_block};
use thoughtflow_core::stages::{ActionPlan, StageName, StageOutput};

pub(crate) struct ActionPlanAgent;

const SCHEMA: &str = r#"{
  "quick_wins": ["small step", "..."],
  "main_actions": [{
    "description": "what to do",
    "duration": "estimate",
    "prerequisites": ["..."],
    "obstacles": ["..."],
    "mitigation": "how to handle the obstacles",
    "timing_hint": "when, given the user's energy/time constraints"
  }],
  "delegation_opportunities": ["..."],
  "success_metrics": ["..."]
}"#;

impl AgentStage for ActionPlanAgent {
    fn name(&self) -> StageName {
        StageName::ActionPlan
    }

    fn system_prompt(&self, ctx: &StageContext<'_>) -> String {
        format!(
            "You turn an analyzed thought into a concrete action plan. Draw \
             every timing_hint from the user's stated energy/time \
             constraints.\n\n{}\n\n\
             Reply with ONLY a JSON object of this exact shape, no extra keys:\n{SCHEMA}",
            context_block(ctx)
        )
    }

    fn user_prompt(&self, ctx: &StageContext<'_>) -> String {
        thought_block(ctx)
    }

    fn parse(&self, content: &str, _ctx: &StageContext<'_>) -> Result<StageOutput, String> {
        let json = extract_json(content).ok_or("no JSON object in reply")?;
        let plan: ActionPlan =
            serde_json::from_str(json).map_err(|e| format!("schema mismatch: {e}"))?;
        Ok(StageOutput::ActionPlan(plan))
    }
}
