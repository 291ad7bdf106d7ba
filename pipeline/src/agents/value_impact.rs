//! A3: score the thought across the five value dimensions.
//!
//! The model supplies the per-dimension scores and reasoning; the weighted
//! total is recomputed here from the user's value ranking and never trusted
//! from the reply.

use super::{AgentStage, StageContext, context_block, extract_json, thought_block};
use thoughtflow_core::stages::{StageName, StageOutput, ValueImpact};

pub(crate) struct ValueImpactAgent;

const SCHEMA: &str = r#"{
  "economic":   { "score": 0.0, "reasoning": "short" },
  "relational": { "score": 0.0, "reasoning": "short" },
  "legacy":     { "score": 0.0, "reasoning": "short" },
  "health":     { "score": 0.0, "reasoning": "short" },
  "growth":     { "score": 0.0, "reasoning": "short" }
}"#;

impl AgentStage for ValueImpactAgent {
    fn name(&self) -> StageName {
        StageName::ValueImpact
    }

    fn system_prompt(&self, ctx: &StageContext<'_>) -> String {
        format!(
            "You score the impact of acting on a thought across five value \
             dimensions. Each score is a number from 0 to 10.\n\n{}\n\n\
             Reply with ONLY a JSON object of this exact shape, no extra keys:\n{SCHEMA}",
            context_block(ctx)
        )
    }

    fn user_prompt(&self, ctx: &StageContext<'_>) -> String {
        thought_block(ctx)
    }

    fn parse(&self, content: &str, ctx: &StageContext<'_>) -> Result<StageOutput, String> {
        let json = extract_json(content).ok_or("no JSON object in reply")?;
        let mut impact: ValueImpact =
            serde_json::from_str(json).map_err(|e| format!("schema mismatch: {e}"))?;
        let ranking = &ctx.user_context.values_ranking;
        impact.compute_weighted_total(|dimension| ranking.weight_for(dimension));
        impact.validate().map_err(|e| e.to_string())?;
        Ok(StageOutput::ValueImpact(impact))
    }
}
