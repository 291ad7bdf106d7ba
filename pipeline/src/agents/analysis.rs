//! A2: analyze the thought against the user's goals.

use super::{AgentStage, StageContext, context_block, extract_json, thought_block};
use thoughtflow_core::stages::{Analysis, StageName, StageOutput};

pub(crate) struct AnalysisAgent;

const SCHEMA: &str = r#"{
  "goal_alignment": {
    "aligned_goals": ["goal", "..."],
    "conflicting_goals": ["goal", "..."],
    "reasoning": "why"
  },
  "underlying_needs": ["need", "..."],
  "pattern_connections": ["pattern", "..."],
  "realistic_assessment": { "any": "relevant structure" },
  "unspoken_factors": ["factor", "..."]
}"#;

impl AgentStage for AnalysisAgent {
    fn name(&self) -> StageName {
        StageName::Analysis
    }

    fn system_prompt(&self, ctx: &StageContext<'_>) -> String {
        format!(
            "You analyze a classified thought against the user's goals and \
             patterns. Be specific to this user.\n\n{}\n\n\
             Reply with ONLY a JSON object of this exact shape, no extra keys:\n{SCHEMA}",
            context_block(ctx)
        )
    }

    fn user_prompt(&self, ctx: &StageContext<'_>) -> String {
        thought_block(ctx)
    }

    fn parse(&self, content: &str, _ctx: &StageContext<'_>) -> Result<StageOutput, String> {
        let json = extract_json(content).ok_or("no JSON object in reply")?;
        let analysis: Analysis =
            serde_json::from_str(json).map_err(|e| format!("schema mismatch: {e}"))?;
        analysis.validate().map_err(|e| e.to_string())?;
        Ok(StageOutput::Analysis(analysis))
    }
}
