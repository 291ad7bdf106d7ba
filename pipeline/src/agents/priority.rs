//! A5: prioritize and recommend a timeline.

use super::{AgentStage, StageContext, context_block, extract_json, thought_block};
use thoughtflow_core::stages::{Priority, StageName, StageOutput};

pub(crate) struct PriorityAgent;

const SCHEMA: &str = r#"{
  "priority_level": "Critical | High | Medium | Low | Defer",
  "urgency_reasoning": "why this urgency",
  "strategic_fit": "fit with the user's strategy",
  "recommended_timeline": {
    "start": "when to start",
    "duration": "how long",
    "checkpoints": ["..."]
  },
  "final_recommendation": "one paragraph"
}"#;

impl AgentStage for PriorityAgent {
    fn name(&self) -> StageName {
        StageName::Priority
    }

    fn system_prompt(&self, ctx: &StageContext<'_>) -> String {
        format!(
            "You are the final prioritization step. Weigh everything the \
             prior stages produced and commit to one recommendation.\n\n{}\n\n\
             Reply with ONLY a JSON object of this exact shape, no extra keys:\n{SCHEMA}",
            context_block(ctx)
        )
    }

    fn user_prompt(&self, ctx: &StageContext<'_>) -> String {
        thought_block(ctx)
    }

    fn parse(&self, content: &str, _ctx: &StageContext<'_>) -> Result<StageOutput, String> {
        let json = extract_json(content).ok_or("no JSON object in reply")?;
        let priority: Priority =
            serde_json::from_str(json).map_err(|e| format!("schema mismatch: {e}"))?;
        Ok(StageOutput::Priority(priority))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/panic
mod tests {
    use super::*;
    use thoughtflow_core::context::{UserContext, ValuesRanking};
    use thoughtflow_core::stages::{PriorityLevel, StageOutputs};
    use thoughtflow_core::thought::UserId;

    #[test]
    fn parses_priority_levels_verbatim() {
        let user_context = UserContext {
            user_id: UserId::new("u1"),
            version: 1,
            profile: serde_json::json!({}),
            values_ranking: ValuesRanking::default(),
            energy_constraints: None,
        };
        let prior = StageOutputs::default();
        let ctx = StageContext {
            text: "t",
            user_context: &user_context,
            prior: &prior,
        };
        let reply = r#"{
            "priority_level": "High",
            "urgency_reasoning": "deadline approaching",
            "strategic_fit": "aligned with Q3 goal",
            "recommended_timeline": { "start": "this week", "duration": "3 weeks", "checkpoints": ["week 1 review"] },
            "final_recommendation": "Start now."
        }"#;
        let output = PriorityAgent.parse(reply, &ctx).unwrap();
        match output {
            StageOutput::Priority(priority) => {
                assert_eq!(priority.priority_level, PriorityLevel::High);
                assert_eq!(priority.recommended_timeline.checkpoints.len(), 1);
            }
            other => panic!("wrong variant: {other:?}"),
        }

        let lowercase = reply.replace("\"High\"", "\"high\"");
        assert!(PriorityAgent.parse(&lowercase, &ctx).is_err());
    }
}
