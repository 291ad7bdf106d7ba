//! A1: classify the thought.

use super::{AgentStage, StageContext, context_block, extract_json, thought_block};
use thoughtflow_core::stages::{Classification, StageName, StageOutput};

pub(crate) struct ClassificationAgent;

const SCHEMA: &str = r#"{
  "type": "task | problem | idea | question | observation | emotion",
  "urgency": "immediate | soon | eventually | never",
  "entities": { "people": [], "dates": [], "places": [], "topics": [] },
  "emotional_tone": "short description",
  "implied_needs": ["need", "..."]
}"#;

impl AgentStage for ClassificationAgent {
    fn name(&self) -> StageName {
        StageName::Classification
    }

    fn system_prompt(&self, ctx: &StageContext<'_>) -> String {
        format!(
            "You classify a user's short thought.\n\n{}\n\n\
             Reply with ONLY a JSON object of this exact shape, no extra keys:\n{SCHEMA}",
            context_block(ctx)
        )
    }

    fn user_prompt(&self, ctx: &StageContext<'_>) -> String {
        thought_block(ctx)
    }

    fn parse(&self, content: &str, _ctx: &StageContext<'_>) -> Result<StageOutput, String> {
        let json = extract_json(content).ok_or("no JSON object in reply")?;
        let classification: Classification =
            serde_json::from_str(json).map_err(|e| format!("schema mismatch: {e}"))?;
        Ok(StageOutput::Classification(classification))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/panic
mod tests {
    use super::*;
    use thoughtflow_core::context::{UserContext, ValuesRanking};
    use thoughtflow_core::stages::{StageOutputs, ThoughtKind};
    use thoughtflow_core::thought::UserId;

    fn ctx_fixture() -> (UserContext, StageOutputs) {
        (
            UserContext {
                user_id: UserId::new("u1"),
                version: 1,
                profile: serde_json::json!({}),
                values_ranking: ValuesRanking::default(),
                energy_constraints: None,
            },
            StageOutputs::default(),
        )
    }

    #[test]
    fn parses_fenced_reply() {
        let (user_context, prior) = ctx_fixture();
        let ctx = StageContext {
            text: "fix the deploy script",
            user_context: &user_context,
            prior: &prior,
        };
        let reply = r#"```json
        {
          "type": "task",
          "urgency": "soon",
          "entities": { "people": [], "dates": [], "places": [], "topics": ["deploy"] },
          "emotional_tone": "mildly stressed",
          "implied_needs": ["reliable releases"]
        }
        ```"#;
        let output = ClassificationAgent.parse(reply, &ctx).unwrap();
        match output {
            StageOutput::Classification(c) => {
                assert_eq!(c.kind, ThoughtKind::Task);
                assert_eq!(c.entities.topics, vec!["deploy"]);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_enum_value() {
        let (user_context, prior) = ctx_fixture();
        let ctx = StageContext {
            text: "t",
            user_context: &user_context,
            prior: &prior,
        };
        let reply = r#"{ "type": "musing", "urgency": "soon",
            "entities": {}, "emotional_tone": "", "implied_needs": [] }"#;
        assert!(ClassificationAgent.parse(reply, &ctx).is_err());
    }
}
