//! The five agent stages and the shared stage runner.
//!
//! Each stage is a pure function of `(user context, prior outputs, thought
//! text)`: it builds a prompt, calls the LLM adapter and parses the reply
//! into its typed output. Transient failures, including invalid output
//! shapes, are retried inside the stage (base 500 ms, factor 2) before
//! bubbling up; permanent provider failures bubble immediately.

pub mod action_plan;
pub mod analysis;
pub mod classification;
pub mod priority;
pub mod value_impact;

use std::sync::Arc;
use std::time::Duration;
use thoughtflow_core::context::UserContext;
use thoughtflow_core::error::{PermanentKind, PipelineError, TransientKind};
use thoughtflow_core::retry::RetryPolicy;
use thoughtflow_core::stages::{StageName, StageOutput, StageOutputs};
use thoughtflow_llm::error::ErrorClass;
use thoughtflow_llm::{ChatMessage, GenerateRequest, LlmAdapter};

/// Everything a stage sees: the thought, the user, and what prior stages
/// produced.
pub struct StageContext<'a> {
    /// The submitted thought text.
    pub text: &'a str,
    /// The owning user's profile.
    pub user_context: &'a UserContext,
    /// Outputs of the stages that already ran.
    pub prior: &'a StageOutputs,
}

/// One stage's prompt construction and output parsing.
pub(crate) trait AgentStage: Send + Sync {
    /// Which stage this is.
    fn name(&self) -> StageName;

    /// The stage's system prompt, including the stable user-context block.
    fn system_prompt(&self, ctx: &StageContext<'_>) -> String;

    /// The per-thought user prompt.
    fn user_prompt(&self, ctx: &StageContext<'_>) -> String;

    /// Parse and validate the model reply into the typed output.
    ///
    /// The error string is a validation description safe to log; it must
    /// not embed the model reply itself.
    fn parse(&self, content: &str, ctx: &StageContext<'_>) -> Result<StageOutput, String>;
}

pub(crate) fn agent_for(stage: StageName) -> &'static dyn AgentStage {
    match stage {
        StageName::Classification => &classification::ClassificationAgent,
        StageName::Analysis => &analysis::AnalysisAgent,
        StageName::ValueImpact => &value_impact::ValueImpactAgent,
        StageName::ActionPlan => &action_plan::ActionPlanAgent,
        StageName::Priority => &priority::PriorityAgent,
    }
}

/// Drives a single stage with internal retries.
pub struct AgentRunner {
    adapter: Arc<dyn LlmAdapter>,
    internal_retries: u32,
    backoff: RetryPolicy,
}

impl AgentRunner {
    /// Reserved headroom between the prompt estimate and the context window.
    const CONTEXT_RESERVE_TOKENS: u32 = 2048;

    /// Create a runner over the given adapter.
    #[must_use]
    pub fn new(adapter: Arc<dyn LlmAdapter>, internal_retries: u32) -> Self {
        Self {
            adapter,
            internal_retries,
            backoff: RetryPolicy {
                max_retries: internal_retries,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
                jitter: 0.0,
            },
        }
    }

    /// Run one stage to a validated output.
    ///
    /// # Errors
    ///
    /// Returns a transient [`PipelineError`] when provider transients
    /// survive the internal retry budget (the broker will redeliver), and a
    /// permanent one for provider-permanent failures or outputs that stay
    /// invalid after the re-prompt budget.
    pub async fn run(
        &self,
        stage: StageName,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let agent = agent_for(stage);
        let capabilities = self.adapter.capabilities();
        let mut correction: Option<String> = None;
        let mut attempt: u32 = 0;

        loop {
            let mut messages = vec![ChatMessage::user(agent.user_prompt(ctx))];
            if let Some(fix) = &correction {
                messages.push(ChatMessage::user(fix.clone()));
            }
            let mut request = GenerateRequest::new(messages, Some(agent.system_prompt(ctx)));
            if capabilities.supports_prompt_cache {
                request = request.with_cache_hint();
            }
            request.truncate_to_budget(
                capabilities.max_context_tokens,
                Self::CONTEXT_RESERVE_TOKENS,
            );

            match self.adapter.generate(request).await {
                Ok(completion) => {
                    metrics::counter!("pipeline.agent.llm_calls", "stage" => stage.as_str())
                        .increment(1);
                    metrics::counter!("pipeline.agent.output_tokens", "stage" => stage.as_str())
                        .increment(u64::from(completion.usage.output_tokens));

                    match agent.parse(&completion.content, ctx) {
                        Ok(output) => return Ok(output),
                        Err(reason) => {
                            tracing::warn!(
                                stage = %stage,
                                attempt,
                                reason = %reason,
                                "stage output failed validation"
                            );
                            if attempt >= self.internal_retries {
                                return Err(PipelineError::permanent(
                                    PermanentKind::InvalidPayload,
                                    format!(
                                        "stage {stage} output invalid after {attempt} re-prompts"
                                    ),
                                ));
                            }
                            correction = Some(format!(
                                "Your previous reply was rejected: {reason}. \
                                 Reply again with ONLY a valid JSON object matching the \
                                 requested schema, no prose and no code fences."
                            ));
                        }
                    }
                }
                Err(err) => match err.classify() {
                    ErrorClass::Permanent(kind) => {
                        tracing::error!(stage = %stage, error = %err, "permanent stage failure");
                        return Err(PipelineError::permanent(
                            kind,
                            format!("stage {stage}: provider failure"),
                        ));
                    }
                    ErrorClass::Transient(kind) => {
                        tracing::warn!(
                            stage = %stage,
                            attempt,
                            error = %err,
                            "transient stage failure"
                        );
                        if attempt >= self.internal_retries {
                            return Err(PipelineError::transient(
                                kind,
                                format!("stage {stage}: retries exhausted"),
                            ));
                        }
                    }
                },
            }

            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

/// The stable user-context block embedded in every stage's system prompt.
/// Stable per user, which is what makes provider-side prompt caching pay.
pub(crate) fn context_block(ctx: &StageContext<'_>) -> String {
    let profile =
        serde_json::to_string_pretty(&ctx.user_context.profile).unwrap_or_else(|_| "{}".into());
    let ranking = serde_json::to_string(&ctx.user_context.values_ranking)
        .unwrap_or_else(|_| "{}".into());
    let constraints = ctx
        .user_context
        .energy_constraints
        .as_deref()
        .unwrap_or("none stated");
    format!(
        "## User profile\n{profile}\n\n## Value ranking weights\n{ranking}\n\n\
         ## Energy/time constraints\n{constraints}"
    )
}

/// The per-thought block shared by every stage's user prompt: the text plus
/// whatever prior stages produced.
pub(crate) fn thought_block(ctx: &StageContext<'_>) -> String {
    let mut prior = serde_json::Map::new();
    for stage in StageName::ALL {
        if !ctx.prior.has(stage) {
            continue;
        }
        let value = match stage {
            StageName::Classification => serde_json::to_value(&ctx.prior.classification),
            StageName::Analysis => serde_json::to_value(&ctx.prior.analysis),
            StageName::ValueImpact => serde_json::to_value(&ctx.prior.value_impact),
            StageName::ActionPlan => serde_json::to_value(&ctx.prior.action_plan),
            StageName::Priority => serde_json::to_value(&ctx.prior.priority),
        };
        if let Ok(value) = value {
            prior.insert(stage.as_str().to_string(), value);
        }
    }

    if prior.is_empty() {
        format!("## Thought\n{}", ctx.text)
    } else {
        let prior_json = serde_json::to_string_pretty(&serde_json::Value::Object(prior))
            .unwrap_or_else(|_| "{}".into());
        format!(
            "## Thought\n{}\n\n## Prior stage outputs\n{prior_json}",
            ctx.text
        )
    }
}

/// Pull the first JSON object out of a model reply, tolerating code fences
/// and surrounding prose.
pub(crate) fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&content[start..=end])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use thoughtflow_core::context::ValuesRanking;
    use thoughtflow_core::thought::UserId;

    fn test_context() -> UserContext {
        UserContext {
            user_id: UserId::new("u1"),
            version: 3,
            profile: serde_json::json!({ "goals": ["ship the rewrite"] }),
            values_ranking: ValuesRanking::default(),
            energy_constraints: Some("mornings only".to_string()),
        }
    }

    #[test]
    fn extract_json_strips_fences_and_prose() {
        let reply = "Here you go:\n```json\n{\"a\": 1}\n```\nHope that helps!";
        assert_eq!(extract_json(reply), Some("{\"a\": 1}"));
    }

    #[test]
    fn extract_json_handles_bare_objects() {
        assert_eq!(extract_json("{\"x\":2}"), Some("{\"x\":2}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn context_block_mentions_constraints() {
        let user_context = test_context();
        let outputs = StageOutputs::default();
        let ctx = StageContext {
            text: "t",
            user_context: &user_context,
            prior: &outputs,
        };
        let block = context_block(&ctx);
        assert!(block.contains("mornings only"));
        assert!(block.contains("ship the rewrite"));
    }

    #[test]
    fn thought_block_includes_prior_outputs() {
        let user_context = test_context();
        let mut outputs = StageOutputs::default();
        outputs.classification = Some(thoughtflow_core::stages::Classification {
            kind: thoughtflow_core::stages::ThoughtKind::Task,
            urgency: thoughtflow_core::stages::UrgencyLevel::Soon,
            entities: thoughtflow_core::stages::Entities::default(),
            emotional_tone: "focused".to_string(),
            implied_needs: vec![],
        });
        let ctx = StageContext {
            text: "write the report",
            user_context: &user_context,
            prior: &outputs,
        };
        let block = thought_block(&ctx);
        assert!(block.contains("write the report"));
        assert!(block.contains("classification"));
        assert!(!block.contains("value_impact"));
    }
}
