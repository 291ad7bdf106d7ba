//! Shared fixture builders.

use thoughtflow_core::context::{UserContext, ValuesRanking};
use thoughtflow_core::stages::{
    ActionPlan, Analysis, Classification, CompletedOutputs, Entities, GoalAlignment, MainAction,
    Priority, PriorityLevel, ScoredDimension, ThoughtKind, Timeline, UrgencyLevel, ValueImpact,
};
use thoughtflow_core::thought::UserId;

/// A user context with equal value weights and a simple profile.
#[must_use]
pub fn sample_user_context(user_id: &str) -> UserContext {
    UserContext {
        user_id: UserId::new(user_id),
        version: 1,
        profile: serde_json::json!({
            "goals": ["learn systems programming", "ship side projects"],
            "constraints": ["full-time job"],
        }),
        values_ranking: ValuesRanking::default(),
        energy_constraints: Some("deep work in the mornings".to_string()),
    }
}

fn scored(score: f64) -> ScoredDimension {
    ScoredDimension {
        score,
        reasoning: "fixture".to_string(),
    }
}

/// A structurally valid full set of stage outputs.
#[must_use]
pub fn sample_completed_outputs() -> CompletedOutputs {
    CompletedOutputs {
        classification: Classification {
            kind: ThoughtKind::Question,
            urgency: UrgencyLevel::Eventually,
            entities: Entities {
                topics: vec!["rust".to_string()],
                ..Entities::default()
            },
            emotional_tone: "curious".to_string(),
            implied_needs: vec!["guidance".to_string()],
        },
        analysis: Analysis {
            goal_alignment: GoalAlignment {
                aligned_goals: vec!["learn systems programming".to_string()],
                conflicting_goals: vec![],
                reasoning: "directly on the learning path".to_string(),
            },
            underlying_needs: vec!["skill growth".to_string()],
            pattern_connections: vec![],
            realistic_assessment: serde_json::json!({ "feasible": true }),
            unspoken_factors: vec![],
        },
        value_impact: ValueImpact {
            economic: scored(6.0),
            relational: scored(2.0),
            legacy: scored(4.0),
            health: scored(1.0),
            growth: scored(9.0),
            weighted_total: 4.4,
        },
        action_plan: ActionPlan {
            quick_wins: vec!["read the book's first chapter".to_string()],
            main_actions: vec![MainAction {
                description: "work through an ownership-focused course".to_string(),
                duration: "4 weeks".to_string(),
                prerequisites: vec![],
                obstacles: vec!["limited evenings".to_string()],
                mitigation: "small daily sessions".to_string(),
                timing_hint: "mornings".to_string(),
            }],
            delegation_opportunities: vec![],
            success_metrics: vec!["a small CLI shipped".to_string()],
        },
        priority: Priority {
            priority_level: PriorityLevel::Medium,
            urgency_reasoning: "no external deadline".to_string(),
            strategic_fit: "matches the learning goal".to_string(),
            recommended_timeline: Timeline {
                start: "next week".to_string(),
                duration: "a month".to_string(),
                checkpoints: vec!["end of week two".to_string()],
            },
            final_recommendation: "Start small and stay consistent.".to_string(),
        },
    }
}

/// Canned valid reply for the classification stage.
#[must_use]
pub fn classification_reply() -> String {
    stage_reply(&sample_completed_outputs().classification)
}

/// Canned valid reply for the analysis stage.
#[must_use]
pub fn analysis_reply() -> String {
    stage_reply(&sample_completed_outputs().analysis)
}

/// Canned valid reply for the value-impact stage (no weighted total; the
/// pipeline computes it).
#[must_use]
pub fn value_impact_reply() -> String {
    let mut impact = sample_completed_outputs().value_impact;
    impact.weighted_total = 0.0;
    stage_reply(&impact)
}

/// Canned valid reply for the action-plan stage.
#[must_use]
pub fn action_plan_reply() -> String {
    stage_reply(&sample_completed_outputs().action_plan)
}

/// Canned valid reply for the prioritization stage.
#[must_use]
pub fn priority_reply() -> String {
    stage_reply(&sample_completed_outputs().priority)
}

fn stage_reply<T: serde::Serialize>(output: &T) -> String {
    serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn sample_outputs_are_structurally_valid() {
        let outputs = sample_completed_outputs();
        assert!(outputs.analysis.validate().is_ok());
        assert!(outputs.value_impact.validate().is_ok());
    }

    #[test]
    fn replies_parse_back() {
        let c: Classification = serde_json::from_str(&classification_reply()).unwrap();
        assert_eq!(c.kind, ThoughtKind::Question);
    }
}
