//! Typed outputs of the five agent stages.
//!
//! Each stage emits a fixed schema validated at the boundary; downstream
//! stages and the sink only ever see the parsed form. Unknown fields are
//! rejected so a drifting prompt cannot silently widen the contract.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Names of the five pipeline stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// A1: classify the thought.
    Classification,
    /// A2: analyze it against the user's goals.
    Analysis,
    /// A3: score the impact across the five value dimensions.
    ValueImpact,
    /// A4: produce an action plan.
    ActionPlan,
    /// A5: prioritize and recommend a timeline.
    Priority,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [Self; 5] = [
        Self::Classification,
        Self::Analysis,
        Self::ValueImpact,
        Self::ActionPlan,
        Self::Priority,
    ];

    /// Total number of stages.
    pub const COUNT: u8 = 5;

    /// Snake-case name used on the wire and as the sink column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Analysis => "analysis",
            Self::ValueImpact => "value_impact",
            Self::ActionPlan => "action_plan",
            Self::Priority => "priority",
        }
    }

    /// 1-based position in the pipeline.
    #[must_use]
    pub const fn number(&self) -> u8 {
        match self {
            Self::Classification => 1,
            Self::Analysis => 2,
            Self::ValueImpact => 3,
            Self::ActionPlan => 4,
            Self::Priority => 5,
        }
    }

    /// Progress through the pipeline once this stage completed, in percent.
    #[must_use]
    pub const fn progress_percent(&self) -> u8 {
        self.number() * 100 / Self::COUNT
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage output failed shape validation.
#[derive(Debug, Error)]
pub enum StageValidationError {
    /// The model produced JSON that does not match the stage schema.
    #[error("stage {stage} output does not match schema: {reason}")]
    Shape {
        /// Which stage.
        stage: StageName,
        /// Serde or structural error text.
        reason: String,
    },
    /// A numeric field was outside its documented range.
    #[error("stage {stage} field {field} out of range: {value}")]
    OutOfRange {
        /// Which stage.
        stage: StageName,
        /// Offending field.
        field: &'static str,
        /// Observed value.
        value: f64,
    },
}

// ── A1: classification ─────────────────────────────────────────────────────

/// What kind of thought this is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtKind {
    /// Something to do.
    Task,
    /// Something wrong to resolve.
    Problem,
    /// A new idea.
    Idea,
    /// An open question.
    Question,
    /// A neutral observation.
    Observation,
    /// An emotional expression.
    Emotion,
}

/// How soon the thought demands attention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    /// Right now.
    Immediate,
    /// Within days.
    Soon,
    /// Someday.
    Eventually,
    /// Not actionable.
    Never,
}

/// Entities extracted from the thought text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entities {
    /// People mentioned.
    #[serde(default)]
    pub people: Vec<String>,
    /// Dates mentioned.
    #[serde(default)]
    pub dates: Vec<String>,
    /// Places mentioned.
    #[serde(default)]
    pub places: Vec<String>,
    /// Topics touched.
    #[serde(default)]
    pub topics: Vec<String>,
}

/// A1 output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Classification {
    /// Thought kind.
    #[serde(rename = "type")]
    pub kind: ThoughtKind,
    /// Urgency judgement.
    pub urgency: UrgencyLevel,
    /// Extracted entities.
    pub entities: Entities,
    /// Free-text emotional tone.
    pub emotional_tone: String,
    /// Needs the text implies without stating.
    pub implied_needs: Vec<String>,
}

// ── A2: analysis ───────────────────────────────────────────────────────────

/// How the thought relates to the user's stated goals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoalAlignment {
    /// Goals this thought advances.
    pub aligned_goals: Vec<String>,
    /// Goals it works against.
    pub conflicting_goals: Vec<String>,
    /// Why.
    pub reasoning: String,
}

/// A2 output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Analysis {
    /// Goal alignment assessment.
    pub goal_alignment: GoalAlignment,
    /// Deeper needs behind the thought.
    pub underlying_needs: Vec<String>,
    /// Connections to recurring patterns.
    pub pattern_connections: Vec<String>,
    /// Free-shape realistic assessment object.
    pub realistic_assessment: serde_json::Value,
    /// Factors the user left unspoken.
    pub unspoken_factors: Vec<String>,
}

impl Analysis {
    /// Structural checks beyond serde.
    ///
    /// # Errors
    ///
    /// Returns [`StageValidationError::Shape`] when `realistic_assessment`
    /// is not a JSON object.
    pub fn validate(&self) -> Result<(), StageValidationError> {
        if !self.realistic_assessment.is_object() {
            return Err(StageValidationError::Shape {
                stage: StageName::Analysis,
                reason: "realistic_assessment must be an object".to_string(),
            });
        }
        Ok(())
    }
}

// ── A3: value impact ───────────────────────────────────────────────────────

/// The five value dimensions, in tie-break order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueDimension {
    /// Financial impact.
    Economic,
    /// Relationships impact.
    Relational,
    /// Long-term legacy impact.
    Legacy,
    /// Health impact.
    Health,
    /// Personal growth impact.
    Growth,
}

impl ValueDimension {
    /// All dimensions, in the fixed tie-break order.
    pub const ALL: [Self; 5] = [
        Self::Economic,
        Self::Relational,
        Self::Legacy,
        Self::Health,
        Self::Growth,
    ];

    /// Snake-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Economic => "economic",
            Self::Relational => "relational",
            Self::Legacy => "legacy",
            Self::Health => "health",
            Self::Growth => "growth",
        }
    }
}

impl fmt::Display for ValueDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored dimension with its reasoning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoredDimension {
    /// Score in `[0, 10]`.
    pub score: f64,
    /// Short justification.
    pub reasoning: String,
}

/// A3 output.
///
/// `weighted_total` is computed in code from the user's value ranking, never
/// trusted from the model; see [`ValueImpact::compute_weighted_total`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueImpact {
    /// Financial impact.
    pub economic: ScoredDimension,
    /// Relationships impact.
    pub relational: ScoredDimension,
    /// Legacy impact.
    pub legacy: ScoredDimension,
    /// Health impact.
    pub health: ScoredDimension,
    /// Growth impact.
    pub growth: ScoredDimension,
    /// Weight-averaged total in `[0, 10]`.
    #[serde(default)]
    pub weighted_total: f64,
}

impl ValueImpact {
    /// Score for one dimension.
    #[must_use]
    pub const fn score(&self, dimension: ValueDimension) -> f64 {
        match dimension {
            ValueDimension::Economic => self.economic.score,
            ValueDimension::Relational => self.relational.score,
            ValueDimension::Legacy => self.legacy.score,
            ValueDimension::Health => self.health.score,
            ValueDimension::Growth => self.growth.score,
        }
    }

    /// Recompute `weighted_total` as `Σ(score·weight) / Σ(weight)` using the
    /// given per-dimension weights. Zero total weight yields 0.0.
    pub fn compute_weighted_total(&mut self, weight_for: impl Fn(ValueDimension) -> f64) {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for dimension in ValueDimension::ALL {
            let weight = weight_for(dimension);
            weighted += self.score(dimension) * weight;
            total_weight += weight;
        }
        self.weighted_total = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };
    }

    /// Highest-scoring dimension; ties break in [`ValueDimension::ALL`] order.
    #[must_use]
    pub fn top_dimension(&self) -> ValueDimension {
        let mut best = ValueDimension::Economic;
        let mut best_score = self.score(best);
        for dimension in ValueDimension::ALL {
            let score = self.score(dimension);
            if score > best_score {
                best = dimension;
                best_score = score;
            }
        }
        best
    }

    /// Range checks on all scores and the total.
    ///
    /// # Errors
    ///
    /// Returns [`StageValidationError::OutOfRange`] when any score or the
    /// weighted total is outside `[0, 10]` or not finite.
    pub fn validate(&self) -> Result<(), StageValidationError> {
        for dimension in ValueDimension::ALL {
            let score = self.score(dimension);
            if !score.is_finite() || !(0.0..=10.0).contains(&score) {
                return Err(StageValidationError::OutOfRange {
                    stage: StageName::ValueImpact,
                    field: dimension.as_str(),
                    value: score,
                });
            }
        }
        if !self.weighted_total.is_finite() || !(0.0..=10.0).contains(&self.weighted_total) {
            return Err(StageValidationError::OutOfRange {
                stage: StageName::ValueImpact,
                field: "weighted_total",
                value: self.weighted_total,
            });
        }
        Ok(())
    }
}

// ── A4: action plan ────────────────────────────────────────────────────────

/// One substantial action in the plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MainAction {
    /// What to do.
    pub description: String,
    /// Estimated duration, free text.
    pub duration: String,
    /// What must happen first.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// What could go wrong.
    #[serde(default)]
    pub obstacles: Vec<String>,
    /// How to mitigate the obstacles.
    pub mitigation: String,
    /// When to do it, drawn from the user's energy/time constraints.
    pub timing_hint: String,
}

/// A4 output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionPlan {
    /// Small, immediate steps.
    pub quick_wins: Vec<String>,
    /// The substantial actions.
    pub main_actions: Vec<MainAction>,
    /// Things someone else could do.
    #[serde(default)]
    pub delegation_opportunities: Vec<String>,
    /// How to know it worked.
    pub success_metrics: Vec<String>,
}

// ── A5: prioritization ─────────────────────────────────────────────────────

/// Final priority bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityLevel {
    /// Drop everything.
    Critical,
    /// Next in line.
    High,
    /// Normal queue.
    Medium,
    /// When convenient.
    Low,
    /// Consciously postponed.
    Defer,
}

/// Recommended execution window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timeline {
    /// When to start, free text.
    pub start: String,
    /// Expected duration, free text.
    pub duration: String,
    /// Intermediate checkpoints.
    #[serde(default)]
    pub checkpoints: Vec<String>,
}

/// A5 output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Priority {
    /// Priority bucket.
    pub priority_level: PriorityLevel,
    /// Why this urgency.
    pub urgency_reasoning: String,
    /// Fit with the user's strategy.
    pub strategic_fit: String,
    /// Recommended timeline.
    pub recommended_timeline: Timeline,
    /// One-paragraph recommendation.
    pub final_recommendation: String,
}

// ── Containers ─────────────────────────────────────────────────────────────

/// A single stage's output, tagged by stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageOutput {
    /// A1 output.
    Classification(Classification),
    /// A2 output.
    Analysis(Analysis),
    /// A3 output.
    ValueImpact(ValueImpact),
    /// A4 output.
    ActionPlan(ActionPlan),
    /// A5 output.
    Priority(Priority),
}

impl StageOutput {
    /// The stage this output belongs to.
    #[must_use]
    pub const fn stage(&self) -> StageName {
        match self {
            Self::Classification(_) => StageName::Classification,
            Self::Analysis(_) => StageName::Analysis,
            Self::ValueImpact(_) => StageName::ValueImpact,
            Self::ActionPlan(_) => StageName::ActionPlan,
            Self::Priority(_) => StageName::Priority,
        }
    }

    /// Serialize just the inner output object (no stage tag).
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialization fails.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Classification(v) => serde_json::to_value(v),
            Self::Analysis(v) => serde_json::to_value(v),
            Self::ValueImpact(v) => serde_json::to_value(v),
            Self::ActionPlan(v) => serde_json::to_value(v),
            Self::Priority(v) => serde_json::to_value(v),
        }
    }
}

/// The five per-thought stage slots. Each is `None` until its stage
/// completes and immutable afterwards (first-writer-wins at the sink).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutputs {
    /// A1 slot.
    pub classification: Option<Classification>,
    /// A2 slot.
    pub analysis: Option<Analysis>,
    /// A3 slot.
    pub value_impact: Option<ValueImpact>,
    /// A4 slot.
    pub action_plan: Option<ActionPlan>,
    /// A5 slot.
    pub priority: Option<Priority>,
}

impl StageOutputs {
    /// Whether the named slot is filled.
    #[must_use]
    pub const fn has(&self, stage: StageName) -> bool {
        match stage {
            StageName::Classification => self.classification.is_some(),
            StageName::Analysis => self.analysis.is_some(),
            StageName::ValueImpact => self.value_impact.is_some(),
            StageName::ActionPlan => self.action_plan.is_some(),
            StageName::Priority => self.priority.is_some(),
        }
    }

    /// Fill a slot if empty; returns whether the write took effect.
    pub fn insert(&mut self, output: StageOutput) -> bool {
        match output {
            StageOutput::Classification(v) if self.classification.is_none() => {
                self.classification = Some(v);
                true
            }
            StageOutput::Analysis(v) if self.analysis.is_none() => {
                self.analysis = Some(v);
                true
            }
            StageOutput::ValueImpact(v) if self.value_impact.is_none() => {
                self.value_impact = Some(v);
                true
            }
            StageOutput::ActionPlan(v) if self.action_plan.is_none() => {
                self.action_plan = Some(v);
                true
            }
            StageOutput::Priority(v) if self.priority.is_none() => {
                self.priority = Some(v);
                true
            }
            _ => false,
        }
    }

    /// Whether all five slots are filled.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.classification.is_some()
            && self.analysis.is_some()
            && self.value_impact.is_some()
            && self.action_plan.is_some()
            && self.priority.is_some()
    }

    /// First unfilled stage in execution order, if any.
    #[must_use]
    pub fn next_missing(&self) -> Option<StageName> {
        StageName::ALL.into_iter().find(|stage| !self.has(*stage))
    }
}

/// All five outputs of a finished run; what the semantic cache stores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompletedOutputs {
    /// A1 output.
    pub classification: Classification,
    /// A2 output.
    pub analysis: Analysis,
    /// A3 output.
    pub value_impact: ValueImpact,
    /// A4 output.
    pub action_plan: ActionPlan,
    /// A5 output.
    pub priority: Priority,
}

impl CompletedOutputs {
    /// The outputs as an ordered list of tagged stage outputs.
    #[must_use]
    pub fn as_stage_outputs(&self) -> [StageOutput; 5] {
        [
            StageOutput::Classification(self.classification.clone()),
            StageOutput::Analysis(self.analysis.clone()),
            StageOutput::ValueImpact(self.value_impact.clone()),
            StageOutput::ActionPlan(self.action_plan.clone()),
            StageOutput::Priority(self.priority.clone()),
        ]
    }
}

impl TryFrom<StageOutputs> for CompletedOutputs {
    type Error = StageName;

    /// Fails with the first missing stage when the container is incomplete.
    fn try_from(outputs: StageOutputs) -> Result<Self, StageName> {
        match outputs {
            StageOutputs {
                classification: Some(classification),
                analysis: Some(analysis),
                value_impact: Some(value_impact),
                action_plan: Some(action_plan),
                priority: Some(priority),
            } => Ok(Self {
                classification,
                analysis,
                value_impact,
                action_plan,
                priority,
            }),
            incomplete => Err(incomplete
                .next_missing()
                .unwrap_or(StageName::Classification)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn scored(score: f64) -> ScoredDimension {
        ScoredDimension {
            score,
            reasoning: "because".to_string(),
        }
    }

    fn value_impact(scores: [f64; 5]) -> ValueImpact {
        ValueImpact {
            economic: scored(scores[0]),
            relational: scored(scores[1]),
            legacy: scored(scores[2]),
            health: scored(scores[3]),
            growth: scored(scores[4]),
            weighted_total: 0.0,
        }
    }

    #[test]
    fn stage_numbers_and_progress() {
        assert_eq!(StageName::Classification.number(), 1);
        assert_eq!(StageName::Priority.number(), 5);
        assert_eq!(StageName::Classification.progress_percent(), 20);
        assert_eq!(StageName::Priority.progress_percent(), 100);
    }

    #[test]
    fn weighted_total_uses_ranking_weights() {
        let mut impact = value_impact([10.0, 0.0, 0.0, 0.0, 0.0]);
        // economic weighted 4x, everything else 1x
        impact.compute_weighted_total(|d| match d {
            ValueDimension::Economic => 4.0,
            _ => 1.0,
        });
        assert!((impact.weighted_total - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn weighted_total_zero_weights() {
        let mut impact = value_impact([5.0, 5.0, 5.0, 5.0, 5.0]);
        impact.compute_weighted_total(|_| 0.0);
        assert!((impact.weighted_total - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn top_dimension_tie_breaks_in_fixed_order() {
        let impact = value_impact([7.0, 7.0, 7.0, 7.0, 7.0]);
        assert_eq!(impact.top_dimension(), ValueDimension::Economic);

        let impact = value_impact([1.0, 3.0, 3.0, 2.0, 1.0]);
        assert_eq!(impact.top_dimension(), ValueDimension::Relational);
    }

    #[test]
    fn value_impact_rejects_out_of_range() {
        let impact = value_impact([11.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(impact.validate().is_err());

        let mut ok = value_impact([1.0, 2.0, 3.0, 4.0, 5.0]);
        ok.compute_weighted_total(|_| 1.0);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn classification_rejects_unknown_fields() {
        let json = r#"{
            "type": "task",
            "urgency": "soon",
            "entities": {"people": [], "dates": [], "places": [], "topics": []},
            "emotional_tone": "calm",
            "implied_needs": [],
            "extra": true
        }"#;
        assert!(serde_json::from_str::<Classification>(json).is_err());
    }

    #[test]
    fn classification_kind_field_is_named_type() {
        let json = r#"{
            "type": "question",
            "urgency": "eventually",
            "entities": {},
            "emotional_tone": "curious",
            "implied_needs": ["information"]
        }"#;
        let parsed: Classification = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind, ThoughtKind::Question);
        assert_eq!(parsed.urgency, UrgencyLevel::Eventually);
    }

    #[test]
    fn analysis_requires_object_assessment() {
        let analysis = Analysis {
            goal_alignment: GoalAlignment {
                aligned_goals: vec![],
                conflicting_goals: vec![],
                reasoning: String::new(),
            },
            underlying_needs: vec![],
            pattern_connections: vec![],
            realistic_assessment: serde_json::json!("not an object"),
            unspoken_factors: vec![],
        };
        assert!(analysis.validate().is_err());
    }

    #[test]
    fn priority_level_serializes_capitalized() {
        let json = serde_json::to_string(&PriorityLevel::Critical).unwrap();
        assert_eq!(json, r#""Critical""#);
    }

    #[test]
    fn outputs_first_writer_wins() {
        let mut outputs = StageOutputs::default();
        let first = Classification {
            kind: ThoughtKind::Idea,
            urgency: UrgencyLevel::Soon,
            entities: Entities::default(),
            emotional_tone: "excited".to_string(),
            implied_needs: vec![],
        };
        let second = Classification {
            emotional_tone: "bored".to_string(),
            ..first.clone()
        };

        assert!(outputs.insert(StageOutput::Classification(first.clone())));
        assert!(!outputs.insert(StageOutput::Classification(second)));
        assert_eq!(outputs.classification, Some(first));
    }

    #[test]
    fn next_missing_walks_in_order() {
        let mut outputs = StageOutputs::default();
        assert_eq!(outputs.next_missing(), Some(StageName::Classification));
        outputs.classification = Some(Classification {
            kind: ThoughtKind::Task,
            urgency: UrgencyLevel::Immediate,
            entities: Entities::default(),
            emotional_tone: String::new(),
            implied_needs: vec![],
        });
        assert_eq!(outputs.next_missing(), Some(StageName::Analysis));
        assert!(!outputs.is_complete());
    }
}
