//! # Thoughtflow Pipeline
//!
//! The five-stage analysis pipeline and its supporting machinery:
//!
//! - [`orchestrator`]: one `run(thought_id)` per broker delivery: claims
//!   the row, checks the semantic cache, drives agents A1..A5 in sequence,
//!   persists each output immediately and fans progress out to the bus
//! - [`agents`]: the stage prompts, output parsing and per-stage retry
//! - [`sweeper`]: the periodic scan that rescues thoughts stuck in
//!   `processing` after a crashed delivery
//!
//! The orchestrator is stateless between calls. Parallelism exists only
//! across thoughts (one worker per broker partition); within a thought the
//! stages run strictly in sequence.

pub mod agents;
pub mod orchestrator;
pub mod sweeper;

pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use sweeper::{RecoverySweeper, SweepReport};
