//! # Thoughtflow Core
//!
//! Domain types and component seams for the Thoughtflow analysis pipeline.
//!
//! A *thought* is a short piece of user-submitted text. The pipeline turns it
//! into five structured analysis outputs while streaming progress to
//! subscribers. This crate defines everything the other workspace members
//! agree on:
//!
//! - the [`thought`] row model and its status machine
//! - the five typed [`stages`] outputs
//! - the wire-level [`envelope`] shared by the broker and the fan-out bus
//! - the [`error`] taxonomy that drives retry and dead-letter decisions
//! - the statically typed [`config`] rejected-at-startup configuration
//! - the traits implemented elsewhere: [`sink::ThoughtStore`],
//!   [`bus::ProgressBus`], [`cache::SemanticCache`],
//!   [`broker::ThoughtProducer`], [`context::UserContextStore`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ThoughtCreated    ┌──────────┐
//! │  Ingest  │────────────────────▶│  Broker  │
//! └──────────┘                     └────┬─────┘
//!                                       │ consumer group
//!                                       ▼
//!                                 ┌───────────┐
//!                  cache hit ◀────│ Pipeline  │────▶ A1..A5 (LLM)
//!                                 └────┬──────┘
//!                                      │
//!                         ┌────────────┼─────────────┐
//!                         ▼            ▼             ▼
//!                    ┌────────┐  ┌──────────┐  ┌──────────┐
//!                    │  Sink  │  │ Fan-out  │  │   DLQ    │
//!                    └────────┘  └──────────┘  └──────────┘
//! ```
//!
//! Implementations live in sibling crates (`thoughtflow-postgres`,
//! `thoughtflow-broker`, `thoughtflow-fanout`, `thoughtflow-llm`); in-memory
//! fakes for all seams live in `thoughtflow-testing`.

pub mod broker;
pub mod bus;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod retry;
pub mod sink;
pub mod stages;
pub mod thought;

pub use envelope::{EventEnvelope, EventPayload, SCHEMA_VERSION};
pub use error::{PermanentKind, PipelineError, TransientKind};
pub use thought::{Thought, ThoughtId, ThoughtStatus, UserId};
