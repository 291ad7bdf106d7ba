//! # Thoughtflow Runtime
//!
//! The worker process glue:
//!
//! - [`worker`]: the delivery handler bridging the broker consumer to the
//!   pipeline orchestrator (retry-budget decisions live here), plus the
//!   full process wiring from configuration to running tasks
//! - [`shutdown`]: signal handling and drain-with-deadline termination
//!
//! Clients (database pool, Kafka producer/consumer, Redis connection, LLM
//! adapters) are constructed once at startup and passed explicitly; nothing
//! is a global.

pub mod shutdown;
pub mod worker;

pub use shutdown::{ShutdownSignal, wait_for_signal};
pub use worker::{PipelineWorkHandler, run_worker};
