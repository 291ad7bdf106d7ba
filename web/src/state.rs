//! Shared gateway state.

use crate::limiter::ConnectionLimiter;
use std::sync::Arc;
use thoughtflow_core::broker::ThoughtProducer;
use thoughtflow_core::bus::ProgressBus;
use thoughtflow_core::clock::Clock;
use thoughtflow_core::config::FanoutConfig;
use thoughtflow_core::sink::ThoughtStore;

/// Everything the handlers need, constructed once in `main` and cloned per
/// request.
#[derive(Clone)]
pub struct AppState {
    /// The persistence sink (for ingest inserts).
    pub store: Arc<dyn ThoughtStore>,
    /// The broker producer.
    pub producer: Arc<dyn ThoughtProducer>,
    /// The fan-out bus (for SSE subscriptions).
    pub bus: Arc<dyn ProgressBus>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Fan-out settings (heartbeat interval, channel prefix).
    pub fanout: FanoutConfig,
    /// The per-instance SSE connection cap.
    pub limiter: Arc<ConnectionLimiter>,
}

impl AppState {
    /// Assemble the state, sizing the limiter from configuration.
    #[must_use]
    pub fn new(
        store: Arc<dyn ThoughtStore>,
        producer: Arc<dyn ThoughtProducer>,
        bus: Arc<dyn ProgressBus>,
        clock: Arc<dyn Clock>,
        fanout: FanoutConfig,
    ) -> Self {
        let limiter = Arc::new(ConnectionLimiter::new(fanout.max_connections_per_instance));
        Self {
            store,
            producer,
            bus,
            clock,
            fanout,
            limiter,
        }
    }
}
