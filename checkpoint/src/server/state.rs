//! Application state for the ticket API.

use crate::engine::ValidationEngine;
use crate::store::TicketStore;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// State shared by every handler. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Validation engine used by the scan endpoint
    pub engine: ValidationEngine,
    /// Bearer token required on `/api/*`, if any
    pub api_token: Option<Arc<str>>,
    /// Prometheus renderer; `/metrics` is empty without it
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create state around `engine`, without auth or metrics.
    #[must_use]
    pub const fn new(engine: ValidationEngine) -> Self {
        Self {
            engine,
            api_token: None,
            metrics: None,
        }
    }

    /// Require `token` on API routes (builder style).
    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<Arc<str>>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Expose metrics through `handle` (builder style).
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// The ticket store behind the engine.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TicketStore> {
        self.engine.store()
    }
}
