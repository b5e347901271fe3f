//! Application state.

use std::sync::Arc;

use tokio::sync::Semaphore;

use telecare_billing_core::InvalidTolerance;
use telecare_billing_store::Store;

use crate::config::ServiceConfig;
use crate::engine::WebhookReconciliationEngine;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// The reconciliation engine.
    pub engine: Arc<WebhookReconciliationEngine>,

    /// Slots for notifications being processed.
    pub webhook_permits: Arc<Semaphore>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured fee tolerance is out of range.
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self, InvalidTolerance> {
        let engine = WebhookReconciliationEngine::new(Arc::clone(&store), config.engine_config())?;

        if config.gateway_signing_key.is_none() {
            tracing::warn!("Gateway signing key not configured - signed webhooks will be refused");
        }
        if config.enable_test_webhook {
            tracing::warn!("Test webhook endpoint enabled - do not use in production");
        }

        Ok(Self {
            store,
            engine: Arc::new(engine),
            webhook_permits: Arc::new(Semaphore::new(config.webhook_permits())),
            config,
        })
    }

    /// Check if the unsigned test webhook is served.
    #[must_use]
    pub fn has_test_webhook(&self) -> bool {
        self.config.enable_test_webhook
    }
}
