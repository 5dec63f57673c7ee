use std::sync::Arc;

use stepwise_agent::Agent;
use stepwise_core::config::GatewayConfig;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub agent: Arc<Agent>,
}
