pub mod providers;
pub mod retry;

use std::sync::Arc;

use tracing::debug;

use stepwise_core::config::{AppConfig, ModelConfig};
use stepwise_core::traits::ModelClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create a model client for `config`.
///
/// Every provider is reached through the OpenAI chat-completions dialect;
/// `base_url` selects the server.
pub fn create_client(config: &ModelConfig) -> Box<dyn ModelClient> {
    debug!(
        provider = %config.provider,
        model = %config.model_id,
        "Creating OpenAI-compatible client"
    );
    Box::new(OpenAiClient::new())
}

/// Build the client for an application config, wrapping it with retry and
/// fallback handling when either is configured.
pub fn client_for(config: &AppConfig) -> Arc<dyn ModelClient> {
    let primary = create_client(&config.model);
    if config.model.retry.is_none() && config.fallback_models.is_empty() {
        return Arc::from(primary);
    }

    let fallbacks = config
        .fallback_models
        .iter()
        .map(|fb| (fb.clone(), create_client(fb)))
        .collect();
    let retry = config.model.retry.clone().unwrap_or_default();
    Arc::new(RetryingClient::new(primary, fallbacks, retry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_for_plain_config() {
        let config = stepwise_test_utils::test_config();
        // Constructs without touching the network.
        let _client = client_for(&config);
    }

    #[test]
    fn test_client_for_with_fallbacks() {
        let mut config = stepwise_test_utils::test_config();
        config.fallback_models.push(ModelConfig::new("backup"));
        let _client = client_for(&config);
    }
}
