use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use stepwise_core::config::{ModelConfig, RetryConfig};
use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::traits::ModelClient;
use stepwise_core::types::*;

/// A model client that retries failed requests and falls back to alternative models.
pub struct RetryingClient {
    primary: Box<dyn ModelClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn ModelClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn ModelClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn ModelClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &StepwiseError) -> bool {
    match e {
        StepwiseError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ModelClient for RetryingClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.complete(&config, messages.clone(), &tools).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying model request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!("Primary model exhausted, trying fallback models");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client.complete(fb_config, messages.clone(), &tools).await {
                    Ok(response) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(response);
                    }
                    Err(e) => {
                        warn!(
                            model = %fb_config.model_id,
                            error = %e,
                            "Fallback model also failed"
                        );
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| StepwiseError::LlmRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_test_utils::{text_response, FailingModel, ScriptedModel};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    /// Fails with a retryable error `failures` times, then answers.
    struct FlakyModel {
        failures: std::sync::atomic::AtomicU32,
    }

    impl ModelClient for FlakyModel {
        fn complete(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
            _tools: &[ToolDefinition],
        ) -> BoxFuture<'_, Result<ModelResponse>> {
            Box::pin(async move {
                let left = self.failures.load(std::sync::atomic::Ordering::SeqCst);
                if left > 0 {
                    self.failures
                        .store(left - 1, std::sync::atomic::Ordering::SeqCst);
                    return Err(StepwiseError::LlmRequest("HTTP 503: busy".into()));
                }
                Ok(ModelResponse::text("recovered"))
            })
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&StepwiseError::LlmRequest("HTTP 429: slow down".into())));
        assert!(is_retryable(&StepwiseError::LlmRequest("connection reset".into())));
        assert!(!is_retryable(&StepwiseError::LlmRequest("HTTP 401: bad key".into())));
        assert!(!is_retryable(&StepwiseError::LlmParse("garbage".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 4000,
        };
        let late = calculate_backoff(8, &config);
        assert!(late <= Duration::from_millis(4800));
        assert!(late >= Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let client = RetryingClient::new(
            Box::new(FlakyModel {
                failures: std::sync::atomic::AtomicU32::new(2),
            }),
            vec![],
            fast_retry(3),
        );
        let resp = client
            .complete(&ModelConfig::new("m"), vec![ChatMessage::user("hi")], &[])
            .await
            .unwrap();
        assert_eq!(resp.content.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn test_falls_back_after_exhaustion() {
        let client = RetryingClient::new(
            Box::new(FailingModel::new("HTTP 500: down")),
            vec![(
                ModelConfig::new("backup"),
                Box::new(ScriptedModel::new([text_response("from backup", 1)])) as Box<dyn ModelClient>,
            )],
            fast_retry(1),
        );
        let resp = client
            .complete(&ModelConfig::new("m"), vec![], &[])
            .await
            .unwrap();
        assert_eq!(resp.content.as_deref(), Some("from backup"));
    }

    #[tokio::test]
    async fn test_non_retryable_error_surfaces() {
        let client = RetryingClient::new(
            Box::new(FailingModel::new("HTTP 401: bad key")),
            vec![],
            fast_retry(5),
        );
        let err = client
            .complete(&ModelConfig::new("m"), vec![], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
