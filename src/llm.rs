//! LLM provider abstraction
//!
//! A single text-completion boundary. The production provider is Gemini.

mod error;
mod gemini;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use gemini::{GeminiService, DEFAULT_MODEL};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Configuration for the completion provider
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub gemini_api_key: Option<String>,
    /// LLM gateway URL. When set, requests go through the gateway and no
    /// API key is sent.
    pub gateway: Option<String>,
    /// Model name, defaults to [`DEFAULT_MODEL`]
    pub model: Option<String>,
}

impl LlmConfig {
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Build the configured provider, wrapped with logging. `None` when neither
/// an API key nor a gateway is configured.
pub fn build_service(config: &LlmConfig) -> Result<Option<Arc<dyn LlmService>>, LlmError> {
    let api_key = if config.gateway.is_some() {
        None
    } else {
        match &config.gemini_api_key {
            Some(key) => Some(key.clone()),
            None => return Ok(None),
        }
    };

    let service = GeminiService::new(api_key, config.model(), config.gateway.as_deref())?;
    Ok(Some(Arc::new(LoggingService::new(Arc::new(service)))))
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    history_messages = request.messages.len().saturating_sub(1),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    retryable = e.kind.is_retryable(),
                    retry_after_ms = ?e.retry_after.map(|d| d.as_millis()),
                    "LLM request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_credentials_means_no_service() {
        let config = LlmConfig::default();
        assert!(build_service(&config).unwrap().is_none());
        assert_eq!(config.model(), DEFAULT_MODEL);
    }

    #[test]
    fn gateway_mode_needs_no_key() {
        let config = LlmConfig {
            gemini_api_key: None,
            gateway: Some("http://localhost:9999/gateway".to_string()),
            model: Some("gemini-2.0-flash".to_string()),
        };
        let service = build_service(&config).unwrap().unwrap();
        assert_eq!(service.model_id(), "gemini-2.0-flash");
    }
}
