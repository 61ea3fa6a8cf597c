use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    config::Config,
    error::{AttemptFailure, ProviderError, ProviderFailure},
    models::ProviderId,
    services::providers::LlmProvider,
};

/// Timeout and retry policy applied to every provider attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub attempt_timeout: Duration,
    /// Extra attempts on the same provider before falling back
    pub retries_per_provider: u32,
    pub retry_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            retries_per_provider: 0,
            retry_delay: Duration::from_millis(250),
        }
    }
}

impl From<&Config> for GatewayConfig {
    fn from(config: &Config) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(config.provider_timeout_secs),
            retries_per_provider: config.provider_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Raw completion plus which provider actually produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub provider_id: ProviderId,
    pub text: String,
    pub latency: Duration,
    /// Attempts made across the whole chain, including the successful one
    pub attempts: usize,
}

/// Uniform entry point over the registered LLM backends
///
/// Walks a preference-ordered fallback chain. A provider's failure moves on to
/// the next one; only an exhausted chain is reported to the caller.
#[derive(Clone, Default)]
pub struct ProviderGateway {
    providers: HashMap<ProviderId, Arc<dyn LlmProvider>>,
    config: GatewayConfig,
}

impl ProviderGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            providers: HashMap::new(),
            config,
        }
    }

    /// Registers a backend under its own id, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        tracing::debug!(provider = provider.name(), "Registered LLM provider");
        self.providers.insert(provider.id(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn is_registered(&self, id: ProviderId) -> bool {
        self.providers.contains_key(&id)
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.attempt_timeout
    }

    /// Sends the prompt down the fallback chain
    ///
    /// Each attempt gets its own `timeout`; an expired attempt is dropped
    /// (cancelled) and counts as that provider's failure.
    pub async fn invoke(
        &self,
        prompt: &str,
        preference: &[ProviderId],
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        if preference.is_empty() {
            return Err(ProviderError::EmptyChain);
        }

        let start = Instant::now();
        let mut failures = Vec::new();
        let mut attempts = 0;

        for &provider_id in preference {
            let Some(provider) = self.providers.get(&provider_id) else {
                tracing::warn!(provider = %provider_id, "Provider not configured, falling back");
                failures.push(AttemptFailure {
                    provider_id,
                    failure: ProviderFailure::NotConfigured,
                });
                continue;
            };

            for retry in 0..=self.config.retries_per_provider {
                if retry > 0 {
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                attempts += 1;

                match Self::attempt(provider.as_ref(), prompt, timeout).await {
                    Ok(text) => {
                        let latency = start.elapsed();
                        tracing::info!(
                            provider = %provider_id,
                            attempts,
                            latency_ms = latency.as_millis() as u64,
                            response_len = text.len(),
                            "Provider served request"
                        );
                        return Ok(ProviderResponse {
                            provider_id,
                            text,
                            latency,
                            attempts,
                        });
                    }
                    Err(failure) => {
                        tracing::warn!(
                            provider = %provider_id,
                            retry,
                            error = %failure,
                            "Provider attempt failed"
                        );
                        let transient = failure.is_transient();
                        failures.push(AttemptFailure {
                            provider_id,
                            failure,
                        });
                        if !transient {
                            break;
                        }
                    }
                }
            }
        }

        tracing::error!(
            attempted = failures.len(),
            "Provider fallback chain exhausted"
        );
        Err(ProviderError::AllUnavailable { attempts: failures })
    }

    async fn attempt(
        provider: &dyn LlmProvider,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, ProviderFailure> {
        match tokio::time::timeout(timeout, provider.complete(prompt)).await {
            Ok(Ok(text)) if text.trim().is_empty() => {
                Err(ProviderFailure::Malformed("empty response".to_string()))
            }
            Ok(result) => result,
            Err(_) => Err(ProviderFailure::Timeout(timeout)),
        }
    }
}
