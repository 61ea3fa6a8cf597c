use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;

use crate::{
    config::Config,
    db::{Fingerprint, InMemoryCache, InMemoryOutcomeLog, OutcomeLog, ResponseCache},
    error::{EngineResult, ExperimentError, ParseError, RecommendationError},
    models::{
        Experiment, ExperimentId, Outcome, OutcomeRecord, Provenance, ProviderId,
        RecommendationRequest, RecommendationResult, Shortfall, Variant, VariantId,
    },
    services::{
        experiments::ExperimentEngine,
        gateway::{GatewayConfig, ProviderGateway},
        history::{HistoryProvider, NoHistory},
        parser,
        prompts,
        providers::LlmProvider,
        telemetry::{RequestId, TelemetryEvent, TelemetrySink, TracingTelemetry},
    },
};

/// Assignment key for requests without a user id
pub const ANONYMOUS_USER: &str = "anonymous";

/// Composes assignment, caching, provider calls, parsing and outcome recording
/// into one request/response cycle
///
/// Holds no per-request state; one engine serves concurrent calls.
pub struct RecommendationEngine {
    config: Config,
    experiment_id: ExperimentId,
    gateway: ProviderGateway,
    cache: Option<Arc<dyn ResponseCache>>,
    experiments: Arc<ExperimentEngine>,
    history: Arc<dyn HistoryProvider>,
    telemetry: Arc<dyn TelemetrySink>,
}

/// Builder for [`RecommendationEngine`]
pub struct RecommendationEngineBuilder {
    config: Config,
    providers: Vec<Arc<dyn LlmProvider>>,
    cache: Option<Arc<dyn ResponseCache>>,
    history: Option<Arc<dyn HistoryProvider>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    experiments: Vec<Experiment>,
    outcome_log: Option<Arc<dyn OutcomeLog>>,
}

impl RecommendationEngineBuilder {
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Overrides the default in-memory cache. Ignored when caching is disabled.
    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn history(mut self, history: Arc<dyn HistoryProvider>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Registers an experiment. Without any, the built-in prompt experiment is used.
    pub fn experiment(mut self, experiment: Experiment) -> Self {
        self.experiments.push(experiment);
        self
    }

    pub fn outcome_log(mut self, outcome_log: Arc<dyn OutcomeLog>) -> Self {
        self.outcome_log = Some(outcome_log);
        self
    }

    /// Fails when the configured experiment id is not among the registered ones
    pub async fn build(self) -> Result<RecommendationEngine, ExperimentError> {
        let config = self.config;

        let mut gateway = ProviderGateway::new(GatewayConfig::from(&config));
        for provider in self.providers {
            gateway.register(provider);
        }

        let cache = if config.cache_enabled {
            Some(self.cache.unwrap_or_else(|| {
                Arc::new(InMemoryCache::bounded(config.cache_max_entries)) as Arc<dyn ResponseCache>
            }))
        } else {
            None
        };

        let mut experiments = self.experiments;
        if experiments.is_empty() {
            experiments.push(
                prompts::default_experiment()?
                    .with_min_sample_size(config.min_sample_size)
                    .with_confidence_level(config.confidence_level),
            );
        }

        let outcome_log = self
            .outcome_log
            .unwrap_or_else(|| Arc::new(InMemoryOutcomeLog::new()));
        let engine = Arc::new(ExperimentEngine::new(outcome_log));
        for experiment in experiments {
            engine.register(experiment).await;
        }

        let experiment_id = ExperimentId::new(config.experiment_id.clone());
        engine.experiment(&experiment_id).await?;

        tracing::info!(
            experiment = %experiment_id,
            cache = cache.as_ref().map(|c| c.name()).unwrap_or("disabled"),
            providers = ?config.provider_order,
            "Recommendation engine ready"
        );

        Ok(RecommendationEngine {
            config,
            experiment_id,
            gateway,
            cache,
            experiments: engine,
            history: self.history.unwrap_or_else(|| Arc::new(NoHistory)),
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(TracingTelemetry)),
        })
    }
}

impl RecommendationEngine {
    pub fn builder(config: Config) -> RecommendationEngineBuilder {
        RecommendationEngineBuilder {
            config,
            providers: Vec::new(),
            cache: None,
            history: None,
            telemetry: None,
            experiments: Vec::new(),
            outcome_log: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Experiment every request is assigned through
    pub fn experiment_id(&self) -> &ExperimentId {
        &self.experiment_id
    }

    /// Engine for `summarize`, `significance`, `conclude` and `report`
    pub fn experiments(&self) -> &ExperimentEngine {
        &self.experiments
    }

    /// Inbound form: raw text, optional user, count defaulting to configuration
    pub async fn recommend_text(
        &self,
        raw_text: &str,
        user_id: Option<&str>,
        requested_count: Option<usize>,
    ) -> EngineResult<RecommendationResult> {
        let mut request = RecommendationRequest::new(raw_text)
            .with_count(requested_count.unwrap_or(self.config.default_count));
        if let Some(user_id) = user_id {
            request = request.with_user(user_id);
        }
        self.recommend(request).await
    }

    /// Produces recommendations for one request
    ///
    /// Invalid requests fail before anything else runs. A cache hit is
    /// returned without calling a provider or recording an outcome.
    pub async fn recommend(
        &self,
        request: RecommendationRequest,
    ) -> EngineResult<RecommendationResult> {
        request.validate()?;

        let request_id = RequestId::new();
        let span = tracing::info_span!("recommend", request_id = %request_id);
        self.run(request, request_id).instrument(span).await
    }

    async fn run(
        &self,
        request: RecommendationRequest,
        request_id: RequestId,
    ) -> EngineResult<RecommendationResult> {
        let start = Instant::now();
        let count = request.requested_count();
        let user = request.user_id().unwrap_or(ANONYMOUS_USER);

        self.telemetry.emit(&TelemetryEvent::RequestReceived {
            request_id,
            user_id: request.user_id().map(str::to_string),
            requested_count: count,
        });

        let variant_id = self.experiments.assign(&self.experiment_id, user).await?;
        let variant = self
            .experiments
            .variant(&self.experiment_id, &variant_id)
            .await?;
        let chain = self.provider_chain(&variant);

        let context = self.user_context(request.user_id()).await;
        let key_context = fingerprint_context(count, &context);

        if let Some(mut cached) = self
            .cache_lookup(request.raw_text(), &variant_id, &chain, &key_context)
            .await
        {
            cached.provenance.request_id = request_id.as_uuid();
            cached.provenance.cache_hit = true;
            cached.provenance.latency_ms = millis(start.elapsed());

            tracing::info!(
                variant = %variant_id,
                provider = %cached.provenance.provider_id,
                "Serving cached recommendations"
            );
            self.telemetry.emit(&TelemetryEvent::CacheHit {
                request_id,
                variant_id,
                provider_id: cached.provenance.provider_id,
            });
            return Ok(cached);
        }

        self.telemetry.emit(&TelemetryEvent::CacheMiss {
            request_id,
            variant_id: variant_id.clone(),
        });

        let prompt = prompts::render(&variant.prompt_template, request.raw_text(), &context, count);
        let response = self
            .gateway
            .invoke(&prompt, &chain, self.gateway.default_timeout())
            .await?;

        self.telemetry.emit(&TelemetryEvent::ProviderUsed {
            request_id,
            provider_id: response.provider_id,
            attempts: response.attempts,
            latency_ms: millis(response.latency),
        });

        let parsed = match parser::parse(&response.text, count) {
            Ok(parsed) => parsed,
            Err(ParseError::Empty { discarded }) => {
                tracing::warn!(
                    provider = %response.provider_id,
                    variant = %variant_id,
                    discarded,
                    "Model output contained no usable recommendations"
                );
                self.record_trial(request_id, &variant_id, user, false).await?;
                return Err(RecommendationError::NoResults {
                    provider_id: response.provider_id,
                    parse_losses: discarded,
                });
            }
        };

        let parse_losses = parsed.losses();
        let mut items = parsed.items;
        items.truncate(count);

        let shortfall = (items.len() < count).then(|| Shortfall {
            requested: count,
            delivered: items.len(),
        });
        if shortfall.is_some() {
            tracing::warn!(
                requested = count,
                delivered = items.len(),
                parse_losses,
                "Returning fewer recommendations than requested"
            );
            self.telemetry.emit(&TelemetryEvent::ParseShortfall {
                request_id,
                requested: count,
                delivered: items.len(),
                parse_losses,
            });
        }

        let met_count = shortfall.is_none();
        let result = RecommendationResult {
            items,
            provenance: Provenance {
                request_id: request_id.as_uuid(),
                provider_id: response.provider_id,
                variant_id: variant_id.clone(),
                cache_hit: false,
                latency_ms: millis(start.elapsed()),
                shortfall,
                parse_losses,
            },
        };

        self.cache_store(
            request.raw_text(),
            &variant_id,
            response.provider_id,
            &key_context,
            &result,
        )
        .await;

        self.record_trial(request_id, &variant_id, user, met_count).await?;

        Ok(result)
    }

    fn provider_chain(&self, variant: &Variant) -> Vec<ProviderId> {
        variant
            .providers
            .clone()
            .unwrap_or_else(|| self.config.provider_order.clone())
    }

    /// Prompt context from the user's history; empty when there is none or it fails
    async fn user_context(&self, user_id: Option<&str>) -> String {
        let Some(user_id) = user_id else {
            return String::new();
        };

        match self.history.get_user_history(user_id).await {
            Ok(history) => prompts::history_context(&history),
            Err(e) => {
                tracing::warn!(error = %e, "History lookup failed, continuing without context");
                String::new()
            }
        }
    }

    /// First live entry along the provider chain. Cache errors count as misses.
    async fn cache_lookup(
        &self,
        raw_text: &str,
        variant_id: &VariantId,
        chain: &[ProviderId],
        key_context: &str,
    ) -> Option<RecommendationResult> {
        let cache = self.cache.as_ref()?;

        for &provider_id in chain {
            let fingerprint = Fingerprint::compute(raw_text, variant_id, provider_id, key_context);
            match cache.get(&fingerprint).await {
                Ok(Some(result)) => return Some(result),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        cache = cache.name(),
                        provider = %provider_id,
                        error = %e,
                        "Cache lookup failed, treating as miss"
                    );
                }
            }
        }

        None
    }

    async fn cache_store(
        &self,
        raw_text: &str,
        variant_id: &VariantId,
        provider_id: ProviderId,
        key_context: &str,
        result: &RecommendationResult,
    ) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };

        let fingerprint = Fingerprint::compute(raw_text, variant_id, provider_id, key_context);
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if let Err(e) = cache.put(&fingerprint, result, ttl).await {
            tracing::warn!(cache = cache.name(), error = %e, "Cache write failed");
        }
    }

    /// Records a fresh trial. A concluded experiment just stops collecting.
    async fn record_trial(
        &self,
        request_id: RequestId,
        variant_id: &VariantId,
        user: &str,
        success: bool,
    ) -> Result<(), ExperimentError> {
        let record = OutcomeRecord::new(
            self.experiment_id.clone(),
            variant_id.clone(),
            user,
            Outcome::Binary(success),
        );

        match self.experiments.record(record).await {
            Ok(()) => {
                self.telemetry.emit(&TelemetryEvent::OutcomeRecorded {
                    request_id,
                    variant_id: variant_id.clone(),
                    success,
                });
                Ok(())
            }
            Err(ExperimentError::Concluded(experiment)) => {
                tracing::debug!(%experiment, "Experiment concluded, outcome not recorded");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// The requested count changes the prompt, so it is part of the cache identity
fn fingerprint_context(count: usize, context: &str) -> String {
    format!("count={};{}", count, context)
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::ScriptedProvider;

    fn config() -> Config {
        Config {
            provider_order: vec![ProviderId::Mock],
            ..Config::default()
        }
    }

    #[test]
    fn test_fingerprint_context_includes_count() {
        assert_ne!(fingerprint_context(3, ""), fingerprint_context(4, ""));
        assert_ne!(fingerprint_context(4, ""), fingerprint_context(4, "likes jazz"));
    }

    #[tokio::test]
    async fn test_build_registers_default_experiment() {
        let engine = RecommendationEngine::builder(config())
            .provider(Arc::new(ScriptedProvider::demo(ProviderId::Mock)))
            .build()
            .await
            .unwrap();

        let experiment = engine
            .experiments()
            .experiment(engine.experiment_id())
            .await
            .unwrap();
        assert_eq!(experiment.id.as_str(), prompts::DEFAULT_EXPERIMENT_ID);
        assert_eq!(experiment.min_sample_size, 100);
    }

    #[tokio::test]
    async fn test_build_rejects_unknown_experiment_id() {
        let config = Config {
            experiment_id: "missing".to_string(),
            ..config()
        };
        let err = RecommendationEngine::builder(config).build().await.err();
        assert_eq!(
            err,
            Some(ExperimentError::UnknownExperiment("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_variant_provider_override() {
        let variant = Variant::new("only", 1.0, "{description}")
            .with_providers(vec![ProviderId::Anthropic]);
        let experiment = Experiment::new("prompt_optimization", "override", vec![variant.clone()])
            .unwrap();
        let engine = RecommendationEngine::builder(config())
            .experiment(experiment)
            .build()
            .await
            .unwrap();

        assert_eq!(engine.provider_chain(&variant), vec![ProviderId::Anthropic]);
        let plain = Variant::new("plain", 1.0, "{description}");
        assert_eq!(engine.provider_chain(&plain), vec![ProviderId::Mock]);
    }
}
