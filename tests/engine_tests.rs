use std::sync::Arc;

use synthscribe::{
    db::InMemoryCache,
    error::{ProviderError, ProviderFailure, RecommendationError, ValidationError},
    models::{Experiment, HistoryEntry, RecommendationItem, Variant},
    services::{
        experiments::assign_variant, prompts, InMemoryHistory, RecordingTelemetry,
        ScriptedProvider,
    },
    Config, ProviderId, RecommendationEngine, RecommendationRequest, VariantId,
};
use tokio_test::{assert_err, assert_ok};

const TWO_BLOCKS: &str = "\
- Genre: Shoegaze
  Artists: Slowdive, My Bloody Valentine
  Album: Souvlaki
  Note: Washed-out guitars for drifting

- Genre: Dream Pop
  Artists: Beach House
  Album: Teen Dream
  Note: Hazy and warm
";

fn test_config() -> Config {
    Config {
        provider_order: vec![ProviderId::Mock],
        provider_timeout_secs: 1,
        retry_delay_ms: 1,
        ..Config::default()
    }
}

fn single_variant_experiment() -> Experiment {
    Experiment::new(
        prompts::DEFAULT_EXPERIMENT_ID,
        "single variant",
        vec![Variant::new("zero_shot", 1.0, prompts::ZERO_SHOT)],
    )
    .unwrap()
}

struct Harness {
    engine: RecommendationEngine,
    provider: Arc<ScriptedProvider>,
    telemetry: Arc<RecordingTelemetry>,
}

async fn create_test_engine(provider: ScriptedProvider) -> Harness {
    create_test_engine_with(test_config(), provider).await
}

async fn create_test_engine_with(config: Config, provider: ScriptedProvider) -> Harness {
    let provider = Arc::new(provider);
    let telemetry = Arc::new(RecordingTelemetry::new());
    let engine = RecommendationEngine::builder(config)
        .provider(provider.clone())
        .telemetry(telemetry.clone())
        .experiment(single_variant_experiment())
        .build()
        .await
        .unwrap();

    Harness {
        engine,
        provider,
        telemetry,
    }
}

async fn outcome_count(engine: &RecommendationEngine) -> usize {
    engine
        .experiments()
        .summarize(engine.experiment_id())
        .await
        .unwrap()
        .values()
        .map(|s| s.count)
        .sum()
}

#[tokio::test]
async fn test_recommend_returns_requested_items() {
    let h = create_test_engine(ScriptedProvider::demo(ProviderId::Mock)).await;

    let result = assert_ok!(
        h.engine
            .recommend(RecommendationRequest::new("coding late at night").with_user("alice"))
            .await
    );

    assert_eq!(result.items.len(), 4);
    assert_eq!(result.items[0].genre, "Lofi Hip Hop");
    assert!(result.items.iter().all(RecommendationItem::is_valid));
    assert_eq!(result.provenance.provider_id, ProviderId::Mock);
    assert_eq!(result.provenance.variant_id, VariantId::new("zero_shot"));
    assert!(!result.provenance.cache_hit);
    assert!(!result.is_shortfall());

    assert_eq!(
        h.telemetry.names(),
        vec![
            "request_received",
            "cache_miss",
            "provider_used",
            "outcome_recorded"
        ]
    );
    assert_eq!(outcome_count(&h.engine).await, 1);
}

#[tokio::test]
async fn test_prompt_is_built_from_variant_template() {
    let h = create_test_engine(ScriptedProvider::demo(ProviderId::Mock)).await;
    h.engine
        .recommend(RecommendationRequest::new("rainy sunday").with_count(3))
        .await
        .unwrap();

    let prompts = h.provider.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(r#"Suggest 3 music genres/artists for: "rainy sunday""#));
}

#[tokio::test]
async fn test_cache_hit_skips_provider_and_outcome() {
    let h = create_test_engine(ScriptedProvider::demo(ProviderId::Mock)).await;
    let request = || RecommendationRequest::new("Morning Workout").with_user("bob");

    let first = h.engine.recommend(request()).await.unwrap();
    let second = h.engine.recommend(request()).await.unwrap();

    assert!(!first.provenance.cache_hit);
    assert!(second.provenance.cache_hit);
    assert_eq!(first.items, second.items);
    assert_ne!(first.provenance.request_id, second.provenance.request_id);
    assert_eq!(h.provider.calls(), 1);

    // A cache hit is not a trial
    assert_eq!(outcome_count(&h.engine).await, 1);
    assert!(h.telemetry.names().contains(&"cache_hit"));
}

#[tokio::test]
async fn test_cache_ignores_case_and_spacing() {
    let h = create_test_engine(ScriptedProvider::demo(ProviderId::Mock)).await;

    h.engine.recommend_text("Deep  Focus", None, None).await.unwrap();
    let again = h.engine.recommend_text("deep focus ", None, None).await.unwrap();

    assert!(again.provenance.cache_hit);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn test_different_count_is_a_cache_miss() {
    let h = create_test_engine(ScriptedProvider::demo(ProviderId::Mock)).await;

    h.engine.recommend_text("cooking dinner", None, Some(4)).await.unwrap();
    let fewer = h.engine.recommend_text("cooking dinner", None, Some(2)).await.unwrap();

    assert!(!fewer.provenance.cache_hit);
    assert_eq!(fewer.items.len(), 2);
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test]
async fn test_variants_never_share_cache_entries() {
    let experiment = Experiment::new(
        prompts::DEFAULT_EXPERIMENT_ID,
        "two variants",
        vec![
            Variant::new("zero_shot", 0.5, prompts::ZERO_SHOT),
            Variant::new("few_shot", 0.5, prompts::FEW_SHOT),
        ],
    )
    .unwrap();

    // One user per variant
    let user_for = |variant: &str| {
        (0..1000)
            .map(|i| format!("user-{}", i))
            .find(|user| assign_variant(&experiment, user).unwrap().id.as_str() == variant)
            .unwrap()
    };
    let (zero_user, few_user) = (user_for("zero_shot"), user_for("few_shot"));

    let provider = Arc::new(ScriptedProvider::demo(ProviderId::Mock));
    let engine = RecommendationEngine::builder(test_config())
        .provider(provider.clone())
        .experiment(experiment.clone())
        .build()
        .await
        .unwrap();

    let a = engine
        .recommend_text("studying for exams", Some(&zero_user), None)
        .await
        .unwrap();
    let b = engine
        .recommend_text("studying for exams", Some(&few_user), None)
        .await
        .unwrap();

    assert_eq!(a.provenance.variant_id, VariantId::new("zero_shot"));
    assert_eq!(b.provenance.variant_id, VariantId::new("few_shot"));
    assert!(!b.provenance.cache_hit);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_fallback_provider_is_recorded_in_provenance() {
    let local = Arc::new(ScriptedProvider::failing(
        ProviderId::Local,
        ProviderFailure::Unavailable("connection refused".to_string()),
    ));
    let cloud = Arc::new(ScriptedProvider::demo(ProviderId::OpenAi));
    let config = Config {
        provider_order: vec![ProviderId::Local, ProviderId::OpenAi],
        ..test_config()
    };

    let engine = RecommendationEngine::builder(config)
        .provider(local.clone())
        .provider(cloud.clone())
        .experiment(single_variant_experiment())
        .build()
        .await
        .unwrap();

    let first = engine.recommend_text("weekend party", None, None).await.unwrap();
    assert_eq!(first.provenance.provider_id, ProviderId::OpenAi);

    // Cached under the serving provider and found by walking the chain
    let second = engine.recommend_text("weekend party", None, None).await.unwrap();
    assert!(second.provenance.cache_hit);
    assert_eq!(second.provenance.provider_id, ProviderId::OpenAi);
    assert_eq!(local.calls(), 1);
    assert_eq!(cloud.calls(), 1);
}

#[tokio::test]
async fn test_exhausted_chain_records_no_outcome() {
    let h = create_test_engine(ScriptedProvider::failing(
        ProviderId::Mock,
        ProviderFailure::RateLimited,
    ))
    .await;

    let err = assert_err!(h.engine.recommend_text("late night drive", None, None).await);
    match err {
        RecommendationError::Provider(ProviderError::AllUnavailable { attempts }) => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].provider_id, ProviderId::Mock);
        }
        other => panic!("expected AllUnavailable, got {:?}", other),
    }
    assert_eq!(outcome_count(&h.engine).await, 0);
}

#[tokio::test]
async fn test_unusable_output_fails_and_counts_as_failed_trial() {
    let h = create_test_engine(ScriptedProvider::responding(
        ProviderId::Mock,
        "I'm sorry, I can't help with that.",
    ))
    .await;

    let err = h
        .engine
        .recommend_text("relaxing after work", Some("carol"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RecommendationError::NoResults {
            provider_id: ProviderId::Mock,
            ..
        }
    ));
    assert!(!err.to_string().contains("sorry"));

    let summary = h
        .engine
        .experiments()
        .summarize(h.engine.experiment_id())
        .await
        .unwrap();
    let zero_shot = summary[&VariantId::new("zero_shot")];
    assert_eq!(zero_shot.count, 1);
    assert_eq!(zero_shot.mean, 0.0);

    // Nothing cached, so the next call tries again
    let _ = h.engine.recommend_text("relaxing after work", Some("carol"), None).await;
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test]
async fn test_invalid_request_fails_fast() {
    let h = create_test_engine(ScriptedProvider::demo(ProviderId::Mock)).await;

    let err = h
        .engine
        .recommend(RecommendationRequest::new("   "))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RecommendationError::Validation(ValidationError::EmptyText)
    ));

    let err = h
        .engine
        .recommend(RecommendationRequest::new("focus").with_count(0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RecommendationError::Validation(ValidationError::ZeroCount)
    ));

    assert_eq!(h.provider.calls(), 0);
    assert!(h.telemetry.events().is_empty());
    assert_eq!(outcome_count(&h.engine).await, 0);
}

#[tokio::test]
async fn test_shortfall_is_returned_and_flagged() {
    let h = create_test_engine(ScriptedProvider::responding(ProviderId::Mock, TWO_BLOCKS)).await;

    let result = h
        .engine
        .recommend_text("rainy day mood", None, Some(4))
        .await
        .unwrap();

    assert_eq!(result.items.len(), 2);
    let shortfall = result.provenance.shortfall.unwrap();
    assert_eq!((shortfall.requested, shortfall.delivered), (4, 2));
    assert!(h.telemetry.names().contains(&"parse_shortfall"));

    // Served, but below the quality bar
    let summary = h
        .engine
        .experiments()
        .summarize(h.engine.experiment_id())
        .await
        .unwrap();
    assert_eq!(summary[&VariantId::new("zero_shot")].mean, 0.0);
}

#[tokio::test]
async fn test_extra_items_are_truncated() {
    let h = create_test_engine(ScriptedProvider::demo(ProviderId::Mock)).await;

    let result = h.engine.recommend_text("cooking", None, Some(2)).await.unwrap();
    assert_eq!(result.items.len(), 2);
    assert!(!result.is_shortfall());
}

#[tokio::test]
async fn test_default_count_comes_from_config() {
    let config = Config {
        default_count: 3,
        ..test_config()
    };
    let h = create_test_engine_with(config, ScriptedProvider::demo(ProviderId::Mock)).await;

    let result = h.engine.recommend_text("gym", None, None).await.unwrap();
    assert_eq!(result.items.len(), 3);
}

#[tokio::test]
async fn test_concluded_experiment_still_serves_without_recording() {
    let h = create_test_engine(ScriptedProvider::demo(ProviderId::Mock)).await;
    h.engine
        .experiments()
        .conclude(h.engine.experiment_id())
        .await
        .unwrap();

    let result = h.engine.recommend_text("focus", Some("dave"), None).await.unwrap();
    assert_eq!(result.items.len(), 4);
    assert_eq!(outcome_count(&h.engine).await, 0);
    assert!(!h.telemetry.names().contains(&"outcome_recorded"));
}

#[tokio::test]
async fn test_user_history_enriches_prompt_and_cache_key() {
    let history = Arc::new(InMemoryHistory::new());
    history
        .add(
            "erin",
            HistoryEntry::new(
                "sunday morning",
                vec![RecommendationItem {
                    genre: "Bossa Nova".to_string(),
                    artists: vec!["João Gilberto".to_string()],
                    album: "Chega de Saudade".to_string(),
                    note: "Gentle start".to_string(),
                }],
            ),
        )
        .await;

    let provider = Arc::new(ScriptedProvider::demo(ProviderId::Mock));
    let engine = RecommendationEngine::builder(test_config())
        .provider(provider.clone())
        .history(history)
        .experiment(single_variant_experiment())
        .build()
        .await
        .unwrap();

    engine.recommend_text("breakfast", Some("erin"), None).await.unwrap();
    let prompts = provider.prompts();
    assert!(prompts[0].contains("Bossa Nova"));
    assert!(prompts[0].contains("João Gilberto"));

    // Same text without that history is a different cache entry
    let anonymous = engine.recommend_text("breakfast", None, None).await.unwrap();
    assert!(!anonymous.provenance.cache_hit);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_disabled_cache_always_calls_provider() {
    let config = Config {
        cache_enabled: false,
        ..test_config()
    };
    let h = create_test_engine_with(config, ScriptedProvider::demo(ProviderId::Mock)).await;

    h.engine.recommend_text("focus", None, None).await.unwrap();
    let again = h.engine.recommend_text("focus", None, None).await.unwrap();

    assert!(!again.provenance.cache_hit);
    assert_eq!(h.provider.calls(), 2);
    assert_eq!(outcome_count(&h.engine).await, 2);
}

#[tokio::test]
async fn test_shared_cache_instance() {
    let cache = Arc::new(InMemoryCache::new());
    let provider = Arc::new(ScriptedProvider::demo(ProviderId::Mock));

    let build = || {
        RecommendationEngine::builder(test_config())
            .provider(provider.clone())
            .cache(cache.clone())
            .experiment(single_variant_experiment())
            .build()
    };
    let first = build().await.unwrap();
    let second = build().await.unwrap();

    first.recommend_text("night bus", None, None).await.unwrap();
    let hit = second.recommend_text("night bus", None, None).await.unwrap();

    assert!(hit.provenance.cache_hit);
    assert_eq!(provider.calls(), 1);
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_concurrent_requests_record_every_trial() {
    let h = create_test_engine(ScriptedProvider::demo(ProviderId::Mock)).await;
    let engine = Arc::new(h.engine);

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .recommend_text(&format!("mood number {}", i), Some(&format!("user-{}", i)), None)
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert_eq!(h.provider.calls(), 20);
    assert_eq!(outcome_count(&engine).await, 20);
}
