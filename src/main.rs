use std::sync::Arc;

use synthscribe::{
    db::{create_redis_client, InMemoryCache, RedisCache, ResponseCache},
    models::ProviderId,
    services::ScriptedProvider,
    Config, RecommendationEngine,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// One-shot demo: `synthscribe "<mood>" [user_id]`
///
/// Ships without vendor clients, so a scripted provider answers under the
/// `mock` id at the end of the configured chain.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "synthscribe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env()?;
    if !config.provider_order.contains(&ProviderId::Mock) {
        config.provider_order.push(ProviderId::Mock);
    }

    let mut args = std::env::args().skip(1);
    let mood = args
        .next()
        .unwrap_or_else(|| "coding late at night".to_string());
    let user_id = args.next();

    let mut writer = None;
    let cache: Arc<dyn ResponseCache> = match config.redis_url.as_deref() {
        Some(url) => {
            let (cache, handle) = RedisCache::new(create_redis_client(url)?).await;
            writer = Some(handle);
            Arc::new(cache)
        }
        None => Arc::new(InMemoryCache::bounded(config.cache_max_entries)),
    };

    let engine = RecommendationEngine::builder(config)
        .provider(Arc::new(ScriptedProvider::demo(ProviderId::Mock)))
        .cache(cache)
        .build()
        .await?;

    let result = engine.recommend_text(&mood, user_id.as_deref(), None).await;

    if let Some(writer) = writer {
        writer.shutdown().await;
    }

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
