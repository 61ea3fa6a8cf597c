use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use redis::Client;
use tokio::sync::mpsc;

use crate::db::cache::{CacheEntry, Fingerprint, ResponseCache, CACHE_FORMAT_VERSION};
use crate::error::CacheError;
use crate::models::RecommendationResult;

/// Redis key for a fingerprint. The format version is part of the key so a
/// layout change never reads old entries.
pub fn cache_key(fingerprint: &Fingerprint) -> String {
    format!("synthscribe:rec:v{}:{}", CACHE_FORMAT_VERSION, fingerprint)
}

/// Creates a Redis client for caching
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl_secs: u64,
}

/// Shared response cache backed by Redis
///
/// Lets several processes share cached results. Reads go straight to Redis;
/// writes are queued to a background task so they never hold up a response.
#[derive(Clone)]
pub struct RedisCache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    /// Signals the writer task to flush pending writes and stop
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl RedisCache {
    /// Creates the cache and spawns its background writer
    pub async fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            redis_client,
            write_tx,
        };

        (cache, CacheWriterHandle { shutdown_tx })
    }

    /// Drains queued writes until shutdown, then flushes what is left
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(&client, msg).await {
                        tracing::error!(error = %e, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Cache writer shutting down, flushing remaining writes");

                    write_rx.close();
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        }
                    }

                    tracing::info!("Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn write_to_redis(client: &Client, msg: CacheWriteMessage) -> Result<(), CacheError> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(msg.key, msg.value, msg.ttl_secs).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ResponseCache for RedisCache {
    async fn get(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<RecommendationResult>, CacheError> {
        let key = cache_key(fingerprint);
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(&key).await?;

        let Some(json) = cached else {
            return Ok(None);
        };

        let entry: CacheEntry = serde_json::from_str(&json)?;
        match entry.into_live_result(Utc::now()) {
            Err(err @ CacheError::VersionMismatch { .. }) => {
                let _: Result<(), _> = conn.del(&key).await;
                Err(err)
            }
            other => other,
        }
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        result: &RecommendationResult,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(fingerprint.clone(), result.clone(), ttl);
        let value = serde_json::to_string(&entry)?;

        // SET EX takes whole seconds; never round a live entry down to zero
        let ttl_secs = ttl.as_secs().max(1);

        let msg = CacheWriteMessage {
            key: cache_key(fingerprint),
            value,
            ttl_secs,
        };

        if let Err(e) = self.write_tx.send(msg) {
            tracing::error!(error = %e, "Failed to send cache write message");
        }
        Ok(())
    }

    async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(cache_key(fingerprint)).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// Tests below need a live Redis at REDIS_URL; run with `--ignored`

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::cache::tests::sample_result;
    use crate::models::{ProviderId, VariantId};

    fn fingerprint(text: &str) -> Fingerprint {
        Fingerprint::compute(text, &VariantId::new("few_shot"), ProviderId::Local, "")
    }

    async fn create_test_cache() -> (RedisCache, CacheWriterHandle) {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let client = create_redis_client(&redis_url).unwrap();
        RedisCache::new(client).await
    }

    #[test]
    fn test_cache_key_is_versioned() {
        let fp = fingerprint("rainy day");
        assert_eq!(
            cache_key(&fp),
            format!("synthscribe:rec:v{}:{}", CACHE_FORMAT_VERSION, fp)
        );
    }

    #[tokio::test]
    #[ignore]
    async fn test_cache_miss() {
        let (cache, _handle) = create_test_cache().await;
        let retrieved = cache.get(&fingerprint("nonexistent_key_12345")).await.unwrap();
        assert_eq!(retrieved, None);
    }

    #[tokio::test]
    #[ignore]
    async fn test_put_writes_in_background() {
        let (cache, _handle) = create_test_cache().await;
        let fp = fingerprint("test_async_write");
        let result = sample_result();

        cache.put(&fp, &result, Duration::from_secs(60)).await.unwrap();

        // Give the background task time to process
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(cache.get(&fp).await.unwrap(), Some(result));
        cache.invalidate(&fp).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_cache_writer_graceful_shutdown() {
        let (cache, handle) = create_test_cache().await;
        let fp = fingerprint("test_shutdown");
        let result = sample_result();

        cache.put(&fp, &result, Duration::from_secs(60)).await.unwrap();
        handle.shutdown().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.get(&fp).await.unwrap(), Some(result));
        cache.invalidate(&fp).await.unwrap();
    }
}
