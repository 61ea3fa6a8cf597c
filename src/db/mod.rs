pub mod cache;
pub mod memory;
pub mod outcome_log;
pub mod redis;

pub use cache::{normalize_text, CacheEntry, Fingerprint, ResponseCache, CACHE_FORMAT_VERSION};
pub use memory::InMemoryCache;
pub use outcome_log::{InMemoryOutcomeLog, OutcomeLog};
pub use redis::{create_redis_client, RedisCache};
