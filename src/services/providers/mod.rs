/// LLM provider abstraction
///
/// Every backend (local model server, hosted APIs) sits behind one capability:
/// turn a prompt into raw text or fail. Which backends exist is a closed set
/// (`ProviderId`); timeouts, retries and fallback live in the gateway, not here.
use crate::{error::ProviderFailure, models::ProviderId};

pub mod scripted;

pub use scripted::{Script, ScriptedProvider};

/// Trait for LLM backends
///
/// Implementations should map vendor errors onto `ProviderFailure` so the
/// gateway can decide whether to retry or fall back.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Which backend this is
    fn id(&self) -> ProviderId;

    /// Generate a completion for the prompt
    ///
    /// May take arbitrarily long; the gateway bounds it with a timeout and
    /// drops the future when that expires.
    async fn complete(&self, prompt: &str) -> Result<String, ProviderFailure>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str {
        self.id().as_str()
    }
}
