/// Scripted provider
///
/// Deterministic backend that plays back a fixed sequence of behaviours. Used
/// by tests and by the demo binary, which ships without vendor clients.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{error::ProviderFailure, models::ProviderId, services::providers::LlmProvider};

/// Canned answer in the block format the prompts ask for
pub const DEMO_RESPONSE: &str = "\
- Genre: Lofi Hip Hop
  Artists: Nujabes, J Dilla
  Album: Modal Soul
  Note: Warm, unhurried beats that keep you company without stealing focus.

- Genre: Ambient
  Artists: Brian Eno
  Album: Music for Airports
  Note: Slow, spacious loops for settling a busy mind.

- Genre: Neo-Soul
  Artists: D'Angelo, Erykah Badu
  Album: Voodoo
  Note: Loose grooves with plenty of room to breathe.

- Genre: Modal Jazz
  Artists: Miles Davis, Bill Evans
  Album: Kind of Blue
  Note: Late-night classic with a calm, even pulse.
";

/// One scripted call
#[derive(Debug, Clone)]
pub enum Script {
    Respond(String),
    Fail(ProviderFailure),
    /// Never completes; exercises the gateway timeout
    Hang,
}

/// Replays `steps` in order, repeating the last one once exhausted
pub struct ScriptedProvider {
    id: ProviderId,
    steps: Vec<Script>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(id: ProviderId, steps: Vec<Script>) -> Self {
        Self {
            id,
            steps,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn responding(id: ProviderId, text: impl Into<String>) -> Self {
        Self::new(id, vec![Script::Respond(text.into())])
    }

    pub fn failing(id: ProviderId, failure: ProviderFailure) -> Self {
        Self::new(id, vec![Script::Fail(failure)])
    }

    pub fn hanging(id: ProviderId) -> Self {
        Self::new(id, vec![Script::Hang])
    }

    /// Always answers with `DEMO_RESPONSE`
    pub fn demo(id: ProviderId) -> Self {
        Self::responding(id, DEMO_RESPONSE)
    }

    /// Number of `complete` calls received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, oldest first
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let step = self
            .steps
            .get(call)
            .or_else(|| self.steps.last())
            .cloned()
            .unwrap_or(Script::Fail(ProviderFailure::Unavailable(
                "no scripted response".to_string(),
            )));

        match step {
            Script::Respond(text) => Ok(text),
            Script::Fail(failure) => Err(failure),
            Script::Hang => std::future::pending().await,
        }
    }
}
