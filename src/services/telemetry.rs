use std::sync::Mutex;

use serde::Serialize;
use uuid::Uuid;

use crate::models::{ProviderId, VariantId};

/// Identifies one `recommend` call across logs and telemetry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Creates a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structured events emitted during a request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    RequestReceived {
        request_id: RequestId,
        user_id: Option<String>,
        requested_count: usize,
    },
    CacheHit {
        request_id: RequestId,
        variant_id: VariantId,
        provider_id: ProviderId,
    },
    CacheMiss {
        request_id: RequestId,
        variant_id: VariantId,
    },
    ProviderUsed {
        request_id: RequestId,
        provider_id: ProviderId,
        attempts: usize,
        latency_ms: u64,
    },
    ParseShortfall {
        request_id: RequestId,
        requested: usize,
        delivered: usize,
        parse_losses: usize,
    },
    OutcomeRecorded {
        request_id: RequestId,
        variant_id: VariantId,
        success: bool,
    },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::RequestReceived { .. } => "request_received",
            TelemetryEvent::CacheHit { .. } => "cache_hit",
            TelemetryEvent::CacheMiss { .. } => "cache_miss",
            TelemetryEvent::ProviderUsed { .. } => "provider_used",
            TelemetryEvent::ParseShortfall { .. } => "parse_shortfall",
            TelemetryEvent::OutcomeRecorded { .. } => "outcome_recorded",
        }
    }
}

/// Fire-and-forget sink for telemetry events
///
/// `emit` must not block and cannot fail; a sink that loses its backend drops
/// events silently.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &TelemetryEvent);
}

/// Writes every event as a `tracing` event on the `synthscribe::telemetry` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: &TelemetryEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => tracing::info!(
                target: "synthscribe::telemetry",
                event = event.name(),
                %payload
            ),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize telemetry event"),
        }
    }
}

/// Keeps events in memory; used by tests to assert on the event stream
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of the recorded events, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(TelemetryEvent::name).collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn emit(&self, event: &TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = TelemetryEvent::CacheMiss {
            request_id: RequestId(Uuid::nil()),
            variant_id: VariantId::new("few_shot"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "cache_miss");
        assert_eq!(json["variant_id"], "few_shot");
        assert_eq!(event.name(), "cache_miss");
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingTelemetry::new();
        let request_id = RequestId::new();
        sink.emit(&TelemetryEvent::RequestReceived {
            request_id,
            user_id: None,
            requested_count: 4,
        });
        sink.emit(&TelemetryEvent::CacheMiss {
            request_id,
            variant_id: VariantId::new("zero_shot"),
        });

        assert_eq!(sink.names(), vec!["request_received", "cache_miss"]);
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        TracingTelemetry.emit(&TelemetryEvent::OutcomeRecorded {
            request_id: RequestId::new(),
            variant_id: VariantId::new("zero_shot"),
            success: true,
        });
    }
}
