pub mod experiments;
pub mod gateway;
pub mod history;
pub mod parser;
pub mod prompts;
pub mod providers;
pub mod recommendations;
pub mod stats;
pub mod telemetry;

pub use experiments::{
    ExperimentEngine, ExperimentReport, SignificanceReport, SignificanceStatus, TestKind,
    VariantSummary,
};
pub use gateway::{GatewayConfig, ProviderGateway, ProviderResponse};
pub use history::{HistoryProvider, InMemoryHistory, NoHistory};
pub use parser::{parse, ParseOutcome};
pub use providers::{LlmProvider, Script, ScriptedProvider};
pub use recommendations::{RecommendationEngine, RecommendationEngineBuilder};
pub use telemetry::{RecordingTelemetry, RequestId, TelemetryEvent, TelemetrySink, TracingTelemetry};
