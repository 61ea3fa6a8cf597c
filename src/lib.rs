//! Recommendation orchestration over unreliable LLM backends.
//!
//! A request is assigned to an experiment variant, looked up in a
//! variant-aware response cache, sent down a provider fallback chain on a
//! miss, parsed into validated items and recorded as an experiment outcome.
//! [`RecommendationEngine`] is the entry point.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{EngineResult, RecommendationError};
pub use models::{
    ExperimentId, ProviderId, RecommendationItem, RecommendationRequest, RecommendationResult,
    VariantId,
};
pub use services::{RecommendationEngine, RecommendationEngineBuilder};
