use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{ExperimentId, ProviderId, VariantId};
use crate::error::ExperimentError;

/// Tolerance for variant weights summing to 1.0
pub const WEIGHT_EPSILON: f64 = 1e-6;

const DEFAULT_MIN_SAMPLE_SIZE: usize = 100;
const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Active,
    Concluded,
}

/// One alternative under test: a prompt template and an optional provider order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub weight: f64,
    pub prompt_template: String,
    /// Overrides the configured fallback chain when set
    #[serde(default)]
    pub providers: Option<Vec<ProviderId>>,
}

impl Variant {
    pub fn new(id: impl Into<String>, weight: f64, prompt_template: impl Into<String>) -> Self {
        Self {
            id: VariantId::new(id),
            weight,
            prompt_template: prompt_template.into(),
            providers: None,
        }
    }

    pub fn with_providers(mut self, providers: Vec<ProviderId>) -> Self {
        self.providers = Some(providers);
        self
    }
}

/// An A/B experiment over prompt/provider variants
///
/// Deserialization goes through [`ExperimentDef`], so a stored or
/// hand-written definition is validated exactly like `Experiment::new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ExperimentDef")]
pub struct Experiment {
    pub id: ExperimentId,
    pub description: String,
    variants: Vec<Variant>,
    pub created_at: DateTime<Utc>,
    status: ExperimentStatus,
    pub min_sample_size: usize,
    pub confidence_level: f64,
}

impl Experiment {
    /// Builds an active experiment, rejecting variant sets that cannot be assigned
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        variants: Vec<Variant>,
    ) -> Result<Self, ExperimentError> {
        let id = ExperimentId::new(id);

        if variants.is_empty() {
            return Err(ExperimentError::NoVariants(id.to_string()));
        }

        let mut seen = HashSet::new();
        for variant in &variants {
            if !seen.insert(&variant.id) {
                return Err(ExperimentError::DuplicateVariant {
                    experiment: id.to_string(),
                    variant: variant.id.to_string(),
                });
            }
        }

        let sum: f64 = variants.iter().map(|v| v.weight).sum();
        let negative = variants.iter().any(|v| v.weight < 0.0 || !v.weight.is_finite());
        if negative || (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(ExperimentError::InvalidWeights {
                experiment: id.to_string(),
                sum,
            });
        }

        Ok(Self {
            id,
            description: description.into(),
            variants,
            created_at: Utc::now(),
            status: ExperimentStatus::Active,
            min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
        })
    }

    pub fn with_min_sample_size(mut self, min_sample_size: usize) -> Self {
        self.min_sample_size = min_sample_size;
        self
    }

    pub fn with_confidence_level(mut self, confidence_level: f64) -> Self {
        self.confidence_level = confidence_level;
        self
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variant(&self, id: &VariantId) -> Option<&Variant> {
        self.variants.iter().find(|v| &v.id == id)
    }

    pub fn status(&self) -> ExperimentStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == ExperimentStatus::Active
    }

    /// Administrative transition to `Concluded`. Idempotent.
    pub fn conclude(&mut self) {
        self.status = ExperimentStatus::Concluded;
    }
}

/// Wire form of an [`Experiment`], unchecked until converted
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentDef {
    pub id: ExperimentId,
    #[serde(default)]
    pub description: String,
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default = "default_status")]
    pub status: ExperimentStatus,
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: usize,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
}

fn default_status() -> ExperimentStatus {
    ExperimentStatus::Active
}

fn default_min_sample_size() -> usize {
    DEFAULT_MIN_SAMPLE_SIZE
}

fn default_confidence_level() -> f64 {
    DEFAULT_CONFIDENCE_LEVEL
}

impl TryFrom<ExperimentDef> for Experiment {
    type Error = ExperimentError;

    fn try_from(def: ExperimentDef) -> Result<Self, Self::Error> {
        let mut experiment = Experiment::new(def.id.to_string(), def.description, def.variants)?
            .with_min_sample_size(def.min_sample_size)
            .with_confidence_level(def.confidence_level);
        if let Some(created_at) = def.created_at {
            experiment.created_at = created_at;
        }
        if def.status == ExperimentStatus::Concluded {
            experiment.conclude();
        }
        Ok(experiment)
    }
}

/// Observed result of one trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Outcome {
    Binary(bool),
    /// Continuous quality signal, e.g. a feedback score
    Continuous(f64),
}

impl Outcome {
    pub fn value(&self) -> f64 {
        match self {
            Outcome::Binary(true) => 1.0,
            Outcome::Binary(false) => 0.0,
            Outcome::Continuous(v) => *v,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Outcome::Binary(_))
    }
}

/// Append-only record of one trial's outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub experiment_id: ExperimentId,
    pub variant_id: VariantId,
    pub user_id: String,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(
        experiment_id: ExperimentId,
        variant_id: VariantId,
        user_id: impl Into<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            experiment_id,
            variant_id,
            user_id: user_id.into(),
            outcome,
            timestamp: Utc::now(),
        }
    }
}
