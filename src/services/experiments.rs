use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::{
    db::OutcomeLog,
    error::ExperimentError,
    models::{Experiment, ExperimentId, ExperimentStatus, OutcomeRecord, Variant, VariantId},
    services::stats::{self, SampleStats},
};

/// Resolution of the assignment hash space
pub const ASSIGNMENT_BUCKETS: u64 = 1_000_000;

/// Maps a user onto `[0, ASSIGNMENT_BUCKETS)` for one experiment
///
/// SHA-256 of `experiment_id:user_id`, first 8 bytes read big-endian. The
/// experiment id is part of the input so assignments across experiments are
/// independent.
pub fn assignment_bucket(experiment_id: &ExperimentId, user_id: &str) -> u64 {
    let digest = Sha256::digest(format!("{}:{}", experiment_id, user_id).as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % ASSIGNMENT_BUCKETS
}

/// Picks the variant whose cumulative-weight range contains the user's bucket
///
/// `None` only for an experiment with no variants, which `Experiment::new`
/// never builds.
pub fn assign_variant<'a>(experiment: &'a Experiment, user_id: &str) -> Option<&'a Variant> {
    let bucket = assignment_bucket(&experiment.id, user_id);
    let variants = experiment.variants();

    let mut cumulative = 0.0;
    for variant in variants {
        cumulative += variant.weight;
        let boundary = (cumulative * ASSIGNMENT_BUCKETS as f64).round() as u64;
        if bucket < boundary {
            return Some(variant);
        }
    }

    // Weights summing to 1.0 - epsilon can leave the top buckets uncovered
    variants.last()
}

/// Aggregated outcomes for one variant
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VariantSummary {
    pub count: usize,
    pub mean: f64,
    pub variance: f64,
}

impl From<SampleStats> for VariantSummary {
    fn from(stats: SampleStats) -> Self {
        Self {
            count: stats.count,
            mean: stats.mean,
            variance: stats.variance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    TwoProportionZ,
    WelchT,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceStatus {
    Evaluated(TestKind),
    /// At least one variant is below the experiment's minimum sample size
    InsufficientData { min_samples: usize },
}

/// Candidate compared against baseline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificanceReport {
    pub baseline: VariantId,
    pub candidate: VariantId,
    /// 1.0 when the data is insufficient
    pub p_value: f64,
    /// Candidate mean minus baseline mean
    pub effect_size: f64,
    pub status: SignificanceStatus,
}

impl SignificanceReport {
    pub fn is_evaluated(&self) -> bool {
        matches!(self.status, SignificanceStatus::Evaluated(_))
    }

    pub fn is_significant(&self, confidence_level: f64) -> bool {
        self.is_evaluated() && self.p_value < 1.0 - confidence_level
    }
}

/// Snapshot of an experiment for an external decision-maker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentReport {
    pub experiment_id: ExperimentId,
    pub status: ExperimentStatus,
    pub summaries: BTreeMap<VariantId, VariantSummary>,
    /// Every other variant against the first configured one
    pub comparisons: Vec<SignificanceReport>,
    /// Candidate with the largest significant improvement over the baseline,
    /// or the baseline when it is significantly better than every candidate
    pub winner: Option<VariantId>,
}

/// Sticky variant assignment and outcome statistics
///
/// Experiment definitions live behind a lock that is only written by
/// `register` and `conclude`; outcomes go to an append-only log.
pub struct ExperimentEngine {
    experiments: RwLock<HashMap<ExperimentId, Experiment>>,
    outcomes: Arc<dyn OutcomeLog>,
}

impl ExperimentEngine {
    pub fn new(outcomes: Arc<dyn OutcomeLog>) -> Self {
        Self {
            experiments: RwLock::new(HashMap::new()),
            outcomes,
        }
    }

    /// Adds an experiment, replacing any previous definition with the same id
    pub async fn register(&self, experiment: Experiment) {
        tracing::info!(
            experiment = %experiment.id,
            variants = experiment.variants().len(),
            "Registered experiment"
        );
        self.experiments
            .write()
            .await
            .insert(experiment.id.clone(), experiment);
    }

    pub async fn experiment(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Experiment, ExperimentError> {
        self.experiments
            .read()
            .await
            .get(experiment_id)
            .cloned()
            .ok_or_else(|| ExperimentError::UnknownExperiment(experiment_id.to_string()))
    }

    /// Deterministic variant for the user. Still resolves once concluded.
    pub async fn assign(
        &self,
        experiment_id: &ExperimentId,
        user_id: &str,
    ) -> Result<VariantId, ExperimentError> {
        let experiments = self.experiments.read().await;
        let experiment = experiments
            .get(experiment_id)
            .ok_or_else(|| ExperimentError::UnknownExperiment(experiment_id.to_string()))?;

        let variant = assign_variant(experiment, user_id)
            .ok_or_else(|| ExperimentError::NoVariants(experiment_id.to_string()))?;
        tracing::debug!(experiment = %experiment_id, variant = %variant.id, "Assigned variant");
        Ok(variant.id.clone())
    }

    pub async fn variant(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
    ) -> Result<Variant, ExperimentError> {
        let experiments = self.experiments.read().await;
        let experiment = experiments
            .get(experiment_id)
            .ok_or_else(|| ExperimentError::UnknownExperiment(experiment_id.to_string()))?;

        experiment
            .variant(variant_id)
            .cloned()
            .ok_or_else(|| ExperimentError::UnknownVariant {
                experiment: experiment_id.to_string(),
                variant: variant_id.to_string(),
            })
    }

    /// Appends an outcome
    ///
    /// Rejects unknown experiment or variant ids, non-finite values, and
    /// records for concluded experiments.
    pub async fn record(&self, record: OutcomeRecord) -> Result<(), ExperimentError> {
        // Held across the append so a concurrent `conclude` cannot slip in between
        let experiments = self.experiments.read().await;

        let experiment = experiments
            .get(&record.experiment_id)
            .filter(|e| e.variant(&record.variant_id).is_some())
            .ok_or_else(|| ExperimentError::UnknownVariant {
                experiment: record.experiment_id.to_string(),
                variant: record.variant_id.to_string(),
            })?;

        if !experiment.is_active() {
            return Err(ExperimentError::Concluded(experiment.id.to_string()));
        }

        let value = record.outcome.value();
        if !value.is_finite() {
            return Err(ExperimentError::InvalidOutcome(value));
        }

        tracing::debug!(
            experiment = %record.experiment_id,
            variant = %record.variant_id,
            value,
            "Recorded outcome"
        );
        self.outcomes.append(record).await;
        Ok(())
    }

    /// Per-variant count, mean and sample variance. Every configured variant appears.
    pub async fn summarize(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<BTreeMap<VariantId, VariantSummary>, ExperimentError> {
        let experiment = self.experiment(experiment_id).await?;
        let grouped = self.grouped_values(&experiment).await;

        Ok(grouped
            .into_iter()
            .map(|(id, (values, _))| (id, SampleStats::from_values(&values).into()))
            .collect())
    }

    /// Compares `candidate` against `baseline`
    ///
    /// Uses a two-proportion z-test when every record of both variants is
    /// binary and Welch's t-test otherwise.
    pub async fn significance(
        &self,
        experiment_id: &ExperimentId,
        baseline: &VariantId,
        candidate: &VariantId,
    ) -> Result<SignificanceReport, ExperimentError> {
        let experiment = self.experiment(experiment_id).await?;
        for id in [baseline, candidate] {
            if experiment.variant(id).is_none() {
                return Err(ExperimentError::UnknownVariant {
                    experiment: experiment_id.to_string(),
                    variant: id.to_string(),
                });
            }
        }

        let grouped = self.grouped_values(&experiment).await;
        Ok(compare(&experiment, &grouped, baseline, candidate))
    }

    /// Administrative `Active -> Concluded` transition. Idempotent.
    pub async fn conclude(&self, experiment_id: &ExperimentId) -> Result<(), ExperimentError> {
        let mut experiments = self.experiments.write().await;
        let experiment = experiments
            .get_mut(experiment_id)
            .ok_or_else(|| ExperimentError::UnknownExperiment(experiment_id.to_string()))?;

        experiment.conclude();
        tracing::info!(experiment = %experiment_id, "Experiment concluded");
        Ok(())
    }

    pub async fn status(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<ExperimentStatus, ExperimentError> {
        Ok(self.experiment(experiment_id).await?.status())
    }

    /// Summary plus every variant compared against the first one
    pub async fn report(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<ExperimentReport, ExperimentError> {
        let experiment = self.experiment(experiment_id).await?;
        let grouped = self.grouped_values(&experiment).await;

        let baseline = &experiment
            .variants()
            .first()
            .ok_or_else(|| ExperimentError::NoVariants(experiment_id.to_string()))?
            .id;
        let comparisons: Vec<_> = experiment
            .variants()
            .iter()
            .skip(1)
            .map(|v| compare(&experiment, &grouped, baseline, &v.id))
            .collect();

        let winner = pick_winner(baseline, &comparisons, experiment.confidence_level);

        let summaries: BTreeMap<_, VariantSummary> = grouped
            .into_iter()
            .map(|(id, (values, _))| (id, SampleStats::from_values(&values).into()))
            .collect();

        Ok(ExperimentReport {
            experiment_id: experiment.id.clone(),
            status: experiment.status(),
            summaries,
            comparisons,
            winner,
        })
    }

    /// Outcome values per configured variant, and whether they were all binary
    async fn grouped_values(
        &self,
        experiment: &Experiment,
    ) -> BTreeMap<VariantId, (Vec<f64>, bool)> {
        let mut grouped: BTreeMap<VariantId, (Vec<f64>, bool)> = experiment
            .variants()
            .iter()
            .map(|v| (v.id.clone(), (Vec::new(), true)))
            .collect();

        for record in self.outcomes.records(&experiment.id).await {
            if let Some((values, all_binary)) = grouped.get_mut(&record.variant_id) {
                values.push(record.outcome.value());
                *all_binary &= record.outcome.is_binary();
            }
        }

        grouped
    }
}

fn compare(
    experiment: &Experiment,
    grouped: &BTreeMap<VariantId, (Vec<f64>, bool)>,
    baseline: &VariantId,
    candidate: &VariantId,
) -> SignificanceReport {
    let empty = (Vec::new(), true);
    let (base_values, base_binary) = grouped.get(baseline).unwrap_or(&empty);
    let (cand_values, cand_binary) = grouped.get(candidate).unwrap_or(&empty);

    let base = SampleStats::from_values(base_values);
    let cand = SampleStats::from_values(cand_values);
    let effect_size = cand.mean - base.mean;

    let min_samples = experiment.min_sample_size;
    if base.count < min_samples || cand.count < min_samples {
        return SignificanceReport {
            baseline: baseline.clone(),
            candidate: candidate.clone(),
            p_value: 1.0,
            effect_size,
            status: SignificanceStatus::InsufficientData { min_samples },
        };
    }

    let (p_value, kind) = if *base_binary && *cand_binary {
        let successes = |values: &[f64]| values.iter().filter(|v| **v >= 0.5).count();
        let p = stats::two_proportion_z_test(
            successes(base_values.as_slice()),
            base.count,
            successes(cand_values.as_slice()),
            cand.count,
        );
        (p, TestKind::TwoProportionZ)
    } else {
        (stats::welch_t_test(&base, &cand), TestKind::WelchT)
    };

    SignificanceReport {
        baseline: baseline.clone(),
        candidate: candidate.clone(),
        p_value,
        effect_size,
        status: SignificanceStatus::Evaluated(kind),
    }
}

/// Best significantly-better candidate, or the baseline when it significantly
/// beats every candidate
fn pick_winner(
    baseline: &VariantId,
    comparisons: &[SignificanceReport],
    confidence_level: f64,
) -> Option<VariantId> {
    let best_candidate = comparisons
        .iter()
        .filter(|c| c.is_significant(confidence_level) && c.effect_size > 0.0)
        .max_by(|a, b| a.effect_size.total_cmp(&b.effect_size));

    if let Some(best) = best_candidate {
        return Some(best.candidate.clone());
    }

    let baseline_dominates = !comparisons.is_empty()
        && comparisons
            .iter()
            .all(|c| c.is_significant(confidence_level) && c.effect_size < 0.0);

    baseline_dominates.then(|| baseline.clone())
}
