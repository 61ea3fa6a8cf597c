//! Two-sample significance tests used by the experiment engine.
//!
//! Tail probabilities come from `statrs`; the engine decides which test
//! applies and how to report it.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Summary of one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    pub count: usize,
    pub mean: f64,
    /// Unbiased sample variance; 0 when `count < 2`
    pub variance: f64,
}

impl SampleStats {
    pub fn from_values(values: &[f64]) -> Self {
        let count = values.len();
        if count == 0 {
            return Self {
                count,
                mean: 0.0,
                variance: 0.0,
            };
        }

        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = if count < 2 {
            0.0
        } else {
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64
        };

        Self {
            count,
            mean,
            variance,
        }
    }
}

/// Two-sided p-value of a two-proportion z-test
///
/// Uses the pooled proportion for the standard error. Degenerate inputs (an
/// empty sample, or both samples all-success / all-failure) give 1.0.
pub fn two_proportion_z_test(
    successes_a: usize,
    n_a: usize,
    successes_b: usize,
    n_b: usize,
) -> f64 {
    if n_a == 0 || n_b == 0 {
        return 1.0;
    }

    let (n_a, n_b) = (n_a as f64, n_b as f64);
    let p_a = successes_a as f64 / n_a;
    let p_b = successes_b as f64 / n_b;
    let pooled = (successes_a + successes_b) as f64 / (n_a + n_b);

    let se = (pooled * (1.0 - pooled) * (1.0 / n_a + 1.0 / n_b)).sqrt();
    if se == 0.0 || !se.is_finite() {
        return 1.0;
    }

    let z = (p_b - p_a) / se;
    normal_two_sided(z)
}

/// P(|Z| >= |z|) for the standard normal
pub fn normal_two_sided(z: f64) -> f64 {
    if z.is_nan() {
        return 1.0;
    }
    match Normal::new(0.0, 1.0) {
        Ok(normal) => (2.0 * normal.sf(z.abs())).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Two-sided p-value of Welch's unequal-variance t-test
pub fn welch_t_test(a: &SampleStats, b: &SampleStats) -> f64 {
    if a.count < 2 || b.count < 2 {
        return 1.0;
    }

    let va = a.variance / a.count as f64;
    let vb = b.variance / b.count as f64;
    let se2 = va + vb;

    if se2 == 0.0 {
        // Both samples constant: either identical or trivially different
        return if a.mean == b.mean { 1.0 } else { 0.0 };
    }

    let t = (b.mean - a.mean) / se2.sqrt();
    let df = se2.powi(2)
        / (va.powi(2) / (a.count - 1) as f64 + vb.powi(2) / (b.count - 1) as f64);

    student_t_two_sided(t, df)
}

/// P(|T| >= |t|) for Student's t with `df` degrees of freedom
pub fn student_t_two_sided(t: f64, df: f64) -> f64 {
    if t.is_nan() {
        return 1.0;
    }
    if t.is_infinite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.sf(t.abs())).clamp(0.0, 1.0),
        // Invalid df (non-positive or NaN) carries no evidence
        Err(_) => 1.0,
    }
}
