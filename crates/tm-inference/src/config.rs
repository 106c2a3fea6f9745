//! Estimator configuration.

use serde::{Deserialize, Serialize};
use tm_core::{Error, Result};

/// Alternative hypothesis of a Z-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tail {
    /// H1: mean < 0.
    Left,
    /// H1: mean > 0.
    Right,
    /// H1: mean != 0.
    #[default]
    Both,
}

/// Settings of the one-parameter fluctuation fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluctuationConfig {
    /// Maximum Newton iterations for the logistic fluctuation.
    pub max_iter: usize,
    /// Convergence tolerance on the mean score `|sum_i H_i (Y_i - Q*_i)| / n`.
    pub tol: f64,
}

impl Default for FluctuationConfig {
    fn default() -> Self {
        Self { max_iter: 100, tol: 1e-10 }
    }
}

/// Configuration of a TMLE batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Propensities are truncated into `[threshold, 1 - threshold]`.
    pub threshold: f64,
    /// Significance level of confidence intervals and tests.
    pub alpha: f64,
    /// Tail of the reported p-values and intervals.
    pub tail: Tail,
    /// Worker threads (0 = rayon global pool).
    pub n_threads: usize,
    /// Fluctuation fit settings.
    pub fluctuation: FluctuationConfig,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.005,
            alpha: 0.05,
            tail: Tail::Both,
            n_threads: 0,
            fluctuation: FluctuationConfig::default(),
        }
    }
}

impl EstimatorConfig {
    /// Set the propensity truncation threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the significance level.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the test tail.
    pub fn with_tail(mut self, tail: Tail) -> Self {
        self.tail = tail;
        self
    }

    /// Set the number of worker threads.
    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold < 0.5) {
            return Err(Error::Validation(format!(
                "threshold must be in (0, 0.5), got {}",
                self.threshold
            )));
        }
        validate_alpha(self.alpha)?;
        if self.fluctuation.max_iter == 0 {
            return Err(Error::Validation("fluctuation.max_iter must be >= 1".into()));
        }
        if !(self.fluctuation.tol > 0.0 && self.fluctuation.tol.is_finite()) {
            return Err(Error::Validation(format!(
                "fluctuation.tol must be finite and > 0, got {}",
                self.fluctuation.tol
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_alpha(alpha: f64) -> Result<()> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(Error::Validation(format!("alpha must be in (0, 1), got {}", alpha)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EstimatorConfig::default();
        assert_eq!(cfg.threshold, 0.005);
        assert_eq!(cfg.alpha, 0.05);
        assert_eq!(cfg.tail, Tail::Both);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(EstimatorConfig::default().with_threshold(0.0).validate().is_err());
        assert!(EstimatorConfig::default().with_threshold(0.5).validate().is_err());
        assert!(EstimatorConfig::default().with_alpha(1.0).validate().is_err());
        let mut cfg = EstimatorConfig::default();
        cfg.fluctuation.max_iter = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let cfg = EstimatorConfig::default().with_tail(Tail::Right).with_threads(2);
        let s = serde_json::to_string(&cfg).unwrap();
        assert!(s.contains("\"right\""));
        let back: EstimatorConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(back.tail, Tail::Right);
        assert_eq!(back.n_threads, 2);
    }
}
