//! Per-(target, query) reports and the batch result matrix.

use serde::{Deserialize, Serialize};
use tm_core::{Error, Result};
use tm_prob::math::mean;

use crate::config::Tail;
use crate::influence::{
    ZTestResult, confidence_interval, influence_curve, one_sample_ztest, paired_ztest, stderror,
};
use crate::nuisance::FitLog;
use crate::targeting::{Link, TargetedEstimate};

/// Targeted estimate of one query on one target, with its inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Target column.
    pub target_name: String,
    /// Query name.
    pub query: String,
    /// Targeted estimate.
    pub estimate: f64,
    /// Plug-in estimate before fluctuation.
    pub initial_estimate: f64,
    /// Influence-curve standard error.
    pub stderror: f64,
    /// Confidence interval around `estimate`.
    #[serde(with = "crate::influence::extended_float::pair")]
    pub confint: (f64, f64),
    /// P-value of `H0: estimate = 0`.
    pub pvalue: f64,
    /// Mean of the influence curve (numerically zero after targeting).
    pub mean_influence_curve: f64,
    /// Fluctuation coefficient.
    pub epsilon: f64,
    /// Fluctuation link.
    pub link: Link,
    /// Tail of `pvalue` and `confint`.
    pub tail: Tail,
    /// Significance level of `confint`.
    pub alpha: f64,
    /// Per-observation influence curve.
    pub influence_curve: Vec<f64>,
}

/// Summary statistics of a [`Report`] under a chosen tail and level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Target column.
    pub target_name: String,
    /// Query name.
    pub query: String,
    /// Targeted estimate.
    pub estimate: f64,
    /// Plug-in estimate before fluctuation.
    pub initial_estimate: f64,
    /// Influence-curve standard error.
    pub stderror: f64,
    /// Confidence interval around `estimate`.
    #[serde(with = "crate::influence::extended_float::pair")]
    pub confint: (f64, f64),
    /// P-value of `H0: estimate = 0`.
    pub pvalue: f64,
    /// Mean of the influence curve.
    pub mean_influence_curve: f64,
    /// Number of observations.
    pub n_obs: usize,
    /// Tail used.
    pub tail: Tail,
    /// Level used.
    pub alpha: f64,
}

impl Report {
    pub(crate) fn new(
        target_name: &str,
        query: String,
        est: TargetedEstimate,
        y: &[f64],
        tail: Tail,
        alpha: f64,
    ) -> Result<Self> {
        let ic = influence_curve(&est, y);
        let mut report = Self {
            target_name: target_name.to_string(),
            query,
            estimate: est.estimate,
            initial_estimate: est.initial_estimate,
            stderror: stderror(&ic),
            confint: (f64::NAN, f64::NAN),
            pvalue: f64::NAN,
            mean_influence_curve: mean(&ic),
            epsilon: est.epsilon,
            link: est.link,
            tail,
            alpha,
            influence_curve: ic,
        };
        let test = report.ztest(tail, alpha)?;
        report.pvalue = test.pvalue;
        report.confint = confidence_interval(report.estimate, report.stderror, tail, alpha)?;
        Ok(report)
    }

    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.influence_curve.len()
    }

    /// Per-observation values `estimate + D_i` entering the tests.
    pub fn test_values(&self) -> Vec<f64> {
        self.influence_curve.iter().map(|d| self.estimate + d).collect()
    }

    /// Z-test of `H0: estimate = 0` with the given tail and level.
    pub fn ztest(&self, tail: Tail, alpha: f64) -> Result<ZTestResult> {
        one_sample_ztest(&self.test_values(), tail, alpha)
    }

    /// Recompute the interval and p-value for another tail or level.
    pub fn summarize(&self, tail: Tail, alpha: f64) -> Result<ReportSummary> {
        let test = self.ztest(tail, alpha)?;
        Ok(ReportSummary {
            target_name: self.target_name.clone(),
            query: self.query.clone(),
            estimate: self.estimate,
            initial_estimate: self.initial_estimate,
            stderror: self.stderror,
            confint: confidence_interval(self.estimate, self.stderror, tail, alpha)?,
            pvalue: test.pvalue,
            mean_influence_curve: self.mean_influence_curve,
            n_obs: self.n_obs(),
            tail,
            alpha,
        })
    }
}

/// Paired Z-test of two reports computed on the same observations.
///
/// Tests `H0: estimate_a = estimate_b` on `(estimate_a + D_a) - (estimate_b + D_b)`
/// at the level of `a`.
pub fn compare(a: &Report, b: &Report, tail: Tail) -> Result<ZTestResult> {
    paired_ztest(&a.test_values(), &b.test_values(), tail, a.alpha)
}

/// Reports of a batch, indexed by (target, query) in declaration order.
#[derive(Debug, Clone)]
pub struct ReportMatrix {
    target_names: Vec<String>,
    query_names: Vec<String>,
    cells: Vec<Result<Report>>,
    fit_log: FitLog,
}

impl ReportMatrix {
    /// `cells` is row-major: one row per target, one column per query.
    pub(crate) fn new(
        target_names: Vec<String>,
        query_names: Vec<String>,
        cells: Vec<Result<Report>>,
        fit_log: FitLog,
    ) -> Self {
        debug_assert_eq!(cells.len(), target_names.len() * query_names.len());
        Self { target_names, query_names, cells, fit_log }
    }

    /// Number of targets.
    pub fn n_targets(&self) -> usize {
        self.target_names.len()
    }

    /// Number of queries.
    pub fn n_queries(&self) -> usize {
        self.query_names.len()
    }

    /// Target names in declaration order.
    pub fn target_names(&self) -> &[String] {
        &self.target_names
    }

    /// Query names in declaration order.
    pub fn query_names(&self) -> &[String] {
        &self.query_names
    }

    /// Cell `(target, query)`, or `None` if out of range.
    pub fn get(&self, target: usize, query: usize) -> Option<&Result<Report>> {
        if target >= self.n_targets() || query >= self.n_queries() {
            return None;
        }
        self.cells.get(target * self.n_queries() + query)
    }

    /// Report of cell `(target, query)`; the cell's error if it failed.
    pub fn report(&self, target: usize, query: usize) -> Result<&Report> {
        match self.get(target, query) {
            Some(Ok(r)) => Ok(r),
            Some(Err(e)) => Err(e.clone()),
            None => Err(Error::Validation(format!(
                "cell ({}, {}) out of range for {} targets x {} queries",
                target,
                query,
                self.n_targets(),
                self.n_queries()
            ))),
        }
    }

    /// Cell by target and query name.
    pub fn by_name(&self, target: &str, query: &str) -> Option<&Result<Report>> {
        let t = self.target_names.iter().position(|n| n == target)?;
        let q = self.query_names.iter().position(|n| n == query)?;
        self.get(t, q)
    }

    /// All cells as `(target, query, cell)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &Result<Report>)> {
        let nq = self.n_queries().max(1);
        self.cells.iter().enumerate().map(move |(k, c)| (k / nq, k % nq, c))
    }

    /// Successful reports.
    pub fn reports(&self) -> impl Iterator<Item = &Report> {
        self.cells.iter().filter_map(|c| c.as_ref().ok())
    }

    /// Failed cells as `(target, query, error)`.
    pub fn errors(&self) -> Vec<(usize, usize, &Error)> {
        self.iter().filter_map(|(t, q, c)| c.as_ref().err().map(|e| (t, q, e))).collect()
    }

    /// Estimates in row-major order (`None` for failed cells).
    pub fn estimates(&self) -> Vec<Option<f64>> {
        self.cells.iter().map(|c| c.as_ref().ok().map(|r| r.estimate)).collect()
    }

    /// P-values in row-major order (`None` for failed cells).
    pub fn pvalues(&self) -> Vec<Option<f64>> {
        self.cells.iter().map(|c| c.as_ref().ok().map(|r| r.pvalue)).collect()
    }

    /// Summaries of every cell under `tail` and `alpha`.
    pub fn summarize_all(&self, tail: Tail, alpha: f64) -> Vec<Result<ReportSummary>> {
        self.cells
            .iter()
            .map(|c| c.as_ref().map_err(Clone::clone).and_then(|r| r.summarize(tail, alpha)))
            .collect()
    }

    /// Z-test of one cell.
    pub fn ztest(&self, cell: (usize, usize), tail: Tail) -> Result<ZTestResult> {
        let r = self.report(cell.0, cell.1)?;
        r.ztest(tail, r.alpha)
    }

    /// Paired comparison of two cells.
    pub fn compare(&self, a: (usize, usize), b: (usize, usize), tail: Tail) -> Result<ZTestResult> {
        compare(self.report(a.0, a.1)?, self.report(b.0, b.1)?, tail)
    }

    /// Nuisance fits performed for this batch.
    pub fn fit_log(&self) -> &FitLog {
        &self.fit_log
    }
}
