//! Batch TMLE over every (target, query) pair.

use std::collections::BTreeSet;

use rayon::prelude::*;
use tm_core::{Error, Learner, Result, Table};

use crate::config::EstimatorConfig;
use crate::design::{TreatmentDesign, encode_confounders};
use crate::nuisance::{NuisanceCache, Outcome};
use crate::query::{Query, ResolvedQuery};
use crate::report::{Report, ReportMatrix};
use crate::targeting::{TargetingInput, target};

/// Targeted minimum-loss estimator for a batch of queries.
///
/// ```ignore
/// let reports = TmleEstimator::new(LinearRegressor::new(), FullCategoricalJoint::new(LogisticClassifier::new()), queries)
///     .with_config(EstimatorConfig::default().with_threshold(0.01))
///     .fit(&t, &w, &y)?;
/// ```
pub struct TmleEstimator {
    q_learner: Box<dyn Learner>,
    g_learner: Box<dyn Learner>,
    queries: Vec<Query>,
    config: EstimatorConfig,
}

impl TmleEstimator {
    /// Estimator with outcome learner `q`, treatment-mechanism learner `g`
    /// and default configuration.
    pub fn new(q: impl Learner + 'static, g: impl Learner + 'static, queries: Vec<Query>) -> Self {
        Self {
            q_learner: Box::new(q),
            g_learner: Box::new(g),
            queries,
            config: EstimatorConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: EstimatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Queries in declaration order.
    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// Estimate every query on every column of `y`.
    ///
    /// Returns `Err` only for malformed inputs or configuration. Failures of
    /// a single (target, query) unit are stored in its cell.
    pub fn fit(&self, t: &Table, w: &Table, y: &Table) -> Result<ReportMatrix> {
        run_batch(
            &self.queries,
            self.q_learner.as_ref(),
            self.g_learner.as_ref(),
            &self.config,
            t,
            w,
            y,
        )
    }
}

fn run_batch(
    queries: &[Query],
    q_learner: &dyn Learner,
    g_learner: &dyn Learner,
    config: &EstimatorConfig,
    t: &Table,
    w: &Table,
    y: &Table,
) -> Result<ReportMatrix> {
    config.validate()?;
    if config.n_threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.n_threads)
            .build()
            .map_err(|e| Error::Computation(format!("failed to create thread pool: {e}")))?;
        pool.install(|| run(queries, q_learner, g_learner, config, t, w, y))
    } else {
        run(queries, q_learner, g_learner, config, t, w, y)
    }
}

fn run(
    queries: &[Query],
    q_learner: &dyn Learner,
    g_learner: &dyn Learner,
    config: &EstimatorConfig,
    t: &Table,
    w: &Table,
    y: &Table,
) -> Result<ReportMatrix> {
    validate_inputs(t, w, y)?;
    let n = t.n_rows();
    let design = TreatmentDesign::from_table(t)?;
    let x_w = encode_confounders(w, n)?;
    let outcomes: Vec<Outcome> =
        y.iter().map(|(name, col)| Outcome::from_column(name, col)).collect::<Result<_>>()?;

    let resolved: Vec<Result<ResolvedQuery>> = queries.iter().map(|q| q.resolve(&design)).collect();
    for (q, r) in queries.iter().zip(&resolved) {
        if let Err(e) = r {
            log::warn!("tmle: query '{}' rejected: {}", q.name(), e);
        }
    }
    let combinations: Vec<Vec<usize>> = resolved
        .iter()
        .flatten()
        .flat_map(|r| r.vertices.iter().map(|v| v.codes.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    log::info!(
        "tmle: {} rows, {} targets, {} queries, {} treatment combinations",
        n,
        outcomes.len(),
        queries.len(),
        combinations.len()
    );

    // No valid query: nothing to fit.
    let cache = (!combinations.is_empty()).then(|| {
        NuisanceCache::fit(&design, &x_w, &outcomes, &combinations, q_learner, g_learner)
    });

    let n_queries = queries.len();
    let cells: Vec<Result<Report>> = (0..outcomes.len() * n_queries)
        .into_par_iter()
        .map(|k| {
            let (outcome, qi) = (&outcomes[k / n_queries], k % n_queries);
            let cell = estimate_cell(&design, cache.as_ref(), outcome, &queries[qi], &resolved[qi], config);
            if let Err(e) = &cell {
                log::warn!("tmle: '{}' on '{}' failed: {}", queries[qi].name(), outcome.name, e);
            }
            cell
        })
        .collect();

    let n_failed = cells.iter().filter(|c| c.is_err()).count();
    log::info!("tmle: {} of {} units succeeded", cells.len() - n_failed, cells.len());
    Ok(ReportMatrix::new(
        outcomes.iter().map(|o| o.name.clone()).collect(),
        queries.iter().map(Query::name).collect(),
        cells,
        cache.map(NuisanceCache::into_log).unwrap_or_default(),
    ))
}

fn estimate_cell(
    design: &TreatmentDesign,
    cache: Option<&NuisanceCache>,
    outcome: &Outcome,
    query: &Query,
    resolved: &Result<ResolvedQuery>,
    config: &EstimatorConfig,
) -> Result<Report> {
    let resolved = resolved.as_ref().map_err(Clone::clone)?;
    let cache = cache.ok_or_else(|| Error::Computation("nuisance models were not fit".into()))?;
    let q = cache.outcome(&outcome.name)?;
    let q_vertices =
        resolved.vertices.iter().map(|v| q.counterfactual(&v.codes)).collect::<Result<Vec<_>>>()?;
    let propensities =
        resolved.vertices.iter().map(|v| cache.propensity(&v.codes)).collect::<Result<Vec<_>>>()?;
    let input = TargetingInput {
        y: &outcome.values,
        link: outcome.link,
        q_observed: &q.observed,
        q_vertices,
        propensities,
        vertices: &resolved.vertices,
        treatments: design.codes(),
        threshold: config.threshold,
        fluctuation: &config.fluctuation,
    };
    let est = target(&input)?;
    Report::new(&outcome.name, query.name(), est, &outcome.values, config.tail, config.alpha)
}

fn validate_inputs(t: &Table, w: &Table, y: &Table) -> Result<()> {
    for table in [t, w, y] {
        table.validate()?;
    }
    let n = t.n_rows();
    if t.n_cols() == 0 {
        return Err(Error::Validation("T must have at least 1 treatment column".into()));
    }
    if y.n_cols() == 0 {
        return Err(Error::Validation("Y must have at least 1 target column".into()));
    }
    if n < 2 {
        return Err(Error::Validation(format!("need at least 2 observations, got {}", n)));
    }
    if y.n_rows() != n {
        return Err(Error::Validation(format!("Y has {} rows, T has {}", y.n_rows(), n)));
    }
    if w.n_cols() > 0 && w.n_rows() != n {
        return Err(Error::Validation(format!("W has {} rows, T has {}", w.n_rows(), n)));
    }
    Ok(())
}

/// Estimate `queries` on every column of `y` with default settings apart
/// from `threshold` and `alpha`.
#[allow(clippy::too_many_arguments)]
pub fn estimate(
    queries: &[Query],
    q_learner: &dyn Learner,
    g_learner: &dyn Learner,
    t: &Table,
    w: &Table,
    y: &Table,
    threshold: f64,
    alpha: f64,
) -> Result<ReportMatrix> {
    let config = EstimatorConfig::default().with_threshold(threshold).with_alpha(alpha);
    run_batch(queries, q_learner, g_learner, &config, t, w, y)
}
