//! Batch semantics: shared nuisance fits, per-cell errors, comparisons.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tm_core::{Column, Error, FeatureMatrix, FittedModel, Labels, Learner, Prediction, Result, Table};
use tm_inference::{EstimatorConfig, Query, Tail, TmleEstimator, estimate};
use tm_learn::{
    ConstantClassifier, FullCategoricalJoint, LabelDispatch, LinearRegressor, LogisticClassifier,
};

/// Counts `fit` calls of the wrapped learner.
struct Counting<L> {
    inner: L,
    fits: Arc<AtomicUsize>,
}

impl<L: Learner> Learner for Counting<L> {
    fn name(&self) -> String {
        format!("Counting({})", self.inner.name())
    }

    fn fit(&self, x: &FeatureMatrix, y: &Labels) -> Result<Box<dyn FittedModel>> {
        self.fits.fetch_add(1, Ordering::SeqCst);
        self.inner.fit(x, y)
    }
}

fn q_learner() -> LabelDispatch<LinearRegressor, LogisticClassifier> {
    LabelDispatch::new(LinearRegressor::new(), LogisticClassifier::new())
}

fn g_learner() -> FullCategoricalJoint<LogisticClassifier> {
    FullCategoricalJoint::new(LogisticClassifier::new())
}

fn ate() -> Query {
    Query::new(&[("t", "true")], &[("t", "false")])
}

fn reversed() -> Query {
    Query::new(&[("t", "false")], &[("t", "true")]).with_name("reversed")
}

#[test]
fn test_nuisances_fit_once_per_batch() {
    let data = common::ate_dataset(2_000, 1);
    let q_fits = Arc::new(AtomicUsize::new(0));
    let g_fits = Arc::new(AtomicUsize::new(0));
    let reports = TmleEstimator::new(
        Counting { inner: q_learner(), fits: Arc::clone(&q_fits) },
        Counting { inner: g_learner(), fits: Arc::clone(&g_fits) },
        vec![ate(), reversed(), ate().with_name("again")],
    )
    .fit(&data.t, &data.w, &data.y)
    .unwrap();

    assert_eq!(g_fits.load(Ordering::SeqCst), 1);
    assert_eq!(q_fits.load(Ordering::SeqCst), 2);
    assert_eq!(reports.fit_log().treatment_fits(), 1);
    assert_eq!(reports.fit_log().outcome_fits(), 2);
    assert_eq!(reports.fit_log().records()[0].key.to_string(), "G[t]");
    assert_eq!(reports.n_targets(), 2);
    assert_eq!(reports.n_queries(), 3);
    assert!(reports.errors().is_empty());
}

#[test]
fn test_batch_cells_match_single_estimation() {
    let data = common::ate_dataset(2_000, 2);
    let queries = vec![ate(), reversed()];
    let batch = TmleEstimator::new(q_learner(), g_learner(), queries.clone())
        .fit(&data.t, &data.w, &data.y)
        .unwrap();

    for (ti, target) in ["y", "y_bin"].iter().enumerate() {
        let y = Table::new().with_column(*target, data.y.column(target).unwrap().clone()).unwrap();
        for (qi, query) in queries.iter().enumerate() {
            let single = estimate(
                std::slice::from_ref(query),
                &q_learner(),
                &g_learner(),
                &data.t,
                &data.w,
                &y,
                0.005,
                0.05,
            )
            .unwrap();
            let a = batch.report(ti, qi).unwrap();
            let b = single.report(0, 0).unwrap();
            assert!((a.estimate - b.estimate).abs() < 1e-12);
            assert!((a.stderror - b.stderror).abs() < 1e-12);
            assert!((a.pvalue - b.pvalue).abs() < 1e-12);
        }
    }
}

#[test]
fn test_reversed_query_negates_estimate() {
    let data = common::ate_dataset(2_000, 4);
    let reports = TmleEstimator::new(q_learner(), g_learner(), vec![ate(), reversed()])
        .fit(&data.t, &data.w, &data.y)
        .unwrap();
    let fwd = reports.report(0, 0).unwrap();
    let rev = reports.by_name("y", "reversed").unwrap().as_ref().unwrap();
    assert!((fwd.estimate + rev.estimate).abs() < 1e-8);
    assert!((fwd.stderror - rev.stderror).abs() < 1e-8);
}

#[test]
fn test_compare_cells() {
    let data = common::ate_dataset(2_000, 5);
    let reports = TmleEstimator::new(q_learner(), g_learner(), vec![ate(), reversed()])
        .fit(&data.t, &data.w, &data.y)
        .unwrap();

    let same = reports.compare((0, 0), (0, 0), Tail::Both).unwrap();
    assert_eq!(same.statistic, 0.0);
    assert!((same.pvalue - 1.0).abs() < 1e-12);

    let opposite = reports.compare((0, 0), (0, 1), Tail::Both).unwrap();
    assert!(opposite.pvalue < 1e-6);
    assert!(opposite.estimate > 1.5);

    let across_targets = reports.compare((0, 0), (1, 0), Tail::Both).unwrap();
    assert_eq!(across_targets.n_obs, 2_000);
}

#[test]
fn test_compare_requires_equal_observation_counts() {
    let big = common::ate_dataset(300, 6);
    let small = common::ate_dataset(200, 6);
    let a = TmleEstimator::new(q_learner(), g_learner(), vec![ate()])
        .fit(&big.t, &big.w, &big.y)
        .unwrap();
    let b = TmleEstimator::new(q_learner(), g_learner(), vec![ate()])
        .fit(&small.t, &small.w, &small.y)
        .unwrap();
    let err = tm_inference::compare(a.report(0, 0).unwrap(), b.report(0, 0).unwrap(), Tail::Both)
        .unwrap_err();
    assert_eq!(err, Error::DimensionMismatch { left: 300, right: 200 });
}

#[test]
fn test_positivity_violation_is_cell_scoped() {
    // (t1=true, t2=true) never occurs.
    let t1 = [true, true, false, false, false, true, false, false];
    let t2 = [false, false, true, true, false, false, true, false];
    let t = Table::new()
        .with_column("t1", Column::from_bools(&t1))
        .unwrap()
        .with_column("t2", Column::from_bools(&t2))
        .unwrap();
    let w = Table::new()
        .with_column("w", Column::continuous(vec![0.1, -0.4, 0.3, 0.9, -1.2, 0.5, -0.2, 0.0]))
        .unwrap();
    let y = Table::new()
        .with_column("y", Column::continuous(vec![1.0, 0.7, 2.1, 1.5, 0.2, 1.1, 1.9, 0.4]))
        .unwrap();

    let bad = Query::new(&[("t1", "true"), ("t2", "true")], &[("t1", "false"), ("t2", "false")]);
    let good = Query::new(&[("t1", "true"), ("t2", "false")], &[("t1", "false"), ("t2", "false")]);
    let reports = TmleEstimator::new(LinearRegressor::new(), g_learner(), vec![bad.clone(), good])
        .fit(&t, &w, &y)
        .unwrap();
    assert!(matches!(reports.report(0, 0), Err(Error::PositivityViolation(_))));
    assert!(reports.report(0, 1).is_ok());
    assert_eq!(reports.estimates()[0], None);
    assert_eq!(reports.errors().len(), 1);

    let g_fits = Arc::new(AtomicUsize::new(0));
    let none = TmleEstimator::new(
        LinearRegressor::new(),
        Counting { inner: g_learner(), fits: Arc::clone(&g_fits) },
        vec![bad],
    )
    .fit(&t, &w, &y)
    .unwrap();
    assert!(matches!(none.report(0, 0), Err(Error::PositivityViolation(_))));
    assert_eq!(g_fits.load(Ordering::SeqCst), 0);
    assert_eq!(none.fit_log().n_fits(), 0);
}

#[test]
fn test_failed_outcome_fit_marks_its_target() {
    let data = common::ate_dataset(500, 8);
    // LinearRegressor cannot fit the binary target.
    let reports = TmleEstimator::new(LinearRegressor::new(), g_learner(), vec![ate()])
        .fit(&data.t, &data.w, &data.y)
        .unwrap();
    assert!(reports.report(0, 0).is_ok());
    assert!(matches!(reports.report(1, 0), Err(Error::Learner(_))));
    assert!(!reports.fit_log().records()[2].succeeded);
}

/// Predicts three rows whatever the input.
struct ThreeRows;

#[derive(Debug)]
struct ThreeRowsModel;

impl FittedModel for ThreeRowsModel {
    fn predict(&self, _x: &FeatureMatrix) -> Result<Prediction> {
        Ok(Prediction::Point(vec![0.0; 3]))
    }
}

impl Learner for ThreeRows {
    fn name(&self) -> String {
        "ThreeRows".into()
    }

    fn fit(&self, _x: &FeatureMatrix, _y: &Labels) -> Result<Box<dyn FittedModel>> {
        Ok(Box::new(ThreeRowsModel))
    }
}

#[test]
fn test_wrong_length_predictions_fail_their_cells() {
    let data = common::ate_dataset(200, 13);
    let reports = TmleEstimator::new(ThreeRows, g_learner(), vec![ate(), reversed()])
        .fit(&data.t, &data.w, &data.y)
        .unwrap();
    assert_eq!(reports.errors().len(), 4);
    assert!(matches!(reports.report(0, 0), Err(Error::Learner(_))));
    assert!(matches!(reports.report(1, 1), Err(Error::Learner(_))));
    let log = reports.fit_log();
    assert!(log.records()[0].succeeded);
    assert!(log.records()[1..].iter().all(|r| !r.succeeded));

    let reports = TmleEstimator::new(q_learner(), ThreeRows, vec![ate()])
        .fit(&data.t, &data.w, &data.y)
        .unwrap();
    assert!(matches!(reports.report(0, 0), Err(Error::Learner(_))));
    assert!(!reports.fit_log().records()[0].succeeded);
}

#[test]
fn test_failing_queries_leave_siblings_intact() {
    // y = 1 for every "a", 0 for every "b", alternating for "c".
    let n = 90;
    let arms: Vec<&str> = (0..n).map(|i| ["a", "b", "c"][i % 3]).collect();
    let y: Vec<bool> = (0..n)
        .map(|i| match i % 3 {
            0 => true,
            1 => false,
            _ => (i / 3) % 2 == 0,
        })
        .collect();
    let t = Table::new().with_column("t", Column::categorical(&arms)).unwrap();
    let y = Table::new().with_column("y", Column::from_bools(&y)).unwrap();

    let separated = Query::new(&[("t", "a")], &[("t", "b")]).with_name("a-b");
    let mixed = Query::new(&[("t", "a")], &[("t", "c")]).with_name("a-c");
    let unknown = Query::new(&[("t", "z")], &[("t", "b")]).with_name("z-b");
    let reports = TmleEstimator::new(
        ConstantClassifier,
        FullCategoricalJoint::new(ConstantClassifier),
        vec![separated, mixed, unknown],
    )
    .fit(&t, &Table::new(), &y)
    .unwrap();

    assert!(matches!(reports.report(0, 0), Err(Error::ConvergenceFailure(_))));
    assert!(matches!(reports.report(0, 2), Err(Error::InvalidQuery(_))));
    let r = reports.by_name("y", "a-c").unwrap().as_ref().unwrap();
    // P(y | a) - P(y | c) = 1 - 0.5 with uniform arms.
    assert!((r.estimate - 0.5).abs() < 1e-6, "estimate={}", r.estimate);
    assert!(r.mean_influence_curve.abs() < 1e-6);
    assert_eq!(reports.errors().len(), 2);
    assert_eq!(reports.fit_log().n_fits(), 2);
}

#[test]
fn test_input_contract_violations_are_batch_errors() {
    let data = common::ate_dataset(100, 9);
    let est = TmleEstimator::new(q_learner(), g_learner(), vec![ate()]);

    let short_y = Table::new().with_column("y", Column::continuous(vec![1.0; 99])).unwrap();
    assert!(matches!(est.fit(&data.t, &data.w, &short_y), Err(Error::Validation(_))));

    let continuous_t = Table::new().with_column("t", Column::continuous(vec![0.0; 100])).unwrap();
    assert!(matches!(est.fit(&continuous_t, &data.w, &data.y), Err(Error::Validation(_))));

    let levels: Vec<&str> = (0..100).map(|i| ["a", "b", "c"][i % 3]).collect();
    let three_level_y = Table::new().with_column("y", Column::categorical(&levels)).unwrap();
    assert!(matches!(est.fit(&data.t, &data.w, &three_level_y), Err(Error::Validation(_))));

    let bad_config = TmleEstimator::new(q_learner(), g_learner(), vec![ate()])
        .with_config(EstimatorConfig::default().with_threshold(0.7));
    assert!(matches!(bad_config.fit(&data.t, &data.w, &data.y), Err(Error::Validation(_))));
}

#[test]
fn test_dedicated_pool_gives_identical_results() {
    let data = common::ate_dataset(1_000, 10);
    let global = TmleEstimator::new(q_learner(), g_learner(), vec![ate(), reversed()])
        .fit(&data.t, &data.w, &data.y)
        .unwrap();
    let pooled = TmleEstimator::new(q_learner(), g_learner(), vec![ate(), reversed()])
        .with_config(EstimatorConfig::default().with_threads(2))
        .fit(&data.t, &data.w, &data.y)
        .unwrap();
    assert_eq!(global.estimates(), pooled.estimates());
    assert_eq!(global.pvalues(), pooled.pvalues());
}

#[test]
fn test_summaries_follow_requested_tail() {
    let data = common::ate_dataset(1_000, 12);
    let reports = TmleEstimator::new(q_learner(), g_learner(), vec![ate()])
        .fit(&data.t, &data.w, &data.y)
        .unwrap();
    let summaries = reports.summarize_all(Tail::Right, 0.1);
    assert_eq!(summaries.len(), 2);
    for s in summaries {
        let s = s.unwrap();
        assert_eq!(s.tail, Tail::Right);
        assert_eq!(s.confint.1, f64::INFINITY);
        assert!(s.confint.0 < s.estimate);
    }
    let json = serde_json::to_value(reports.report(0, 0).unwrap().summarize(Tail::Both, 0.05).unwrap())
        .unwrap();
    assert_eq!(json["tail"], "both");
    assert_eq!(json["n_obs"], 1000);
}
