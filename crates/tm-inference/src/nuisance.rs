//! Nuisance estimation: outcome regressions and the treatment mechanism.
//!
//! All fits for one batch go through a [`NuisanceCache`] owned by that call.
//! The treatment mechanism `g` is fit once on the joint treatment labels;
//! each target column gets exactly one outcome regression `Q`. Predictions
//! needed by the queries (propensities per treatment combination and
//! counterfactual outcome means per target and combination) are computed
//! once and shared by every query that references them.

use std::collections::HashMap;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tm_core::{Column, Error, FeatureMatrix, Labels, Learner, Prediction, Result};

use crate::design::TreatmentDesign;
use crate::targeting::Link;

/// Identity of a nuisance fit: the treatment variables it conditions on and,
/// for outcome regressions, the target column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FitKey {
    /// Treatment columns, in table order.
    pub treatments: Vec<String>,
    /// Target column (`None` for the treatment mechanism).
    pub target: Option<String>,
}

impl FitKey {
    /// Key of the treatment mechanism.
    pub fn treatment(treatments: &[String]) -> Self {
        Self { treatments: treatments.to_vec(), target: None }
    }

    /// Key of the outcome regression of `target`.
    pub fn outcome(treatments: &[String], target: &str) -> Self {
        Self { treatments: treatments.to_vec(), target: Some(target.to_string()) }
    }
}

impl fmt::Display for FitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            None => write!(f, "G[{}]", self.treatments.join(",")),
            Some(t) => write!(f, "Q[{}|{}]", t, self.treatments.join(",")),
        }
    }
}

/// One nuisance fit performed during a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    /// What was fit.
    pub key: FitKey,
    /// Name of the learner used.
    pub learner: String,
    /// Whether fitting and prediction succeeded.
    pub succeeded: bool,
}

/// Every nuisance fit of a batch, treatment mechanism first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitLog {
    records: Vec<FitRecord>,
}

impl FitLog {
    /// All records.
    pub fn records(&self) -> &[FitRecord] {
        &self.records
    }

    /// Total number of fits.
    pub fn n_fits(&self) -> usize {
        self.records.len()
    }

    /// Number of treatment-mechanism fits.
    pub fn treatment_fits(&self) -> usize {
        self.records.iter().filter(|r| r.key.target.is_none()).count()
    }

    /// Number of outcome-regression fits.
    pub fn outcome_fits(&self) -> usize {
        self.records.iter().filter(|r| r.key.target.is_some()).count()
    }

    fn push(&mut self, key: FitKey, learner: String, succeeded: bool) {
        self.records.push(FitRecord { key, learner, succeeded });
    }
}

/// A target column prepared for regression and fluctuation.
#[derive(Debug, Clone)]
pub(crate) struct Outcome {
    pub(crate) name: String,
    pub(crate) link: Link,
    /// `Y` on the mean scale (0/1 for binary targets).
    pub(crate) values: Vec<f64>,
    labels: Labels,
}

impl Outcome {
    /// Binary categorical columns use the logit link with the second level as
    /// the positive class; continuous columns use the identity link.
    pub(crate) fn from_column(name: &str, column: &Column) -> Result<Self> {
        match column {
            Column::Continuous(v) => {
                if v.iter().any(|x| !x.is_finite()) {
                    return Err(Error::Validation(format!(
                        "target column '{}' contains non-finite values",
                        name
                    )));
                }
                Ok(Self {
                    name: name.to_string(),
                    link: Link::Identity,
                    values: v.clone(),
                    labels: Labels::Continuous(v.clone()),
                })
            }
            Column::Categorical { levels, codes } => {
                if levels.len() != 2 {
                    return Err(Error::Validation(format!(
                        "categorical target column '{}' must have exactly 2 levels, got {}",
                        name,
                        levels.len()
                    )));
                }
                Ok(Self {
                    name: name.to_string(),
                    link: Link::Logit,
                    values: codes.iter().map(|&c| c as f64).collect(),
                    labels: Labels::Categorical { codes: codes.clone(), n_classes: 2 },
                })
            }
        }
    }
}

/// Outcome-regression predictions of one target.
#[derive(Debug, Clone)]
pub(crate) struct OutcomePredictions {
    /// `Q(T_i, W_i)`.
    pub(crate) observed: Vec<f64>,
    counterfactual: HashMap<Vec<usize>, Vec<f64>>,
}

impl OutcomePredictions {
    /// `Q(combination, W_i)`.
    pub(crate) fn counterfactual(&self, combination: &[usize]) -> Result<&[f64]> {
        self.counterfactual.get(combination).map(Vec::as_slice).ok_or_else(|| {
            Error::Computation(format!("no outcome prediction cached for {:?}", combination))
        })
    }
}

/// Memo table of one batch.
pub(crate) struct NuisanceCache {
    propensities: Result<HashMap<Vec<usize>, Vec<f64>>>,
    outcomes: HashMap<FitKey, Result<OutcomePredictions>>,
    treatments: Vec<String>,
    log: FitLog,
}

impl NuisanceCache {
    /// Fit `g` and one `Q` per target, predicting at `combinations`.
    ///
    /// Failures are stored per fit and surface when a query reads them.
    pub(crate) fn fit(
        design: &TreatmentDesign,
        w: &FeatureMatrix,
        outcomes: &[Outcome],
        combinations: &[Vec<usize>],
        q_learner: &dyn Learner,
        g_learner: &dyn Learner,
    ) -> Self {
        let treatments = design.names().to_vec();
        let g_key = FitKey::treatment(&treatments);

        let mut pending: Vec<(FitKey, &Outcome)> = Vec::with_capacity(outcomes.len());
        for o in outcomes {
            let key = FitKey::outcome(&treatments, &o.name);
            if !pending.iter().any(|(k, _)| *k == key) {
                pending.push((key, o));
            }
        }

        let (propensities, fitted) = rayon::join(
            || fit_treatment_mechanism(design, w, combinations, g_learner),
            || {
                pending
                    .par_iter()
                    .map(|(_, o)| fit_outcome_regression(design, w, o, combinations, q_learner))
                    .collect::<Vec<_>>()
            },
        );

        let mut fit_log = FitLog::default();
        fit_log.push(g_key.clone(), g_learner.name(), propensities.is_ok());
        if let Err(e) = &propensities {
            log::warn!("nuisance: {} failed: {}", g_key, e);
        }
        let q_name = q_learner.name();
        let mut cached = HashMap::with_capacity(pending.len());
        for ((key, _), result) in pending.into_iter().zip(fitted) {
            fit_log.push(key.clone(), q_name.clone(), result.is_ok());
            if let Err(e) = &result {
                log::warn!("nuisance: {} failed: {}", key, e);
            }
            cached.insert(key, result);
        }

        Self { propensities, outcomes: cached, treatments, log: fit_log }
    }

    /// Raw (untruncated) `g(combination | W_i)`.
    pub(crate) fn propensity(&self, combination: &[usize]) -> Result<&[f64]> {
        let table = self.propensities.as_ref().map_err(Clone::clone)?;
        table.get(combination).map(Vec::as_slice).ok_or_else(|| {
            Error::Computation(format!("no propensity cached for {:?}", combination))
        })
    }

    /// Outcome predictions of `target`.
    pub(crate) fn outcome(&self, target: &str) -> Result<&OutcomePredictions> {
        let key = FitKey::outcome(&self.treatments, target);
        match self.outcomes.get(&key) {
            Some(Ok(p)) => Ok(p),
            Some(Err(e)) => Err(e.clone()),
            None => Err(Error::Computation(format!("{} was never fit", key))),
        }
    }

    pub(crate) fn into_log(self) -> FitLog {
        self.log
    }
}

fn fit_treatment_mechanism(
    design: &TreatmentDesign,
    w: &FeatureMatrix,
    combinations: &[Vec<usize>],
    learner: &dyn Learner,
) -> Result<HashMap<Vec<usize>, Vec<f64>>> {
    log::debug!("nuisance: fitting G with {} ({} rows)", learner.name(), w.n_rows());
    let model = learner.fit(w, &design.labels())?;
    let pred = model.predict(w)?;
    pred.check_rows(w.n_rows())?;
    let mut table = HashMap::with_capacity(combinations.len());
    for combo in combinations {
        let g = pred.combination_probability(combo)?;
        if g.len() != w.n_rows() {
            return Err(Error::Learner(format!(
                "propensity of {} has {} rows, expected {}",
                design.describe(combo),
                g.len(),
                w.n_rows()
            )));
        }
        if g.iter().any(|p| !p.is_finite()) {
            return Err(Error::Learner(format!(
                "propensity of {} is not finite",
                design.describe(combo)
            )));
        }
        table.insert(combo.clone(), g);
    }
    Ok(table)
}

fn fit_outcome_regression(
    design: &TreatmentDesign,
    w: &FeatureMatrix,
    outcome: &Outcome,
    combinations: &[Vec<usize>],
    learner: &dyn Learner,
) -> Result<OutcomePredictions> {
    log::debug!("nuisance: fitting Q for '{}' with {}", outcome.name, learner.name());
    let x = design.outcome_design(w, None)?;
    let model = learner.fit(&x, &outcome.labels)?;
    let observed = outcome_mean(model.predict(&x)?, outcome.link, x.n_rows())?;
    let mut counterfactual = HashMap::with_capacity(combinations.len());
    for combo in combinations {
        let x_cf = design.outcome_design(w, Some(combo))?;
        let mu = outcome_mean(model.predict(&x_cf)?, outcome.link, x_cf.n_rows())?;
        counterfactual.insert(combo.clone(), mu);
    }
    Ok(OutcomePredictions { observed, counterfactual })
}

/// Conditional mean on the outcome scale.
///
/// Binary targets read the probability of the positive class; a point
/// prediction (e.g. a linear probability model) is clipped into `[0, 1]`.
fn outcome_mean(pred: Prediction, link: Link, n: usize) -> Result<Vec<f64>> {
    pred.check_rows(n)?;
    let mu = match (link, pred) {
        (Link::Identity, pred) => pred.into_point()?,
        (Link::Logit, Prediction::Point(v)) => v.into_iter().map(|p| p.clamp(0.0, 1.0)).collect(),
        (Link::Logit, pred) => pred.class_probability(1)?,
    };
    if mu.iter().any(|m| !m.is_finite()) {
        return Err(Error::Learner("outcome regression produced non-finite predictions".into()));
    }
    Ok(mu)
}
