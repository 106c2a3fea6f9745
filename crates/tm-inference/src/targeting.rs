//! Targeting (fluctuation) step.
//!
//! Given initial outcome predictions `Q(t, w)` and propensities `g(t | w)`,
//! the clever covariate
//!
//! `H(t, w) = sum_v sign_v * 1[t = v] / g(v | w)`
//!
//! defines a one-parameter sub-model
//!
//! `Q_eps(t, w) = link^-1( link(Q(t, w)) + eps * H(t, w) )`
//!
//! whose maximum-likelihood `eps` solves the efficient influence curve
//! equation `sum_i H_i (Y_i - Q_eps(T_i, W_i)) = 0`. The targeted estimate
//! is the plug-in `mean_i sum_v sign_v Q_eps(v, W_i)`.
//!
//! Link choice follows the declared outcome type: binary outcomes fluctuate
//! on the logit scale (Bernoulli likelihood), continuous outcomes on the
//! identity scale (least squares, closed form).

use serde::{Deserialize, Serialize};
use tm_core::{Error, Result};
use tm_prob::math::{bernoulli_loglik, clamp_probability, logit, mean, sigmoid};

use crate::config::FluctuationConfig;
use crate::query::Vertex;

/// Probabilities are kept this far from 0 and 1 before taking logits.
const LOGIT_EPS: f64 = 1e-12;

/// Link of the fluctuation sub-model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Link {
    /// Logistic fluctuation for binary outcomes.
    Logit,
    /// Linear fluctuation for continuous outcomes.
    Identity,
}

impl Link {
    /// Map a mean onto the linear-predictor scale.
    #[inline]
    pub fn apply(self, mu: f64) -> f64 {
        match self {
            Link::Logit => logit(clamp_probability(mu, LOGIT_EPS)),
            Link::Identity => mu,
        }
    }

    /// Map a linear predictor back onto the mean scale.
    #[inline]
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            Link::Logit => sigmoid(eta),
            Link::Identity => eta,
        }
    }
}

/// Clever covariate evaluated at the observed and at every vertex treatment.
#[derive(Debug, Clone)]
pub struct CleverCovariate {
    /// `H(T_i, W_i)`.
    pub observed: Vec<f64>,
    /// `H(v, W_i) = sign_v / g(v | W_i)` per vertex.
    pub vertices: Vec<Vec<f64>>,
    /// Number of (vertex, row) propensities moved by truncation.
    pub n_truncated: usize,
}

/// Build the clever covariate from raw propensities (one slice per vertex).
pub(crate) fn clever_covariate(
    vertices: &[Vertex],
    propensities: &[&[f64]],
    treatments: &[Vec<usize>],
    threshold: f64,
) -> CleverCovariate {
    let n = treatments.len();
    let mut n_truncated = 0;
    let per_vertex: Vec<Vec<f64>> = vertices
        .iter()
        .zip(propensities)
        .map(|(v, g)| {
            g.iter()
                .map(|&gi| {
                    let gt = clamp_probability(gi, threshold);
                    if gt != gi {
                        n_truncated += 1;
                    }
                    v.sign / gt
                })
                .collect()
        })
        .collect();
    let observed = (0..n)
        .map(|i| {
            vertices
                .iter()
                .zip(&per_vertex)
                .filter(|(v, _)| v.codes == treatments[i])
                .map(|(_, h)| h[i])
                .sum()
        })
        .collect();
    CleverCovariate { observed, vertices: per_vertex, n_truncated }
}

/// Inputs of one (target, query) targeting step.
pub(crate) struct TargetingInput<'a> {
    pub(crate) y: &'a [f64],
    pub(crate) link: Link,
    /// `Q(T_i, W_i)`.
    pub(crate) q_observed: &'a [f64],
    /// `Q(v, W_i)` per vertex.
    pub(crate) q_vertices: Vec<&'a [f64]>,
    /// Raw `g(v | W_i)` per vertex.
    pub(crate) propensities: Vec<&'a [f64]>,
    pub(crate) vertices: &'a [Vertex],
    pub(crate) treatments: &'a [Vec<usize>],
    pub(crate) threshold: f64,
    pub(crate) fluctuation: &'a FluctuationConfig,
}

/// Result of the targeting step.
#[derive(Debug, Clone)]
pub struct TargetedEstimate {
    /// Fluctuation coefficient.
    pub epsilon: f64,
    /// Link used for the fluctuation.
    pub link: Link,
    /// Targeted plug-in estimate.
    pub estimate: f64,
    /// Plug-in estimate from the un-fluctuated outcome model.
    pub initial_estimate: f64,
    /// `H(T_i, W_i)`.
    pub h_observed: Vec<f64>,
    /// `Q*(T_i, W_i)`.
    pub q_star_observed: Vec<f64>,
    /// `sum_v sign_v Q*(v, W_i)`.
    pub q_star_contrast: Vec<f64>,
}

/// Run the fluctuation and the targeted plug-in for one unit.
pub(crate) fn target(input: &TargetingInput<'_>) -> Result<TargetedEstimate> {
    let n = input.y.len();
    let h = clever_covariate(input.vertices, &input.propensities, input.treatments, input.threshold);
    let n_scored = n * input.vertices.len();
    if h.n_truncated * 10 > n_scored {
        log::warn!(
            "targeting: truncated {} of {} propensities at {}; overlap is poor",
            h.n_truncated,
            n_scored,
            input.threshold
        );
    } else if h.n_truncated > 0 {
        log::debug!("targeting: truncated {} of {} propensities", h.n_truncated, n_scored);
    }

    let offset: Vec<f64> = input.q_observed.iter().map(|&q| input.link.apply(q)).collect();
    let epsilon = match input.link {
        Link::Logit => fluctuate_logistic(input.y, &offset, &h.observed, input.fluctuation)?,
        Link::Identity => fluctuate_linear(input.y, &offset, &h.observed)?,
    };
    log::debug!("targeting: epsilon = {:.6e} ({:?} link)", epsilon, input.link);

    let link = input.link;
    let q_star_observed: Vec<f64> = offset
        .iter()
        .zip(&h.observed)
        .map(|(&o, &hi)| link.inverse(o + epsilon * hi))
        .collect();

    let mut q_star_contrast = vec![0.0; n];
    let mut q_initial_contrast = vec![0.0; n];
    for ((v, q_v), h_v) in input.vertices.iter().zip(&input.q_vertices).zip(&h.vertices) {
        for i in 0..n {
            q_initial_contrast[i] += v.sign * q_v[i];
            q_star_contrast[i] += v.sign * link.inverse(link.apply(q_v[i]) + epsilon * h_v[i]);
        }
    }

    let estimate = mean(&q_star_contrast);
    if !estimate.is_finite() {
        return Err(Error::Computation("targeted estimate is not finite".into()));
    }
    Ok(TargetedEstimate {
        epsilon,
        link,
        estimate,
        initial_estimate: mean(&q_initial_contrast),
        h_observed: h.observed,
        q_star_observed,
        q_star_contrast,
    })
}

/// Least-squares fluctuation: `eps = sum H (Y - Q) / sum H^2`.
pub(crate) fn fluctuate_linear(y: &[f64], offset: &[f64], h: &[f64]) -> Result<f64> {
    let mut num = 0.0;
    let mut den = 0.0;
    for ((&yi, &oi), &hi) in y.iter().zip(offset).zip(h) {
        num += hi * (yi - oi);
        den += hi * hi;
    }
    if !(den > 0.0 && den.is_finite()) {
        return Err(Error::ConvergenceFailure(
            "clever covariate is identically zero; fluctuation is not identified".into(),
        ));
    }
    let eps = num / den;
    if !eps.is_finite() {
        return Err(Error::ConvergenceFailure("linear fluctuation produced non-finite epsilon".into()));
    }
    Ok(eps)
}

/// The 1-D logistic MLE is infinite when `H` separates the outcomes.
fn check_separation(y: &[f64], h: &[f64]) -> Result<()> {
    let mut informative = false;
    let mut towards_pos = true;
    let mut towards_neg = true;
    for (&yi, &hi) in y.iter().zip(h) {
        if hi == 0.0 {
            continue;
        }
        informative = true;
        let pos_ok = if hi > 0.0 { yi == 1.0 } else { yi == 0.0 };
        let neg_ok = if hi > 0.0 { yi == 0.0 } else { yi == 1.0 };
        towards_pos &= pos_ok;
        towards_neg &= neg_ok;
        if !towards_pos && !towards_neg {
            return Ok(());
        }
    }
    if !informative {
        return Err(Error::ConvergenceFailure(
            "clever covariate is identically zero; fluctuation is not identified".into(),
        ));
    }
    Err(Error::ConvergenceFailure(
        "outcome is completely separated along the clever covariate".into(),
    ))
}

/// Logistic fluctuation with offset by Newton–Raphson with step halving.
pub(crate) fn fluctuate_logistic(
    y: &[f64],
    offset: &[f64],
    h: &[f64],
    config: &FluctuationConfig,
) -> Result<f64> {
    check_separation(y, h)?;
    let n = y.len() as f64;
    let loglik = |eps: f64| -> f64 {
        y.iter()
            .zip(offset)
            .zip(h)
            .map(|((&yi, &oi), &hi)| bernoulli_loglik(yi, oi + eps * hi))
            .sum()
    };

    let mut eps = 0.0;
    let mut ll = loglik(eps);
    for _ in 0..config.max_iter {
        let mut score = 0.0;
        let mut info = 0.0;
        for ((&yi, &oi), &hi) in y.iter().zip(offset).zip(h) {
            let p = sigmoid(oi + eps * hi);
            score += hi * (yi - p);
            info += hi * hi * p * (1.0 - p);
        }
        if !(score.is_finite() && info.is_finite()) {
            return Err(Error::ConvergenceFailure("non-finite score in logistic fluctuation".into()));
        }
        if score.abs() <= config.tol * n {
            return Ok(eps);
        }
        if info <= f64::MIN_POSITIVE {
            return Err(Error::ConvergenceFailure(
                "vanishing Fisher information in logistic fluctuation".into(),
            ));
        }

        let step = score / info;
        let mut scale = 1.0;
        let mut accepted = false;
        for _ in 0..50 {
            let trial = eps + scale * step;
            let ll_trial = loglik(trial);
            if ll_trial.is_finite() && ll_trial >= ll - 1e-12 * ll.abs().max(1.0) {
                eps = trial;
                ll = ll_trial;
                accepted = true;
                break;
            }
            scale *= 0.5;
        }
        if !accepted || !eps.is_finite() {
            return Err(Error::ConvergenceFailure("logistic fluctuation line search failed".into()));
        }
    }
    Err(Error::ConvergenceFailure(format!(
        "logistic fluctuation did not converge in {} iterations",
        config.max_iter
    )))
}
