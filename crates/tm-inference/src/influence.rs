//! Influence-curve based inference: standard errors, Z-tests, intervals.
//!
//! For a targeted estimate `psi` the efficient influence curve at observation
//! `i` is
//!
//! `D_i = H_i (Y_i - Q*(T_i, W_i)) + sum_v sign_v Q*(v, W_i) - psi`
//!
//! and `sqrt(var(D) / n)` is the asymptotic standard error of `psi`.
//! Tests are Z-tests on the per-observation values `psi + D_i`, so the same
//! machinery covers single estimates and paired comparisons of two
//! estimates computed on the same observations.

use serde::{Deserialize, Serialize};
use tm_core::{Error, Result};
use tm_prob::math::{mean, sample_variance};
use tm_prob::normal;

use crate::config::{Tail, validate_alpha};
use crate::targeting::TargetedEstimate;

/// Per-observation influence curve of a targeted estimate.
pub fn influence_curve(est: &TargetedEstimate, y: &[f64]) -> Vec<f64> {
    est.h_observed
        .iter()
        .zip(&est.q_star_observed)
        .zip(&est.q_star_contrast)
        .zip(y)
        .map(|(((&h, &q), &c), &yi)| h * (yi - q) + c - est.estimate)
        .collect()
}

/// Outcome of a one-sample or paired Z-test.
///
/// Infinite values (a degenerate statistic, the open end of a one-sided
/// interval) serialize as the strings `"inf"` and `"-inf"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZTestResult {
    /// `mean / stderror`.
    #[serde(with = "extended_float")]
    pub statistic: f64,
    /// P-value under the configured tail.
    pub pvalue: f64,
    /// Confidence interval for the mean (half-open for one-sided tails).
    #[serde(with = "extended_float::pair")]
    pub confint: (f64, f64),
    /// Sample mean of the tested values.
    pub estimate: f64,
    /// `sqrt(sample_variance / n)`.
    pub stderror: f64,
    /// Number of observations.
    pub n_obs: usize,
    /// Alternative hypothesis.
    pub tail: Tail,
    /// Significance level of `confint`.
    pub alpha: f64,
}

/// Serde adapter for `f64` values that may be infinite or NaN.
///
/// JSON numbers cannot hold them, so they are written as `"inf"`, `"-inf"`
/// and `"nan"`. Finite values stay plain numbers.
pub(crate) mod extended_float {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    fn encode(x: f64) -> Repr {
        if x.is_finite() {
            Repr::Number(x)
        } else if x.is_nan() {
            Repr::Text("nan".into())
        } else if x > 0.0 {
            Repr::Text("inf".into())
        } else {
            Repr::Text("-inf".into())
        }
    }

    fn decode<E: serde::de::Error>(r: Repr) -> Result<f64, E> {
        match r {
            Repr::Number(x) => Ok(x),
            Repr::Text(t) => match t.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(E::custom(format!("invalid float '{}'", other))),
            },
        }
    }

    pub(crate) fn serialize<S: Serializer>(x: &f64, s: S) -> Result<S::Ok, S::Error> {
        encode(*x).serialize(s)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        decode(Repr::deserialize(d)?)
    }

    /// The same encoding for `(lower, upper)` intervals.
    pub(crate) mod pair {
        use super::*;

        pub(crate) fn serialize<S: Serializer>(x: &(f64, f64), s: S) -> Result<S::Ok, S::Error> {
            (encode(x.0), encode(x.1)).serialize(s)
        }

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<(f64, f64), D::Error> {
            let (lo, hi) = <(Repr, Repr)>::deserialize(d)?;
            Ok((decode::<D::Error>(lo)?, decode::<D::Error>(hi)?))
        }
    }
}

/// Standard error of the mean of `values` (`n - 1` variance denominator).
pub fn stderror(values: &[f64]) -> f64 {
    (sample_variance(values) / values.len() as f64).sqrt()
}

/// Confidence interval centred on `center`.
///
/// `Both` uses `z_{1 - alpha/2}`; one-sided tails use `z_{1 - alpha}` and are
/// unbounded on the side of the alternative.
pub fn confidence_interval(center: f64, stderror: f64, tail: Tail, alpha: f64) -> Result<(f64, f64)> {
    validate_alpha(alpha)?;
    Ok(match tail {
        Tail::Both => {
            let z = normal::quantile(1.0 - alpha / 2.0)?;
            (center - z * stderror, center + z * stderror)
        }
        Tail::Right => (center - normal::quantile(1.0 - alpha)? * stderror, f64::INFINITY),
        Tail::Left => (f64::NEG_INFINITY, center + normal::quantile(1.0 - alpha)? * stderror),
    })
}

/// P-value of a standard normal statistic.
pub fn pvalue(statistic: f64, tail: Tail) -> f64 {
    match tail {
        Tail::Right => normal::sf(statistic),
        Tail::Left => normal::cdf(statistic),
        Tail::Both => (2.0 * normal::sf(statistic.abs())).min(1.0),
    }
}

/// One-sample Z-test of `H0: E[values] = 0`.
///
/// A zero-variance sample gives statistic 0 and p-value 1 when its mean is
/// 0, otherwise an infinite statistic.
pub fn one_sample_ztest(values: &[f64], tail: Tail, alpha: f64) -> Result<ZTestResult> {
    let n = values.len();
    if n < 2 {
        return Err(Error::Validation(format!("Z-test needs at least 2 observations, got {}", n)));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(Error::Computation("Z-test input contains non-finite values".into()));
    }
    let m = mean(values);
    let se = stderror(values);
    let (statistic, p) = if se > 0.0 {
        let z = m / se;
        (z, pvalue(z, tail))
    } else if m == 0.0 {
        (0.0, 1.0)
    } else {
        let z = m.signum() * f64::INFINITY;
        (z, pvalue(z, tail))
    };
    Ok(ZTestResult {
        statistic,
        pvalue: p,
        confint: confidence_interval(m, se, tail, alpha)?,
        estimate: m,
        stderror: se,
        n_obs: n,
        tail,
        alpha,
    })
}

/// Paired Z-test of `H0: E[a - b] = 0`.
pub fn paired_ztest(a: &[f64], b: &[f64], tail: Tail, alpha: f64) -> Result<ZTestResult> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch { left: a.len(), right: b.len() });
    }
    let diff: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    one_sample_ztest(&diff, tail, alpha)
}
