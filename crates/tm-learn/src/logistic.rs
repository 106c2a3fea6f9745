//! Multinomial logistic regression fit by penalised Newton–Raphson.
//!
//! Model (reference class = first observed class):
//! `P(y_i = c | x_i) = softmax_c(eta_i)`, `eta_i0 = 0`,
//! `eta_ic = intercept_c + x_i * beta_c` for the remaining classes.
//!
//! With two classes this is ordinary logistic regression with logit link.
//! A small ridge penalty on the slopes keeps the Hessian positive definite
//! and the coefficients finite under separation.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tm_core::{Error, FeatureMatrix, FittedModel, Labels, Learner, Prediction, Result};
use tm_prob::math::softmax_into;

use crate::validate_rows;

/// Logistic / softmax classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticClassifier {
    /// Fit per-class intercepts.
    pub include_intercept: bool,
    /// Ridge penalty on slope coefficients.
    pub l2: f64,
    /// Maximum Newton iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the max-abs gradient (per observation).
    pub tol: f64,
}

impl Default for LogisticClassifier {
    fn default() -> Self {
        Self { include_intercept: true, l2: 1e-4, max_iter: 100, tol: 1e-10 }
    }
}

impl LogisticClassifier {
    /// Classifier with default settings.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Fitted [`LogisticClassifier`].
#[derive(Debug, Clone)]
pub struct LogisticModel {
    /// Declared number of classes.
    n_classes: usize,
    /// Observed classes (sorted); index 0 is the reference.
    observed: Vec<usize>,
    /// Coefficient blocks for `observed[1..]`, each of length `d`.
    coefficients: Vec<Vec<f64>>,
    include_intercept: bool,
    n_features: usize,
    /// Whether Newton reached tolerance.
    pub converged: bool,
}

impl LogisticModel {
    fn eta(&self, row: &[f64], beta: &[f64]) -> f64 {
        let (b0, slopes) =
            if self.include_intercept { (beta[0], &beta[1..]) } else { (0.0, beta) };
        b0 + row.iter().zip(slopes).map(|(&a, &b)| a * b).sum::<f64>()
    }
}

impl FittedModel for LogisticModel {
    fn predict(&self, x: &FeatureMatrix) -> Result<Prediction> {
        if x.n_cols() != self.n_features {
            return Err(Error::Learner(format!(
                "logistic model expects {} features, got {}",
                self.n_features,
                x.n_cols()
            )));
        }
        let k = self.observed.len();
        let mut data = vec![0.0; x.n_rows() * self.n_classes];
        let mut logits = vec![0.0; k];
        let mut probs = vec![0.0; k];
        for i in 0..x.n_rows() {
            let row = x.row(i);
            for (c, beta) in self.coefficients.iter().enumerate() {
                logits[c + 1] = self.eta(row, beta);
            }
            softmax_into(&logits, &mut probs);
            let out = &mut data[i * self.n_classes..(i + 1) * self.n_classes];
            for (j, &class) in self.observed.iter().enumerate() {
                out[class] = probs[j];
            }
        }
        Ok(Prediction::Probabilities { n_classes: self.n_classes, data })
    }
}

impl Learner for LogisticClassifier {
    fn name(&self) -> String {
        "LogisticClassifier".to_string()
    }

    fn fit(&self, x: &FeatureMatrix, y: &Labels) -> Result<Box<dyn FittedModel>> {
        let (codes, n_classes) = y.as_categorical().ok_or_else(|| {
            Error::Learner("LogisticClassifier requires a single categorical label".into())
        })?;
        validate_rows(x, codes.len())?;
        if let Some(&bad) = codes.iter().find(|&&c| c >= n_classes) {
            return Err(Error::Validation(format!("class code {} >= n_classes {}", bad, n_classes)));
        }
        if !(self.l2 >= 0.0 && self.l2.is_finite()) {
            return Err(Error::Validation(format!("l2 must be finite and >= 0, got {}", self.l2)));
        }
        Ok(Box::new(self.newton(x, &codes, n_classes)?))
    }
}

impl LogisticClassifier {
    fn newton(&self, x: &FeatureMatrix, codes: &[usize], n_classes: usize) -> Result<LogisticModel> {
        let n = x.n_rows();
        let p = x.n_cols();
        let off = usize::from(self.include_intercept);
        let d = p + off;

        let mut seen = vec![false; n_classes];
        for &c in codes {
            seen[c] = true;
        }
        let observed: Vec<usize> = (0..n_classes).filter(|&c| seen[c]).collect();
        let k = observed.len();
        let mut model = LogisticModel {
            n_classes,
            observed: observed.clone(),
            coefficients: vec![vec![0.0; d]; k.saturating_sub(1)],
            include_intercept: self.include_intercept,
            n_features: p,
            converged: true,
        };
        if k < 2 || d == 0 {
            return Ok(model);
        }

        let mut index = vec![0usize; n_classes];
        for (j, &c) in observed.iter().enumerate() {
            index[c] = j;
        }
        let y: Vec<usize> = codes.iter().map(|&c| index[c]).collect();

        let dim = (k - 1) * d;
        let mut beta = vec![0.0; dim];
        let mut ll = self.penalised_loglik(x, &y, k, &beta);
        let mut converged = false;

        let mut xt = vec![0.0; d];
        let mut logits = vec![0.0; k];
        let mut probs = vec![0.0; k];

        for iter in 0..self.max_iter {
            let mut grad = vec![0.0; dim];
            let mut hess = vec![0.0; dim * dim];

            for i in 0..n {
                augmented_row(x.row(i), self.include_intercept, &mut xt);
                softmax_row(&xt, &beta, k, d, &mut logits, &mut probs);
                for a in 0..k - 1 {
                    let pa = probs[a + 1];
                    let resid = if y[i] == a + 1 { 1.0 } else { 0.0 } - pa;
                    for u in 0..d {
                        grad[a * d + u] += xt[u] * resid;
                    }
                    for b in 0..k - 1 {
                        let pb = probs[b + 1];
                        let w = if a == b { pa * (1.0 - pa) } else { -pa * pb };
                        if w == 0.0 {
                            continue;
                        }
                        for u in 0..d {
                            let wu = w * xt[u];
                            let r = (a * d + u) * dim + b * d;
                            for v in 0..d {
                                hess[r + v] += wu * xt[v];
                            }
                        }
                    }
                }
            }
            for a in 0..k - 1 {
                for u in off..d {
                    let j = a * d + u;
                    grad[j] -= self.l2 * beta[j];
                    hess[j * dim + j] += self.l2;
                }
            }

            let max_grad = grad.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
            if max_grad <= self.tol * n as f64 {
                converged = true;
                break;
            }

            let h = DMatrix::from_row_slice(dim, dim, &hess);
            let g = DVector::from_vec(grad);
            let step = match h.clone().cholesky() {
                Some(ch) => ch.solve(&g),
                None => h.lu().solve(&g).ok_or_else(|| {
                    Error::Computation("logistic Newton step failed (singular Hessian)".into())
                })?,
            };

            // Step halving until the penalised log-likelihood does not decrease.
            let mut scale = 1.0;
            let mut accepted = false;
            for _ in 0..30 {
                let trial: Vec<f64> = beta.iter().zip(step.iter()).map(|(b, s)| b + scale * s).collect();
                let ll_trial = self.penalised_loglik(x, &y, k, &trial);
                if ll_trial.is_finite() && ll_trial >= ll - 1e-12 * ll.abs().max(1.0) {
                    let delta = ll_trial - ll;
                    beta = trial;
                    ll = ll_trial;
                    accepted = true;
                    if delta.abs() <= 1e-14 * ll.abs().max(1.0) {
                        converged = true;
                    }
                    break;
                }
                scale *= 0.5;
            }
            if !accepted || converged {
                converged = converged || !accepted;
                log::debug!("logistic: stopped after {} Newton iterations", iter + 1);
                break;
            }
        }

        if !converged {
            log::warn!("logistic: Newton did not converge in {} iterations", self.max_iter);
        }
        if beta.iter().any(|v| !v.is_finite()) {
            return Err(Error::Computation("logistic fit produced non-finite coefficients".into()));
        }
        model.coefficients = beta.chunks_exact(d).map(<[f64]>::to_vec).collect();
        model.converged = converged;
        Ok(model)
    }

    fn penalised_loglik(&self, x: &FeatureMatrix, y: &[usize], k: usize, beta: &[f64]) -> f64 {
        let d = beta.len() / (k - 1);
        let off = usize::from(self.include_intercept);
        let mut xt = vec![0.0; d];
        let mut logits = vec![0.0; k];
        let mut ll = 0.0;
        for (i, &yi) in y.iter().enumerate() {
            augmented_row(x.row(i), self.include_intercept, &mut xt);
            logits[0] = 0.0;
            for a in 0..k - 1 {
                logits[a + 1] = dot(&xt, &beta[a * d..(a + 1) * d]);
            }
            let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let lse = max + logits.iter().map(|l| (l - max).exp()).sum::<f64>().ln();
            ll += logits[yi] - lse;
        }
        let mut penalty = 0.0;
        for a in 0..k - 1 {
            for u in off..d {
                penalty += beta[a * d + u] * beta[a * d + u];
            }
        }
        ll - 0.5 * self.l2 * penalty
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}

#[inline]
fn augmented_row(row: &[f64], include_intercept: bool, out: &mut [f64]) {
    if include_intercept {
        out[0] = 1.0;
        out[1..].copy_from_slice(row);
    } else {
        out.copy_from_slice(row);
    }
}

#[inline]
fn softmax_row(xt: &[f64], beta: &[f64], k: usize, d: usize, logits: &mut [f64], probs: &mut [f64]) {
    logits[0] = 0.0;
    for a in 0..k - 1 {
        logits[a + 1] = dot(xt, &beta[a * d..(a + 1) * d]);
    }
    softmax_into(logits, probs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use tm_prob::math::sigmoid;

    fn simulate_binary(n: usize, seed: u64) -> (FeatureMatrix, Vec<usize>) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut rows = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        for _ in 0..n {
            let x: f64 = rng.random::<f64>() * 4.0 - 2.0;
            let p = sigmoid(-0.5 + 1.5 * x);
            y.push(usize::from(rng.random::<f64>() < p));
            rows.push(vec![x]);
        }
        (FeatureMatrix::from_rows(rows).unwrap(), y)
    }

    #[test]
    fn test_binary_recovers_coefficients() {
        let (x, y) = simulate_binary(20_000, 7);
        let fitted = LogisticClassifier::new().newton(&x, &y, 2).unwrap();
        assert!(fitted.converged);
        let beta = &fitted.coefficients[0];
        assert!((beta[0] + 0.5).abs() < 0.1, "intercept={}", beta[0]);
        assert!((beta[1] - 1.5).abs() < 0.1, "slope={}", beta[1]);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let x = FeatureMatrix::from_rows((0..30).map(|i| vec![(i % 5) as f64]).collect()).unwrap();
        let codes: Vec<usize> = (0..30).map(|i| i % 3).collect();
        let model = LogisticClassifier::new()
            .fit(&x, &Labels::Categorical { codes, n_classes: 3 })
            .unwrap();
        let Prediction::Probabilities { n_classes, data } = model.predict(&x).unwrap() else {
            panic!("expected probabilities");
        };
        assert_eq!(n_classes, 3);
        for row in data.chunks_exact(3) {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_unobserved_class_gets_zero_probability() {
        let x = FeatureMatrix::from_rows(vec![vec![0.0], vec![1.0], vec![0.5], vec![0.2]]).unwrap();
        let y = Labels::Categorical { codes: vec![0, 2, 2, 0], n_classes: 3 };
        let model = LogisticClassifier::new().fit(&x, &y).unwrap();
        let p1 = model.predict(&x).unwrap().class_probability(1).unwrap();
        assert!(p1.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_single_observed_class_is_certain() {
        let x = FeatureMatrix::from_rows(vec![vec![0.0], vec![1.0]]).unwrap();
        let y = Labels::Categorical { codes: vec![1, 1], n_classes: 2 };
        let model = LogisticClassifier::new().fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap().class_probability(1).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_separable_data_stays_finite() {
        let x = FeatureMatrix::from_rows(vec![vec![-2.0], vec![-1.0], vec![1.0], vec![2.0]]).unwrap();
        let y = Labels::Categorical { codes: vec![0, 0, 1, 1], n_classes: 2 };
        let model = LogisticClassifier::new().fit(&x, &y).unwrap();
        let p = model.predict(&x).unwrap().class_probability(1).unwrap();
        assert!(p.iter().all(|v| v.is_finite()));
        assert!(p[3] > 0.99 && p[0] < 0.01);
    }

    #[test]
    fn test_rejects_continuous_labels() {
        let x = FeatureMatrix::from_rows(vec![vec![0.0]]).unwrap();
        assert!(LogisticClassifier::new().fit(&x, &Labels::Continuous(vec![0.3])).is_err());
    }
}
