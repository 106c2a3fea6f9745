//! Gaussian linear regression (ordinary / ridge least squares).

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tm_core::{Error, FeatureMatrix, FittedModel, Labels, Learner, Prediction, Result};

use crate::validate_rows;

/// Least-squares regressor for continuous labels.
///
/// Model: `y_i = intercept + X_i * beta + e_i`, fit by solving the
/// (optionally ridge-penalised) normal equations
/// `(X^T X + l2 * I) beta = X^T y`. The intercept is never penalised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegressor {
    /// Prepend an intercept column.
    pub include_intercept: bool,
    /// Ridge penalty on the slope coefficients.
    pub l2: f64,
}

impl Default for LinearRegressor {
    fn default() -> Self {
        Self { include_intercept: true, l2: 0.0 }
    }
}

impl LinearRegressor {
    /// Regressor with an intercept and no penalty.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Fitted [`LinearRegressor`].
#[derive(Debug, Clone)]
pub struct LinearModel {
    /// Coefficients (intercept first when present).
    pub coefficients: Vec<f64>,
    include_intercept: bool,
}

impl LinearModel {
    fn n_features(&self) -> usize {
        self.coefficients.len() - usize::from(self.include_intercept)
    }
}

impl FittedModel for LinearModel {
    fn predict(&self, x: &FeatureMatrix) -> Result<Prediction> {
        if x.n_cols() != self.n_features() {
            return Err(Error::Learner(format!(
                "linear model expects {} features, got {}",
                self.n_features(),
                x.n_cols()
            )));
        }
        let (b0, beta) = if self.include_intercept {
            (self.coefficients[0], &self.coefficients[1..])
        } else {
            (0.0, &self.coefficients[..])
        };
        let out = (0..x.n_rows())
            .map(|i| b0 + x.row(i).iter().zip(beta).map(|(&a, &b)| a * b).sum::<f64>())
            .collect();
        Ok(Prediction::Point(out))
    }
}

impl Learner for LinearRegressor {
    fn name(&self) -> String {
        "LinearRegressor".to_string()
    }

    fn fit(&self, x: &FeatureMatrix, y: &Labels) -> Result<Box<dyn FittedModel>> {
        let Labels::Continuous(y) = y else {
            return Err(Error::Learner("LinearRegressor requires continuous labels".into()));
        };
        let coefficients = ols_fit(x, y, self.include_intercept, self.l2)?;
        Ok(Box::new(LinearModel { coefficients, include_intercept: self.include_intercept }))
    }
}

/// Closed-form (ridge) least squares.
///
/// Accumulates `X^T X` and `X^T y` row by row, then solves with LU.
pub fn ols_fit(x: &FeatureMatrix, y: &[f64], include_intercept: bool, l2: f64) -> Result<Vec<f64>> {
    validate_rows(x, y.len())?;
    if y.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation("y must contain only finite values".to_string()));
    }
    if !(l2 >= 0.0 && l2.is_finite()) {
        return Err(Error::Validation(format!("l2 must be finite and >= 0, got {}", l2)));
    }

    let p = x.n_cols();
    let off = usize::from(include_intercept);
    let d = p + off;
    if d == 0 {
        return Err(Error::Validation("linear model has no parameters".to_string()));
    }

    let mut xtx = vec![0.0; d * d];
    let mut xty = vec![0.0; d];
    for (i, &yi) in y.iter().enumerate() {
        let row = x.row(i);
        if include_intercept {
            xty[0] += yi;
            xtx[0] += 1.0;
        }
        for a in 0..p {
            let xa = row[a];
            xty[off + a] += xa * yi;
            if include_intercept {
                xtx[off + a] += xa;
                xtx[(off + a) * d] += xa;
            }
            for b in 0..p {
                xtx[(off + a) * d + (off + b)] += xa * row[b];
            }
        }
    }
    for a in 0..p {
        xtx[(off + a) * d + (off + a)] += l2;
    }

    let a = DMatrix::from_row_slice(d, d, &xtx);
    let b = DVector::from_vec(xty);
    let sol = a
        .lu()
        .solve(&b)
        .ok_or_else(|| Error::Computation("OLS solve failed (singular XtX)".to_string()))?;
    if sol.iter().any(|v| !v.is_finite()) {
        return Err(Error::Computation("OLS produced non-finite coefficients".to_string()));
    }
    Ok(sol.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ols_recovers_exact_line() {
        let x = FeatureMatrix::from_rows(vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let y = vec![1.0, 3.0, 5.0, 7.0];
        let beta = ols_fit(&x, &y, true, 0.0).unwrap();
        assert!((beta[0] - 1.0).abs() < 1e-10);
        assert!((beta[1] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_ridge_shrinks_slope() {
        let x = FeatureMatrix::from_rows(vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let y = vec![1.0, 3.0, 5.0, 7.0];
        let beta = ols_fit(&x, &y, true, 10.0).unwrap();
        assert!(beta[1] < 2.0 && beta[1] > 0.0);
    }

    #[test]
    fn test_learner_predicts_points() {
        let x = FeatureMatrix::from_rows(vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0], vec![2.0, 1.0]])
            .unwrap();
        let y: Vec<f64> = (0..4).map(|i| 0.5 + 2.0 * x.row(i)[0] - x.row(i)[1]).collect();
        let model = LinearRegressor::new().fit(&x, &Labels::Continuous(y.clone())).unwrap();
        let pred = model.predict(&x).unwrap().into_point().unwrap();
        for (p, t) in pred.iter().zip(&y) {
            assert!((p - t).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rejects_categorical_labels() {
        let x = FeatureMatrix::from_rows(vec![vec![0.0], vec![1.0]]).unwrap();
        let y = Labels::Categorical { codes: vec![0, 1], n_classes: 2 };
        assert!(matches!(LinearRegressor::new().fit(&x, &y), Err(Error::Learner(_))));
    }

    #[test]
    fn test_singular_design_is_computation_error() {
        let x = FeatureMatrix::from_rows(vec![vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]]).unwrap();
        let err = ols_fit(&x, &[1.0, 2.0, 3.0], false, 0.0);
        assert!(err.is_err());
    }
}
