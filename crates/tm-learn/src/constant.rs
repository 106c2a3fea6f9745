//! Covariate-free baselines.
//!
//! Useful as deliberately misspecified nuisance learners and as stacking
//! members that anchor the ensemble at the marginal distribution.

use serde::{Deserialize, Serialize};
use tm_core::{Error, FeatureMatrix, FittedModel, Labels, Learner, Prediction, Result};
use tm_prob::math::mean;

/// Predicts the training mean for every row.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConstantRegressor;

/// Fitted [`ConstantRegressor`].
#[derive(Debug, Clone)]
pub struct ConstantModel {
    /// Training mean.
    pub value: f64,
}

impl FittedModel for ConstantModel {
    fn predict(&self, x: &FeatureMatrix) -> Result<Prediction> {
        Ok(Prediction::Point(vec![self.value; x.n_rows()]))
    }
}

impl Learner for ConstantRegressor {
    fn name(&self) -> String {
        "ConstantRegressor".to_string()
    }

    fn fit(&self, _x: &FeatureMatrix, y: &Labels) -> Result<Box<dyn FittedModel>> {
        let Labels::Continuous(y) = y else {
            return Err(Error::Learner("ConstantRegressor requires continuous labels".into()));
        };
        if y.is_empty() {
            return Err(Error::Validation("y must be non-empty".into()));
        }
        Ok(Box::new(ConstantModel { value: mean(y) }))
    }
}

/// Predicts the training class frequencies for every row.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConstantClassifier;

/// Fitted [`ConstantClassifier`].
#[derive(Debug, Clone)]
pub struct ClassFrequencies {
    /// Empirical class frequencies.
    pub frequencies: Vec<f64>,
}

impl FittedModel for ClassFrequencies {
    fn predict(&self, x: &FeatureMatrix) -> Result<Prediction> {
        let n_classes = self.frequencies.len();
        let mut data = Vec::with_capacity(x.n_rows() * n_classes);
        for _ in 0..x.n_rows() {
            data.extend_from_slice(&self.frequencies);
        }
        Ok(Prediction::Probabilities { n_classes, data })
    }
}

impl Learner for ConstantClassifier {
    fn name(&self) -> String {
        "ConstantClassifier".to_string()
    }

    fn fit(&self, _x: &FeatureMatrix, y: &Labels) -> Result<Box<dyn FittedModel>> {
        let (codes, n_classes) = y.as_categorical().ok_or_else(|| {
            Error::Learner("ConstantClassifier requires a single categorical label".into())
        })?;
        if codes.is_empty() {
            return Err(Error::Validation("y must be non-empty".into()));
        }
        let mut counts = vec![0.0; n_classes];
        for c in codes.iter() {
            let slot = counts
                .get_mut(*c)
                .ok_or_else(|| Error::Validation(format!("class code {} >= n_classes {}", c, n_classes)))?;
            *slot += 1.0;
        }
        let n = codes.len() as f64;
        Ok(Box::new(ClassFrequencies { frequencies: counts.into_iter().map(|c| c / n).collect() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_regressor_predicts_mean() {
        let x = FeatureMatrix::from_rows(vec![vec![0.0], vec![5.0], vec![9.0]]).unwrap();
        let m = ConstantRegressor.fit(&x, &Labels::Continuous(vec![1.0, 2.0, 6.0])).unwrap();
        assert_eq!(m.predict(&x).unwrap(), Prediction::Point(vec![3.0; 3]));
    }

    #[test]
    fn test_constant_classifier_frequencies() {
        let x = FeatureMatrix::from_rows(vec![vec![0.0]; 4]).unwrap();
        let y = Labels::Categorical { codes: vec![0, 1, 1, 1], n_classes: 3 };
        let m = ConstantClassifier.fit(&x, &y).unwrap();
        let p1 = m.predict(&x).unwrap().class_probability(1).unwrap();
        assert_eq!(p1, vec![0.75; 4]);
        let p2 = m.predict(&x).unwrap().class_probability(2).unwrap();
        assert_eq!(p2, vec![0.0; 4]);
    }
}
