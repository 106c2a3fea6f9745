//! Full categorical joint encoding for vector-valued categorical labels.
//!
//! `FullCategoricalJoint` wraps any classifier. Each observed tuple of codes
//! `(t_1, ..., t_k)` becomes one class of a single categorical label, so the
//! wrapped classifier estimates the joint distribution `p(T | W)` directly
//! instead of a product of marginals. Tuples never observed in training get
//! probability zero.

use std::collections::BTreeSet;

use tm_core::{Error, FeatureMatrix, FittedModel, Labels, Learner, Prediction, Result};

/// Joint-encoding decorator around a classifier.
#[derive(Debug, Clone)]
pub struct FullCategoricalJoint<L> {
    inner: L,
}

impl<L: Learner> FullCategoricalJoint<L> {
    /// Wrap `inner`.
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    /// The wrapped classifier.
    pub fn inner(&self) -> &L {
        &self.inner
    }
}

/// Fitted [`FullCategoricalJoint`].
#[derive(Debug)]
pub struct FittedJoint {
    combinations: Vec<Vec<usize>>,
    inner: Box<dyn FittedModel>,
}

impl FittedJoint {
    /// Observed code tuples, in class order.
    pub fn combinations(&self) -> &[Vec<usize>] {
        &self.combinations
    }
}

impl FittedModel for FittedJoint {
    fn predict(&self, x: &FeatureMatrix) -> Result<Prediction> {
        let k = self.combinations.len();
        let data = match self.inner.predict(x)? {
            Prediction::Probabilities { n_classes, data } if n_classes == k => data,
            Prediction::Probabilities { n_classes, .. } => {
                return Err(Error::Learner(format!(
                    "joint classifier predicted {} classes, expected {}",
                    n_classes, k
                )));
            }
            _ => return Err(Error::Learner("joint classifier must predict probabilities".into())),
        };
        Ok(Prediction::Joint { combinations: self.combinations.clone(), data })
    }
}

impl<L: Learner> Learner for FullCategoricalJoint<L> {
    fn name(&self) -> String {
        format!("FullCategoricalJoint({})", self.inner.name())
    }

    fn fit(&self, x: &FeatureMatrix, y: &Labels) -> Result<Box<dyn FittedModel>> {
        let tuples: Vec<Vec<usize>> = match y {
            Labels::MultiCategorical { codes, .. } => codes.clone(),
            Labels::Categorical { codes, .. } => codes.iter().map(|&c| vec![c]).collect(),
            Labels::Continuous(_) => {
                return Err(Error::Learner("FullCategoricalJoint requires categorical labels".into()));
            }
        };
        let combinations: Vec<Vec<usize>> =
            tuples.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let codes: Vec<usize> = tuples
            .iter()
            .map(|t| combinations.binary_search(t).unwrap_or_default())
            .collect();
        log::debug!("joint encoding: {} observed combinations", combinations.len());
        let inner =
            self.inner.fit(x, &Labels::Categorical { codes, n_classes: combinations.len() })?;
        Ok(Box::new(FittedJoint { combinations, inner }))
    }
}
