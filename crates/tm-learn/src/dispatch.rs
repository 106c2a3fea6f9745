//! Route fits by label kind.

use tm_core::{FeatureMatrix, FittedModel, Labels, Learner, Result};

/// Fits continuous labels with `regressor` and categorical labels with
/// `classifier`, so one learner can serve a mix of continuous and binary
/// targets.
#[derive(Debug, Clone)]
pub struct LabelDispatch<R, C> {
    regressor: R,
    classifier: C,
}

impl<R: Learner, C: Learner> LabelDispatch<R, C> {
    /// Pair a regressor with a classifier.
    pub fn new(regressor: R, classifier: C) -> Self {
        Self { regressor, classifier }
    }
}

impl<R: Learner, C: Learner> Learner for LabelDispatch<R, C> {
    fn name(&self) -> String {
        format!("LabelDispatch({}, {})", self.regressor.name(), self.classifier.name())
    }

    fn fit(&self, x: &FeatureMatrix, y: &Labels) -> Result<Box<dyn FittedModel>> {
        match y {
            Labels::Continuous(_) => self.regressor.fit(x, y),
            _ => self.classifier.fit(x, y),
        }
    }
}
