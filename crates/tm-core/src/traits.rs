//! Learner capability traits.
//!
//! The estimation engine never depends on a concrete learning algorithm. It
//! fits nuisance parameters through [`Learner`] and reads them back through
//! [`FittedModel`]; any model satisfying these traits (including composites
//! such as stacking ensembles) can be plugged in.

use std::sync::Arc;

use crate::Result;
use crate::types::{FeatureMatrix, Labels, Prediction};

/// Unfitted learning algorithm.
pub trait Learner: Send + Sync {
    /// Human-readable learner name (used in fit logs).
    fn name(&self) -> String;

    /// Fit on `x` (n × p) and `y` (length n).
    fn fit(&self, x: &FeatureMatrix, y: &Labels) -> Result<Box<dyn FittedModel>>;
}

/// Fitted model produced by [`Learner::fit`].
pub trait FittedModel: Send + Sync + std::fmt::Debug {
    /// Predict for every row of `x`.
    fn predict(&self, x: &FeatureMatrix) -> Result<Prediction>;
}

impl<L: Learner + ?Sized> Learner for Box<L> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn fit(&self, x: &FeatureMatrix, y: &Labels) -> Result<Box<dyn FittedModel>> {
        (**self).fit(x, y)
    }
}

impl<L: Learner + ?Sized> Learner for Arc<L> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn fit(&self, x: &FeatureMatrix, y: &Labels) -> Result<Box<dyn FittedModel>> {
        (**self).fit(x, y)
    }
}
