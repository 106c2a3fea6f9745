//! # tm-learn
//!
//! Reference implementations of the learner capability from `tm-core`:
//!
//! - [`LinearRegressor`]: least squares (optionally ridge) for continuous labels
//! - [`LogisticClassifier`]: binary / multinomial logistic regression
//! - [`ConstantRegressor`], [`ConstantClassifier`]: covariate-free baselines
//! - [`Stack`]: k-fold stacked ensemble over any learners
//! - [`FullCategoricalJoint`]: joint encoding of multi-column categorical labels
//! - [`LabelDispatch`]: one learner for mixed continuous / categorical targets
//!
//! Every type implements [`tm_core::Learner`], so composites nest freely,
//! e.g. `FullCategoricalJoint::new(Stack::new(...))`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Covariate-free baselines.
pub mod constant;
/// Label-kind routing.
pub mod dispatch;
/// Joint categorical encoding decorator.
pub mod joint;
/// Least-squares regression.
pub mod linear;
/// Logistic / softmax regression.
pub mod logistic;
/// Stacked generalisation.
pub mod stacking;

pub use constant::{ConstantClassifier, ConstantRegressor};
pub use dispatch::LabelDispatch;
pub use joint::FullCategoricalJoint;
pub use linear::{LinearRegressor, ols_fit};
pub use logistic::LogisticClassifier;
pub use stacking::{Stack, StackConfig};

use tm_core::{Error, FeatureMatrix, Result};

#[inline]
pub(crate) fn validate_rows(x: &FeatureMatrix, n_labels: usize) -> Result<()> {
    if x.n_rows() == 0 {
        return Err(Error::Validation("X/y must be non-empty".to_string()));
    }
    if x.n_rows() != n_labels {
        return Err(Error::Validation(format!(
            "y has wrong length: expected n={}, got {}",
            x.n_rows(),
            n_labels
        )));
    }
    Ok(())
}
