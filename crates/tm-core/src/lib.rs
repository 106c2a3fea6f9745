//! # tm-core
//!
//! Shared foundation for targeted estimation: the error taxonomy, the
//! column-oriented data model and the learner capability traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{FittedModel, Learner};
pub use types::{Column, FeatureMatrix, Labels, Prediction, Table};
