//! # tm-inference
//!
//! Targeted minimum-loss estimation (TMLE) of causal contrasts.
//!
//! This crate provides:
//! - Nuisance estimation: one treatment-mechanism fit and one outcome
//!   regression per target, memoised for the whole batch
//! - Targeting: logistic or linear fluctuation along the clever covariate
//! - Inference: influence-curve standard errors, Z-tests, paired comparisons
//! - Reports: a (target × query) matrix with per-cell errors
//!
//! ## Architecture
//!
//! Learners are injected as `tm_core::Learner` trait objects; this crate never
//! depends on concrete learner implementations.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Estimator configuration and test tails.
pub mod config;
mod design;
/// Batch estimation entry points.
pub mod estimator;
/// Influence curves, Z-tests and confidence intervals.
pub mod influence;
/// Nuisance fits and their memo table.
pub mod nuisance;
/// Causal queries and contrast kinds.
pub mod query;
/// Reports and the batch result matrix.
pub mod report;
/// Clever covariate and fluctuation.
pub mod targeting;

pub use config::{EstimatorConfig, FluctuationConfig, Tail};
pub use estimator::{TmleEstimator, estimate};
pub use influence::{ZTestResult, one_sample_ztest, paired_ztest};
pub use nuisance::{FitKey, FitLog, FitRecord};
pub use query::{Contrast, Query};
pub use report::{Report, ReportMatrix, ReportSummary, compare};
pub use targeting::{Link, TargetedEstimate};
