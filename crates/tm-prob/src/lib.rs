//! Probability building blocks for targeted estimation.
//!
//! - small numeric helpers (stable log/exp/sigmoid/logit primitives)
//! - standard normal CDF/quantile used by influence-curve Z-tests

pub mod math;
pub mod normal;
