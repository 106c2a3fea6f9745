//! Standard normal distribution utilities for Z-tests.

use statrs::distribution::{ContinuousCDF, Normal};
use tm_core::{Error, Result};

/// Standard normal CDF via erfc.
#[inline]
pub fn cdf(x: f64) -> f64 {
    0.5 * statrs::function::erf::erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal survival function `1 - cdf(x)`, accurate in the upper tail.
#[inline]
pub fn sf(x: f64) -> f64 {
    0.5 * statrs::function::erf::erfc(x / std::f64::consts::SQRT_2)
}

/// Standard normal quantile (inverse CDF).
pub fn quantile(p: f64) -> Result<f64> {
    if !(p > 0.0 && p < 1.0) {
        return Err(Error::Validation(format!("quantile probability must be in (0, 1), got {}", p)));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| Error::Computation(e.to_string()))?;
    Ok(normal.inverse_cdf(p))
}
