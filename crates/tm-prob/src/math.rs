//! Small numerically-stable math utilities used by learners and the
//! fluctuation step.

/// Stable `log(1 + exp(x))`.
///
/// Branchless: `log(1+exp(x)) = max(x,0) + log(1+exp(-|x|))`.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    let abs_x = x.abs();
    let e = (-abs_x).exp(); // always in (0, 1], no overflow
    x.max(0.0) + e.ln_1p()
}

/// Stable sigmoid (expit): `1 / (1 + exp(-x))`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let abs_x = x.abs();
    let e = (-abs_x).exp();
    let recip = 1.0 / (1.0 + e);
    // x >= 0: recip; x < 0: exp(x)/(1+exp(x)) = e*recip
    if x >= 0.0 { recip } else { e * recip }
}

/// Logit: `ln(p / (1 - p))`. Callers clamp `p` away from 0 and 1.
#[inline]
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Clamp a probability into `[eps, 1 - eps]`.
#[inline]
pub fn clamp_probability(p: f64, eps: f64) -> f64 {
    p.clamp(eps, 1.0 - eps)
}

/// Bernoulli log-likelihood of a (possibly fractional) outcome `y` at logit `eta`.
///
/// `y * eta - log(1 + exp(eta))`.
#[inline]
pub fn bernoulli_loglik(y: f64, eta: f64) -> f64 {
    y * eta - log1pexp(eta)
}

/// Arithmetic mean (NaN for empty input).
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Unbiased sample variance (`n - 1` denominator; NaN for fewer than 2 values).
pub fn sample_variance(xs: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(xs);
    xs.iter().map(|&x| (x - m) * (x - m)).sum::<f64>() / (n - 1) as f64
}

/// Numerically stable softmax of `logits` written into `out`.
pub fn softmax_into(logits: &[f64], out: &mut [f64]) {
    debug_assert_eq!(logits.len(), out.len());
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for (o, &l) in out.iter_mut().zip(logits) {
        *o = (l - max).exp();
        total += *o;
    }
    for o in out.iter_mut() {
        *o /= total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log1pexp_matches_naive_moderate_values() {
        let xs: [f64; 7] = [-10.0, -2.0, -0.1, 0.0, 0.1, 2.0, 10.0];
        for x in xs {
            let naive = (1.0 + x.exp()).ln();
            let stable = log1pexp(x);
            assert!((naive - stable).abs() < 1e-12, "x={}: {} vs {}", x, naive, stable);
        }
    }

    #[test]
    fn test_log1pexp_is_finite_extremes() {
        for x in [-1e6, -100.0, 100.0, 1e6] {
            assert!(log1pexp(x).is_finite(), "x={}", x);
        }
        assert!((log1pexp(1e6) - 1e6).abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid_bounds_and_symmetry() {
        for x in [-50.0, -10.0, -1.0, 0.0, 1.0, 10.0, 50.0] {
            let s = sigmoid(x);
            assert!((0.0..=1.0).contains(&s), "sigmoid({})={}", x, s);
            assert!((s + sigmoid(-x) - 1.0).abs() < 1e-15, "symmetry failed at {}", x);
        }
    }

    #[test]
    fn test_logit_inverts_sigmoid() {
        for x in [-8.0, -1.5, 0.0, 0.3, 4.0] {
            assert!((logit(sigmoid(x)) - x).abs() < 1e-9, "x={}", x);
        }
    }

    #[test]
    fn test_clamp_probability() {
        assert_eq!(clamp_probability(0.0, 0.01), 0.01);
        assert_eq!(clamp_probability(1.0, 0.01), 0.99);
        assert_eq!(clamp_probability(0.4, 0.01), 0.4);
    }

    #[test]
    fn test_mean_and_variance() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(mean(&xs), 2.5);
        assert!((sample_variance(&xs) - 5.0 / 3.0).abs() < 1e-15);
        assert!(sample_variance(&[1.0]).is_nan());
    }

    #[test]
    fn test_softmax_sums_to_one_and_handles_large_logits() {
        let mut out = [0.0; 3];
        softmax_into(&[1000.0, 1000.0, 0.0], &mut out);
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-15);
        assert!((out[0] - 0.5).abs() < 1e-12);
    }
}
