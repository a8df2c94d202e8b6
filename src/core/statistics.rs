//! Order statistics and summary statistics over finite raster samples,
//! plus the special functions the trend significance test needs.

use crate::types::{ClassMask, SarReal};
use ndarray::{ArrayView2, Zip};
use serde::{Deserialize, Serialize};

/// Backscatter summary over a set of samples (dB). Empty sets give NaN fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackscatterStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl BackscatterStats {
    pub fn empty() -> Self {
        Self {
            count: 0,
            mean: f64::NAN,
            median: f64::NAN,
            std: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
        }
    }

    /// Summary of the finite entries of `values`
    pub fn from_values(values: &[f64]) -> Self {
        let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Self::empty();
        }
        finite.sort_by(f64::total_cmp);

        let (mean, std) = mean_std(&finite);
        Self {
            count: finite.len(),
            mean,
            median: percentile_sorted(&finite, 50.0),
            std,
            min: finite[0],
            max: finite[finite.len() - 1],
        }
    }

    /// Summary of the finite samples of `image` where `mask` is set
    pub fn from_masked(image: ArrayView2<'_, SarReal>, mask: &ClassMask) -> Self {
        let mut values = Vec::new();
        Zip::from(image).and(mask).for_each(|&v, &m| {
            if m && v.is_finite() {
                values.push(v as f64);
            }
        });
        Self::from_values(&values)
    }
}

/// Finite samples of a raster as f64
pub fn finite_values(image: ArrayView2<'_, SarReal>) -> Vec<f64> {
    image.iter().filter(|v| v.is_finite()).map(|&v| v as f64).collect()
}

/// Population mean and standard deviation. NaN for an empty slice.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Percentile (0-100) of an ascending slice with linear interpolation between ranks
pub fn percentile_sorted(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let p = percentile.clamp(0.0, 100.0);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Several percentiles of the finite entries of `values`, sorting once
pub fn percentiles(values: &[f64], percentiles: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    percentiles.iter().map(|&p| percentile_sorted(&sorted, p)).collect()
}

/// Natural log of the gamma function (Lanczos, g = 7)
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection formula
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut sum = COEFFS[0];
    for (i, &c) in COEFFS.iter().enumerate().skip(1) {
        sum += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

/// Regularized incomplete beta function I_x(a, b)
pub fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges fastest on this side of the mean
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Modified Lentz evaluation of the incomplete beta continued fraction
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 1e-15;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }

    h
}

/// Two-sided tail probability P(|T| >= |t|) of Student's t with `dof` degrees of freedom
pub fn student_t_two_sided_p(t: f64, dof: f64) -> f64 {
    if t.is_nan() || dof <= 0.0 {
        return f64::NAN;
    }
    if t.is_infinite() {
        return 0.0;
    }
    let x = dof / (dof + t * t);
    incomplete_beta(0.5 * dof, 0.5, x).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_percentile_matches_linear_interpolation() {
        let values: Vec<f64> = (1..=5).map(|v| v as f64).collect();
        assert_relative_eq!(percentile_sorted(&values, 50.0), 3.0);
        assert_relative_eq!(percentile_sorted(&values, 25.0), 2.0);
        assert_relative_eq!(percentile_sorted(&values, 10.0), 1.4, epsilon = 1e-12);
        assert_relative_eq!(percentile_sorted(&values, 100.0), 5.0);
    }

    #[test]
    fn test_percentiles_skip_non_finite() {
        let values = vec![f64::NAN, 4.0, 1.0, f64::INFINITY, 2.0, 3.0];
        let p = percentiles(&values, &[0.0, 100.0]);
        assert_eq!(p, vec![1.0, 4.0]);
    }

    #[test]
    fn test_backscatter_stats_empty_is_nan() {
        let stats = BackscatterStats::from_values(&[f64::NAN]);
        assert_eq!(stats.count, 0);
        assert!(stats.mean.is_nan() && stats.median.is_nan() && stats.max.is_nan());
    }

    #[test]
    fn test_masked_stats() {
        let image = array![[-10.0f32, -12.0], [f32::NAN, -20.0]];
        let mask = array![[true, true], [true, false]];
        let stats = BackscatterStats::from_masked(image.view(), &mask);
        assert_eq!(stats.count, 2);
        assert_relative_eq!(stats.mean, -11.0);
        assert_relative_eq!(stats.std, 1.0);
        assert_relative_eq!(stats.min, -12.0);
    }

    #[test]
    fn test_ln_gamma_known_values() {
        assert_relative_eq!(ln_gamma(1.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(ln_gamma(5.0), 24.0f64.ln(), epsilon = 1e-10);
        assert_relative_eq!(ln_gamma(0.5), std::f64::consts::PI.sqrt().ln(), epsilon = 1e-10);
    }

    #[test]
    fn test_student_t_p_values() {
        // t = 0 is never significant
        assert_relative_eq!(student_t_two_sided_p(0.0, 5.0), 1.0, epsilon = 1e-12);
        // Cauchy case (1 dof): P(|T| > 1) = 0.5
        assert_relative_eq!(student_t_two_sided_p(1.0, 1.0), 0.5, epsilon = 1e-9);
        // Tabulated: t = 2.228 at 10 dof is the two-sided 5% point
        assert_relative_eq!(student_t_two_sided_p(2.228_138_85, 10.0), 0.05, epsilon = 1e-6);
    }
}
