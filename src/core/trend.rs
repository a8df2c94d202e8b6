use crate::core::statistics::{mean_std, student_t_two_sided_p};
use crate::types::{ConfigurationError, RegressionError, SarResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Fewest observations for a line fit
pub const MIN_OBSERVATIONS: usize = 2;

/// Keeps the t statistic finite for a perfect fit
const TINY: f64 = 1e-20;

/// Trend fitting parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendParams {
    /// Days per year used to annualise the per-day slope
    pub days_per_year: f64,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self { days_per_year: 365.25 }
    }
}

impl TrendParams {
    pub fn validate(&self) -> SarResult<()> {
        if !(self.days_per_year > 0.0) || !self.days_per_year.is_finite() {
            return Err(ConfigurationError::InvalidParameter(
                format!("days per year must be positive, got {}", self.days_per_year)
            ).into());
        }
        Ok(())
    }
}

/// Least-squares trend of a dated series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    /// Change per day
    pub slope: f64,
    /// Fitted value at the first date
    pub intercept: f64,
    /// slope × days per year
    pub annual_rate: f64,
    /// Annual rate relative to the first value, NaN for a zero baseline
    pub annual_rate_percent: f64,
    pub r_value: f64,
    pub r_squared: f64,
    /// Two-sided p-value of a zero slope
    pub p_value: f64,
    /// Standard error of the slope
    pub std_error: f64,
    pub observations: usize,
    pub span_days: i64,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub total_change_absolute: f64,
    /// Total change relative to the first value, NaN for a zero baseline
    pub total_change_relative: f64,
    pub series_mean: f64,
    pub series_std: f64,
    /// Series std relative to its mean, in percent
    pub coefficient_of_variation: f64,
}

/// Ordinary least-squares trend estimator
pub struct TrendEstimator {
    params: TrendParams,
}

impl TrendEstimator {
    pub fn new(params: TrendParams) -> Self {
        Self { params }
    }

    /// Fit a line through (date, value) pairs.
    ///
    /// Non-finite values are dropped and the rest sorted by date before
    /// fitting against elapsed days from the first observation.
    pub fn fit(&self, series: &[(NaiveDate, f64)]) -> SarResult<TrendResult> {
        let mut points: Vec<(NaiveDate, f64)> = series.iter()
            .copied()
            .filter(|(_, v)| v.is_finite())
            .collect();
        if points.len() < MIN_OBSERVATIONS {
            return Err(RegressionError::InsufficientObservations {
                found: points.len(),
                required: MIN_OBSERVATIONS,
            }.into());
        }
        points.sort_by_key(|(date, _)| *date);

        let first_date = points[0].0;
        let last_date = points[points.len() - 1].0;
        let span_days = (last_date - first_date).num_days();
        if span_days == 0 {
            return Err(RegressionError::ZeroTimeSpan.into());
        }

        let x: Vec<f64> = points.iter().map(|(d, _)| (*d - first_date).num_days() as f64).collect();
        let y: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
        let n = points.len() as f64;

        let x_mean = x.iter().sum::<f64>() / n;
        let y_mean = y.iter().sum::<f64>() / n;
        let mut ssxm = 0.0;
        let mut ssym = 0.0;
        let mut ssxym = 0.0;
        for (xi, yi) in x.iter().zip(&y) {
            let dx = xi - x_mean;
            let dy = yi - y_mean;
            ssxm += dx * dx;
            ssym += dy * dy;
            ssxym += dx * dy;
        }

        let slope = ssxym / ssxm;
        let intercept = y_mean - slope * x_mean;

        let r_den = (ssxm * ssym).sqrt();
        let r_value = if r_den == 0.0 { 0.0 } else { (ssxym / r_den).clamp(-1.0, 1.0) };

        let dof = n - 2.0;
        let (p_value, std_error) = if points.len() == MIN_OBSERVATIONS {
            // A line through two points leaves no residual degrees of freedom
            (1.0, 0.0)
        } else {
            let t = r_value * (dof / ((1.0 - r_value) * (1.0 + r_value) + TINY)).sqrt();
            let p = student_t_two_sided_p(t, dof);
            let stderr = ((1.0 - r_value * r_value).max(0.0) * ssym / ssxm / dof).sqrt();
            (p, stderr)
        };

        let baseline = y[0];
        let total_change_absolute = y[y.len() - 1] - baseline;
        let annual_rate = slope * self.params.days_per_year;
        let relative = |value: f64| {
            if baseline == 0.0 {
                f64::NAN
            } else {
                value / baseline.abs() * 100.0
            }
        };

        let (series_mean, series_std) = mean_std(&y);
        let coefficient_of_variation = if series_mean == 0.0 {
            f64::NAN
        } else {
            series_std / series_mean.abs() * 100.0
        };

        let result = TrendResult {
            slope,
            intercept,
            annual_rate,
            annual_rate_percent: relative(annual_rate),
            r_value,
            r_squared: r_value * r_value,
            p_value,
            std_error,
            observations: points.len(),
            span_days,
            first_date,
            last_date,
            total_change_absolute,
            total_change_relative: relative(total_change_absolute),
            series_mean,
            series_std,
            coefficient_of_variation,
        };

        log::debug!(
            "Trend over {} observations: {:.4}/year (R²={:.3}, p={:.3})",
            result.observations, result.annual_rate, result.r_squared, result.p_value
        );
        Ok(result)
    }
}

impl Default for TrendEstimator {
    fn default() -> Self {
        Self::new(TrendParams::default())
    }
}
