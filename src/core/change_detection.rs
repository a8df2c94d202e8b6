use crate::core::statistics::mean_std;
use crate::io::records::ComparisonRecord;
use crate::types::{ConfigurationError, SarRealImage, SarResult};
use chrono::NaiveDate;
use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};

/// Change detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeParams {
    /// Magnitude in dB beyond which a pixel change is significant
    pub significance_threshold_db: f64,
}

impl Default for ChangeParams {
    fn default() -> Self {
        Self {
            significance_threshold_db: 3.0,
        }
    }
}

impl ChangeParams {
    pub fn validate(&self) -> SarResult<()> {
        if !(self.significance_threshold_db > 0.0) || !self.significance_threshold_db.is_finite() {
            return Err(ConfigurationError::InvalidParameter(format!(
                "significance threshold must be positive, got {}",
                self.significance_threshold_db
            )).into());
        }
        Ok(())
    }
}

/// Summary of a change map in dB; NaN when no pixel pair was valid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl ChangeStats {
    fn from_values(values: &[f64]) -> Self {
        let (mean, std) = mean_std(values);
        let (min, max) = if values.is_empty() {
            (f64::NAN, f64::NAN)
        } else {
            values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
        };
        Self { mean, std, min, max }
    }
}

/// Share of valid pixel pairs in each change bucket, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangePercentages {
    pub decrease: f64,
    pub increase: f64,
    pub stable: f64,
}

/// Outcome of comparing two co-registered dB rasters
#[derive(Debug, Clone)]
pub struct ChangeResult {
    pub date_a: NaiveDate,
    pub date_b: NaiveDate,
    /// Compared region (rows, cols) after cropping to the overlap
    pub shape: (usize, usize),
    pub valid_pairs: usize,
    pub difference_stats: ChangeStats,
    pub ratio_stats: ChangeStats,
    pub significant_change: ChangePercentages,
    /// b − a in dB, NaN where either input is invalid
    pub difference_map: SarRealImage,
    /// 10·log10(linear_b / linear_a), NaN where either input is invalid
    pub ratio_map: SarRealImage,
    /// −1 significant decrease, +1 significant increase, 0 otherwise
    pub change_map: Array2<i8>,
}

impl ChangeResult {
    /// Serializable summary without the maps
    pub fn record(&self) -> ComparisonRecord {
        ComparisonRecord {
            date_a: self.date_a,
            date_b: self.date_b,
            rows: self.shape.0,
            cols: self.shape.1,
            valid_pairs: self.valid_pairs,
            difference_stats: self.difference_stats,
            ratio_stats: self.ratio_stats,
            significant_change_percent: self.significant_change,
        }
    }
}

/// Pairwise change detector
pub struct ChangeDetector {
    params: ChangeParams,
}

impl ChangeDetector {
    pub fn new(params: ChangeParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ChangeParams {
        &self.params
    }

    /// Compare `image_b` (later) against `image_a` (earlier).
    ///
    /// Differently shaped inputs are cropped to their common top-left
    /// region. Pixel pairs with a non-finite member are left out of every
    /// statistic and percentage.
    pub fn compare(
        &self,
        image_a: &SarRealImage,
        image_b: &SarRealImage,
        date_a: NaiveDate,
        date_b: NaiveDate,
    ) -> ChangeResult {
        let rows = image_a.nrows().min(image_b.nrows());
        let cols = image_a.ncols().min(image_b.ncols());
        if image_a.dim() != image_b.dim() {
            log::debug!(
                "Cropping {:?} and {:?} to common {}x{} region",
                image_a.dim(), image_b.dim(), rows, cols
            );
        }
        let a = image_a.slice(s![..rows, ..cols]);
        let b = image_b.slice(s![..rows, ..cols]);

        let threshold = self.params.significance_threshold_db;
        let mut difference_map = Array2::from_elem((rows, cols), f32::NAN);
        let mut ratio_map = Array2::from_elem((rows, cols), f32::NAN);
        let mut change_map = Array2::<i8>::zeros((rows, cols));

        let mut differences = Vec::new();
        let mut ratios = Vec::new();
        let mut decreased = 0usize;
        let mut increased = 0usize;

        Zip::from(&mut difference_map)
            .and(&mut ratio_map)
            .and(&mut change_map)
            .and(&a)
            .and(&b)
            .for_each(|diff, ratio, change, &va, &vb| {
                if !va.is_finite() || !vb.is_finite() {
                    return;
                }
                let d = vb as f64 - va as f64;
                *diff = d as f32;
                differences.push(d);

                let linear_a = 10f64.powf(va as f64 / 10.0);
                let linear_b = 10f64.powf(vb as f64 / 10.0);
                let r = 10.0 * (linear_b / linear_a).log10();
                if r.is_finite() {
                    *ratio = r as f32;
                    ratios.push(r);
                }

                if d < -threshold {
                    *change = -1;
                    decreased += 1;
                } else if d > threshold {
                    *change = 1;
                    increased += 1;
                }
            });

        let valid_pairs = differences.len();
        let percent = |count: usize| {
            if valid_pairs == 0 {
                f64::NAN
            } else {
                count as f64 / valid_pairs as f64 * 100.0
            }
        };
        let significant_change = ChangePercentages {
            decrease: percent(decreased),
            increase: percent(increased),
            stable: percent(valid_pairs - decreased - increased),
        };

        let result = ChangeResult {
            date_a,
            date_b,
            shape: (rows, cols),
            valid_pairs,
            difference_stats: ChangeStats::from_values(&differences),
            ratio_stats: ChangeStats::from_values(&ratios),
            significant_change,
            difference_map,
            ratio_map,
            change_map,
        };

        if valid_pairs == 0 {
            log::warn!("No valid pixel pairs between {} and {}", date_a, date_b);
        } else {
            log::info!(
                "{} -> {}: mean change {:.2} dB, {:.2}% decreased, {:.2}% increased",
                date_a, date_b, result.difference_stats.mean,
                result.significant_change.decrease, result.significant_change.increase
            );
        }
        result
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(ChangeParams::default())
    }
}
