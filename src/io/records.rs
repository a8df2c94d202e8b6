//! Serializable result records handed to reporting collaborators
//!
//! Undefined numbers (NaN) are written as JSON `null`.

use crate::core::change_detection::{ChangePercentages, ChangeStats};
use crate::core::classifier::{AreaMeasurement, Threshold};
use crate::core::statistics::BackscatterStats;
use crate::core::trend::TrendResult;
use crate::pipeline::SeriesSummary;
use crate::types::{FailureKind, PixelWindow, Polarization, SarResult};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Area and backscatter of one class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassRecord {
    pub pixel_count: usize,
    pub area_km2: f64,
    pub coverage_percent: f64,
    pub backscatter_stats: BackscatterStats,
}

impl From<&AreaMeasurement> for ClassRecord {
    fn from(m: &AreaMeasurement) -> Self {
        Self {
            pixel_count: m.pixel_count,
            area_km2: m.area_km2,
            coverage_percent: m.coverage_percent,
            backscatter_stats: m.backscatter,
        }
    }
}

/// One processed scene
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneRecord {
    pub scene_id: String,
    pub date: NaiveDate,
    pub polarization: Option<Polarization>,
    pub window: PixelWindow,
    pub valid_pixel_count: usize,
    pub per_class: BTreeMap<String, ClassRecord>,
    pub total_glacier: ClassRecord,
    pub thresholds_used: Vec<Threshold>,
    pub control_points_used: usize,
    pub rms_residual_px: f64,
}

/// Pairwise comparison without the maps
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRecord {
    pub date_a: NaiveDate,
    pub date_b: NaiveDate,
    pub rows: usize,
    pub cols: usize,
    pub valid_pairs: usize,
    pub difference_stats: ChangeStats,
    pub ratio_stats: ChangeStats,
    pub significant_change_percent: ChangePercentages,
}

/// Trend of one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendRecord {
    pub metric: String,
    pub slope_per_day: f64,
    pub intercept: f64,
    pub annual_rate: f64,
    pub annual_rate_percent: f64,
    pub r_value: f64,
    pub r_squared: f64,
    pub p_value: f64,
    pub std_error: f64,
    pub observations: usize,
    pub span_days: i64,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub total_change_absolute: f64,
    pub total_change_relative: f64,
    pub series_mean: f64,
    pub series_std: f64,
    pub coefficient_of_variation: f64,
}

impl TrendRecord {
    pub fn new(metric: impl Into<String>, trend: &TrendResult) -> Self {
        Self {
            metric: metric.into(),
            slope_per_day: trend.slope,
            intercept: trend.intercept,
            annual_rate: trend.annual_rate,
            annual_rate_percent: trend.annual_rate_percent,
            r_value: trend.r_value,
            r_squared: trend.r_squared,
            p_value: trend.p_value,
            std_error: trend.std_error,
            observations: trend.observations,
            span_days: trend.span_days,
            first_date: trend.first_date,
            last_date: trend.last_date,
            total_change_absolute: trend.total_change_absolute,
            total_change_relative: trend.total_change_relative,
            series_mean: trend.series_mean,
            series_std: trend.series_std,
            coefficient_of_variation: trend.coefficient_of_variation,
        }
    }
}

/// A scene left out of the batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRecord {
    pub scene_id: String,
    pub date: NaiveDate,
    pub kind: FailureKind,
    pub reason: String,
}

/// Whole batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    pub scenes: Vec<SceneRecord>,
    pub skipped: Vec<SkippedRecord>,
    pub comparisons: Vec<ComparisonRecord>,
    pub baseline_comparison: Option<ComparisonRecord>,
    pub area_trend: Option<TrendRecord>,
    pub backscatter_trend: Option<TrendRecord>,
    pub summary: SeriesSummary,
}

/// Pretty JSON text of a record
pub fn to_json_string<T: Serialize>(record: &T) -> SarResult<String> {
    Ok(serde_json::to_string_pretty(record)?)
}

/// Write a record as pretty JSON
pub fn write_json<T: Serialize, P: AsRef<Path>>(path: P, record: &T) -> SarResult<()> {
    let path = path.as_ref();
    std::fs::write(path, to_json_string(record)?)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}
