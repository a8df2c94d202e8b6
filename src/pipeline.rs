//! Multi-scene glacier monitoring pipeline
//!
//! Scenes are processed independently on a bounded worker pool. Outcomes
//! stream to a single collector on the calling thread, which notifies the
//! observer. Change detection and trend fitting run only after every scene
//! has finished or been skipped.

use crate::config::PipelineConfig;
use crate::core::calibrate::RadiometricProcessor;
use crate::core::change_detection::{ChangeDetector, ChangeResult};
use crate::core::classifier::{ClassifiedRegion, SceneMeasurement, SurfaceClassifier};
use crate::core::geolocation::GeolocationResolver;
use crate::core::statistics::mean_std;
use crate::core::trend::{TrendEstimator, TrendResult};
use crate::io::records::{BatchRecord, ClassRecord, SceneRecord, SkippedRecord, TrendRecord};
use crate::types::{
    DataQualityError, FailureKind, PixelWindow, Polarization, SarError, SarRealImage, SarResult,
    Scene,
};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Band (percent) within which a scene counts as unchanged from the baseline
pub const SCENE_STABLE_BAND_PERCENT: f64 = 5.0;

/// Band (percent) within which the whole series counts as unchanged
pub const SERIES_STABLE_BAND_PERCENT: f64 = 10.0;

/// Everything produced for one successfully processed scene
#[derive(Debug, Clone)]
pub struct SceneProduct {
    pub scene_id: String,
    pub date: NaiveDate,
    pub polarization: Option<Polarization>,
    pub window: PixelWindow,
    /// Calibrated (and despeckled, when configured) dB crop
    pub calibrated_db: SarRealImage,
    pub classification: ClassifiedRegion,
    pub measurement: SceneMeasurement,
    pub control_points_used: usize,
    pub rms_residual: f64,
}

impl SceneProduct {
    pub fn record(&self) -> SceneRecord {
        SceneRecord {
            scene_id: self.scene_id.clone(),
            date: self.date,
            polarization: self.polarization,
            window: self.window,
            valid_pixel_count: self.measurement.valid_pixel_count,
            per_class: self.measurement.classes.iter()
                .map(|m| (m.class_name.clone(), ClassRecord::from(m)))
                .collect(),
            total_glacier: ClassRecord::from(&self.measurement.total_glacier),
            thresholds_used: self.measurement.thresholds.clone(),
            control_points_used: self.control_points_used,
            rms_residual_px: self.rms_residual,
        }
    }
}

/// A scene left out of the batch, with the reason
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedScene {
    pub scene_id: String,
    pub date: NaiveDate,
    pub kind: FailureKind,
    pub reason: String,
}

impl SkippedScene {
    fn from_error(scene: &Scene, error: &SarError) -> Self {
        Self {
            scene_id: scene.id().to_string(),
            date: scene.date(),
            kind: error.kind(),
            reason: error.to_string(),
        }
    }

    pub fn record(&self) -> SkippedRecord {
        SkippedRecord {
            scene_id: self.scene_id.clone(),
            date: self.date,
            kind: self.kind,
            reason: self.reason.clone(),
        }
    }
}

/// Direction of an area change relative to a tolerance band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Stable,
    Shrinking,
    Growing,
    /// Percentage undefined (zero baseline)
    Undefined,
}

impl ChangeStatus {
    pub fn from_percent(change_percent: f64, band_percent: f64) -> Self {
        if change_percent.is_nan() {
            ChangeStatus::Undefined
        } else if change_percent > band_percent {
            ChangeStatus::Growing
        } else if change_percent < -band_percent {
            ChangeStatus::Shrinking
        } else {
            ChangeStatus::Stable
        }
    }
}

/// Glacier area of one scene relative to the first scene
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneChange {
    pub scene_id: String,
    pub date: NaiveDate,
    pub area_km2: f64,
    pub coverage_percent: f64,
    pub mean_backscatter_db: f64,
    pub change_km2: f64,
    pub change_percent: f64,
    pub status: ChangeStatus,
}

/// Descriptive summary of the glacier area series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub span_years: f64,
    pub distinct_years: usize,
    pub scene_count: usize,
    pub mean_area_km2: f64,
    pub std_area_km2: f64,
    pub coefficient_of_variation: f64,
    pub mean_backscatter_db: f64,
    pub total_change_km2: f64,
    pub total_change_percent: f64,
    pub overall_status: ChangeStatus,
    pub scene_changes: Vec<SceneChange>,
}

impl SeriesSummary {
    /// Summary of date-sorted products; `None` for an empty slice
    pub fn from_products(products: &[SceneProduct], days_per_year: f64) -> Option<Self> {
        let first = products.first()?;
        let last = products.last()?;

        let areas: Vec<f64> = products.iter().map(|p| p.measurement.total_glacier.area_km2).collect();
        let (mean_area_km2, std_area_km2) = mean_std(&areas);
        let coefficient_of_variation = if mean_area_km2 == 0.0 {
            f64::NAN
        } else {
            std_area_km2 / mean_area_km2 * 100.0
        };

        let backscatter: Vec<f64> = products.iter()
            .map(|p| p.measurement.total_glacier.backscatter.mean)
            .filter(|v| v.is_finite())
            .collect();
        let (mean_backscatter_db, _) = mean_std(&backscatter);

        let baseline = first.measurement.total_glacier.area_km2;
        let percent_of_baseline = |change: f64| {
            if baseline == 0.0 {
                f64::NAN
            } else {
                change / baseline * 100.0
            }
        };

        let scene_changes = products.iter()
            .map(|p| {
                let glacier = &p.measurement.total_glacier;
                let change_km2 = glacier.area_km2 - baseline;
                let change_percent = percent_of_baseline(change_km2);
                SceneChange {
                    scene_id: p.scene_id.clone(),
                    date: p.date,
                    area_km2: glacier.area_km2,
                    coverage_percent: glacier.coverage_percent,
                    mean_backscatter_db: glacier.backscatter.mean,
                    change_km2,
                    change_percent,
                    status: ChangeStatus::from_percent(change_percent, SCENE_STABLE_BAND_PERCENT),
                }
            })
            .collect();

        let total_change_km2 = last.measurement.total_glacier.area_km2 - baseline;
        let total_change_percent = percent_of_baseline(total_change_km2);
        let distinct_years = products.iter().map(|p| p.date.year()).collect::<BTreeSet<_>>().len();

        Some(Self {
            first_date: first.date,
            last_date: last.date,
            span_years: (last.date - first.date).num_days() as f64 / days_per_year,
            distinct_years,
            scene_count: products.len(),
            mean_area_km2,
            std_area_km2,
            coefficient_of_variation,
            mean_backscatter_db,
            total_change_km2,
            total_change_percent,
            overall_status: ChangeStatus::from_percent(total_change_percent, SERIES_STABLE_BAND_PERCENT),
            scene_changes,
        })
    }
}

/// Result of a batch run
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Successful scenes, sorted by date
    pub products: Vec<SceneProduct>,
    pub skipped: Vec<SkippedScene>,
    /// Consecutive-date comparisons
    pub comparisons: Vec<ChangeResult>,
    /// First against last scene
    pub baseline_comparison: Option<ChangeResult>,
    /// Total glacier area (km²) over time
    pub area_trend: Option<TrendResult>,
    /// Mean glacier backscatter (dB) over time
    pub backscatter_trend: Option<TrendResult>,
    pub summary: SeriesSummary,
}

impl BatchReport {
    pub fn to_record(&self) -> BatchRecord {
        BatchRecord {
            scenes: self.products.iter().map(SceneProduct::record).collect(),
            skipped: self.skipped.iter().map(SkippedScene::record).collect(),
            comparisons: self.comparisons.iter().map(ChangeResult::record).collect(),
            baseline_comparison: self.baseline_comparison.as_ref().map(ChangeResult::record),
            area_trend: self.area_trend.as_ref().map(|t| TrendRecord::new("glacier_area_km2", t)),
            backscatter_trend: self.backscatter_trend.as_ref().map(|t| TrendRecord::new("glacier_backscatter_db", t)),
            summary: self.summary.clone(),
        }
    }
}

/// Receives per-scene outcomes as the batch runs, always on the calling thread
pub trait PipelineObserver {
    fn scene_completed(&mut self, _product: &SceneProduct) {}

    /// Expected per-scene problems: geometry, data quality, duplicate dates
    fn scene_skipped(&mut self, _skipped: &SkippedScene) {}

    /// Anything else that stopped a scene
    fn scene_failed(&mut self, _failed: &SkippedScene) {}
}

/// Observer that reports through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn scene_completed(&mut self, product: &SceneProduct) {
        let glacier = &product.measurement.total_glacier;
        log::info!(
            "{} ({}): glacier {:.2} km² ({:.1}%), {:.2} dB, window {}",
            product.scene_id, product.date, glacier.area_km2, glacier.coverage_percent,
            glacier.backscatter.mean, product.window
        );
    }

    fn scene_skipped(&mut self, skipped: &SkippedScene) {
        log::warn!("Skipped {} ({}): {}", skipped.scene_id, skipped.date, skipped.reason);
    }

    fn scene_failed(&mut self, failed: &SkippedScene) {
        log::error!("Failed {} ({}): {}", failed.scene_id, failed.date, failed.reason);
    }
}

/// Cooperative per-scene deadline, checked between stages
struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    fn start(limit_secs: Option<f64>) -> Self {
        Self {
            started: Instant::now(),
            limit: limit_secs.map(Duration::from_secs_f64),
        }
    }

    fn check(&self, stage: &str) -> SarResult<()> {
        match self.limit {
            Some(limit) if self.started.elapsed() > limit => Err(SarError::Timeout {
                stage: stage.to_string(),
                limit_secs: limit.as_secs_f64(),
            }),
            _ => Ok(()),
        }
    }
}

/// Single-writer sink for scene outcomes
struct Collector<'o, O: PipelineObserver + ?Sized> {
    observer: &'o mut O,
    products: Vec<SceneProduct>,
    skipped: Vec<SkippedScene>,
}

impl<'o, O: PipelineObserver + ?Sized> Collector<'o, O> {
    fn new(observer: &'o mut O) -> Self {
        Self {
            observer,
            products: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn skip(&mut self, skipped: SkippedScene) {
        if skipped.kind.is_skip() {
            self.observer.scene_skipped(&skipped);
        } else {
            self.observer.scene_failed(&skipped);
        }
        self.skipped.push(skipped);
    }

    fn record(&mut self, scene: &Scene, outcome: SarResult<SceneProduct>) {
        match outcome {
            Ok(product) => {
                self.observer.scene_completed(&product);
                self.products.push(product);
            }
            Err(error) => self.skip(SkippedScene::from_error(scene, &error)),
        }
    }
}

/// Glacier monitoring pipeline over a series of scenes
pub struct GlacierPipeline {
    config: PipelineConfig,
    resolver: GeolocationResolver,
    radiometric: RadiometricProcessor,
    classifier: SurfaceClassifier,
    change_detector: ChangeDetector,
    trend_estimator: TrendEstimator,
}

impl GlacierPipeline {
    /// Build a pipeline from a validated configuration
    pub fn new(config: PipelineConfig) -> SarResult<Self> {
        config.validate()?;
        log::debug!("Pipeline configuration: {:?}", config);
        Ok(Self {
            resolver: GeolocationResolver::new(config.geolocation.clone()),
            radiometric: RadiometricProcessor::new(config.calibration.clone()),
            classifier: SurfaceClassifier::new(config.classifier.clone()),
            change_detector: ChangeDetector::new(config.change.clone()),
            trend_estimator: TrendEstimator::new(config.trend.clone()),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Geolocate, calibrate, classify and measure one scene
    pub fn process_scene(&self, scene: &Scene) -> SarResult<SceneProduct> {
        let deadline = Deadline::start(self.config.scene_timeout_secs);
        log::debug!("Processing scene {} ({})", scene.id(), scene.date());

        if scene.width() == 0 || scene.height() == 0 {
            return Err(DataQualityError::EmptyScene.into());
        }

        let (transform, window) = self.resolver.resolve_scene(scene, &self.config.target)?;
        deadline.check("geolocation")?;

        let crop = scene.samples().crop(&window)?;
        let mut calibrated_db = self.radiometric.calibrate_samples(&crop, scene.nodata())?;
        deadline.check("calibration")?;

        if let Some(window_size) = self.config.speckle_window {
            calibrated_db = self.radiometric.despeckle_db(&calibrated_db, window_size)?;
            deadline.check("speckle filtering")?;
        }

        let classification = self.classifier.classify(&calibrated_db)?;
        deadline.check("classification")?;

        let measurement = self.classifier.measure(&classification, &calibrated_db, scene.date())?;

        Ok(SceneProduct {
            scene_id: scene.id().to_string(),
            date: scene.date(),
            polarization: scene.polarization(),
            window,
            calibrated_db,
            classification,
            measurement,
            control_points_used: transform.control_points_used(),
            rms_residual: transform.rms_residual(),
        })
    }

    /// Process a batch of scenes and derive changes and trends.
    ///
    /// Per-scene failures are recorded and reported to `observer`; only a
    /// batch without a single usable scene is an error.
    pub fn run<O: PipelineObserver + ?Sized>(&self, scenes: &[Scene], observer: &mut O) -> SarResult<BatchReport> {
        log::info!("Processing {} scenes", scenes.len());
        let mut collector = Collector::new(observer);

        let mut seen_dates = HashSet::new();
        let mut unique: Vec<&Scene> = Vec::with_capacity(scenes.len());
        for scene in scenes {
            if seen_dates.insert(scene.date()) {
                unique.push(scene);
            } else {
                collector.skip(SkippedScene {
                    scene_id: scene.id().to_string(),
                    date: scene.date(),
                    kind: FailureKind::DuplicateDate,
                    reason: format!("date {} already processed", scene.date()),
                });
            }
        }

        self.process_all(&unique, &mut collector)?;

        let Collector { mut products, skipped, .. } = collector;
        if products.is_empty() {
            return Err(SarError::NoUsableScenes { attempted: scenes.len() });
        }
        products.sort_by_key(|p| p.date);
        log::info!("{} scenes processed, {} skipped", products.len(), skipped.len());

        let comparisons: Vec<ChangeResult> = products.windows(2)
            .map(|pair| self.compare_products(&pair[0], &pair[1]))
            .collect();
        let baseline_comparison = match (products.first(), products.last()) {
            (Some(first), Some(last)) if products.len() >= 2 => Some(self.compare_products(first, last)),
            _ => None,
        };

        let area_series: Vec<(NaiveDate, f64)> = products.iter()
            .map(|p| (p.date, p.measurement.total_glacier.area_km2))
            .collect();
        let backscatter_series: Vec<(NaiveDate, f64)> = products.iter()
            .map(|p| (p.date, p.measurement.total_glacier.backscatter.mean))
            .collect();
        let area_trend = self.fit_trend("area", &area_series);
        let backscatter_trend = self.fit_trend("backscatter", &backscatter_series);

        let summary = SeriesSummary::from_products(&products, self.config.trend.days_per_year)
            .ok_or(SarError::NoUsableScenes { attempted: scenes.len() })?;

        Ok(BatchReport {
            products,
            skipped,
            comparisons,
            baseline_comparison,
            area_trend,
            backscatter_trend,
            summary,
        })
    }

    #[cfg(feature = "parallel")]
    fn process_all<O: PipelineObserver + ?Sized>(&self, scenes: &[&Scene], collector: &mut Collector<'_, O>) -> SarResult<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_workers)
            .build()
            .map_err(|e| SarError::Processing(format!("Failed to build worker pool: {}", e)))?;
        log::debug!("Scene worker pool with {} threads", pool.current_num_threads());

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::scope(|s| {
            s.spawn(move || {
                pool.install(|| {
                    scenes.par_iter().for_each_with(tx, |tx, &scene| {
                        // The receiver outlives every sender
                        let _ = tx.send((scene, self.process_scene(scene)));
                    });
                });
            });
            for (scene, outcome) in rx {
                collector.record(scene, outcome);
            }
        });
        Ok(())
    }

    #[cfg(not(feature = "parallel"))]
    fn process_all<O: PipelineObserver + ?Sized>(&self, scenes: &[&Scene], collector: &mut Collector<'_, O>) -> SarResult<()> {
        for &scene in scenes {
            collector.record(scene, self.process_scene(scene));
        }
        Ok(())
    }

    fn compare_products(&self, earlier: &SceneProduct, later: &SceneProduct) -> ChangeResult {
        self.change_detector.compare(&earlier.calibrated_db, &later.calibrated_db, earlier.date, later.date)
    }

    fn fit_trend(&self, metric: &str, series: &[(NaiveDate, f64)]) -> Option<TrendResult> {
        match self.trend_estimator.fit(series) {
            Ok(trend) => {
                log::info!(
                    "{} trend: {:.4}/year (R²={:.3}, p={:.3})",
                    metric, trend.annual_rate, trend.r_squared, trend.p_value
                );
                Some(trend)
            }
            Err(e) => {
                log::warn!("{} trend unavailable: {}", metric, e);
                None
            }
        }
    }
}
