//! Percentile-driven multi-level surface classification
//!
//! Thresholds are recomputed for every scene from that scene's own finite
//! pixels, so class boundaries are scene-relative: a change in the crop
//! window between scenes shifts the percentile base population and with it
//! the class of a given location. Cross-scene comparisons rely on a
//! consistent window definition.
//!
//! The darkest band is radar shadow or bare rock, never glacier ice. Ice
//! levels start above the dark-terrain band.

use crate::core::morphology::{closing, opening, StructuringElement};
use crate::core::speckle_filter::{SpeckleFilter, SpeckleFilterType};
use crate::core::statistics::{percentiles, BackscatterStats};
use crate::types::{
    ClassMask, ConfigurationError, DataQualityError, SarError, SarRealImage, SarResult,
};
use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Fewest percentile breakpoints that still leave one ice level
pub const MIN_PERCENTILES: usize = 4;

/// Most percentile breakpoints: ice levels are numbered with a `u8`
pub const MAX_PERCENTILES: usize = u8::MAX as usize + 3;

/// Surface class, ordered from darkest to brightest backscatter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceClass {
    /// Radar shadow or bare rock, at or below the lowest threshold
    ShadowRock,
    /// Dark non-glacier terrain between the two lowest thresholds
    DarkTerrain,
    /// Glacier ice sub-level, 1 being the darkest
    Ice(u8),
    /// Snow and mixed ice/snow, just below the highest threshold
    SnowMixed,
    /// Bright debris or rock above the highest threshold
    DebrisRock,
}

impl SurfaceClass {
    /// Stable name used in records and logs
    pub fn name(&self) -> String {
        match self {
            SurfaceClass::ShadowRock => "shadow_rock".to_string(),
            SurfaceClass::DarkTerrain => "dark_terrain".to_string(),
            SurfaceClass::Ice(level) => format!("ice_level_{}", level),
            SurfaceClass::SnowMixed => "snow_mixed".to_string(),
            SurfaceClass::DebrisRock => "debris_rock".to_string(),
        }
    }

    /// Counted towards the total glacier area
    pub fn is_glacier(&self) -> bool {
        matches!(self, SurfaceClass::Ice(_) | SurfaceClass::SnowMixed)
    }

    /// Ordered classes for `threshold_count` thresholds
    pub fn ordered(threshold_count: usize) -> Vec<SurfaceClass> {
        let ice_levels = threshold_count.saturating_sub(3);
        let mut classes = Vec::with_capacity(threshold_count + 1);
        classes.push(SurfaceClass::ShadowRock);
        classes.push(SurfaceClass::DarkTerrain);
        classes.extend((1..=ice_levels).map(|level| SurfaceClass::Ice(level as u8)));
        classes.push(SurfaceClass::SnowMixed);
        classes.push(SurfaceClass::DebrisRock);
        classes
    }
}

impl std::fmt::Display for SurfaceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Classification parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams {
    /// Percentile breakpoints (0-100), strictly increasing
    pub percentiles: Vec<f64>,
    /// Median pre-filter window, `None` to skip
    pub median_window: Option<usize>,
    /// Opening element side, 1 disables
    pub opening_size: usize,
    /// Closing element side, 1 disables
    pub closing_size: usize,
    /// Ground area of one pixel in m²
    pub pixel_area_m2: f64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            percentiles: vec![1.0, 5.0, 15.0, 30.0, 50.0, 70.0],
            median_window: Some(3),
            opening_size: 3,
            closing_size: 3,
            pixel_area_m2: 100.0, // 10 m pixels
        }
    }
}

impl ClassifierParams {
    pub fn validate(&self) -> SarResult<()> {
        if self.percentiles.len() < MIN_PERCENTILES {
            return Err(ConfigurationError::InvalidParameter(format!(
                "at least {} percentiles required, got {}",
                MIN_PERCENTILES,
                self.percentiles.len()
            )).into());
        }
        if self.percentiles.len() > MAX_PERCENTILES {
            return Err(ConfigurationError::InvalidParameter(format!(
                "at most {} percentiles supported, got {}",
                MAX_PERCENTILES,
                self.percentiles.len()
            )).into());
        }
        if let Some(p) = self.percentiles.iter().find(|p| !p.is_finite() || **p < 0.0 || **p > 100.0) {
            return Err(ConfigurationError::InvalidParameter(
                format!("percentile {} outside [0, 100]", p)
            ).into());
        }
        if self.percentiles.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ConfigurationError::NonMonotonicThresholds(
                format!("{:?}", self.percentiles)
            ).into());
        }
        if let Some(window) = self.median_window {
            if window < 3 || window % 2 == 0 {
                return Err(ConfigurationError::InvalidWindowSize(window).into());
            }
        }
        StructuringElement::square(self.opening_size)?;
        StructuringElement::square(self.closing_size)?;
        if !(self.pixel_area_m2 > 0.0) || !self.pixel_area_m2.is_finite() {
            return Err(ConfigurationError::InvalidParameter(
                format!("pixel area must be positive, got {}", self.pixel_area_m2)
            ).into());
        }
        Ok(())
    }
}

/// A threshold actually used for one scene
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub percentile: f64,
    pub value_db: f64,
}

/// Exhaustive label raster over a cropped window
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRegion {
    labels: Array2<Option<SurfaceClass>>,
    classes: Vec<SurfaceClass>,
    thresholds: Vec<Threshold>,
    valid_pixel_count: usize,
}

impl ClassifiedRegion {
    /// Per-pixel class, `None` where the input was not finite
    pub fn labels(&self) -> &Array2<Option<SurfaceClass>> {
        &self.labels
    }

    /// Classes in darkest-to-brightest order
    pub fn classes(&self) -> &[SurfaceClass] {
        &self.classes
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn valid_pixel_count(&self) -> usize {
        self.valid_pixel_count
    }

    pub fn dim(&self) -> (usize, usize) {
        self.labels.dim()
    }

    pub fn mask(&self, class: SurfaceClass) -> ClassMask {
        self.labels.mapv(|label| label == Some(class))
    }

    /// Union of the ice levels and snow/mixed
    pub fn glacier_mask(&self) -> ClassMask {
        self.labels.mapv(|label| label.map_or(false, |c| c.is_glacier()))
    }

    pub fn pixel_count(&self, class: SurfaceClass) -> usize {
        self.labels.iter().filter(|&&label| label == Some(class)).count()
    }
}

/// Area and backscatter of one class on one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaMeasurement {
    pub date: NaiveDate,
    pub class_name: String,
    pub pixel_count: usize,
    pub area_km2: f64,
    pub coverage_percent: f64,
    pub backscatter: BackscatterStats,
}

/// All class measurements of one scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMeasurement {
    pub date: NaiveDate,
    pub valid_pixel_count: usize,
    /// Darkest to brightest
    pub classes: Vec<AreaMeasurement>,
    pub total_glacier: AreaMeasurement,
    pub thresholds: Vec<Threshold>,
}

/// Percentile classifier with morphological cleanup
pub struct SurfaceClassifier {
    params: ClassifierParams,
}

impl SurfaceClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    /// Classify a calibrated dB raster
    pub fn classify(&self, image_db: &SarRealImage) -> SarResult<ClassifiedRegion> {
        self.params.validate()?;
        if image_db.is_empty() {
            return Err(DataQualityError::EmptyScene.into());
        }
        let valid_pixel_count = image_db.iter().filter(|v| v.is_finite()).count();
        if valid_pixel_count == 0 {
            return Err(DataQualityError::NoValidPixels.into());
        }

        let filtered = match self.params.median_window {
            Some(window) => SpeckleFilter::with_window(window).apply_filter(image_db, SpeckleFilterType::Median)?,
            None => image_db.clone(),
        };

        let values: Vec<f64> = filtered.iter().filter(|v| v.is_finite()).map(|&v| v as f64).collect();
        let threshold_values = strictly_increasing(percentiles(&values, &self.params.percentiles));
        let thresholds: Vec<Threshold> = self.params.percentiles.iter()
            .zip(&threshold_values)
            .map(|(&percentile, &value_db)| Threshold { percentile, value_db })
            .collect();
        log::debug!("Scene thresholds: {:?}", thresholds);

        let raw = filtered.mapv(|v| {
            if v.is_finite() {
                Some(threshold_values.partition_point(|&t| t < v as f64))
            } else {
                None
            }
        });

        let classes = SurfaceClass::ordered(threshold_values.len());
        let cleaned = self.clean_class_masks(&raw, classes.len())?;
        let indices = reconcile(&raw, &cleaned);
        let labels = indices.mapv(|idx| idx.map(|i| classes[i]));

        log::info!(
            "Classified {} valid pixels into {} classes",
            valid_pixel_count,
            classes.len()
        );

        Ok(ClassifiedRegion {
            labels,
            classes,
            thresholds,
            valid_pixel_count,
        })
    }

    /// Per-class area and backscatter; statistics use the unfiltered dB values
    pub fn measure(
        &self,
        region: &ClassifiedRegion,
        image_db: &SarRealImage,
        date: NaiveDate,
    ) -> SarResult<SceneMeasurement> {
        if region.dim() != image_db.dim() {
            return Err(SarError::Processing(format!(
                "classification {:?} and raster {:?} differ in shape",
                region.dim(),
                image_db.dim()
            )));
        }

        let classes = region.classes().iter()
            .map(|&class| self.area_measurement(date, class.name(), &region.mask(class), image_db, region.valid_pixel_count()))
            .collect();
        let total_glacier = self.area_measurement(
            date,
            "total_glacier".to_string(),
            &region.glacier_mask(),
            image_db,
            region.valid_pixel_count(),
        );

        log::info!(
            "{}: glacier {:.3} km² ({:.1}% of valid area), mean {:.2} dB",
            date, total_glacier.area_km2, total_glacier.coverage_percent, total_glacier.backscatter.mean
        );

        Ok(SceneMeasurement {
            date,
            valid_pixel_count: region.valid_pixel_count(),
            classes,
            total_glacier,
            thresholds: region.thresholds().to_vec(),
        })
    }

    fn area_measurement(
        &self,
        date: NaiveDate,
        class_name: String,
        mask: &ClassMask,
        image_db: &SarRealImage,
        valid_pixel_count: usize,
    ) -> AreaMeasurement {
        let pixel_count = mask.iter().filter(|&&m| m).count();
        let coverage_percent = if valid_pixel_count > 0 {
            pixel_count as f64 / valid_pixel_count as f64 * 100.0
        } else {
            f64::NAN
        };
        AreaMeasurement {
            date,
            class_name,
            pixel_count,
            area_km2: pixel_count as f64 * self.params.pixel_area_m2 / 1e6,
            coverage_percent,
            backscatter: BackscatterStats::from_masked(image_db.view(), mask),
        }
    }

    /// Opening then closing of every class mask, limited to valid pixels
    fn clean_class_masks(&self, raw: &Array2<Option<usize>>, class_count: usize) -> SarResult<Vec<ClassMask>> {
        let open_element = StructuringElement::square(self.params.opening_size)?;
        let close_element = StructuringElement::square(self.params.closing_size)?;
        let valid = raw.mapv(|label| label.is_some());

        Ok((0..class_count)
            .map(|class| {
                let mask = raw.mapv(|label| label == Some(class));
                let mut cleaned = closing(&opening(&mask, &open_element), &close_element);
                Zip::from(&mut cleaned).and(&valid).for_each(|c, &v| *c &= v);
                cleaned
            })
            .collect())
    }
}

impl Default for SurfaceClassifier {
    fn default() -> Self {
        Self::new(ClassifierParams::default())
    }
}

/// Nudge tied thresholds up by one ulp so the sequence is strictly increasing
fn strictly_increasing(mut thresholds: Vec<f64>) -> Vec<f64> {
    for i in 1..thresholds.len() {
        if thresholds[i] <= thresholds[i - 1] {
            thresholds[i] = next_up(thresholds[i - 1]);
        }
    }
    thresholds
}

fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// Fold cleaned class masks back into one label per valid pixel.
///
/// A pixel keeps its raw class if that class's cleaned mask still holds it,
/// otherwise it goes to the cleaned mask nearest in class order (lower class
/// on ties), otherwise to the majority raw class of its valid 8-neighbours.
fn reconcile(raw: &Array2<Option<usize>>, cleaned: &[ClassMask]) -> Array2<Option<usize>> {
    let (height, width) = raw.dim();
    let class_count = cleaned.len();

    Array2::from_shape_fn((height, width), |(i, j)| {
        let own = raw[[i, j]]?;
        if cleaned[own][[i, j]] {
            return Some(own);
        }

        let claimed = (0..class_count)
            .filter(|&c| cleaned[c][[i, j]])
            .min_by_key(|&c| (c.abs_diff(own), c));
        if claimed.is_some() {
            return claimed;
        }

        let mut votes = vec![0usize; class_count];
        for di in -1isize..=1 {
            for dj in -1isize..=1 {
                if di == 0 && dj == 0 {
                    continue;
                }
                let ni = i as isize + di;
                let nj = j as isize + dj;
                if ni < 0 || nj < 0 || ni >= height as isize || nj >= width as isize {
                    continue;
                }
                if let Some(label) = raw[[ni as usize, nj as usize]] {
                    votes[label] += 1;
                }
            }
        }
        let (best, count) = votes.iter().enumerate()
            .fold((own, 0usize), |(best, best_count), (c, &n)| if n > best_count { (c, n) } else { (best, best_count) });
        Some(if count > 0 { best } else { own })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Deterministic pseudo-random dB raster
    fn noisy_raster(rows: usize, cols: usize, seed: u64) -> SarRealImage {
        let mut state = seed;
        Array2::from_shape_fn((rows, cols), |_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            -25.0 + ((state >> 33) as f32 / (1u64 << 31) as f32) * 25.0
        })
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 8, 15).unwrap()
    }

    #[test]
    fn test_ordered_classes() {
        let classes = SurfaceClass::ordered(6);
        assert_eq!(classes.len(), 7);
        assert_eq!(classes[0], SurfaceClass::ShadowRock);
        assert_eq!(classes[2], SurfaceClass::Ice(1));
        assert_eq!(classes[4], SurfaceClass::Ice(3));
        assert_eq!(classes[5], SurfaceClass::SnowMixed);
        assert!(!SurfaceClass::ShadowRock.is_glacier());
        assert!(!SurfaceClass::DarkTerrain.is_glacier());
        assert!(!SurfaceClass::DebrisRock.is_glacier());
        assert!(SurfaceClass::Ice(2).is_glacier());
    }

    #[test]
    fn test_param_validation() {
        let mut params = ClassifierParams::default();
        params.percentiles = vec![5.0, 15.0, 10.0, 50.0];
        let err = params.validate().unwrap_err();
        assert!(matches!(err, SarError::Configuration(ConfigurationError::NonMonotonicThresholds(_))));

        params.percentiles = vec![5.0, 15.0, 30.0];
        assert!(params.validate().is_err());

        params.percentiles = vec![5.0, 15.0, 30.0, 120.0];
        assert!(params.validate().is_err());

        // 258 breakpoints give ice levels 1..=255; one more would overflow the level
        params.percentiles = (0..MAX_PERCENTILES).map(|i| i as f64 * 0.3).collect();
        assert!(params.validate().is_ok());
        params.percentiles = (0..MAX_PERCENTILES + 1).map(|i| i as f64 * 0.3).collect();
        assert!(matches!(
            params.validate().unwrap_err(),
            SarError::Configuration(ConfigurationError::InvalidParameter(_))
        ));
        assert!(SurfaceClassifier::new(params.clone()).classify(&noisy_raster(8, 8, 1)).is_err());

        params = ClassifierParams { opening_size: 0, ..ClassifierParams::default() };
        assert!(matches!(
            params.validate().unwrap_err(),
            SarError::Configuration(ConfigurationError::InvalidKernelSize(0))
        ));
    }

    #[test]
    fn test_largest_percentile_set_keeps_classes_distinct() {
        let params = ClassifierParams {
            percentiles: (0..MAX_PERCENTILES).map(|i| i as f64 * 0.3).collect(),
            ..ClassifierParams::default()
        };
        let image = Array2::from_shape_fn((60, 60), |(i, j)| -25.0 + (i * 60 + j) as f32 * 0.005);
        let region = SurfaceClassifier::new(params).classify(&image).unwrap();

        let classes = region.classes();
        assert_eq!(classes.len(), MAX_PERCENTILES + 1);
        assert_eq!(classes[classes.len() - 3], SurfaceClass::Ice(u8::MAX));
        let distinct: std::collections::HashSet<_> = classes.iter().collect();
        assert_eq!(distinct.len(), classes.len());

        let total: usize = classes.iter().map(|&c| region.pixel_count(c)).sum();
        assert_eq!(total, region.valid_pixel_count());
    }

    #[test]
    fn test_thresholds_strictly_increasing() {
        let image = noisy_raster(60, 60, 7);
        let region = SurfaceClassifier::default().classify(&image).unwrap();
        let values: Vec<f64> = region.thresholds().iter().map(|t| t.value_db).collect();
        assert_eq!(values.len(), 6);
        assert!(values.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_tied_thresholds_nudged() {
        // Two-valued raster: most percentiles coincide
        let image = Array2::from_shape_fn((40, 40), |(i, _)| if i < 30 { -12.0f32 } else { -4.0 });
        let region = SurfaceClassifier::default().classify(&image).unwrap();
        let values: Vec<f64> = region.thresholds().iter().map(|t| t.value_db).collect();
        assert!(values.windows(2).all(|w| w[1] > w[0]));
        assert!(next_up(-1.0) > -1.0);
        assert_eq!(next_up(0.0), f64::from_bits(1));
    }

    #[test]
    fn test_classes_partition_finite_pixels() {
        let mut image = noisy_raster(50, 70, 42);
        image[[3, 3]] = f32::NAN;
        image[[20, 40]] = f32::NAN;
        let region = SurfaceClassifier::default().classify(&image).unwrap();

        assert_eq!(region.valid_pixel_count(), 50 * 70 - 2);
        let total: usize = region.classes().iter().map(|&c| region.pixel_count(c)).sum();
        assert_eq!(total, region.valid_pixel_count());
        for (label, value) in region.labels().iter().zip(image.iter()) {
            assert_eq!(label.is_some(), value.is_finite());
        }
    }

    #[test]
    fn test_reclassification_is_idempotent() {
        let image = noisy_raster(45, 45, 3);
        let classifier = SurfaceClassifier::default();
        assert_eq!(classifier.classify(&image).unwrap(), classifier.classify(&image).unwrap());
    }

    #[test]
    fn test_no_valid_pixels() {
        let image = Array2::from_elem((10, 10), f32::NAN);
        let err = SurfaceClassifier::default().classify(&image).unwrap_err();
        assert!(matches!(err, SarError::DataQuality(DataQualityError::NoValidPixels)));
    }

    #[test]
    fn test_measurement_areas() {
        let image = noisy_raster(50, 50, 11);
        let classifier = SurfaceClassifier::default();
        let region = classifier.classify(&image).unwrap();
        let measurement = classifier.measure(&region, &image, date()).unwrap();

        let coverage: f64 = measurement.classes.iter().map(|m| m.coverage_percent).sum();
        assert_relative_eq!(coverage, 100.0, epsilon = 1e-9);

        let glacier_pixels: usize = measurement.classes.iter()
            .filter(|m| m.class_name.starts_with("ice") || m.class_name == "snow_mixed")
            .map(|m| m.pixel_count)
            .sum();
        assert_eq!(measurement.total_glacier.pixel_count, glacier_pixels);
        assert_relative_eq!(
            measurement.total_glacier.area_km2,
            glacier_pixels as f64 * 100.0 / 1e6,
            epsilon = 1e-12
        );
    }
}
