use crate::core::speckle_filter::{SpeckleFilter, SpeckleFilterType};
use crate::types::{ConfigurationError, SarImage, SarRealImage, SarResult, SceneSamples};
use ndarray::Array2;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Offset added before taking the logarithm so zero power does not give -inf
pub const DEFAULT_EPSILON: f64 = 1e-10;

/// How raw samples relate to backscatter power.
///
/// Scene sources disagree on the convention (amplitude DN that must be
/// squared vs. samples that already are power), so the mode is always
/// chosen explicitly by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalibrationMode {
    /// 10·log10(DN² + ε) − C
    AmplitudeSquared,
    /// 10·log10(P + ε) − C
    PowerOnly,
    /// Samples are already dB: v − C
    Decibel,
    /// 8-bit quicklook stretched linearly over [db_min, db_max]; 0 is no data
    Quantized { db_min: f32, db_max: f32 },
}

/// Radiometric calibration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    pub mode: CalibrationMode,
    /// Constant C subtracted from the dB value
    pub calibration_constant: f32,
    /// Offset ε added to the power before the logarithm
    pub epsilon: f64,
    /// No-data sample value for scenes that do not declare their own
    pub nodata: Option<f32>,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::AmplitudeSquared,
            calibration_constant: 0.0,
            epsilon: DEFAULT_EPSILON,
            nodata: None,
        }
    }
}

impl CalibrationParams {
    pub fn validate(&self) -> SarResult<()> {
        if !(self.epsilon > 0.0) || !self.epsilon.is_finite() {
            return Err(ConfigurationError::InvalidParameter(
                format!("calibration epsilon must be positive, got {}", self.epsilon)
            ).into());
        }
        if !self.calibration_constant.is_finite() {
            return Err(ConfigurationError::InvalidParameter(
                "calibration constant must be finite".to_string()
            ).into());
        }
        if let CalibrationMode::Quantized { db_min, db_max } = self.mode {
            if !(db_min < db_max) {
                return Err(ConfigurationError::InvalidParameter(
                    format!("quantized dB range [{}, {}] is empty", db_min, db_max)
                ).into());
            }
        }
        Ok(())
    }
}

/// Radiometric calibration and speckle suppression
pub struct RadiometricProcessor {
    params: CalibrationParams,
}

impl RadiometricProcessor {
    /// Create a new calibration processor
    pub fn new(params: CalibrationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    /// Calibrate raw samples to backscatter in dB.
    ///
    /// Non-finite samples, samples equal to `nodata` and negative power come
    /// out as NaN.
    pub fn calibrate<T>(
        &self,
        raw: &Array2<T>,
        calibration_constant: f32,
        nodata: Option<f32>,
    ) -> SarResult<SarRealImage>
    where
        T: ToPrimitive + Copy,
    {
        self.params.validate()?;
        log::debug!(
            "Calibrating {:?} raster with {:?}, C = {}",
            raw.dim(), self.params.mode, calibration_constant
        );

        let nodata = nodata.map(|v| v as f64);
        let mode = self.params.mode;
        let epsilon = self.params.epsilon;
        let constant = calibration_constant as f64;

        let calibrated = raw.mapv(|sample| {
            let value = match sample.to_f64() {
                Some(v) if v.is_finite() => v,
                _ => return f32::NAN,
            };
            if nodata.map_or(false, |nd| value == nd) {
                return f32::NAN;
            }
            sample_to_db(value, mode, epsilon, constant)
        });

        log_range("Calibration", &calibrated);
        Ok(calibrated)
    }

    /// Calibrate complex samples: |z|² intensity, then 10·log10(|z|² + ε) − C.
    ///
    /// Samples whose magnitude equals `nodata` (zero-filled SLC borders with
    /// `Some(0.0)`) come out as NaN.
    pub fn calibrate_complex(
        &self,
        slc_data: &SarImage,
        calibration_constant: f32,
        nodata: Option<f32>,
    ) -> SarResult<SarRealImage> {
        self.params.validate()?;
        log::debug!("Calibrating complex {:?} raster, C = {}", slc_data.dim(), calibration_constant);

        let epsilon = self.params.epsilon;
        let constant = calibration_constant as f64;
        let nodata_intensity = nodata.map(|v| (v as f64) * (v as f64));
        let calibrated = slc_data.mapv(|slc_pixel| {
            let intensity = slc_pixel.norm_sqr() as f64;
            if !intensity.is_finite() || nodata_intensity == Some(intensity) {
                return f32::NAN;
            }
            (10.0 * (intensity + epsilon).log10() - constant) as f32
        });

        log_range("Complex calibration", &calibrated);
        Ok(calibrated)
    }

    /// Calibrate a scene band with the configured constant. `nodata` falls
    /// back to the configured value when the scene declares none.
    pub fn calibrate_samples(&self, samples: &SceneSamples, nodata: Option<f32>) -> SarResult<SarRealImage> {
        let constant = self.params.calibration_constant;
        let nodata = nodata.or(self.params.nodata);
        match samples {
            SceneSamples::Detected(data) => self.calibrate(data, constant, nodata),
            SceneSamples::Complex(data) => self.calibrate_complex(data, constant, nodata),
        }
    }

    /// Adaptive Lee speckle filter on an arbitrary raster
    pub fn despeckle(&self, image: &SarRealImage, window_size: usize) -> SarResult<SarRealImage> {
        SpeckleFilter::with_window(window_size).apply_filter(image, SpeckleFilterType::Lee)
    }

    /// Lee filter applied to a dB raster in the linear power domain, where
    /// speckle is multiplicative
    pub fn despeckle_db(&self, image_db: &SarRealImage, window_size: usize) -> SarResult<SarRealImage> {
        let linear = Self::to_linear(image_db);
        let filtered = self.despeckle(&linear, window_size)?;
        Ok(Self::to_db(&filtered, self.params.epsilon))
    }

    /// Convert linear power to dB; NaN stays NaN
    pub fn to_db(linear_data: &SarRealImage, epsilon: f64) -> SarRealImage {
        linear_data.mapv(|x| {
            if x.is_nan() || x < 0.0 {
                f32::NAN
            } else {
                (10.0 * (x as f64 + epsilon).log10()) as f32
            }
        })
    }

    /// Convert dB to linear power
    pub fn to_linear(db_data: &SarRealImage) -> SarRealImage {
        db_data.mapv(|x| 10f32.powf(x / 10.0))
    }
}

fn sample_to_db(value: f64, mode: CalibrationMode, epsilon: f64, constant: f64) -> f32 {
    let db = match mode {
        CalibrationMode::AmplitudeSquared => 10.0 * (value * value + epsilon).log10(),
        CalibrationMode::PowerOnly => {
            if value < 0.0 {
                return f32::NAN;
            }
            10.0 * (value + epsilon).log10()
        }
        CalibrationMode::Decibel => value,
        CalibrationMode::Quantized { db_min, db_max } => {
            if value <= 0.0 {
                return f32::NAN;
            }
            let (db_min, db_max) = (db_min as f64, db_max as f64);
            value / 255.0 * (db_max - db_min) + db_min
        }
    };
    (db - constant) as f32
}

fn log_range(label: &str, data: &SarRealImage) {
    let (min, max) = data.iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    log::debug!("{} output range: {:.2} to {:.2} dB", label, min, max);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SarComplex;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn processor(mode: CalibrationMode) -> RadiometricProcessor {
        RadiometricProcessor::new(CalibrationParams { mode, ..CalibrationParams::default() })
    }

    #[test]
    fn test_amplitude_squared_calibration() {
        let raw = array![[100u16, 10], [0, 1000]];
        let db = processor(CalibrationMode::AmplitudeSquared).calibrate(&raw, 52.7, None).unwrap();
        assert_relative_eq!(db[[0, 0]], 40.0 - 52.7, epsilon = 1e-4);
        assert_relative_eq!(db[[0, 1]], 20.0 - 52.7, epsilon = 1e-4);
        // Zero DN hits the epsilon floor instead of -inf
        assert_relative_eq!(db[[1, 0]], -100.0 - 52.7, epsilon = 1e-3);
    }

    #[test]
    fn test_power_only_calibration() {
        let raw = array![[100.0f32, 0.01], [-1.0, f32::NAN]];
        let db = processor(CalibrationMode::PowerOnly).calibrate(&raw, 0.0, None).unwrap();
        assert_relative_eq!(db[[0, 0]], 20.0, epsilon = 1e-5);
        assert_relative_eq!(db[[0, 1]], -20.0, epsilon = 1e-5);
        assert!(db[[1, 0]].is_nan());
        assert!(db[[1, 1]].is_nan());
    }

    #[test]
    fn test_modes_differ_by_factor_two_in_db() {
        let raw = array![[3.0f32]];
        let amp = processor(CalibrationMode::AmplitudeSquared).calibrate(&raw, 0.0, None).unwrap();
        let pow = processor(CalibrationMode::PowerOnly).calibrate(&raw, 0.0, None).unwrap();
        assert_relative_eq!(amp[[0, 0]], 2.0 * pow[[0, 0]], epsilon = 1e-4);
    }

    #[test]
    fn test_nodata_and_quantized() {
        let raw = array![[0u8, 255, 51]];
        let mode = CalibrationMode::Quantized { db_min: -25.0, db_max: 0.0 };
        let db = processor(mode).calibrate(&raw, 0.0, None).unwrap();
        assert!(db[[0, 0]].is_nan());
        assert_relative_eq!(db[[0, 1]], 0.0, epsilon = 1e-5);
        assert_relative_eq!(db[[0, 2]], -20.0, epsilon = 1e-5);

        let raw = array![[-9999.0f32, -12.5]];
        let db = processor(CalibrationMode::Decibel).calibrate(&raw, 0.0, Some(-9999.0)).unwrap();
        assert!(db[[0, 0]].is_nan());
        assert_relative_eq!(db[[0, 1]], -12.5);
    }

    #[test]
    fn test_complex_calibration_uses_intensity() {
        let slc = array![[SarComplex::new(3.0, 4.0)]];
        let db = processor(CalibrationMode::AmplitudeSquared).calibrate_complex(&slc, 0.0, None).unwrap();
        assert_relative_eq!(db[[0, 0]], 10.0 * 25f32.log10(), epsilon = 1e-4);
    }

    #[test]
    fn test_complex_zero_fill_is_nodata() {
        let processor = RadiometricProcessor::new(CalibrationParams {
            nodata: Some(0.0),
            ..CalibrationParams::default()
        });
        let slc = array![[SarComplex::new(0.0, 0.0), SarComplex::new(3.0, 4.0)]];

        let db = processor.calibrate_samples(&SceneSamples::Complex(slc.clone()), None).unwrap();
        assert!(db[[0, 0]].is_nan());
        assert_relative_eq!(db[[0, 1]], 10.0 * 25f32.log10(), epsilon = 1e-4);

        // Scene-declared magnitude 5 overrides the configured value
        let db = processor.calibrate_samples(&SceneSamples::Complex(slc.clone()), Some(5.0)).unwrap();
        assert!(db[[0, 0]].is_finite());
        assert!(db[[0, 1]].is_nan());

        let db = processor.calibrate_complex(&slc, 0.0, None).unwrap();
        assert_relative_eq!(db[[0, 0]], -100.0, epsilon = 1e-3);
    }

    #[test]
    fn test_db_conversion_round_trip() {
        let linear = Array2::from_elem((2, 2), 100.0f32);
        let db = RadiometricProcessor::to_db(&linear, DEFAULT_EPSILON);
        assert_relative_eq!(db[[0, 0]], 20.0, epsilon = 1e-5);
        let back = RadiometricProcessor::to_linear(&db);
        assert_relative_eq!(back[[1, 1]], 100.0, epsilon = 1e-3);
    }

    #[test]
    fn test_scene_samples_use_configured_constant() {
        let processor = RadiometricProcessor::new(CalibrationParams {
            mode: CalibrationMode::PowerOnly,
            calibration_constant: 10.0,
            nodata: Some(0.0),
            ..CalibrationParams::default()
        });
        let samples = SceneSamples::Detected(array![[100.0f32, 0.0]]);
        let db = processor.calibrate_samples(&samples, None).unwrap();
        assert_relative_eq!(db[[0, 0]], 10.0, epsilon = 1e-5);
        assert!(db[[0, 1]].is_nan());
    }

    #[test]
    fn test_despeckle_db_keeps_flat_scene() {
        let processor = processor(CalibrationMode::PowerOnly);
        let image = Array2::from_elem((6, 6), -12.0f32);
        let filtered = processor.despeckle_db(&image, 3).unwrap();
        assert_relative_eq!(filtered[[3, 3]], -12.0, epsilon = 1e-4);
        assert!(processor.despeckle(&image, 4).is_err());
    }

    #[test]
    fn test_invalid_quantized_range_rejected() {
        let raw = array![[1u8]];
        let mode = CalibrationMode::Quantized { db_min: 0.0, db_max: -25.0 };
        assert!(processor(mode).calibrate(&raw, 0.0, None).is_err());
    }
}
