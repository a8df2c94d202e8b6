//! Pipeline configuration
//!
//! Every tunable of the core lives here; nothing is hardcoded in the
//! processing stages. Missing JSON fields take their defaults.

use crate::core::calibrate::{CalibrationMode, CalibrationParams};
use crate::core::change_detection::ChangeParams;
use crate::core::classifier::ClassifierParams;
use crate::core::geolocation::GeolocationParams;
use crate::core::trend::TrendParams;
use crate::types::{BoundingBox, ConfigurationError, SarResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full configuration of a glacier monitoring run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Geographic target
    pub target: BoundingBox,
    pub geolocation: GeolocationParams,
    pub calibration: CalibrationParams,
    /// Lee filter window applied after calibration, `None` to skip
    pub speckle_window: Option<usize>,
    pub classifier: ClassifierParams,
    pub change: ChangeParams,
    pub trend: TrendParams,
    /// Scenes processed concurrently, 0 for one per core
    pub max_workers: usize,
    /// Per-scene processing deadline, checked between stages
    pub scene_timeout_secs: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target: BoundingBox {
                min_lon: 74.460,
                max_lon: 74.520,
                min_lat: 42.440,
                max_lat: 42.500,
            },
            geolocation: GeolocationParams::default(),
            calibration: CalibrationParams {
                mode: CalibrationMode::AmplitudeSquared,
                calibration_constant: 52.7,
                ..CalibrationParams::default()
            },
            speckle_window: Some(5),
            classifier: ClassifierParams::default(),
            change: ChangeParams::default(),
            trend: TrendParams::default(),
            max_workers: 0,
            scene_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Check every section, reporting the first problem found
    pub fn validate(&self) -> SarResult<()> {
        self.target.validate()?;
        if self.geolocation.min_window_size == 0 {
            return Err(ConfigurationError::InvalidParameter(
                "minimum window size must be at least 1 pixel".to_string()
            ).into());
        }
        self.calibration.validate()?;
        if let Some(window) = self.speckle_window {
            if window < 3 || window % 2 == 0 {
                return Err(ConfigurationError::InvalidWindowSize(window).into());
            }
        }
        self.classifier.validate()?;
        self.change.validate()?;
        self.trend.validate()?;
        if let Some(limit) = self.scene_timeout_secs {
            if !(limit > 0.0) || !limit.is_finite() {
                return Err(ConfigurationError::InvalidParameter(
                    format!("scene timeout must be positive, got {}", limit)
                ).into());
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> SarResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Write the configuration as pretty JSON
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> SarResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
