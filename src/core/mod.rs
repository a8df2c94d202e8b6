//! Core glacier processing modules

pub mod calibrate;
pub mod change_detection;
pub mod classifier;
pub mod geolocation;
pub mod morphology;
pub mod speckle_filter;
pub mod statistics;
pub mod trend;

// Re-export main types
pub use calibrate::{CalibrationMode, CalibrationParams, RadiometricProcessor};
pub use change_detection::{ChangeDetector, ChangeParams, ChangePercentages, ChangeResult, ChangeStats};
pub use classifier::{
    AreaMeasurement, ClassifiedRegion, ClassifierParams, SceneMeasurement, SurfaceClass,
    SurfaceClassifier, Threshold,
};
pub use geolocation::{GeolocationParams, GeolocationResolver, SpatialTransform, TransformOrder};
pub use morphology::StructuringElement;
pub use speckle_filter::{SpeckleFilter, SpeckleFilterParams, SpeckleFilterType};
pub use statistics::BackscatterStats;
pub use trend::{TrendEstimator, TrendParams, TrendResult};
