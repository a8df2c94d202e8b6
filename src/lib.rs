//! sarglacier: Multi-Temporal SAR Glacier Monitoring
//!
//! Geolocates a geographic target in a series of Sentinel-1 scenes, calibrates
//! the cropped samples to dB backscatter, partitions them into surface classes
//! with percentile thresholds and morphological cleanup, then derives
//! per-scene glacier areas, pairwise change maps and long-term trends.

pub mod types;
pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, FailureKind, GeoTransform, GroundControlPoint, PixelWindow, Polarization,
    SarError, SarRealImage, SarResult, Scene, SceneSamples,
};

pub use config::PipelineConfig;
pub use pipeline::{BatchReport, GlacierPipeline, LogObserver, PipelineObserver, SceneProduct, SkippedScene};
