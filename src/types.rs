use chrono::NaiveDate;
use ndarray::{s, Array2};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Complex-valued SAR data type (I + jQ)
pub type SarComplex = Complex<f32>;

/// Real-valued intensity, amplitude or dB sample
pub type SarReal = f32;

/// 2D complex SAR data array (azimuth x range)
pub type SarImage = Array2<SarComplex>;

/// 2D real SAR data array (azimuth x range)
pub type SarRealImage = Array2<SarReal>;

/// Boolean mask over a cropped scene window
pub type ClassMask = Array2<bool>;

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl std::str::FromStr for Polarization {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(SarError::InvalidFormat(format!("Invalid polarization: {}", s))),
        }
    }
}

/// Geospatial bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Create a bounding box, rejecting inverted or non-finite extents
    pub fn new(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> SarResult<Self> {
        let bbox = Self { min_lon, max_lon, min_lat, max_lat };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> SarResult<()> {
        let values = [self.min_lon, self.max_lon, self.min_lat, self.max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ConfigurationError::InvalidParameter(
                format!("bounding box has non-finite coordinates: {:?}", self)
            ).into());
        }
        if self.min_lon >= self.max_lon || self.min_lat >= self.max_lat {
            return Err(ConfigurationError::InvalidParameter(
                format!("bounding box is empty or inverted: {:?}", self)
            ).into());
        }
        Ok(())
    }

    /// Corners as (lon, lat): SW, SE, NE, NW
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_lon, self.min_lat),
            (self.max_lon, self.min_lat),
            (self.max_lon, self.max_lat),
            (self.min_lon, self.max_lat),
        ]
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// GDAL-style affine georeference: x = x0 + col*pw + row*rx, y = y0 + col*ry + row*ph
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Build from the six GDAL coefficients
    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    /// Geographic coordinates of a (fractional) pixel position
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }
}

/// Known correspondence between a pixel position and a geographic coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundControlPoint {
    pub pixel_col: f64,
    pub pixel_row: f64,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub height: Option<f64>,
}

impl GroundControlPoint {
    pub fn new(pixel_col: f64, pixel_row: f64, longitude: f64, latitude: f64) -> Self {
        Self { pixel_col, pixel_row, longitude, latitude, height: None }
    }
}

/// Rectangular pixel window, always inside the raster it was resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn col_end(&self) -> usize {
        self.col_off + self.width
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Whether the window fits inside a raster of the given size
    pub fn fits_within(&self, raster_width: usize, raster_height: usize) -> bool {
        self.col_end() <= raster_width && self.row_end() <= raster_height
    }
}

impl std::fmt::Display for PixelWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.col_off, self.row_off)
    }
}

/// Raw samples of a single polarization band
#[derive(Debug, Clone)]
pub enum SceneSamples {
    /// Detected amplitude, power, dB or quantized samples (GRD products, quicklooks)
    Detected(SarRealImage),
    /// Complex single-look samples
    Complex(SarImage),
}

impl SceneSamples {
    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        match self {
            SceneSamples::Detected(data) => data.dim(),
            SceneSamples::Complex(data) => data.dim(),
        }
    }

    /// Copy out the samples inside a window
    pub fn crop(&self, window: &PixelWindow) -> SarResult<SceneSamples> {
        let (rows, cols) = self.dim();
        if !window.fits_within(cols, rows) {
            return Err(GeometryError::OutOfBounds {
                window: *window,
                raster_width: cols,
                raster_height: rows,
            }.into());
        }
        let slice = s![window.row_off..window.row_end(), window.col_off..window.col_end()];
        Ok(match self {
            SceneSamples::Detected(data) => SceneSamples::Detected(data.slice(slice).to_owned()),
            SceneSamples::Complex(data) => SceneSamples::Complex(data.slice(slice).to_owned()),
        })
    }
}

/// One acquisition: a single band plus whatever georeferencing came with it
#[derive(Debug, Clone)]
pub struct Scene {
    id: String,
    date: NaiveDate,
    polarization: Option<Polarization>,
    samples: SceneSamples,
    geo_transform: Option<GeoTransform>,
    control_points: Vec<GroundControlPoint>,
    nodata: Option<f32>,
}

impl Scene {
    pub fn new(id: impl Into<String>, date: NaiveDate, samples: SceneSamples) -> Self {
        Self {
            id: id.into(),
            date,
            polarization: None,
            samples,
            geo_transform: None,
            control_points: Vec::new(),
            nodata: None,
        }
    }

    /// Detected-band convenience constructor
    pub fn detected(id: impl Into<String>, date: NaiveDate, data: SarRealImage) -> Self {
        Self::new(id, date, SceneSamples::Detected(data))
    }

    pub fn with_polarization(mut self, polarization: Polarization) -> Self {
        self.polarization = Some(polarization);
        self
    }

    pub fn with_geo_transform(mut self, geo_transform: GeoTransform) -> Self {
        self.geo_transform = Some(geo_transform);
        self
    }

    pub fn with_control_points(mut self, control_points: Vec<GroundControlPoint>) -> Self {
        self.control_points = control_points;
        self
    }

    pub fn with_nodata(mut self, nodata: f32) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn polarization(&self) -> Option<Polarization> {
        self.polarization
    }

    pub fn samples(&self) -> &SceneSamples {
        &self.samples
    }

    pub fn geo_transform(&self) -> Option<&GeoTransform> {
        self.geo_transform.as_ref()
    }

    pub fn control_points(&self) -> &[GroundControlPoint] {
        &self.control_points
    }

    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    /// Raster width in pixels
    pub fn width(&self) -> usize {
        self.samples.dim().1
    }

    /// Raster height in pixels
    pub fn height(&self) -> usize {
        self.samples.dim().0
    }
}

/// Geometry failures: control points, transforms and windows
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("insufficient control points: {found} supplied, at least {required} required")]
    InsufficientControlPoints { found: usize, required: usize },

    #[error("degenerate control point geometry: {0}")]
    DegenerateGeometry(String),

    #[error("window {window} lies outside the {raster_width}x{raster_height} raster")]
    OutOfBounds {
        window: PixelWindow,
        raster_width: usize,
        raster_height: usize,
    },

    #[error("window {width}x{height} px is below the minimum of {min} px per side")]
    WindowTooSmall { width: usize, height: usize, min: usize },

    #[error("scene has neither a geotransform nor ground control points")]
    MissingGeoreference,
}

/// Data-quality failures of a scene or crop
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataQualityError {
    #[error("no finite samples in the analysed window")]
    NoValidPixels,

    #[error("scene contains no samples")]
    EmptyScene,
}

/// Invalid configuration values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("thresholds are not strictly increasing: {0}")]
    NonMonotonicThresholds(String),

    #[error("filter window size {0} must be odd and at least 3")]
    InvalidWindowSize(usize),

    #[error("structuring element size {0} must be between 1 and 15")]
    InvalidKernelSize(usize),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Trend fitting failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegressionError {
    #[error("insufficient observations: {found} usable, at least {required} required")]
    InsufficientObservations { found: usize, required: usize },

    #[error("all observations share one date, slope is undefined")]
    ZeroTimeSpan,
}

/// Error types for glacier processing
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Data quality error: {0}")]
    DataQuality(#[from] DataQualityError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Regression error: {0}")]
    Regression(#[from] RegressionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Scene processing exceeded {limit_secs:.1} s during {stage}")]
    Timeout { stage: String, limit_secs: f64 },

    #[error("No usable scenes out of {attempted}")]
    NoUsableScenes { attempted: usize },
}

impl SarError {
    /// Failure family, used when a scene is skipped and recorded
    pub fn kind(&self) -> FailureKind {
        match self {
            SarError::Geometry(_) => FailureKind::Geometry,
            SarError::DataQuality(_) => FailureKind::DataQuality,
            SarError::Configuration(_) => FailureKind::Configuration,
            SarError::Regression(_) => FailureKind::Regression,
            SarError::Timeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Other,
        }
    }
}

/// Serializable failure family of a skipped scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Geometry,
    DataQuality,
    Configuration,
    Regression,
    Timeout,
    DuplicateDate,
    Other,
}

impl FailureKind {
    /// Expected per-scene problems are skips; everything else is a failure
    pub fn is_skip(&self) -> bool {
        matches!(self, FailureKind::Geometry | FailureKind::DataQuality | FailureKind::DuplicateDate)
    }
}

/// Result type for glacier processing operations
pub type SarResult<T> = Result<T, SarError>;
