//! Geographic to pixel geolocation from scattered ground control points
//!
//! A least-squares polynomial is fitted from (lon, lat) to fractional
//! (col, row). Coordinates are centred and scaled before the fit so the
//! normal equations stay well conditioned for sub-degree extents.

use crate::types::{
    BoundingBox, GeoTransform, GeometryError, GroundControlPoint, PixelWindow, SarResult, Scene,
};
use serde::{Deserialize, Serialize};

/// Minimum number of control points for any fit
pub const MIN_CONTROL_POINTS: usize = 4;

/// Relative pivot magnitude below which the normal equations are singular
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Tolerance when snapping window edges to whole pixels
const EDGE_EPSILON: f64 = 1e-6;

/// Polynomial order of the geographic to pixel transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOrder {
    /// col/row = a0 + a1·lon + a2·lat
    Affine,
    /// Adds lon², lon·lat and lat² terms for long swaths
    Quadratic,
}

impl TransformOrder {
    fn terms(&self) -> usize {
        match self {
            TransformOrder::Affine => 3,
            TransformOrder::Quadratic => 6,
        }
    }

    /// Control points needed to fit this order
    pub fn min_points(&self) -> usize {
        self.terms().max(MIN_CONTROL_POINTS)
    }
}

/// Geolocation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationParams {
    /// Smallest accepted window side in pixels
    pub min_window_size: usize,
    pub transform_order: TransformOrder,
}

impl Default for GeolocationParams {
    fn default() -> Self {
        Self {
            min_window_size: 50,
            transform_order: TransformOrder::Affine,
        }
    }
}

/// Fitted map from geographic coordinates to fractional pixel positions
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialTransform {
    order: TransformOrder,
    lon_center: f64,
    lon_scale: f64,
    lat_center: f64,
    lat_scale: f64,
    col_coeffs: Vec<f64>,
    row_coeffs: Vec<f64>,
    control_points_used: usize,
    rms_residual: f64,
}

impl SpatialTransform {
    /// Analytic inverse of an embedded affine georeference
    pub fn from_geo_transform(gt: &GeoTransform) -> SarResult<Self> {
        let det = gt.pixel_width * gt.pixel_height - gt.rotation_x * gt.rotation_y;
        if !det.is_finite() || det.abs() < f64::EPSILON * gt.pixel_width.abs().max(gt.pixel_height.abs()).powi(2) {
            return Err(GeometryError::DegenerateGeometry(
                format!("geotransform is not invertible (determinant {:e})", det)
            ).into());
        }

        let (x0, y0) = (gt.top_left_x, gt.top_left_y);
        let col_coeffs = vec![
            (gt.rotation_x * y0 - gt.pixel_height * x0) / det,
            gt.pixel_height / det,
            -gt.rotation_x / det,
        ];
        let row_coeffs = vec![
            (gt.rotation_y * x0 - gt.pixel_width * y0) / det,
            -gt.rotation_y / det,
            gt.pixel_width / det,
        ];

        Ok(Self {
            order: TransformOrder::Affine,
            lon_center: 0.0,
            lon_scale: 1.0,
            lat_center: 0.0,
            lat_scale: 1.0,
            col_coeffs,
            row_coeffs,
            control_points_used: 0,
            rms_residual: 0.0,
        })
    }

    /// Fractional (col, row) of a geographic coordinate
    pub fn geo_to_pixel(&self, lon: f64, lat: f64) -> (f64, f64) {
        let basis = self.basis(lon, lat);
        (dot(&self.col_coeffs, &basis), dot(&self.row_coeffs, &basis))
    }

    pub fn order(&self) -> TransformOrder {
        self.order
    }

    /// Number of control points the transform was fitted on (0 for a geotransform)
    pub fn control_points_used(&self) -> usize {
        self.control_points_used
    }

    /// Root-mean-square fit residual at the control points, in pixels
    pub fn rms_residual(&self) -> f64 {
        self.rms_residual
    }

    fn basis(&self, lon: f64, lat: f64) -> Vec<f64> {
        let u = (lon - self.lon_center) / self.lon_scale;
        let v = (lat - self.lat_center) / self.lat_scale;
        polynomial_terms(self.order, u, v)
    }
}

/// Resolves crop windows for a geographic target
pub struct GeolocationResolver {
    params: GeolocationParams,
}

impl GeolocationResolver {
    pub fn new(params: GeolocationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GeolocationParams {
        &self.params
    }

    /// Least-squares fit of pixel position against geographic coordinates
    pub fn build_transform(&self, gcps: &[GroundControlPoint]) -> SarResult<SpatialTransform> {
        let order = self.params.transform_order;
        let required = order.min_points();
        if gcps.len() < required {
            return Err(GeometryError::InsufficientControlPoints {
                found: gcps.len(),
                required,
            }.into());
        }

        if let Some(bad) = gcps.iter().find(|g| {
            !(g.longitude.is_finite() && g.latitude.is_finite() && g.pixel_col.is_finite() && g.pixel_row.is_finite())
        }) {
            return Err(GeometryError::DegenerateGeometry(
                format!("non-finite control point {:?}", bad)
            ).into());
        }

        let (lon_center, lon_scale) = center_and_scale(gcps.iter().map(|g| g.longitude));
        let (lat_center, lat_scale) = center_and_scale(gcps.iter().map(|g| g.latitude));
        if lon_scale == 0.0 || lat_scale == 0.0 {
            return Err(GeometryError::DegenerateGeometry(
                "control points have no spread in longitude or latitude".to_string()
            ).into());
        }

        let design: Vec<Vec<f64>> = gcps.iter()
            .map(|g| {
                let u = (g.longitude - lon_center) / lon_scale;
                let v = (g.latitude - lat_center) / lat_scale;
                polynomial_terms(order, u, v)
            })
            .collect();
        let cols: Vec<f64> = gcps.iter().map(|g| g.pixel_col).collect();
        let rows: Vec<f64> = gcps.iter().map(|g| g.pixel_row).collect();

        let col_coeffs = least_squares(&design, &cols)?;
        let row_coeffs = least_squares(&design, &rows)?;

        let mut transform = SpatialTransform {
            order,
            lon_center,
            lon_scale,
            lat_center,
            lat_scale,
            col_coeffs,
            row_coeffs,
            control_points_used: gcps.len(),
            rms_residual: 0.0,
        };

        let sum_sq: f64 = gcps.iter()
            .map(|g| {
                let (col, row) = transform.geo_to_pixel(g.longitude, g.latitude);
                (col - g.pixel_col).powi(2) + (row - g.pixel_row).powi(2)
            })
            .sum();
        transform.rms_residual = (sum_sq / gcps.len() as f64).sqrt();

        log::debug!(
            "Fitted {:?} transform on {} control points, RMS residual {:.3} px",
            order, gcps.len(), transform.rms_residual
        );
        Ok(transform)
    }

    /// Transform for a scene: its geotransform when present, otherwise a fit
    /// over its control points
    pub fn transform_for_scene(&self, scene: &Scene) -> SarResult<SpatialTransform> {
        if let Some(gt) = scene.geo_transform() {
            return SpatialTransform::from_geo_transform(gt);
        }
        if scene.control_points().is_empty() {
            return Err(GeometryError::MissingGeoreference.into());
        }
        self.build_transform(scene.control_points())
    }

    /// Pixel window covering `bbox`, clamped to the raster
    pub fn resolve_window(
        &self,
        transform: &SpatialTransform,
        bbox: &BoundingBox,
        raster_width: usize,
        raster_height: usize,
    ) -> SarResult<PixelWindow> {
        let mut min_col = f64::INFINITY;
        let mut max_col = f64::NEG_INFINITY;
        let mut min_row = f64::INFINITY;
        let mut max_row = f64::NEG_INFINITY;

        for (lon, lat) in bbox.corners() {
            let (col, row) = transform.geo_to_pixel(lon, lat);
            if !col.is_finite() || !row.is_finite() {
                return Err(GeometryError::DegenerateGeometry(
                    format!("corner ({}, {}) maps to a non-finite pixel", lon, lat)
                ).into());
            }
            min_col = min_col.min(col);
            max_col = max_col.max(col);
            min_row = min_row.min(row);
            max_row = max_row.max(row);
        }

        let col_start = (min_col + EDGE_EPSILON).floor();
        let col_end = (max_col - EDGE_EPSILON).ceil();
        let row_start = (min_row + EDGE_EPSILON).floor();
        let row_end = (max_row - EDGE_EPSILON).ceil();

        let (width_f, height_f) = (raster_width as f64, raster_height as f64);
        let c0 = col_start.clamp(0.0, width_f);
        let c1 = col_end.clamp(0.0, width_f);
        let r0 = row_start.clamp(0.0, height_f);
        let r1 = row_end.clamp(0.0, height_f);

        if c1 <= c0 || r1 <= r0 {
            let requested = PixelWindow {
                col_off: col_start.max(0.0) as usize,
                row_off: row_start.max(0.0) as usize,
                width: (col_end - col_start).max(0.0) as usize,
                height: (row_end - row_start).max(0.0) as usize,
            };
            return Err(GeometryError::OutOfBounds {
                window: requested,
                raster_width,
                raster_height,
            }.into());
        }

        let window = PixelWindow {
            col_off: c0 as usize,
            row_off: r0 as usize,
            width: (c1 - c0) as usize,
            height: (r1 - r0) as usize,
        };

        let min = self.params.min_window_size;
        if window.width < min || window.height < min {
            return Err(GeometryError::WindowTooSmall {
                width: window.width,
                height: window.height,
                min,
            }.into());
        }

        log::debug!("Resolved window {} in {}x{} raster", window, raster_width, raster_height);
        Ok(window)
    }

    /// Transform plus window for a scene
    pub fn resolve_scene(&self, scene: &Scene, bbox: &BoundingBox) -> SarResult<(SpatialTransform, PixelWindow)> {
        let transform = self.transform_for_scene(scene)?;
        let window = self.resolve_window(&transform, bbox, scene.width(), scene.height())?;
        Ok((transform, window))
    }
}

impl Default for GeolocationResolver {
    fn default() -> Self {
        Self::new(GeolocationParams::default())
    }
}

fn polynomial_terms(order: TransformOrder, u: f64, v: f64) -> Vec<f64> {
    match order {
        TransformOrder::Affine => vec![1.0, u, v],
        TransformOrder::Quadratic => vec![1.0, u, v, u * u, u * v, v * v],
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Mean and half-range of a coordinate set
fn center_and_scale(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let (sum, count) = values.clone().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    let center = sum / count.max(1) as f64;
    let scale = values.fold(0.0f64, |m, v| m.max((v - center).abs()));
    (center, scale)
}

/// Solve the normal equations AᵀA x = Aᵀb
fn least_squares(design: &[Vec<f64>], target: &[f64]) -> SarResult<Vec<f64>> {
    let terms = design.first().map_or(0, |r| r.len());
    let mut ata = vec![vec![0.0; terms]; terms];
    let mut atb = vec![0.0; terms];

    for (row, &b) in design.iter().zip(target) {
        for i in 0..terms {
            atb[i] += row[i] * b;
            for j in 0..terms {
                ata[i][j] += row[i] * row[j];
            }
        }
    }

    solve_linear_system(ata, atb)
}

/// Gaussian elimination with partial pivoting
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> SarResult<Vec<f64>> {
    let n = b.len();
    let scale = a.iter().enumerate().map(|(i, r)| r[i].abs()).fold(0.0f64, f64::max);
    let tolerance = PIVOT_TOLERANCE * scale.max(f64::MIN_POSITIVE);

    for k in 0..n {
        let pivot_row = (k..n)
            .max_by(|&i, &j| a[i][k].abs().total_cmp(&a[j][k].abs()))
            .unwrap_or(k);
        if a[pivot_row][k].abs() < tolerance {
            return Err(GeometryError::DegenerateGeometry(
                "control points are collinear or the fit is singular".to_string()
            ).into());
        }
        a.swap(k, pivot_row);
        b.swap(k, pivot_row);

        for i in (k + 1)..n {
            let factor = a[i][k] / a[k][k];
            for j in k..n {
                a[i][j] -= factor * a[k][j];
            }
            b[i] -= factor * b[k];
        }
    }

    let mut x = vec![0.0; n];
    for k in (0..n).rev() {
        let tail: f64 = ((k + 1)..n).map(|j| a[k][j] * x[j]).sum();
        x[k] = (b[k] - tail) / a[k][k];
    }
    Ok(x)
}
