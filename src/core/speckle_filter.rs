use crate::types::{ConfigurationError, SarResult};
use ndarray::{Array2, Zip};

/// Speckle filtering parameters
#[derive(Debug, Clone)]
pub struct SpeckleFilterParams {
    /// Filter window size (must be odd, at least 3)
    pub window_size: usize,
}

impl Default for SpeckleFilterParams {
    fn default() -> Self {
        Self {
            window_size: 5, // 5x5 window
        }
    }
}

/// Available speckle filter types
#[derive(Debug, Clone, Copy)]
pub enum SpeckleFilterType {
    /// Lee filter weighted by local against global variance
    Lee,
    /// Median filter (rank filter)
    Median,
}

/// Speckle filter processor
pub struct SpeckleFilter {
    params: SpeckleFilterParams,
}

impl SpeckleFilter {
    /// Create a new speckle filter with default parameters
    pub fn new() -> Self {
        Self {
            params: SpeckleFilterParams::default(),
        }
    }

    /// Create a speckle filter with custom parameters
    pub fn with_params(params: SpeckleFilterParams) -> Self {
        Self { params }
    }

    /// Create a speckle filter for a given window size
    pub fn with_window(window_size: usize) -> Self {
        Self::with_params(SpeckleFilterParams { window_size })
    }

    /// Apply speckle filtering. Output has the input's shape and NaN positions.
    pub fn apply_filter(
        &self,
        image: &Array2<f32>,
        filter_type: SpeckleFilterType,
    ) -> SarResult<Array2<f32>> {
        log::debug!("Applying {:?} speckle filter with {:?}", filter_type, self.params);

        let window_size = self.params.window_size;
        if window_size < 3 || window_size % 2 == 0 {
            return Err(ConfigurationError::InvalidWindowSize(window_size).into());
        }

        let filtered = match filter_type {
            SpeckleFilterType::Lee => self.apply_lee_filter(image),
            SpeckleFilterType::Median => self.apply_median_filter(image),
        };

        Ok(filtered)
    }

    /// Lee filter: each pixel moves toward its local mean with weight
    /// local_variance / (local_variance + global_variance). Homogeneous areas
    /// are smoothed, high-variance areas (edges, point targets) keep more of
    /// their original value.
    fn apply_lee_filter(&self, image: &Array2<f32>) -> Array2<f32> {
        let half_window = self.params.window_size / 2;
        let global_variance = global_variance(image);
        log::debug!("Lee filter global variance: {:.4e}", global_variance);

        let lee_pixel = |i: usize, j: usize, center_value: f32| -> f32 {
            if !center_value.is_finite() {
                return center_value;
            }
            let (local_mean, local_variance) = calculate_local_statistics(image, i, j, half_window);
            let denominator = local_variance + global_variance;
            let weight = if denominator > 0.0 { local_variance / denominator } else { 0.0 };
            (local_mean + weight * (center_value as f64 - local_mean)) as f32
        };

        let mut filtered = image.clone();
        self.for_each_pixel(&mut filtered, lee_pixel);
        filtered
    }

    #[cfg(feature = "parallel")]
    fn for_each_pixel<F>(&self, filtered: &mut Array2<f32>, op: F)
    where
        F: Fn(usize, usize, f32) -> f32 + Sync + Send,
    {
        Zip::indexed(filtered).par_for_each(|(i, j), value| *value = op(i, j, *value));
    }

    #[cfg(not(feature = "parallel"))]
    fn for_each_pixel<F>(&self, filtered: &mut Array2<f32>, op: F)
    where
        F: Fn(usize, usize, f32) -> f32 + Sync + Send,
    {
        Zip::indexed(filtered).for_each(|(i, j), value| *value = op(i, j, *value));
    }

    /// Median of the finite samples in the window; invalid pixels stay invalid
    fn apply_median_filter(&self, image: &Array2<f32>) -> Array2<f32> {
        let (height, width) = image.dim();
        let half_window = self.params.window_size / 2;

        let median_pixel = |i: usize, j: usize, center_value: f32| -> f32 {
            if !center_value.is_finite() {
                return center_value;
            }
            let i_start = i.saturating_sub(half_window);
            let i_end = (i + half_window + 1).min(height);
            let j_start = j.saturating_sub(half_window);
            let j_end = (j + half_window + 1).min(width);

            let mut window_values = Vec::with_capacity(self.params.window_size * self.params.window_size);
            for wi in i_start..i_end {
                for wj in j_start..j_end {
                    let pixel_val = image[[wi, wj]];
                    if pixel_val.is_finite() {
                        window_values.push(pixel_val);
                    }
                }
            }

            let mid = window_values.len() / 2;
            let (_, median, _) = window_values.select_nth_unstable_by(mid, f32::total_cmp);
            *median
        };

        let mut filtered = image.clone();
        self.for_each_pixel(&mut filtered, median_pixel);
        filtered
    }

    /// Estimate the equivalent number of looks (mean² / variance) of linear intensity
    pub fn estimate_number_of_looks(image: &Array2<f32>) -> Option<f32> {
        let values: Vec<f64> = image.iter()
            .filter(|v| v.is_finite() && **v > 0.0)
            .map(|&v| v as f64)
            .collect();

        if values.len() < 2 {
            return None;
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>() / (values.len() - 1) as f64;

        if variance <= 0.0 {
            return None;
        }

        let num_looks = (mean * mean / variance) as f32;
        log::debug!("Estimated number of looks: {:.2}", num_looks);
        Some(num_looks.max(1.0))
    }
}

impl Default for SpeckleFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Population variance of all finite samples
fn global_variance(image: &Array2<f32>) -> f64 {
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for &v in image.iter().filter(|v| v.is_finite()) {
        let v = v as f64;
        sum += v;
        sum_sq += v * v;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean).max(0.0)
}

/// Local mean and population variance over the finite samples of an
/// edge-truncated window
fn calculate_local_statistics(image: &Array2<f32>, center_i: usize, center_j: usize, half_window: usize) -> (f64, f64) {
    let (height, width) = image.dim();
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0usize;

    let i_start = center_i.saturating_sub(half_window);
    let i_end = (center_i + half_window + 1).min(height);
    let j_start = center_j.saturating_sub(half_window);
    let j_end = (center_j + half_window + 1).min(width);

    for i in i_start..i_end {
        for j in j_start..j_end {
            let pixel_val = image[[i, j]];
            if pixel_val.is_finite() {
                let v = pixel_val as f64;
                sum += v;
                sum_sq += v * v;
                count += 1;
            }
        }
    }

    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64) - (mean * mean);
    (mean, variance.max(0.0))
}
