use crate::types::{DataCube, No2Error, No2Result};
use ndarray::{Array3, Axis, Zip};
use num_traits::Float;

/// Gap-fill and smoothing parameters
#[derive(Debug, Clone)]
pub struct GapFillParams {
    /// Boxcar length in samples
    pub window: usize,
}

impl Default for GapFillParams {
    fn default() -> Self {
        Self { window: 31 }
    }
}

/// Output of the gap-fill stage: two distinct cubes sharing geometry
#[derive(Debug, Clone)]
pub struct GapFilled {
    /// Cloud-masked cube with interior gaps interpolated
    pub filled: DataCube,
    /// `filled` after the per-pixel moving average
    pub smoothed: DataCube,
}

/// Fill interior no-data samples by linear interpolation between the nearest
/// valid neighbours. Leading and trailing gaps stay no data.
pub fn interpolate_linear<T: Float>(series: &[T]) -> Vec<T> {
    let mut out = series.to_vec();
    let mut previous: Option<usize> = None;

    for i in 0..series.len() {
        if !series[i].is_finite() {
            continue;
        }
        if let Some(p) = previous {
            let gap = i - p;
            if gap > 1 {
                let a = series[p];
                let b = series[i];
                let span = T::from(gap).unwrap_or_else(T::one);
                for k in 1..gap {
                    let frac = T::from(k).unwrap_or_else(T::zero) / span;
                    out[p + k] = a + (b - a) * frac;
                }
            }
        }
        previous = Some(i);
    }

    out
}

/// Centered boxcar of length `window` with `same`-length output.
///
/// The window covers `window / 2` samples before and `(window - 1) / 2` after each
/// position. At the series ends and around no-data samples the kernel is
/// truncated and renormalized over the valid samples it covers, so a constant
/// series is returned unchanged. Positions that are no data on input stay no data.
pub fn moving_average<T: Float>(series: &[T], window: usize) -> Vec<T> {
    windowed_mean(series, window, false)
}

/// Like [`moving_average`] but also fills no-data positions whose window
/// contains at least one valid sample.
pub fn rolling_mean<T: Float>(series: &[T], window: usize) -> Vec<T> {
    windowed_mean(series, window, true)
}

fn windowed_mean<T: Float>(series: &[T], window: usize, fill_gaps: bool) -> Vec<T> {
    let n = series.len();
    if n == 0 || window <= 1 {
        return series.to_vec();
    }
    let before = window / 2;
    let after = (window - 1) / 2;

    // prefix sums over valid samples
    let mut sums = vec![T::zero(); n + 1];
    let mut counts = vec![0usize; n + 1];
    for (i, v) in series.iter().enumerate() {
        let valid = v.is_finite();
        sums[i + 1] = sums[i] + if valid { *v } else { T::zero() };
        counts[i + 1] = counts[i] + valid as usize;
    }

    (0..n)
        .map(|i| {
            if !fill_gaps && !series[i].is_finite() {
                return T::nan();
            }
            let lo = i.saturating_sub(before);
            let hi = (i + after + 1).min(n);
            let count = counts[hi] - counts[lo];
            if count == 0 {
                T::nan()
            } else {
                (sums[hi] - sums[lo]) / T::from(count).unwrap_or_else(T::one)
            }
        })
        .collect()
}

/// Interpolation and moving-average processor over data cubes
pub struct GapFillProcessor {
    params: GapFillParams,
}

impl GapFillProcessor {
    /// Create a processor with the default 31-sample window
    pub fn new() -> Self {
        Self {
            params: GapFillParams::default(),
        }
    }

    pub fn with_params(params: GapFillParams) -> Self {
        Self { params }
    }

    pub fn window(&self) -> usize {
        self.params.window
    }

    /// Interpolate, then smooth; returns both cubes
    pub fn process(&self, cube: &DataCube) -> No2Result<GapFilled> {
        let filled = self.interpolate_cube(cube)?;
        let smoothed = self.smooth_cube(&filled)?;
        Ok(GapFilled { filled, smoothed })
    }

    /// Per-pixel linear interpolation along the time axis
    pub fn interpolate_cube(&self, cube: &DataCube) -> No2Result<DataCube> {
        log::info!("Interpolating cube {:?} along time", cube.dim());
        let values = map_time_lanes(&cube.values, |lane| interpolate_linear(lane));
        Ok(cube.with_values(values))
    }

    /// Per-pixel moving average along the time axis
    pub fn smooth_cube(&self, cube: &DataCube) -> No2Result<DataCube> {
        let window = self.params.window;
        if window == 0 {
            return Err(No2Error::InvalidQuery(
                "moving average window must be at least 1".to_string(),
            ));
        }
        log::info!("Applying {}-sample moving average to cube {:?}", window, cube.dim());
        let values = map_time_lanes(&cube.values, |lane| moving_average(lane, window));
        Ok(cube.with_values(values))
    }
}

impl Default for GapFillProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `f` to every pixel's time series, writing into a new cube
fn map_time_lanes<F>(values: &Array3<f32>, f: F) -> Array3<f32>
where
    F: Fn(&[f32]) -> Vec<f32> + Sync,
{
    let mut out = Array3::<f32>::zeros(values.raw_dim());
    let zip = Zip::from(out.lanes_mut(Axis(2))).and(values.lanes(Axis(2)));

    let apply = |mut dst: ndarray::ArrayViewMut1<f32>, src: ndarray::ArrayView1<f32>| {
        let series: Vec<f32> = src.iter().copied().collect();
        for (d, v) in dst.iter_mut().zip(f(&series)) {
            *d = v;
        }
    };

    #[cfg(feature = "parallel")]
    zip.par_for_each(apply);
    #[cfg(not(feature = "parallel"))]
    zip.for_each(apply);

    out
}
