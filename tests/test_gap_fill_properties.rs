mod common;

use approx::assert_relative_eq;
use common::{date, init_logging, synthetic_cubes, BBOX};
use ndarray::Array3;
use no2scope::core::aggregate::SpatialAggregator;
use no2scope::core::cloud_mask::CloudMaskFilter;
use no2scope::core::gap_fill::{interpolate_linear, moving_average, rolling_mean, GapFillParams, GapFillProcessor};
use no2scope::types::{BoundingBox, Reducer};

#[test]
fn test_interpolation_is_idempotent_without_gaps() {
    init_logging();
    let series = [1.0f64, 4.0, 2.0, 8.0, 5.0];
    assert_eq!(interpolate_linear(&series), series.to_vec());
}

#[test]
fn test_interpolation_fills_interior_only() {
    init_logging();
    let nan = f32::NAN;
    let out = interpolate_linear(&[nan, 1.0, nan, nan, 4.0, nan]);

    assert!(out[0].is_nan(), "no extrapolation before the first observation");
    assert!(out[5].is_nan(), "no extrapolation after the last observation");
    assert_relative_eq!(out[1], 1.0);
    assert_relative_eq!(out[2], 2.0);
    assert_relative_eq!(out[3], 3.0);
    assert_relative_eq!(out[4], 4.0);

    let lonely = interpolate_linear(&[nan, 7.0f32, nan]);
    assert!(lonely[0].is_nan() && lonely[2].is_nan());
    assert_eq!(lonely[1], 7.0);
}

#[test]
fn test_moving_average_keeps_length_and_constants() {
    init_logging();
    for window in [1usize, 2, 5, 31] {
        let constant = vec![3.5f64; 12];
        let out = moving_average(&constant, window);
        assert_eq!(out.len(), constant.len());
        for v in out {
            assert_relative_eq!(v, 3.5, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_moving_average_window_placement() {
    init_logging();
    // window 3: one sample on each side, truncated at the edges
    let out = moving_average(&[1.0f64, 2.0, 3.0, 4.0], 3);
    assert_relative_eq!(out[0], 1.5);
    assert_relative_eq!(out[1], 2.0);
    assert_relative_eq!(out[2], 3.0);
    assert_relative_eq!(out[3], 3.5);

    // even window: two samples before, one after
    let out = moving_average(&[1.0f64, 2.0, 3.0, 4.0], 4);
    assert_relative_eq!(out[2], 2.5);
}

#[test]
fn test_rolling_mean_fills_gaps_but_moving_average_keeps_them() {
    init_logging();
    let series = [1.0f64, f64::NAN, 3.0];
    let ma = moving_average(&series, 3);
    let rm = rolling_mean(&series, 3);
    assert!(ma[1].is_nan());
    assert_relative_eq!(rm[1], 2.0);
}

#[test]
fn test_mask_and_complement_agree() {
    init_logging();
    let (no2, cloud) = synthetic_cubes(date(2019, 1, 1), 20, 3, 3);
    let filter = CloudMaskFilter::new(0.5);

    let masked = filter.apply(&no2, &cloud).expect("mask");
    let complement = filter.unmask_complement(&no2, &cloud).expect("complement");

    let mut kept = 0;
    for ((a, b), c) in masked.values.iter().zip(complement.values.iter()).zip(cloud.values.iter()) {
        assert_eq!(a.is_nan(), b.is_nan());
        assert_eq!(a.is_nan(), *c >= 0.5);
        if !a.is_nan() {
            kept += 1;
        }
    }
    assert!(kept > 0);
}

#[test]
fn test_mask_rejects_mismatched_cubes() {
    init_logging();
    let (no2, _) = synthetic_cubes(date(2019, 1, 1), 10, 3, 3);
    let (_, cloud) = synthetic_cubes(date(2019, 1, 1), 10, 2, 3);
    let err = CloudMaskFilter::new(0.5).apply(&no2, &cloud).unwrap_err();
    assert_eq!(err.kind(), no2scope::types::ErrorKind::ShapeMismatch);
}

#[test]
fn test_cube_gap_fill_leaves_no_interior_gaps() {
    init_logging();
    let (no2, cloud) = synthetic_cubes(date(2019, 1, 1), 40, 3, 4);
    let masked = CloudMaskFilter::new(0.5).apply(&no2, &cloud).expect("mask");

    let processor = GapFillProcessor::with_params(GapFillParams { window: 7 });
    let result = processor.process(&masked).expect("gap fill");
    let (rows, cols, days) = result.filled.dim();
    assert_eq!(result.smoothed.dim(), (rows, cols, days));

    for r in 0..rows {
        for c in 0..cols {
            let lane = result.filled.pixel_series(r, c);
            let first = lane.iter().position(|v| v.is_finite()).expect("observed pixel");
            let last = lane.iter().rposition(|v| v.is_finite()).expect("observed pixel");
            assert!(lane.iter().skip(first).take(last - first + 1).all(|v| v.is_finite()));
        }
    }
}

#[test]
fn test_zero_window_is_rejected() {
    init_logging();
    let (no2, _) = synthetic_cubes(date(2019, 1, 1), 5, 2, 2);
    let processor = GapFillProcessor::with_params(GapFillParams { window: 0 });
    assert!(processor.smooth_cube(&no2).is_err());
}

#[test]
fn test_aggregation_of_empty_region_is_none() {
    init_logging();
    let (mut no2, _) = synthetic_cubes(date(2019, 1, 1), 3, 2, 2);
    no2.values = Array3::from_elem((2, 2, 3), f32::NAN);
    no2.values[[0, 0, 1]] = 2.0;
    no2.values[[1, 1, 1]] = 4.0;

    let bbox = BoundingBox::new(BBOX.0, BBOX.1, BBOX.2, BBOX.3).expect("bbox");
    let mean = SpatialAggregator::aggregate(&no2, &bbox, Reducer::Mean).expect("mean");
    let max = SpatialAggregator::aggregate(&no2, &bbox, Reducer::Max).expect("max");

    assert_eq!(mean.len(), 3);
    assert_eq!(mean.points()[0].value, None, "no valid pixel is None, not zero");
    assert_relative_eq!(mean.points()[1].value.expect("mean"), 3.0);
    assert_relative_eq!(max.points()[1].value.expect("max"), 4.0);

    let outside = BoundingBox::new(0.0, 0.0, 1.0, 1.0).expect("bbox");
    let empty = SpatialAggregator::aggregate(&no2, &outside, Reducer::Mean).expect("mean");
    assert!(empty.points().iter().all(|p| p.value.is_none()));
}
