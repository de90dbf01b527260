use crate::types::{
    is_valid, BoundingBox, DataCube, No2Result, Reducer, TimeSeries, TimeSeriesPoint,
};
use ndarray::Axis;

/// Reduces a cube to one scalar per timestamp over a region
pub struct SpatialAggregator;

impl SpatialAggregator {
    /// Reduce all valid pixels whose centre lies inside `region`.
    /// A timestamp without valid pixels yields `None`, never zero.
    pub fn aggregate(cube: &DataCube, region: &BoundingBox, reducer: Reducer) -> No2Result<TimeSeries> {
        let (rows, cols, _) = cube.dim();
        log::info!("Aggregating cube {:?} with {} reducer", cube.dim(), reducer);

        let inside: Vec<(usize, usize)> = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .filter(|&(r, c)| {
                let (lon, lat) = cube.transform.pixel_center(r, c);
                region.contains_point(lon, lat)
            })
            .collect();

        if inside.is_empty() {
            log::warn!("No pixel centre of the cube falls inside {:?}", region);
        }

        let points = cube
            .values
            .axis_iter(Axis(2))
            .zip(cube.timestamps.iter())
            .map(|(slice, ts)| {
                let values = inside.iter().map(|&(r, c)| slice[[r, c]]);
                TimeSeriesPoint {
                    timestamp: *ts,
                    value: Self::reduce(values, reducer),
                }
            })
            .collect();

        Ok(TimeSeries::from_points(points))
    }

    /// Apply `reducer` to the valid values of `values`
    pub fn reduce<I: IntoIterator<Item = f32>>(values: I, reducer: Reducer) -> Option<f64> {
        let mut count = 0usize;
        let mut sum = 0.0f64;
        let mut max = f64::NEG_INFINITY;

        for v in values.into_iter().filter(|v| is_valid(*v)) {
            let v = v as f64;
            count += 1;
            sum += v;
            max = max.max(v);
        }

        if count == 0 {
            return None;
        }
        Some(match reducer {
            Reducer::Mean => sum / count as f64,
            Reducer::Max => max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use chrono::{TimeZone, Utc};
    use ndarray::Array3;

    fn cube() -> DataCube {
        let bbox = BoundingBox::new(10.0, 46.0, 12.0, 48.0).unwrap();
        let nan = f32::NAN;
        // 2x2 pixels, 3 timestamps; the last timestamp is all no data
        let values = Array3::from_shape_vec(
            (2, 2, 3),
            vec![1.0, 5.0, nan, 2.0, nan, nan, 3.0, 7.0, nan, 4.0, nan, nan],
        )
        .unwrap();
        let timestamps = (1..=3)
            .map(|d| Utc.with_ymd_and_hms(2019, 7, d, 0, 0, 0).unwrap())
            .collect();
        DataCube::new(values, timestamps, GeoTransform::covering(&bbox, 2, 2)).unwrap()
    }

    #[test]
    fn test_mean_and_max() {
        let cube = cube();
        let region = BoundingBox::new(10.0, 46.0, 12.0, 48.0).unwrap();
        let mean = SpatialAggregator::aggregate(&cube, &region, Reducer::Mean).unwrap();
        let max = SpatialAggregator::aggregate(&cube, &region, Reducer::Max).unwrap();

        let values: Vec<Option<f64>> = mean.points().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Some(2.5), Some(6.0), None]);
        let values: Vec<Option<f64>> = max.points().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Some(4.0), Some(7.0), None]);
    }

    #[test]
    fn test_region_restricts_pixels() {
        let cube = cube();
        // only the top-left pixel centre (10.5, 47.5) is inside
        let region = BoundingBox::new(10.0, 47.0, 11.0, 48.0).unwrap();
        let mean = SpatialAggregator::aggregate(&cube, &region, Reducer::Mean).unwrap();
        assert_eq!(mean.points()[0].value, Some(1.0));
        assert_eq!(mean.points()[1].value, Some(5.0));
    }

    #[test]
    fn test_empty_region_is_no_data_not_zero() {
        let cube = cube();
        let region = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let mean = SpatialAggregator::aggregate(&cube, &region, Reducer::Mean).unwrap();
        assert_eq!(mean.len(), 3);
        assert!(mean.points().iter().all(|p| p.value.is_none()));
    }
}
