use crate::types::{DataCube, No2Error, No2Result, NO_DATA};
use ndarray::{Array3, Zip};

/// Cloud-fraction based masking of the NO2 band
#[derive(Debug, Clone, Copy)]
pub struct CloudMaskFilter {
    threshold: f32,
}

impl CloudMaskFilter {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// `true` where the pixel is considered cloudy (cloud fraction >= threshold).
    /// No-data cloud fraction never masks.
    pub fn build_mask(&self, cloud: &Array3<f32>) -> Array3<bool> {
        let threshold = self.threshold;
        cloud.mapv(|c| c >= threshold)
    }

    /// Set NO2 to no data wherever the mask is set
    pub fn apply(&self, no2: &DataCube, cloud: &DataCube) -> No2Result<DataCube> {
        Self::check_shapes(no2, cloud)?;
        log::info!("Applying cloud mask (threshold {})", self.threshold);

        let mask = self.build_mask(&cloud.values);
        let masked = Self::mask_with(&no2.values, &mask);

        let removed = mask.iter().filter(|m| **m).count();
        log::debug!("Cloud mask removed {} of {} samples", removed, mask.len());

        Ok(no2.with_values(masked))
    }

    /// Keep only the pixels the complementary predicate (`cloud < threshold`) accepts
    pub fn unmask_complement(&self, no2: &DataCube, cloud: &DataCube) -> No2Result<DataCube> {
        Self::check_shapes(no2, cloud)?;
        let threshold = self.threshold;
        let keep = cloud.values.mapv(|c| c < threshold);
        let complement = keep.mapv(|k| !k);
        Ok(no2.with_values(Self::mask_with(&no2.values, &complement)))
    }

    fn mask_with(values: &Array3<f32>, mask: &Array3<bool>) -> Array3<f32> {
        let mut out = values.clone();
        Zip::from(&mut out).and(mask).for_each(|v, &m| {
            if m {
                *v = NO_DATA;
            }
        });
        out
    }

    fn check_shapes(no2: &DataCube, cloud: &DataCube) -> No2Result<()> {
        if no2.dim() != cloud.dim() {
            return Err(No2Error::ShapeMismatch(format!(
                "NO2 cube {:?} and cloud cube {:?} differ",
                no2.dim(),
                cloud.dim()
            )));
        }
        if no2.timestamps != cloud.timestamps {
            return Err(No2Error::ShapeMismatch(
                "NO2 and cloud cubes have different time axes".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, GeoTransform};
    use chrono::{TimeZone, Utc};

    fn cube(values: Vec<f32>, shape: (usize, usize, usize)) -> DataCube {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let timestamps = (0..shape.2)
            .map(|d| Utc.with_ymd_and_hms(2019, 1, 1 + d as u32, 0, 0, 0).unwrap())
            .collect();
        DataCube::new(
            Array3::from_shape_vec(shape, values).unwrap(),
            timestamps,
            GeoTransform::covering(&bbox, shape.0, shape.1),
        )
        .unwrap()
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let no2 = cube(vec![1.0, 2.0, 3.0, 4.0], (1, 1, 4));
        let cloud = cube(vec![0.1, 0.5, 0.9, f32::NAN], (1, 1, 4));
        let masked = CloudMaskFilter::new(0.5).apply(&no2, &cloud).unwrap();
        let v: Vec<f32> = masked.values.iter().copied().collect();
        assert_eq!(v[0], 1.0);
        assert!(v[1].is_nan());
        assert!(v[2].is_nan());
        assert_eq!(v[3], 4.0);
    }

    #[test]
    fn test_complement_recovers_clear_pixels() {
        let no2 = cube((0..8).map(|v| v as f32).collect(), (2, 2, 2));
        let cloud = cube(vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0, 0.3, 0.7], (2, 2, 2));
        for threshold in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let filter = CloudMaskFilter::new(threshold);
            let masked = filter.apply(&no2, &cloud).unwrap();
            let kept = filter.unmask_complement(&no2, &cloud).unwrap();
            for ((m, k), c) in masked.values.iter().zip(kept.values.iter()).zip(cloud.values.iter()) {
                assert_eq!(!m.is_nan(), *c < threshold);
                assert_eq!(!k.is_nan(), *c < threshold);
            }
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let no2 = cube(vec![1.0; 4], (1, 2, 2));
        let cloud = cube(vec![0.0; 4], (2, 1, 2));
        assert!(matches!(
            CloudMaskFilter::new(0.5).apply(&no2, &cloud),
            Err(No2Error::ShapeMismatch(_))
        ));
    }
}
