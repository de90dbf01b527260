#![allow(dead_code)]

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use ndarray::Array3;
use no2scope::config::DashboardConfig;
use no2scope::types::{BoundingBox, DataCube, GeoTransform};
use no2scope::{LocalBackend, Query, QueryBuilder};
use std::path::Path;

pub const BBOX: (f64, f64, f64, f64) = (10.35, 46.10, 12.55, 47.13);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn query(start: &str, end: &str) -> Query {
    QueryBuilder::new()
        .bbox(BBOX.0, BBOX.1, BBOX.2, BBOX.3)
        .dates_str(start, end)
        .cloud_threshold(0.5)
        .build()
        .expect("valid query")
}

/// Daily NO2 and cloud cubes over the test bbox starting at `start`.
/// NO2 oscillates around 1e-4 mol/m² with a per-pixel offset; every fifth
/// sample along a diagonal pattern is cloudy (0.9), the rest clear (0.1).
pub fn synthetic_cubes(start: NaiveDate, days: usize, rows: usize, cols: usize) -> (DataCube, DataCube) {
    let bbox = BoundingBox::new(BBOX.0, BBOX.1, BBOX.2, BBOX.3).expect("valid bbox");
    let transform = GeoTransform::covering(&bbox, rows, cols);
    let timestamps: Vec<_> = (0..days)
        .map(|d| {
            let day = start + Duration::days(d as i64);
            Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).expect("midnight"))
        })
        .collect();

    let no2 = Array3::from_shape_fn((rows, cols, days), |(r, c, t)| {
        let seasonal = 1.0 + 0.3 * (2.0 * std::f32::consts::PI * t as f32 / 30.0).sin();
        1e-4 * (1.0 + r as f32 + 0.1 * c as f32) * seasonal
    });
    let cloud = Array3::from_shape_fn((rows, cols, days), |(r, c, t)| {
        if (t + r + c) % 5 == 0 {
            0.9
        } else {
            0.1
        }
    });

    (
        DataCube::new(no2, timestamps.clone(), transform).expect("no2 cube"),
        DataCube::new(cloud, timestamps, transform).expect("cloud cube"),
    )
}

pub fn local_backend(start: NaiveDate, days: usize) -> LocalBackend {
    let (no2, cloud) = synthetic_cubes(start, days, 4, 5);
    LocalBackend::new(no2, cloud).expect("co-registered cubes")
}

/// Default configuration with every path under `root` and fast polling
pub fn test_config(root: &Path) -> DashboardConfig {
    let mut cfg = DashboardConfig::default();
    cfg.paths.staging_root = root.join("staging");
    cfg.paths.output_dir = root.join("output");
    cfg.animation.poll_interval_ms = 10;
    cfg.animation.poll_timeout_secs = 5;
    cfg.animation.max_poll_failures = 2;
    cfg.render.pixel_scale = 2;
    cfg
}

pub fn entries(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(read) => read
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}
