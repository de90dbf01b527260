//! Dashboard configuration
//!
//! Every field has a default so an empty file (or none at all) yields a working
//! setup against openeo.cloud. Values are layered from an optional TOML file and
//! `NO2SCOPE__<SECTION>__<KEY>` environment variables.

use crate::types::{BoundingBox, No2Error, No2Result, TemporalExtent};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Remote processing service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// openEO API root, e.g. `https://openeo.cloud/openeo/1.1`
    pub url: String,
    /// Bearer token in openEO form (`oidc/<provider>/<token>` or `basic//<token>`)
    pub token: Option<String>,
    pub collection: String,
    pub no2_band: String,
    pub cloud_band: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "https://openeo.cloud/openeo/1.1".to_string(),
            token: None,
            collection: "SENTINEL_5P_L2".to_string(),
            no2_band: "NO2".to_string(),
            cloud_band: "CLOUD_FRACTION".to_string(),
            request_timeout_secs: 600,
            max_retries: 3,
            retry_backoff_ms: 2000,
        }
    }
}

/// Window lengths for the two smoothing levels
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Moving average applied per pixel along time
    pub cube_window: usize,
    /// Rolling mean applied to the aggregated mean series
    pub series_window: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            cube_window: 31,
            series_window: 7,
        }
    }
}

/// Local ground-station reference dataset
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub path: Option<PathBuf>,
    /// Date of the first data row
    pub start_date: NaiveDate,
    pub scale: f64,
    pub coverage: BoundingBox,
    pub coverage_start: NaiveDate,
    pub coverage_end: NaiveDate,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default();
        let end = NaiveDate::from_ymd_opt(2019, 12, 31).unwrap_or_default();
        Self {
            path: None,
            start_date: start,
            scale: 0.1,
            coverage: BoundingBox {
                west: 10.35,
                south: 46.10,
                east: 12.55,
                north: 47.13,
            },
            coverage_start: start,
            coverage_end: end,
        }
    }
}

impl ReferenceConfig {
    pub fn coverage_window(&self) -> TemporalExtent {
        TemporalExtent {
            start: self.coverage_start,
            end: self.coverage_end,
        }
    }
}

/// Image rendering settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Colormap name: `viridis`, `inferno` or `grayscale`
    pub colormap: String,
    /// Integer upscaling applied to raster pixels
    pub pixel_scale: u32,
    /// TrueType font used for titles and labels
    pub font_path: Option<PathBuf>,
    pub chart_width: u32,
    pub chart_height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            colormap: "viridis".to_string(),
            pixel_scale: 8,
            font_path: None,
            chart_width: 1000,
            chart_height: 500,
        }
    }
}

/// Batch animation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    pub fps: u32,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
    /// Consecutive failed status polls tolerated before giving up
    pub max_poll_failures: u32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            fps: 2,
            poll_interval_ms: 5000,
            poll_timeout_secs: 3 * 3600,
            max_poll_failures: 5,
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Parent of the per-request staging directories
    pub staging_root: PathBuf,
    /// Where final artifacts (PNG, GIF, CSV) are written
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("no2scope");
        Self {
            staging_root: base.join("staging"),
            output_dir: base.join("output"),
        }
    }
}

/// Complete dashboard configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub backend: BackendConfig,
    pub smoothing: SmoothingConfig,
    pub reference: ReferenceConfig,
    pub render: RenderConfig,
    pub animation: AnimationConfig,
    pub paths: PathsConfig,
}

impl DashboardConfig {
    /// Load from an optional TOML file layered with `NO2SCOPE__*` environment variables
    pub fn load(path: Option<&Path>) -> No2Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            log::info!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("NO2SCOPE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let cfg: DashboardConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> No2Result<()> {
        if self.smoothing.cube_window == 0 || self.smoothing.series_window == 0 {
            return Err(No2Error::InvalidQuery(
                "smoothing windows must be at least 1".to_string(),
            ));
        }
        if !(1..=80).contains(&self.animation.fps) {
            return Err(No2Error::InvalidQuery(format!(
                "frame rate {} is outside 1..=80",
                self.animation.fps
            )));
        }
        BoundingBox::new(
            self.reference.coverage.west,
            self.reference.coverage.south,
            self.reference.coverage.east,
            self.reference.coverage.north,
        )?;
        TemporalExtent::new(self.reference.coverage_start, self.reference.coverage_end)?;
        Ok(())
    }
}
