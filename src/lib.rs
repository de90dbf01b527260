//! no2scope: Sentinel-5P TROPOMI NO2 exploration
//!
//! This library builds cloud-masked, gap-filled NO2 data cubes through an
//! openEO processing service (or locally) and turns them into aligned time
//! series tables, single-date map snapshots and animated GIFs.

pub mod types;
pub mod config;
pub mod io;
pub mod core;
pub mod render;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, DataCube, ErrorKind, No2Error, No2Result, PipelineStage, RasterFrame, Reducer,
    TemporalExtent, TimeSeries, TimeSeriesPoint, ValueRange,
};

pub use config::DashboardConfig;
pub use core::{Dashboard, Query, QueryBuilder};
pub use io::{LocalBackend, OpenEoBackend, ProcessingBackend, RasterReader};
