//! I/O modules for the processing service, rasters, time series fragments and the reference dataset

pub mod artifact;
pub mod backend;
pub mod openeo;
pub mod raster;
pub mod series_json;
pub mod reference;

pub use artifact::publish;
pub use backend::{CubeRequest, JobHandle, JobStatus, LocalBackend, ProcessingBackend};
pub use openeo::OpenEoBackend;
pub use raster::RasterReader;
pub use reference::{ReferenceReader, ReferenceSeries};
