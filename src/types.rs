use chrono::{DateTime, NaiveDate, Utc};
use ndarray::{Array2, Array3, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// No-data marker used in every cube and raster
pub const NO_DATA: f32 = f32::NAN;

/// Returns true if a sample carries a usable measurement
#[inline]
pub fn is_valid(value: f32) -> bool {
    value.is_finite()
}

/// Geospatial bounding box (EPSG:4326)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// Create a validated bounding box
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> No2Result<Self> {
        if ![west, south, east, north].iter().all(|v| v.is_finite()) {
            return Err(No2Error::InvalidQuery(format!(
                "bounding box coordinates must be finite: ({}, {}, {}, {})",
                west, south, east, north
            )));
        }
        if west >= east {
            return Err(No2Error::InvalidQuery(format!(
                "west ({}) must be smaller than east ({})",
                west, east
            )));
        }
        if south >= north {
            return Err(No2Error::InvalidQuery(format!(
                "south ({}) must be smaller than north ({})",
                south, north
            )));
        }
        Ok(Self { west, south, east, north })
    }

    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }

    /// True if `other` lies entirely inside this box
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.west >= self.west
            && other.east <= self.east
            && other.south >= self.south
            && other.north <= self.north
    }

    /// Closed GeoJSON polygon ring, counter-clockwise
    pub fn to_geojson_polygon(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [[
                [self.west, self.south],
                [self.east, self.south],
                [self.east, self.north],
                [self.west, self.north],
                [self.west, self.south]
            ]]
        })
    }
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalExtent {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TemporalExtent {
    pub fn new(start: NaiveDate, end: NaiveDate) -> No2Result<Self> {
        if start > end {
            return Err(No2Error::InvalidQuery(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn contains_extent(&self, other: &TemporalExtent) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// openEO temporal extents are half-open, so the end is shifted by one day
    pub fn to_openeo_interval(&self) -> [String; 2] {
        let end = self.end.succ_opt().unwrap_or(self.end);
        [self.start.to_string(), end.to_string()]
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform covering `bbox` with a `rows x cols` grid
    pub fn covering(bbox: &BoundingBox, rows: usize, cols: usize) -> Self {
        Self {
            top_left_x: bbox.west,
            pixel_width: (bbox.east - bbox.west) / cols.max(1) as f64,
            rotation_x: 0.0,
            top_left_y: bbox.north,
            rotation_y: 0.0,
            pixel_height: -(bbox.north - bbox.south) / rows.max(1) as f64,
        }
    }

    /// Geographic coordinates of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        let lon = self.top_left_x + c * self.pixel_width + r * self.rotation_x;
        let lat = self.top_left_y + c * self.rotation_y + r * self.pixel_height;
        (lon, lat)
    }
}

/// A space x space x time data cube, shaped `(rows, cols, time)`.
/// No-data samples are `NaN`.
#[derive(Debug, Clone)]
pub struct DataCube {
    pub values: Array3<f32>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub transform: GeoTransform,
}

impl DataCube {
    pub fn new(
        values: Array3<f32>,
        timestamps: Vec<DateTime<Utc>>,
        transform: GeoTransform,
    ) -> No2Result<Self> {
        let (_, _, t) = values.dim();
        if t != timestamps.len() {
            return Err(No2Error::ShapeMismatch(format!(
                "cube has {} time steps but {} timestamps",
                t,
                timestamps.len()
            )));
        }
        Ok(Self { values, timestamps, transform })
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    /// Time series of a single pixel
    pub fn pixel_series(&self, row: usize, col: usize) -> ArrayView1<'_, f32> {
        self.values.slice(ndarray::s![row, col, ..])
    }

    /// 2-D slice at time index `t`
    pub fn slice_at(&self, t: usize) -> Array2<f32> {
        self.values.index_axis(Axis(2), t).to_owned()
    }

    /// Same geometry and timestamps, new values
    pub fn with_values(&self, values: Array3<f32>) -> Self {
        Self {
            values,
            timestamps: self.timestamps.clone(),
            transform: self.transform,
        }
    }
}

/// A 2-D raster with its acquisition date
#[derive(Debug, Clone)]
pub struct RasterFrame {
    pub date: NaiveDate,
    pub values: Array2<f32>,
}

impl RasterFrame {
    pub fn new(date: NaiveDate, values: Array2<f32>) -> Self {
        Self { date, values }
    }

    /// Range over valid pixels, `None` if the frame holds no data
    pub fn value_range(&self) -> Option<ValueRange> {
        ValueRange::of(self.values.iter().copied())
    }
}

/// Closed value interval used for color scaling
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

impl ValueRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Fold over valid samples only
    pub fn of<I: IntoIterator<Item = f32>>(values: I) -> Option<Self> {
        values
            .into_iter()
            .filter(|v| is_valid(*v))
            .fold(None, |acc, v| Some(Self::merge_value(acc, v)))
    }

    fn merge_value(acc: Option<Self>, v: f32) -> Self {
        match acc {
            Some(r) => Self::new(r.min.min(v), r.max.max(v)),
            None => Self::new(v, v),
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Position of `value` in the range, clamped to [0, 1]
    pub fn normalize(&self, value: f32) -> f32 {
        let span = self.max - self.min;
        if span.abs() < f32::EPSILON {
            return 0.5;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }
}

/// One observation of an aggregated series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

/// Timestamp-ordered series with unique timestamps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    points: Vec<TimeSeriesPoint>,
}

impl TimeSeries {
    /// Sorts by timestamp; for duplicate timestamps the last point wins
    pub fn from_points(mut points: Vec<TimeSeriesPoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        let mut unique: Vec<TimeSeriesPoint> = Vec::with_capacity(points.len());
        for p in points {
            match unique.last_mut() {
                Some(last) if last.timestamp == p.timestamp => *last = p,
                _ => unique.push(p),
            }
        }
        Self { points: unique }
    }

    pub fn points(&self) -> &[TimeSeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, timestamp: &DateTime<Utc>) -> Option<f64> {
        self.points
            .binary_search_by_key(timestamp, |p| p.timestamp)
            .ok()
            .and_then(|i| self.points[i].value)
    }
}

/// Spatial reducer kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reducer {
    Mean,
    Max,
}

impl Reducer {
    /// openEO process id
    pub fn process_id(&self) -> &'static str {
        match self {
            Reducer::Mean => "mean",
            Reducer::Max => "max",
        }
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.process_id())
    }
}

/// Animation pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Submitted,
    Polling,
    Downloading,
    Decoding,
    GlobalRangeScan,
    Rendering,
    Compositing,
    CleaningUp,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Submitted => "submitted",
            PipelineStage::Polling => "polling",
            PipelineStage::Downloading => "downloading",
            PipelineStage::Decoding => "decoding",
            PipelineStage::GlobalRangeScan => "global range scan",
            PipelineStage::Rendering => "rendering",
            PipelineStage::Compositing => "compositing",
            PipelineStage::CleaningUp => "cleaning up",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Coarse error classification reported to the UI layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidQuery,
    ShapeMismatch,
    DateOutOfRange,
    RemoteService,
    ArtifactIo,
}

/// Error types for NO2 processing
#[derive(Debug, thiserror::Error)]
pub enum No2Error {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Date {date} is outside the interpolation window {window_start}..{window_end}; pick a date inside the selected timeframe")]
    DateOutOfRange {
        date: NaiveDate,
        window_start: NaiveDate,
        window_end: NaiveDate,
    },

    #[error("Remote service error: {0}")]
    RemoteService(String),

    #[error("Artifact error: {0}")]
    ArtifactIo(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: Box<No2Error>,
    },
}

impl No2Error {
    /// Attach the pipeline stage in which the error happened
    pub fn at_stage(self, stage: PipelineStage) -> Self {
        match self {
            staged @ No2Error::Stage { .. } => staged,
            other => No2Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            No2Error::InvalidQuery(_) | No2Error::Config(_) => ErrorKind::InvalidQuery,
            No2Error::ShapeMismatch(_) => ErrorKind::ShapeMismatch,
            No2Error::DateOutOfRange { .. } => ErrorKind::DateOutOfRange,
            No2Error::RemoteService(_) | No2Error::Http(_) => ErrorKind::RemoteService,
            No2Error::ArtifactIo(_)
            | No2Error::Io(_)
            | No2Error::Json(_)
            | No2Error::Tiff(_)
            | No2Error::Image(_)
            | No2Error::Csv(_) => ErrorKind::ArtifactIo,
            #[cfg(feature = "gdal")]
            No2Error::Gdal(_) => ErrorKind::ArtifactIo,
            No2Error::Stage { source, .. } => source.kind(),
        }
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            No2Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Result type for NO2 operations
pub type No2Result<T> = Result<T, No2Error>;
