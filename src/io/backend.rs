//! Processing backends
//!
//! The remote service is reached only through [`ProcessingBackend`]. Both
//! implementations write the same artifacts (JSON fragments, GeoTIFF slices,
//! `openEO_<date>Z.tif` tiles), so the features above never know whether the
//! cube was processed remotely or in-process.

use crate::core::aggregate::SpatialAggregator;
use crate::core::cloud_mask::CloudMaskFilter;
use crate::core::gap_fill::{GapFillParams, GapFillProcessor};
use crate::core::query::Query;
use crate::io::raster::RasterReader;
use crate::io::series_json::write_fragment;
use crate::types::{BoundingBox, DataCube, GeoTransform, No2Error, No2Result, Reducer};
use chrono::NaiveDate;
use ndarray::{s, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One parameterized cube pipeline: load both bands, cloud-mask with the query
/// threshold, interpolate along time and optionally smooth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CubeRequestFields")]
pub struct CubeRequest {
    pub query: Query,
    /// Moving-average window; `None` leaves the gap-filled cube unsmoothed
    pub smoothing_window: Option<usize>,
}

/// The nested `Query` validates itself; only the window is checked here
#[derive(Deserialize)]
struct CubeRequestFields {
    query: Query,
    smoothing_window: Option<usize>,
}

impl TryFrom<CubeRequestFields> for CubeRequest {
    type Error = No2Error;

    fn try_from(fields: CubeRequestFields) -> No2Result<Self> {
        if fields.smoothing_window == Some(0) {
            return Err(No2Error::InvalidQuery(
                "moving average window must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            query: fields.query,
            smoothing_window: fields.smoothing_window,
        })
    }
}

impl CubeRequest {
    pub fn gap_filled(query: &Query) -> Self {
        Self {
            query: query.clone(),
            smoothing_window: None,
        }
    }

    pub fn smoothed(query: &Query, window: usize) -> Self {
        Self {
            query: query.clone(),
            smoothing_window: Some(window),
        }
    }
}

/// Identifier of a remote batch job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
}

/// Batch job lifecycle as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Created,
    Queued,
    Running,
    Finished,
    Error,
    Canceled,
}

impl JobStatus {
    pub fn parse(raw: &str) -> No2Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "created" => Ok(JobStatus::Created),
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            "error" => Ok(JobStatus::Error),
            "canceled" => Ok(JobStatus::Canceled),
            other => Err(No2Error::RemoteService(format!("unknown job status '{}'", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error | JobStatus::Canceled)
    }
}

/// Operations consumed from the cloud-processing service
pub trait ProcessingBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Aggregate the cube over the query bbox and write a JSON fragment to `dest`
    fn aggregate(&self, request: &CubeRequest, reducer: Reducer, dest: &Path) -> No2Result<()>;

    /// Write the single slice acquired on `date` as GeoTIFF to `dest`
    fn download_slice(&self, request: &CubeRequest, date: NaiveDate, dest: &Path) -> No2Result<()>;

    fn create_job(&self, request: &CubeRequest, title: &str) -> No2Result<JobHandle>;

    fn start_job(&self, job: &JobHandle) -> No2Result<()>;

    fn job_status(&self, job: &JobHandle) -> No2Result<JobStatus>;

    /// Error diagnostics of a failed job, empty when unavailable
    fn job_logs(&self, job: &JobHandle) -> No2Result<Vec<String>>;

    /// Download every result asset into `dir`, returning the written paths
    fn download_job_results(&self, job: &JobHandle, dir: &Path) -> No2Result<Vec<PathBuf>>;
}

/// In-process backend over a pair of co-registered cubes (NO2, cloud fraction)
pub struct LocalBackend {
    no2: DataCube,
    cloud: DataCube,
    jobs: Mutex<HashMap<String, (CubeRequest, bool)>>,
    next_job: AtomicUsize,
}

impl LocalBackend {
    pub fn new(no2: DataCube, cloud: DataCube) -> No2Result<Self> {
        if no2.dim() != cloud.dim() || no2.timestamps != cloud.timestamps {
            return Err(No2Error::ShapeMismatch(format!(
                "NO2 cube {:?} and cloud cube {:?} are not co-registered",
                no2.dim(),
                cloud.dim()
            )));
        }
        Ok(Self {
            no2,
            cloud,
            jobs: Mutex::new(HashMap::new()),
            next_job: AtomicUsize::new(1),
        })
    }

    /// Run load -> mask -> interpolate (-> smooth) for a request
    pub fn prepare(&self, request: &CubeRequest) -> No2Result<DataCube> {
        let query = &request.query;
        let no2 = Self::subset(&self.no2, query)?;
        let cloud = Self::subset(&self.cloud, query)?;

        let masked = CloudMaskFilter::new(query.cloud_threshold()).apply(&no2, &cloud)?;
        let processor = GapFillProcessor::with_params(GapFillParams {
            window: request.smoothing_window.unwrap_or(1),
        });
        let filled = processor.interpolate_cube(&masked)?;
        match request.smoothing_window {
            Some(_) => processor.smooth_cube(&filled),
            None => Ok(filled),
        }
    }

    /// Crop to the query bbox (pixel centres) and temporal window
    fn subset(cube: &DataCube, query: &Query) -> No2Result<DataCube> {
        let (rows, cols, _) = cube.dim();
        let bbox: &BoundingBox = query.bbox();
        let window = query.window();

        let row_idx: Vec<usize> = (0..rows)
            .filter(|&r| {
                let (_, lat) = cube.transform.pixel_center(r, 0);
                lat >= bbox.south && lat <= bbox.north
            })
            .collect();
        let col_idx: Vec<usize> = (0..cols)
            .filter(|&c| {
                let (lon, _) = cube.transform.pixel_center(0, c);
                lon >= bbox.west && lon <= bbox.east
            })
            .collect();
        let t_idx: Vec<usize> = cube
            .timestamps
            .iter()
            .enumerate()
            .filter(|(_, ts)| window.contains(ts.date_naive()))
            .map(|(i, _)| i)
            .collect();

        if row_idx.is_empty() || col_idx.is_empty() || t_idx.is_empty() {
            return Err(No2Error::RemoteService(format!(
                "no observations inside {:?} between {} and {}",
                bbox, window.start, window.end
            )));
        }

        // bbox and window select contiguous index ranges
        let (r0, r1) = (row_idx[0], row_idx[row_idx.len() - 1] + 1);
        let (c0, c1) = (col_idx[0], col_idx[col_idx.len() - 1] + 1);
        let (t0, t1) = (t_idx[0], t_idx[t_idx.len() - 1] + 1);

        let values: Array3<f32> = cube.values.slice(s![r0..r1, c0..c1, t0..t1]).to_owned();
        let t = &cube.transform;
        let transform = GeoTransform {
            top_left_x: t.top_left_x + c0 as f64 * t.pixel_width + r0 as f64 * t.rotation_x,
            top_left_y: t.top_left_y + c0 as f64 * t.rotation_y + r0 as f64 * t.pixel_height,
            ..*t
        };
        DataCube::new(values, cube.timestamps[t0..t1].to_vec(), transform)
    }

    fn lookup_job(&self, job: &JobHandle) -> No2Result<(CubeRequest, bool)> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| No2Error::RemoteService("job table poisoned".to_string()))?;
        jobs.get(&job.id)
            .cloned()
            .ok_or_else(|| No2Error::RemoteService(format!("unknown job {}", job.id)))
    }
}

impl ProcessingBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn aggregate(&self, request: &CubeRequest, reducer: Reducer, dest: &Path) -> No2Result<()> {
        let cube = self.prepare(request)?;
        let series = SpatialAggregator::aggregate(&cube, request.query.bbox(), reducer)?;
        write_fragment(dest, &series)
    }

    fn download_slice(&self, request: &CubeRequest, date: NaiveDate, dest: &Path) -> No2Result<()> {
        let cube = self.prepare(request)?;
        let t = cube
            .timestamps
            .iter()
            .position(|ts| ts.date_naive() == date)
            .ok_or_else(|| No2Error::RemoteService(format!("no observation on {}", date)))?;
        RasterReader::write_geotiff(dest, &cube.slice_at(t))
    }

    fn create_job(&self, request: &CubeRequest, title: &str) -> No2Result<JobHandle> {
        let id = format!("local-{}", self.next_job.fetch_add(1, Ordering::SeqCst));
        log::info!("Created local job {} ({})", id, title);
        self.jobs
            .lock()
            .map_err(|_| No2Error::RemoteService("job table poisoned".to_string()))?
            .insert(id.clone(), (request.clone(), false));
        Ok(JobHandle { id })
    }

    fn start_job(&self, job: &JobHandle) -> No2Result<()> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| No2Error::RemoteService("job table poisoned".to_string()))?;
        match jobs.get_mut(&job.id) {
            Some(entry) => {
                entry.1 = true;
                Ok(())
            }
            None => Err(No2Error::RemoteService(format!("unknown job {}", job.id))),
        }
    }

    fn job_status(&self, job: &JobHandle) -> No2Result<JobStatus> {
        let (_, started) = self.lookup_job(job)?;
        Ok(if started { JobStatus::Finished } else { JobStatus::Created })
    }

    fn job_logs(&self, _job: &JobHandle) -> No2Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn download_job_results(&self, job: &JobHandle, dir: &Path) -> No2Result<Vec<PathBuf>> {
        let (request, started) = self.lookup_job(job)?;
        if !started {
            return Err(No2Error::RemoteService(format!("job {} was never started", job.id)));
        }
        let cube = self.prepare(&request)?;

        let mut written: Vec<PathBuf> = Vec::new();
        let mut seen: Vec<NaiveDate> = Vec::new();
        for (slice, ts) in cube.values.axis_iter(Axis(2)).zip(cube.timestamps.iter()) {
            let date = ts.date_naive();
            if seen.contains(&date) {
                continue;
            }
            seen.push(date);
            let path = dir.join(format!("openEO_{}Z.tif", date.format("%Y-%m-%d")));
            RasterReader::write_geotiff(&path, &slice.to_owned())?;
            written.push(path);
        }
        log::info!("Local job {} produced {} tiles", job.id, written.len());
        Ok(written)
    }
}
