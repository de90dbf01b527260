//! openEO client: process-graph construction and the HTTP backend

use crate::config::BackendConfig;
use crate::io::backend::{CubeRequest, JobHandle, JobStatus, ProcessingBackend};
use crate::types::{No2Error, No2Result, Reducer};
use chrono::NaiveDate;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Python UDF run per pixel along `t`; same truncated, renormalized boxcar as
/// `core::gap_fill::moving_average`
pub fn moving_average_udf(window: usize) -> String {
    format!(
        r#"import numpy as np
from pandas import Series


def apply_timeseries(series: Series, context: dict) -> Series:
    n = int(context.get("window", {window}))
    values = series.to_numpy(dtype=float)
    valid = np.isfinite(values)
    kernel = np.ones(n)
    sums = np.convolve(np.where(valid, values, 0.0), kernel, mode="same")
    counts = np.convolve(valid.astype(float), kernel, mode="same")
    out = np.where(valid & (counts > 0), sums / np.maximum(counts, 1.0), np.nan)
    return Series(out, index=series.index)
"#,
        window = window
    )
}

/// Incrementally builds a flat openEO process graph
#[derive(Debug, Default)]
pub struct ProcessGraphBuilder {
    nodes: Map<String, Value>,
    counter: usize,
}

impl ProcessGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, process_id: &str, arguments: Value) -> String {
        self.counter += 1;
        let id = format!("{}{}", process_id.replace('_', ""), self.counter);
        self.nodes.insert(
            id.clone(),
            json!({ "process_id": process_id, "arguments": arguments }),
        );
        id
    }

    fn callback(process_id: &str, arguments: Value) -> Value {
        json!({
            "process_graph": {
                "cb1": { "process_id": process_id, "arguments": arguments, "result": true }
            }
        })
    }

    pub fn load_collection(&mut self, request: &CubeRequest, band: &str) -> String {
        let q = &request.query;
        let bbox = q.bbox();
        self.add(
            "load_collection",
            json!({
                "id": q.collection(),
                "spatial_extent": {
                    "west": bbox.west, "south": bbox.south,
                    "east": bbox.east, "north": bbox.north
                },
                "temporal_extent": q.window().to_openeo_interval(),
                "bands": [band]
            }),
        )
    }

    /// Boolean cube: `x >= threshold`
    pub fn threshold(&mut self, data: &str, threshold: f32) -> String {
        self.add(
            "apply",
            json!({
                "data": { "from_node": data },
                "process": Self::callback("gte", json!({ "x": { "from_parameter": "x" }, "y": threshold }))
            }),
        )
    }

    pub fn mask(&mut self, data: &str, mask: &str) -> String {
        self.add(
            "mask",
            json!({ "data": { "from_node": data }, "mask": { "from_node": mask } }),
        )
    }

    pub fn interpolate_time(&mut self, data: &str) -> String {
        self.add(
            "apply_dimension",
            json!({
                "data": { "from_node": data },
                "dimension": "t",
                "process": Self::callback(
                    "array_interpolate_linear",
                    json!({ "data": { "from_parameter": "data" } })
                )
            }),
        )
    }

    pub fn moving_average(&mut self, data: &str, window: usize) -> String {
        self.add(
            "apply_dimension",
            json!({
                "data": { "from_node": data },
                "dimension": "t",
                "process": Self::callback("run_udf", json!({
                    "data": { "from_parameter": "data" },
                    "udf": moving_average_udf(window),
                    "runtime": "Python",
                    "context": { "window": window }
                }))
            }),
        )
    }

    pub fn aggregate_spatial(&mut self, data: &str, request: &CubeRequest, reducer: Reducer) -> String {
        self.add(
            "aggregate_spatial",
            json!({
                "data": { "from_node": data },
                "geometries": request.query.bbox().to_geojson_polygon(),
                "reducer": Self::callback(reducer.process_id(), json!({ "data": { "from_parameter": "data" } }))
            }),
        )
    }

    /// Keep the single day `date`
    pub fn filter_date(&mut self, data: &str, date: NaiveDate) -> String {
        let next = date.succ_opt().unwrap_or(date);
        self.add(
            "filter_temporal",
            json!({ "data": { "from_node": data }, "extent": [date.to_string(), next.to_string()] }),
        )
    }

    /// The shared pipeline: NO2 + cloud band, mask, interpolate, optional smoothing
    pub fn cube(&mut self, request: &CubeRequest) -> String {
        let q = &request.query;
        let no2 = self.load_collection(request, q.no2_band());
        let cloud = self.load_collection(request, q.cloud_band());
        let cloudy = self.threshold(&cloud, q.cloud_threshold());
        let masked = self.mask(&no2, &cloudy);
        let filled = self.interpolate_time(&masked);
        match request.smoothing_window {
            Some(window) => self.moving_average(&filled, window),
            None => filled,
        }
    }

    /// Terminate with `save_result` and return `{ "process_graph": ... }`
    pub fn save_result(mut self, data: &str, format: &str) -> Value {
        let id = self.add(
            "save_result",
            json!({ "data": { "from_node": data }, "format": format, "options": {} }),
        );
        if let Some(Value::Object(node)) = self.nodes.get_mut(&id) {
            node.insert("result".to_string(), Value::Bool(true));
        }
        json!({ "process_graph": Value::Object(self.nodes) })
    }
}

/// Process graph of the time-series feature for one reducer
pub fn aggregate_graph(request: &CubeRequest, reducer: Reducer) -> Value {
    let mut builder = ProcessGraphBuilder::new();
    let cube = builder.cube(request);
    let aggregated = builder.aggregate_spatial(&cube, request, reducer);
    builder.save_result(&aggregated, "JSON")
}

/// Process graph of the snapshot feature
pub fn slice_graph(request: &CubeRequest, date: NaiveDate) -> Value {
    let mut builder = ProcessGraphBuilder::new();
    let cube = builder.cube(request);
    let slice = builder.filter_date(&cube, date);
    builder.save_result(&slice, "GTiff")
}

/// Process graph of the animation batch job (one GeoTIFF per date)
pub fn batch_graph(request: &CubeRequest) -> Value {
    let mut builder = ProcessGraphBuilder::new();
    let cube = builder.cube(request);
    builder.save_result(&cube, "GTiff")
}

/// openEO HTTP backend
pub struct OpenEoBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
    max_retries: u32,
    backoff: Duration,
}

impl OpenEoBackend {
    /// Build the client and check the service answers its capabilities document
    pub fn connect(cfg: &BackendConfig) -> No2Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .user_agent(concat!("no2scope/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let backend = Self {
            client,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            max_retries: cfg.max_retries.max(1),
            backoff: Duration::from_millis(cfg.retry_backoff_ms),
        };

        let caps: Value = backend.send(|| backend.get("/"))?.json()?;
        log::info!(
            "Connected to {} (openEO API {})",
            backend.base_url,
            caps.get("api_version").and_then(Value::as_str).unwrap_or("unknown")
        );
        Ok(backend)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str, body: &Value) -> RequestBuilder {
        self.authorize(self.client.post(self.url(path)).json(body))
    }

    /// Send with bounded retry and exponential backoff on transport errors and 5xx
    fn send<F: Fn() -> RequestBuilder>(&self, build: F) -> No2Result<Response> {
        let mut last_error: Option<No2Error> = None;

        for attempt in 1..=self.max_retries {
            match build().send() {
                Ok(response) if response.status().is_server_error() => {
                    last_error = Some(Self::error_from(response));
                }
                Ok(response) if !response.status().is_success() => {
                    return Err(Self::error_from(response));
                }
                Ok(response) => return Ok(response),
                Err(e) => last_error = Some(No2Error::Http(e)),
            }

            if attempt < self.max_retries {
                let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                log::warn!(
                    "Request attempt {} of {} failed, retrying in {:?}",
                    attempt,
                    self.max_retries,
                    delay
                );
                std::thread::sleep(delay);
            }
        }

        Err(last_error.unwrap_or_else(|| {
            No2Error::RemoteService("request failed after all retries".to_string())
        }))
    }

    /// openEO errors carry `{ "code": ..., "message": ... }`
    fn error_from(response: Response) -> No2Error {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                let code = v.get("code").and_then(Value::as_str).unwrap_or("");
                v.get("message")
                    .and_then(Value::as_str)
                    .map(|m| format!("{} {}", code, m).trim().to_string())
            })
            .unwrap_or(body);
        No2Error::RemoteService(format!("HTTP {}: {}", status.as_u16(), detail))
    }

    fn execute_sync(&self, graph: &Value, dest: &Path) -> No2Result<()> {
        let body = json!({ "process": graph });
        let bytes = self.send(|| self.post("/result", &body))?.bytes()?;
        fs::write(dest, &bytes).map_err(|e| {
            No2Error::ArtifactIo(format!("cannot write {}: {}", dest.display(), e))
        })?;
        log::info!("Wrote {} bytes to {}", bytes.len(), dest.display());
        Ok(())
    }

    fn download_asset(&self, href: &str, dest: &Path) -> No2Result<()> {
        let authorized = href.starts_with(&self.base_url);
        let bytes = self
            .send(|| {
                let builder = self.client.get(href);
                if authorized {
                    self.authorize(builder)
                } else {
                    builder
                }
            })?
            .bytes()?;
        fs::write(dest, &bytes)?;
        Ok(())
    }
}

impl ProcessingBackend for OpenEoBackend {
    fn name(&self) -> &str {
        &self.base_url
    }

    fn aggregate(&self, request: &CubeRequest, reducer: Reducer, dest: &Path) -> No2Result<()> {
        log::info!("Requesting {} time series from {}", reducer, self.base_url);
        self.execute_sync(&aggregate_graph(request, reducer), dest)
    }

    fn download_slice(&self, request: &CubeRequest, date: NaiveDate, dest: &Path) -> No2Result<()> {
        log::info!("Requesting raster slice for {}", date);
        self.execute_sync(&slice_graph(request, date), dest)
    }

    fn create_job(&self, request: &CubeRequest, title: &str) -> No2Result<JobHandle> {
        let body = json!({ "title": title, "process": batch_graph(request) });
        let response = self.send(|| self.post("/jobs", &body))?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let id = header("OpenEO-Identifier")
            .or_else(|| {
                header("Location")
                    .and_then(|loc| loc.trim_end_matches('/').rsplit('/').next().map(String::from))
            })
            .ok_or_else(|| No2Error::RemoteService("job created without identifier".to_string()))?;

        log::info!("Created batch job {}", id);
        Ok(JobHandle { id })
    }

    fn start_job(&self, job: &JobHandle) -> No2Result<()> {
        self.send(|| self.post(&format!("/jobs/{}/results", job.id), &json!({})))?;
        log::info!("Started batch job {}", job.id);
        Ok(())
    }

    fn job_status(&self, job: &JobHandle) -> No2Result<JobStatus> {
        let info: Value = self.send(|| self.get(&format!("/jobs/{}", job.id)))?.json()?;
        let status = info
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| No2Error::RemoteService(format!("job {} has no status", job.id)))?;
        JobStatus::parse(status)
    }

    fn job_logs(&self, job: &JobHandle) -> No2Result<Vec<String>> {
        let logs: Value = self
            .send(|| self.get(&format!("/jobs/{}/logs?level=error", job.id)))?
            .json()?;
        Ok(logs
            .get("logs")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn download_job_results(&self, job: &JobHandle, dir: &Path) -> No2Result<Vec<PathBuf>> {
        let results: Value = self
            .send(|| self.get(&format!("/jobs/{}/results", job.id)))?
            .json()?;
        let assets = results
            .get("assets")
            .and_then(Value::as_object)
            .ok_or_else(|| No2Error::RemoteService(format!("job {} lists no assets", job.id)))?;

        let mut written = Vec::with_capacity(assets.len());
        for (name, asset) in assets {
            let Some(href) = asset.get("href").and_then(Value::as_str) else {
                log::warn!("Asset {} has no href, skipping", name);
                continue;
            };
            let file_name = Path::new(name)
                .file_name()
                .map(|f| f.to_owned())
                .ok_or_else(|| No2Error::ArtifactIo(format!("invalid asset name '{}'", name)))?;
            let dest = dir.join(file_name);
            log::debug!("Downloading asset {} -> {}", href, dest.display());
            self.download_asset(href, &dest)?;
            written.push(dest);
        }
        log::info!("Downloaded {} assets of job {}", written.len(), job.id);
        Ok(written)
    }
}
