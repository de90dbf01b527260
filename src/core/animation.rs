//! Batch animation pipeline
//!
//! A batch job produces one gap-filled GeoTIFF per observation date. The tiles
//! are decoded into frames, scanned once for a global value range, rendered as
//! stills with that shared range and composited into a looping GIF.

use crate::config::{AnimationConfig, PathsConfig};
use crate::core::query::Query;
use crate::io::artifact::publish;
use crate::io::backend::{CubeRequest, JobHandle, JobStatus, ProcessingBackend};
use crate::io::raster::RasterReader;
use crate::render::frame::FrameRenderer;
use crate::render::gif::composite_gif;
use crate::types::{No2Error, No2Result, PipelineStage, RasterFrame, ValueRange};
use chrono::NaiveDate;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Set to `true` to abort a running animation request
pub type CancellationToken = Arc<AtomicBool>;

/// Receives stage transitions of the animation pipeline
pub trait ProgressObserver: Send + Sync {
    fn on_stage(&self, stage: PipelineStage, detail: &str);
}

impl<F> ProgressObserver for F
where
    F: Fn(PipelineStage, &str) + Send + Sync,
{
    fn on_stage(&self, stage: PipelineStage, detail: &str) {
        self(stage, detail)
    }
}

/// Observer that only logs
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_stage(&self, stage: PipelineStage, detail: &str) {
        log::info!("[{}] {}", stage, detail);
    }
}

/// Animation parameters
#[derive(Debug, Clone)]
pub struct AnimationParams {
    /// GIF frame rate, 1..=80
    pub fps: u32,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    /// Consecutive failed status polls tolerated
    pub max_poll_failures: u32,
}

impl Default for AnimationParams {
    fn default() -> Self {
        Self::from(&AnimationConfig::default())
    }
}

impl From<&AnimationConfig> for AnimationParams {
    fn from(cfg: &AnimationConfig) -> Self {
        Self {
            fps: cfg.fps,
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            poll_timeout: Duration::from_secs(cfg.poll_timeout_secs),
            max_poll_failures: cfg.max_poll_failures,
        }
    }
}

/// Frames in strictly increasing date order with one shared color range
#[derive(Debug, Clone)]
pub struct FrameSet {
    frames: Vec<RasterFrame>,
    range: ValueRange,
}

impl FrameSet {
    /// Sort by date and scan the global range; no frames or no valid pixel
    /// at all is an error
    pub fn new(mut frames: Vec<RasterFrame>) -> No2Result<Self> {
        if frames.is_empty() {
            return Err(No2Error::ArtifactIo("batch job produced no frames".to_string()));
        }
        frames.sort_by_key(|f| f.date);
        if frames.windows(2).any(|w| w[0].date == w[1].date) {
            return Err(No2Error::ArtifactIo("frames with duplicate dates".to_string()));
        }
        let range = global_range(&frames)
            .ok_or_else(|| No2Error::ArtifactIo("no valid pixels in any frame".to_string()))?;
        Ok(Self { frames, range })
    }

    pub fn frames(&self) -> &[RasterFrame] {
        &self.frames
    }

    pub fn range(&self) -> ValueRange {
        self.range
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.frames.iter().map(|f| f.date).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Final animation artifact
#[derive(Debug, Clone)]
pub struct AnimationResult {
    pub path: PathBuf,
    pub frame_dates: Vec<NaiveDate>,
    pub range: ValueRange,
}

/// Global range over all valid pixels of all frames
pub fn global_range(frames: &[RasterFrame]) -> Option<ValueRange> {
    #[cfg(feature = "parallel")]
    {
        frames
            .par_iter()
            .filter_map(RasterFrame::value_range)
            .reduce_with(ValueRange::union)
    }
    #[cfg(not(feature = "parallel"))]
    {
        frames
            .iter()
            .filter_map(RasterFrame::value_range)
            .reduce(ValueRange::union)
    }
}

static TILE_PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// Compiled once and shared by every request
fn tile_pattern() -> No2Result<&'static Regex> {
    TILE_PATTERN
        .get_or_init(|| Regex::new(r"^openEO_(\d{4}-\d{2}-\d{2})Z?\.tif$"))
        .as_ref()
        .map_err(|e| No2Error::ArtifactIo(format!("tile name pattern: {}", e)))
}

/// Date encoded in a result tile name (`openEO_2019-07-01Z.tif`)
pub fn parse_tile_date(name: &str) -> Option<NaiveDate> {
    date_from_name(tile_pattern().ok()?, name)
}

fn date_from_name(pattern: &Regex, name: &str) -> Option<NaiveDate> {
    let caps = pattern.captures(name)?;
    NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()
}

/// Select result tiles and order them by their parsed date.
/// Non-tile files are skipped; for a repeated date the first listed tile wins.
pub fn order_tiles(paths: &[PathBuf]) -> No2Result<Vec<(NaiveDate, PathBuf)>> {
    let pattern = tile_pattern()?;
    let mut tiles: Vec<(NaiveDate, PathBuf)> = Vec::new();
    for path in paths {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        match date_from_name(pattern, name) {
            Some(date) => tiles.push((date, path.clone())),
            None => log::warn!("Ignoring result file {}", path.display()),
        }
    }

    tiles.sort_by_key(|(date, _)| *date);
    let before = tiles.len();
    tiles.dedup_by(|later, first| {
        let duplicate = later.0 == first.0;
        if duplicate {
            log::warn!("Duplicate tile for {}, dropping {}", later.0, later.1.display());
        }
        duplicate
    });
    if tiles.len() < before {
        log::info!("Kept {} of {} tiles after removing duplicates", tiles.len(), before);
    }
    Ok(tiles)
}

/// Sleep for `duration` in short steps; returns `false` once canceled
fn sleep_unless_canceled(duration: Duration, cancel: &CancellationToken) -> bool {
    let step = Duration::from_millis(100);
    let deadline = Instant::now() + duration;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(step.min(deadline - now));
    }
}

/// Runs one animation request end to end
pub struct AnimationPipeline {
    backend: Arc<dyn ProcessingBackend>,
    renderer: Arc<FrameRenderer>,
    paths: PathsConfig,
    params: AnimationParams,
}

impl AnimationPipeline {
    pub fn new(
        backend: Arc<dyn ProcessingBackend>,
        renderer: Arc<FrameRenderer>,
        paths: PathsConfig,
        params: AnimationParams,
    ) -> Self {
        Self {
            backend,
            renderer,
            paths,
            params,
        }
    }

    pub fn params(&self) -> &AnimationParams {
        &self.params
    }

    pub fn run(
        &self,
        query: &Query,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> No2Result<AnimationResult> {
        if !(1..=80).contains(&self.params.fps) {
            return Err(No2Error::InvalidQuery(format!(
                "frame rate {} is outside 1..=80",
                self.params.fps
            )));
        }

        fs::create_dir_all(&self.paths.staging_root)?;
        fs::create_dir_all(&self.paths.output_dir)?;
        let staging = tempfile::Builder::new()
            .prefix("animation-")
            .tempdir_in(&self.paths.staging_root)?;

        let outcome = self.run_stages(query, staging.path(), observer, cancel);
        match &outcome {
            Ok(result) => observer.on_stage(
                PipelineStage::Done,
                &format!("{} frames in {}", result.frame_dates.len(), result.path.display()),
            ),
            Err(e) => {
                log::error!("Animation failed: {}", e);
                observer.on_stage(PipelineStage::Failed, &e.to_string());
            }
        }
        // staging directory removed here, on success and failure alike
        drop(staging);
        outcome
    }

    fn stage<T>(
        observer: &dyn ProgressObserver,
        stage: PipelineStage,
        detail: &str,
        f: impl FnOnce() -> No2Result<T>,
    ) -> No2Result<T> {
        observer.on_stage(stage, detail);
        f().map_err(|e| e.at_stage(stage))
    }

    fn run_stages(
        &self,
        query: &Query,
        staging: &Path,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> No2Result<AnimationResult> {
        let window = query.window();
        let title = format!("NO2 animation {}..{}", window.start, window.end);

        let job = Self::stage(observer, PipelineStage::Submitted, &title, || {
            let job = self.backend.create_job(&CubeRequest::gap_filled(query), &title)?;
            self.backend.start_job(&job)?;
            Ok(job)
        })?;

        Self::stage(observer, PipelineStage::Polling, &job.id, || self.poll(&job, cancel))?;

        let downloaded = Self::stage(observer, PipelineStage::Downloading, &job.id, || {
            self.backend.download_job_results(&job, staging)
        })?;

        let (frames, sources) = Self::stage(
            observer,
            PipelineStage::Decoding,
            &format!("{} files", downloaded.len()),
            || Self::decode(&downloaded),
        )?;

        // the range scan runs inside FrameSet::new, strictly before rendering
        let frame_set = Self::stage(
            observer,
            PipelineStage::GlobalRangeScan,
            &format!("{} frames", frames.len()),
            || FrameSet::new(frames),
        )?;
        let range = frame_set.range();
        log::info!("Global range over {} frames: {} .. {}", frame_set.len(), range.min, range.max);

        let stills = Self::stage(observer, PipelineStage::Rendering, "stills", || {
            self.render_stills(&frame_set, &sources, staging)
        })?;

        // the GIF only leaves staging once it is complete
        let staged_gif = staging.join("animation.gif");
        Self::stage(observer, PipelineStage::Compositing, &format!("{} stills", stills.len()), || {
            composite_gif(&stills, self.params.fps, &staged_gif)
        })?;

        let path = Self::stage(observer, PipelineStage::CleaningUp, "stills", || {
            for still in &stills {
                fs::remove_file(still)?;
            }
            let stem = format!(
                "no2_animation_{}_{}",
                window.start.format("%Y-%m-%d"),
                window.end.format("%Y-%m-%d")
            );
            publish(&staged_gif, &self.paths.output_dir, &stem, "gif")
        })?;

        Ok(AnimationResult {
            path,
            frame_dates: frame_set.dates(),
            range,
        })
    }

    fn poll(&self, job: &JobHandle, cancel: &CancellationToken) -> No2Result<()> {
        let started = Instant::now();
        let mut failures = 0u32;
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(No2Error::RemoteService(format!("job {} canceled by request", job.id)));
            }
            if started.elapsed() > self.params.poll_timeout {
                return Err(No2Error::RemoteService(format!(
                    "job {} did not finish within {:?}",
                    job.id, self.params.poll_timeout
                )));
            }

            let wait = match self.backend.job_status(job) {
                Ok(JobStatus::Finished) => {
                    log::info!("Job {} finished after {:?}", job.id, started.elapsed());
                    return Ok(());
                }
                Ok(status @ (JobStatus::Error | JobStatus::Canceled)) => {
                    let logs = self.backend.job_logs(job).unwrap_or_else(|e| {
                        log::warn!("Could not fetch logs of job {}: {}", job.id, e);
                        Vec::new()
                    });
                    let detail = if logs.is_empty() {
                        "no log entries".to_string()
                    } else {
                        logs.join("; ")
                    };
                    return Err(No2Error::RemoteService(format!(
                        "job {} ended with status {:?}: {}",
                        job.id, status, detail
                    )));
                }
                Ok(status) => {
                    failures = 0;
                    log::debug!("Job {} is {:?}", job.id, status);
                    self.params.poll_interval
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.params.max_poll_failures {
                        return Err(e);
                    }
                    let backoff = self.params.poll_interval * 2u32.saturating_pow(failures.min(6) - 1);
                    log::warn!(
                        "Status poll {} of job {} failed ({}), retrying in {:?}",
                        failures,
                        job.id,
                        e,
                        backoff
                    );
                    backoff
                }
            };

            if !sleep_unless_canceled(wait, cancel) {
                return Err(No2Error::RemoteService(format!("job {} canceled by request", job.id)));
            }
        }
    }

    /// Read every tile in date order; returns frames and their source files
    fn decode(downloaded: &[PathBuf]) -> No2Result<(Vec<RasterFrame>, Vec<PathBuf>)> {
        let tiles = order_tiles(downloaded)?;
        if tiles.is_empty() {
            return Err(No2Error::ArtifactIo("batch job produced no frames".to_string()));
        }
        let mut frames = Vec::with_capacity(tiles.len());
        let mut sources = Vec::with_capacity(tiles.len());
        for (date, path) in tiles {
            frames.push(RasterFrame::new(date, RasterReader::read_geotiff(&path)?));
            sources.push(path);
        }
        log::info!("Decoded {} frames", frames.len());
        Ok((frames, sources))
    }

    /// Render every frame with the shared range; each source tile is removed
    /// as soon as its still exists. Output order follows the frame order.
    fn render_stills(&self, frame_set: &FrameSet, sources: &[PathBuf], staging: &Path) -> No2Result<Vec<PathBuf>> {
        let range = frame_set.range();
        let render_one = |(frame, source): (&RasterFrame, &PathBuf)| -> No2Result<PathBuf> {
            let still = staging.join(format!("still_{}.png", frame.date.format("%Y-%m-%d")));
            self.renderer
                .render_to_file(frame, &range, &format!("NO2 {}", frame.date), &still)?;
            fs::remove_file(source)?;
            Ok(still)
        };

        #[cfg(feature = "parallel")]
        let stills: Vec<No2Result<PathBuf>> = frame_set
            .frames()
            .par_iter()
            .zip(sources.par_iter())
            .map(render_one)
            .collect();
        #[cfg(not(feature = "parallel"))]
        let stills: Vec<No2Result<PathBuf>> = frame_set.frames().iter().zip(sources.iter()).map(render_one).collect();

        stills.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 7, d).unwrap()
    }

    #[test]
    fn test_tile_names() {
        assert_eq!(parse_tile_date("openEO_2019-07-03Z.tif"), Some(day(3)));
        assert_eq!(parse_tile_date("openEO_2019-07-03.tif"), Some(day(3)));
        assert_eq!(parse_tile_date("openEO.tif"), None);
        assert_eq!(parse_tile_date("job-results.json"), None);
        assert_eq!(parse_tile_date("openEO_2019-13-03Z.tif"), None);
    }

    #[test]
    fn test_order_tiles_ignores_listing_order() {
        let paths: Vec<PathBuf> = ["openEO_2019-07-03Z.tif", "openEO_2019-07-01Z.tif", "notes.txt", "openEO_2019-07-02Z.tif"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let dates: Vec<NaiveDate> = order_tiles(&paths).unwrap().into_iter().map(|(d, _)| d).collect();
        assert_eq!(dates, vec![day(1), day(2), day(3)]);
    }

    #[test]
    fn test_duplicate_dates_keep_first() {
        let paths: Vec<PathBuf> = ["a/openEO_2019-07-01Z.tif", "b/openEO_2019-07-01.tif"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let tiles = order_tiles(&paths).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].1, PathBuf::from("a/openEO_2019-07-01Z.tif"));
    }

    #[test]
    fn test_frame_set_sorted_and_ranged() {
        let frames = vec![
            RasterFrame::new(day(2), array![[2.0f32, 9.0]]),
            RasterFrame::new(day(1), array![[0.0f32, 5.0]]),
            RasterFrame::new(day(3), array![[1.0f32, f32::NAN]]),
        ];
        let set = FrameSet::new(frames).unwrap();
        assert_eq!(set.dates(), vec![day(1), day(2), day(3)]);
        assert_eq!(set.range(), ValueRange::new(0.0, 9.0));
    }

    #[test]
    fn test_frame_set_rejects_empty() {
        let err = FrameSet::new(Vec::new()).unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::ArtifactIo);
    }

    #[test]
    fn test_tile_pattern_is_shared() {
        let first = tile_pattern().unwrap() as *const Regex;
        let second = tile_pattern().unwrap() as *const Regex;
        assert_eq!(first, second);
    }

    #[test]
    fn test_sleep_stops_on_cancel() {
        let cancel: CancellationToken = Arc::new(AtomicBool::new(true));
        assert!(!sleep_unless_canceled(Duration::from_secs(5), &cancel));
    }
}
