mod common;

use chrono::NaiveDate;
use common::{date, init_logging, local_backend, query, test_config};
use no2scope::io::backend::{CubeRequest, JobHandle, JobStatus};
use no2scope::types::{ErrorKind, No2Error, No2Result, Reducer};
use no2scope::{Dashboard, LocalBackend, ProcessingBackend, RasterReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts every call that would reach the processing service
struct CountingBackend {
    inner: LocalBackend,
    calls: AtomicUsize,
}

impl CountingBackend {
    fn new(inner: LocalBackend) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl ProcessingBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn aggregate(&self, request: &CubeRequest, reducer: Reducer, dest: &Path) -> No2Result<()> {
        self.hit();
        self.inner.aggregate(request, reducer, dest)
    }

    fn download_slice(&self, request: &CubeRequest, date: NaiveDate, dest: &Path) -> No2Result<()> {
        self.hit();
        self.inner.download_slice(request, date, dest)
    }

    fn create_job(&self, request: &CubeRequest, title: &str) -> No2Result<JobHandle> {
        self.hit();
        self.inner.create_job(request, title)
    }

    fn start_job(&self, job: &JobHandle) -> No2Result<()> {
        self.hit();
        self.inner.start_job(job)
    }

    fn job_status(&self, job: &JobHandle) -> No2Result<JobStatus> {
        self.hit();
        self.inner.job_status(job)
    }

    fn job_logs(&self, job: &JobHandle) -> No2Result<Vec<String>> {
        self.hit();
        self.inner.job_logs(job)
    }

    fn download_job_results(&self, job: &JobHandle, dir: &Path) -> No2Result<Vec<PathBuf>> {
        self.hit();
        self.inner.download_job_results(job, dir)
    }
}

#[test]
fn test_date_outside_window_never_reaches_backend() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(CountingBackend::new(local_backend(date(2019, 6, 1), 30)));
    let dashboard = Dashboard::new(test_config(dir.path()), backend.clone()).expect("dashboard");

    let q = query("2019-06-01", "2019-06-30");
    let err = dashboard
        .snapshot(&q, date(2019, 8, 15))
        .expect_err("date outside the window");

    assert!(matches!(err, No2Error::DateOutOfRange { .. }));
    assert_eq!(err.kind(), ErrorKind::DateOutOfRange);
    assert!(err.to_string().contains("2019-08-15"));
    assert_eq!(backend.calls(), 0, "no download may be attempted");
}

#[test]
fn test_snapshot_renders_local_range() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(CountingBackend::new(local_backend(date(2019, 6, 1), 30)));
    let dashboard = Dashboard::new(test_config(dir.path()), backend.clone()).expect("dashboard");

    let q = query("2019-06-01", "2019-06-30");
    let result = dashboard.snapshot(&q, date(2019, 6, 15)).expect("snapshot");

    println!("Snapshot at {} with range {:?}", result.path.display(), result.range);
    assert_eq!(backend.calls(), 1, "exactly one slice is fetched");
    assert!(result.path.is_file());
    assert_eq!(result.frame.date, date(2019, 6, 15));
    assert_eq!(result.frame.values.dim(), (4, 5));
    assert!(result.range.min > 0.0);
    assert!(result.range.min <= result.range.max);

    let expected = result.frame.value_range().expect("valid pixels");
    assert_eq!(result.range, expected);

    let png = image::open(&result.path).expect("readable png");
    assert!(png.width() > 5 * 2 && png.height() > 4 * 2);

    // only the PNG survives, staging is gone
    assert!(common::entries(&dir.path().join("staging")).is_empty());
}

#[test]
fn test_slice_roundtrips_through_geotiff() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let backend = local_backend(date(2019, 6, 1), 10);
    let q = query("2019-06-01", "2019-06-10");

    let tif = dir.path().join("slice.tif");
    backend.download_slice(&CubeRequest::gap_filled(&q), date(2019, 6, 3), &tif)?;
    let values = RasterReader::read_geotiff(&tif)?;
    assert_eq!(values.dim(), (4, 5));
    assert!(values.iter().all(|v| v.is_finite()), "interior dates are gap filled");

    let missing = backend.download_slice(&CubeRequest::gap_filled(&q), date(2019, 7, 3), &tif);
    assert!(missing.is_err(), "no observation outside the cube");
    Ok(())
}

#[test]
fn test_concurrent_snapshots_write_distinct_files() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let backend: Arc<dyn ProcessingBackend> = Arc::new(local_backend(date(2019, 6, 1), 30));
    let dashboard = Dashboard::new(test_config(dir.path()), backend).expect("dashboard");

    let queries: Vec<_> = [0.3f32, 0.8]
        .iter()
        .map(|threshold| {
            no2scope::QueryBuilder::new()
                .bbox(common::BBOX.0, common::BBOX.1, common::BBOX.2, common::BBOX.3)
                .dates_str("2019-06-01", "2019-06-30")
                .cloud_threshold(*threshold)
                .build()
                .expect("valid query")
        })
        .collect();

    let dashboard = &dashboard;
    let paths: Vec<PathBuf> = std::thread::scope(|scope| {
        let handles: Vec<_> = queries
            .iter()
            .map(|q| scope.spawn(move || dashboard.snapshot(q, date(2019, 6, 15)).expect("snapshot").path))
            .collect();
        handles.into_iter().map(|h| h.join().expect("snapshot thread")).collect()
    });

    assert_ne!(paths[0], paths[1]);
    for path in &paths {
        assert!(path.is_file());
        assert!(image::open(path).is_ok(), "complete PNG at {}", path.display());
    }
    assert_eq!(common::entries(&dir.path().join("output")).len(), 2);
}
