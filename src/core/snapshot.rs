use crate::config::PathsConfig;
use crate::core::query::Query;
use crate::io::artifact::publish;
use crate::io::backend::{CubeRequest, ProcessingBackend};
use crate::io::raster::RasterReader;
use crate::render::frame::FrameRenderer;
use crate::types::{No2Error, No2Result, RasterFrame, ValueRange};
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Rendered single-date map
#[derive(Debug, Clone)]
pub struct SnapshotResult {
    /// PNG written to the output directory
    pub path: PathBuf,
    pub frame: RasterFrame,
    /// Local range of this frame, spanned by the colorbar
    pub range: ValueRange,
}

/// Fetches one gap-filled slice and renders it with its own value range
pub struct SnapshotRenderer {
    backend: Arc<dyn ProcessingBackend>,
    renderer: Arc<FrameRenderer>,
    paths: PathsConfig,
}

impl SnapshotRenderer {
    pub fn new(backend: Arc<dyn ProcessingBackend>, renderer: Arc<FrameRenderer>, paths: PathsConfig) -> Self {
        Self {
            backend,
            renderer,
            paths,
        }
    }

    pub fn render(&self, query: &Query, target_date: NaiveDate) -> No2Result<SnapshotResult> {
        // nothing is fetched for a date the interpolation window cannot answer
        query.check_date(target_date)?;

        log::info!("Rendering NO2 snapshot for {} via {}", target_date, self.backend.name());

        fs::create_dir_all(&self.paths.staging_root)?;
        fs::create_dir_all(&self.paths.output_dir)?;
        let staging = tempfile::Builder::new()
            .prefix("snapshot-")
            .tempdir_in(&self.paths.staging_root)?;

        let tif = staging.path().join(format!("snapshot_{}.tif", target_date));
        self.backend
            .download_slice(&CubeRequest::gap_filled(query), target_date, &tif)?;

        let frame = RasterFrame::new(target_date, RasterReader::read_geotiff(&tif)?);
        let range = frame.value_range().ok_or_else(|| {
            No2Error::ArtifactIo(format!("slice for {} holds no valid pixels", target_date))
        })?;
        log::debug!("Snapshot range {} .. {}", range.min, range.max);

        let staged_png = staging.path().join("snapshot.png");
        self.renderer
            .render_to_file(&frame, &range, &format!("NO2 {}", target_date), &staged_png)?;
        let stem = format!("no2_snapshot_{}", target_date.format("%Y-%m-%d"));
        let path = publish(&staged_png, &self.paths.output_dir, &stem, "png")?;

        log::info!("Snapshot written to {}", path.display());
        Ok(SnapshotResult { path, frame, range })
    }
}
