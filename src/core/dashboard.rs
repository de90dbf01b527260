//! Entry point used by the UI layer: time series, snapshot and animation over
//! one shared configuration and processing backend.

use crate::config::DashboardConfig;
use crate::core::animation::{
    AnimationParams, AnimationPipeline, AnimationResult, CancellationToken, ProgressObserver,
};
use crate::core::query::{Query, QueryBuilder};
use crate::core::snapshot::{SnapshotRenderer, SnapshotResult};
use crate::core::timeseries::{AlignedTimeSeriesTable, TimeSeriesAssembler};
use crate::io::backend::{CubeRequest, ProcessingBackend};
use crate::io::openeo::OpenEoBackend;
use crate::io::reference::ReferenceReader;
use crate::io::series_json::{read_fragment, MAX_FRAGMENT, MEAN_FRAGMENT, MOVING_AVERAGE_FRAGMENT};
use crate::render::chart::save_time_series_chart;
use crate::render::frame::{load_font, FrameRenderer};
use crate::types::{No2Result, Reducer};
use chrono::NaiveDate;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub struct Dashboard {
    config: DashboardConfig,
    backend: Arc<dyn ProcessingBackend>,
    renderer: Arc<FrameRenderer>,
}

impl Dashboard {
    pub fn new(config: DashboardConfig, backend: Arc<dyn ProcessingBackend>) -> No2Result<Self> {
        config.validate()?;
        let renderer = Arc::new(FrameRenderer::from_config(&config.render));
        log::info!("Dashboard ready on backend '{}'", backend.name());
        Ok(Self {
            config,
            backend,
            renderer,
        })
    }

    /// Dashboard against the openEO service named in the configuration
    pub fn connect(config: DashboardConfig) -> No2Result<Self> {
        let backend = OpenEoBackend::connect(&config.backend)?;
        Self::new(config, Arc::new(backend))
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ProcessingBackend> {
        &self.backend
    }

    /// Builder preloaded with the configured collection and band names
    pub fn query_builder(&self) -> QueryBuilder {
        QueryBuilder::from_backend(&self.config.backend)
    }

    /// Mean, max and moving-average series joined into one table, plus the
    /// local reference column when the query lies inside its coverage
    pub fn time_series(&self, query: &Query) -> No2Result<AlignedTimeSeriesTable> {
        fs::create_dir_all(&self.config.paths.staging_root)?;
        let staging = tempfile::Builder::new()
            .prefix("series-")
            .tempdir_in(&self.config.paths.staging_root)?;

        let filled = CubeRequest::gap_filled(query);
        let smoothed = CubeRequest::smoothed(query, self.config.smoothing.cube_window);

        let mean_path = staging.path().join(MEAN_FRAGMENT);
        let max_path = staging.path().join(MAX_FRAGMENT);
        let ma_path = staging.path().join(MOVING_AVERAGE_FRAGMENT);

        log::info!("Retrieving time series for {:?}", query.bbox());
        self.backend.aggregate(&filled, Reducer::Mean, &mean_path)?;
        self.backend.aggregate(&filled, Reducer::Max, &max_path)?;
        self.backend.aggregate(&smoothed, Reducer::Mean, &ma_path)?;

        let assembler = TimeSeriesAssembler::new(self.config.smoothing.series_window);
        let table = assembler.assemble(
            &read_fragment(&mean_path)?,
            &read_fragment(&max_path)?,
            &read_fragment(&ma_path)?,
        );

        let reference_cfg = &self.config.reference;
        match &reference_cfg.path {
            Some(path) if TimeSeriesAssembler::covers(query, reference_cfg) => {
                let reference = ReferenceReader::read(path, reference_cfg)?;
                Ok(assembler.attach_reference(table, query, reference_cfg, &reference))
            }
            _ => Ok(table),
        }
    }

    pub fn snapshot(&self, query: &Query, target_date: NaiveDate) -> No2Result<SnapshotResult> {
        SnapshotRenderer::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.renderer),
            self.config.paths.clone(),
        )
        .render(query, target_date)
    }

    /// Run the animation pipeline; `fps` overrides the configured frame rate
    pub fn animate(
        &self,
        query: &Query,
        fps: Option<u32>,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> No2Result<AnimationResult> {
        let mut params = AnimationParams::from(&self.config.animation);
        if let Some(fps) = fps {
            params.fps = fps;
        }
        AnimationPipeline::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.renderer),
            self.config.paths.clone(),
            params,
        )
        .run(query, observer, cancel)
    }

    /// Line chart of every table column
    pub fn save_chart<P: AsRef<Path>>(&self, table: &AlignedTimeSeriesTable, path: P) -> No2Result<()> {
        let font = load_font(self.config.render.font_path.as_deref());
        save_time_series_chart(
            table,
            self.config.render.chart_width,
            self.config.render.chart_height,
            font.as_ref(),
            path,
        )
    }
}
