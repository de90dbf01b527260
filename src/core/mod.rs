//! Core NO2 processing modules

pub mod query;
pub mod cloud_mask;
pub mod gap_fill;
pub mod aggregate;
pub mod timeseries;
pub mod snapshot;
pub mod animation;
pub mod dashboard;

// Re-export main types
pub use query::{Query, QueryBuilder};
pub use cloud_mask::CloudMaskFilter;
pub use gap_fill::{GapFillParams, GapFillProcessor, GapFilled};
pub use aggregate::SpatialAggregator;
pub use timeseries::{AlignedTimeSeriesTable, TableRow, TimeSeriesAssembler};
pub use snapshot::{SnapshotRenderer, SnapshotResult};
pub use animation::{
    AnimationParams, AnimationPipeline, AnimationResult, CancellationToken, FrameSet, LogObserver,
    ProgressObserver,
};
pub use dashboard::Dashboard;
