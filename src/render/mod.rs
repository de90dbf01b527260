//! Image output: colormaps, raster frames, time series charts and GIF compositing

pub mod colormap;
pub mod frame;
pub mod chart;
pub mod gif;

pub use colormap::Colormap;
pub use frame::{load_font, FrameRenderer};
pub use chart::{render_time_series, save_time_series_chart};
pub use gif::{composite_gif, write_gif};
