use crate::types::{is_valid, ValueRange};
use image::Rgba;

/// Fill color for no-data pixels
pub const NO_DATA_COLOR: Rgba<u8> = Rgba([200, 200, 200, 255]);

/// Color value at a normalized position in [0, 1]
#[derive(Debug, Clone, Copy)]
pub struct ColorStop {
    pub position: f32,
    pub rgb: [u8; 3],
}

const fn stop(position: f32, r: u8, g: u8, b: u8) -> ColorStop {
    ColorStop { position, rgb: [r, g, b] }
}

const VIRIDIS: [ColorStop; 9] = [
    stop(0.0, 68, 1, 84),
    stop(0.125, 71, 44, 122),
    stop(0.25, 59, 81, 139),
    stop(0.375, 44, 113, 142),
    stop(0.5, 33, 144, 141),
    stop(0.625, 39, 173, 129),
    stop(0.75, 92, 200, 99),
    stop(0.875, 170, 220, 50),
    stop(1.0, 253, 231, 37),
];

const INFERNO: [ColorStop; 5] = [
    stop(0.0, 0, 0, 4),
    stop(0.25, 87, 16, 110),
    stop(0.5, 188, 55, 84),
    stop(0.75, 249, 142, 9),
    stop(1.0, 252, 255, 164),
];

const GRAYSCALE: [ColorStop; 2] = [stop(0.0, 0, 0, 0), stop(1.0, 255, 255, 255)];

/// Continuous color scale built from interpolated stops
#[derive(Debug, Clone)]
pub struct Colormap {
    name: String,
    stops: Vec<ColorStop>,
}

impl Colormap {
    pub fn viridis() -> Self {
        Self::from_stops("viridis", &VIRIDIS)
    }

    /// Look up a colormap by name, falling back to viridis
    pub fn by_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "viridis" => Self::viridis(),
            "inferno" => Self::from_stops("inferno", &INFERNO),
            "grayscale" | "greys" | "gray" => Self::from_stops("grayscale", &GRAYSCALE),
            other => {
                log::warn!("Unknown colormap '{}', using viridis", other);
                Self::viridis()
            }
        }
    }

    fn from_stops(name: &str, stops: &[ColorStop]) -> Self {
        Self {
            name: name.to_string(),
            stops: stops.to_vec(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Color at normalized position `t` (clamped to [0, 1])
    pub fn at(&self, t: f32) -> Rgba<u8> {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let upper = self
            .stops
            .iter()
            .position(|s| s.position >= t)
            .unwrap_or(self.stops.len() - 1);
        if upper == 0 {
            let [r, g, b] = self.stops[0].rgb;
            return Rgba([r, g, b, 255]);
        }
        let lo = self.stops[upper - 1];
        let hi = self.stops[upper];
        let span = (hi.position - lo.position).max(f32::EPSILON);
        let f = (t - lo.position) / span;
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * f).round() as u8;
        Rgba([
            mix(lo.rgb[0], hi.rgb[0]),
            mix(lo.rgb[1], hi.rgb[1]),
            mix(lo.rgb[2], hi.rgb[2]),
            255,
        ])
    }

    /// Color of a data value under `range`; no data gets [`NO_DATA_COLOR`]
    pub fn color_for(&self, value: f32, range: &ValueRange) -> Rgba<u8> {
        if !is_valid(value) {
            return NO_DATA_COLOR;
        }
        self.at(range.normalize(value))
    }
}

impl Default for Colormap {
    fn default() -> Self {
        Self::viridis()
    }
}
