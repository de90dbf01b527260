use crate::config::RenderConfig;
use crate::render::colormap::Colormap;
use crate::types::{No2Result, RasterFrame, ValueRange};
use ab_glyph::{FontVec, PxScale};
use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

const TITLE_HEIGHT: u32 = 36;
const MARGIN: u32 = 12;
const BAR_WIDTH: u32 = 18;
const LABEL_WIDTH: u32 = 90;
const TITLE_SCALE: f32 = 22.0;
const LABEL_SCALE: f32 = 14.0;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([20, 20, 20, 255]);

/// Common locations of a sans-serif TrueType font
const FALLBACK_FONTS: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Load the configured font or the first available fallback.
/// Without a font, images are rendered without text.
pub fn load_font(configured: Option<&Path>) -> Option<FontVec> {
    let candidates = configured
        .map(Path::to_path_buf)
        .into_iter()
        .chain(FALLBACK_FONTS.iter().map(PathBuf::from));

    for path in candidates {
        if !path.is_file() {
            continue;
        }
        match std::fs::read(&path).map(FontVec::try_from_vec) {
            Ok(Ok(font)) => {
                log::debug!("Using font {}", path.display());
                return Some(font);
            }
            Ok(Err(e)) => log::warn!("Invalid font {}: {}", path.display(), e),
            Err(e) => log::warn!("Cannot read font {}: {}", path.display(), e),
        }
    }
    log::warn!("No usable font found, rendering images without text");
    None
}

/// Compact label for NO2 column densities (mol/m²) and similar values
pub fn format_value(value: f32) -> String {
    let a = value.abs();
    if a != 0.0 && !(0.01..10_000.0).contains(&a) {
        format!("{:.2e}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Renders raster frames as titled, colorbar-annotated images
pub struct FrameRenderer {
    colormap: Colormap,
    pixel_scale: u32,
    font: Option<FontVec>,
}

impl FrameRenderer {
    pub fn new(colormap: Colormap, pixel_scale: u32, font: Option<FontVec>) -> Self {
        Self {
            colormap,
            pixel_scale: pixel_scale.max(1),
            font,
        }
    }

    pub fn from_config(cfg: &RenderConfig) -> Self {
        Self::new(
            Colormap::by_name(&cfg.colormap),
            cfg.pixel_scale,
            load_font(cfg.font_path.as_deref()),
        )
    }

    pub fn colormap(&self) -> &Colormap {
        &self.colormap
    }

    fn text(&self, canvas: &mut RgbaImage, x: i32, y: i32, size: f32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(canvas, INK, x, y, PxScale::from(size), font, text);
        }
    }

    /// Raster pixels colored under `range`, upscaled with nearest neighbour
    pub fn colorize(&self, frame: &RasterFrame, range: &ValueRange) -> RgbaImage {
        let (rows, cols) = frame.values.dim();
        let mut img = RgbaImage::new(cols as u32, rows as u32);
        for ((r, c), v) in frame.values.indexed_iter() {
            img.put_pixel(c as u32, r as u32, self.colormap.color_for(*v, range));
        }
        imageops::resize(
            &img,
            cols as u32 * self.pixel_scale,
            rows as u32 * self.pixel_scale,
            imageops::FilterType::Nearest,
        )
    }

    /// Full image: title band, raster, vertical colorbar with min/max labels
    pub fn render(&self, frame: &RasterFrame, range: &ValueRange, title: &str) -> RgbaImage {
        let raster = self.colorize(frame, range);
        let (rw, rh) = raster.dimensions();

        let width = MARGIN + rw + MARGIN + BAR_WIDTH + LABEL_WIDTH;
        let height = TITLE_HEIGHT + rh + MARGIN;
        let mut canvas = RgbaImage::from_pixel(width, height, BACKGROUND);

        self.text(&mut canvas, MARGIN as i32, 8, TITLE_SCALE, title);

        imageops::overlay(&mut canvas, &raster, MARGIN as i64, TITLE_HEIGHT as i64);
        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(MARGIN as i32 - 1, TITLE_HEIGHT as i32 - 1).of_size(rw + 2, rh + 2),
            INK,
        );

        // colorbar, max at the top
        let bar_x = MARGIN + rw + MARGIN;
        for y in 0..rh {
            let t = 1.0 - y as f32 / (rh.max(2) - 1) as f32;
            let color = self.colormap.at(t);
            for x in bar_x..bar_x + BAR_WIDTH {
                canvas.put_pixel(x, TITLE_HEIGHT + y, color);
            }
        }
        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(bar_x as i32, TITLE_HEIGHT as i32).of_size(BAR_WIDTH, rh.max(1)),
            INK,
        );

        let label_x = (bar_x + BAR_WIDTH + 4) as i32;
        self.text(&mut canvas, label_x, TITLE_HEIGHT as i32, LABEL_SCALE, &format_value(range.max));
        self.text(
            &mut canvas,
            label_x,
            (TITLE_HEIGHT + rh) as i32 - LABEL_SCALE as i32,
            LABEL_SCALE,
            &format_value(range.min),
        );

        canvas
    }

    /// Render and write a PNG
    pub fn render_to_file<P: AsRef<Path>>(
        &self,
        frame: &RasterFrame,
        range: &ValueRange,
        title: &str,
        path: P,
    ) -> No2Result<()> {
        let img = self.render(frame, range, title);
        img.save_with_format(path.as_ref(), image::ImageFormat::Png)?;
        log::debug!("Rendered {} to {}", frame.date, path.as_ref().display());
        Ok(())
    }
}
