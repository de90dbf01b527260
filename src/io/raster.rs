use crate::types::{No2Error, No2Result, NO_DATA};
use ndarray::Array2;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype::Gray32Float, TiffEncoder};
use tiff::tags::Tag;

/// GDAL's ASCII no-data tag
const GDAL_NODATA_TAG: u16 = 42113;

/// Single-band GeoTIFF reader/writer
pub struct RasterReader;

impl RasterReader {
    /// Read band 1 as `f32`, mapping the GDAL no-data value (if any) to `NaN`
    pub fn read_geotiff<P: AsRef<Path>>(path: P) -> No2Result<Array2<f32>> {
        let path = path.as_ref();
        log::debug!("Reading raster {}", path.display());

        let file = File::open(path)
            .map_err(|e| No2Error::ArtifactIo(format!("cannot open {}: {}", path.display(), e)))?;
        let mut decoder = Decoder::new(BufReader::new(file))?;

        let (width, height) = decoder.dimensions()?;
        let nodata = Self::read_nodata(&mut decoder);

        let data: Vec<f32> = match decoder.read_image()? {
            DecodingResult::F32(v) => v,
            DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
            _ => {
                return Err(No2Error::ArtifactIo(format!(
                    "unsupported sample format in {}",
                    path.display()
                )))
            }
        };

        let (width, height) = (width as usize, height as usize);
        if data.len() < width * height {
            return Err(No2Error::ArtifactIo(format!(
                "{} holds {} samples for a {}x{} raster",
                path.display(),
                data.len(),
                width,
                height
            )));
        }
        // multi-band rasters are interleaved; keep band 1
        let bands = data.len() / (width * height);
        let band: Vec<f32> = data
            .iter()
            .step_by(bands.max(1))
            .take(width * height)
            .map(|&v| match nodata {
                Some(nd) if v == nd => NO_DATA,
                _ => v,
            })
            .collect();

        Array2::from_shape_vec((height, width), band)
            .map_err(|e| No2Error::ArtifactIo(format!("failed to reshape raster: {}", e)))
    }

    fn read_nodata<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
        decoder
            .get_tag_ascii_string(Tag::from_u16_exhaustive(GDAL_NODATA_TAG))
            .ok()
            .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f32>().ok())
            .filter(|v| !v.is_nan())
    }

    /// Write a `f32` raster; no data is stored as `NaN`
    pub fn write_geotiff<P: AsRef<Path>>(path: P, values: &Array2<f32>) -> No2Result<()> {
        let (height, width) = values.dim();
        let data: Vec<f32> = values.iter().copied().collect();
        let mut file = File::create(path.as_ref())?;
        let mut encoder = TiffEncoder::new(&mut file)?;
        encoder.write_image::<Gray32Float>(width as u32, height as u32, &data)?;
        Ok(())
    }

    /// Read band 1 through GDAL, honouring the band's no-data value
    #[cfg(feature = "gdal")]
    pub fn read_with_gdal<P: AsRef<Path>>(path: P) -> No2Result<Array2<f32>> {
        use gdal::Dataset;

        log::info!("Reading raster via GDAL: {}", path.as_ref().display());
        let dataset = Dataset::open(path.as_ref())?;
        let (width, height) = dataset.raster_size();
        let band = dataset.rasterband(1)?;
        let nodata = band.no_data_value().map(|v| v as f32);
        let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let data = buffer
            .data
            .into_iter()
            .map(|v| match nodata {
                Some(nd) if v == nd => NO_DATA,
                _ => v,
            })
            .collect();
        Array2::from_shape_vec((height, width), data)
            .map_err(|e| No2Error::ArtifactIo(format!("failed to reshape raster: {}", e)))
    }
}
