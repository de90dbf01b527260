use crate::types::{No2Error, No2Result};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Assemble still images, in the given order, into one looping GIF
pub fn composite_gif(stills: &[PathBuf], fps: u32, dest: &Path) -> No2Result<()> {
    if stills.is_empty() {
        return Err(No2Error::ArtifactIo("no still images to composite".to_string()));
    }
    if !(1..=80).contains(&fps) {
        return Err(No2Error::InvalidQuery(format!("frame rate {} is outside 1..=80", fps)));
    }

    let file = File::create(dest)
        .map_err(|e| No2Error::ArtifactIo(format!("cannot create {}: {}", dest.display(), e)))?;
    let mut writer = BufWriter::new(file);
    write_gif(stills, fps, &mut writer)?;
    writer.get_ref().sync_all()?;

    log::info!("Composited {} frames at {} fps into {}", stills.len(), fps, dest.display());
    Ok(())
}

/// Encode the stills into `writer` and flush it. Write errors of the trailer
/// surface through the final flush.
pub fn write_gif<W: Write>(stills: &[PathBuf], fps: u32, writer: &mut W) -> No2Result<()> {
    let mut encoder = GifEncoder::new(&mut *writer);
    encoder.set_repeat(Repeat::Infinite)?;

    let delay = Delay::from_numer_denom_ms(1000, fps);
    let mut size: Option<(u32, u32)> = None;

    for path in stills {
        let still = image::open(path)?.to_rgba8();
        match size {
            Some(expected) if expected != still.dimensions() => {
                return Err(No2Error::ArtifactIo(format!(
                    "{} is {:?}, expected {:?}",
                    path.display(),
                    still.dimensions(),
                    expected
                )));
            }
            _ => size = Some(still.dimensions()),
        }
        encoder.encode_frame(Frame::from_parts(still, 0, 0, delay))?;
    }

    // dropping the encoder writes the trailer
    drop(encoder);
    writer
        .flush()
        .map_err(|e| No2Error::ArtifactIo(format!("incomplete GIF: {}", e)))
}
