//! Moving finished artifacts out of a request's staging directory

use crate::types::{No2Error, No2Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Move a fully written file from staging into `dir` under a name no other
/// request can hold: `<stem>_<random>.<extension>`.
///
/// The name is reserved in `dir` first, then the staged file replaces the
/// reservation. When staging and output sit on different filesystems the file
/// is copied instead; a failed copy removes the reservation again.
pub fn publish(staged: &Path, dir: &Path, stem: &str, extension: &str) -> No2Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let reserved = tempfile::Builder::new()
        .prefix(&format!("{}_", stem))
        .suffix(&format!(".{}", extension))
        .rand_bytes(8)
        .tempfile_in(dir)?;

    if let Err(e) = fs::rename(staged, reserved.path()) {
        log::debug!(
            "Rename of {} failed ({}), copying into {}",
            staged.display(),
            e,
            dir.display()
        );
        fs::copy(staged, reserved.path())?;
        fs::remove_file(staged)?;
    }

    let (_, path) = reserved
        .keep()
        .map_err(|e| No2Error::ArtifactIo(format!("cannot keep artifact in {}: {}", dir.display(), e)))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_moves_file_under_unique_name() {
        let staging = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        let mut published = Vec::new();
        for body in ["first", "second"] {
            let staged = staging.path().join("animation.gif");
            fs::write(&staged, body).unwrap();
            let path = publish(&staged, output.path(), "no2_animation_2019-07-01_2019-07-02", "gif").unwrap();
            assert!(!staged.exists());
            published.push(path);
        }

        assert_ne!(published[0], published[1]);
        for (path, body) in published.iter().zip(["first", "second"]) {
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("no2_animation_2019-07-01_2019-07-02_"));
            assert!(name.ends_with(".gif"));
            assert_eq!(fs::read_to_string(path).unwrap(), body);
        }
    }

    #[test]
    fn test_missing_staged_file_leaves_no_reservation() {
        let staging = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let err = publish(&staging.path().join("missing.png"), output.path(), "no2_snapshot", "png").unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::ArtifactIo);
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
    }
}
