//! Output resolution: adopt the produced file or fall back to a preset
//! placeholder image.

use std::path::{Path, PathBuf};

/// Pick the output to hand downstream.
///
/// `expected` is adopted when a regular file exists there; otherwise the
/// `fallback` placeholder is. No lifecycle state is consulted, so files
/// produced while the operator was not watching are still picked up.
pub fn resolve(expected: &Path, fallback: &Path) -> PathBuf {
    if expected.is_file() {
        expected.to_path_buf()
    } else {
        fallback.to_path_buf()
    }
}

/// Preset placeholder image path: `{presets_dir}/{color}_{width}-{height}.{extension}`.
pub fn placeholder_path(
    presets_dir: &Path,
    color: &str,
    width: u32,
    height: u32,
    extension: &str,
) -> PathBuf {
    presets_dir.join(format!("{color}_{width}-{height}.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_output_is_adopted() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let expected = dir.path().join("foo_0001_.exr");
        std::fs::write(&expected, b"exr").expect("write output");
        let fallback = dir.path().join("black_1920-1080.exr");

        assert_eq!(resolve(&expected, &fallback), expected);
    }

    #[test]
    fn missing_output_falls_back() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let expected = dir.path().join("foo_0001_.exr");
        let fallback = dir.path().join("black_1920-1080.exr");

        assert_eq!(resolve(&expected, &fallback), fallback);
    }

    #[test]
    fn directory_is_not_an_output() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let expected = dir.path().join("foo_0001_.exr");
        std::fs::create_dir(&expected).expect("create dir");
        let fallback = dir.path().join("black_1920-1080.exr");

        assert_eq!(resolve(&expected, &fallback), fallback);
    }

    #[test]
    fn placeholder_naming() {
        assert_eq!(
            placeholder_path(Path::new("/work/presets"), "black", 1920, 1080, "exr"),
            PathBuf::from("/work/presets/black_1920-1080.exr")
        );
    }
}
