//! Output version allocation.
//!
//! Output files follow the convention written by the remote `SaveEXR`
//! node: `{basename}_{zero-padded version}_.{extension}`. Each basename is
//! its own versioning scope; `moonshot_sd1` and `moonshot_sd1_extra` never
//! share a counter.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Version used when nothing has been produced in a scope yet.
pub const INITIAL_VERSION: u32 = 1;

/// Highest version already present in `output_dir` for `basename`.
///
/// Returns `Ok(None)` when the directory is missing or holds no file in
/// scope. A same-scope file whose version token is not an integer is a
/// [`CoreError::MalformedOutputName`].
pub fn latest_version(
    output_dir: &Path,
    basename: &str,
    extension: &str,
) -> Result<Option<u32>, CoreError> {
    Ok(latest_output(output_dir, basename, extension)?.map(|(version, _)| version))
}

/// Like [`latest_version`], but also returns the path of the file carrying
/// that version, whatever padding it was written with.
pub fn latest_output(
    output_dir: &Path,
    basename: &str,
    extension: &str,
) -> Result<Option<(u32, PathBuf)>, CoreError> {
    let entries = match std::fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut latest: Option<(u32, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(token) = version_token(file_name, basename, extension) else {
            continue;
        };
        let version: u32 = token.parse().map_err(|_| CoreError::MalformedOutputName {
            path: entry.path().display().to_string(),
            token: token.to_string(),
        })?;
        if latest.as_ref().map_or(true, |(best, _)| version > *best) {
            latest = Some((version, entry.path()));
        }
    }

    Ok(latest)
}

/// Next unused version for `basename`: one past the highest existing
/// version, or [`INITIAL_VERSION`] when the scope is empty.
pub fn next_version(output_dir: &Path, basename: &str, extension: &str) -> Result<u32, CoreError> {
    Ok(latest_version(output_dir, basename, extension)?
        .map_or(INITIAL_VERSION, |v| v.saturating_add(1)))
}

/// Zero-pad `version` to `pad_width` digits.
///
/// Versions wider than `pad_width` are kept whole, never truncated.
pub fn pad_version(version: u32, pad_width: usize) -> String {
    format!("{version:0pad_width$}")
}

/// Compose `dir/{basename}_{padded}_.{extension}`.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use comfybox_core::versioning::render_path;
///
/// assert_eq!(render_path("foo", 7, 4, "exr", "/out"), PathBuf::from("/out/foo_0007_.exr"));
/// assert_eq!(render_path("foo", 12345, 4, "exr", "/out"), PathBuf::from("/out/foo_12345_.exr"));
/// ```
pub fn render_path(
    basename: &str,
    version: u32,
    pad_width: usize,
    extension: &str,
    dir: impl AsRef<Path>,
) -> PathBuf {
    dir.as_ref().join(format!(
        "{basename}_{}_.{extension}",
        pad_version(version, pad_width)
    ))
}

/// Extract the version token of an in-scope file name.
///
/// `None` means the file belongs to another scope (different basename,
/// extension or shape), not that the token is malformed.
fn version_token<'a>(file_name: &'a str, basename: &str, extension: &str) -> Option<&'a str> {
    let token = file_name
        .strip_prefix(basename)?
        .strip_prefix('_')?
        .strip_suffix(extension)?
        .strip_suffix("_.")?;
    if token.is_empty() || token.contains('_') {
        return None;
    }
    Some(token)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").expect("write file");
    }

    #[test]
    fn next_version_after_highest_existing() {
        let dir = tempfile::tempdir().expect("create temp dir");
        touch(dir.path(), "foo_0007_.exr");
        touch(dir.path(), "foo_0003_.exr");
        assert_eq!(next_version(dir.path(), "foo", "exr").unwrap(), 8);
        assert_eq!(latest_version(dir.path(), "foo", "exr").unwrap(), Some(7));
    }

    #[test]
    fn next_version_defaults_to_one() {
        let dir = tempfile::tempdir().expect("create temp dir");
        assert_eq!(next_version(dir.path(), "foo", "exr").unwrap(), 1);
    }

    #[test]
    fn missing_directory_counts_as_empty() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let missing = dir.path().join("out");
        assert_eq!(next_version(&missing, "foo", "exr").unwrap(), 1);
    }

    #[test]
    fn scopes_do_not_share_counters() {
        let dir = tempfile::tempdir().expect("create temp dir");
        touch(dir.path(), "foo_bar_0009_.exr");
        touch(dir.path(), "foobar_0005_.exr");
        touch(dir.path(), "foo_0002_.exr");
        assert_eq!(next_version(dir.path(), "foo", "exr").unwrap(), 3);
        assert_eq!(next_version(dir.path(), "foo_bar", "exr").unwrap(), 10);
    }

    #[test]
    fn other_extensions_are_ignored() {
        let dir = tempfile::tempdir().expect("create temp dir");
        touch(dir.path(), "foo_0004_.png");
        assert_eq!(next_version(dir.path(), "foo", "exr").unwrap(), 1);
    }

    #[test]
    fn numeric_order_beyond_pad_width() {
        let dir = tempfile::tempdir().expect("create temp dir");
        touch(dir.path(), "foo_9999_.exr");
        touch(dir.path(), "foo_10000_.exr");
        assert_eq!(next_version(dir.path(), "foo", "exr").unwrap(), 10001);
    }

    #[test]
    fn unparseable_token_is_an_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        touch(dir.path(), "foo_0002_.exr");
        touch(dir.path(), "foo_final_.exr");
        assert_matches!(
            next_version(dir.path(), "foo", "exr"),
            Err(CoreError::MalformedOutputName { ref token, .. }) if token == "final"
        );
    }

    #[test]
    fn latest_output_keeps_the_written_padding() {
        let dir = tempfile::tempdir().expect("create temp dir");
        touch(dir.path(), "foo_00002_.exr");
        touch(dir.path(), "foo_00011_.exr");
        assert_eq!(
            latest_output(dir.path(), "foo", "exr").unwrap(),
            Some((11, dir.path().join("foo_00011_.exr")))
        );
    }

    #[test]
    fn render_path_pads() {
        assert_eq!(
            render_path("foo", 7, 4, "exr", "/out"),
            PathBuf::from("/out/foo_0007_.exr")
        );
    }

    #[test]
    fn render_path_never_truncates() {
        assert_eq!(
            render_path("foo", 12345, 4, "exr", "/out"),
            PathBuf::from("/out/foo_12345_.exr")
        );
    }

    #[test]
    fn pad_version_zero_width() {
        assert_eq!(pad_version(3, 0), "3");
    }
}
