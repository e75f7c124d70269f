//! Local model file discovery.
//!
//! Walks model directories and collects model file names by extension,
//! skipping directories that only hold model internals (tokenizers,
//! scheduler configs, VCS metadata, ...).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Directory names never descended into.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "doc",
    "tokenizer",
    "text_encoder",
    "unet",
    "scheduler",
];

/// File extensions recognised as model checkpoints.
pub const DEFAULT_MODEL_EXTENSIONS: &[&str] = &["safetensors", "ckpt"];

/// Collect model file names under `dirs`.
///
/// Returns file names only (not paths), de-duplicated and sorted. Roots
/// that do not exist are skipped.
pub fn find_models(
    dirs: &[PathBuf],
    excluded_dirs: &[&str],
    extensions: &[&str],
) -> Result<Vec<String>, CoreError> {
    let mut found = BTreeSet::new();
    for dir in dirs {
        if !dir.is_dir() {
            continue;
        }
        walk(dir, excluded_dirs, extensions, &mut found)?;
    }
    Ok(found.into_iter().collect())
}

fn walk(
    dir: &Path,
    excluded_dirs: &[&str],
    extensions: &[&str],
    found: &mut BTreeSet<String>,
) -> Result<(), CoreError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if file_type.is_dir() {
            if !excluded_dirs.contains(&name.as_str()) {
                walk(&entry.path(), excluded_dirs, extensions, found)?;
            }
        } else if file_type.is_file() && has_model_extension(&name, extensions) {
            found.insert(name);
        }
    }
    Ok(())
}

fn has_model_extension(name: &str, extensions: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
        std::fs::write(path, b"").expect("write file");
    }

    #[test]
    fn finds_models_recursively_and_dedups() {
        let checkpoints = tempfile::tempdir().expect("create temp dir");
        let diffusers = tempfile::tempdir().expect("create temp dir");
        touch(&checkpoints.path().join("sd_xl_base_1.0.safetensors"));
        touch(&checkpoints.path().join("nested/v1-5.ckpt"));
        touch(&checkpoints.path().join("notes.txt"));
        touch(&diffusers.path().join("sd_xl_base_1.0.safetensors"));

        let models = find_models(
            &[checkpoints.path().to_path_buf(), diffusers.path().to_path_buf()],
            DEFAULT_EXCLUDED_DIRS,
            DEFAULT_MODEL_EXTENSIONS,
        )
        .unwrap();

        assert_eq!(models, vec!["sd_xl_base_1.0.safetensors", "v1-5.ckpt"]);
    }

    #[test]
    fn excluded_directories_are_skipped() {
        let root = tempfile::tempdir().expect("create temp dir");
        touch(&root.path().join("unet/diffusion_pytorch_model.safetensors"));
        touch(&root.path().join("text_encoder/model.safetensors"));
        touch(&root.path().join("model.safetensors"));

        let models = find_models(
            &[root.path().to_path_buf()],
            DEFAULT_EXCLUDED_DIRS,
            DEFAULT_MODEL_EXTENSIONS,
        )
        .unwrap();

        assert_eq!(models, vec!["model.safetensors"]);
    }

    #[test]
    fn missing_roots_are_ignored() {
        let models = find_models(
            &[PathBuf::from("/nonexistent/models")],
            DEFAULT_EXCLUDED_DIRS,
            DEFAULT_MODEL_EXTENSIONS,
        )
        .unwrap();
        assert!(models.is_empty());
    }
}
