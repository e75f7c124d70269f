//! Operator configuration: ComfyUI server address, request timeout and
//! the working directory layout, read from `COMFYUI_*` environment
//! variables.

use std::path::PathBuf;
use std::time::Duration;

use comfybox_core::workflow::WorkflowKind;

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Operator configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local ComfyUI install. The
/// directory layout below `working_dir` is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// ComfyUI host name (default: `localhost`).
    pub hostname: String,
    /// ComfyUI port (default: `8188`).
    pub hostport: u16,
    /// Shared ComfyUI working directory (default: `/var/lib/comfyui`).
    pub working_dir: PathBuf,
    /// Per-request HTTP timeout in seconds (default: `10`).
    pub request_timeout_secs: u64,
    /// Output image extension (default: `exr`).
    pub image_format: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".into(),
            hostport: 8188,
            working_dir: PathBuf::from("/var/lib/comfyui"),
            request_timeout_secs: 10,
            image_format: "exr".into(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default            |
    /// |--------------------------------|--------------------|
    /// | `COMFYUI_HOSTNAME`             | `localhost`        |
    /// | `COMFYUI_HOSTPORT`             | `8188`             |
    /// | `COMFYUI_WORKING_DIR`          | `/var/lib/comfyui` |
    /// | `COMFYUI_REQUEST_TIMEOUT_SECS` | `10`               |
    /// | `COMFYUI_IMAGE_FORMAT`         | `exr`              |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let hostname = lookup("COMFYUI_HOSTNAME")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.hostname);

        let hostport = match lookup("COMFYUI_HOSTPORT") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "COMFYUI_HOSTPORT",
                value,
                expected: "a valid port number",
            })?,
            None => defaults.hostport,
        };

        let working_dir = lookup("COMFYUI_WORKING_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.working_dir);

        let request_timeout_secs = match lookup("COMFYUI_REQUEST_TIMEOUT_SECS") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "COMFYUI_REQUEST_TIMEOUT_SECS",
                        value,
                        expected: "a positive number of seconds",
                    })
                }
            },
            None => defaults.request_timeout_secs,
        };

        let image_format = match lookup("COMFYUI_IMAGE_FORMAT") {
            Some(value) => {
                let format = value.trim().trim_start_matches('.').to_ascii_lowercase();
                if format.is_empty() || !format.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(ConfigError::Invalid {
                        var: "COMFYUI_IMAGE_FORMAT",
                        value,
                        expected: "a file extension such as 'exr'",
                    });
                }
                format
            }
            None => defaults.image_format,
        };

        Ok(Self {
            hostname,
            hostport,
            working_dir,
            request_timeout_secs,
            image_format,
        })
    }

    /// Base HTTP URL of the ComfyUI server.
    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.hostport)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.working_dir.join("workflows")
    }

    pub fn input_dir(&self) -> PathBuf {
        self.working_dir.join("in")
    }

    /// Where the server writes its results.
    pub fn output_dir(&self) -> PathBuf {
        self.working_dir.join("out")
    }

    /// Placeholder images shown until an output exists.
    pub fn presets_dir(&self) -> PathBuf {
        self.working_dir.join("presets")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.working_dir.join("models")
    }

    /// Default workflow file for `kind`.
    pub fn workflow_path(&self, kind: WorkflowKind) -> PathBuf {
        self.workflows_dir().join(kind.workflow_path())
    }

    /// Directories scanned for `kind`'s models.
    pub fn model_dirs(&self, kind: WorkflowKind) -> Vec<PathBuf> {
        let models_dir = self.models_dir();
        kind.model_dirs()
            .iter()
            .map(|dir| models_dir.join(dir))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = OperatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(config.api_url(), "http://localhost:8188");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn values_are_read_from_env() {
        let config = OperatorConfig::from_lookup(lookup(&[
            ("COMFYUI_HOSTNAME", "gpu-01"),
            ("COMFYUI_HOSTPORT", "8190"),
            ("COMFYUI_WORKING_DIR", "/mnt/comfy"),
            ("COMFYUI_REQUEST_TIMEOUT_SECS", "30"),
            ("COMFYUI_IMAGE_FORMAT", ".PNG"),
        ]))
        .unwrap();

        assert_eq!(config.api_url(), "http://gpu-01:8190");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.image_format, "png");
        assert_eq!(config.output_dir(), PathBuf::from("/mnt/comfy/out"));
        assert_eq!(config.presets_dir(), PathBuf::from("/mnt/comfy/presets"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let result = OperatorConfig::from_lookup(lookup(&[("COMFYUI_HOSTPORT", "99999")]));
        assert_matches!(
            result,
            Err(ConfigError::Invalid { var: "COMFYUI_HOSTPORT", .. })
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let result = OperatorConfig::from_lookup(lookup(&[("COMFYUI_REQUEST_TIMEOUT_SECS", "0")]));
        assert_matches!(
            result,
            Err(ConfigError::Invalid { var: "COMFYUI_REQUEST_TIMEOUT_SECS", .. })
        );
    }

    #[test]
    fn workflow_and_model_paths_follow_layout() {
        let config = OperatorConfig {
            working_dir: PathBuf::from("/w"),
            ..OperatorConfig::default()
        };
        assert_eq!(
            config.workflow_path(WorkflowKind::Marigold),
            PathBuf::from("/w/workflows/zdepth/api/comfyui_zdepth_marigold_workflow_api.json")
        );
        assert_eq!(
            config.model_dirs(WorkflowKind::StableDiffusion),
            vec![
                PathBuf::from("/w/models/checkpoints"),
                PathBuf::from("/w/models/diffusers")
            ]
        );
        assert!(config.model_dirs(WorkflowKind::Marigold).is_empty());
    }
}
