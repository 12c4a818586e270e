use facemark_core::{ModelConfig, MAX_DETECTIONS, MAX_IMAGE_DIM};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Daemon configuration.
///
/// Built from an optional TOML file (path in `FACEMARK_CONFIG`) with
/// `FACEMARK_*` environment variables taking precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Detector backend: "caffe" or "tf". Validated when the engine starts.
    pub backend: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Landmark fitting is skipped at or above this many faces.
    pub max_detections: usize,
    /// Uploads larger than this on both sides are downscaled.
    pub max_image_dim: u32,
    /// Number of client sessions kept before the least recently used is dropped.
    pub max_sessions: usize,
}

/// On-disk shape of the optional config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    backend: Option<String>,
    model_dir: Option<PathBuf>,
    max_detections: Option<usize>,
    max_image_dim: Option<u32>,
    max_sessions: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: "caffe".to_string(),
            model_dir: facemark_core::default_model_dir(),
            max_detections: MAX_DETECTIONS,
            max_image_dim: MAX_IMAGE_DIM,
            max_sessions: 32,
        }
    }
}

impl Config {
    /// Load the config file named by `FACEMARK_CONFIG` (if set), then apply
    /// `FACEMARK_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACEMARK_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a TOML config file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        let file: FileConfig = toml::from_str(text)?;
        let defaults = Self::default();
        Ok(Self {
            backend: file.backend.unwrap_or(defaults.backend),
            model_dir: file.model_dir.unwrap_or(defaults.model_dir),
            max_detections: file.max_detections.unwrap_or(defaults.max_detections),
            max_image_dim: file.max_image_dim.unwrap_or(defaults.max_image_dim),
            max_sessions: file.max_sessions.unwrap_or(defaults.max_sessions),
        })
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production). Unparseable numbers are ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(backend) = lookup("FACEMARK_BACKEND") {
            self.backend = backend;
        }
        if let Some(dir) = lookup("FACEMARK_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("FACEMARK_MAX_DETECTIONS").and_then(|v| v.parse().ok()) {
            self.max_detections = v;
        }
        if let Some(v) = lookup("FACEMARK_MAX_IMAGE_DIM").and_then(|v| v.parse().ok()) {
            self.max_image_dim = v;
        }
        if let Some(v) = lookup("FACEMARK_MAX_SESSIONS").and_then(|v| v.parse().ok()) {
            self.max_sessions = v;
        }
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            backend: self.backend.clone(),
            model_dir: self.model_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend, "caffe");
        assert_eq!(config.max_detections, 10);
        assert_eq!(config.max_image_dim, 800);
        assert_eq!(config.model_dir, PathBuf::from("models"));
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml("backend = \"tf\"\nmax_sessions = 4\n").unwrap();
        assert_eq!(config.backend, "tf");
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.max_detections, 10);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(Config::from_toml("threshold = 0.3\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FACEMARK_BACKEND", "tf"),
            ("FACEMARK_MODEL_DIR", "/srv/models"),
            ("FACEMARK_MAX_DETECTIONS", "5"),
            ("FACEMARK_MAX_IMAGE_DIM", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.backend, "tf");
        assert_eq!(config.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.max_detections, 5);
        assert_eq!(config.max_image_dim, 800);
    }

    #[test]
    fn test_backend_is_not_validated_here() {
        let mut config = Config::default();
        config.apply_env(|k| (k == "FACEMARK_BACKEND").then(|| "xyz".to_string()));
        assert_eq!(config.model_config().backend, "xyz");
    }
}
