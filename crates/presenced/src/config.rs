use presence_core::DetectionModel;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Layered: defaults, then the TOML file named by `PRESENCE_CONFIG`, then
/// `PRESENCE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture width.
    pub frame_width: u32,
    /// Requested capture height.
    pub frame_height: u32,
    /// Frames to discard after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Directory of labeled reference images.
    pub gallery_dir: PathBuf,
    /// Attendance CSV file.
    pub attendance_file: PathBuf,
    /// Maximum descriptor distance accepted as a match (lower is stricter).
    pub tolerance: f32,
    /// Detection upsample factor, 0..=2.
    pub upsample: u32,
    /// Detector variant.
    pub detection_model: DetectionModel,
    /// Frame downscale factor before detection, in (0, 1].
    pub resize: f32,
    /// Where to write the annotated frame, if anywhere.
    pub preview_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            warmup_frames: 4,
            model_dir: presence_core::default_model_dir(),
            gallery_dir: PathBuf::from("known_faces"),
            attendance_file: PathBuf::from("attendance.csv"),
            tolerance: 1.0,
            upsample: 1,
            detection_model: DetectionModel::Accurate,
            resize: 0.5,
            preview_path: None,
        }
    }
}

impl Config {
    /// Load configuration from `PRESENCE_CONFIG` (if set) and `PRESENCE_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("PRESENCE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `PRESENCE_*` keys returned by `lookup`.
    ///
    /// Unparseable values keep the current setting and log a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PRESENCE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        override_parsed(&lookup, "PRESENCE_FRAME_WIDTH", &mut self.frame_width);
        override_parsed(&lookup, "PRESENCE_FRAME_HEIGHT", &mut self.frame_height);
        override_parsed(&lookup, "PRESENCE_WARMUP_FRAMES", &mut self.warmup_frames);
        override_parsed(&lookup, "PRESENCE_MODEL_DIR", &mut self.model_dir);
        override_parsed(&lookup, "PRESENCE_GALLERY_DIR", &mut self.gallery_dir);
        override_parsed(&lookup, "PRESENCE_ATTENDANCE_FILE", &mut self.attendance_file);
        override_parsed(&lookup, "PRESENCE_TOLERANCE", &mut self.tolerance);
        override_parsed(&lookup, "PRESENCE_UPSAMPLE", &mut self.upsample);
        override_parsed(&lookup, "PRESENCE_DETECTION_MODEL", &mut self.detection_model);
        override_parsed(&lookup, "PRESENCE_RESIZE", &mut self.resize);
        if let Some(v) = lookup("PRESENCE_PREVIEW_PATH") {
            self.preview_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(e) => tracing::warn!(key, value = %raw, error = %e, "ignoring invalid setting"),
    }
}
