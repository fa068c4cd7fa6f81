//! Face detection/encoding capability consumed by the gallery builder and the
//! frame pipeline, plus the ONNX Runtime implementation of it.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Descriptor, FaceRegion};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Largest accepted upsample factor; each step doubles the detector input side.
pub const MAX_UPSAMPLE: u32 = 2;

const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("detection model {0} is not loaded")]
    ModelNotLoaded(DetectionModel),
}

/// Detector variant, trading speed for recall.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionModel {
    /// SCRFD 500M.
    Fast,
    /// SCRFD 10G.
    #[default]
    Accurate,
}

impl DetectionModel {
    /// ONNX file name of this variant inside the model directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            DetectionModel::Fast => "det_500m.onnx",
            DetectionModel::Accurate => "det_10g.onnx",
        }
    }
}

impl fmt::Display for DetectionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionModel::Fast => f.write_str("fast"),
            DetectionModel::Accurate => f.write_str("accurate"),
        }
    }
}

impl FromStr for DetectionModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "hog" => Ok(DetectionModel::Fast),
            "accurate" | "cnn" => Ok(DetectionModel::Accurate),
            other => Err(format!("unknown detection model {other:?} (expected fast or accurate)")),
        }
    }
}

/// Per-call detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectOptions {
    pub upsample: u32,
    pub model: DetectionModel,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            upsample: 1,
            model: DetectionModel::default(),
        }
    }
}

/// Black-box face detection and encoding.
pub trait FaceEngine {
    /// Find face regions in an RGB image, most confident first.
    fn detect(
        &mut self,
        image: &RgbImage,
        options: &DetectOptions,
    ) -> Result<Vec<FaceRegion>, EngineError>;

    /// Compute one descriptor per region, index-aligned with `regions`.
    fn encode(
        &mut self,
        image: &RgbImage,
        regions: &[FaceRegion],
    ) -> Result<Vec<Descriptor>, EngineError>;
}

/// SCRFD detection + ArcFace encoding via ONNX Runtime.
pub struct OnnxEngine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    model: DetectionModel,
}

impl OnnxEngine {
    /// Load the detector variant `model` and the ArcFace encoder from `model_dir`.
    pub fn load(model_dir: &Path, model: DetectionModel) -> Result<Self, EngineError> {
        let detector_path = model_dir.join(model.file_name());
        let detector = FaceDetector::load(&detector_path)?;
        tracing::info!(path = %detector_path.display(), %model, "SCRFD detector loaded");

        let recognizer_path = model_dir.join(ARCFACE_MODEL_FILE);
        let recognizer = FaceRecognizer::load(&recognizer_path)?;
        tracing::info!(path = %recognizer_path.display(), "ArcFace encoder loaded");

        Ok(Self {
            detector,
            recognizer,
            model,
        })
    }
}

impl FaceEngine for OnnxEngine {
    fn detect(
        &mut self,
        image: &RgbImage,
        options: &DetectOptions,
    ) -> Result<Vec<FaceRegion>, EngineError> {
        if options.model != self.model {
            return Err(EngineError::ModelNotLoaded(options.model));
        }
        let boxes = self.detector.detect(image, options.upsample.min(MAX_UPSAMPLE))?;
        Ok(boxes
            .iter()
            .filter_map(|b| b.to_region(image.width(), image.height()))
            .collect())
    }

    fn encode(
        &mut self,
        image: &RgbImage,
        regions: &[FaceRegion],
    ) -> Result<Vec<Descriptor>, EngineError> {
        regions
            .iter()
            .map(|region| Ok(self.recognizer.extract(image, region)?))
            .collect()
    }
}

/// Default model directory: `$XDG_DATA_HOME/presence/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("presence/models")
}
