//! presence-core: recognition-to-attendance engine.
//!
//! Builds a reference gallery from labeled images, matches observed faces
//! against it by Euclidean distance, and keeps a crash-safe daily
//! first-seen/last-seen attendance record. Face detection (SCRFD) and encoding
//! (ArcFace) run on ONNX Runtime behind the [`FaceEngine`] trait.

pub mod attendance;
pub mod clock;
pub mod detector;
pub mod engine;
pub mod gallery;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use attendance::{AttendanceRecord, AttendanceStore, DaySnapshot, Presence, Tracker};
pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{default_model_dir, DetectOptions, DetectionModel, FaceEngine, OnnxEngine};
pub use gallery::Gallery;
pub use matcher::{EuclideanMatcher, Identity, MatchResult, Matcher};
pub use types::{BoundingBox, Descriptor, FaceRegion};
