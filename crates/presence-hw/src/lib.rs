//! presence-hw: Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access delivering RGB frames, plus the
//! [`FrameSource`] trait the recognition loop reads from.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, FrameSource, PixelFormat};
pub use frame::Frame;
