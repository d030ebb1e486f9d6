// THEORY:
// This file is the main entry point for the `gaze_vision` library crate.
// It defines the public API exposed to frame sources and telemetry front ends
// (like the `gaze_runner` binary).
//
// The primary goal is to export the `GazePipeline` and its associated data
// structures (`PipelineConfig`, `FrameReport`, `Calibration`, etc.) as the
// high-level interface for the whole engine. The individual stages in
// `core_modules` stay public for callers that want to drive them directly,
// but a normal session never needs to touch them.

pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use core_modules::blob_locator::{BlobPolarity, DetectorConfig};
pub use core_modules::blink::{BlinkConfig, BlinkTransition};
pub use core_modules::calibration::{CalibrationSet, CalibrationTarget};
pub use core_modules::frame::RegionOfInterest;
pub use core_modules::smoother::SmoothingConfig;
pub use error::{CalibrationError, ConfigError, GazeError, Result};
pub use pipeline::{
    calibrate, Calibration, CalibrationFrames, FrameReport, GazePipeline, NoDetectionPolicy, PipelineConfig, Telemetry,
};
