// THEORY:
// Errors in the gaze engine fall into two families, and neither of them is a
// per-frame failure. `ConfigError` covers parameters that can never produce a
// working session (an ROI that does not fit the frame, inverted filter bounds).
// `CalibrationError` covers a calibration that cannot produce a usable lookup
// surface. Both are fatal at startup. Everything that happens per frame
// (lookup, smoothing, saturation) is total over its domain, and losing the
// pupil in a frame is reported as data, not raised.

use crate::core_modules::calibration::CalibrationTarget;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("region of interest {width}x{height} at ({x}, {y}) is empty")]
    EmptyRoi { x: u32, y: u32, width: u32, height: u32 },
    #[error(
        "region of interest {width}x{height} at ({x}, {y}) does not fit a {frame_width}x{frame_height} frame"
    )]
    RoiOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("at least 3 calibration samples are required, got {0}")]
    InsufficientSamples(usize),
    #[error("calibration sample {index} has a non-finite position or target")]
    NonFiniteSample { index: usize },
    #[error("calibration samples {first} and {second} share the same pupil position")]
    CoincidentSamples { first: usize, second: usize },
    #[error("calibration sample positions are collinear")]
    CollinearSamples,
    #[error("no pupil detected in the {0} calibration frame")]
    NoDetection(CalibrationTarget),
    #[error("calibration target {0} was supplied more than once")]
    DuplicateTarget(CalibrationTarget),
    #[error("calibration target {0} is missing")]
    MissingTarget(CalibrationTarget),
    #[error("calibration hull covers no pixel of the {width}x{height} surface")]
    UncoveredSurface { width: u32, height: u32 },
}

/// Top-level error for the gaze engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GazeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),
    /// No pupil candidate in a frame. The pipeline itself never returns this;
    /// it is here for callers that decide detection loss should be fatal.
    #[error("no pupil detected")]
    NoDetection,
}

pub type Result<T> = std::result::Result<T, GazeError>;
