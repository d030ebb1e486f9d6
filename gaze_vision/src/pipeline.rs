// THEORY:
// The `pipeline` module is the top-level API of the gaze engine. A `GazePipeline`
// is one tracking session: it owns the calibrated lookup surface, the blob
// locator, the smoother and the blink state, and every per-frame call goes
// through it. Nothing lives in process-wide state.
//
// A session has two phases:
// 1.  **Calibration** (once, blocking): `calibrate` finds the pupil in the five
//     calibration frames and builds the lookup surface. A pipeline can only be
//     constructed from a finished `Calibration`, so no frame is ever mapped
//     against a half-built surface.
// 2.  **Tracking** (per frame): preprocess, locate, map, smooth, and update the
//     blink state. Each frame yields a `FrameReport` with everything a consumer
//     (telemetry, an overlay) needs.
//
// Once tracking starts the lookup surface belongs to the `GazeMapper`; the
// pipeline keeps only the `CalibrationSet` it was built from.
//
// Losing the pupil in a frame is not an error. It is reported as
// `detection: None`, and the configured `NoDetectionPolicy` decides what the
// gaze output does in the meantime.

use crate::core_modules::blink::{BlinkConfig, BlinkState, BlinkTransition};
use crate::core_modules::blob_locator::{select_largest, BlobLocator, DetectorConfig};
use crate::core_modules::calibration::{CalibrationSet, CalibrationSurface, CalibrationTarget};
use crate::core_modules::frame::{self, RegionOfInterest};
use crate::core_modules::gaze_mapper::GazeMapper;
use crate::core_modules::smoother::{GazeSmoother, SmoothingConfig};
use crate::core_modules::trail::GazeTrail;
use crate::error::{CalibrationError, ConfigError, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Re-export key data structures for the public API.
pub use crate::core_modules::blob::BlobCandidate;
pub use crate::core_modules::calibration::CalibrationSample;

const DEFAULT_TRAIL_LENGTH: usize = 0;

/// What the gaze output does on a frame where no pupil was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDetectionPolicy {
    /// Keep reporting the last smoothed gaze. The smoother does not advance;
    /// the time spent holding is added to the step of the next detected frame.
    #[default]
    HoldLast,
    /// Treat the frame as if the pupil were at pixel (0, 0) of the ROI and map
    /// it like any other position. Reproduces older trackers that could not
    /// tell "no pupil" apart from a real position.
    LegacyOrigin,
}

/// Session configuration. Every value is constant for the pipeline's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub roi: RegionOfInterest,
    /// Binarization threshold; pixels at or above it become white.
    pub threshold: u8,
    pub detector: DetectorConfig,
    pub smoothing: SmoothingConfig,
    pub blink: BlinkConfig,
    pub no_detection: NoDetectionPolicy,
    /// Number of recent gaze points kept for overlays drawn by the caller.
    /// Zero, the default, keeps no history.
    pub trail_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            roi: RegionOfInterest::new(0, 0, 640, 480),
            threshold: 127,
            detector: DetectorConfig::default(),
            smoothing: SmoothingConfig::default(),
            blink: BlinkConfig::default(),
            no_detection: NoDetectionPolicy::default(),
            trail_length: DEFAULT_TRAIL_LENGTH,
        }
    }
}

impl PipelineConfig {
    /// Checks everything that can be checked without seeing a frame.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.roi.check_non_empty()?;
        self.detector.validate()?;
        self.blink.validate()?;
        let tau = self.smoothing.tau_secs;
        if !(tau.is_finite() && tau >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "smoothing.tau_secs",
                reason: format!("must be a finite, non-negative number of seconds, got {tau}"),
            });
        }
        Ok(())
    }
}

/// A finished calibration: where the pupil was for each target, and the lookup
/// surface built from it.
#[derive(Debug, Clone)]
pub struct Calibration {
    set: CalibrationSet,
    surface: CalibrationSurface,
}

impl Calibration {
    /// Builds a calibration directly from known pupil positions, for callers that
    /// located the pupil themselves.
    pub fn from_set(set: CalibrationSet, roi: &RegionOfInterest) -> std::result::Result<Self, CalibrationError> {
        let surface = CalibrationSurface::build(&set.samples(), roi.width, roi.height)?;
        Ok(Self { set, surface })
    }

    pub fn set(&self) -> &CalibrationSet {
        &self.set
    }

    pub fn samples(&self) -> Vec<CalibrationSample> {
        self.set.samples()
    }

    /// Pupil position for the center target, the anchor of the calibration overlay.
    pub fn anchor(&self) -> [f64; 2] {
        self.set.anchor()
    }

    pub fn surface(&self) -> &CalibrationSurface {
        &self.surface
    }

    pub fn into_parts(self) -> (CalibrationSet, CalibrationSurface) {
        (self.set, self.surface)
    }
}

/// The five calibration frames, one per target, captured while the user held
/// each fixation.
#[derive(Debug, Clone, Default)]
pub struct CalibrationFrames {
    frames: Vec<(CalibrationTarget, DynamicImage)>,
}

impl CalibrationFrames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the frame for `target`. A target given twice is rejected by
    /// [`calibrate`], not here.
    pub fn insert(&mut self, target: CalibrationTarget, frame: DynamicImage) {
        self.frames.push((target, frame));
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CalibrationTarget, &DynamicImage)> {
        self.frames.iter().map(|(target, frame)| (*target, frame))
    }
}

impl FromIterator<(CalibrationTarget, DynamicImage)> for CalibrationFrames {
    fn from_iter<I: IntoIterator<Item = (CalibrationTarget, DynamicImage)>>(iter: I) -> Self {
        Self { frames: iter.into_iter().collect() }
    }
}

/// Locates the pupil in each calibration frame and builds the lookup surface.
///
/// Every target must appear exactly once. A calibration frame without a
/// detectable pupil fails the whole calibration.
pub fn calibrate(config: &PipelineConfig, frames: &CalibrationFrames) -> Result<Calibration> {
    config.validate()?;
    let locator = BlobLocator::new(config.detector.clone());

    let mut observations = Vec::with_capacity(CalibrationTarget::ALL.len());
    for (target, image) in frames.iter() {
        let binary = frame::preprocess(image, &config.roi, config.threshold)?;
        let pupil = locator
            .locate(&binary)
            .ok_or(CalibrationError::NoDetection(target))?;
        observations.push((target, [pupil.x, pupil.y]));
    }

    let set = CalibrationSet::from_observations(observations)?;
    let calibration = Calibration::from_set(set, &config.roi)?;

    tracing::info!("Calibrated with points:");
    for target in CalibrationTarget::ALL {
        let [x, y] = calibration.set.position(target);
        let [gx, gy] = target.gaze();
        tracing::info!(%target, x, y, gaze_x = gx, gaze_y = gy, "ROI pixel position");
    }

    Ok(calibration)
}

/// One value the telemetry sink should send for a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Telemetry {
    GazeX(f32),
    GazeY(f32),
    /// Sent only on the frame where the blink state changes.
    Blink(bool),
}

/// Everything the pipeline learned from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// Sequence number of the frame within the session, starting at 0.
    pub frame_index: u64,
    /// The dominant pupil candidate, if any.
    pub detection: Option<BlobCandidate>,
    /// Number of candidates that passed the detector filters.
    pub candidate_count: usize,
    /// Saturated gaze looked up for this frame, before smoothing. `None` when
    /// the frame had no detection and the policy holds the last value.
    pub raw_gaze: Option<[f64; 2]>,
    /// Smoothed gaze, each component in [-1, 1].
    pub gaze: [f64; 2],
    pub black_proportion: f64,
    pub is_blinking: bool,
    pub blink: BlinkTransition,
}

impl FrameReport {
    /// The values to publish for this frame: both gaze components every frame,
    /// plus a blink event on transition frames.
    pub fn telemetry(&self) -> Vec<Telemetry> {
        let mut out = vec![Telemetry::GazeX(self.gaze[0] as f32), Telemetry::GazeY(self.gaze[1] as f32)];
        if let Some(level) = self.blink.event() {
            out.push(Telemetry::Blink(level));
        }
        out
    }
}

/// The gaze engine for one tracking session.
pub struct GazePipeline {
    config: PipelineConfig,
    locator: BlobLocator,
    mapper: GazeMapper,
    calibration: CalibrationSet,
    smoother: GazeSmoother,
    /// Time covered by frames the smoother skipped since its last update.
    held: Duration,
    blink: BlinkState,
    trail: GazeTrail,
    frame_index: u64,
}

impl GazePipeline {
    pub fn new(config: PipelineConfig, calibration: Calibration) -> Result<Self> {
        config.validate()?;
        let surface = calibration.surface();
        if surface.width() != config.roi.width || surface.height() != config.roi.height {
            return Err(ConfigError::InvalidParameter {
                name: "roi",
                reason: format!(
                    "calibration surface is {}x{} but the region is {}x{}",
                    surface.width(),
                    surface.height(),
                    config.roi.width,
                    config.roi.height
                ),
            }
            .into());
        }

        let (set, surface) = calibration.into_parts();
        Ok(Self {
            locator: BlobLocator::new(config.detector.clone()),
            mapper: GazeMapper::new(surface),
            smoother: GazeSmoother::new(config.smoothing),
            held: Duration::ZERO,
            blink: BlinkState::new(config.blink),
            trail: GazeTrail::new(config.trail_length),
            calibration: set,
            config,
            frame_index: 0,
        })
    }

    /// Processes one frame captured `dt` after the previous one.
    pub fn process_frame(&mut self, image: &DynamicImage, dt: Duration) -> Result<FrameReport> {
        // Stage 1: Preprocessing
        let binary = frame::preprocess(image, &self.config.roi, self.config.threshold)?;

        // Stage 2: Pupil Location
        let candidates = self.locator.detect(&binary);
        let candidate_count = candidates.len();
        let detection = select_largest(candidates);

        // Stage 3: Gaze Lookup
        let position = match (&detection, self.config.no_detection) {
            (Some(blob), _) => Some([blob.x, blob.y]),
            (None, NoDetectionPolicy::LegacyOrigin) => Some([0.0, 0.0]),
            (None, NoDetectionPolicy::HoldLast) => None,
        };
        let raw_gaze = position.map(|p| self.mapper.map(p));

        // Stage 4: Temporal Smoothing
        let gaze = match raw_gaze {
            Some(raw) => {
                let step = dt + std::mem::take(&mut self.held);
                self.smoother.update(raw, step)
            }
            None => {
                self.held += dt;
                self.smoother.current().unwrap_or([0.0, 0.0])
            }
        };
        self.trail.push(gaze);

        match raw_gaze {
            Some([rx, ry]) => tracing::debug!(
                frame = self.frame_index,
                raw_x = rx,
                raw_y = ry,
                gaze_x = gaze[0],
                gaze_y = gaze[1],
                "gaze"
            ),
            None => tracing::debug!(frame = self.frame_index, "no pupil detected, holding gaze"),
        }

        // Stage 5: Blink State
        let black_proportion = frame::black_proportion(&binary, self.config.blink.black_level);
        let blink = self.blink.update(black_proportion);
        if blink.started {
            tracing::debug!(frame = self.frame_index, "Blink/Eye Not Detected");
        }
        if blink.ended {
            tracing::debug!(frame = self.frame_index, "Unblink/Eye Detected");
        }

        let report = FrameReport {
            frame_index: self.frame_index,
            detection,
            candidate_count,
            raw_gaze,
            gaze,
            black_proportion,
            is_blinking: self.blink.is_blinking(),
            blink,
        };
        self.frame_index += 1;
        Ok(report)
    }

    /// Swaps in a new calibration. The old surface is discarded wholesale and the
    /// smoothing, held time, blink and trail state restart as at session start.
    pub fn recalibrate(&mut self, calibration: Calibration) -> Result<()> {
        let fresh = Self::new(self.config.clone(), calibration)?;
        *self = fresh;
        Ok(())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn calibration_set(&self) -> &CalibrationSet {
        &self.calibration
    }

    pub fn mapper(&self) -> &GazeMapper {
        &self.mapper
    }

    pub fn trail(&self) -> &GazeTrail {
        &self.trail
    }

    pub fn blink_state(&self) -> &BlinkState {
        &self.blink
    }

    /// Number of frames processed so far.
    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }
}
