// THEORY:
// Raw gaze jitters from frame to frame with pupil-detection noise. The smoother
// is a first-order low-pass filter defined in continuous time by a time constant
// `tau` and discretized per frame with whatever `dt` actually elapsed:
//
//     alpha = 1 - exp(-dt / tau)
//     smoothed = raw * alpha + previous * (1 - alpha)
//
// Because alpha is derived from `dt`, the filter's response in wall-clock time is
// the same at 30 fps and 120 fps, and a dropped frame is simply a larger step.
// After a step change, the output covers 63% of the distance every `tau` seconds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Blend factor for one step of `dt` seconds with time constant `tau` seconds.
/// `tau <= 0` means no smoothing (1.0); `dt <= 0` means no time has passed (0.0).
pub fn smoothing_alpha(dt: f64, tau: f64) -> f64 {
    if !(tau > 0.0) {
        return 1.0;
    }
    if !(dt > 0.0) {
        return 0.0;
    }
    1.0 - (-dt / tau).exp()
}

/// Fixed-factor exponential blend of `value` into `previous`.
pub fn exp_smooth(value: f64, previous: f64, alpha: f64) -> f64 {
    value * alpha + previous * (1.0 - alpha)
}

/// Time constant configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Time constant in seconds. Zero disables smoothing.
    pub tau_secs: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { tau_secs: 2.0 / 60.0 }
    }
}

/// Per-session smoothing state for the two gaze components.
#[derive(Debug, Clone, Default)]
pub struct GazeSmoother {
    tau: f64,
    state: Option<[f64; 2]>,
}

impl GazeSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        Self { tau: config.tau_secs, state: None }
    }

    /// Feeds one raw estimate taken `dt` after the previous one. The first call
    /// passes the raw value through and seeds the state.
    pub fn update(&mut self, raw: [f64; 2], dt: Duration) -> [f64; 2] {
        let next = match self.state {
            None => raw,
            Some(previous) => {
                let alpha = smoothing_alpha(dt.as_secs_f64(), self.tau);
                [
                    exp_smooth(raw[0], previous[0], alpha),
                    exp_smooth(raw[1], previous[1], alpha),
                ]
            }
        };
        self.state = Some(next);
        next
    }

    /// The last smoothed estimate, if any frame has been seen.
    pub fn current(&self) -> Option<[f64; 2]> {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}
