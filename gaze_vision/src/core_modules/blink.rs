// THEORY:
// Blink and pupil-loss detection. When the eye closes (or the pupil leaves the
// camera's view) the thresholded frame loses its dark pupil region, so the
// proportion of black pixels collapses toward zero.
//
// A single frame's proportion is noisy, so it is not thresholded directly.
// Instead each frame nudges a saturating accumulator up (almost no black) or
// down (pupil visible) by a fixed step, and the blink state is a plain threshold
// on that accumulator. The accumulator's inertia is the hysteresis: a few
// consecutive frames are needed to enter the blink state and a few to leave it,
// with no separate exit threshold.
//
// Downstream consumers want discrete events rather than a level, so every
// update also reports whether the state flipped on this frame.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// A frame whose black proportion is below this counts toward blinking.
    pub low_threshold: f64,
    /// Accumulator change per frame.
    pub step: f64,
    /// Blinking while the accumulator is strictly above this.
    pub high_threshold: f64,
    pub accumulator_min: f64,
    pub accumulator_max: f64,
    /// Pixels at or below this intensity count as black.
    pub black_level: u8,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            low_threshold: 0.005,
            step: 0.2,
            high_threshold: 0.3,
            accumulator_min: -1.0,
            accumulator_max: 1.0,
            black_level: 127,
        }
    }
}

impl BlinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "blink.step",
                reason: format!("must be a positive number, got {}", self.step),
            });
        }
        if !(self.accumulator_min.is_finite()
            && self.accumulator_max.is_finite()
            && self.accumulator_min < self.accumulator_max)
        {
            return Err(ConfigError::InvalidParameter {
                name: "blink.accumulator_min",
                reason: format!(
                    "must be below accumulator_max, got [{}, {}]",
                    self.accumulator_min, self.accumulator_max
                ),
            });
        }
        if !self.low_threshold.is_finite() || !self.high_threshold.is_finite() {
            return Err(ConfigError::InvalidParameter {
                name: "blink.high_threshold",
                reason: "thresholds must be finite".to_string(),
            });
        }
        Ok(())
    }
}

/// One-shot signals for the frame that was just processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlinkTransition {
    /// The state went from not blinking to blinking on this frame.
    pub started: bool,
    /// The state went from blinking to not blinking on this frame.
    pub ended: bool,
}

impl BlinkTransition {
    /// The new blink level when the state flipped, `None` otherwise.
    pub fn event(&self) -> Option<bool> {
        match (self.started, self.ended) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlinkState {
    config: BlinkConfig,
    accumulator: f64,
    is_blinking: bool,
    was_blinking: bool,
}

impl BlinkState {
    pub fn new(config: BlinkConfig) -> Self {
        let mut state = Self {
            config,
            accumulator: 0.0,
            is_blinking: false,
            was_blinking: false,
        };
        state.reset();
        state
    }

    pub fn config(&self) -> &BlinkConfig {
        &self.config
    }

    /// Folds in one frame's black-pixel proportion and reports transitions.
    pub fn update(&mut self, black_proportion: f64) -> BlinkTransition {
        let delta = if black_proportion < self.config.low_threshold {
            self.config.step
        } else {
            -self.config.step
        };
        self.accumulator = (self.accumulator + delta)
            .clamp(self.config.accumulator_min, self.config.accumulator_max);

        self.was_blinking = self.is_blinking;
        self.is_blinking = self.accumulator > self.config.high_threshold;

        BlinkTransition {
            started: self.is_blinking && !self.was_blinking,
            ended: !self.is_blinking && self.was_blinking,
        }
    }

    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    pub fn is_blinking(&self) -> bool {
        self.is_blinking
    }

    pub fn was_blinking(&self) -> bool {
        self.was_blinking
    }

    /// Back to the session-start state: accumulator at zero (or the nearest
    /// value inside its range), not blinking.
    pub fn reset(&mut self) {
        self.accumulator = 0.0_f64.clamp(self.config.accumulator_min, self.config.accumulator_max);
        self.is_blinking = false;
        self.was_blinking = false;
    }
}
