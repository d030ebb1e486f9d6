// THEORY:
// The `GazeMapper` is the read side of calibration. It owns the session's
// `CalibrationSurface` and turns a pupil position into a normalized gaze vector
// with one table lookup per axis. Positions are truncated toward zero to pick
// the cell, then each component is saturated into [-1, 1] so that nothing
// outside the nominal range ever reaches the smoother.

use crate::core_modules::calibration::CalibrationSurface;

/// Limits a value to `[low, high]`. NaN becomes zero (clamped into the range).
pub fn saturate(value: f64, low: f64, high: f64) -> f64 {
    if value.is_nan() {
        return 0.0_f64.clamp(low, high);
    }
    value.clamp(low, high)
}

#[derive(Debug, Clone)]
pub struct GazeMapper {
    surface: CalibrationSurface,
}

impl GazeMapper {
    pub fn new(surface: CalibrationSurface) -> Self {
        Self { surface }
    }

    pub fn surface(&self) -> &CalibrationSurface {
        &self.surface
    }

    /// The grid cell for a sub-pixel position. Out-of-surface positions are a
    /// caller bug; they are clamped onto the edge of the surface.
    pub fn cell(&self, position: [f64; 2]) -> (u32, u32) {
        let (width, height) = (self.surface.width(), self.surface.height());
        let x = position[0].trunc();
        let y = position[1].trunc();
        let in_range = x >= 0.0 && y >= 0.0 && x < width as f64 && y < height as f64;
        if !in_range {
            tracing::warn!(x = position[0], y = position[1], width, height, "pupil position outside the calibration surface");
        }
        // `as u32` saturates and maps NaN to 0.
        let cx = (x.max(0.0) as u32).min(width.saturating_sub(1));
        let cy = (y.max(0.0) as u32).min(height.saturating_sub(1));
        (cx, cy)
    }

    /// Raw lookup without saturation.
    pub fn lookup(&self, position: [f64; 2]) -> [f64; 2] {
        let (x, y) = self.cell(position);
        self.surface.at(x, y)
    }

    /// Calibrated gaze for a pupil position, each component in [-1, 1].
    pub fn map(&self, position: [f64; 2]) -> [f64; 2] {
        let [gx, gy] = self.lookup(position);
        [saturate(gx, -1.0, 1.0), saturate(gy, -1.0, 1.0)]
    }
}
