// THEORY:
// Calibration turns five sparse observations ("when the user looked at the center
// target the pupil was at pixel (212.4, 160.9)", and so on for up, down, left and
// right) into a dense lookup surface that answers "what gaze does a pupil at pixel
// (x, y) mean" for every pixel of the region of interest.
//
// The surface is built in two independent steps:
// 1.  **Interpolate with holes**: the pupil positions are Delaunay-triangulated
//     and each grid pixel inside a triangle gets the barycentric blend of the
//     three corner targets. This is exact at the sample pixels. Pixels outside
//     the convex hull of the samples are left as NaN.
// 2.  **Fill holes**: every NaN pixel takes the value of the nearest defined
//     pixel (Euclidean, in grid coordinates). Five samples usually cover a small
//     diamond in the middle of the eye image, so most of the grid comes from this
//     step. Afterwards the grid has no NaN left.
//
// Keeping the steps apart lets "exact at samples" and "total coverage" be
// checked on their own. The finished surface is immutable; recalibrating means
// building a new one.

use crate::core_modules::triangulation::{self, doubled_signed_area};
use crate::error::CalibrationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five fixation targets shown during calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationTarget {
    Center,
    Up,
    Down,
    Left,
    Right,
}

impl CalibrationTarget {
    /// Canonical order: center first, as the anchor of the calibration overlay.
    pub const ALL: [CalibrationTarget; 5] = [
        CalibrationTarget::Center,
        CalibrationTarget::Up,
        CalibrationTarget::Down,
        CalibrationTarget::Left,
        CalibrationTarget::Right,
    ];

    /// The normalized gaze the user is asked to hold for this target.
    pub fn gaze(self) -> [f64; 2] {
        match self {
            CalibrationTarget::Center => [0.0, 0.0],
            CalibrationTarget::Up => [0.0, 1.0],
            CalibrationTarget::Down => [0.0, -1.0],
            CalibrationTarget::Left => [-1.0, 0.0],
            CalibrationTarget::Right => [1.0, 0.0],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationTarget::Center => "center",
            CalibrationTarget::Up => "up",
            CalibrationTarget::Down => "down",
            CalibrationTarget::Left => "left",
            CalibrationTarget::Right => "right",
        }
    }
}

impl fmt::Display for CalibrationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observed pupil position paired with the gaze it stands for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSample {
    /// Pupil position in cropped-frame pixel coordinates.
    pub position: [f64; 2],
    /// Target gaze, each component nominally in [-1, 1].
    pub gaze: [f64; 2],
}

impl CalibrationSample {
    pub fn new(position: [f64; 2], gaze: [f64; 2]) -> Self {
        Self { position, gaze }
    }
}

/// Exactly one sample per [`CalibrationTarget`].
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSet {
    /// Indexed like [`CalibrationTarget::ALL`].
    positions: [[f64; 2]; 5],
}

impl CalibrationSet {
    /// Builds the set from observed `(target, pupil position)` pairs in any order.
    pub fn from_observations(
        observations: impl IntoIterator<Item = (CalibrationTarget, [f64; 2])>,
    ) -> Result<Self, CalibrationError> {
        let mut slots: [Option<[f64; 2]>; 5] = [None; 5];
        for (target, position) in observations {
            let slot = &mut slots[Self::slot(target)];
            if slot.is_some() {
                return Err(CalibrationError::DuplicateTarget(target));
            }
            *slot = Some(position);
        }

        let mut positions = [[0.0; 2]; 5];
        for (target, slot) in CalibrationTarget::ALL.into_iter().zip(slots) {
            positions[Self::slot(target)] = slot.ok_or(CalibrationError::MissingTarget(target))?;
        }
        Ok(Self { positions })
    }

    fn slot(target: CalibrationTarget) -> usize {
        CalibrationTarget::ALL
            .iter()
            .position(|&t| t == target)
            .unwrap_or_default()
    }

    pub fn position(&self, target: CalibrationTarget) -> [f64; 2] {
        self.positions[Self::slot(target)]
    }

    /// The center sample's pupil position, used as the overlay anchor.
    pub fn anchor(&self) -> [f64; 2] {
        self.position(CalibrationTarget::Center)
    }

    /// Samples in canonical target order.
    pub fn samples(&self) -> Vec<CalibrationSample> {
        CalibrationTarget::ALL
            .iter()
            .map(|&t| CalibrationSample::new(self.position(t), t.gaze()))
            .collect()
    }
}

/// A dense row-major grid of gaze values, one per ROI pixel. NaN marks a cell
/// with no value yet.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupGrid {
    width: u32,
    height: u32,
    values: Vec<f64>,
}

impl LookupGrid {
    /// A grid of the given size with every cell undefined.
    pub fn undefined(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![f64::NAN; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Value at integer cell `(x, y)`. Panics when out of range, like slice
    /// indexing; callers clamp first.
    pub fn get(&self, x: u32, y: u32) -> f64 {
        self.values[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: f64) {
        let index = self.index(x, y);
        self.values[index] = value;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn undefined_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.undefined_count() == 0
    }
}

/// Step 1: piecewise-linear interpolation of one gaze component over the
/// Delaunay triangulation of the sample positions. Cells outside the hull stay
/// NaN. `samples` must have passed [`validate_samples`].
pub fn interpolate_with_holes(
    samples: &[CalibrationSample],
    component: usize,
    width: u32,
    height: u32,
) -> LookupGrid {
    let mut grid = LookupGrid::undefined(width, height);
    if width == 0 || height == 0 {
        return grid;
    }

    let points: Vec<[f64; 2]> = samples.iter().map(|s| s.position).collect();
    // Points on a shared edge pass the test for both triangles; allow a sliver of
    // slack so edge pixels are never lost to rounding.
    const INSIDE_EPSILON: f64 = -1e-9;

    for t in triangulation::triangulate(&points) {
        let [a, b, c] = [points[t[0]], points[t[1]], points[t[2]]];
        let det = (b[1] - c[1]) * (a[0] - c[0]) + (c[0] - b[0]) * (a[1] - c[1]);
        if det.abs() < f64::EPSILON {
            continue;
        }
        let values = [
            samples[t[0]].gaze[component],
            samples[t[1]].gaze[component],
            samples[t[2]].gaze[component],
        ];

        // Only visit the triangle's bounding box, clipped to the grid.
        let x_lo = a[0].min(b[0]).min(c[0]).floor().max(0.0);
        let x_hi = a[0].max(b[0]).max(c[0]).ceil().min((width - 1) as f64);
        let y_lo = a[1].min(b[1]).min(c[1]).floor().max(0.0);
        let y_hi = a[1].max(b[1]).max(c[1]).ceil().min((height - 1) as f64);
        if x_lo > x_hi || y_lo > y_hi {
            continue;
        }

        for y in (y_lo as u32)..=(y_hi as u32) {
            for x in (x_lo as u32)..=(x_hi as u32) {
                if !grid.get(x, y).is_nan() {
                    continue;
                }
                let (px, py) = (x as f64, y as f64);
                let l1 = ((b[1] - c[1]) * (px - c[0]) + (c[0] - b[0]) * (py - c[1])) / det;
                let l2 = ((c[1] - a[1]) * (px - c[0]) + (a[0] - c[0]) * (py - c[1])) / det;
                let l3 = 1.0 - l1 - l2;
                if l1 >= INSIDE_EPSILON && l2 >= INSIDE_EPSILON && l3 >= INSIDE_EPSILON {
                    grid.set(x, y, l1 * values[0] + l2 * values[1] + l3 * values[2]);
                }
            }
        }
    }

    grid
}

/// Step 2: nearest-neighbor extrapolation. Every NaN cell takes the value of the
/// closest defined cell by Euclidean distance in grid coordinates; ties resolve
/// arbitrarily. Fails only when the grid has no defined cell at all.
///
/// Exact nearest neighbors come from a separable squared-distance transform that
/// also records which cell each minimum came from: a column pass finds the
/// nearest defined row per column, then a row pass takes the lower envelope of
/// the resulting parabolas.
pub fn fill_holes(grid: &mut LookupGrid) -> Result<(), CalibrationError> {
    let (width, height) = (grid.width as usize, grid.height as usize);
    if grid.values.iter().all(|v| v.is_nan()) {
        return Err(CalibrationError::UncoveredSurface {
            width: grid.width,
            height: grid.height,
        });
    }

    // --- 1. Column pass: nearest defined row in each column ---
    // `column_dist[y * width + x]` is the squared vertical distance, `column_site`
    // the row it came from.
    let mut column_dist = vec![f64::INFINITY; width * height];
    let mut column_site = vec![usize::MAX; width * height];
    for x in 0..width {
        let mut last: Option<usize> = None;
        for y in 0..height {
            if !grid.values[y * width + x].is_nan() {
                last = Some(y);
            }
            if let Some(site) = last {
                column_dist[y * width + x] = ((y - site) as f64).powi(2);
                column_site[y * width + x] = site;
            }
        }
        last = None;
        for y in (0..height).rev() {
            if !grid.values[y * width + x].is_nan() {
                last = Some(y);
            }
            if let Some(site) = last {
                let dist = ((site - y) as f64).powi(2);
                if dist < column_dist[y * width + x] {
                    column_dist[y * width + x] = dist;
                    column_site[y * width + x] = site;
                }
            }
        }
    }

    // --- 2. Row pass: lower envelope of parabolas (x - q)^2 + f(q) ---
    let mut filled = grid.values.clone();
    let mut envelope: Vec<usize> = Vec::with_capacity(width);
    let mut boundaries: Vec<f64> = Vec::with_capacity(width + 1);
    for y in 0..height {
        let row = &column_dist[y * width..(y + 1) * width];
        envelope.clear();
        boundaries.clear();
        boundaries.push(f64::NEG_INFINITY);

        for q in (0..width).filter(|&q| row[q].is_finite()) {
            let mut s = f64::NEG_INFINITY;
            while let Some(&v) = envelope.last() {
                s = ((row[q] + (q * q) as f64) - (row[v] + (v * v) as f64)) / (2.0 * (q - v) as f64);
                if s <= boundaries[boundaries.len() - 1] && envelope.len() > 1 {
                    envelope.pop();
                    boundaries.pop();
                } else {
                    break;
                }
            }
            if envelope.is_empty() {
                envelope.push(q);
            } else {
                envelope.push(q);
                boundaries.push(s);
            }
        }
        // Every row has a finite entry because some column holds a defined cell.
        if envelope.is_empty() {
            continue;
        }

        let mut k = 0;
        for x in 0..width {
            while k + 1 < envelope.len() && boundaries[k + 1] < x as f64 {
                k += 1;
            }
            let index = y * width + x;
            if grid.values[index].is_nan() {
                let site_x = envelope[k];
                let site_y = column_site[y * width + site_x];
                filled[index] = grid.values[site_y * width + site_x];
            }
        }
    }

    grid.values = filled;
    Ok(())
}

/// Rejects sample sets that cannot support a linear interpolant.
pub fn validate_samples(samples: &[CalibrationSample]) -> Result<(), CalibrationError> {
    if samples.len() < 3 {
        return Err(CalibrationError::InsufficientSamples(samples.len()));
    }
    for (index, s) in samples.iter().enumerate() {
        if !(s.position.iter().chain(s.gaze.iter()).all(|v| v.is_finite())) {
            return Err(CalibrationError::NonFiniteSample { index });
        }
    }
    for (i, a) in samples.iter().enumerate() {
        for (j, b) in samples.iter().enumerate().skip(i + 1) {
            let dist_sq = (a.position[0] - b.position[0]).powi(2) + (a.position[1] - b.position[1]).powi(2);
            if dist_sq < 1e-12 {
                return Err(CalibrationError::CoincidentSamples { first: i, second: j });
            }
        }
    }

    // Collinear when no triple spans a triangle of meaningful area relative to
    // the point spread.
    let mut extent_sq: f64 = 0.0;
    let mut max_area: f64 = 0.0;
    for (i, a) in samples.iter().enumerate() {
        for (j, b) in samples.iter().enumerate().skip(i + 1) {
            extent_sq = extent_sq
                .max((a.position[0] - b.position[0]).powi(2) + (a.position[1] - b.position[1]).powi(2));
            for c in samples.iter().skip(j + 1) {
                max_area = max_area.max(doubled_signed_area(a.position, b.position, c.position).abs());
            }
        }
    }
    if max_area <= 1e-9 * extent_sq {
        return Err(CalibrationError::CollinearSamples);
    }
    Ok(())
}

/// The two dense gaze grids for one calibration. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSurface {
    gaze_x: LookupGrid,
    gaze_y: LookupGrid,
}

impl CalibrationSurface {
    /// Builds both grids for a `width` x `height` region from at least three
    /// non-collinear samples.
    pub fn build(samples: &[CalibrationSample], width: u32, height: u32) -> Result<Self, CalibrationError> {
        validate_samples(samples)?;

        let mut gaze_x = interpolate_with_holes(samples, 0, width, height);
        let mut gaze_y = interpolate_with_holes(samples, 1, width, height);
        tracing::debug!(
            width,
            height,
            extrapolated = gaze_x.undefined_count(),
            "interpolated calibration surface"
        );
        fill_holes(&mut gaze_x)?;
        fill_holes(&mut gaze_y)?;

        Ok(Self { gaze_x, gaze_y })
    }

    pub fn width(&self) -> u32 {
        self.gaze_x.width()
    }

    pub fn height(&self) -> u32 {
        self.gaze_x.height()
    }

    pub fn gaze_x(&self) -> &LookupGrid {
        &self.gaze_x
    }

    pub fn gaze_y(&self) -> &LookupGrid {
        &self.gaze_y
    }

    /// Unsaturated gaze at integer cell `(x, y)`.
    pub fn at(&self, x: u32, y: u32) -> [f64; 2] {
        [self.gaze_x.get(x, y), self.gaze_y.get(x, y)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(center: [f64; 2], offset: f64) -> Vec<CalibrationSample> {
        let set = CalibrationSet::from_observations([
            (CalibrationTarget::Center, center),
            (CalibrationTarget::Up, [center[0], center[1] - offset]),
            (CalibrationTarget::Down, [center[0], center[1] + offset]),
            (CalibrationTarget::Left, [center[0] - offset, center[1]]),
            (CalibrationTarget::Right, [center[0] + offset, center[1]]),
        ])
        .expect("complete set");
        set.samples()
    }

    #[test]
    fn surface_is_exact_at_samples() {
        let samples = canonical([200.0, 150.0], 100.0);
        let surface = CalibrationSurface::build(&samples, 400, 300).unwrap();
        for s in &samples {
            let cell = surface.at(s.position[0] as u32, s.position[1] as u32);
            assert!((cell[0] - s.gaze[0]).abs() < 1e-12, "{cell:?} vs {:?}", s.gaze);
            assert!((cell[1] - s.gaze[1]).abs() < 1e-12, "{cell:?} vs {:?}", s.gaze);
        }
    }

    #[test]
    fn interpolation_leaves_holes_outside_the_hull() {
        let samples = canonical([200.0, 150.0], 100.0);
        let grid = interpolate_with_holes(&samples, 0, 400, 300);
        assert!(grid.get(0, 0).is_nan());
        assert!(grid.get(399, 299).is_nan());
        assert!(!grid.get(150, 150).is_nan());
        // Halfway from center to left is halfway to -1.
        assert!((grid.get(150, 150) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn filled_surface_has_no_holes() {
        let samples = canonical([200.0, 150.0], 100.0);
        let surface = CalibrationSurface::build(&samples, 400, 300).unwrap();
        assert!(surface.gaze_x().is_complete());
        assert!(surface.gaze_y().is_complete());
        // The far corner takes its value from the nearest hull edge.
        assert!(surface.at(0, 0)[0] < 0.0);
        assert!(surface.at(399, 0)[0] > 0.0);
    }

    #[test]
    fn hull_larger_than_grid_needs_no_fill() {
        let samples = canonical([200.0, 150.0], 300.0);
        let surface = CalibrationSurface::build(&samples, 400, 300).unwrap();
        assert_eq!(surface.at(200, 150), [0.0, 0.0]);
        assert!(surface.gaze_x().is_complete());
    }

    #[test]
    fn fill_matches_brute_force_nearest() {
        // Sparse, irregular defined cells.
        let mut grid = LookupGrid::undefined(13, 9);
        let defined = [(0, 0, 1.0), (12, 8, 2.0), (6, 4, 3.0), (2, 7, 4.0), (11, 1, 5.0)];
        for &(x, y, v) in &defined {
            grid.set(x, y, v);
        }
        let original = grid.clone();
        fill_holes(&mut grid).unwrap();

        for y in 0..9u32 {
            for x in 0..13u32 {
                let best = defined
                    .iter()
                    .map(|&(dx, dy, _)| (dx as i64 - x as i64).pow(2) + (dy as i64 - y as i64).pow(2))
                    .min()
                    .unwrap();
                let allowed: Vec<f64> = defined
                    .iter()
                    .filter(|&&(dx, dy, _)| (dx as i64 - x as i64).pow(2) + (dy as i64 - y as i64).pow(2) == best)
                    .map(|&(_, _, v)| v)
                    .collect();
                assert!(allowed.contains(&grid.get(x, y)), "cell ({x}, {y})");
                if !original.get(x, y).is_nan() {
                    assert_eq!(original.get(x, y), grid.get(x, y));
                }
            }
        }
    }

    #[test]
    fn fill_fails_on_an_empty_grid() {
        let mut grid = LookupGrid::undefined(4, 4);
        assert!(matches!(fill_holes(&mut grid), Err(CalibrationError::UncoveredSurface { .. })));
    }

    #[test]
    fn degenerate_sample_sets_are_rejected() {
        let two = [CalibrationSample::new([0.0, 0.0], [0.0, 0.0]), CalibrationSample::new([5.0, 0.0], [1.0, 0.0])];
        assert_eq!(validate_samples(&two), Err(CalibrationError::InsufficientSamples(2)));

        let collinear: Vec<_> = (0..5)
            .map(|i| CalibrationSample::new([i as f64 * 10.0, i as f64 * 5.0], [0.0, 0.0]))
            .collect();
        assert_eq!(validate_samples(&collinear), Err(CalibrationError::CollinearSamples));

        let mut coincident = canonical([50.0, 50.0], 20.0);
        coincident[3].position = coincident[0].position;
        assert!(matches!(
            validate_samples(&coincident),
            Err(CalibrationError::CoincidentSamples { first: 0, second: 3 })
        ));

        let mut nan = canonical([50.0, 50.0], 20.0);
        nan[1].gaze[0] = f64::NAN;
        assert_eq!(validate_samples(&nan), Err(CalibrationError::NonFiniteSample { index: 1 }));
    }

    #[test]
    fn hull_outside_the_grid_is_uncovered() {
        let samples = canonical([1000.0, 1000.0], 10.0);
        assert!(matches!(
            CalibrationSurface::build(&samples, 40, 30),
            Err(CalibrationError::UncoveredSurface { .. })
        ));
    }

    #[test]
    fn calibration_set_requires_every_target_once() {
        let missing = CalibrationSet::from_observations([(CalibrationTarget::Center, [0.0, 0.0])]);
        assert_eq!(missing, Err(CalibrationError::MissingTarget(CalibrationTarget::Up)));

        let duplicate = CalibrationSet::from_observations([
            (CalibrationTarget::Left, [0.0, 0.0]),
            (CalibrationTarget::Left, [1.0, 0.0]),
        ]);
        assert_eq!(duplicate, Err(CalibrationError::DuplicateTarget(CalibrationTarget::Left)));
    }

    #[test]
    fn anchor_is_the_center_sample() {
        let set = CalibrationSet::from_observations([
            (CalibrationTarget::Right, [30.0, 10.0]),
            (CalibrationTarget::Center, [20.0, 10.0]),
            (CalibrationTarget::Left, [10.0, 10.0]),
            (CalibrationTarget::Down, [20.0, 20.0]),
            (CalibrationTarget::Up, [20.0, 0.0]),
        ])
        .unwrap();
        assert_eq!(set.anchor(), [20.0, 10.0]);
        assert_eq!(set.samples()[0].gaze, [0.0, 0.0]);
    }
}
