// A short, fixed-capacity history of smoothed gaze points, newest last. Nothing
// in the engine reads it back: it is there for overlays drawn by the caller,
// such as a fading trail behind the current gaze, and is off unless the
// session asks for a nonzero length. The oldest point is evicted once the
// buffer is full, so memory never grows with session length.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct GazeTrail {
    capacity: usize,
    points: VecDeque<[f64; 2]>,
}

impl GazeTrail {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, gaze: [f64; 2]) {
        if self.capacity == 0 {
            return;
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(gaze);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Points from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &[f64; 2]> {
        self.points.iter()
    }

    /// Drawing intensity for the point at `index` (0 is oldest): 255 for the
    /// newest point, dropping by `255 / capacity` per step of age.
    pub fn fade(&self, index: usize) -> u8 {
        if index >= self.points.len() {
            return 0;
        }
        let age = self.points.len() - 1 - index;
        let per_step = 255.0 / self.capacity as f64;
        (255.0 - age as f64 * per_step).clamp(0.0, 255.0) as u8
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
