// THEORY:
// The `BlobLocator` is the spatial stage of the pipeline. It finds the pupil in a
// binarized eye image.
//
// Algorithm:
// 1.  **Region Growing**: Every foreground pixel (black for a dark pupil, white for
//     a bright one) that has not been visited seeds a new region, which is grown
//     with a depth-first flood over its 8 neighbors. One region per connected
//     component.
// 2.  **Measurement**: Each region is turned into a `BlobCandidate` with its
//     centroid, equivalent diameter and shape measures.
// 3.  **Filtering**: The configured area / circularity / inertia / convexity gates
//     drop regions that do not look like a pupil. The gates and their defaults
//     mirror OpenCV's SimpleBlobDetector (lower bound inclusive, upper exclusive).
// 4.  **Selection**: The surviving candidate with the largest size is the pupil.
//     Ties keep the first one found in raster order. No survivors means no
//     detection; the locator never invents a position.
//
// Like the frame module, the locator is stateless between frames.

use crate::core_modules::blob::{BlobCandidate, Point};
use crate::core_modules::frame::{BLACK, WHITE};
use crate::error::ConfigError;
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Which binary value counts as blob foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobPolarity {
    /// Black regions on white (an IR-lit pupil after thresholding).
    #[default]
    Dark,
    /// White regions on black.
    Bright,
}

impl BlobPolarity {
    fn foreground(self) -> u8 {
        match self {
            BlobPolarity::Dark => BLACK,
            BlobPolarity::Bright => WHITE,
        }
    }
}

/// Detection filters. Each gate only applies when its `filter_by_*` toggle is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub polarity: BlobPolarity,

    pub filter_by_area: bool,
    /// Minimum pixel count (inclusive).
    pub min_area: usize,
    /// Maximum pixel count (exclusive).
    pub max_area: usize,

    pub filter_by_circularity: bool,
    pub min_circularity: f64,
    pub max_circularity: f64,

    pub filter_by_inertia: bool,
    pub min_inertia_ratio: f64,
    pub max_inertia_ratio: f64,

    pub filter_by_convexity: bool,
    pub min_convexity: f64,
    pub max_convexity: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            polarity: BlobPolarity::Dark,
            filter_by_area: true,
            min_area: 25,
            max_area: 5000,
            filter_by_circularity: false,
            min_circularity: 0.8,
            max_circularity: f64::INFINITY,
            filter_by_inertia: true,
            min_inertia_ratio: 0.1,
            max_inertia_ratio: f64::INFINITY,
            filter_by_convexity: true,
            min_convexity: 0.95,
            max_convexity: f64::INFINITY,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter_by_area && self.min_area >= self.max_area {
            return Err(ConfigError::InvalidParameter {
                name: "detector.min_area",
                reason: format!("must be below max_area ({} >= {})", self.min_area, self.max_area),
            });
        }
        let ranges = [
            ("detector.min_circularity", self.min_circularity, self.max_circularity),
            ("detector.min_inertia_ratio", self.min_inertia_ratio, self.max_inertia_ratio),
            ("detector.min_convexity", self.min_convexity, self.max_convexity),
        ];
        for (name, min, max) in ranges {
            if !min.is_finite() || min < 0.0 || max.is_nan() || min >= max {
                return Err(ConfigError::InvalidParameter {
                    name,
                    reason: format!("expected a finite, non-negative lower bound below the upper bound, got [{min}, {max})"),
                });
            }
        }
        Ok(())
    }

    /// Whether a measured candidate passes every enabled gate.
    pub fn accepts(&self, blob: &BlobCandidate) -> bool {
        let within = |value: f64, min: f64, max: f64| value >= min && value < max;

        if self.filter_by_area && !(blob.area >= self.min_area && blob.area < self.max_area) {
            return false;
        }
        if self.filter_by_circularity
            && !within(blob.circularity, self.min_circularity, self.max_circularity)
        {
            return false;
        }
        if self.filter_by_inertia
            && !within(blob.inertia_ratio, self.min_inertia_ratio, self.max_inertia_ratio)
        {
            return false;
        }
        if self.filter_by_convexity
            && !within(blob.convexity, self.min_convexity, self.max_convexity)
        {
            return false;
        }
        true
    }
}

/// Finds pupil candidates in binarized frames.
#[derive(Debug, Clone)]
pub struct BlobLocator {
    config: DetectorConfig,
}

impl BlobLocator {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// All candidates that pass the configured filters, in raster order of their
    /// first pixel.
    pub fn detect(&self, binary: &GrayImage) -> Vec<BlobCandidate> {
        find_regions(binary, self.config.polarity.foreground())
            .into_iter()
            .filter(|blob| self.config.accepts(blob))
            .collect()
    }

    /// The dominant candidate, or `None` when nothing passes the filters.
    pub fn locate(&self, binary: &GrayImage) -> Option<BlobCandidate> {
        select_largest(self.detect(binary))
    }
}

/// Picks the candidate with the largest size. On ties the earliest one wins.
pub fn select_largest(candidates: Vec<BlobCandidate>) -> Option<BlobCandidate> {
    let mut best: Option<BlobCandidate> = None;
    for candidate in candidates {
        match &best {
            Some(current) if candidate.size <= current.size => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Labels every 8-connected region of `foreground` pixels and measures it.
fn find_regions(binary: &GrayImage, foreground: u8) -> Vec<BlobCandidate> {
    let (width, height) = binary.dimensions();
    let (w, h) = (width as i64, height as i64);
    let is_member = |x: i64, y: i64| {
        x >= 0 && y >= 0 && x < w && y < h && binary.get_pixel(x as u32, y as u32)[0] == foreground
    };

    let mut visited = vec![false; width as usize * height as usize];
    let mut regions = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let index = (y * width + x) as usize;
            if visited[index] || binary.get_pixel(x, y)[0] != foreground {
                continue;
            }

            // --- Grow the region from its first raster pixel ---
            let mut pixels = Vec::new();
            let mut stack = vec![Point { x, y }];
            visited[index] = true;

            while let Some(current) = stack.pop() {
                pixels.push(current);
                for dy in -1..=1i64 {
                    for dx in -1..=1i64 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = current.x as i64 + dx;
                        let ny = current.y as i64 + dy;
                        if !is_member(nx, ny) {
                            continue;
                        }
                        let n_index = (ny * w + nx) as usize;
                        if !visited[n_index] {
                            visited[n_index] = true;
                            stack.push(Point { x: nx as u32, y: ny as u32 });
                        }
                    }
                }
            }

            regions.push(BlobCandidate::from_region(&pixels, is_member));
        }
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn draw_disc(image: &mut GrayImage, cx: i64, cy: i64, radius: i64, value: u8) {
        for y in (cy - radius)..=(cy + radius) {
            for x in (cx - radius)..=(cx + radius) {
                if (x - cx).pow(2) + (y - cy).pow(2) <= radius * radius {
                    image.put_pixel(x as u32, y as u32, Luma([value]));
                }
            }
        }
    }

    fn bright_config() -> DetectorConfig {
        DetectorConfig { polarity: BlobPolarity::Bright, ..DetectorConfig::default() }
    }

    #[test]
    fn locates_a_dark_pupil_on_white() {
        let mut image = GrayImage::from_pixel(120, 90, Luma([WHITE]));
        draw_disc(&mut image, 60, 45, 15, BLACK);
        let blob = BlobLocator::new(DetectorConfig::default()).locate(&image).expect("pupil");
        assert!((blob.x - 60.0).abs() < 1e-9);
        assert!((blob.y - 45.0).abs() < 1e-9);
    }

    #[test]
    fn picks_the_largest_candidate() {
        let mut image = GrayImage::new(200, 100);
        draw_disc(&mut image, 40, 50, 16, WHITE);
        draw_disc(&mut image, 140, 50, 22, WHITE);
        let locator = BlobLocator::new(bright_config());
        assert_eq!(locator.detect(&image).len(), 2);
        let blob = locator.locate(&image).unwrap();
        assert!((blob.x - 140.0).abs() < 1e-9);
    }

    #[test]
    fn ties_keep_the_first_candidate() {
        let mut image = GrayImage::new(200, 100);
        draw_disc(&mut image, 140, 50, 16, WHITE);
        draw_disc(&mut image, 40, 50, 16, WHITE);
        let blob = BlobLocator::new(bright_config()).locate(&image).unwrap();
        assert!((blob.x - 40.0).abs() < 1e-9);
    }

    #[test]
    fn empty_frame_is_no_detection() {
        let image = GrayImage::new(64, 64);
        assert!(BlobLocator::new(bright_config()).locate(&image).is_none());
    }

    #[test]
    fn area_filter_rejects_specks() {
        let mut image = GrayImage::new(64, 64);
        draw_disc(&mut image, 20, 20, 2, WHITE);
        assert!(BlobLocator::new(bright_config()).locate(&image).is_none());

        let lenient = DetectorConfig { filter_by_area: false, filter_by_convexity: false, ..bright_config() };
        assert!(BlobLocator::new(lenient).locate(&image).is_some());
    }

    #[test]
    fn inertia_filter_rejects_lines() {
        let mut image = GrayImage::new(100, 20);
        for x in 10..90 {
            image.put_pixel(x, 10, Luma([WHITE]));
        }
        let config = DetectorConfig { filter_by_convexity: false, ..bright_config() };
        assert!(BlobLocator::new(config).locate(&image).is_none());
    }

    #[test]
    fn diagonal_neighbors_join_one_region() {
        let mut image = GrayImage::new(10, 10);
        for i in 0..6 {
            image.put_pixel(i, i, Luma([WHITE]));
        }
        let config = DetectorConfig {
            filter_by_area: false,
            filter_by_inertia: false,
            filter_by_convexity: false,
            ..bright_config()
        };
        assert_eq!(BlobLocator::new(config).detect(&image).len(), 1);
    }

    #[test]
    fn inverted_area_bounds_are_rejected() {
        let config = DetectorConfig { min_area: 100, max_area: 10, ..DetectorConfig::default() };
        assert!(config.validate().is_err());
        assert!(DetectorConfig::default().validate().is_ok());
    }
}
