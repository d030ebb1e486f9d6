// THEORY:
// The `frame` module is the first stage of the per-frame pipeline. It turns a raw
// camera frame into the binary image every later stage works on.
//
// Key architectural principles:
// 1.  **Region of Interest**: An eye camera sees more than the eye. The session
//     fixes one rectangle of the frame, and everything downstream (blob positions,
//     the calibration surface) lives in the coordinate space of that rectangle.
// 2.  **Fixed Threshold**: The pupil is separated from the iris and sclera with a
//     single global threshold. Pixels at or above it become white (255), the rest
//     become black (0). The calibration absorbs most of the per-user variation.
// 3.  **Stateless Utility**: Nothing here remembers anything between frames.

use crate::error::ConfigError;
use image::{DynamicImage, GrayImage, Luma};
use serde::{Deserialize, Serialize};

/// The maximum intensity of a binarized pixel.
pub const WHITE: u8 = 255;
/// The minimum intensity of a binarized pixel.
pub const BLACK: u8 = 0;

/// An axis-aligned rectangle in frame pixel coordinates. `x` is the column of the
/// top-left corner, `y` its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RegionOfInterest {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// A region covering a whole `width` x `height` frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Number of pixels inside the region.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Rejects regions that are empty. Frame bounds are checked separately by
    /// [`RegionOfInterest::validate`] since the frame size is only known once the
    /// source is open.
    pub fn check_non_empty(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::EmptyRoi {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Checks that the region is non-empty and lies entirely inside a frame of
    /// the given dimensions.
    pub fn validate(&self, frame_width: u32, frame_height: u32) -> Result<(), ConfigError> {
        self.check_non_empty()?;

        // u64 so that x + width cannot wrap.
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        if right > frame_width as u64 || bottom > frame_height as u64 {
            return Err(ConfigError::RoiOutOfBounds {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                frame_width,
                frame_height,
            });
        }
        Ok(())
    }
}

/// Crops `frame` to `roi`, converts it to a single channel and binarizes it
/// with [`binarize`]. The result has exactly the region's dimensions.
pub fn preprocess(
    frame: &DynamicImage,
    roi: &RegionOfInterest,
    threshold: u8,
) -> Result<GrayImage, ConfigError> {
    roi.validate(frame.width(), frame.height())?;

    // Crop first so the color conversion only touches the region.
    let cropped = frame.crop_imm(roi.x, roi.y, roi.width, roi.height).to_luma8();
    Ok(binarize(&cropped, threshold))
}

/// Fixed-threshold binarization: `pixel >= threshold` becomes [`WHITE`], anything
/// else [`BLACK`].
pub fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    let mut binary = GrayImage::new(gray.width(), gray.height());
    for (src, dst) in gray.pixels().zip(binary.pixels_mut()) {
        *dst = if src[0] >= threshold { Luma([WHITE]) } else { Luma([BLACK]) };
    }
    binary
}

/// Fraction (0..=1) of pixels whose intensity is at or below `black_level`.
/// An empty image has no black pixels.
pub fn black_proportion(image: &GrayImage, black_level: u8) -> f64 {
    let total = image.width() as usize * image.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let black = image.pixels().filter(|p| p[0] <= black_level).count();
    black as f64 / total as f64
}
