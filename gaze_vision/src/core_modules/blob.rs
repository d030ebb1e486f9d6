// THEORY:
// A `BlobCandidate` is one connected region of the binarized eye image that could
// be the pupil. It is a "dumb" data container: a snapshot of one region in one
// frame, with no memory of where the pupil was before.
//
// Besides position and size, each candidate carries the three shape measures the
// locator filters on:
// - circularity: 4*pi*A / P^2 of the traced outer contour (1.0 for a perfect disc)
// - inertia ratio: minor over major eigenvalue of the second central moments
//   (1.0 for a disc, 0.0 for a line)
// - convexity: contour area over convex hull area (1.0 for convex shapes)
//
// The `shape` submodule holds the pure geometry used to measure a region:
// Moore-neighbor contour tracing, polygon area and the monotone-chain hull.

use std::f64::consts::PI;

/// A pixel coordinate inside the cropped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// A pupil candidate detected in a single binarized frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobCandidate {
    /// Sub-pixel centroid column, in cropped-frame coordinates.
    pub x: f64,
    /// Sub-pixel centroid row, in cropped-frame coordinates.
    pub y: f64,
    /// Equivalent diameter, `2 * sqrt(area / pi)`. This is the value the locator
    /// compares when picking the dominant candidate.
    pub size: f64,
    /// Number of pixels in the region.
    pub area: usize,
    /// Top-left and bottom-right corners of the region, inclusive.
    pub bounding_box: (Point, Point),
    pub circularity: f64,
    pub inertia_ratio: f64,
    pub convexity: f64,
}

impl BlobCandidate {
    /// Measures a connected region given as a list of its pixels. The first pixel
    /// must be the region's first pixel in raster order (top row, leftmost), which
    /// is where contour tracing starts.
    pub(crate) fn from_region(pixels: &[Point], is_member: impl Fn(i64, i64) -> bool) -> Self {
        let area = pixels.len();
        let n = area as f64;

        // --- 1. Raw and central moments ---
        let mut min = Point { x: u32::MAX, y: u32::MAX };
        let mut max = Point { x: 0, y: 0 };
        let (mut sum_x, mut sum_y) = (0.0, 0.0);
        for p in pixels {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            sum_x += p.x as f64;
            sum_y += p.y as f64;
        }
        let (cx, cy) = (sum_x / n, sum_y / n);

        let (mut mu20, mut mu02, mut mu11) = (0.0, 0.0, 0.0);
        for p in pixels {
            let dx = p.x as f64 - cx;
            let dy = p.y as f64 - cy;
            mu20 += dx * dx;
            mu02 += dy * dy;
            mu11 += dx * dy;
        }

        // --- 2. Contour-based measures ---
        let start = pixels[0];
        let contour = shape::trace_contour((start.x as i64, start.y as i64), &is_member);
        let perimeter = shape::closed_length(&contour);
        let contour_area = shape::polygon_area(&contour);
        let hull_area = shape::polygon_area(&shape::convex_hull(&contour));

        let circularity = if perimeter > 0.0 {
            4.0 * PI * contour_area / (perimeter * perimeter)
        } else {
            0.0
        };
        let convexity = if hull_area > 0.0 { contour_area / hull_area } else { 0.0 };

        Self {
            x: cx,
            y: cy,
            size: 2.0 * (n / PI).sqrt(),
            area,
            bounding_box: (min, max),
            circularity,
            inertia_ratio: inertia_ratio(mu20, mu02, mu11),
            convexity,
        }
    }
}

/// Ratio of the minor to the major principal second moment. Regions with no
/// measurable elongation (a single pixel, a disc) report 1.0.
fn inertia_ratio(mu20: f64, mu02: f64, mu11: f64) -> f64 {
    let denominator = ((mu20 - mu02).powi(2) + 4.0 * mu11 * mu11).sqrt();
    if denominator <= 1e-2 {
        return 1.0;
    }
    let i_min = 0.5 * (mu20 + mu02) - 0.5 * denominator;
    let i_max = 0.5 * (mu20 + mu02) + 0.5 * denominator;
    i_min / i_max
}

pub mod shape {
    /// Clockwise neighbor offsets in image coordinates (y grows downward),
    /// starting east.
    const NEIGHBORS: [(i64, i64); 8] = [
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
        (-1, -1),
        (0, -1),
        (1, -1),
    ];

    /// Moore-neighbor tracing of the outer boundary of the 8-connected region
    /// containing `start`. `start` must be the region's first pixel in raster
    /// order, so its west and northern neighbors are background.
    ///
    /// Returns the boundary pixels in traversal order, without repeating the start
    /// pixel at the end. Uses Jacob's stopping criterion: tracing ends when the
    /// start pixel is about to be left in the same direction as the first move.
    pub fn trace_contour(start: (i64, i64), is_member: impl Fn(i64, i64) -> bool) -> Vec<(i64, i64)> {
        let mut contour = vec![start];
        let mut current = start;
        // Scanning begins north-west of the start pixel.
        let mut search_from = 5;
        let mut first_move: Option<usize> = None;

        loop {
            let next = (0..8).map(|i| (search_from + i) % 8).find(|&d| {
                let (dx, dy) = NEIGHBORS[d];
                is_member(current.0 + dx, current.1 + dy)
            });
            let Some(direction) = next else {
                // Isolated pixel.
                return contour;
            };

            if current == start {
                match first_move {
                    Some(first) if first == direction => break,
                    None => first_move = Some(direction),
                    _ => {}
                }
            }

            let (dx, dy) = NEIGHBORS[direction];
            current = (current.0 + dx, current.1 + dy);
            contour.push(current);
            search_from = (direction + 6) % 8;
        }

        // The walk re-enters the start pixel before stopping.
        contour.pop();
        contour
    }

    /// Length of the closed polyline through `points`.
    pub fn closed_length(points: &[(i64, i64)]) -> f64 {
        if points.len() < 2 {
            return 0.0;
        }
        points
            .iter()
            .zip(points.iter().cycle().skip(1))
            .map(|(a, b)| {
                let dx = (b.0 - a.0) as f64;
                let dy = (b.1 - a.1) as f64;
                (dx * dx + dy * dy).sqrt()
            })
            .sum()
    }

    /// Unsigned shoelace area of the closed polygon through `points`.
    pub fn polygon_area(points: &[(i64, i64)]) -> f64 {
        if points.len() < 3 {
            return 0.0;
        }
        let twice: i64 = points
            .iter()
            .zip(points.iter().cycle().skip(1))
            .map(|(a, b)| a.0 * b.1 - b.0 * a.1)
            .sum();
        twice.abs() as f64 / 2.0
    }

    /// Andrew's monotone chain. Collinear points are dropped from the hull.
    pub fn convex_hull(points: &[(i64, i64)]) -> Vec<(i64, i64)> {
        let mut sorted = points.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() < 3 {
            return sorted;
        }

        fn cross(o: (i64, i64), a: (i64, i64), b: (i64, i64)) -> i64 {
            (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
        }

        let mut lower: Vec<(i64, i64)> = Vec::with_capacity(sorted.len());
        for &p in &sorted {
            while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0 {
                lower.pop();
            }
            lower.push(p);
        }
        let mut upper: Vec<(i64, i64)> = Vec::with_capacity(sorted.len());
        for &p in sorted.iter().rev() {
            while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0 {
                upper.pop();
            }
            upper.push(p);
        }

        lower.pop();
        upper.pop();
        lower.extend(upper);
        lower
    }
}

#[cfg(test)]
mod tests {
    use super::shape::*;
    use super::*;
    use std::collections::HashSet;

    fn disc(radius: i64, cx: i64, cy: i64) -> Vec<Point> {
        let mut pixels = Vec::new();
        for y in (cy - radius)..=(cy + radius) {
            for x in (cx - radius)..=(cx + radius) {
                if (x - cx).pow(2) + (y - cy).pow(2) <= radius * radius {
                    pixels.push(Point { x: x as u32, y: y as u32 });
                }
            }
        }
        pixels
    }

    fn measure(pixels: &[Point]) -> BlobCandidate {
        let set: HashSet<(i64, i64)> = pixels.iter().map(|p| (p.x as i64, p.y as i64)).collect();
        BlobCandidate::from_region(pixels, |x, y| set.contains(&(x, y)))
    }

    #[test]
    fn disc_is_round_and_centered() {
        let blob = measure(&disc(15, 50, 40));
        assert!((blob.x - 50.0).abs() < 1e-9);
        assert!((blob.y - 40.0).abs() < 1e-9);
        assert!(blob.inertia_ratio > 0.99);
        assert!(blob.convexity > 0.95);
        assert!(blob.circularity > 0.8);
        assert_eq!(blob.bounding_box, (Point { x: 35, y: 25 }, Point { x: 65, y: 55 }));
    }

    #[test]
    fn line_has_no_inertia_ratio() {
        let line: Vec<Point> = (0..10).map(|x| Point { x, y: 5 }).collect();
        let blob = measure(&line);
        assert!(blob.inertia_ratio.abs() < 1e-12);
        assert_eq!(blob.circularity, 0.0);
    }

    #[test]
    fn single_pixel_is_degenerate_but_finite() {
        let blob = measure(&[Point { x: 3, y: 3 }]);
        assert_eq!(blob.area, 1);
        assert_eq!(blob.inertia_ratio, 1.0);
        assert!(blob.size.is_finite());
    }

    #[test]
    fn square_contour_visits_the_boundary() {
        let square: HashSet<(i64, i64)> = (0..10).flat_map(|y| (0..10).map(move |x| (x, y))).collect();
        let contour = trace_contour((0, 0), |x, y| square.contains(&(x, y)));
        assert_eq!(contour.len(), 36);
        assert!((closed_length(&contour) - 36.0).abs() < 1e-9);
        assert_eq!(polygon_area(&contour), 81.0);
        assert_eq!(polygon_area(&convex_hull(&contour)), 81.0);
    }

    #[test]
    fn notched_disc_is_not_convex() {
        let notched: Vec<Point> = disc(15, 50, 50)
            .into_iter()
            .filter(|p| !(p.x >= 50 && (45..=55).contains(&p.y)))
            .collect();
        let blob = measure(&notched);
        assert!(blob.convexity < 0.8);
    }

    #[test]
    fn hull_drops_interior_points() {
        let hull = convex_hull(&[(0, 0), (4, 0), (2, 1), (4, 4), (0, 4), (2, 2)]);
        assert_eq!(hull.len(), 4);
    }
}
