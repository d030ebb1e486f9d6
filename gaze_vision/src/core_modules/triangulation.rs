// THEORY:
// Delaunay triangulation of the calibration pupil positions, used as the support
// for piecewise-linear interpolation of gaze over the eye image.
//
// The calibration only ever has a handful of points, so the construction is
// kept simple and exact about coverage:
// 1.  **Sweep**: visit the points in lexicographic order. Each new point lies
//     outside the hull built so far, so it is joined to every hull edge it can
//     see. The result covers the convex hull of the input with no enclosing
//     triangle to cut away, so thin triangles along a nearly straight hull
//     edge are never lost.
// 2.  **Flip**: any edge whose opposite vertex falls inside the circumcircle of
//     the neighbouring triangle is swapped for the other diagonal, until no such
//     edge remains. That is the Delaunay triangulation.

/// Relative slack on the in-circle test, so cocircular points do not flip back
/// and forth.
const INCIRCLE_EPSILON: f64 = 1e-12;

/// A triangle as three indices into the point list it was built from.
pub type Triangle = [usize; 3];

/// Delaunay triangulation of `points`. Returns counter-clockwise triangles
/// (positive [`doubled_signed_area`]) as index triples into `points`. Input must
/// already be free of duplicates and not entirely collinear;
/// [`crate::core_modules::calibration`] checks both.
pub fn triangulate(points: &[[f64; 2]]) -> Vec<Triangle> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }
    let orient = |a: usize, b: usize, c: usize| doubled_signed_area(points[a], points[b], points[c]);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        points[a][0]
            .total_cmp(&points[b][0])
            .then(points[a][1].total_cmp(&points[b][1]))
    });

    // --- 1. Seed: the leading collinear run fanned from the first point off it ---
    let Some(apex_at) = (2..n).find(|&k| orient(order[0], order[1], order[k]) != 0.0) else {
        return Vec::new();
    };
    let apex = order[apex_at];
    let mut run = order[..apex_at].to_vec();
    if orient(run[0], run[1], apex) < 0.0 {
        run.reverse();
    }
    let mut triangles: Vec<Triangle> = run.windows(2).map(|w| [w[0], w[1], apex]).collect();
    // Counter-clockwise.
    let mut hull = run;
    hull.push(apex);

    // --- 2. Sweep the remaining points ---
    for &point in &order[apex_at + 1..] {
        let m = hull.len();
        let visible: Vec<bool> = (0..m)
            .map(|i| orient(hull[i], hull[(i + 1) % m], point) < 0.0)
            .collect();
        let Some(first) = (0..m).find(|&i| visible[i] && !visible[(i + m - 1) % m]) else {
            continue;
        };
        let mut last = first;
        while visible[(last + 1) % m] && (last + 1) % m != first {
            last = (last + 1) % m;
        }

        let mut i = first;
        loop {
            let (u, v) = (hull[i], hull[(i + 1) % m]);
            triangles.push([v, u, point]);
            if i == last {
                break;
            }
            i = (i + 1) % m;
        }

        // Keep hull[last + 1] round to hull[first], then close with the new point.
        let mut next_hull = Vec::with_capacity(m + 1);
        let mut i = (last + 1) % m;
        loop {
            next_hull.push(hull[i]);
            if i == first {
                break;
            }
            i = (i + 1) % m;
        }
        next_hull.push(point);
        hull = next_hull;
    }

    // --- 3. Lawson flips ---
    let max_flips = n * n * n;
    for _ in 0..max_flips {
        let Some((i, j, [a, b, c], d)) = find_illegal_edge(points, &triangles) else {
            break;
        };
        triangles[i] = [a, d, c];
        triangles[j] = [d, b, c];
    }

    triangles
}

/// The first pair of neighbouring triangles whose shared edge is not locally
/// Delaunay. Returns the two triangle indices, the first triangle rotated so the
/// shared edge is `a -> b`, and the vertex `d` opposite that edge.
fn find_illegal_edge(points: &[[f64; 2]], triangles: &[Triangle]) -> Option<(usize, usize, Triangle, usize)> {
    for (i, t) in triangles.iter().enumerate() {
        for k in 0..3 {
            let (a, b, c) = (t[k], t[(k + 1) % 3], t[(k + 2) % 3]);
            let neighbour = triangles
                .iter()
                .enumerate()
                .find(|(_, u)| (0..3).any(|m| u[m] == b && u[(m + 1) % 3] == a));
            let Some((j, u)) = neighbour else { continue };
            let Some(&d) = u.iter().find(|&&v| v != a && v != b) else { continue };

            let flippable = doubled_signed_area(points[a], points[d], points[c]) > 0.0
                && doubled_signed_area(points[d], points[b], points[c]) > 0.0;
            if flippable && in_circumcircle(points[a], points[b], points[c], points[d]) {
                return Some((i, j, [a, b, c], d));
            }
        }
    }
    None
}

/// Whether `d` lies strictly inside the circumcircle of the counter-clockwise
/// triangle `abc`.
fn in_circumcircle(a: [f64; 2], b: [f64; 2], c: [f64; 2], d: [f64; 2]) -> bool {
    let (adx, ady) = (a[0] - d[0], a[1] - d[1]);
    let (bdx, bdy) = (b[0] - d[0], b[1] - d[1]);
    let (cdx, cdy) = (c[0] - d[0], c[1] - d[1]);
    let (ad, bd, cd) = (adx * adx + ady * ady, bdx * bdx + bdy * bdy, cdx * cdx + cdy * cdy);
    let det = ad * (bdx * cdy - cdx * bdy) + bd * (cdx * ady - adx * cdy) + cd * (adx * bdy - bdx * ady);
    let scale = ad.max(bd).max(cd);
    det > INCIRCLE_EPSILON * scale * scale
}

/// Twice the signed area of triangle `abc`.
pub fn doubled_signed_area(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (c[0] - a[0]) * (b[1] - a[1])
}
