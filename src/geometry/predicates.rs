//! Planar geometric predicates for the flip procedure.
//!
//! These are the two classic predicates of 2D Delaunay maintenance:
//! orientation (signed twice-area) and the in-circle test. Both are
//! evaluated with plain `f64` determinants plus a magnitude-adaptive
//! tolerance: results within the tolerance band are classified as
//! degenerate/boundary rather than strictly positive or negative, so
//! near-cocircular configurations do not trigger flip cycles.

/// Relative factor for magnitude-adaptive predicate tolerances.
const PREDICATE_REL_TOLERANCE: f64 = 1e-12;

/// Signed twice-area of the triangle `(a, b, c)`.
///
/// Positive for counter-clockwise orientation, negative for clockwise,
/// zero for collinear points.
///
/// # Examples
///
/// ```rust
/// use relaxmesh::geometry::predicates::orientation;
///
/// let ccw = orientation([0.0, 0.0], [1.0, 0.0], [0.0, 1.0]);
/// assert!(ccw > 0.0);
/// let cw = orientation([0.0, 0.0], [0.0, 1.0], [1.0, 0.0]);
/// assert!(cw < 0.0);
/// ```
#[inline]
#[must_use]
pub fn orientation(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Tolerance below which an [`orientation`] result counts as degenerate.
///
/// Scales with the squared extent of the input points, matching the
/// quadratic scaling of the orientation determinant.
#[must_use]
pub fn orientation_tolerance(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    let extent = max_extent(&[a, b, c]);
    PREDICATE_REL_TOLERANCE * extent * extent
}

/// In-circle determinant: positive when `d` lies strictly inside the
/// circumcircle of the counter-clockwise triangle `(a, b, c)`.
///
/// Callers must pass a counter-clockwise triangle; for a clockwise one
/// the sign is inverted.
///
/// # Examples
///
/// ```rust
/// use relaxmesh::geometry::predicates::in_circle;
///
/// let a = [0.0, 0.0];
/// let b = [1.0, 0.0];
/// let c = [0.0, 1.0];
/// assert!(in_circle(a, b, c, [0.5, 0.5]) > 0.0);
/// assert!(in_circle(a, b, c, [2.0, 2.0]) < 0.0);
/// ```
#[must_use]
pub fn in_circle(a: [f64; 2], b: [f64; 2], c: [f64; 2], d: [f64; 2]) -> f64 {
    let adx = a[0] - d[0];
    let ady = a[1] - d[1];
    let bdx = b[0] - d[0];
    let bdy = b[1] - d[1];
    let cdx = c[0] - d[0];
    let cdy = c[1] - d[1];

    let ad2 = adx * adx + ady * ady;
    let bd2 = bdx * bdx + bdy * bdy;
    let cd2 = cdx * cdx + cdy * cdy;

    adx * (bdy * cd2 - cdy * bd2) - ady * (bdx * cd2 - cdx * bd2)
        + ad2 * (bdx * cdy - cdx * bdy)
}

/// Tolerance below which an [`in_circle`] result counts as cocircular.
///
/// Scales with the fourth power of the point extent, matching the quartic
/// scaling of the in-circle determinant.
#[must_use]
pub fn in_circle_tolerance(a: [f64; 2], b: [f64; 2], c: [f64; 2], d: [f64; 2]) -> f64 {
    let extent = max_extent(&[a, b, c, d]);
    PREDICATE_REL_TOLERANCE * extent.powi(4)
}

/// Largest absolute coordinate difference to the first point.
fn max_extent(points: &[[f64; 2]]) -> f64 {
    let origin = points[0];
    let mut extent = 1.0f64;
    for p in points {
        extent = extent
            .max((p[0] - origin[0]).abs())
            .max((p[1] - origin[1]).abs());
    }
    extent
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn orientation_signs() {
        assert!(orientation([0.0, 0.0], [2.0, 0.0], [1.0, 1.0]) > 0.0);
        assert!(orientation([0.0, 0.0], [1.0, 1.0], [2.0, 0.0]) < 0.0);
        assert_relative_eq!(orientation([0.0, 0.0], [1.0, 1.0], [2.0, 2.0]), 0.0);
    }

    #[test]
    fn orientation_equals_twice_triangle_area() {
        // Right triangle with legs 3 and 4: area 6, determinant 12.
        assert_relative_eq!(orientation([0.0, 0.0], [3.0, 0.0], [0.0, 4.0]), 12.0);
    }

    #[test]
    fn in_circle_detects_interior_and_exterior_points() {
        // Unit circle through these three points.
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let c = [-1.0, 0.0];
        assert!(in_circle(a, b, c, [0.0, 0.0]) > 0.0);
        assert!(in_circle(a, b, c, [0.0, -2.0]) < 0.0);
    }

    #[test]
    fn in_circle_cocircular_is_within_tolerance() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let c = [-1.0, 0.0];
        let d = [0.0, -1.0];
        let det = in_circle(a, b, c, d);
        assert!(det.abs() <= in_circle_tolerance(a, b, c, d));
    }

    #[test]
    fn tolerances_scale_with_extent() {
        let small = in_circle_tolerance([0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]);
        let large = in_circle_tolerance([0.0, 0.0], [1e3, 0.0], [0.0, 1e3], [1e3, 1e3]);
        assert!(large > small);
    }
}
