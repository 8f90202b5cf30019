//! Boundary constraint applied to proposed vertex displacements.
//!
//! Flat mode zeroes every boundary-vertex displacement, guaranteeing
//! bit-for-bit boundary invariance. Curved mode instead projects the
//! tentative new position of a boundary vertex back onto the closest of
//! its incident boundary facets, which lets boundary vertices slide along
//! a polygonal boundary without leaving it. Interior displacements are
//! never modified.

use serde::{Deserialize, Serialize};

use crate::core::boundary::BoundaryMarker;
use crate::geometry::point::{dot, norm_squared, Point};

/// How boundary vertices are treated during relaxation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum BoundaryMode {
    /// Boundary vertices do not move at all.
    #[default]
    Flat,
    /// Boundary vertices may slide; their displaced position is projected
    /// back onto the incident boundary facets.
    Curved,
}

/// Applies the boundary constraint to a displacement field in place.
///
/// # Panics
///
/// Panics if `displacements` is not as long as `points`.
pub fn constrain_displacements<const D: usize>(
    points: &[Point<D>],
    displacements: &mut [[f64; D]],
    marker: &BoundaryMarker,
    mode: BoundaryMode,
) {
    assert_eq!(points.len(), displacements.len());
    for (vertex, displacement) in displacements.iter_mut().enumerate() {
        if !marker.is_boundary(vertex) {
            continue;
        }
        match mode {
            BoundaryMode::Flat => *displacement = [0.0; D],
            BoundaryMode::Curved => {
                let target = points[vertex].translated(*displacement);
                let projected = project_onto_incident_facets(points, marker, vertex, &target);
                *displacement = points[vertex].vector_to(&projected);
            }
        }
    }
}

/// Closest point to `target` on any boundary facet incident to `vertex`.
///
/// Falls back to the vertex position itself when the vertex has no
/// incident boundary facets recorded (cannot happen for a classified
/// boundary vertex, but keeps the projection total).
fn project_onto_incident_facets<const D: usize>(
    points: &[Point<D>],
    marker: &BoundaryMarker,
    vertex: usize,
    target: &Point<D>,
) -> Point<D> {
    let mut best = points[vertex];
    let mut best_distance = f64::INFINITY;
    for &facet_id in marker.incident_facets(vertex) {
        let facet = &marker.boundary_facets()[facet_id];
        let candidate = match D {
            2 => closest_point_on_segment(&points[facet[0]], &points[facet[1]], target),
            _ => closest_point_on_triangle(
                &points[facet[0]],
                &points[facet[1]],
                &points[facet[2]],
                target,
            ),
        };
        let distance = candidate.distance(target);
        if distance < best_distance {
            best_distance = distance;
            best = candidate;
        }
    }
    best
}

fn add_scaled<const D: usize>(p: &Point<D>, v: [f64; D], s: f64) -> Point<D> {
    let mut scaled = v;
    for c in &mut scaled {
        *c *= s;
    }
    p.translated(scaled)
}

/// Closest point to `p` on the segment `[a, b]`.
fn closest_point_on_segment<const D: usize>(
    a: &Point<D>,
    b: &Point<D>,
    p: &Point<D>,
) -> Point<D> {
    let ab = a.vector_to(b);
    let ab2 = norm_squared(ab);
    if ab2 <= f64::MIN_POSITIVE {
        return *a;
    }
    let t = (dot(a.vector_to(p), ab) / ab2).clamp(0.0, 1.0);
    add_scaled(a, ab, t)
}

/// Closest point to `p` on the triangle `(a, b, c)`.
///
/// Standard Voronoi-region case analysis over the triangle's vertices,
/// edges, and interior.
fn closest_point_on_triangle<const D: usize>(
    a: &Point<D>,
    b: &Point<D>,
    c: &Point<D>,
    p: &Point<D>,
) -> Point<D> {
    let ab = a.vector_to(b);
    let ac = a.vector_to(c);
    let ap = a.vector_to(p);
    let d1 = dot(ab, ap);
    let d2 = dot(ac, ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = b.vector_to(p);
    let d3 = dot(ab, bp);
    let d4 = dot(ac, bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return add_scaled(a, ab, d1 / (d1 - d3));
    }

    let cp = c.vector_to(p);
    let d5 = dot(ab, cp);
    let d6 = dot(ac, cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return add_scaled(a, ac, d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let bc = b.vector_to(c);
        return add_scaled(b, bc, (d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    add_scaled(&add_scaled(a, ab, v), ac, w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mesh::Mesh;
    use approx::assert_relative_eq;
    use smallvec::smallvec;

    fn square_mesh() -> Mesh<2> {
        Mesh::new(
            vec![
                Point::new([0.0, 0.0]),
                Point::new([1.0, 0.0]),
                Point::new([1.0, 1.0]),
                Point::new([0.0, 1.0]),
                Point::new([0.5, 0.5]),
            ],
            vec![
                smallvec![0, 1, 4],
                smallvec![1, 2, 4],
                smallvec![2, 3, 4],
                smallvec![3, 0, 4],
            ],
        )
        .unwrap()
    }

    #[test]
    fn flat_mode_zeroes_boundary_displacements_exactly() {
        let mesh = square_mesh();
        let marker = BoundaryMarker::classify(&mesh).unwrap();
        let mut displacements = vec![[0.1, -0.2]; 5];
        constrain_displacements(mesh.points(), &mut displacements, &marker, BoundaryMode::Flat);
        for v in 0..4 {
            assert_eq!(displacements[v], [0.0, 0.0]);
        }
        // The interior vertex keeps its displacement untouched.
        assert_eq!(displacements[4], [0.1, -0.2]);
    }

    #[test]
    fn curved_mode_projects_back_onto_boundary_edges() {
        let mesh = square_mesh();
        let marker = BoundaryMarker::classify(&mesh).unwrap();
        // Push vertex 1 = (1, 0) off the boundary; its incident boundary
        // edges are (0,1) and (1,2). The displaced position (0.6, -0.3)
        // projects to (0.6, 0) on the bottom edge.
        let mut displacements = vec![[0.0, 0.0]; 5];
        displacements[1] = [-0.4, -0.3];
        constrain_displacements(
            mesh.points(),
            &mut displacements,
            &marker,
            BoundaryMode::Curved,
        );
        let new_pos = mesh.points()[1].translated(displacements[1]);
        assert_relative_eq!(new_pos.coords()[0], 0.6, epsilon = 1e-12);
        assert_relative_eq!(new_pos.coords()[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn curved_mode_never_touches_interior_vertices() {
        let mesh = square_mesh();
        let marker = BoundaryMarker::classify(&mesh).unwrap();
        let mut displacements = vec![[0.0, 0.0]; 5];
        displacements[4] = [0.25, 0.25];
        constrain_displacements(
            mesh.points(),
            &mut displacements,
            &marker,
            BoundaryMode::Curved,
        );
        assert_eq!(displacements[4], [0.25, 0.25]);
    }

    #[test]
    fn segment_projection_clamps_to_endpoints() {
        let a = Point::new([0.0, 0.0]);
        let b = Point::new([1.0, 0.0]);
        let beyond = Point::new([2.0, 1.0]);
        assert_eq!(closest_point_on_segment(&a, &b, &beyond), b);
        let before = Point::new([-1.0, 1.0]);
        assert_eq!(closest_point_on_segment(&a, &b, &before), a);
    }

    #[test]
    fn triangle_projection_regions() {
        let a = Point::new([0.0, 0.0, 0.0]);
        let b = Point::new([1.0, 0.0, 0.0]);
        let c = Point::new([0.0, 1.0, 0.0]);
        // Above the interior: projects straight down onto the face.
        let p = closest_point_on_triangle(&a, &b, &c, &Point::new([0.25, 0.25, 1.0]));
        assert_relative_eq!(p.coords()[0], 0.25, epsilon = 1e-12);
        assert_relative_eq!(p.coords()[1], 0.25, epsilon = 1e-12);
        assert_relative_eq!(p.coords()[2], 0.0, epsilon = 1e-12);
        // Beyond a vertex: clamps to the vertex.
        let q = closest_point_on_triangle(&a, &b, &c, &Point::new([2.0, -1.0, 0.5]));
        assert_eq!(q, b);
        // Beyond an edge: clamps onto the edge.
        let r = closest_point_on_triangle(&a, &b, &c, &Point::new([0.5, -1.0, 0.0]));
        assert_relative_eq!(r.coords()[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(r.coords()[1], 0.0, epsilon = 1e-12);
    }
}
