//! The polymorphic smoothing objective family.
//!
//! Every objective maps the current mesh state to one raw displacement
//! per vertex: the vector from the vertex to the position the objective
//! considers locally optimal. The relaxation engine applies the global
//! damping factor and the boundary constraint afterwards, so objectives
//! here compute full, undamped steps for *all* vertices.
//!
//! The fixed-point variants move each vertex toward a weighted average of
//! reference points of its incident cells (neighbor positions,
//! barycenters, or circumcenters). The quasi-Newton variants accelerate
//! the same targets with a per-vertex Newton step whose local Jacobian is
//! estimated by finite differences, falling back to the fixed-point step
//! whenever the Jacobian is singular or the Newton step is untrustworthy.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::core::boundary::BoundaryMarker;
use crate::core::mesh::{CellVertices, Mesh};
use crate::geometry::measures::{barycenter, circumcenter, signed_measure, solve_linear_system};
use crate::geometry::point::{norm, Point};
use crate::geometry::predicates::orientation;
use crate::geometry::quality::{cell_points, CellGeometry};

/// Relative step used for finite-difference Jacobian estimation.
const FD_RELATIVE_STEP: f64 = 1e-6;

/// A Newton step larger than this multiple of the fixed-point step is
/// rejected in favor of the fixed-point step.
const NEWTON_STEP_GUARD: f64 = 10.0;

/// A smoothing objective: produces one displacement per vertex.
///
/// Implementations must be deterministic given identical inputs and must
/// not mutate the mesh; the engine owns all state.
pub trait ObjectiveFunction<const D: usize> {
    /// Computes the raw (undamped) displacement field for the current
    /// mesh state.
    fn displacements(
        &self,
        mesh: &Mesh<D>,
        marker: &BoundaryMarker,
        geometry: &CellGeometry<D>,
    ) -> Vec<[f64; D]>;
}

/// The built-in smoothing methods.
///
/// # Examples
///
/// ```rust
/// use relaxmesh::core::objective::SmoothingMethod;
///
/// assert_eq!(SmoothingMethod::default(), SmoothingMethod::Lloyd);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum SmoothingMethod {
    /// Move each vertex to the average of its distinct neighbors.
    Laplace,
    /// Neighbor average with per-cell contributions weighted by cell
    /// measure; reduces vertex clustering near small cells.
    AreaWeightedLaplace,
    /// Move each vertex toward the measure-weighted average of incident
    /// cell barycenters.
    CentroidalPatch,
    /// Quasi-Newton acceleration of [`SmoothingMethod::CentroidalPatch`].
    CentroidalPatchQuasiNewton,
    /// Move each vertex toward the centroid of its control volume
    /// (2D; measure-weighted circumcenter average in 3D).
    #[default]
    Lloyd,
    /// Quasi-Newton acceleration of [`SmoothingMethod::Lloyd`].
    LloydQuasiNewton,
    /// Move each vertex toward the measure-weighted average of incident
    /// cell circumcenters, with barycenters substituted for
    /// boundary-adjacent cells.
    OptimalDelaunay,
    /// Unweighted circumcenter average; preserves the input vertex
    /// density distribution.
    OptimalDelaunayDensityPreserving,
}

impl<const D: usize> ObjectiveFunction<D> for SmoothingMethod {
    fn displacements(
        &self,
        mesh: &Mesh<D>,
        marker: &BoundaryMarker,
        geometry: &CellGeometry<D>,
    ) -> Vec<[f64; D]> {
        let targets = match self {
            Self::Laplace => laplace_targets(mesh),
            Self::AreaWeightedLaplace => area_weighted_laplace_targets(mesh, geometry),
            Self::CentroidalPatch => {
                averaged_reference_points(mesh, &geometry.barycenters, Some(&geometry.volumes))
            }
            Self::CentroidalPatchQuasiNewton => {
                quasi_newton_targets(mesh, marker, geometry, ReferenceKind::Barycenter)
            }
            Self::Lloyd => {
                let boundary_adjacent = boundary_adjacent_cells(mesh, marker);
                let mut targets = Vec::with_capacity(mesh.number_of_vertices());
                let star = vertex_star(mesh);
                for (v, p) in mesh.points().iter().enumerate() {
                    let target = local_target(
                        mesh.points(),
                        mesh.cells(),
                        &star[v],
                        v,
                        *p,
                        ReferenceKind::ControlVolume,
                        &boundary_adjacent,
                    )
                    .unwrap_or(*p);
                    targets.push(target);
                }
                targets
            }
            Self::LloydQuasiNewton => {
                quasi_newton_targets(mesh, marker, geometry, ReferenceKind::ControlVolume)
            }
            Self::OptimalDelaunay => {
                let references = substituted_circumcenters(mesh, marker, geometry);
                averaged_reference_points(mesh, &references, Some(&geometry.volumes))
            }
            Self::OptimalDelaunayDensityPreserving => {
                let references = substituted_circumcenters(mesh, marker, geometry);
                averaged_reference_points(mesh, &references, None)
            }
        };
        mesh.points()
            .iter()
            .zip(&targets)
            .map(|(p, t)| p.vector_to(t))
            .collect()
    }
}

/// Which reference point a local target evaluation uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ReferenceKind {
    /// Cell barycenters, measure-weighted.
    Barycenter,
    /// Control-volume centroid in 2D; substituted circumcenters,
    /// measure-weighted, in 3D.
    ControlVolume,
}

/// Incident cells of every vertex.
fn vertex_star<const D: usize>(mesh: &Mesh<D>) -> Vec<SmallVec<[usize; 8]>> {
    let mut star = vec![SmallVec::new(); mesh.number_of_vertices()];
    for (cell, vertices) in mesh.cells().iter().enumerate() {
        for &v in vertices {
            star[v].push(cell);
        }
    }
    star
}

/// Cells that own a boundary facet, identified by the count of boundary
/// vertices among their corners. Flat boundary cells have circumcenters
/// far outside the domain; the centroidal methods substitute barycenters
/// for them so vertices are not dragged across the boundary.
fn boundary_adjacent_cells<const D: usize>(mesh: &Mesh<D>, marker: &BoundaryMarker) -> Vec<bool> {
    mesh.cells()
        .iter()
        .map(|vertices| marker.boundary_vertices_in(vertices) >= D)
        .collect()
}

/// Circumcenters with barycenters substituted for boundary-adjacent cells.
fn substituted_circumcenters<const D: usize>(
    mesh: &Mesh<D>,
    marker: &BoundaryMarker,
    geometry: &CellGeometry<D>,
) -> Vec<Point<D>> {
    let boundary_adjacent = boundary_adjacent_cells(mesh, marker);
    geometry
        .circumcenters
        .iter()
        .zip(&geometry.barycenters)
        .zip(&boundary_adjacent)
        .map(|((cc, bc), &near)| if near { *bc } else { *cc })
        .collect()
}

/// For each vertex, the (weighted) average of the reference points of all
/// incident cells. Weights are typically the cell measures; `None` gives
/// the unweighted average.
fn averaged_reference_points<const D: usize>(
    mesh: &Mesh<D>,
    references: &[Point<D>],
    weights: Option<&[f64]>,
) -> Vec<Point<D>> {
    let n = mesh.number_of_vertices();
    let mut sums = vec![[0.0; D]; n];
    let mut weight_sums = vec![0.0; n];
    for (cell, vertices) in mesh.cells().iter().enumerate() {
        let w = weights.map_or(1.0, |ws| ws[cell]);
        let reference = references[cell].coords();
        for &v in vertices {
            for (acc, c) in sums[v].iter_mut().zip(&reference) {
                *acc += w * c;
            }
            weight_sums[v] += w;
        }
    }
    mesh.points()
        .iter()
        .enumerate()
        .map(|(v, p)| {
            if weight_sums[v] > f64::MIN_POSITIVE {
                let mut coords = sums[v];
                for c in &mut coords {
                    *c /= weight_sums[v];
                }
                Point::new(coords)
            } else {
                *p
            }
        })
        .collect()
}

/// Plain Laplacian targets: the average of each vertex's distinct
/// neighbors.
fn laplace_targets<const D: usize>(mesh: &Mesh<D>) -> Vec<Point<D>> {
    let n = mesh.number_of_vertices();
    let mut sums = vec![[0.0; D]; n];
    let mut counts = vec![0usize; n];
    let mut seen: FxHashSet<(usize, usize)> = FxHashSet::default();
    for vertices in mesh.cells() {
        for (i, &a) in vertices.iter().enumerate() {
            for &b in &vertices[i + 1..] {
                let key = if a < b { (a, b) } else { (b, a) };
                if !seen.insert(key) {
                    continue;
                }
                for (acc, c) in sums[a].iter_mut().zip(&mesh.points()[b].coords()) {
                    *acc += c;
                }
                counts[a] += 1;
                for (acc, c) in sums[b].iter_mut().zip(&mesh.points()[a].coords()) {
                    *acc += c;
                }
                counts[b] += 1;
            }
        }
    }
    mesh.points()
        .iter()
        .enumerate()
        .map(|(v, p)| {
            if counts[v] == 0 {
                *p
            } else {
                let mut coords = sums[v];
                for c in &mut coords {
                    *c /= counts[v] as f64;
                }
                Point::new(coords)
            }
        })
        .collect()
}

/// Measure-weighted Laplacian targets: every per-cell neighbor
/// contribution is weighted by the cell measure.
fn area_weighted_laplace_targets<const D: usize>(
    mesh: &Mesh<D>,
    geometry: &CellGeometry<D>,
) -> Vec<Point<D>> {
    let n = mesh.number_of_vertices();
    let mut sums = vec![[0.0; D]; n];
    let mut weight_sums = vec![0.0; n];
    for (cell, vertices) in mesh.cells().iter().enumerate() {
        let w = geometry.volumes[cell];
        for &a in vertices {
            for &b in vertices {
                if a == b {
                    continue;
                }
                for (acc, c) in sums[a].iter_mut().zip(&mesh.points()[b].coords()) {
                    *acc += w * c;
                }
                weight_sums[a] += w;
            }
        }
    }
    mesh.points()
        .iter()
        .enumerate()
        .map(|(v, p)| {
            if weight_sums[v] > f64::MIN_POSITIVE {
                let mut coords = sums[v];
                for c in &mut coords {
                    *c /= weight_sums[v];
                }
                Point::new(coords)
            } else {
                *p
            }
        })
        .collect()
}

/// Evaluates the fixed-point target of a single vertex with its position
/// replaced by `x`, using only the vertex's star.
///
/// Returns `None` when the substituted position degenerates a star cell
/// or a circumcenter is not computable; callers fall back to the
/// unperturbed fixed-point step in that case.
fn local_target<const D: usize>(
    points: &[Point<D>],
    cells: &[CellVertices],
    star: &[usize],
    vertex: usize,
    x: Point<D>,
    kind: ReferenceKind,
    boundary_adjacent: &[bool],
) -> Option<Point<D>> {
    if star.is_empty() {
        return Some(x);
    }
    if kind == ReferenceKind::ControlVolume && D == 2 {
        return control_volume_centroid(points, cells, star, vertex, x);
    }
    let mut sum = [0.0; D];
    let mut weight_sum = 0.0;
    for &cell in star {
        let mut pts = cell_points(points, &cells[cell]);
        for (slot, &v) in pts.iter_mut().zip(&cells[cell]) {
            if v == vertex {
                *slot = x;
            }
        }
        let w = signed_measure(&pts).ok()?;
        if w <= 0.0 {
            return None;
        }
        let reference = match kind {
            ReferenceKind::Barycenter => barycenter(&pts).ok()?,
            ReferenceKind::ControlVolume => {
                if boundary_adjacent[cell] {
                    barycenter(&pts).ok()?
                } else {
                    circumcenter(&pts).ok()?
                }
            }
        };
        for (acc, c) in sum.iter_mut().zip(&reference.coords()) {
            *acc += w * c;
        }
        weight_sum += w;
    }
    if weight_sum <= f64::MIN_POSITIVE {
        return None;
    }
    for c in &mut sum {
        *c /= weight_sum;
    }
    Some(Point::new(sum))
}

/// Centroid of the circumcentric control volume of one vertex (2D).
///
/// The control-volume piece inside an incident triangle `(x, j, k)` is
/// the kite spanned by `x`, the midpoints of the edges `x-j` and `x-k`,
/// and the triangle circumcenter. Signed areas keep the decomposition
/// exact for obtuse triangles whose circumcenter lies outside.
fn control_volume_centroid<const D: usize>(
    points: &[Point<D>],
    cells: &[CellVertices],
    star: &[usize],
    vertex: usize,
    x: Point<D>,
) -> Option<Point<D>> {
    let mut area_sum = 0.0;
    let mut centroid_sum = [0.0; 2];
    for &cell in star {
        let vertices = &cells[cell];
        let i = vertices.iter().position(|&v| v == vertex)?;
        let j = vertices[(i + 1) % 3];
        let k = vertices[(i + 2) % 3];
        let mut pts = cell_points(points, vertices);
        pts[i] = x;
        if signed_measure(&pts).ok()? <= 0.0 {
            return None;
        }
        let xi = x.xy();
        let xj = points[j].xy();
        let xk = points[k].xy();
        let cc = circumcenter(&pts).ok()?.xy();
        let mid_ij = [0.5 * (xi[0] + xj[0]), 0.5 * (xi[1] + xj[1])];
        let mid_ik = [0.5 * (xi[0] + xk[0]), 0.5 * (xi[1] + xk[1])];
        for (a, b) in [(mid_ij, cc), (cc, mid_ik)] {
            let area = 0.5 * orientation(xi, a, b);
            let centroid = [
                (xi[0] + a[0] + b[0]) / 3.0,
                (xi[1] + a[1] + b[1]) / 3.0,
            ];
            area_sum += area;
            centroid_sum[0] += area * centroid[0];
            centroid_sum[1] += area * centroid[1];
        }
    }
    if area_sum.abs() <= f64::MIN_POSITIVE {
        return None;
    }
    let mut coords = [0.0; D];
    coords[0] = centroid_sum[0] / area_sum;
    coords[1] = centroid_sum[1] / area_sum;
    Some(Point::new(coords))
}

/// Per-vertex quasi-Newton targets for the fixed-point map of `kind`.
///
/// Interior vertices get a Newton step computed from a finite-difference
/// Jacobian of the local fixed-point map; boundary vertices and every
/// fallback case get the plain fixed-point target.
fn quasi_newton_targets<const D: usize>(
    mesh: &Mesh<D>,
    marker: &BoundaryMarker,
    geometry: &CellGeometry<D>,
    kind: ReferenceKind,
) -> Vec<Point<D>> {
    let boundary_adjacent = boundary_adjacent_cells(mesh, marker);
    let star = vertex_star(mesh);
    let points = mesh.points();
    let cells = mesh.cells();
    let mut targets = Vec::with_capacity(points.len());
    for (v, p) in points.iter().enumerate() {
        let fixed_point =
            local_target(points, cells, &star[v], v, *p, kind, &boundary_adjacent).unwrap_or(*p);
        if marker.is_boundary(v) {
            targets.push(fixed_point);
            continue;
        }
        let residual = p.vector_to(&fixed_point);
        let residual_norm = norm(residual);
        if residual_norm <= f64::MIN_POSITIVE {
            targets.push(fixed_point);
            continue;
        }
        let scale = local_scale(geometry, &star[v], p);
        let step = newton_step(
            points,
            cells,
            &star[v],
            v,
            *p,
            kind,
            &boundary_adjacent,
            residual,
            FD_RELATIVE_STEP * scale,
        );
        match step {
            Some(dx) if norm(dx) <= NEWTON_STEP_GUARD * residual_norm => {
                targets.push(p.translated(dx));
            }
            _ => targets.push(fixed_point),
        }
    }
    targets
}

/// Local length scale: mean distance from the vertex to its star's
/// barycenters.
fn local_scale<const D: usize>(
    geometry: &CellGeometry<D>,
    star: &[usize],
    p: &Point<D>,
) -> f64 {
    if star.is_empty() {
        return 1.0;
    }
    let total: f64 = star
        .iter()
        .map(|&cell| p.distance(&geometry.barycenters[cell]))
        .sum();
    (total / star.len() as f64).max(f64::MIN_POSITIVE)
}

/// Solves `(I - J_F) dx = residual` with `J_F` estimated by forward
/// differences of the local fixed-point map.
#[allow(clippy::too_many_arguments)]
fn newton_step<const D: usize>(
    points: &[Point<D>],
    cells: &[CellVertices],
    star: &[usize],
    vertex: usize,
    x: Point<D>,
    kind: ReferenceKind,
    boundary_adjacent: &[bool],
    residual: [f64; D],
    h: f64,
) -> Option<[f64; D]> {
    let base = local_target(points, cells, star, vertex, x, kind, boundary_adjacent)?;
    // system[r][c] = (I - J_F)[r][c]
    let mut system = [[0.0; D]; D];
    for axis in 0..D {
        let mut displacement = [0.0; D];
        displacement[axis] = h;
        let perturbed = local_target(
            points,
            cells,
            star,
            vertex,
            x.translated(displacement),
            kind,
            boundary_adjacent,
        )?;
        let delta = base.vector_to(&perturbed);
        for row in 0..D {
            let jacobian_entry = delta[row] / h;
            system[row][axis] = if row == axis {
                1.0 - jacobian_entry
            } else {
                -jacobian_entry
            };
        }
    }
    solve_linear_system(system, residual)
}
