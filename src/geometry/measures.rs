//! Geometric measures of simplicial cells.
//!
//! Every function here is a pure function of a full simplex — a slice of
//! `D + 1` points for a cell in dimension `D` (triangles for `D = 2`,
//! tetrahedra for `D = 3`). Signed measures follow the orientation
//! convention of the mesh: positively oriented cells have positive
//! signed area/volume.

use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use smallvec::SmallVec;
use thiserror::Error;

use crate::geometry::point::{norm_squared, Point};

/// Errors from geometric measure computations.
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum GeometryError {
    /// The point slice does not hold a full simplex for the dimension.
    #[error("simplex in dimension {dimension} must have {expected} points, got {found}")]
    WrongPointCount {
        /// Spatial dimension.
        dimension: usize,
        /// Required number of points (`D + 1`).
        expected: usize,
        /// Number of points provided.
        found: usize,
    },
    /// The spatial dimension is not supported.
    #[error("unsupported dimension {dimension}; only 2 and 3 are supported")]
    UnsupportedDimension {
        /// Spatial dimension.
        dimension: usize,
    },
    /// The simplex has zero or negative signed measure.
    #[error("degenerate simplex with signed measure {measure:e}")]
    DegenerateSimplex {
        /// The offending signed measure.
        measure: f64,
    },
}

fn check_simplex<const D: usize>(points: &[Point<D>]) -> Result<(), GeometryError> {
    if D != 2 && D != 3 {
        return Err(GeometryError::UnsupportedDimension { dimension: D });
    }
    if points.len() != D + 1 {
        return Err(GeometryError::WrongPointCount {
            dimension: D,
            expected: D + 1,
            found: points.len(),
        });
    }
    Ok(())
}

/// Signed measure of a simplex: area in 2D, volume in 3D.
///
/// Positive for positively oriented cells (counter-clockwise triangles),
/// negative for inverted ones.
///
/// # Errors
///
/// Returns [`GeometryError`] if the slice is not a full simplex or the
/// dimension is unsupported.
///
/// # Examples
///
/// ```rust
/// use relaxmesh::geometry::measures::signed_measure;
/// use relaxmesh::geometry::point::Point;
///
/// let tri = [
///     Point::new([0.0, 0.0]),
///     Point::new([1.0, 0.0]),
///     Point::new([0.0, 1.0]),
/// ];
/// assert_eq!(signed_measure(&tri).unwrap(), 0.5);
/// ```
pub fn signed_measure<const D: usize>(points: &[Point<D>]) -> Result<f64, GeometryError> {
    check_simplex(points)?;
    let origin = points[0];
    match D {
        2 => {
            let u = origin.vector_to(&points[1]);
            let v = origin.vector_to(&points[2]);
            let m = Matrix2::from_iterator(u.into_iter().chain(v));
            Ok(m.determinant() / 2.0)
        }
        3 => {
            let edges = [
                origin.vector_to(&points[1]),
                origin.vector_to(&points[2]),
                origin.vector_to(&points[3]),
            ];
            let m = Matrix3::from_iterator(edges.into_iter().flatten());
            Ok(m.determinant() / 6.0)
        }
        _ => unreachable!("dimension validated above"),
    }
}

/// Barycenter (vertex centroid) of a simplex.
///
/// # Errors
///
/// Returns [`GeometryError`] if the slice is not a full simplex.
pub fn barycenter<const D: usize>(points: &[Point<D>]) -> Result<Point<D>, GeometryError> {
    check_simplex(points)?;
    let mut coords = [0.0; D];
    for p in points {
        for (acc, c) in coords.iter_mut().zip(&p.coords()) {
            *acc += c;
        }
    }
    let inv = 1.0 / (D as f64 + 1.0);
    for c in &mut coords {
        *c *= inv;
    }
    Ok(Point::new(coords))
}

/// Circumcenter of a simplex.
///
/// Solves the linear system equating the squared distances from the
/// center to all vertices.
///
/// # Errors
///
/// Returns [`GeometryError::DegenerateSimplex`] when the system is
/// singular (flat simplex), and the usual shape errors otherwise.
///
/// # Examples
///
/// ```rust
/// use relaxmesh::geometry::measures::circumcenter;
/// use relaxmesh::geometry::point::Point;
///
/// // Right triangle: circumcenter is the hypotenuse midpoint.
/// let tri = [
///     Point::new([0.0, 0.0]),
///     Point::new([1.0, 0.0]),
///     Point::new([0.0, 1.0]),
/// ];
/// let c = circumcenter(&tri).unwrap();
/// assert!((c.coords()[0] - 0.5).abs() < 1e-12);
/// assert!((c.coords()[1] - 0.5).abs() < 1e-12);
/// ```
pub fn circumcenter<const D: usize>(points: &[Point<D>]) -> Result<Point<D>, GeometryError> {
    check_simplex(points)?;
    let origin = points[0];
    // Relative form: A y = b with y = center - p0, A_k = p_{k+1} - p0,
    // b_k = |p_{k+1} - p0|^2 / 2.
    let mut a = [[0.0; D]; D];
    let mut b = [0.0; D];
    for (k, (row, rhs)) in a.iter_mut().zip(b.iter_mut()).enumerate() {
        let edge = origin.vector_to(&points[k + 1]);
        *row = edge;
        *rhs = 0.5 * norm_squared(edge);
    }
    let y = solve_linear_system(a, b).ok_or(GeometryError::DegenerateSimplex { measure: 0.0 })?;
    Ok(origin.translated(y))
}

/// Circumradius of a simplex.
///
/// # Errors
///
/// Returns [`GeometryError`] when the circumcenter is not computable.
pub fn circumradius<const D: usize>(points: &[Point<D>]) -> Result<f64, GeometryError> {
    let center = circumcenter(points)?;
    Ok(center.distance(&points[0]))
}

/// Inradius of a simplex: `D * |measure| / surface`, where surface is
/// the total facet measure (perimeter in 2D, face area in 3D).
///
/// # Errors
///
/// Returns [`GeometryError::DegenerateSimplex`] for simplices with zero
/// measure or zero surface.
pub fn inradius<const D: usize>(points: &[Point<D>]) -> Result<f64, GeometryError> {
    check_simplex(points)?;
    let measure = signed_measure(points)?.abs();
    let surface: f64 = match D {
        2 => edge_lengths(points)?.iter().sum(),
        3 => {
            let mut total = 0.0;
            for omit in 0..4 {
                let face: SmallVec<[Point<D>; 3]> = points
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != omit)
                    .map(|(_, p)| *p)
                    .collect();
                total += triangle_face_area(&face);
            }
            total
        }
        _ => unreachable!("dimension validated above"),
    };
    if surface <= f64::MIN_POSITIVE || measure <= f64::MIN_POSITIVE {
        return Err(GeometryError::DegenerateSimplex { measure });
    }
    Ok(D as f64 * measure / surface)
}

/// Unsigned area of a triangle embedded in 3D.
fn triangle_face_area<const D: usize>(face: &[Point<D>]) -> f64 {
    let u = face[0].vector_to(&face[1]);
    let v = face[0].vector_to(&face[2]);
    let minor = |i: usize, j: usize| u[i] * v[j] - u[j] * v[i];
    0.5 * (minor(1, 2).powi(2) + minor(2, 0).powi(2) + minor(0, 1).powi(2)).sqrt()
}

/// All pairwise edge lengths of a simplex (3 in 2D, 6 in 3D).
///
/// # Errors
///
/// Returns [`GeometryError`] if the slice is not a full simplex.
pub fn edge_lengths<const D: usize>(
    points: &[Point<D>],
) -> Result<SmallVec<[f64; 6]>, GeometryError> {
    check_simplex(points)?;
    let mut lengths = SmallVec::new();
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            lengths.push(points[i].distance(&points[j]));
        }
    }
    Ok(lengths)
}

/// Interior angles of a triangle, in radians, one per vertex.
///
/// # Errors
///
/// Returns [`GeometryError`] if the slice is not a triangle or an edge
/// has zero length.
pub fn triangle_angles(points: &[Point<2>]) -> Result<[f64; 3], GeometryError> {
    check_simplex(points)?;
    let mut angles = [0.0; 3];
    for (i, angle) in angles.iter_mut().enumerate() {
        let p = points[i];
        let u = p.vector_to(&points[(i + 1) % 3]);
        let v = p.vector_to(&points[(i + 2) % 3]);
        let nu = crate::geometry::point::norm(u);
        let nv = crate::geometry::point::norm(v);
        if nu <= f64::MIN_POSITIVE || nv <= f64::MIN_POSITIVE {
            return Err(GeometryError::DegenerateSimplex { measure: 0.0 });
        }
        let cos = (crate::geometry::point::dot(u, v) / (nu * nv)).clamp(-1.0, 1.0);
        *angle = cos.acos();
    }
    Ok(angles)
}

/// Solves the small dense system `A x = b` (row-major `A`), refusing
/// singular or non-finite solutions. Supports the crate's dimensions
/// (2 and 3) only.
pub(crate) fn solve_linear_system<const D: usize>(
    a: [[f64; D]; D],
    b: [f64; D],
) -> Option<[f64; D]> {
    let mut solution = [0.0; D];
    match D {
        2 => {
            let mut m = Matrix2::zeros();
            let mut rhs = Vector2::zeros();
            for (r, row) in a.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    m[(r, c)] = *value;
                }
                rhs[r] = b[r];
            }
            let x = m.lu().solve(&rhs)?;
            for (out, value) in solution.iter_mut().zip(x.iter()) {
                *out = *value;
            }
        }
        3 => {
            let mut m = Matrix3::zeros();
            let mut rhs = Vector3::zeros();
            for (r, row) in a.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    m[(r, c)] = *value;
                }
                rhs[r] = b[r];
            }
            let x = m.lu().solve(&rhs)?;
            for (out, value) in solution.iter_mut().zip(x.iter()) {
                *out = *value;
            }
        }
        _ => return None,
    }
    if solution.iter().all(|c| c.is_finite()) {
        Some(solution)
    } else {
        None
    }
}
