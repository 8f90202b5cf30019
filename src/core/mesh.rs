//! Simplicial mesh container and input validation.
//!
//! A [`Mesh`] is an ordered sequence of vertex coordinates plus a set of
//! cells, each cell an ordered tuple of vertex indices (3 for triangles,
//! 4 for tetrahedra). Cell vertex order encodes orientation: every cell
//! must be positively oriented (counter-clockwise in 2D), and that
//! orientation is preserved by all operations in this crate.
//!
//! Construction validates the full set of mesh invariants up front;
//! downstream components may assume they hold.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::geometry::measures::signed_measure;
use crate::geometry::point::Point;
use crate::geometry::quality::cell_points;

/// Vertex indices of one cell.
///
/// Holds exactly `D + 1` indices for a cell in dimension `D`. An inline
/// buffer of 4 covers both triangles and tetrahedra without allocation.
pub type CellVertices = SmallVec<[usize; 4]>;

/// Errors detected while validating an input mesh.
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum InvalidMeshError {
    /// The spatial dimension is not supported.
    #[error("unsupported dimension {dimension}; only 2 and 3 are supported")]
    UnsupportedDimension {
        /// Spatial dimension.
        dimension: usize,
    },
    /// The mesh has no vertices or no cells.
    #[error("mesh must contain at least one cell and its vertices")]
    Empty,
    /// A cell has the wrong number of vertex indices.
    #[error("cell {cell} has {found} vertices, expected {expected}")]
    WrongCellArity {
        /// Offending cell index.
        cell: usize,
        /// Number of indices found.
        found: usize,
        /// Required number of indices (`D + 1`).
        expected: usize,
    },
    /// A cell references a vertex index outside the coordinate array.
    #[error("cell {cell} references vertex {index}, but only {vertex_count} vertices exist")]
    DanglingIndex {
        /// Offending cell index.
        cell: usize,
        /// Out-of-range vertex index.
        index: usize,
        /// Number of vertices in the mesh.
        vertex_count: usize,
    },
    /// A cell references the same vertex more than once.
    #[error("cell {cell} references a vertex more than once")]
    DuplicateVertex {
        /// Offending cell index.
        cell: usize,
    },
    /// A vertex coordinate is NaN or infinite.
    #[error("vertex {vertex} has a non-finite coordinate")]
    NonFiniteCoordinate {
        /// Offending vertex index.
        vertex: usize,
    },
    /// A cell has zero or negative signed measure.
    #[error("cell {cell} has non-positive signed measure {measure:e}")]
    DegenerateCell {
        /// Offending cell index.
        cell: usize,
        /// Signed measure of the cell.
        measure: f64,
    },
    /// A facet is shared by more than two cells.
    #[error("facet shared by {count} cells; a manifold mesh allows at most 2")]
    NonManifoldFacet {
        /// Number of cells sharing the facet.
        count: usize,
    },
}

/// A simplicial mesh: vertex coordinates plus cell connectivity.
///
/// # Examples
///
/// ```rust
/// use relaxmesh::core::mesh::Mesh;
/// use relaxmesh::geometry::point::Point;
/// use smallvec::smallvec;
///
/// // Unit square split along its diagonal.
/// let mesh = Mesh::new(
///     vec![
///         Point::new([0.0, 0.0]),
///         Point::new([1.0, 0.0]),
///         Point::new([1.0, 1.0]),
///         Point::new([0.0, 1.0]),
///     ],
///     vec![smallvec![0, 1, 2], smallvec![0, 2, 3]],
/// )
/// .unwrap();
/// assert_eq!(mesh.number_of_vertices(), 4);
/// assert_eq!(mesh.number_of_cells(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mesh<const D: usize> {
    points: Vec<Point<D>>,
    cells: Vec<CellVertices>,
}

impl<const D: usize> Mesh<D> {
    /// Creates a mesh after validating all structural and geometric
    /// invariants.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidMeshError`] for unsupported dimensions, empty
    /// input, wrong cell arity, dangling or duplicate indices, non-finite
    /// coordinates, and zero-measure or inverted cells.
    pub fn new(points: Vec<Point<D>>, cells: Vec<CellVertices>) -> Result<Self, InvalidMeshError> {
        validate_parts(&points, &cells)?;
        Ok(Self { points, cells })
    }

    /// Re-checks every construction invariant.
    ///
    /// Meshes built with [`Mesh::new`] always pass; this exists for
    /// meshes obtained through deserialization, which bypasses
    /// construction.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as [`InvalidMeshError`].
    pub fn is_valid(&self) -> Result<(), InvalidMeshError> {
        validate_parts(&self.points, &self.cells)
    }

    /// Vertex coordinates.
    #[must_use]
    pub fn points(&self) -> &[Point<D>] {
        &self.points
    }

    /// Mutable coordinate access for the engine's in-place updates.
    pub(crate) fn points_mut(&mut self) -> &mut [Point<D>] {
        &mut self.points
    }

    /// Simultaneous read access to coordinates and write access to
    /// connectivity, as the flip procedure needs.
    pub(crate) fn split_mut(&mut self) -> (&[Point<D>], &mut [CellVertices]) {
        (&self.points, &mut self.cells)
    }

    /// Cell connectivity.
    #[must_use]
    pub fn cells(&self) -> &[CellVertices] {
        &self.cells
    }

    /// Number of vertices.
    #[must_use]
    pub fn number_of_vertices(&self) -> usize {
        self.points.len()
    }

    /// Number of cells.
    #[must_use]
    pub fn number_of_cells(&self) -> usize {
        self.cells.len()
    }

    /// Consumes the mesh, returning coordinates and connectivity.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Point<D>>, Vec<CellVertices>) {
        (self.points, self.cells)
    }

    /// The set of distinct (undirected) edges, as ordered index pairs.
    #[must_use]
    pub fn unique_edges(&self) -> FxHashSet<(usize, usize)> {
        let mut edges = FxHashSet::default();
        for vertices in &self.cells {
            for (i, &a) in vertices.iter().enumerate() {
                for &b in &vertices[i + 1..] {
                    edges.insert(if a < b { (a, b) } else { (b, a) });
                }
            }
        }
        edges
    }

    /// Mean edge length over all distinct edges.
    ///
    /// Used as the characteristic length that scales the engine's
    /// displacement tolerance.
    #[must_use]
    pub fn characteristic_edge_length(&self) -> f64 {
        let edges = self.unique_edges();
        if edges.is_empty() {
            return 0.0;
        }
        let total: f64 = edges
            .iter()
            .map(|&(a, b)| self.points[a].distance(&self.points[b]))
            .sum();
        total / edges.len() as f64
    }
}

/// Validates coordinates and connectivity against all mesh invariants.
fn validate_parts<const D: usize>(
    points: &[Point<D>],
    cells: &[CellVertices],
) -> Result<(), InvalidMeshError> {
    if D != 2 && D != 3 {
        return Err(InvalidMeshError::UnsupportedDimension { dimension: D });
    }
    if points.is_empty() || cells.is_empty() {
        return Err(InvalidMeshError::Empty);
    }
    for (vertex, p) in points.iter().enumerate() {
        if !p.is_finite() {
            return Err(InvalidMeshError::NonFiniteCoordinate { vertex });
        }
    }
    for (cell, vertices) in cells.iter().enumerate() {
        if vertices.len() != D + 1 {
            return Err(InvalidMeshError::WrongCellArity {
                cell,
                found: vertices.len(),
                expected: D + 1,
            });
        }
        for &index in vertices {
            if index >= points.len() {
                return Err(InvalidMeshError::DanglingIndex {
                    cell,
                    index,
                    vertex_count: points.len(),
                });
            }
        }
        for (i, &a) in vertices.iter().enumerate() {
            if vertices[i + 1..].contains(&a) {
                return Err(InvalidMeshError::DuplicateVertex { cell });
            }
        }
        let pts = cell_points(points, vertices);
        let measure = signed_measure(&pts)
            .map_err(|_| InvalidMeshError::UnsupportedDimension { dimension: D })?;
        if measure <= 0.0 {
            return Err(InvalidMeshError::DegenerateCell { cell, measure });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use smallvec::smallvec;

    fn square_points() -> Vec<Point<2>> {
        vec![
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([1.0, 1.0]),
            Point::new([0.0, 1.0]),
        ]
    }

    #[test]
    fn valid_square_mesh() {
        let mesh = Mesh::new(square_points(), vec![smallvec![0, 1, 2], smallvec![0, 2, 3]]);
        assert!(mesh.is_ok());
    }

    #[test]
    fn dangling_index_is_rejected() {
        let err = Mesh::new(square_points(), vec![smallvec![0, 1, 7]]).unwrap_err();
        assert!(matches!(
            err,
            InvalidMeshError::DanglingIndex { cell: 0, index: 7, .. }
        ));
    }

    #[test]
    fn duplicate_vertex_is_rejected() {
        let err = Mesh::new(square_points(), vec![smallvec![0, 1, 1]]).unwrap_err();
        assert!(matches!(err, InvalidMeshError::DuplicateVertex { cell: 0 }));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let err = Mesh::new(square_points(), vec![smallvec![0, 1]]).unwrap_err();
        assert!(matches!(
            err,
            InvalidMeshError::WrongCellArity {
                cell: 0,
                found: 2,
                expected: 3
            }
        ));
    }

    #[test]
    fn inverted_cell_is_rejected() {
        let err = Mesh::new(square_points(), vec![smallvec![0, 2, 1]]).unwrap_err();
        assert!(matches!(err, InvalidMeshError::DegenerateCell { cell: 0, .. }));
    }

    #[test]
    fn collinear_cell_is_rejected() {
        let points = vec![
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([2.0, 0.0]),
        ];
        let err = Mesh::new(points, vec![smallvec![0, 1, 2]]).unwrap_err();
        assert!(matches!(err, InvalidMeshError::DegenerateCell { cell: 0, .. }));
    }

    #[test]
    fn non_finite_coordinate_is_rejected() {
        let mut points = square_points();
        points[3] = Point::new([f64::NAN, 1.0]);
        let err = Mesh::new(points, vec![smallvec![0, 1, 2]]).unwrap_err();
        assert!(matches!(
            err,
            InvalidMeshError::NonFiniteCoordinate { vertex: 3 }
        ));
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = Mesh::<2>::new(Vec::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, InvalidMeshError::Empty));
    }

    #[test]
    fn valid_tetrahedron_mesh() {
        let mesh = Mesh::new(
            vec![
                Point::new([0.0, 0.0, 0.0]),
                Point::new([1.0, 0.0, 0.0]),
                Point::new([0.0, 1.0, 0.0]),
                Point::new([0.0, 0.0, 1.0]),
            ],
            vec![smallvec![0, 1, 2, 3]],
        );
        assert!(mesh.is_ok());
    }

    #[test]
    fn unique_edges_and_characteristic_length() {
        let mesh = Mesh::new(square_points(), vec![smallvec![0, 1, 2], smallvec![0, 2, 3]])
            .unwrap();
        let edges = mesh.unique_edges();
        // 4 boundary edges + 1 diagonal.
        assert_eq!(edges.len(), 5);
        let expected = (4.0 + 2.0f64.sqrt()) / 5.0;
        assert_relative_eq!(mesh.characteristic_edge_length(), expected, epsilon = 1e-12);
    }
}
