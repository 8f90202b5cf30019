//! Per-cell shape quality and mesh-wide quality snapshots.
//!
//! The quality of a cell is the normalized radius ratio
//! `D * inradius / circumradius`, which lies in `(0, 1]` and equals 1.0
//! exactly for a regular simplex (equilateral triangle, regular
//! tetrahedron). Sliver and needle cells score near zero.
//!
//! [`QualitySnapshot`] evaluates the whole mesh and is recomputed by the
//! relaxation engine after every committed step; [`CellGeometry`] caches
//! the per-cell quantities the smoothing objectives consume.

use serde::Serialize;
use smallvec::SmallVec;
use thiserror::Error;

use crate::core::mesh::CellVertices;
use crate::geometry::measures::{
    barycenter, circumcenter, inradius, signed_measure, GeometryError,
};
use crate::geometry::point::Point;

/// A step or flip produced (or was asked to evaluate) a cell with zero or
/// negative signed measure.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("cell {cell} is degenerate: {source}")]
pub struct DegenerateCellError {
    /// Index of the offending cell.
    pub cell: usize,
    /// Underlying geometric failure.
    #[source]
    pub source: GeometryError,
}

/// Gathers the corner points of one cell.
pub(crate) fn cell_points<const D: usize>(
    points: &[Point<D>],
    cell: &CellVertices,
) -> SmallVec<[Point<D>; 4]> {
    cell.iter().map(|&v| points[v]).collect()
}

/// Normalized radius-ratio quality of a single positively oriented cell.
///
/// # Errors
///
/// Returns [`GeometryError::DegenerateSimplex`] when the signed measure is
/// zero or negative (collapsed or inverted cell), or when the inradius /
/// circumradius computation breaks down.
///
/// # Examples
///
/// ```rust
/// use relaxmesh::geometry::point::Point;
/// use relaxmesh::geometry::quality::cell_quality;
///
/// let equilateral = [
///     Point::new([0.0, 0.0]),
///     Point::new([1.0, 0.0]),
///     Point::new([0.5, 0.75f64.sqrt()]),
/// ];
/// let q = cell_quality(&equilateral).unwrap();
/// assert!((q - 1.0).abs() < 1e-12);
/// ```
pub fn cell_quality<const D: usize>(points: &[Point<D>]) -> Result<f64, GeometryError> {
    let measure = signed_measure(points)?;
    if measure <= 0.0 {
        return Err(GeometryError::DegenerateSimplex { measure });
    }
    let r = inradius(points)?;
    let big_r = crate::geometry::measures::circumradius(points)?;
    if big_r <= f64::MIN_POSITIVE {
        return Err(GeometryError::DegenerateSimplex { measure });
    }
    // D * r / R == 1 for the regular simplex; clamp against roundoff.
    Ok((D as f64 * r / big_r).min(1.0))
}

/// Per-cell quality values plus mesh-wide aggregates.
///
/// Transient: recomputed every iteration, never persisted across runs.
#[derive(Clone, Debug, Serialize)]
pub struct QualitySnapshot {
    per_cell: Vec<f64>,
    min: f64,
    mean: f64,
}

impl QualitySnapshot {
    /// Evaluates every cell of the mesh.
    ///
    /// # Errors
    ///
    /// Returns [`DegenerateCellError`] naming the first cell whose signed
    /// measure is zero or negative. This is the signal the relaxation
    /// engine uses to detect an overshooting step.
    pub fn compute<const D: usize>(
        points: &[Point<D>],
        cells: &[CellVertices],
    ) -> Result<Self, DegenerateCellError> {
        let mut per_cell = Vec::with_capacity(cells.len());
        let mut min = f64::INFINITY;
        let mut sum = 0.0;
        for (cell, vertices) in cells.iter().enumerate() {
            let pts = cell_points(points, vertices);
            let q = cell_quality(&pts).map_err(|source| DegenerateCellError { cell, source })?;
            min = min.min(q);
            sum += q;
            per_cell.push(q);
        }
        let mean = if per_cell.is_empty() {
            0.0
        } else {
            sum / per_cell.len() as f64
        };
        Ok(Self {
            per_cell,
            min,
            mean,
        })
    }

    /// Per-cell quality values, indexed like the mesh cells.
    #[must_use]
    pub fn per_cell(&self) -> &[f64] {
        &self.per_cell
    }

    /// Worst cell quality in the mesh.
    #[must_use]
    pub const fn min(&self) -> f64 {
        self.min
    }

    /// Mean cell quality over the mesh.
    #[must_use]
    pub const fn mean(&self) -> f64 {
        self.mean
    }
}

/// Per-cell geometric quantities consumed by the smoothing objectives.
///
/// Computed once per iteration from the current coordinates; all vectors
/// are indexed like the mesh cells.
#[derive(Clone, Debug)]
pub struct CellGeometry<const D: usize> {
    /// Positive cell measures (areas in 2D, volumes in 3D).
    pub volumes: Vec<f64>,
    /// Cell barycenters.
    pub barycenters: Vec<Point<D>>,
    /// Cell circumcenters.
    pub circumcenters: Vec<Point<D>>,
    /// Cell inradii.
    pub inradii: Vec<f64>,
}

impl<const D: usize> CellGeometry<D> {
    /// Evaluates all per-cell quantities.
    ///
    /// # Errors
    ///
    /// Returns [`DegenerateCellError`] for the first cell with a
    /// non-positive signed measure or an uncomputable circumcenter.
    pub fn compute(
        points: &[Point<D>],
        cells: &[CellVertices],
    ) -> Result<Self, DegenerateCellError> {
        let n = cells.len();
        let mut volumes = Vec::with_capacity(n);
        let mut barycenters = Vec::with_capacity(n);
        let mut circumcenters = Vec::with_capacity(n);
        let mut inradii = Vec::with_capacity(n);
        for (cell, vertices) in cells.iter().enumerate() {
            let pts = cell_points(points, vertices);
            let wrap = |source| DegenerateCellError { cell, source };
            let measure = signed_measure(&pts).map_err(wrap)?;
            if measure <= 0.0 {
                return Err(DegenerateCellError {
                    cell,
                    source: GeometryError::DegenerateSimplex { measure },
                });
            }
            volumes.push(measure);
            barycenters.push(barycenter(&pts).map_err(wrap)?);
            circumcenters.push(circumcenter(&pts).map_err(wrap)?);
            inradii.push(inradius(&pts).map_err(wrap)?);
        }
        Ok(Self {
            volumes,
            barycenters,
            circumcenters,
            inradii,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use smallvec::smallvec;

    fn equilateral() -> [Point<2>; 3] {
        [
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([0.5, 0.75f64.sqrt()]),
        ]
    }

    #[test]
    fn equilateral_triangle_has_unit_quality() {
        assert_relative_eq!(cell_quality(&equilateral()).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn regular_tetrahedron_has_unit_quality() {
        let pts = [
            Point::new([0.0, 0.0, 0.0]),
            Point::new([1.0, 0.0, 0.0]),
            Point::new([0.5, 0.75f64.sqrt(), 0.0]),
            Point::new([0.5, (1.0f64 / 12.0).sqrt(), (2.0f64 / 3.0).sqrt()]),
        ];
        assert_relative_eq!(cell_quality(&pts).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn sliver_scores_low() {
        let sliver = [
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([0.5, 0.01]),
        ];
        let q = cell_quality(&sliver).unwrap();
        assert!(q < 0.1, "sliver quality {q} should be near zero");
    }

    #[test]
    fn inverted_cell_is_degenerate() {
        let tri = equilateral();
        let inverted = [tri[0], tri[2], tri[1]];
        assert!(matches!(
            cell_quality(&inverted),
            Err(GeometryError::DegenerateSimplex { .. })
        ));
    }

    #[test]
    fn snapshot_aggregates() {
        let points = vec![
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([1.0, 1.0]),
            Point::new([0.0, 1.0]),
        ];
        let cells: Vec<CellVertices> = vec![smallvec![0, 1, 2], smallvec![0, 2, 3]];
        let snapshot = QualitySnapshot::compute(&points, &cells).unwrap();
        assert_eq!(snapshot.per_cell().len(), 2);
        // Two congruent right isoceles triangles.
        assert_relative_eq!(snapshot.per_cell()[0], snapshot.per_cell()[1]);
        assert_relative_eq!(snapshot.min(), snapshot.mean());
        assert!(snapshot.min() > 0.0 && snapshot.min() < 1.0);
    }

    #[test]
    fn snapshot_reports_offending_cell() {
        let points = vec![
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([0.5, 1.0]),
        ];
        // Second cell is inverted.
        let cells: Vec<CellVertices> = vec![smallvec![0, 1, 2], smallvec![0, 2, 1]];
        let err = QualitySnapshot::compute(&points, &cells).unwrap_err();
        assert_eq!(err.cell, 1);
    }

    #[test]
    fn cell_geometry_matches_direct_measures() {
        let points = vec![
            Point::new([0.0, 0.0]),
            Point::new([2.0, 0.0]),
            Point::new([0.0, 2.0]),
        ];
        let cells: Vec<CellVertices> = vec![smallvec![0, 1, 2]];
        let geometry = CellGeometry::compute(&points, &cells).unwrap();
        assert_relative_eq!(geometry.volumes[0], 2.0);
        assert_relative_eq!(geometry.circumcenters[0].coords()[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(geometry.circumcenters[0].coords()[1], 1.0, epsilon = 1e-12);
    }
}
