//! Boundary classification from cell connectivity.
//!
//! A facet (edge in 2D, triangular face in 3D) is on the boundary when it
//! belongs to exactly one cell; a vertex is a boundary vertex when it lies
//! on a boundary facet. The boundary vertex *set* is invariant under edge
//! flips, so the marker is computed once at engine start and reused for
//! the whole run.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::core::mesh::{InvalidMeshError, Mesh};

/// Canonical (sorted) facet key: `D` vertex indices.
type FacetKey = SmallVec<[usize; 3]>;

/// Per-vertex boundary classification plus the boundary facets themselves.
///
/// The facet list and the vertex → incident-facet adjacency exist for the
/// curved boundary mode, which projects displaced boundary vertices back
/// onto their incident boundary facets.
#[derive(Clone, Debug)]
pub struct BoundaryMarker {
    is_boundary: Vec<bool>,
    boundary_facets: Vec<FacetKey>,
    incident_facets: Vec<SmallVec<[usize; 4]>>,
}

impl BoundaryMarker {
    /// Classifies every vertex of the mesh by counting facet incidences.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidMeshError::NonManifoldFacet`] if any facet is
    /// shared by more than two cells.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use relaxmesh::core::boundary::BoundaryMarker;
    /// use relaxmesh::core::mesh::Mesh;
    /// use relaxmesh::geometry::point::Point;
    /// use smallvec::smallvec;
    ///
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
    ///
    /// let marker = BoundaryMarker::classify(&mesh).unwrap();
    /// // All four square corners are boundary vertices.
    /// assert_eq!(marker.boundary_vertex_count(), 4);
    /// ```
    pub fn classify<const D: usize>(mesh: &Mesh<D>) -> Result<Self, InvalidMeshError> {
        let mut facet_counts: FxHashMap<FacetKey, usize> = FxHashMap::default();
        for vertices in mesh.cells() {
            for omit in 0..vertices.len() {
                let mut facet: FacetKey = vertices
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != omit)
                    .map(|(_, &v)| v)
                    .collect();
                facet.sort_unstable();
                *facet_counts.entry(facet).or_insert(0) += 1;
            }
        }

        let mut is_boundary = vec![false; mesh.number_of_vertices()];
        let mut boundary_facets = Vec::new();
        let mut incident_facets = vec![SmallVec::new(); mesh.number_of_vertices()];
        for (facet, count) in facet_counts {
            match count {
                1 => {
                    let facet_id = boundary_facets.len();
                    for &v in &facet {
                        is_boundary[v] = true;
                        incident_facets[v].push(facet_id);
                    }
                    boundary_facets.push(facet);
                }
                2 => {}
                count => return Err(InvalidMeshError::NonManifoldFacet { count }),
            }
        }

        Ok(Self {
            is_boundary,
            boundary_facets,
            incident_facets,
        })
    }

    /// Whether `vertex` lies on the boundary.
    #[inline]
    #[must_use]
    pub fn is_boundary(&self, vertex: usize) -> bool {
        self.is_boundary[vertex]
    }

    /// Number of boundary vertices.
    #[must_use]
    pub fn boundary_vertex_count(&self) -> usize {
        self.is_boundary.iter().filter(|&&b| b).count()
    }

    /// All boundary facets, each a sorted list of `D` vertex indices.
    #[must_use]
    pub fn boundary_facets(&self) -> &[FacetKey] {
        &self.boundary_facets
    }

    /// Boundary facets incident to `vertex` (empty for interior vertices).
    #[must_use]
    pub fn incident_facets(&self, vertex: usize) -> &[usize] {
        &self.incident_facets[vertex]
    }

    /// Number of boundary vertices a cell touches.
    #[must_use]
    pub fn boundary_vertices_in(&self, vertices: &[usize]) -> usize {
        vertices.iter().filter(|&&v| self.is_boundary[v]).count()
    }
}
