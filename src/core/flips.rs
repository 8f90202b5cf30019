//! Delaunay edge flips for triangular meshes.
//!
//! After vertices move, interior edges can stop being locally Delaunay:
//! the opposite vertex of one adjacent triangle ends up inside the
//! circumcircle of the other. This module restores local optimality by
//! swapping the diagonal of the two triangles adjacent to each violating
//! edge, driven by a work queue rather than repeated full passes — each
//! flip only re-enqueues the four edges of the affected quadrilateral.
//!
//! Orientation is preserved: a flip that would produce a zero-area or
//! inverted triangle is rejected and the edge left alone. Boundary edges
//! (one incident cell) are never candidates. A flip budget guards
//! against cycling on pathological near-cocircular configurations;
//! exhausting it is reported in [`FlipStats`], not an error.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;

use crate::core::mesh::CellVertices;
use crate::geometry::point::Point;
use crate::geometry::predicates::{
    in_circle, in_circle_tolerance, orientation, orientation_tolerance,
};

/// Canonical (ordered) undirected edge.
type EdgeKey = (usize, usize);

/// Edge → incident cell indices.
type EdgeAdjacency = FxHashMap<EdgeKey, SmallVec<[usize; 2]>>;

#[inline]
fn edge_key(a: usize, b: usize) -> EdgeKey {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Counters describing one run of the flip procedure.
///
/// # Examples
///
/// ```rust
/// use relaxmesh::core::flips::FlipStats;
///
/// let stats = FlipStats::default();
/// assert_eq!(stats.flips_performed, 0);
/// assert!(!stats.hit_flip_limit);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct FlipStats {
    /// Number of queue entries tested against the in-circle predicate.
    pub edges_checked: usize,
    /// Number of diagonal swaps performed.
    pub flips_performed: usize,
    /// Number of violating edges left alone because the swap would have
    /// produced a non-positively-oriented triangle.
    pub rejected_flips: usize,
    /// Maximum work-queue length observed.
    pub max_queue_len: usize,
    /// Whether the run stopped at the flip budget instead of reaching a
    /// flip-free state.
    pub hit_flip_limit: bool,
}

impl FlipStats {
    /// Folds the counters of a later run into this one.
    pub fn merge(&mut self, other: &Self) {
        self.edges_checked += other.edges_checked;
        self.flips_performed += other.flips_performed;
        self.rejected_flips += other.rejected_flips;
        self.max_queue_len = self.max_queue_len.max(other.max_queue_len);
        self.hit_flip_limit |= other.hit_flip_limit;
    }
}

/// Default flip budget for a mesh with `cell_count` cells.
#[must_use]
pub const fn default_flip_limit(cell_count: usize) -> usize {
    10 * cell_count + 100
}

/// Flips interior edges until every edge is locally Delaunay or the flip
/// budget is exhausted.
///
/// Connectivity is mutated in place; the number of cells never changes.
/// For `D != 2` this is a no-op returning empty stats (3D support is
/// vertex relocation only).
///
/// # Examples
///
/// ```rust
/// use relaxmesh::core::flips::{default_flip_limit, flip_until_locally_delaunay};
/// use relaxmesh::core::mesh::CellVertices;
/// use relaxmesh::geometry::point::Point;
/// use smallvec::smallvec;
///
/// // Tall upper triangle, shallow lower vertex: the shared horizontal
/// // edge is not locally Delaunay.
/// let points = vec![
///     Point::new([0.0, 0.0]),
///     Point::new([1.0, 0.0]),
///     Point::new([0.5, 1.5]),
///     Point::new([0.5, -0.1]),
/// ];
/// let mut cells: Vec<CellVertices> = vec![smallvec![0, 1, 2], smallvec![1, 0, 3]];
/// let stats = flip_until_locally_delaunay(&points, &mut cells, default_flip_limit(2));
/// assert_eq!(stats.flips_performed, 1);
/// ```
pub fn flip_until_locally_delaunay<const D: usize>(
    points: &[Point<D>],
    cells: &mut [CellVertices],
    flip_limit: usize,
) -> FlipStats {
    let mut stats = FlipStats::default();
    if D != 2 {
        return stats;
    }

    let mut adjacency = build_edge_adjacency(cells);

    // Deterministic seeding: every interior edge, in index order.
    let mut seeds: Vec<EdgeKey> = adjacency
        .iter()
        .filter(|(_, incident)| incident.len() == 2)
        .map(|(&edge, _)| edge)
        .collect();
    seeds.sort_unstable();

    let mut queue: VecDeque<EdgeKey> = seeds.into_iter().collect();
    let mut in_queue: FxHashSet<EdgeKey> = queue.iter().copied().collect();
    stats.max_queue_len = queue.len();

    while let Some(edge) = queue.pop_front() {
        in_queue.remove(&edge);

        let Some(incident) = adjacency.get(&edge) else {
            continue;
        };
        if incident.len() != 2 {
            continue;
        }
        let (t1, t2) = (incident[0], incident[1]);
        stats.edges_checked += 1;

        // Triangle t1 as (c, a, b) with (a, b) the shared edge; d is the
        // opposite vertex in t2.
        let Some(apex_index) = cells[t1]
            .iter()
            .position(|&v| v != edge.0 && v != edge.1)
        else {
            continue;
        };
        let c = cells[t1][apex_index];
        let a = cells[t1][(apex_index + 1) % 3];
        let b = cells[t1][(apex_index + 2) % 3];
        let Some(&d) = cells[t2].iter().find(|&&v| v != a && v != b) else {
            continue;
        };

        let pc = points[c].xy();
        let pa = points[a].xy();
        let pb = points[b].xy();
        let pd = points[d].xy();

        // (c, a, b) is counter-clockwise, so a positive determinant means
        // d lies strictly inside its circumcircle.
        let det = in_circle(pc, pa, pb, pd);
        if det <= in_circle_tolerance(pc, pa, pb, pd) {
            continue;
        }

        // The swap replaces (c,a,b) and (d,b,a) with (c,a,d) and (c,d,b).
        let tol = orientation_tolerance(pc, pa, pd).max(orientation_tolerance(pc, pd, pb));
        if orientation(pc, pa, pd) <= tol || orientation(pc, pd, pb) <= tol {
            stats.rejected_flips += 1;
            continue;
        }
        // The new diagonal must not already exist elsewhere in the mesh.
        if adjacency.contains_key(&edge_key(c, d)) {
            stats.rejected_flips += 1;
            continue;
        }

        if stats.flips_performed == flip_limit {
            stats.hit_flip_limit = true;
            tracing::warn!(
                flips = stats.flips_performed,
                "flip budget exhausted before reaching a locally Delaunay state"
            );
            break;
        }

        cells[t1] = CellVertices::from_slice(&[c, a, d]);
        cells[t2] = CellVertices::from_slice(&[c, d, b]);
        stats.flips_performed += 1;

        adjacency.remove(&edge);
        adjacency
            .entry(edge_key(c, d))
            .or_default()
            .extend_from_slice(&[t1, t2]);
        // Edge (a, d) moves from t2 into t1; edge (c, b) from t1 into t2.
        reassign_edge(&mut adjacency, edge_key(a, d), t2, t1);
        reassign_edge(&mut adjacency, edge_key(c, b), t1, t2);

        for outer in [edge_key(c, a), edge_key(a, d), edge_key(d, b), edge_key(b, c)] {
            let interior = adjacency.get(&outer).is_some_and(|inc| inc.len() == 2);
            if interior && in_queue.insert(outer) {
                queue.push_back(outer);
            }
        }
        stats.max_queue_len = stats.max_queue_len.max(queue.len());
    }

    stats
}

fn build_edge_adjacency(cells: &[CellVertices]) -> EdgeAdjacency {
    let mut adjacency = EdgeAdjacency::default();
    for (cell, vertices) in cells.iter().enumerate() {
        for (i, &a) in vertices.iter().enumerate() {
            for &b in &vertices[i + 1..] {
                adjacency.entry(edge_key(a, b)).or_default().push(cell);
            }
        }
    }
    adjacency
}

/// Replaces `old_cell` with `new_cell` in the incidence list of `edge`.
fn reassign_edge(adjacency: &mut EdgeAdjacency, edge: EdgeKey, old_cell: usize, new_cell: usize) {
    if let Some(incident) = adjacency.get_mut(&edge) {
        for cell in incident.iter_mut() {
            if *cell == old_cell {
                *cell = new_cell;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::measures::signed_measure;
    use crate::geometry::quality::cell_points;
    use smallvec::smallvec;

    /// Two triangles over the edge (0, 1): a tall one above and a shallow
    /// opposite vertex below, which lies inside the tall one's
    /// circumcircle.
    fn violating_pair() -> (Vec<Point<2>>, Vec<CellVertices>) {
        let points = vec![
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([0.5, 1.5]),
            Point::new([0.5, -0.1]),
        ];
        let cells: Vec<CellVertices> = vec![smallvec![0, 1, 2], smallvec![1, 0, 3]];
        (points, cells)
    }

    fn all_positively_oriented(points: &[Point<2>], cells: &[CellVertices]) -> bool {
        cells
            .iter()
            .all(|c| signed_measure(&cell_points(points, c)).unwrap() > 0.0)
    }

    fn has_edge(cells: &[CellVertices], a: usize, b: usize) -> bool {
        cells.iter().any(|c| c.contains(&a) && c.contains(&b))
    }

    #[test]
    fn forced_flip_swaps_the_diagonal() {
        let (points, mut cells) = violating_pair();
        let stats = flip_until_locally_delaunay(&points, &mut cells, default_flip_limit(2));
        assert_eq!(stats.flips_performed, 1);
        assert!(!stats.hit_flip_limit);
        assert!(has_edge(&cells, 2, 3), "new diagonal (2,3) expected");
        assert!(!has_edge(&cells, 0, 1), "old diagonal (0,1) should be gone");
        assert!(all_positively_oriented(&points, &cells));

        // Both new triangles pass the local optimality test against each
        // other: a second run performs zero flips.
        let again = flip_until_locally_delaunay(&points, &mut cells, default_flip_limit(2));
        assert_eq!(again.flips_performed, 0);
    }

    #[test]
    fn flip_is_idempotent() {
        let (points, mut cells) = violating_pair();
        flip_until_locally_delaunay(&points, &mut cells, default_flip_limit(2));
        let before = cells.clone();
        let stats = flip_until_locally_delaunay(&points, &mut cells, default_flip_limit(2));
        assert_eq!(stats.flips_performed, 0);
        assert_eq!(cells, before);
    }

    #[test]
    fn locally_optimal_pair_is_left_alone() {
        // Tall rhombus split along its short diagonal: optimal.
        let points = vec![
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([0.5, 0.9]),
            Point::new([0.5, -0.9]),
        ];
        let mut cells: Vec<CellVertices> = vec![smallvec![0, 1, 2], smallvec![1, 0, 3]];
        let stats = flip_until_locally_delaunay(&points, &mut cells, default_flip_limit(2));
        assert_eq!(stats.flips_performed, 0);
        // Only the interior edge is ever examined; the four boundary
        // edges are never candidates.
        assert_eq!(stats.edges_checked, 1);
    }

    #[test]
    fn flip_budget_is_honored_and_reported() {
        let (points, mut cells) = violating_pair();
        let original = cells.clone();
        let stats = flip_until_locally_delaunay(&points, &mut cells, 0);
        assert!(stats.hit_flip_limit);
        assert_eq!(stats.flips_performed, 0);
        assert_eq!(cells, original);
    }

    #[test]
    fn three_dimensional_meshes_are_untouched() {
        let points = vec![
            Point::new([0.0, 0.0, 0.0]),
            Point::new([1.0, 0.0, 0.0]),
            Point::new([0.0, 1.0, 0.0]),
            Point::new([0.0, 0.0, 1.0]),
        ];
        let mut cells: Vec<CellVertices> = vec![smallvec![0, 1, 2, 3]];
        let stats = flip_until_locally_delaunay(&points, &mut cells, 100);
        assert_eq!(stats.edges_checked, 0);
        assert_eq!(stats.flips_performed, 0);
    }

    #[test]
    fn cascading_flips_settle_in_a_fan() {
        // A fan of four triangles around vertex 4 with a deliberately
        // bad triangulation of the outer quad strip.
        let points = vec![
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.1]),
            Point::new([2.0, 0.0]),
            Point::new([1.0, 2.2]),
            Point::new([1.0, 0.9]),
        ];
        let mut cells: Vec<CellVertices> = vec![
            smallvec![0, 1, 4],
            smallvec![1, 2, 4],
            smallvec![2, 3, 4],
            smallvec![3, 0, 4],
        ];
        let stats = flip_until_locally_delaunay(&points, &mut cells, default_flip_limit(4));
        assert!(!stats.hit_flip_limit);
        assert!(all_positively_oriented(&points, &cells));
        let again = flip_until_locally_delaunay(&points, &mut cells, default_flip_limit(4));
        assert_eq!(again.flips_performed, 0);
    }

    #[test]
    fn merge_accumulates_counters() {
        let mut total = FlipStats::default();
        total.merge(&FlipStats {
            edges_checked: 3,
            flips_performed: 1,
            rejected_flips: 0,
            max_queue_len: 5,
            hit_flip_limit: false,
        });
        total.merge(&FlipStats {
            edges_checked: 2,
            flips_performed: 2,
            rejected_flips: 1,
            max_queue_len: 4,
            hit_flip_limit: true,
        });
        assert_eq!(total.edges_checked, 5);
        assert_eq!(total.flips_performed, 3);
        assert_eq!(total.rejected_flips, 1);
        assert_eq!(total.max_queue_len, 5);
        assert!(total.hit_flip_limit);
    }
}
