//! # relaxmesh
//!
//! Mesh smoothing for simplicial meshes: triangles in 2D, tetrahedra in
//! 3D. The crate improves cell shape quality by iteratively relocating
//! interior vertices and, for triangular meshes, re-triangulating
//! locally with Delaunay edge flips — without moving boundary vertices
//! or changing the domain shape.
//!
//! # Features
//!
//! - A family of smoothing objectives: Laplacian (plain and
//!   area-weighted), centroidal-patch, Lloyd/centroidal-Voronoi, and
//!   optimal-Delaunay variants, plus quasi-Newton accelerations with
//!   fixed-point fallback
//! - Work-queue driven Delaunay edge flips for triangular meshes
//! - A relaxation engine with damped retries, divergence detection, and
//!   cooperative cancellation through a per-iteration observer
//! - Flat (fixed) and curved (projecting) boundary treatment
//! - Serialization of meshes and configurations with [serde](https://serde.rs)
//!
//! # Basic Usage
//!
//! ```rust
//! use relaxmesh::prelude::*;
//! use smallvec::smallvec;
//!
//! // A hexagonal fan with its interior vertex pushed off-center.
//! let mut points: Vec<Point<2>> = (0..6)
//!     .map(|k| {
//!         let angle = f64::from(k) * std::f64::consts::FRAC_PI_3;
//!         Point::new([angle.cos(), angle.sin()])
//!     })
//!     .collect();
//! points.push(Point::new([0.3, -0.2]));
//! let cells = (0..6).map(|k| smallvec![k, (k + 1) % 6, 6]).collect();
//! let mesh = Mesh::new(points, cells).unwrap();
//!
//! let options = RelaxOptionsBuilder::default()
//!     .method(SmoothingMethod::Laplace)
//!     .build()
//!     .unwrap();
//! let outcome = relax(&mesh, &options).unwrap();
//!
//! assert_eq!(outcome.state, RelaxState::Converged);
//! // Boundary vertices have not moved at all.
//! for v in 0..6 {
//!     assert_eq!(outcome.mesh.points()[v], mesh.points()[v]);
//! }
//! // The interior vertex has relaxed into the centroid of its
//! // neighbors.
//! assert!(outcome.mesh.points()[6].coords()[0].abs() < 1e-6);
//! ```
//!
//! # Engine Invariants
//!
//! The relaxation engine guarantees, for every run:
//!
//! - **Boundary invariance** — under [`BoundaryMode::Flat`](core::constraint::BoundaryMode)
//!   boundary coordinates are bit-for-bit identical before and after.
//! - **No inversion** — every committed step leaves all signed cell
//!   measures strictly positive; an overshooting step is halved and
//!   retried, never committed.
//! - **Last-valid-wins** — on divergence the engine returns the state
//!   from before quality started decreasing rather than the latest,
//!   possibly worse, one.
//! - **Observer cadence** — the optional observer runs exactly once per
//!   committed iteration and can cancel the run at that boundary.
//!
//! Terminal outcomes (`Converged`, `MaxIterationsReached`, `Diverged`,
//! `Cancelled`) are reported in
//! [`RelaxOutcome`](core::engine::RelaxOutcome), not as errors; only
//! invalid input meshes and out-of-range options fail construction, see
//! [`RelaxError`](core::engine::RelaxError).

#![forbid(unsafe_code)]

/// Mesh containers, boundary handling, the objective family, edge
/// flips, and the relaxation engine.
pub mod core {
    pub mod boundary;
    pub mod constraint;
    pub mod engine;
    pub mod flips;
    pub mod mesh;
    pub mod objective;
    pub use boundary::*;
    pub use constraint::*;
    pub use engine::*;
    pub use flips::*;
    pub use mesh::*;
    pub use objective::*;
}

/// Geometric primitives: points, planar predicates, simplex measures,
/// and quality metrics.
pub mod geometry {
    pub mod measures;
    pub mod point;
    pub mod predicates;
    pub mod quality;
    pub use measures::*;
    pub use point::*;
    pub use predicates::*;
    pub use quality::*;
}

/// Re-exports of the commonly used types and entry points.
pub mod prelude {
    pub use crate::core::{
        boundary::BoundaryMarker,
        constraint::BoundaryMode,
        engine::{
            relax, IterationReport, RelaxError, RelaxOptions, RelaxOptionsBuilder, RelaxOutcome,
            RelaxState, RelaxationEngine,
        },
        flips::{default_flip_limit, flip_until_locally_delaunay, FlipStats},
        mesh::{CellVertices, InvalidMeshError, Mesh},
        objective::{ObjectiveFunction, SmoothingMethod},
    };
    pub use crate::geometry::{
        measures::GeometryError,
        point::Point,
        quality::{CellGeometry, DegenerateCellError, QualitySnapshot},
    };
}
