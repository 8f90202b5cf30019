//! The relaxation engine: orchestrates the smoothing loop.
//!
//! One engine run moves through the states `Initialized → Iterating →
//! {Converged, MaxIterationsReached, Diverged, Cancelled}`. Each
//! iteration computes objective displacements, damps them, constrains
//! boundary vertices, clamps the step so no triangle can collapse,
//! applies the step, restores local Delaunay optimality (2D), and
//! re-evaluates the quality snapshot. A step that still produces a
//! degenerate cell is halved and retried a bounded number of times; the
//! engine never commits a mesh containing a degenerate cell and, on
//! divergence, returns the last state from before quality started
//! decreasing.

use std::ops::ControlFlow;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::boundary::BoundaryMarker;
use crate::core::constraint::{constrain_displacements, BoundaryMode};
use crate::core::flips::{default_flip_limit, flip_until_locally_delaunay, FlipStats};
use crate::core::mesh::{CellVertices, InvalidMeshError, Mesh};
use crate::core::objective::{ObjectiveFunction, SmoothingMethod};
use crate::geometry::measures::GeometryError;
use crate::geometry::point::{norm, scale_in_place};
use crate::geometry::quality::{CellGeometry, DegenerateCellError, QualitySnapshot};

/// Mean-quality changes below this magnitude are treated as noise by the
/// divergence detector.
const QUALITY_DECREASE_EPSILON: f64 = 1e-14;

/// Configuration of a relaxation run.
///
/// Use [`RelaxOptionsBuilder`] to construct a configuration
/// field-by-field; unset fields take the documented defaults.
///
/// # Examples
///
/// ```rust
/// use relaxmesh::core::engine::RelaxOptionsBuilder;
/// use relaxmesh::core::objective::SmoothingMethod;
///
/// let options = RelaxOptionsBuilder::default()
///     .method(SmoothingMethod::Laplace)
///     .max_iterations(50usize)
///     .damping(0.9)
///     .build()
///     .unwrap();
/// assert_eq!(options.method, SmoothingMethod::Laplace);
/// assert_eq!(options.tolerance, 1e-10);
/// ```
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(default)]
pub struct RelaxOptions {
    /// Smoothing objective to run.
    pub method: SmoothingMethod,
    /// Convergence tolerance on the maximum per-vertex displacement,
    /// relative to the characteristic (mean) edge length of the input.
    pub tolerance: f64,
    /// Iteration ceiling.
    pub max_iterations: usize,
    /// Global damping factor applied to every displacement. `1.0` is the
    /// undamped step; values above `1.0` over-relax.
    pub damping: f64,
    /// Boundary treatment.
    pub boundary_mode: BoundaryMode,
    /// Emit info-level progress events instead of debug-level ones.
    pub verbose: bool,
    /// How often a degenerate step is halved and retried before the run
    /// gives up as diverged.
    pub max_step_retries: usize,
    /// How many consecutive mean-quality decreases are tolerated before
    /// the run is declared diverged.
    pub divergence_patience: usize,
    /// Optional second convergence criterion: stop when the relative
    /// change of mean quality drops below this. `0.0` disables it.
    pub quality_tolerance: f64,
    /// Flip budget per flip pass; `None` scales with the cell count.
    pub flip_limit: Option<usize>,
}

impl Default for RelaxOptions {
    fn default() -> Self {
        Self {
            method: SmoothingMethod::default(),
            tolerance: 1e-10,
            max_iterations: 100,
            damping: 1.0,
            boundary_mode: BoundaryMode::default(),
            verbose: false,
            max_step_retries: 5,
            divergence_patience: 5,
            quality_tolerance: 0.0,
            flip_limit: None,
        }
    }
}

impl RelaxOptions {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`RelaxError::InvalidOption`] for out-of-range values.
    pub fn validate(&self) -> Result<(), RelaxError> {
        if !self.damping.is_finite() || self.damping <= 0.0 || self.damping >= 2.0 {
            return Err(RelaxError::InvalidOption {
                option: "damping",
                message: format!("{} is outside (0, 2)", self.damping),
            });
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(RelaxError::InvalidOption {
                option: "tolerance",
                message: format!("{} must be finite and non-negative", self.tolerance),
            });
        }
        if self.max_iterations == 0 {
            return Err(RelaxError::InvalidOption {
                option: "max_iterations",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Errors raised while setting up a relaxation run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RelaxError {
    /// The input mesh violates a construction invariant.
    #[error(transparent)]
    InvalidMesh(#[from] InvalidMeshError),
    /// A configuration value is out of range.
    #[error("invalid option `{option}`: {message}")]
    InvalidOption {
        /// Name of the offending option.
        option: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Engine life-cycle states. The last four are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RelaxState {
    /// Input validated, snapshot and boundary marker computed.
    Initialized,
    /// The loop is running.
    Iterating,
    /// The displacement (or quality-change) tolerance was met.
    Converged,
    /// The iteration ceiling was hit before the tolerance; the result is
    /// still a valid mesh.
    MaxIterationsReached,
    /// Quality kept decreasing (or a step could not be repaired); the
    /// result is the best earlier state.
    Diverged,
    /// The observer requested a stop at an iteration boundary.
    Cancelled,
}

impl RelaxState {
    /// Whether this state ends a run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Initialized | Self::Iterating)
    }
}

/// Data handed to the per-iteration observer.
#[derive(Debug)]
pub struct IterationReport<'q> {
    /// 1-based iteration index.
    pub iteration: usize,
    /// Quality snapshot after the committed step.
    pub quality: &'q QualitySnapshot,
    /// Maximum per-vertex displacement applied this iteration.
    pub max_displacement: f64,
}

type BoxedObserver<'a> = Box<dyn FnMut(&IterationReport<'_>) -> ControlFlow<()> + 'a>;

/// The result of a relaxation run.
#[derive(Debug)]
pub struct RelaxOutcome<const D: usize> {
    /// The relaxed mesh (same boundary, same topology class).
    pub mesh: Mesh<D>,
    /// Terminal state of the run.
    pub state: RelaxState,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Final quality snapshot.
    pub quality: QualitySnapshot,
    /// Cumulative flip statistics over the whole run.
    pub flips: FlipStats,
}

/// The relaxation engine.
///
/// Owns a clone of the input mesh for the duration of the run; the
/// caller's mesh is never mutated.
///
/// # Examples
///
/// ```rust
/// use relaxmesh::core::engine::{RelaxOptionsBuilder, RelaxState, RelaxationEngine};
/// use relaxmesh::core::mesh::Mesh;
/// use relaxmesh::core::objective::SmoothingMethod;
/// use relaxmesh::geometry::point::Point;
/// use smallvec::smallvec;
///
/// // A hexagon fan around one interior vertex, slightly off-center.
/// let mut points: Vec<Point<2>> = (0..6)
///     .map(|k| {
///         let angle = f64::from(k) * std::f64::consts::FRAC_PI_3;
///         Point::new([angle.cos(), angle.sin()])
///     })
///     .collect();
/// points.push(Point::new([0.3, 0.1]));
/// let cells = (0..6).map(|k| smallvec![k, (k + 1) % 6, 6]).collect();
/// let mesh = Mesh::new(points, cells).unwrap();
///
/// let options = RelaxOptionsBuilder::default()
///     .method(SmoothingMethod::Laplace)
///     .build()
///     .unwrap();
/// let engine = RelaxationEngine::new(&mesh, options).unwrap();
/// let outcome = engine.run();
/// assert_eq!(outcome.state, RelaxState::Converged);
/// assert!(outcome.quality.min() > 0.0);
/// ```
pub struct RelaxationEngine<'a, const D: usize> {
    options: RelaxOptions,
    objective: Box<dyn ObjectiveFunction<D> + 'a>,
    observer: Option<BoxedObserver<'a>>,
    mesh: Mesh<D>,
    marker: BoundaryMarker,
    quality: QualitySnapshot,
    characteristic_length: f64,
    state: RelaxState,
    iterations: usize,
    flips: FlipStats,
}

impl<'a, const D: usize> RelaxationEngine<'a, D> {
    /// Validates the input and prepares a run.
    ///
    /// # Errors
    ///
    /// Returns [`RelaxError`] when the options are out of range, the
    /// mesh violates a construction invariant, or its facet sharing is
    /// non-manifold.
    pub fn new(mesh: &Mesh<D>, options: RelaxOptions) -> Result<Self, RelaxError> {
        options.validate()?;
        mesh.is_valid()?;
        let mesh = mesh.clone();
        let marker = BoundaryMarker::classify(&mesh)?;
        let quality = QualitySnapshot::compute(mesh.points(), mesh.cells())
            .map_err(degenerate_to_invalid)?;
        let characteristic_length = mesh.characteristic_edge_length();
        Ok(Self {
            objective: Box::new(options.method),
            options,
            observer: None,
            mesh,
            marker,
            quality,
            characteristic_length,
            state: RelaxState::Initialized,
            iterations: 0,
            flips: FlipStats::default(),
        })
    }

    /// Replaces the built-in objective with a caller-supplied one.
    #[must_use]
    pub fn with_objective<O>(mut self, objective: O) -> Self
    where
        O: ObjectiveFunction<D> + 'a,
    {
        self.objective = Box::new(objective);
        self
    }

    /// Installs a per-iteration observer.
    ///
    /// The observer runs synchronously at every iteration boundary;
    /// returning [`ControlFlow::Break`] cancels the run within one
    /// iteration's latency.
    #[must_use]
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&IterationReport<'_>) -> ControlFlow<()> + 'a,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Current engine state.
    #[must_use]
    pub const fn state(&self) -> RelaxState {
        self.state
    }

    /// Runs the relaxation loop to a terminal state.
    #[must_use]
    pub fn run(mut self) -> RelaxOutcome<D> {
        let flip_limit = self
            .options
            .flip_limit
            .unwrap_or_else(|| default_flip_limit(self.mesh.number_of_cells()));
        let tolerance = self.options.tolerance * self.characteristic_length;

        // Start from a locally Delaunay connectivity.
        let initial_flips = {
            let (points, cells) = self.mesh.split_mut();
            flip_until_locally_delaunay(points, cells, flip_limit)
        };
        if initial_flips.flips_performed > 0 {
            if let Ok(q) = QualitySnapshot::compute(self.mesh.points(), self.mesh.cells()) {
                self.quality = q;
            }
        }
        self.flips.merge(&initial_flips);

        self.state = RelaxState::Iterating;
        let mut consecutive_decreases = 0usize;
        let mut last_good = (self.mesh.clone(), self.quality.clone());

        for iteration in 1..=self.options.max_iterations {
            let geometry = match CellGeometry::compute(self.mesh.points(), self.mesh.cells()) {
                Ok(geometry) => geometry,
                Err(error) => {
                    tracing::error!(iteration, %error, "committed state lost validity");
                    (self.mesh, self.quality) = last_good;
                    self.state = RelaxState::Diverged;
                    break;
                }
            };

            let mut displacements =
                self.objective
                    .displacements(&self.mesh, &self.marker, &geometry);
            for d in &mut displacements {
                scale_in_place(d, self.options.damping);
            }
            constrain_displacements(
                self.mesh.points(),
                &mut displacements,
                &self.marker,
                self.options.boundary_mode,
            );
            clamp_to_half_inradius(&mut displacements, self.mesh.cells(), &geometry.inradii);

            let previous_mean = self.quality.mean();
            let Some((max_displacement, step_flips)) =
                self.apply_with_retries(&displacements, flip_limit, iteration)
            else {
                tracing::warn!(
                    iteration,
                    retries = self.options.max_step_retries,
                    "damped retries exhausted; returning best prior mesh"
                );
                (self.mesh, self.quality) = last_good;
                self.state = RelaxState::Diverged;
                break;
            };
            self.flips.merge(&step_flips);
            self.iterations = iteration;

            if self.options.verbose {
                tracing::info!(
                    iteration,
                    quality_min = self.quality.min(),
                    quality_mean = self.quality.mean(),
                    max_displacement,
                    flips = step_flips.flips_performed,
                    "relaxation step"
                );
            } else {
                tracing::debug!(
                    iteration,
                    quality_min = self.quality.min(),
                    quality_mean = self.quality.mean(),
                    max_displacement,
                    "relaxation step"
                );
            }

            let report = IterationReport {
                iteration,
                quality: &self.quality,
                max_displacement,
            };
            if let Some(observer) = self.observer.as_mut() {
                if observer(&report).is_break() {
                    self.state = RelaxState::Cancelled;
                    break;
                }
            }

            if max_displacement < tolerance {
                self.state = RelaxState::Converged;
                break;
            }
            if self.options.quality_tolerance > 0.0 {
                let relative_change = (self.quality.mean() - previous_mean).abs()
                    / previous_mean.max(f64::MIN_POSITIVE);
                if relative_change < self.options.quality_tolerance {
                    self.state = RelaxState::Converged;
                    break;
                }
            }

            if previous_mean - self.quality.mean() > QUALITY_DECREASE_EPSILON {
                consecutive_decreases += 1;
                if consecutive_decreases > self.options.divergence_patience {
                    tracing::warn!(
                        iteration,
                        decreases = consecutive_decreases,
                        "quality keeps decreasing; returning best prior mesh"
                    );
                    (self.mesh, self.quality) = last_good;
                    self.state = RelaxState::Diverged;
                    break;
                }
            } else {
                consecutive_decreases = 0;
                last_good = (self.mesh.clone(), self.quality.clone());
            }
        }

        if self.state == RelaxState::Iterating {
            self.state = RelaxState::MaxIterationsReached;
        }

        RelaxOutcome {
            mesh: self.mesh,
            state: self.state,
            iterations: self.iterations,
            quality: self.quality,
            flips: self.flips,
        }
    }

    /// Applies the displacement field, halving it on degeneracy.
    ///
    /// On success updates `self.quality` and returns the maximum applied
    /// displacement plus the flip statistics of the committed attempt.
    /// Returns `None` when every retry produced a degenerate cell; the
    /// mesh is left in its pre-step state in that case.
    fn apply_with_retries(
        &mut self,
        displacements: &[[f64; D]],
        flip_limit: usize,
        iteration: usize,
    ) -> Option<(f64, FlipStats)> {
        let saved = self.mesh.clone();
        let full_step = displacements.iter().map(|d| norm(*d)).fold(0.0, f64::max);
        let mut scale = 1.0f64;
        for attempt in 0..=self.options.max_step_retries {
            {
                let points = self.mesh.points_mut();
                for (p, d) in points.iter_mut().zip(displacements) {
                    let mut step = *d;
                    scale_in_place(&mut step, scale);
                    *p = p.translated(step);
                }
            }
            let step_flips = {
                let (points, cells) = self.mesh.split_mut();
                flip_until_locally_delaunay(points, cells, flip_limit)
            };
            match QualitySnapshot::compute(self.mesh.points(), self.mesh.cells()) {
                Ok(quality) => {
                    self.quality = quality;
                    return Some((scale * full_step, step_flips));
                }
                Err(error) => {
                    tracing::debug!(
                        iteration,
                        attempt,
                        cell = error.cell,
                        "degenerate cell after step; halving displacement"
                    );
                    self.mesh = saved.clone();
                    scale *= 0.5;
                }
            }
        }
        None
    }
}

/// Runs one relaxation with the given options; the convenience entry
/// point for callers that do not need an observer or a custom objective.
///
/// # Errors
///
/// Returns [`RelaxError`] when setup fails; terminal loop states are
/// reported in the outcome, not as errors.
pub fn relax<const D: usize>(
    mesh: &Mesh<D>,
    options: &RelaxOptions,
) -> Result<RelaxOutcome<D>, RelaxError> {
    Ok(RelaxationEngine::new(mesh, options.clone())?.run())
}

/// Limits every displacement to half the smallest inradius of the cells
/// around its vertex, so a single step can never collapse a cell.
fn clamp_to_half_inradius<const D: usize>(
    displacements: &mut [[f64; D]],
    cells: &[CellVertices],
    inradii: &[f64],
) {
    let mut max_step = vec![f64::INFINITY; displacements.len()];
    for (cell, vertices) in cells.iter().enumerate() {
        for &v in vertices {
            max_step[v] = max_step[v].min(inradii[cell]);
        }
    }
    for (d, limit) in displacements.iter_mut().zip(&max_step) {
        let limit = 0.5 * limit;
        let length = norm(*d);
        if length > limit {
            scale_in_place(d, limit / length);
        }
    }
}

fn degenerate_to_invalid(error: DegenerateCellError) -> InvalidMeshError {
    let measure = match error.source {
        GeometryError::DegenerateSimplex { measure } => measure,
        _ => 0.0,
    };
    InvalidMeshError::DegenerateCell {
        cell: error.cell,
        measure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::Point;
    use approx::assert_relative_eq;
    use smallvec::smallvec;

    fn hexagon_mesh(interior: [f64; 2]) -> Mesh<2> {
        let mut points: Vec<Point<2>> = (0..6)
            .map(|k| {
                let angle = f64::from(k) * std::f64::consts::FRAC_PI_3;
                Point::new([angle.cos(), angle.sin()])
            })
            .collect();
        points.push(Point::new(interior));
        let cells = (0..6).map(|k| smallvec![k, (k + 1) % 6, 6]).collect();
        Mesh::new(points, cells).unwrap()
    }

    fn laplace_options() -> RelaxOptions {
        RelaxOptionsBuilder::default()
            .method(SmoothingMethod::Laplace)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_produces_documented_defaults() {
        let options = RelaxOptionsBuilder::default().build().unwrap();
        assert_eq!(options, RelaxOptions::default());
        assert_eq!(options.method, SmoothingMethod::Lloyd);
        assert_relative_eq!(options.damping, 1.0);
        assert_eq!(options.max_iterations, 100);
        assert_eq!(options.boundary_mode, BoundaryMode::Flat);
    }

    #[test]
    fn out_of_range_damping_is_rejected() {
        let mesh = hexagon_mesh([0.0, 0.0]);
        let options = RelaxOptionsBuilder::default()
            .damping(2.5)
            .build()
            .unwrap();
        assert!(matches!(
            RelaxationEngine::new(&mesh, options),
            Err(RelaxError::InvalidOption { option: "damping", .. })
        ));
    }

    #[test]
    fn regular_mesh_converges_in_one_iteration() {
        let mesh = hexagon_mesh([0.0, 0.0]);
        let outcome = relax(&mesh, &laplace_options()).unwrap();
        assert_eq!(outcome.state, RelaxState::Converged);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn interior_vertex_converges_to_neighbor_centroid() {
        let mesh = hexagon_mesh([0.35, -0.21]);
        let outcome = relax(&mesh, &laplace_options()).unwrap();
        assert_eq!(outcome.state, RelaxState::Converged);
        let center = outcome.mesh.points()[6].coords();
        assert!(center[0].abs() < 1e-6 && center[1].abs() < 1e-6);
        // Boundary vertices are bit-for-bit where they started.
        for v in 0..6 {
            assert_eq!(outcome.mesh.points()[v], mesh.points()[v]);
        }
    }

    #[test]
    fn observer_sees_every_iteration_and_can_cancel() {
        let mesh = hexagon_mesh([0.35, -0.21]);
        let mut seen = Vec::new();
        let engine = RelaxationEngine::new(&mesh, laplace_options())
            .unwrap()
            .with_observer(|report| {
                seen.push(report.iteration);
                if report.iteration == 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            });
        let outcome = engine.run();
        assert_eq!(outcome.state, RelaxState::Cancelled);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn iteration_ceiling_is_reported_not_fatal() {
        let mesh = hexagon_mesh([0.35, -0.21]);
        let options = RelaxOptionsBuilder::default()
            .method(SmoothingMethod::Laplace)
            .damping(0.1)
            .max_iterations(2usize)
            .build()
            .unwrap();
        let outcome = relax(&mesh, &options).unwrap();
        assert_eq!(outcome.state, RelaxState::MaxIterationsReached);
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.quality.min() > 0.0);
    }

    /// Pushes the interior vertex a fixed amount off-center every
    /// iteration, monotonically degrading quality.
    struct OutwardDrift;

    impl ObjectiveFunction<2> for OutwardDrift {
        fn displacements(
            &self,
            mesh: &Mesh<2>,
            marker: &BoundaryMarker,
            _geometry: &CellGeometry<2>,
        ) -> Vec<[f64; 2]> {
            (0..mesh.number_of_vertices())
                .map(|v| {
                    if marker.is_boundary(v) {
                        [0.0, 0.0]
                    } else {
                        [0.02, 0.0]
                    }
                })
                .collect()
        }
    }

    #[test]
    fn pathological_objective_is_detected_as_divergence() {
        let mesh = hexagon_mesh([0.0, 0.0]);
        let engine = RelaxationEngine::new(&mesh, RelaxOptions::default())
            .unwrap()
            .with_objective(OutwardDrift);
        let outcome = engine.run();
        assert_eq!(outcome.state, RelaxState::Diverged);
        // The returned mesh is the one from before quality started
        // decreasing, i.e. the (optimal) input configuration.
        for (result, input) in outcome.mesh.points().iter().zip(mesh.points()) {
            assert_eq!(result, input);
        }
    }

    #[test]
    fn input_mesh_is_never_mutated() {
        let mesh = hexagon_mesh([0.35, -0.21]);
        let before = mesh.clone();
        let _ = relax(&mesh, &laplace_options()).unwrap();
        assert_eq!(mesh, before);
    }
}
