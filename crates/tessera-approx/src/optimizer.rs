//! Hill-climbing search over shape placements.
//!
//! Each step scores [`OptimizerConfig::trials_per_step`] random shapes
//! against the current canvas (in parallel), keeps the best, refines it
//! with a sequential [`hill_climb`] of mutations, and applies the
//! result only if it lowers the canvas distance.

use std::sync::Arc;

use image::RgbaImage;
use image::imageops::{self, FilterType};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{ClimbStats, Clock, RunSummary, StepReport, WebClock};
use crate::raster;
use crate::shape::Shape;
use crate::step::{Candidate, State, Step};
use crate::types::{BackgroundFill, Dimensions, OptimizerConfig, OptimizerError, Rgb, ShapeKind};

/// Supplies the shapes scored as trials.
pub trait ShapeSource {
    /// Produce the next trial shape for a canvas of `dimensions`.
    fn next_shape(&mut self, dimensions: Dimensions, rng: &mut Pcg32) -> Shape;
}

impl<F: FnMut(Dimensions, &mut Pcg32) -> Shape> ShapeSource for F {
    fn next_shape(&mut self, dimensions: Dimensions, rng: &mut Pcg32) -> Shape {
        self(dimensions, rng)
    }
}

/// Random shapes drawn uniformly from a set of variants.
#[derive(Debug, Clone)]
pub struct RandomShapes {
    kinds: Vec<ShapeKind>,
}

impl RandomShapes {
    /// Draw from `kinds`. An empty set falls back to triangles.
    #[must_use]
    pub fn new(kinds: Vec<ShapeKind>) -> Self {
        let kinds = if kinds.is_empty() {
            vec![ShapeKind::Triangle]
        } else {
            kinds
        };
        Self { kinds }
    }
}

impl ShapeSource for RandomShapes {
    fn next_shape(&mut self, dimensions: Dimensions, rng: &mut Pcg32) -> Shape {
        let kind = self.kinds[rng.random_range(0..self.kinds.len())];
        Shape::random(kind, dimensions, rng)
    }
}

/// The finished (or in-progress) approximation: everything needed to
/// render or export it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approximation {
    /// Size of the compute raster; shape coordinates live in this space.
    pub dimensions: Dimensions,
    /// Factor from compute coordinates to view coordinates.
    pub view_scale: f64,
    /// Canvas background.
    pub background: Rgb,
    /// Applied steps, in drawing order.
    pub steps: Vec<Step>,
}

impl Approximation {
    /// Output size at view resolution.
    #[must_use]
    pub fn view_dimensions(&self) -> Dimensions {
        Dimensions {
            width: scaled_extent(self.dimensions.width, 1.0 / self.view_scale),
            height: scaled_extent(self.dimensions.height, 1.0 / self.view_scale),
        }
    }
}

/// Factor by which an image must shrink so neither side exceeds
/// `limit`; never below 1 (images are not enlarged).
#[must_use]
pub fn scale_for(width: u32, height: u32, limit: u32) -> f64 {
    let limit = f64::from(limit.max(1));
    (f64::from(width) / limit)
        .max(f64::from(height) / limit)
        .max(1.0)
}

/// `extent / scale`, truncated, at least 1.
fn scaled_extent(extent: u32, scale: f64) -> u32 {
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let v = (f64::from(extent) / scale).floor().max(1.0) as u32;
    v
}

/// Sequential hill climb.
///
/// Repeatedly asks `propose` for a neighbour of the best value so far
/// and keeps it when `score` is strictly lower. Stops after
/// `max_failures` consecutive proposals that do not improve, no matter
/// how many improvements came before.
pub fn hill_climb<T, P, S>(initial: T, max_failures: u32, mut propose: P, score: S) -> (T, ClimbStats)
where
    P: FnMut(&T) -> T,
    S: Fn(&T) -> f64,
{
    let mut best_score = score(&initial);
    let mut best = initial;
    let mut failures = 0;
    let mut stats = ClimbStats::default();
    while failures < max_failures {
        stats.attempts += 1;
        let candidate = propose(&best);
        let candidate_score = score(&candidate);
        if candidate_score < best_score {
            best = candidate;
            best_score = candidate_score;
            stats.improvements += 1;
            failures = 0;
        } else {
            failures += 1;
        }
    }
    (best, stats)
}

/// Lowest-distance step, ties broken by position.
fn pick_best(steps: Vec<Step>) -> Option<Step> {
    steps
        .into_iter()
        .reduce(|best, step| if step.distance < best.distance { step } else { best })
}

/// Image approximation optimizer.
#[derive(Debug)]
pub struct Optimizer<S = RandomShapes> {
    config: OptimizerConfig,
    dimensions: Dimensions,
    view_scale: f64,
    background: Rgb,
    state: State,
    initial_distance: f64,
    source: S,
    rng: Pcg32,
    applied: Vec<Step>,
    steps_taken: u32,
    mutation_attempts: u64,
}

impl Optimizer<RandomShapes> {
    /// Prepare an optimizer for `target` drawing random shapes from
    /// the configured variants.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::InvalidConfig`] if `config` fails
    /// validation, or [`OptimizerError::EmptyTarget`] if `target` has
    /// no pixels.
    pub fn new(target: &RgbaImage, config: OptimizerConfig) -> Result<Self, OptimizerError> {
        let source = RandomShapes::new(config.enabled_shape_variants.clone());
        Self::with_source(target, config, source)
    }
}

impl<S: ShapeSource> Optimizer<S> {
    /// Prepare an optimizer whose trial shapes come from `source`.
    ///
    /// The target is downscaled (triangle filter) so its longest side
    /// is at most `compute_resolution`, and the background is chosen
    /// per [`OptimizerConfig::background_fill`].
    ///
    /// # Errors
    ///
    /// Same as [`Optimizer::new`].
    pub fn with_source(target: &RgbaImage, config: OptimizerConfig, source: S) -> Result<Self, OptimizerError> {
        config.validate()?;
        let (w, h) = target.dimensions();
        if w == 0 || h == 0 {
            return Err(OptimizerError::EmptyTarget);
        }

        let compute_scale = scale_for(w, h, config.compute_resolution);
        let view_scale = compute_scale / scale_for(w, h, config.view_resolution);
        let dimensions = Dimensions {
            width: scaled_extent(w, compute_scale),
            height: scaled_extent(h, compute_scale),
        };
        let target = if (dimensions.width, dimensions.height) == (w, h) {
            target.clone()
        } else {
            imageops::resize(target, dimensions.width, dimensions.height, FilterType::Triangle)
        };

        let background = match config.background_fill {
            BackgroundFill::Auto => raster::border_fill(&target),
            BackgroundFill::Fixed(color) => color,
        };
        let canvas = raster::filled(dimensions.width, dimensions.height, background);
        let state = State::new(Arc::new(target), canvas, None);
        let rng = config
            .seed
            .map_or_else(|| Pcg32::from_rng(&mut rand::rng()), Pcg32::seed_from_u64);

        tracing::info!(
            width = dimensions.width,
            height = dimensions.height,
            background = %background,
            distance = state.distance(),
            "initial distance",
        );

        Ok(Self {
            initial_distance: state.distance(),
            config,
            dimensions,
            view_scale,
            background,
            state,
            source,
            rng,
            applied: Vec::new(),
            steps_taken: 0,
            mutation_attempts: 0,
        })
    }

    /// Score a fresh batch of trial shapes and return the best.
    ///
    /// Shapes are generated sequentially from the seeded generator and
    /// evaluated in parallel, so the result is reproducible.
    fn find_best_step(&mut self) -> Option<Step> {
        let alpha = self.config.base_alpha;
        let candidates: Vec<Candidate> = (0..self.config.trials_per_step)
            .map(|_| Candidate::new(self.source.next_shape(self.dimensions, &mut self.rng), alpha))
            .collect();
        let state = &self.state;
        let evaluated: Vec<Step> = candidates
            .into_par_iter()
            .map(|candidate| candidate.evaluate(state))
            .collect();
        pick_best(evaluated)
    }

    /// Run one step: trials, refinement, and apply-if-better.
    pub fn step(&mut self) -> StepReport {
        let index = self.steps_taken;
        self.steps_taken += 1;

        let Some(best) = self.find_best_step() else {
            return StepReport {
                index,
                applied: false,
                trial_distance: f64::INFINITY,
                refined_distance: f64::INFINITY,
                state_distance: self.state.distance(),
                climb: ClimbStats::default(),
            };
        };
        let trial_distance = best.distance;

        let mutate_alpha = self.config.mutate_alpha_enabled;
        let state = &self.state;
        let rng = &mut self.rng;
        let (refined, climb) = hill_climb(
            best,
            self.config.max_failed_mutations_per_step,
            |step| step.mutate(mutate_alpha, rng).evaluate(state),
            |step| step.distance,
        );
        self.mutation_attempts += u64::from(climb.attempts);
        tracing::debug!(
            step = index,
            from = trial_distance,
            to = refined.distance,
            good = climb.improvements,
            total = climb.attempts,
            "mutation refined step",
        );

        let refined_distance = refined.distance;
        let applied = refined_distance < self.state.distance();
        if applied {
            self.state = refined.apply(&self.state);
            tracing::debug!(step = index, distance = self.state.distance(), "applied step");
            self.applied.push(refined);
        } else {
            tracing::trace!(step = index, "discarded step");
        }

        StepReport {
            index,
            applied,
            trial_distance,
            refined_distance,
            state_distance: self.state.distance(),
            climb,
        }
    }

    /// Whether all configured steps have been taken.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.steps_taken >= self.config.total_steps
    }

    /// Run the remaining steps, reporting each to `on_step`.
    pub fn run(&mut self, on_step: impl FnMut(&StepReport)) -> RunSummary {
        self.run_with_clock(&WebClock, on_step)
    }

    /// [`Optimizer::run`] with an explicit clock.
    pub fn run_with_clock<C: Clock>(&mut self, clock: &C, mut on_step: impl FnMut(&StepReport)) -> RunSummary {
        let start = clock.now();
        while !self.is_finished() {
            let report = self.step();
            on_step(&report);
        }
        let elapsed = clock.elapsed(&start);
        let summary = self.summary(elapsed);
        tracing::info!(
            target_distance = summary.final_distance,
            real_distance = summary.exact_distance,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "optimization finished",
        );
        summary
    }

    fn summary(&self, elapsed: std::time::Duration) -> RunSummary {
        let applied = u32::try_from(self.applied.len()).unwrap_or(u32::MAX);
        RunSummary {
            steps: self.steps_taken,
            applied,
            discarded: self.steps_taken.saturating_sub(applied),
            initial_distance: self.initial_distance,
            final_distance: self.state.distance(),
            exact_distance: self.state.exact_distance(),
            mutation_attempts: self.mutation_attempts,
            elapsed,
        }
    }

    /// Current canvas state.
    #[must_use]
    pub const fn state(&self) -> &State {
        &self.state
    }

    /// Applied steps so far.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.applied
    }

    /// Compute raster size.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Snapshot of the approximation built so far.
    #[must_use]
    pub fn approximation(&self) -> Approximation {
        Approximation {
            dimensions: self.dimensions,
            view_scale: self.view_scale,
            background: self.background,
            steps: self.applied.clone(),
        }
    }

    /// Consume the optimizer, keeping the approximation.
    #[must_use]
    pub fn into_approximation(self) -> Approximation {
        Approximation {
            dimensions: self.dimensions,
            view_scale: self.view_scale,
            background: self.background,
            steps: self.applied,
        }
    }
}
