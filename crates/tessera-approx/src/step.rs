//! Canvas state and the candidate → step typestate.
//!
//! A [`Candidate`] is a shape plus an opacity. It becomes a [`Step`]
//! only through [`Candidate::evaluate`], which derives the best colour
//! and the distance the canvas would have after drawing it. A `Step`
//! can then be applied to produce the next [`State`].

use std::sync::Arc;

use image::RgbaImage;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::raster;
use crate::shape::Shape;
use crate::types::Rgb;

/// Lowest opacity alpha mutation may reach.
pub const MIN_MUTATED_ALPHA: f32 = 0.1;

/// Largest alpha change per mutation (in either direction).
pub const ALPHA_MUTATION_SPAN: f32 = 0.04;

/// Drift between the incremental and the exact distance beyond which
/// a debug message is logged on apply.
const DRIFT_TOLERANCE: f64 = 1e-6;

/// Target raster, current canvas and their cached distance.
#[derive(Debug, Clone)]
pub struct State {
    target: Arc<RgbaImage>,
    current: RgbaImage,
    distance: f64,
}

impl State {
    /// Build a state, measuring the distance when `distance` is `None`.
    #[must_use]
    pub fn new(target: Arc<RgbaImage>, current: RgbaImage, distance: Option<f64>) -> Self {
        let distance = distance.unwrap_or_else(|| raster::distance(&target, &current));
        Self {
            target,
            current,
            distance,
        }
    }

    /// The raster being approximated.
    #[must_use]
    pub fn target(&self) -> &RgbaImage {
        &self.target
    }

    /// The canvas so far.
    #[must_use]
    pub const fn current(&self) -> &RgbaImage {
        &self.current
    }

    /// Cached normalized distance between canvas and target.
    #[must_use]
    pub const fn distance(&self) -> f64 {
        self.distance
    }

    /// Distance measured from the rasters, bypassing the cache.
    #[must_use]
    pub fn exact_distance(&self) -> f64 {
        raster::distance(&self.target, &self.current)
    }

    fn pixels(&self) -> u64 {
        u64::from(self.current.width()) * u64::from(self.current.height())
    }
}

/// A shape and opacity that has not been scored yet.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "a candidate does nothing until evaluated"]
pub struct Candidate {
    /// Geometry to draw.
    pub shape: Shape,
    /// Opacity in `(0, 1]`.
    pub alpha: f32,
}

impl Candidate {
    /// Pair a shape with an opacity.
    pub const fn new(shape: Shape, alpha: f32) -> Self {
        Self { shape, alpha }
    }

    /// Find the best colour for this candidate against `state` and the
    /// distance drawing it would produce.
    ///
    /// The summed difference is floored at zero so rounding can never
    /// report an impossible improvement.
    pub fn evaluate(self, state: &State) -> Step {
        let pixels = state.pixels();
        let mask = self.shape.rasterize_alpha_mask(self.alpha);
        let color = raster::compute_color(&mask, &state.current, &state.target, self.alpha);
        let change = raster::difference_change(&mask, &state.current, &state.target, color);
        let current = raster::distance_to_difference(state.distance, pixels);
        let distance = raster::difference_to_distance((current + change).max(0.0), pixels);
        Step {
            shape: self.shape,
            alpha: self.alpha,
            color,
            distance,
        }
    }
}

/// An evaluated candidate: colour and resulting distance are known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Geometry.
    pub shape: Shape,
    /// Opacity.
    pub alpha: f32,
    /// Best colour against the state it was evaluated on.
    pub color: Rgb,
    /// Distance the canvas would have after this step.
    pub distance: f64,
}

impl Step {
    /// Draw this step onto a copy of `state`'s canvas.
    ///
    /// The resulting state's distance is re-measured from the rasters
    /// rather than trusted from evaluation, so incremental error never
    /// accumulates across steps.
    #[must_use]
    pub fn apply(&self, state: &State) -> State {
        let mask = self.shape.rasterize_alpha_mask(self.alpha);
        let mut canvas = state.current.clone();
        raster::composite(&mut canvas, &mask, self.color);
        let next = State::new(Arc::clone(&state.target), canvas, None);
        let drift = (next.distance - self.distance).abs();
        if drift > DRIFT_TOLERANCE {
            tracing::debug!(
                predicted = self.distance,
                exact = next.distance,
                drift,
                "incremental distance drifted from exact",
            );
        }
        next
    }

    /// A perturbed, not yet evaluated, sibling of this step.
    ///
    /// With `mutate_alpha` the opacity also moves by up to
    /// ±[`ALPHA_MUTATION_SPAN`], clamped to `[MIN_MUTATED_ALPHA, 1]`.
    pub fn mutate<R: Rng>(&self, mutate_alpha: bool, rng: &mut R) -> Candidate {
        let shape = self.shape.mutate(rng);
        let alpha = if mutate_alpha {
            let delta = (rng.random::<f32>() - 0.5) * (2.0 * ALPHA_MUTATION_SPAN);
            (self.alpha + delta).clamp(MIN_MUTATED_ALPHA, 1.0)
        } else {
            self.alpha
        };
        Candidate::new(shape, alpha)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgba;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    use super::*;
    use crate::types::Point;

    fn state(w: u32, h: u32, target: [u8; 3], canvas: [u8; 3]) -> State {
        State::new(
            Arc::new(raster::filled(w, h, Rgb(target))),
            raster::filled(w, h, Rgb(canvas)),
            None,
        )
    }

    #[test]
    fn state_measures_distance_when_missing() {
        let s = state(2, 2, [255, 255, 255], [0, 0, 0]);
        assert!((s.distance() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn state_trusts_supplied_distance() {
        let s = State::new(
            Arc::new(raster::filled(1, 1, Rgb::WHITE)),
            raster::filled(1, 1, Rgb::BLACK),
            Some(0.25),
        );
        assert!((s.distance() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn covering_opaque_rectangle_is_exact() {
        let s = state(1, 1, [255, 255, 255], [0, 0, 0]);
        let step = Candidate::new(Shape::rectangle(0, 0, 1, 1), 1.0).evaluate(&s);
        assert_eq!(step.color, Rgb::WHITE);
        assert!(step.distance.abs() < f64::EPSILON);

        let next = step.apply(&s);
        assert!(next.distance().abs() < f64::EPSILON);
        assert_eq!(next.current().get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn evaluate_predicts_apply() {
        let mut target = raster::filled(8, 8, Rgb([20, 40, 60]));
        for y in 2..6 {
            for x in 2..6 {
                target.put_pixel(x, y, Rgba([200, 180, 10, 255]));
            }
        }
        let s = State::new(Arc::new(target), raster::filled(8, 8, Rgb([20, 40, 60])), None);
        let step = Candidate::new(Shape::rectangle(2, 2, 6, 6), 0.5).evaluate(&s);
        assert!(step.distance < s.distance());
        let next = step.apply(&s);
        assert!((next.distance() - step.distance).abs() < 1e-2);
    }

    #[test]
    fn offscreen_candidate_changes_nothing() {
        let s = state(4, 4, [255, 0, 0], [0, 0, 0]);
        let step = Candidate::new(
            Shape::Ellipse {
                center: Point::new(100, 100),
                rx: 2,
                ry: 2,
            },
            0.5,
        )
        .evaluate(&s);
        assert!((step.distance - s.distance()).abs() < 1e-12);
    }

    #[test]
    fn alpha_mutation_stays_in_range() {
        let mut rng = Pcg32::seed_from_u64(9);
        let s = state(4, 4, [255, 0, 0], [0, 0, 0]);
        let mut step = Candidate::new(Shape::rectangle(0, 0, 2, 2), MIN_MUTATED_ALPHA).evaluate(&s);
        for _ in 0..500 {
            let candidate = step.mutate(true, &mut rng);
            assert!((MIN_MUTATED_ALPHA..=1.0).contains(&candidate.alpha));
            step = candidate.evaluate(&s);
        }
    }

    #[test]
    fn alpha_is_fixed_without_alpha_mutation() {
        let mut rng = Pcg32::seed_from_u64(10);
        let s = state(4, 4, [255, 0, 0], [0, 0, 0]);
        let step = Candidate::new(Shape::rectangle(0, 0, 2, 2), 0.5).evaluate(&s);
        for _ in 0..20 {
            assert!((step.mutate(false, &mut rng).alpha - 0.5).abs() < f32::EPSILON);
        }
    }
}
