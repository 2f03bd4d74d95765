//! tessera-approx: approximate a raster image with translucent
//! geometric primitives (sans-IO).
//!
//! The optimizer starts from a flat background and repeatedly adds the
//! shape that most reduces the distance to the target:
//! random trials -> best trial -> mutation hill climb -> apply if better.
//!
//! This crate has **no I/O dependencies**. It works on in-memory bytes
//! and images and returns structured data; writing SVG or PNG files is
//! left to callers (see `tessera-export` and `tessera-cli`).

pub mod diagnostics;
pub mod optimizer;
pub mod raster;
pub mod render;
pub mod shape;
pub mod step;
pub mod types;

pub use diagnostics::{ClimbStats, Clock, RunSummary, StepReport, WebClock};
pub use optimizer::{Approximation, Optimizer, RandomShapes, ShapeSource, hill_climb};
pub use render::{render_steps, render_view};
pub use shape::{PolygonKind, Shape};
pub use step::{Candidate, State, Step};
pub use types::{
    BackgroundFill, BoundingBox, Dimensions, OptimizerConfig, OptimizerError, Point, Rgb, RgbaImage,
    ShapeKind,
};

/// Decode `image_bytes` and run a full optimization.
///
/// Accepts any format enabled on the `image` dependency (PNG, JPEG,
/// BMP, WebP). `on_step` is called after every step.
///
/// # Errors
///
/// Returns [`OptimizerError::EmptyTarget`] if `image_bytes` is empty or
/// decodes to an image with no pixels, [`OptimizerError::ImageDecode`]
/// if the format is unrecognized, and [`OptimizerError::InvalidConfig`]
/// if `config` fails validation.
pub fn approximate(
    image_bytes: &[u8],
    config: OptimizerConfig,
    on_step: impl FnMut(&StepReport),
) -> Result<(Approximation, RunSummary), OptimizerError> {
    if image_bytes.is_empty() {
        return Err(OptimizerError::EmptyTarget);
    }
    let target = image::load_from_memory(image_bytes)?.to_rgba8();
    let mut optimizer = Optimizer::new(&target, config)?;
    let summary = optimizer.run(on_step);
    Ok((optimizer.into_approximation(), summary))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use image::Rgba;

    use super::*;

    fn png_bytes(img: &RgbaImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn empty_bytes_are_rejected() {
        assert!(matches!(
            approximate(&[], OptimizerConfig::default(), |_| {}),
            Err(OptimizerError::EmptyTarget)
        ));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            approximate(b"not an image", OptimizerConfig::default(), |_| {}),
            Err(OptimizerError::ImageDecode(_))
        ));
    }

    #[test]
    fn png_round_trip_runs_all_steps() {
        let img = RgbaImage::from_fn(16, 16, |x, _| {
            if x < 8 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let config = OptimizerConfig {
            total_steps: 3,
            trials_per_step: 10,
            max_failed_mutations_per_step: 5,
            seed: Some(3),
            ..OptimizerConfig::default()
        };
        let mut seen = 0;
        let (approx, summary) = approximate(&png_bytes(&img), config, |_| seen += 1).unwrap();
        assert_eq!(seen, 3);
        assert_eq!(summary.steps, 3);
        assert_eq!(approx.steps.len(), usize::try_from(summary.applied).unwrap());
        assert_eq!(approx.dimensions, Dimensions { width: 16, height: 16 });
    }
}
