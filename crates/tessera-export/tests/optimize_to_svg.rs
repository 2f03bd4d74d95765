//! Integration test: optimize a synthetic image and export it to SVG.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use image::{Rgba, RgbaImage};
use tessera_approx::{Optimizer, OptimizerConfig, ShapeKind};
use tessera_export::{SvgMetadata, to_svg};

/// A dark disc on a light background.
fn disc(size: u32) -> RgbaImage {
    let c = f64::from(size) / 2.0;
    RgbaImage::from_fn(size, size, |x, y| {
        let dx = f64::from(x) + 0.5 - c;
        let dy = f64::from(y) + 0.5 - c;
        if dx.hypot(dy) < c * 0.6 {
            Rgba([30, 40, 120, 255])
        } else {
            Rgba([240, 235, 220, 255])
        }
    })
}

#[test]
fn optimized_disc_exports_to_svg() {
    let config = OptimizerConfig {
        compute_resolution: 32,
        view_resolution: 64,
        total_steps: 6,
        trials_per_step: 30,
        max_failed_mutations_per_step: 10,
        enabled_shape_variants: ShapeKind::ALL.to_vec(),
        seed: Some(5),
        ..OptimizerConfig::default()
    };
    let config_json = serde_json::to_string(&config).unwrap();

    let mut optimizer = Optimizer::new(&disc(64), config).expect("valid setup");
    let summary = optimizer.run(|_| {});
    eprintln!("{}", summary.report());
    assert!(summary.final_distance < summary.initial_distance);

    let approximation = optimizer.into_approximation();
    let metadata = SvgMetadata {
        title: Some("disc"),
        description: Some("synthetic test image"),
        config_json: Some(&config_json),
    };
    let svg = to_svg(&approximation, &metadata);

    assert!(svg.contains(r#"viewBox="0 0 32 32""#));
    assert!(svg.contains(r#"width="64""#));
    assert!(svg.contains("<metadata>"));
    assert_eq!(svg.matches("fill-opacity=").count(), approximation.steps.len());
    assert!(svg.contains("</svg>"));
}
