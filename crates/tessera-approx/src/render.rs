//! Anti-aliased rendering of an [`Approximation`] at any scale.

use image::{Rgba, RgbaImage};
use tiny_skia::{Color, Paint, Pixmap, Transform};

use crate::optimizer::Approximation;
use crate::shape::unit_to_byte;
use crate::types::Dimensions;

/// Rasterize `approximation` at `scale` times its compute size.
///
/// The background is painted first, then every step in order with its
/// colour and opacity. The output is straight (non-premultiplied) RGBA.
#[must_use]
pub fn render_steps(approximation: &Approximation, scale: f64) -> RgbaImage {
    let Dimensions { width, height } = approximation.dimensions;
    let width = scaled_side(width, scale);
    let height = scaled_side(height, scale);
    let [br, bg, bb] = approximation.background.0;

    let Some(mut pixmap) = Pixmap::new(width, height) else {
        return RgbaImage::from_pixel(width, height, Rgba([br, bg, bb, 255]));
    };
    pixmap.fill(Color::from_rgba8(br, bg, bb, 255));

    #[expect(clippy::cast_possible_truncation)]
    let factor = scale as f32;
    let transform = Transform::from_scale(factor, factor);
    let mut paint = Paint::default();
    paint.anti_alias = true;
    for step in &approximation.steps {
        let [r, g, b] = step.color.0;
        paint.set_color_rgba8(r, g, b, unit_to_byte(step.alpha));
        step.shape.render(&mut pixmap.as_mut(), &paint, transform);
    }

    let mut img = RgbaImage::new(width, height);
    for (dst, src) in img.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
    img
}

/// Render at view resolution.
#[must_use]
pub fn render_view(approximation: &Approximation) -> RgbaImage {
    render_steps(approximation, approximation.view_scale)
}

fn scaled_side(side: u32, scale: f64) -> u32 {
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let v = (f64::from(side) * scale).round().max(1.0) as u32;
    v
}
