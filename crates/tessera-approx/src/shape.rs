//! Geometric primitives placed by the optimizer.
//!
//! A [`Shape`] is immutable: [`Shape::mutate`] returns a lightly
//! perturbed sibling and leaves the original untouched. Every shape can
//! report its pixel [`BoundingBox`], draw itself into a `tiny-skia`
//! pixmap, and rasterize itself into a small [`AlphaMask`] clipped to
//! that box.

use std::f64::consts::TAU;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tiny_skia::{FillRule, Paint, Path, PathBuilder, Pixmap, PixmapMut, Rect, Transform};

use crate::raster::AlphaMask;
use crate::types::{BoundingBox, Dimensions, Point, ShapeKind};

/// Largest distance, in pixels, a generated or mutated vertex moves
/// from its anchor.
pub const MUTATION_RADIUS: f64 = 20.0;

/// Vertex count of a free polygon.
pub const FREE_POLYGON_VERTICES: usize = 5;

/// Largest initial ellipse radius.
pub const MAX_ELLIPSE_RADIUS: i32 = 20;

/// Glyph drawn by [`ShapeKind::Glyph`] trials.
pub const DEFAULT_GLYPH: char = '☺';

/// Starting glyph size (em square side) in pixels.
pub const DEFAULT_GLYPH_SIZE: i32 = 16;

/// Glyphs never shrink below this size.
pub const MIN_GLYPH_SIZE: i32 = 10;

/// Which polygon family a [`Shape::Polygon`] belongs to.
///
/// The family decides how the polygon mutates: rectangles stay
/// axis-aligned by moving whole edges, the others move single vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolygonKind {
    /// Three vertices.
    Triangle,
    /// Four vertices in `[top-left, top-right, bottom-right, bottom-left]`
    /// order.
    Rectangle,
    /// [`FREE_POLYGON_VERTICES`] vertices.
    Free,
}

/// A polymorphic primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    /// Closed polygon through `points`.
    Polygon {
        /// Polygon family.
        kind: PolygonKind,
        /// Vertices in drawing order.
        points: Vec<Point>,
    },
    /// Axis-aligned ellipse.
    Ellipse {
        /// Centre.
        center: Point,
        /// Horizontal radius, at least 1.
        rx: i32,
        /// Vertical radius, at least 1.
        ry: i32,
    },
    /// A single character centred on `center`.
    Glyph {
        /// Centre of the em square.
        center: Point,
        /// The character.
        text: char,
        /// Em square side in pixels, at least [`MIN_GLYPH_SIZE`].
        size: i32,
    },
}

impl Shape {
    /// Generate a random shape of `kind` anchored inside a canvas of
    /// `dimensions`.
    pub fn random<R: Rng>(kind: ShapeKind, dimensions: Dimensions, rng: &mut R) -> Self {
        match kind {
            ShapeKind::Triangle => Self::Polygon {
                kind: PolygonKind::Triangle,
                points: clustered_points(3, dimensions, rng),
            },
            ShapeKind::Polygon => Self::Polygon {
                kind: PolygonKind::Free,
                points: clustered_points(FREE_POLYGON_VERTICES, dimensions, rng),
            },
            ShapeKind::Rectangle => {
                let a = random_point(dimensions, rng);
                let b = random_point(dimensions, rng);
                Self::rectangle(a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y))
            }
            ShapeKind::Ellipse => Self::Ellipse {
                center: random_point(dimensions, rng),
                rx: rng.random_range(1..=MAX_ELLIPSE_RADIUS),
                ry: rng.random_range(1..=MAX_ELLIPSE_RADIUS),
            },
            ShapeKind::Glyph => Self::Glyph {
                center: random_point(dimensions, rng),
                text: DEFAULT_GLYPH,
                size: DEFAULT_GLYPH_SIZE,
            },
        }
    }

    /// Axis-aligned rectangle covering columns `left..right` and rows
    /// `top..bottom`.
    #[must_use]
    pub fn rectangle(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self::Polygon {
            kind: PolygonKind::Rectangle,
            points: vec![
                Point::new(left, top),
                Point::new(right, top),
                Point::new(right, bottom),
                Point::new(left, bottom),
            ],
        }
    }

    /// The variant this shape was generated as.
    #[must_use]
    pub const fn kind(&self) -> ShapeKind {
        match self {
            Self::Polygon { kind, .. } => match kind {
                PolygonKind::Triangle => ShapeKind::Triangle,
                PolygonKind::Rectangle => ShapeKind::Rectangle,
                PolygonKind::Free => ShapeKind::Polygon,
            },
            Self::Ellipse { .. } => ShapeKind::Ellipse,
            Self::Glyph { .. } => ShapeKind::Glyph,
        }
    }

    /// Pixel bounding box; each extent is at least 1.
    #[must_use]
    pub fn bbox(&self) -> BoundingBox {
        match self {
            Self::Polygon { points, .. } => BoundingBox::enclosing(points),
            Self::Ellipse { center, rx, ry } => BoundingBox::new(
                center.x - rx,
                center.y - ry,
                2 * i64::from(*rx),
                2 * i64::from(*ry),
            ),
            Self::Glyph { center, size, .. } => {
                let half = f64::from(*size) / 2.0;
                #[expect(clippy::cast_possible_truncation)]
                let (left, top) = (
                    (f64::from(center.x) - half) as i32,
                    (f64::from(center.y) - half) as i32,
                );
                BoundingBox::new(left, top, i64::from(*size), i64::from(*size))
            }
        }
    }

    /// Return a lightly perturbed copy.
    #[must_use]
    pub fn mutate<R: Rng>(&self, rng: &mut R) -> Self {
        let mut clone = self.clone();
        match &mut clone {
            Self::Polygon {
                kind: PolygonKind::Rectangle,
                points,
            } if points.len() == 4 => {
                let amount = jitter(rng);
                // Edge indices into [tl, tr, br, bl].
                match rng.random_range(0..4) {
                    0 => {
                        points[0].x += amount;
                        points[3].x += amount;
                    }
                    1 => {
                        points[0].y += amount;
                        points[1].y += amount;
                    }
                    2 => {
                        points[1].x += amount;
                        points[2].x += amount;
                    }
                    _ => {
                        points[2].y += amount;
                        points[3].y += amount;
                    }
                }
            }
            Self::Polygon { points, .. } => {
                if !points.is_empty() {
                    let index = rng.random_range(0..points.len());
                    let (dx, dy) = radial_offset(rng);
                    points[index] = points[index].offset(dx, dy);
                }
            }
            Self::Ellipse { center, rx, ry } => match rng.random_range(0..3) {
                0 => {
                    let (dx, dy) = radial_offset(rng);
                    *center = center.offset(dx, dy);
                }
                1 => *rx = (*rx + jitter(rng)).max(1),
                _ => *ry = (*ry + jitter(rng)).max(1),
            },
            Self::Glyph { center, size, .. } => {
                if rng.random_bool(0.5) {
                    let (dx, dy) = radial_offset(rng);
                    *center = center.offset(dx, dy);
                } else {
                    let delta = if rng.random_bool(0.5) { 1 } else { -1 };
                    *size = (*size + delta).max(MIN_GLYPH_SIZE);
                }
            }
        }
        clone
    }

    /// Vector outline in canvas coordinates, with its fill rule.
    ///
    /// Returns `None` for degenerate geometry with no area.
    #[must_use]
    pub fn outline(&self) -> Option<(Path, FillRule)> {
        match self {
            Self::Polygon { points, .. } => {
                let (first, rest) = points.split_first()?;
                let mut pb = PathBuilder::new();
                pb.move_to(px(first.x), px(first.y));
                for p in rest {
                    pb.line_to(px(p.x), px(p.y));
                }
                pb.close();
                Some((pb.finish()?, FillRule::Winding))
            }
            Self::Ellipse { center, rx, ry } => {
                let rect = Rect::from_xywh(
                    px(center.x - rx),
                    px(center.y - ry),
                    px(2 * rx),
                    px(2 * ry),
                )?;
                Some((PathBuilder::from_oval(rect)?, FillRule::Winding))
            }
            Self::Glyph { center, text, size } => glyph_outline(*center, *text, *size),
        }
    }

    /// Draw the shape into `pixmap` with `paint`.
    ///
    /// The paint carries colour and opacity; `transform` maps canvas
    /// coordinates to pixmap coordinates.
    pub fn render(&self, pixmap: &mut PixmapMut<'_>, paint: &Paint<'_>, transform: Transform) {
        if let Some((path, rule)) = self.outline() {
            pixmap.fill_path(&path, paint, rule, transform, None);
        }
    }

    /// Rasterize the shape at opacity `alpha` into a mask covering its
    /// bounding box.
    ///
    /// Rasterization is aliased so coverage is exactly the pixels whose
    /// centres lie inside the outline.
    #[must_use]
    pub fn rasterize_alpha_mask(&self, alpha: f32) -> AlphaMask {
        let bbox = self.bbox();
        let mut alpha_bytes = vec![0u8; bbox.area()];
        if let Some(mut pixmap) = Pixmap::new(bbox.width, bbox.height) {
            let mut paint = Paint::default();
            paint.set_color_rgba8(0, 0, 0, unit_to_byte(alpha));
            paint.anti_alias = false;
            self.render(
                &mut pixmap.as_mut(),
                &paint,
                Transform::from_translate(-px(bbox.left), -px(bbox.top)),
            );
            for (dst, src) in alpha_bytes.iter_mut().zip(pixmap.data().chunks_exact(4)) {
                *dst = src[3];
            }
        }
        AlphaMask {
            bbox,
            alpha: alpha_bytes,
        }
    }
}

/// Map an opacity in `[0, 1]` to a byte.
pub(crate) fn unit_to_byte(value: f32) -> u8 {
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let byte = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
    byte
}

#[expect(clippy::cast_precision_loss)]
const fn px(v: i32) -> f32 {
    v as f32
}

fn random_point<R: Rng>(dimensions: Dimensions, rng: &mut R) -> Point {
    let w = i32::try_from(dimensions.width.max(1)).unwrap_or(i32::MAX);
    let h = i32::try_from(dimensions.height.max(1)).unwrap_or(i32::MAX);
    Point::new(rng.random_range(0..w), rng.random_range(0..h))
}

/// Whole-pixel offset in a random direction, at most
/// [`MUTATION_RADIUS`] long. Each axis truncates toward zero.
fn radial_offset<R: Rng>(rng: &mut R) -> (i32, i32) {
    let angle = rng.random::<f64>() * TAU;
    let radius = rng.random::<f64>() * MUTATION_RADIUS;
    #[expect(clippy::cast_possible_truncation)]
    let offset = (
        (radius * angle.cos()) as i32,
        (radius * angle.sin()) as i32,
    );
    offset
}

/// Uniform whole-pixel shift in `(-10, 10)`, truncated toward zero.
fn jitter<R: Rng>(rng: &mut R) -> i32 {
    #[expect(clippy::cast_possible_truncation)]
    let amount = ((rng.random::<f64>() - 0.5) * MUTATION_RADIUS) as i32;
    amount
}

fn clustered_points<R: Rng>(count: usize, dimensions: Dimensions, rng: &mut R) -> Vec<Point> {
    let first = random_point(dimensions, rng);
    let mut points = Vec::with_capacity(count);
    points.push(first);
    for _ in 1..count {
        let (dx, dy) = radial_offset(rng);
        points.push(first.offset(dx, dy));
    }
    points
}

// ───── Glyphs ─────────────────────────────────────────────────────

/// Outline for a glyph, scaled to a `size`-pixel em square centred on
/// `center`.
///
/// The smiley is a face disc with two eyes and a mouth cut out
/// (even-odd). Any other character renders as a filled em box.
fn glyph_outline(center: Point, text: char, size: i32) -> Option<(Path, FillRule)> {
    let s = px(size);
    let (cx, cy) = (px(center.x), px(center.y));
    let mut pb = PathBuilder::new();
    if text == DEFAULT_GLYPH {
        pb.push_circle(cx, cy, 0.45 * s);
        pb.push_circle(0.15f32.mul_add(-s, cx), 0.12f32.mul_add(-s, cy), 0.07 * s);
        pb.push_circle(0.15f32.mul_add(s, cx), 0.12f32.mul_add(-s, cy), 0.07 * s);
        push_mouth(&mut pb, cx, cy, s);
        Some((pb.finish()?, FillRule::EvenOdd))
    } else {
        let rect = Rect::from_xywh(0.4f32.mul_add(-s, cx), 0.4f32.mul_add(-s, cy), 0.8 * s, 0.8 * s)?;
        pb.push_rect(rect);
        Some((pb.finish()?, FillRule::Winding))
    }
}

/// Crescent-shaped mouth: an outer arc below the centre and an inner
/// arc back.
fn push_mouth(pb: &mut PathBuilder, cx: f32, cy: f32, s: f32) {
    const SEGMENTS: u16 = 8;
    let (start, end) = (0.2 * std::f32::consts::PI, 0.8 * std::f32::consts::PI);
    let arc = |radius: f32, t: f32| {
        let angle = (end - start).mul_add(t, start);
        (radius.mul_add(angle.cos(), cx), radius.mul_add(angle.sin(), cy))
    };
    let outer = 0.3 * s;
    let inner = 0.2 * s;
    let (x, y) = arc(outer, 0.0);
    pb.move_to(x, y);
    for i in 1..=SEGMENTS {
        let (x, y) = arc(outer, f32::from(i) / f32::from(SEGMENTS));
        pb.line_to(x, y);
    }
    for i in (0..=SEGMENTS).rev() {
        let (x, y) = arc(inner, f32::from(i) / f32::from(SEGMENTS));
        pb.line_to(x, y);
    }
    pb.close();
}
