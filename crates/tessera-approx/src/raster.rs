//! Raster comparison engine.
//!
//! Whole-image difference/distance metrics plus the incremental
//! colour and error computation used to score a candidate shape
//! without redrawing the canvas.
//!
//! The *difference* between two rasters is the sum of squared RGB
//! channel differences (alpha is ignored). The *distance* normalizes
//! that sum to `[0, 1]`: the root-mean-square channel error divided by
//! 255. [`distance_to_difference`] and [`difference_to_distance`]
//! convert between the two for a given pixel count.

use image::{Rgba, RgbaImage};

use crate::types::{BoundingBox, Rgb};

/// A small alpha mask produced by rasterizing a shape into its own
/// bounding box.
///
/// `alpha` holds one byte per pixel, row-major, `bbox.width` wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlphaMask {
    /// Where the mask sits on the full canvas.
    pub bbox: BoundingBox,
    /// Per-pixel coverage in `0..=255`.
    pub alpha: Vec<u8>,
}

impl AlphaMask {
    /// Iterate the drawn pixels that fall inside a `width`×`height`
    /// canvas, yielding `(canvas_x, canvas_y, mask_alpha)`.
    ///
    /// Pixels with zero coverage and pixels outside the canvas are
    /// skipped.
    pub fn covered(&self, width: u32, height: u32) -> impl Iterator<Item = (u32, u32, u8)> + '_ {
        let mw = self.bbox.width as usize;
        let left = i64::from(self.bbox.left);
        let top = i64::from(self.bbox.top);
        self.alpha
            .iter()
            .enumerate()
            .filter(|&(_, &a)| a != 0)
            .filter_map(move |(i, &a)| {
                let fx = left + (i % mw) as i64;
                let fy = top + (i / mw) as i64;
                let x = u32::try_from(fx).ok().filter(|&x| x < width)?;
                let y = u32::try_from(fy).ok().filter(|&y| y < height)?;
                Some((x, y, a))
            })
    }
}

/// Sum of squared RGB channel differences between two equally sized
/// rasters.
#[must_use]
pub fn difference(a: &RgbaImage, b: &RgbaImage) -> f64 {
    debug_assert_eq!(a.dimensions(), b.dimensions(), "raster size mismatch");
    let sum: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| {
            (0..3)
                .map(|c| {
                    let d = i64::from(pb[c]) - i64::from(pa[c]);
                    d.unsigned_abs() * d.unsigned_abs()
                })
                .sum::<u64>()
        })
        .sum();
    #[expect(clippy::cast_precision_loss)]
    let sum = sum as f64;
    sum
}

/// Normalized distance between two equally sized rasters.
#[must_use]
pub fn distance(a: &RgbaImage, b: &RgbaImage) -> f64 {
    difference_to_distance(difference(a, b), u64::from(a.width()) * u64::from(a.height()))
}

/// Convert a normalized distance back to a summed squared difference.
#[must_use]
pub fn distance_to_difference(distance: f64, pixels: u64) -> f64 {
    #[expect(clippy::cast_precision_loss)]
    let pixels = pixels as f64;
    (distance * 255.0).powi(2) * (3.0 * pixels)
}

/// Convert a summed squared difference to a normalized distance.
#[must_use]
pub fn difference_to_distance(difference: f64, pixels: u64) -> f64 {
    #[expect(clippy::cast_precision_loss)]
    let pixels = pixels as f64;
    (difference / (3.0 * pixels)).sqrt() / 255.0
}

/// Mean colour of the one-pixel border of `image`, truncated per
/// channel.
///
/// Used as the automatic background: the border is usually the best
/// single-colour guess for what the empty canvas should look like.
#[must_use]
pub fn border_fill(image: &RgbaImage) -> Rgb {
    let (w, h) = image.dimensions();
    let mut sum = [0u64; 3];
    let mut count = 0u64;
    for (x, y, px) in image.enumerate_pixels() {
        if x > 0 && y > 0 && x + 1 < w && y + 1 < h {
            continue;
        }
        count += 1;
        for c in 0..3 {
            sum[c] += u64::from(px[c]);
        }
    }
    if count == 0 {
        return Rgb::BLACK;
    }
    Rgb(sum.map(|s| u8::try_from(s / count).unwrap_or(u8::MAX)))
}

/// Fill a new canvas of the given size with `color`.
#[must_use]
pub fn filled(width: u32, height: u32, color: Rgb) -> RgbaImage {
    let [r, g, b] = color.0;
    RgbaImage::from_pixel(width, height, Rgba([r, g, b, 255]))
}

/// The colour that, drawn through `mask` at opacity `alpha`, best
/// moves `current` toward `target`.
///
/// Averages `(target - current) / alpha + current` over every pixel the
/// mask covers, then truncates and clamps each channel to `0..=255`.
/// A mask covering no canvas pixel yields black.
#[must_use]
pub fn compute_color(mask: &AlphaMask, current: &RgbaImage, target: &RgbaImage, alpha: f32) -> Rgb {
    let alpha = f64::from(alpha);
    let (w, h) = current.dimensions();
    let mut sum = [0.0f64; 3];
    let mut count = 0u32;
    for (x, y, _) in mask.covered(w, h) {
        let c = current.get_pixel(x, y);
        let t = target.get_pixel(x, y);
        for i in 0..3 {
            let cv = f64::from(c[i]);
            sum[i] += (f64::from(t[i]) - cv) / alpha + cv;
        }
        count += 1;
    }
    if count == 0 {
        return Rgb::BLACK;
    }
    let count = f64::from(count);
    Rgb(sum.map(|s| {
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let v = (s / count).trunc().clamp(0.0, 255.0) as u8;
        v
    }))
}

/// Change in summed squared difference from compositing `color`
/// through `mask` onto `current`, measured against `target`.
///
/// Negative values are improvements. Only covered pixels contribute.
#[must_use]
pub fn difference_change(mask: &AlphaMask, current: &RgbaImage, target: &RgbaImage, color: Rgb) -> f64 {
    let (w, h) = current.dimensions();
    let mut sum = 0.0f64;
    for (x, y, a) in mask.covered(w, h) {
        let a = f64::from(a) / 255.0;
        let b = 1.0 - a;
        let c = current.get_pixel(x, y);
        let t = target.get_pixel(x, y);
        for i in 0..3 {
            let tv = f64::from(t[i]);
            let cv = f64::from(c[i]);
            let before = tv - cv;
            let after = tv - f64::from(color.0[i]).mul_add(a, cv * b);
            sum -= before * before;
            sum += after * after;
        }
    }
    sum
}

/// Composite `color` through `mask` onto `canvas` in place.
///
/// Uses the same blend as [`difference_change`] so an applied step
/// lands where its score predicted, up to 8-bit rounding.
pub fn composite(canvas: &mut RgbaImage, mask: &AlphaMask, color: Rgb) {
    let (w, h) = canvas.dimensions();
    for (x, y, a) in mask.covered(w, h) {
        let a = f64::from(a) / 255.0;
        let px = canvas.get_pixel_mut(x, y);
        for i in 0..3 {
            let blended = f64::from(color.0[i]).mul_add(a, f64::from(px[i]) * (1.0 - a));
            #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                px[i] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> RgbaImage {
        filled(w, h, Rgb(rgb))
    }

    fn full_mask(left: i32, top: i32, w: u32, h: u32, a: u8) -> AlphaMask {
        AlphaMask {
            bbox: BoundingBox::new(left, top, i64::from(w), i64::from(h)),
            alpha: vec![a; (w * h) as usize],
        }
    }

    #[test]
    fn difference_ignores_alpha_channel() {
        let a = RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 0]));
        let b = RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 255]));
        assert!(difference(&a, &b).abs() < f64::EPSILON);
    }

    #[test]
    fn black_to_white_distance_is_one() {
        let d = distance(&solid(3, 2, [0, 0, 0]), &solid(3, 2, [255, 255, 255]));
        assert!((d - 1.0).abs() < 1e-12);
    }

    #[test]
    fn distance_difference_conversions_are_inverse() {
        let pixels = 640 * 480;
        let diff = 123_456_789.0;
        let back = distance_to_difference(difference_to_distance(diff, pixels), pixels);
        assert!((back - diff).abs() / diff < 1e-12);
    }

    #[test]
    fn border_fill_averages_edges_only() {
        let mut img = solid(3, 3, [100, 100, 100]);
        img.put_pixel(1, 1, Rgba([255, 0, 0, 255]));
        assert_eq!(border_fill(&img), Rgb([100, 100, 100]));
    }

    #[test]
    fn border_fill_truncates() {
        let mut img = solid(2, 1, [0, 0, 0]);
        img.put_pixel(1, 0, Rgba([1, 3, 255, 255]));
        assert_eq!(border_fill(&img), Rgb([0, 1, 127]));
    }

    #[test]
    fn opaque_color_is_target_mean() {
        let current = solid(2, 1, [0, 0, 0]);
        let mut target = solid(2, 1, [100, 0, 0]);
        target.put_pixel(1, 0, Rgba([200, 50, 0, 255]));
        let mask = full_mask(0, 0, 2, 1, 255);
        assert_eq!(compute_color(&mask, &current, &target, 1.0), Rgb([150, 25, 0]));
    }

    #[test]
    fn translucent_color_overshoots_and_clamps() {
        let current = solid(1, 1, [0, 0, 0]);
        let target = solid(1, 1, [200, 200, 200]);
        let mask = full_mask(0, 0, 1, 1, 128);
        // (200 - 0) / 0.5 + 0 = 400, clamped.
        assert_eq!(compute_color(&mask, &current, &target, 0.5), Rgb::WHITE);
    }

    #[test]
    fn mask_outside_canvas_contributes_nothing() {
        let current = solid(2, 2, [0, 0, 0]);
        let target = solid(2, 2, [255, 255, 255]);
        let mask = full_mask(5, 5, 2, 2, 255);
        assert_eq!(compute_color(&mask, &current, &target, 1.0), Rgb::BLACK);
        assert!(difference_change(&mask, &current, &target, Rgb::WHITE).abs() < f64::EPSILON);
    }

    #[test]
    fn partially_clipped_mask_counts_visible_pixels() {
        let mask = full_mask(-1, -1, 2, 2, 255);
        let covered: Vec<_> = mask.covered(4, 4).collect();
        assert_eq!(covered, vec![(0, 0, 255)]);
    }

    #[test]
    fn difference_change_matches_full_recompute() {
        let current = solid(4, 4, [30, 60, 90]);
        let mut target = solid(4, 4, [30, 60, 90]);
        target.put_pixel(1, 1, Rgba([250, 10, 10, 255]));
        target.put_pixel(2, 1, Rgba([240, 20, 0, 255]));
        let mut mask = full_mask(1, 1, 2, 2, 255);
        mask.alpha[2] = 0;
        mask.alpha[3] = 64;

        let color = Rgb([245, 15, 5]);
        let predicted = difference(&target, &current) + difference_change(&mask, &current, &target, color);

        let mut drawn = current;
        composite(&mut drawn, &mask, color);
        let actual = difference(&target, &drawn);
        // Composite rounds to 8 bits; allow one unit per channel per pixel.
        assert!((predicted - actual).abs() < 3.0 * 2.0 * 255.0, "{predicted} vs {actual}");
    }
}
