//! Shared types for the tessera approximation optimizer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can hand targets and
/// renders around without depending on `image` directly.
pub use image::RgbaImage;

/// A point on the pixel grid.
///
/// Shapes are generated and mutated in whole pixels, so coordinates
/// are integers. Values may fall outside the canvas; rasterization
/// clips them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: i32,
    /// Vertical position (pixels from top edge).
    pub y: i32,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Offset this point by whole pixels.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// Axis-aligned pixel bounding box of a shape.
///
/// `width` and `height` are always at least 1, even for degenerate
/// shapes whose points are collinear or coincident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Leftmost column (may be negative).
    pub left: i32,
    /// Topmost row (may be negative).
    pub top: i32,
    /// Width in pixels, at least 1.
    pub width: u32,
    /// Height in pixels, at least 1.
    pub height: u32,
}

impl BoundingBox {
    /// Build a box from its corner and extents, clamping each extent to
    /// at least one pixel.
    #[must_use]
    pub fn new(left: i32, top: i32, width: i64, height: i64) -> Self {
        Self {
            left,
            top,
            width: u32::try_from(width.max(1)).unwrap_or(u32::MAX),
            height: u32::try_from(height.max(1)).unwrap_or(u32::MAX),
        }
    }

    /// Smallest box enclosing all `points`.
    ///
    /// Returns a 1×1 box at the origin for an empty slice.
    #[must_use]
    pub fn enclosing(points: &[Point]) -> Self {
        let Some(first) = points.first() else {
            return Self::new(0, 0, 1, 1);
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Self::new(
            min_x,
            min_y,
            i64::from(max_x) - i64::from(min_x),
            i64::from(max_y) - i64::from(min_y),
        )
    }

    /// Number of pixels covered by the box.
    #[must_use]
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total number of pixels.
    #[must_use]
    pub const fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// An opaque RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    /// Black.
    pub const BLACK: Self = Self([0, 0, 0]);
    /// White.
    pub const WHITE: Self = Self([255, 255, 255]);

    /// Parse a CSS hex colour (`"#rgb"` or `"#rrggbb"`, surrounding
    /// whitespace allowed).
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::InvalidColor`] if the string is not a
    /// hex colour in one of the two accepted forms.
    pub fn from_hex(s: &str) -> Result<Self, OptimizerError> {
        let s = s.trim();
        let hex = s
            .strip_prefix('#')
            .ok_or_else(|| OptimizerError::InvalidColor(s.to_owned()))?;
        match hex.len() {
            3 => {
                // Short form: #rgb → #rrggbb
                let mut rgb = [0u8; 3];
                for (i, ch) in hex.chars().enumerate() {
                    let n = ch
                        .to_digit(16)
                        .ok_or_else(|| OptimizerError::InvalidColor(s.to_owned()))?;
                    #[expect(clippy::cast_possible_truncation)]
                    {
                        rgb[i] = (n * 17) as u8;
                    }
                }
                Ok(Self(rgb))
            }
            6 if hex.is_ascii() => {
                let r = u8::from_str_radix(&hex[0..2], 16);
                let g = u8::from_str_radix(&hex[2..4], 16);
                let b = u8::from_str_radix(&hex[4..6], 16);
                match (r, g, b) {
                    (Ok(r), Ok(g), Ok(b)) => Ok(Self([r, g, b])),
                    _ => Err(OptimizerError::InvalidColor(s.to_owned())),
                }
            }
            _ => Err(OptimizerError::InvalidColor(s.to_owned())),
        }
    }

    /// Lower-case `#rrggbb` form.
    #[must_use]
    pub fn to_hex(self) -> String {
        let [r, g, b] = self.0;
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "rgb({r}, {g}, {b})")
    }
}

/// The shape variants the optimizer can place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// Three vertices clustered around a random anchor.
    Triangle,
    /// Axis-aligned rectangle spanned by two random points.
    Rectangle,
    /// Free polygon with [`crate::shape::FREE_POLYGON_VERTICES`] vertices.
    Polygon,
    /// Axis-aligned ellipse.
    Ellipse,
    /// A single text glyph.
    Glyph,
}

impl ShapeKind {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Triangle,
        Self::Rectangle,
        Self::Polygon,
        Self::Ellipse,
        Self::Glyph,
    ];
}

/// How the empty canvas is filled before the first step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundFill {
    /// Mean colour of the target's one-pixel border.
    #[default]
    Auto,
    /// A fixed colour.
    Fixed(Rgb),
}

/// Configuration for an optimizer run.
///
/// All parameters have defaults; [`OptimizerConfig::validate`] checks
/// the invariants before a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Longest side, in pixels, of the raster the search works on.
    pub compute_resolution: u32,

    /// Longest side, in pixels, of rendered output.
    pub view_resolution: u32,

    /// Number of steps (shape placements attempted).
    pub total_steps: u32,

    /// Random shapes scored per step before refinement.
    pub trials_per_step: u32,

    /// Opacity every new shape starts with, in `(0, 1]`.
    pub base_alpha: f32,

    /// Whether refinement may also perturb opacity.
    pub mutate_alpha_enabled: bool,

    /// Refinement stops after this many consecutive non-improving
    /// mutations.
    pub max_failed_mutations_per_step: u32,

    /// Which shape variants trials draw from (uniformly).
    pub enabled_shape_variants: Vec<ShapeKind>,

    /// Canvas background.
    pub background_fill: BackgroundFill,

    /// Seed for the shape generator. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl OptimizerConfig {
    /// Default compute resolution in pixels.
    pub const DEFAULT_COMPUTE_RESOLUTION: u32 = 256;
    /// Default view resolution in pixels.
    pub const DEFAULT_VIEW_RESOLUTION: u32 = 512;
    /// Default number of steps.
    pub const DEFAULT_TOTAL_STEPS: u32 = 100;
    /// Default trials per step.
    pub const DEFAULT_TRIALS_PER_STEP: u32 = 200;
    /// Default starting alpha.
    pub const DEFAULT_BASE_ALPHA: f32 = 0.5;
    /// Default refinement patience.
    pub const DEFAULT_MAX_FAILED_MUTATIONS: u32 = 30;

    /// Check the configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::InvalidConfig`] if a resolution, the
    /// step count or the trial count is zero, if `base_alpha` is outside
    /// `(0, 1]`, or if no shape variant is enabled.
    pub fn validate(&self) -> Result<(), OptimizerError> {
        if self.compute_resolution == 0 || self.view_resolution == 0 {
            return Err(OptimizerError::InvalidConfig(
                "resolutions must be at least 1 pixel".to_owned(),
            ));
        }
        if self.total_steps == 0 {
            return Err(OptimizerError::InvalidConfig(
                "total_steps must be at least 1".to_owned(),
            ));
        }
        if self.trials_per_step == 0 {
            return Err(OptimizerError::InvalidConfig(
                "trials_per_step must be at least 1".to_owned(),
            ));
        }
        if !(self.base_alpha > 0.0 && self.base_alpha <= 1.0) {
            return Err(OptimizerError::InvalidConfig(format!(
                "base_alpha must be in (0, 1], got {}",
                self.base_alpha
            )));
        }
        if self.enabled_shape_variants.is_empty() {
            return Err(OptimizerError::InvalidConfig(
                "at least one shape variant must be enabled".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            compute_resolution: Self::DEFAULT_COMPUTE_RESOLUTION,
            view_resolution: Self::DEFAULT_VIEW_RESOLUTION,
            total_steps: Self::DEFAULT_TOTAL_STEPS,
            trials_per_step: Self::DEFAULT_TRIALS_PER_STEP,
            base_alpha: Self::DEFAULT_BASE_ALPHA,
            mutate_alpha_enabled: false,
            max_failed_mutations_per_step: Self::DEFAULT_MAX_FAILED_MUTATIONS,
            enabled_shape_variants: vec![
                ShapeKind::Triangle,
                ShapeKind::Rectangle,
                ShapeKind::Polygon,
                ShapeKind::Ellipse,
            ],
            background_fill: BackgroundFill::Auto,
            seed: None,
        }
    }
}

/// Errors that can occur while setting up or running the optimizer.
#[derive(Debug, thiserror::Error)]
pub enum OptimizerError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty, or the image has no pixels.
    #[error("target image is empty")]
    EmptyTarget,

    /// Optimizer configuration is invalid.
    #[error("invalid optimizer configuration: {0}")]
    InvalidConfig(String),

    /// A colour string could not be parsed.
    #[error("invalid colour: {0:?}")]
    InvalidColor(String),
}
