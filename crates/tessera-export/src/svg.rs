//! SVG export serializer.
//!
//! Converts an [`Approximation`] into an SVG string using the [`svg`]
//! crate for document construction and XML escaping.
//!
//! The `viewBox` is the compute raster, so shape coordinates are
//! emitted unchanged; `width`/`height` are the view size. Everything is
//! clipped to the canvas, painted over a background `<rect>`, and each
//! applied step becomes one node carrying its `fill` and `fill-opacity`.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use svg::Document;
use svg::node::element::{
    ClipPath, Definitions, Description, Element, Ellipse, Group, Path, Rectangle, Text as TextElement,
    Title,
};
use svg::node::{Node, Text};

use tessera_approx::{Approximation, Point, Shape, Step};

/// `id` of the canvas clip path.
const CLIP_ID: &str = "canvas";

/// Namespace of the embedded optimizer configuration element.
const CONFIG_NAMESPACE: &str = "urn:tessera:optimizer:1";

/// Metadata to embed in the SVG document.
///
/// All fields are optional. Text values are XML-escaped by the `svg`
/// crate.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Document title, emitted as `<title>`.
    ///
    /// Typically the source image filename (without extension).
    pub title: Option<&'a str>,

    /// Document description, emitted as `<desc>`.
    pub description: Option<&'a str>,

    /// Serialized [`OptimizerConfig`](tessera_approx::OptimizerConfig),
    /// emitted inside `<metadata>` wrapped in a namespaced
    /// `<tessera:config>` element.
    pub config_json: Option<&'a str>,
}

/// Path data for a closed polygon: `M x,y L x,y ... Z`.
///
/// Returns `None` for fewer than 3 points.
fn polygon_path_d(points: &[Point]) -> Option<String> {
    if points.len() < 3 {
        return None;
    }
    let mut parts: Vec<String> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let cmd = if i == 0 { 'M' } else { 'L' };
            format!("{cmd}{},{}", p.x, p.y)
        })
        .collect();
    parts.push("Z".to_owned());
    Some(parts.join(" "))
}

/// Format an opacity with two decimals.
fn opacity(alpha: f32) -> String {
    format!("{alpha:.2}")
}

/// Build the SVG node for one applied step.
///
/// Polygons become `<path>`, ellipses `<ellipse>` and glyphs a centred
/// `<text>`. Returns `None` for a degenerate polygon.
#[must_use]
pub fn step_node(step: &Step) -> Option<Box<dyn Node>> {
    let fill = step.color.to_string();
    let fill_opacity = opacity(step.alpha);
    let node: Box<dyn Node> = match &step.shape {
        Shape::Polygon { points, .. } => Box::new(
            Path::new()
                .set("d", polygon_path_d(points)?)
                .set("fill", fill)
                .set("fill-opacity", fill_opacity),
        ),
        Shape::Ellipse { center, rx, ry } => Box::new(
            Ellipse::new()
                .set("cx", center.x)
                .set("cy", center.y)
                .set("rx", *rx)
                .set("ry", *ry)
                .set("fill", fill)
                .set("fill-opacity", fill_opacity),
        ),
        Shape::Glyph { center, text, size } => Box::new(
            TextElement::new(text.to_string())
                .set("x", center.x)
                .set("y", center.y)
                .set("font-size", *size)
                .set("font-family", "sans-serif")
                .set("text-anchor", "middle")
                .set("dominant-baseline", "central")
                .set("fill", fill)
                .set("fill-opacity", fill_opacity),
        ),
    };
    Some(node)
}

/// Serialize an approximation into an SVG document string.
///
/// # Examples
///
/// ```
/// use tessera_approx::{Approximation, Dimensions, Rgb, Shape, Step};
/// use tessera_export::{SvgMetadata, to_svg};
///
/// let approximation = Approximation {
///     dimensions: Dimensions { width: 40, height: 30 },
///     view_scale: 2.0,
///     background: Rgb([255, 255, 255]),
///     steps: vec![Step {
///         shape: Shape::rectangle(0, 0, 10, 10),
///         alpha: 0.5,
///         color: Rgb([255, 0, 0]),
///         distance: 0.1,
///     }],
/// };
/// let metadata = SvgMetadata {
///     title: Some("sunset"),
///     ..SvgMetadata::default()
/// };
/// let svg = to_svg(&approximation, &metadata);
/// assert!(svg.contains("<title>sunset</title>"));
/// assert!(svg.contains(r#"viewBox="0 0 40 30""#));
/// assert!(svg.contains(r#"width="80""#));
/// assert!(svg.contains(r#"fill="rgb(255, 0, 0)""#));
/// assert!(svg.contains(r#"fill-opacity="0.50""#));
/// ```
#[must_use]
pub fn to_svg(approximation: &Approximation, metadata: &SvgMetadata<'_>) -> String {
    let w = approximation.dimensions.width;
    let h = approximation.dimensions.height;
    let view = approximation.view_dimensions();

    let mut doc = Document::new()
        .set("width", view.width)
        .set("height", view.height)
        .set("viewBox", (0, 0, w, h));

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }

    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }

    if let Some(config_json) = metadata.config_json {
        let mut config_el = Element::new("tessera:config");
        config_el.assign("xmlns:tessera", CONFIG_NAMESPACE);
        config_el.append(Text::new(config_json));
        let mut metadata_el = Element::new("metadata");
        metadata_el.append(config_el);
        doc = doc.add(metadata_el);
    }

    let canvas = || Rectangle::new().set("x", 0).set("y", 0).set("width", w).set("height", h);
    doc = doc.add(Definitions::new().add(ClipPath::new().set("id", CLIP_ID).add(canvas())));
    doc = doc.add(canvas().set("fill", approximation.background.to_string()));

    let mut group = Group::new().set("clip-path", format!("url(#{CLIP_ID})"));
    for node in approximation.steps.iter().filter_map(step_node) {
        group = group.add(node);
    }
    doc = doc.add(group);

    // The svg crate omits the XML declaration, so we prepend it.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}
