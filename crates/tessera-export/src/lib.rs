//! tessera-export: Pure format serializers (sans-IO)
//!
//! Converts an [`Approximation`](tessera_approx::Approximation) into
//! output formats. Currently supports SVG.

pub mod svg;

pub use svg::{SvgMetadata, step_node, to_svg};
