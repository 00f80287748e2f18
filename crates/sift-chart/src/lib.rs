//! # Sift Chart
//!
//! Renders chart data to standalone SVG documents.

pub mod svg;

pub use svg::SvgChartRenderer;
