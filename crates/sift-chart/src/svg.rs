//! SVG output for bar and scatter charts.

use async_trait::async_trait;
use sift_core::model::{ChartArtifact, ChartData, ChartKind, ChartPoint};
use sift_core::{ChartRenderer, CollaboratorError};
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::debug;

pub const MEDIA_TYPE: &str = "image/svg+xml";

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 400.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 110.0;
const BAR_COLOR: &str = "#4c78a8";
const POINT_COLOR: &str = "#f58518";

/// Plot area in pixel coordinates.
struct Frame {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

impl Frame {
    fn new() -> Self {
        Self {
            left: MARGIN_LEFT,
            top: MARGIN_TOP,
            width: WIDTH - MARGIN_LEFT - MARGIN_RIGHT,
            height: HEIGHT - MARGIN_TOP - MARGIN_BOTTOM,
        }
    }

    fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Pixel y of a value in `[0, 1]`.
    fn y(&self, value: f64) -> f64 {
        self.bottom() - value.clamp(0.0, 1.0) * self.height
    }

    /// Pixel x of a value in `[0, 1]`.
    fn x(&self, value: f64) -> f64 {
        self.left + value.clamp(0.0, 1.0) * self.width
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SvgChartRenderer;

impl SvgChartRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render one chart to SVG text.
    pub fn render_svg(&self, chart: &ChartData) -> String {
        let frame = Frame::new();
        let mut svg = String::new();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="11">"#,
            w = WIDTH,
            h = HEIGHT
        );
        let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="22" text-anchor="middle" font-size="15">{}</text>"#,
            WIDTH / 2.0,
            escape(&chart.title)
        );

        axes(&mut svg, &frame, chart);
        match chart.kind {
            ChartKind::Bar => bars(&mut svg, &frame, &chart.points),
            ChartKind::Scatter => scatter(&mut svg, &frame, &chart.points),
        }

        svg.push_str("</svg>\n");
        svg
    }
}

#[async_trait]
impl ChartRenderer for SvgChartRenderer {
    async fn render(&self, charts: &[ChartData]) -> Result<BTreeMap<String, ChartArtifact>, CollaboratorError> {
        let rendered: BTreeMap<String, ChartArtifact> = charts
            .iter()
            .map(|chart| {
                (
                    chart.name.clone(),
                    ChartArtifact::new(MEDIA_TYPE, self.render_svg(chart).into_bytes()),
                )
            })
            .collect();
        debug!(count = rendered.len(), "Rendered SVG charts");
        Ok(rendered)
    }
}

fn axes(svg: &mut String, frame: &Frame, chart: &ChartData) {
    let bottom = frame.bottom();
    let right = frame.left + frame.width;
    let _ = writeln!(
        svg,
        r##"<g stroke="#333"><line x1="{l}" y1="{t}" x2="{l}" y2="{b}"/><line x1="{l}" y1="{b}" x2="{r}" y2="{b}"/></g>"##,
        l = frame.left,
        t = frame.top,
        b = bottom,
        r = right
    );
    for tick in 0..=4 {
        let value = tick as f64 / 4.0;
        let y = frame.y(value);
        let _ = writeln!(
            svg,
            r##"<line x1="{}" y1="{y:.1}" x2="{}" y2="{y:.1}" stroke="#ddd"/><text x="{}" y="{:.1}" text-anchor="end">{value:.2}</text>"##,
            frame.left,
            right,
            frame.left - 6.0,
            y + 4.0,
        );
    }
    let _ = writeln!(
        svg,
        r#"<text x="16" y="{:.1}" transform="rotate(-90 16 {:.1})" text-anchor="middle">{}</text>"#,
        frame.top + frame.height / 2.0,
        frame.top + frame.height / 2.0,
        escape(&chart.y_label)
    );
    let _ = writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
        frame.left + frame.width / 2.0,
        HEIGHT - 8.0,
        escape(&chart.x_label)
    );
}

fn bars(svg: &mut String, frame: &Frame, points: &[ChartPoint]) {
    if points.is_empty() {
        return;
    }
    let slot = frame.width / points.len() as f64;
    let bar_width = slot * 0.7;
    for (i, point) in points.iter().enumerate() {
        let x = frame.left + slot * i as f64 + (slot - bar_width) / 2.0;
        let y = frame.y(point.y);
        let label_x = x + bar_width / 2.0;
        let label_y = frame.bottom() + 12.0;
        let _ = writeln!(
            svg,
            r#"<rect x="{x:.1}" y="{y:.1}" width="{bar_width:.1}" height="{:.1}" fill="{BAR_COLOR}"><title>{}: {:.3}</title></rect>"#,
            frame.bottom() - y,
            escape(&point.label),
            point.y
        );
        let _ = writeln!(
            svg,
            r#"<text x="{label_x:.1}" y="{label_y:.1}" text-anchor="end" transform="rotate(-40 {label_x:.1} {label_y:.1})">{}</text>"#,
            escape(&point.label)
        );
    }
}

fn scatter(svg: &mut String, frame: &Frame, points: &[ChartPoint]) {
    for tick in 0..=4 {
        let value = tick as f64 / 4.0;
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{value:.2}</text>"#,
            frame.x(value),
            frame.bottom() + 16.0
        );
    }
    for point in points {
        let _ = writeln!(
            svg,
            r#"<circle cx="{:.1}" cy="{:.1}" r="5" fill="{POINT_COLOR}" fill-opacity="0.8"><title>{} ({:.3}, {:.3})</title></circle>"#,
            frame.x(point.x),
            frame.y(point.y),
            escape(&point.label),
            point.x,
            point.y
        );
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
