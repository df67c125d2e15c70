//! Drawing the distance/elevation profile onto a transparent PDF page.
//!
//! The chart is laid out in the manner of a matplotlib figure: the data
//! rectangle occupies a page-normalized region, ticks point outwards, tick
//! and axis labels sit outside the rectangle, and free text annotations are
//! anchored in page coordinates.

use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::FontTransform;
use plotters_backend::{BackendCoord, DrawingErrorKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compose::PageSize;
use crate::font::FontResource;
use crate::pdf_backend::{PageCanvas, PdfBackend, PdfBackendError, UNITS_PER_POINT};
use crate::smoothing::gaussian_smooth;
use crate::style::{StyleConfig, TextBlock};
use crate::ticks::{decimals_for_step, format_tick, nice_ticks, tick_step};
use crate::track::{default_floor, TrackSample};
use crate::{FormatError, OverlayError, Result};

const FOREST_GREEN: RGBColor = RGBColor(34, 139, 34);
const GRID_GRAY: RGBColor = RGBColor(128, 128, 128);
const TITLE_RED: RGBColor = RGBColor(250, 67, 37);
const FILL_ALPHA: f64 = 0.5;

// Line widths and distances below are in points.
const CURVE_WIDTH: f64 = 1.5;
const FRAME_WIDTH: f64 = 0.8;
const TICK_LENGTH: f64 = 3.5;
const TICK_WIDTH: f64 = 0.8;
const TICK_PAD: f64 = 3.5;
const LABEL_PAD: f64 = 4.0;
/// Dash pattern of grid lines, in multiples of the grid line width.
const GRID_DASH: (f64, f64) = (3.7, 1.6);
const LINE_SPACING: f64 = 1.2;

/// Headroom above the highest point, as a fraction of the plotted span.
const HEADROOM: f64 = 0.05;
/// Smallest elevation span in metres shown on the y axis.
const MIN_SPAN_M: f64 = 10.0;

/// The numbers behind a rendered profile: the drawn polyline and the axes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileSeries {
    /// `(distance_km, elevation_m)` of the drawn curve, after smoothing.
    pub points: Vec<(f64, f64)>,
    pub floor: f64,
    pub x_max: f64,
    pub y_top: f64,
    pub x_ticks: Vec<f64>,
    pub y_ticks: Vec<f64>,
}

impl ProfileSeries {
    /// Compute curve, floor and axis ranges without drawing anything.
    pub fn prepare(sample: &TrackSample, style: &StyleConfig) -> Result<Self> {
        style.validate()?;
        if sample.len() < 2 {
            return Err(OverlayError::Geometry(format!(
                "at least 2 track points are needed, got {}",
                sample.len()
            )));
        }
        let x_max = sample.total_distance_km();
        if x_max <= 0.0 {
            return Err(OverlayError::Geometry("track has zero length".into()));
        }

        let floor = match style.zero_level {
            Some(level) => level,
            None => default_floor(sample)
                .ok_or_else(|| OverlayError::Geometry("track has no elevation".into()))?,
        };

        let curve = gaussian_smooth(sample.elevation_m(), style.smoothing_sigma);
        let peak = curve.iter().copied().fold(floor, f64::max);
        let span = (peak - floor).max(MIN_SPAN_M);
        let y_top = peak + span * HEADROOM;

        let points: Vec<(f64, f64)> = sample
            .distance_km()
            .iter()
            .copied()
            .zip(curve)
            .collect();

        Ok(Self {
            x_ticks: nice_ticks(0.0, x_max, style.bins_x_axis),
            y_ticks: nice_ticks(floor, y_top, style.bins_y_axis),
            points,
            floor,
            x_max,
            y_top,
        })
    }

    pub fn elevations(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|(_, e)| *e)
    }
}

/// A single-page transparent PDF holding the drawn profile.
#[derive(Clone, Debug)]
pub struct OverlayPage {
    pub bytes: Vec<u8>,
    pub page_size: PageSize,
    pub series: ProfileSeries,
}

/// Renders profiles with one embedded font. Holds no other state, so a
/// renderer can be reused for any number of tracks.
pub struct ProfileRenderer {
    font: FontResource,
}

/// Tick labels, prepared up front so encoding problems surface before drawing.
struct AxisLabels {
    x: Vec<(f64, String)>,
    y: Vec<(f64, String)>,
    /// Widest y tick label in points.
    y_width_pt: f64,
}

type DrawResult = std::result::Result<(), DrawingAreaErrorKind<PdfBackendError>>;

impl ProfileRenderer {
    pub fn new(font: FontResource) -> Self {
        Self { font }
    }

    pub fn render(
        &self,
        sample: &TrackSample,
        page_size: PageSize,
        style: &StyleConfig,
    ) -> Result<OverlayPage> {
        let (width_pt, height_pt) = (page_size.width_pt(), page_size.height_pt());
        if !(width_pt.is_finite() && height_pt.is_finite() && width_pt > 0.0 && height_pt > 0.0) {
            return Err(OverlayError::InvalidParameter(format!(
                "page size must be positive, got {:.3} x {:.3} in",
                page_size.width_in, page_size.height_in
            )));
        }

        let series = ProfileSeries::prepare(sample, style)?;
        let labels = self.axis_labels(&series, style)?;
        debug!(
            floor = series.floor,
            y_top = series.y_top,
            x_ticks = series.x_ticks.len(),
            y_ticks = series.y_ticks.len(),
            "prepared profile"
        );

        let mut canvas = PageCanvas::new(&self.font, width_pt, height_pt);
        {
            let root = PdfBackend::new(&mut canvas).into_drawing_area();
            self.draw(&root, &series, &labels, style)
                .map_err(plot_error)?;
            root.present().map_err(plot_error)?;
        }
        let operations = canvas.operation_count();
        let bytes = canvas.into_pdf()?;
        info!(
            points = series.points.len(),
            operations,
            bytes = bytes.len(),
            "rendered profile overlay"
        );

        Ok(OverlayPage {
            bytes,
            page_size,
            series,
        })
    }

    fn axis_labels(&self, series: &ProfileSeries, style: &StyleConfig) -> Result<AxisLabels> {
        let x_decimals = decimals_for_step(tick_step(0.0, series.x_max, style.bins_x_axis));
        let y_decimals =
            decimals_for_step(tick_step(series.floor, series.y_top, style.bins_y_axis));
        let x: Vec<(f64, String)> = series
            .x_ticks
            .iter()
            .map(|&v| (v, format_tick(v, x_decimals)))
            .collect();
        let y: Vec<(f64, String)> = series
            .y_ticks
            .iter()
            .map(|&v| (v, format_tick(v, y_decimals)))
            .collect();

        let mut y_width_pt: f64 = 0.0;
        for (_, label) in &y {
            y_width_pt = y_width_pt.max(self.font.text_width(label, style.ticks_font_size)?);
        }
        for text in [&style.x_label_text, &style.y_label_text] {
            self.font.encode(text)?;
        }
        Ok(AxisLabels { x, y, y_width_pt })
    }

    fn draw(
        &self,
        root: &DrawingArea<PdfBackend<'_, '_>, Shift>,
        series: &ProfileSeries,
        labels: &AxisLabels,
        style: &StyleConfig,
    ) -> DrawResult {
        let (w, h) = root.dim_in_pixel();
        let (w, h) = (w as f64, h as f64);
        let left = (style.plot_left * w).round() as i32;
        let right = (style.plot_right() * w).round() as i32;
        let top = ((1.0 - style.plot_top()) * h).round() as i32;
        let bottom = ((1.0 - style.plot_bottom) * h).round() as i32;

        let plot_area = root.clone().shrink(
            (left, top),
            ((right - left).max(1) as u32, (bottom - top).max(1) as u32),
        );
        let mut chart = ChartBuilder::on(&plot_area)
            .build_cartesian_2d(0.0..series.x_max, series.floor..series.y_top)?;

        let x_pixels: Vec<(i32, &str)> = labels
            .x
            .iter()
            .map(|(v, text)| (chart.backend_coord(&(*v, series.floor)).0, text.as_str()))
            .collect();
        let y_pixels: Vec<(i32, &str)> = labels
            .y
            .iter()
            .map(|(v, text)| (chart.backend_coord(&(0.0, *v)).1, text.as_str()))
            .collect();

        if style.grid_line_width > 0.0 {
            let grid = GRID_GRAY.stroke_width(stroke(style.grid_line_width));
            let on = units(GRID_DASH.0 * style.grid_line_width);
            let off = units(GRID_DASH.1 * style.grid_line_width);
            for &(px, _) in &x_pixels {
                for segment in dashed((px, bottom), (px, top), on, off) {
                    root.draw(&PathElement::new(segment.to_vec(), grid))?;
                }
            }
            for &(py, _) in &y_pixels {
                for segment in dashed((left, py), (right, py), on, off) {
                    root.draw(&PathElement::new(segment.to_vec(), grid))?;
                }
            }
        }

        chart.draw_series(AreaSeries::new(
            series.points.iter().copied(),
            series.floor,
            FOREST_GREEN.mix(FILL_ALPHA).filled(),
        ))?;
        chart.draw_series(LineSeries::new(
            series.points.iter().copied(),
            BLACK.stroke_width(stroke(CURVE_WIDTH)),
        ))?;

        root.draw(&Rectangle::new(
            [(left, top), (right, bottom)],
            BLACK.stroke_width(stroke(FRAME_WIDTH)),
        ))?;

        let tick = BLACK.stroke_width(stroke(TICK_WIDTH));
        let tick_len = units(TICK_LENGTH).round() as i32;
        let tick_gap = units(TICK_LENGTH + TICK_PAD).round() as i32;
        let tick_font = FontDesc::new(
            FontFamily::SansSerif,
            units(style.ticks_font_size),
            FontStyle::Normal,
        );

        let below = tick_font
            .color(&BLACK)
            .pos(Pos::new(HPos::Center, VPos::Top));
        for &(px, text) in &x_pixels {
            root.draw(&PathElement::new(vec![(px, bottom), (px, bottom + tick_len)], tick))?;
            root.draw(&Text::new(text.to_string(), (px, bottom + tick_gap), below.clone()))?;
        }
        let beside = tick_font
            .color(&BLACK)
            .pos(Pos::new(HPos::Right, VPos::Center));
        for &(py, text) in &y_pixels {
            root.draw(&PathElement::new(vec![(left - tick_len, py), (left, py)], tick))?;
            root.draw(&Text::new(text.to_string(), (left - tick_gap, py), beside.clone()))?;
        }

        let label_font = FontDesc::new(
            FontFamily::SansSerif,
            units(style.label_font_size),
            FontStyle::Bold,
        );
        let tick_line = (self.font.ascent() - self.font.descent()) / 1000.0
            * units(style.ticks_font_size);
        let x_label_y = bottom + tick_gap + (tick_line + units(LABEL_PAD)).round() as i32;
        root.draw(&Text::new(
            style.x_label_text.clone(),
            ((left + right) / 2, x_label_y),
            label_font
                .color(&BLACK)
                .pos(Pos::new(HPos::Center, VPos::Top)),
        ))?;
        let y_label_x =
            left - tick_gap - units(labels.y_width_pt + LABEL_PAD).round() as i32;
        root.draw(&Text::new(
            style.y_label_text.clone(),
            (y_label_x, (top + bottom) / 2),
            label_font
                .color(&BLACK)
                .transform(FontTransform::Rotate270)
                .pos(Pos::new(HPos::Center, VPos::Bottom)),
        ))?;

        for (block, color) in [
            (style.title(), TITLE_RED),
            (style.subtitle(), BLACK),
            (style.information(), BLACK),
        ] {
            draw_block(root, &block, color, (w, h))?;
        }
        Ok(())
    }
}

/// Draw a possibly multi-line annotation centered on its anchor.
fn draw_block(
    root: &DrawingArea<PdfBackend<'_, '_>, Shift>,
    block: &TextBlock<'_>,
    color: RGBColor,
    (w, h): (f64, f64),
) -> DrawResult {
    if !block.is_visible() {
        return Ok(());
    }
    let size = units(block.font_size);
    let style = FontDesc::new(FontFamily::SansSerif, size, FontStyle::Normal)
        .color(&color)
        .pos(Pos::new(HPos::Center, VPos::Center));
    let lines: Vec<&str> = block.text.lines().collect();
    let (cx, cy) = (block.x * w, (1.0 - block.y) * h);
    let middle = (lines.len() as f64 - 1.0) / 2.0;
    for (i, line) in lines.iter().enumerate() {
        let y = cy + (i as f64 - middle) * LINE_SPACING * size;
        root.draw(&Text::new(
            line.to_string(),
            (cx.round() as i32, y.round() as i32),
            style.clone(),
        ))?;
    }
    Ok(())
}

fn units(points: f64) -> f64 {
    points * UNITS_PER_POINT
}

fn stroke(points: f64) -> u32 {
    units(points).round().max(1.0) as u32
}

/// Split a straight line into dash segments of `on` units separated by `off`.
fn dashed(from: BackendCoord, to: BackendCoord, on: f64, off: f64) -> Vec<[BackendCoord; 2]> {
    let (dx, dy) = ((to.0 - from.0) as f64, (to.1 - from.1) as f64);
    let length = dx.hypot(dy);
    if length == 0.0 || on <= 0.0 {
        return Vec::new();
    }
    let at = |d: f64| {
        (
            from.0 + (dx * d / length).round() as i32,
            from.1 + (dy * d / length).round() as i32,
        )
    };
    let mut segments = Vec::new();
    let mut start = 0.0;
    while start < length {
        let end = (start + on).min(length);
        segments.push([at(start), at(end)]);
        start = end + off.max(0.0);
    }
    segments
}

fn plot_error(err: DrawingAreaErrorKind<PdfBackendError>) -> OverlayError {
    match err {
        DrawingAreaErrorKind::BackendError(DrawingErrorKind::DrawingError(
            PdfBackendError::Encoding(ch),
        )) => FormatError::Encoding(ch).into(),
        other => OverlayError::Render(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::page_size;
    use std::path::Path;

    const A4: PageSize = PageSize {
        width_in: 8.27,
        height_in: 11.69,
    };

    fn renderer() -> ProfileRenderer {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/DejaVuSans.ttf");
        ProfileRenderer::new(FontResource::from_file(&path).unwrap())
    }

    fn hills() -> TrackSample {
        TrackSample::new(
            (0..50).map(|i| (i as f64 * 0.1, 400.0 + 80.0 * (i as f64 / 5.0).sin())),
        )
        .unwrap()
    }

    #[test]
    fn zero_sigma_draws_raw_elevations() {
        let sample = hills();
        let series = ProfileSeries::prepare(&sample, &StyleConfig::default()).unwrap();
        for (drawn, raw) in series.elevations().zip(sample.elevation_m()) {
            assert_eq!(drawn.to_bits(), raw.to_bits());
        }
        assert_eq!(series.points.len(), sample.len());
    }

    #[test]
    fn default_floor_and_headroom() {
        let sample = hills();
        let series = ProfileSeries::prepare(&sample, &StyleConfig::default()).unwrap();
        let min = sample.min_elevation().unwrap();
        assert_eq!(series.floor, min * 0.95);
        assert!(series.y_top > sample.max_elevation().unwrap());
        assert_eq!(series.x_max, sample.total_distance_km());
        assert!(series.y_ticks.iter().all(|t| *t >= series.floor && *t <= series.y_top));
        assert!(series.x_ticks.len() <= 26);
    }

    #[test]
    fn explicit_zero_level_wins() {
        let style = StyleConfig {
            zero_level: Some(250.0),
            ..StyleConfig::default()
        };
        let series = ProfileSeries::prepare(&hills(), &style).unwrap();
        assert_eq!(series.floor, 250.0);
    }

    #[test]
    fn flat_track_keeps_a_usable_axis() {
        let sample = TrackSample::new(vec![(0.0, 100.0), (1.0, 100.0), (2.0, 100.0)]).unwrap();
        let style = StyleConfig {
            zero_level: Some(100.0),
            ..StyleConfig::default()
        };
        let series = ProfileSeries::prepare(&sample, &style).unwrap();
        assert!(series.y_top - series.floor >= MIN_SPAN_M * HEADROOM);
    }

    #[test]
    fn too_few_points_is_a_geometry_error() {
        let sample = TrackSample::new(vec![(0.0, 100.0)]).unwrap();
        let err = ProfileSeries::prepare(&sample, &StyleConfig::default()).unwrap_err();
        assert!(matches!(err, OverlayError::Geometry(_)));
    }

    #[test]
    fn zero_length_track_is_a_geometry_error() {
        let sample = TrackSample::new(vec![(0.0, 100.0), (0.0, 120.0)]).unwrap();
        let err = ProfileSeries::prepare(&sample, &StyleConfig::default()).unwrap_err();
        assert!(matches!(err, OverlayError::Geometry(_)));
    }

    #[test]
    fn invalid_style_is_rejected() {
        let style = StyleConfig {
            plot_left: 0.9,
            plot_width: 0.5,
            ..StyleConfig::default()
        };
        let err = ProfileSeries::prepare(&hills(), &style).unwrap_err();
        assert!(matches!(err, OverlayError::InvalidParameter(_)));
    }

    #[test]
    fn overlay_page_matches_requested_size() {
        let overlay = renderer()
            .render(&hills(), A4, &StyleConfig::default())
            .unwrap();
        let size = page_size(&overlay.bytes).unwrap();
        assert!((size.width_in - A4.width_in).abs() < 1e-3);
        assert!((size.height_in - A4.height_in).abs() < 1e-3);
        assert_eq!(overlay.page_size, A4);
    }

    #[test]
    fn annotations_are_written_as_text() {
        let style = StyleConfig {
            title_text: "Alpenpass\nEtappe 3".into(),
            information_text: "1200 hm".into(),
            ..StyleConfig::default()
        };
        let overlay = renderer().render(&hills(), A4, &style).unwrap();
        let doc = lopdf::Document::load_mem(&overlay.bytes).unwrap();
        let page = *doc.get_pages().values().next().unwrap();
        let content = doc.get_page_content(page).unwrap();
        let text = String::from_utf8_lossy(&content);
        assert!(text.contains("(Alpenpass)"));
        assert!(text.contains("(Etappe 3)"));
        assert!(text.contains("(1200 hm)"));
    }

    #[test]
    fn unencodable_annotation_is_a_format_error() {
        let style = StyleConfig {
            subtitle_text: "Gipfel \u{26F0}".into(),
            ..StyleConfig::default()
        };
        let err = renderer().render(&hills(), A4, &style).unwrap_err();
        assert!(matches!(
            err,
            OverlayError::Format(FormatError::Encoding('\u{26F0}'))
        ));
    }

    #[test]
    fn degenerate_page_size_is_rejected() {
        let err = renderer()
            .render(&hills(), PageSize::new(0.0, 11.0), &StyleConfig::default())
            .unwrap_err();
        assert!(matches!(err, OverlayError::InvalidParameter(_)));
    }

    #[test]
    fn dashes_cover_the_line() {
        let segments = dashed((0, 0), (100, 0), 30.0, 10.0);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], [(0, 0), (30, 0)]);
        assert_eq!(segments[2], [(80, 0), (100, 0)]);
    }
}
