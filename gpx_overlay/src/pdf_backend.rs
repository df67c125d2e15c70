//! A plotters drawing backend that records PDF content-stream operators.
//!
//! plotters addresses pixels with integer coordinates, so the page is laid
//! out on a canvas of `UNITS_PER_POINT` units per PDF point with the origin in
//! the top-left corner. Every primitive is converted to user space (points,
//! origin bottom-left) when it is recorded.

use std::collections::BTreeSet;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use plotters_backend::text_anchor::{HPos, VPos};
use plotters_backend::{
    BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingBackend, DrawingErrorKind,
    FontStyle, FontTransform,
};
use thiserror::Error;

use crate::font::{winansi_code, FontResource};
use crate::Result;

/// Canvas units per PDF point.
pub const UNITS_PER_POINT: f64 = 10.0;

/// Resource name of the embedded font on overlay pages.
pub(crate) const FONT_RESOURCE: &str = "F1";

/// Stroke width of faux-bold text, relative to the font size.
const BOLD_STROKE: f64 = 0.03;

/// Control-point factor for approximating a quarter circle with a cubic.
const KAPPA: f64 = 0.552_284_749_8;

/// Wrap `data` in a Flate-compressed stream.
pub(crate) fn compressed_stream(mut dict: Dictionary, data: &[u8]) -> Result<Stream> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    dict.set("Filter", "FlateDecode");
    Ok(Stream::new(dict, compressed))
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

#[derive(Error, Debug)]
pub enum PdfBackendError {
    #[error("character {0:?} cannot be encoded with the embedded font")]
    Encoding(char),
}

/// Operators and resources of a single page under construction.
pub struct PageCanvas<'f> {
    font: &'f FontResource,
    width_pt: f64,
    height_pt: f64,
    operations: Vec<Operation>,
    /// Alpha levels in permille that need an `ExtGState` entry.
    alphas: BTreeSet<u16>,
}

impl<'f> PageCanvas<'f> {
    pub fn new(font: &'f FontResource, width_pt: f64, height_pt: f64) -> Self {
        Self {
            font,
            width_pt,
            height_pt,
            operations: Vec::new(),
            alphas: BTreeSet::new(),
        }
    }

    /// Canvas size in plotters units.
    pub fn canvas_size(&self) -> (u32, u32) {
        (
            (self.width_pt * UNITS_PER_POINT).round() as u32,
            (self.height_pt * UNITS_PER_POINT).round() as u32,
        )
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    fn to_user(&self, x: f64, y: f64) -> (f64, f64) {
        (x / UNITS_PER_POINT, self.height_pt - y / UNITS_PER_POINT)
    }

    fn push(&mut self, operator: &str, operands: Vec<Object>) {
        self.operations.push(Operation::new(operator, operands));
    }

    fn set_alpha(&mut self, alpha: f64) {
        let permille = (alpha.clamp(0.0, 1.0) * 1000.0).round() as u16;
        if permille < 1000 {
            self.alphas.insert(permille);
            self.push("gs", vec![Object::Name(alpha_name(permille).into_bytes())]);
        }
    }

    fn set_fill(&mut self, color: &BackendColor) {
        let (r, g, b) = color.rgb;
        self.push("rg", rgb_operands(r, g, b));
    }

    fn set_stroke(&mut self, color: &BackendColor, width: f64) {
        let (r, g, b) = color.rgb;
        self.push("RG", rgb_operands(r, g, b));
        self.push("w", vec![real(width / UNITS_PER_POINT)]);
        self.push("j", vec![Object::Integer(1)]);
    }

    fn move_to(&mut self, x: f64, y: f64) {
        let (ux, uy) = self.to_user(x, y);
        self.push("m", vec![real(ux), real(uy)]);
    }

    fn line_to(&mut self, x: f64, y: f64) {
        let (ux, uy) = self.to_user(x, y);
        self.push("l", vec![real(ux), real(uy)]);
    }

    fn curve_to(&mut self, c1: (f64, f64), c2: (f64, f64), end: (f64, f64)) {
        let (x1, y1) = self.to_user(c1.0, c1.1);
        let (x2, y2) = self.to_user(c2.0, c2.1);
        let (x3, y3) = self.to_user(end.0, end.1);
        self.push(
            "c",
            vec![real(x1), real(y1), real(x2), real(y2), real(x3), real(y3)],
        );
    }

    fn polyline(&mut self, points: &[BackendCoord]) {
        let mut iter = points.iter();
        if let Some(&(x, y)) = iter.next() {
            self.move_to(x as f64, y as f64);
        }
        for &(x, y) in iter {
            self.line_to(x as f64, y as f64);
        }
    }

    /// Serialize the recorded page into a standalone one-page PDF.
    pub fn into_pdf(self) -> Result<Vec<u8>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = self.font.embed(&mut doc)?;

        let mut ext_states = Dictionary::new();
        for permille in &self.alphas {
            let alpha = *permille as f64 / 1000.0;
            ext_states.set(
                alpha_name(*permille),
                dictionary! {
                    "Type" => "ExtGState",
                    "ca" => real(alpha),
                    "CA" => real(alpha),
                },
            );
        }
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { FONT_RESOURCE => font_id },
            "ExtGState" => ext_states,
        });

        let content = Content {
            operations: self.operations,
        };
        let content_id = doc.add_object(compressed_stream(Dictionary::new(), &content.encode()?)?);

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0_i64.into(), 0_i64.into(), real(self.width_pt), real(self.height_pt)],
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1_i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)?;
        Ok(buffer)
    }
}

fn alpha_name(permille: u16) -> String {
    format!("GS{}", permille)
}

fn rgb_operands(r: u8, g: u8, b: u8) -> Vec<Object> {
    vec![
        real(r as f64 / 255.0),
        real(g as f64 / 255.0),
        real(b as f64 / 255.0),
    ]
}

/// Rotate a canvas-space offset the way plotters rotates text.
fn rotate(transform: &FontTransform, x: f64, y: f64) -> (f64, f64) {
    match transform {
        FontTransform::None => (x, y),
        FontTransform::Rotate90 => (-y, x),
        FontTransform::Rotate180 => (-x, -y),
        FontTransform::Rotate270 => (y, -x),
    }
}

/// plotters backend writing into a [`PageCanvas`], in the manner of
/// `BitMapBackend::with_buffer`.
pub struct PdfBackend<'a, 'f> {
    canvas: &'a mut PageCanvas<'f>,
    size: (u32, u32),
}

impl<'a, 'f> PdfBackend<'a, 'f> {
    pub fn new(canvas: &'a mut PageCanvas<'f>) -> Self {
        let size = canvas.canvas_size();
        Self { canvas, size }
    }
}

type BackendResult = std::result::Result<(), DrawingErrorKind<PdfBackendError>>;

impl DrawingBackend for PdfBackend<'_, '_> {
    type ErrorType = PdfBackendError;

    fn get_size(&self) -> (u32, u32) {
        self.size
    }

    fn ensure_prepared(&mut self) -> BackendResult {
        Ok(())
    }

    fn present(&mut self) -> BackendResult {
        Ok(())
    }

    fn draw_pixel(&mut self, point: BackendCoord, color: BackendColor) -> BackendResult {
        if color.alpha == 0.0 {
            return Ok(());
        }
        let c = &mut *self.canvas;
        c.push("q", vec![]);
        c.set_alpha(color.alpha);
        c.set_fill(&color);
        let (x, y) = c.to_user(point.0 as f64, (point.1 + 1) as f64);
        let side = 1.0 / UNITS_PER_POINT;
        c.push("re", vec![real(x), real(y), real(side), real(side)]);
        c.push("f", vec![]);
        c.push("Q", vec![]);
        Ok(())
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> BackendResult {
        self.draw_path([from, to], style)
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> BackendResult {
        let color = style.color();
        if color.alpha == 0.0 {
            return Ok(());
        }
        let c = &mut *self.canvas;
        c.push("q", vec![]);
        c.set_alpha(color.alpha);
        let (x0, y0) = c.to_user(upper_left.0 as f64, bottom_right.1 as f64);
        let (x1, y1) = c.to_user(bottom_right.0 as f64, upper_left.1 as f64);
        if fill {
            c.set_fill(&color);
        } else {
            c.set_stroke(&color, style.stroke_width() as f64);
        }
        c.push("re", vec![real(x0), real(y0), real(x1 - x0), real(y1 - y0)]);
        c.push(if fill { "f" } else { "S" }, vec![]);
        c.push("Q", vec![]);
        Ok(())
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> BackendResult {
        let color = style.color();
        if color.alpha == 0.0 || style.stroke_width() == 0 {
            return Ok(());
        }
        let points: Vec<BackendCoord> = path.into_iter().collect();
        if points.len() < 2 {
            return Ok(());
        }
        let c = &mut *self.canvas;
        c.push("q", vec![]);
        c.set_alpha(color.alpha);
        c.set_stroke(&color, style.stroke_width() as f64);
        c.polyline(&points);
        c.push("S", vec![]);
        c.push("Q", vec![]);
        Ok(())
    }

    fn draw_circle<S: BackendStyle>(
        &mut self,
        center: BackendCoord,
        radius: u32,
        style: &S,
        fill: bool,
    ) -> BackendResult {
        let color = style.color();
        if color.alpha == 0.0 || radius == 0 {
            return Ok(());
        }
        let (cx, cy) = (center.0 as f64, center.1 as f64);
        let r = radius as f64;
        let k = r * KAPPA;
        let c = &mut *self.canvas;
        c.push("q", vec![]);
        c.set_alpha(color.alpha);
        if fill {
            c.set_fill(&color);
        } else {
            c.set_stroke(&color, style.stroke_width() as f64);
        }
        c.move_to(cx + r, cy);
        c.curve_to((cx + r, cy + k), (cx + k, cy + r), (cx, cy + r));
        c.curve_to((cx - k, cy + r), (cx - r, cy + k), (cx - r, cy));
        c.curve_to((cx - r, cy - k), (cx - k, cy - r), (cx, cy - r));
        c.curve_to((cx + k, cy - r), (cx + r, cy - k), (cx + r, cy));
        c.push("h", vec![]);
        c.push(if fill { "f" } else { "S" }, vec![]);
        c.push("Q", vec![]);
        Ok(())
    }

    fn fill_polygon<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        vert: I,
        style: &S,
    ) -> BackendResult {
        let color = style.color();
        if color.alpha == 0.0 {
            return Ok(());
        }
        let points: Vec<BackendCoord> = vert.into_iter().collect();
        if points.len() < 3 {
            return Ok(());
        }
        let c = &mut *self.canvas;
        c.push("q", vec![]);
        c.set_alpha(color.alpha);
        c.set_fill(&color);
        c.polyline(&points);
        c.push("h", vec![]);
        c.push("f", vec![]);
        c.push("Q", vec![]);
        Ok(())
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> BackendResult {
        let color = style.color();
        if color.alpha == 0.0 || text.is_empty() {
            return Ok(());
        }
        let font = self.canvas.font;
        let encoded = encode(text)?;
        let size = style.size();
        let width = font.encoded_width(&encoded) * size / 1000.0;
        let ascent = font.ascent() * size / 1000.0;
        let descent = font.descent() * size / 1000.0;

        let anchor = style.anchor();
        let dx = match anchor.h_pos {
            HPos::Left => 0.0,
            HPos::Center => -width / 2.0,
            HPos::Right => -width,
        };
        // Offset from the anchor to the baseline, canvas y grows downwards.
        let dy = match anchor.v_pos {
            VPos::Top => ascent,
            VPos::Center => (ascent + descent) / 2.0,
            VPos::Bottom => descent,
        };

        let transform = style.transform();
        let (ox, oy) = rotate(&transform, dx, dy);
        let (ux, uy) = rotate(&transform, 1.0, 0.0);

        let c = &mut *self.canvas;
        let (px, py) = c.to_user(pos.0 as f64 + ox, pos.1 as f64 + oy);
        let size_pt = size / UNITS_PER_POINT;

        c.push("q", vec![]);
        c.set_alpha(color.alpha);
        c.set_fill(&color);
        if matches!(style.style(), FontStyle::Bold) {
            c.set_stroke(&color, size * BOLD_STROKE);
        }
        c.push("BT", vec![]);
        c.push(
            "Tf",
            vec![Object::Name(FONT_RESOURCE.as_bytes().to_vec()), real(size_pt)],
        );
        if matches!(style.style(), FontStyle::Bold) {
            c.push("Tr", vec![Object::Integer(2)]);
        }
        // Text x axis follows the rotated baseline, flipped into user space.
        c.push(
            "Tm",
            vec![real(ux), real(-uy), real(uy), real(ux), real(px), real(py)],
        );
        c.push("Tj", vec![Object::string_literal(encoded)]);
        c.push("ET", vec![]);
        c.push("Q", vec![]);
        Ok(())
    }

    fn estimate_text_size<TStyle: BackendTextStyle>(
        &self,
        text: &str,
        style: &TStyle,
    ) -> std::result::Result<(u32, u32), DrawingErrorKind<PdfBackendError>> {
        let font = self.canvas.font;
        let encoded = encode(text)?;
        let size = style.size();
        let width = font.encoded_width(&encoded) * size / 1000.0;
        let height = (font.ascent() - font.descent()) * size / 1000.0;
        Ok((width.ceil() as u32, height.ceil() as u32))
    }

    fn blit_bitmap(
        &mut self,
        _pos: BackendCoord,
        _size: (u32, u32),
        _src: &[u8],
    ) -> BackendResult {
        // Overlay pages never carry raster content.
        Ok(())
    }
}

fn encode(text: &str) -> std::result::Result<Vec<u8>, DrawingErrorKind<PdfBackendError>> {
    text.chars()
        .map(|ch| {
            winansi_code(ch).ok_or(DrawingErrorKind::DrawingError(PdfBackendError::Encoding(ch)))
        })
        .collect()
}
