//! PNG preview of the first page of a PDF.
//!
//! Pages are rendered by hayro, then flattened onto white with tiny-skia so
//! transparent documents (such as a bare overlay) preview the way a viewer
//! shows them.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use hayro::{render, InterpreterSettings, Pdf, RenderSettings};
use serde::Serialize;
use tiny_skia::{Color, Pixmap, PixmapPaint, Transform};
use tracing::{debug, info};

use crate::compose::{first_page, load_document, page_box};
use crate::{FormatError, OverlayError, Result};

/// Pixels per PDF point in previews.
pub const PREVIEW_ZOOM: f64 = 2.0;

const MAX_PIXELS: u64 = 200_000_000;

/// A rendered PNG together with its pixel size.
#[derive(Clone, Debug, Serialize)]
pub struct PreviewImage {
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub png: Vec<u8>,
}

impl PreviewImage {
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.png)?;
        Ok(())
    }
}

/// Render page 1 of `document` at [`PREVIEW_ZOOM`] onto a white canvas.
pub fn rasterize(document: &[u8]) -> Result<PreviewImage> {
    // lopdf gives the typed errors (encryption, missing pages) and the box
    // used for the size guard before any pixels are allocated.
    let doc = load_document(document)?;
    let [x0, y0, x1, y1] = page_box(&doc, first_page(&doc)?)?;
    let expected = ((x1 - x0) * PREVIEW_ZOOM).ceil() as u64
        * ((y1 - y0) * PREVIEW_ZOOM).ceil() as u64;
    if expected > MAX_PIXELS {
        return Err(OverlayError::Raster(format!(
            "page too large for a preview: {} pixels",
            expected
        )));
    }

    let pdf = Pdf::new(Arc::new(document.to_vec()))
        .map_err(|e| OverlayError::Raster(format!("cannot open document: {:?}", e)))?;
    let page = pdf.pages().first().ok_or(FormatError::NoPages)?;
    let settings = RenderSettings {
        x_scale: PREVIEW_ZOOM as f32,
        y_scale: PREVIEW_ZOOM as f32,
        ..Default::default()
    };
    let rendered = render(page, &InterpreterSettings::default(), &settings).take_png();

    let page_pixels =
        Pixmap::decode_png(&rendered).map_err(|e| OverlayError::Raster(e.to_string()))?;
    let (width, height) = (page_pixels.width(), page_pixels.height());
    debug!(width, height, "rendered page");

    let mut canvas = Pixmap::new(width, height).ok_or_else(|| {
        OverlayError::Raster(format!("cannot allocate {}x{} pixmap", width, height))
    })?;
    canvas.fill(Color::WHITE);
    canvas.draw_pixmap(
        0,
        0,
        page_pixels.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );

    let png = canvas
        .encode_png()
        .map_err(|e| OverlayError::Raster(e.to_string()))?;
    info!(width, height, bytes = png.len(), "rasterized preview");
    Ok(PreviewImage { width, height, png })
}
