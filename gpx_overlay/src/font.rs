//! The TrueType font used for every piece of text on the overlay.
//!
//! Text is written as a simple TrueType font with `WinAnsiEncoding`, so every
//! string is encoded to single bytes before it reaches a content stream.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use lopdf::{dictionary, Document, Object, ObjectId};
use tracing::debug;
use ttf_parser::{name_id, Face};

use crate::pdf_backend::compressed_stream;
use crate::{FormatError, OverlayError, Result};

pub(crate) const FIRST_CHAR: u8 = 32;
pub(crate) const LAST_CHAR: u8 = 255;

/// Codes 0x80..=0x9F of `WinAnsiEncoding`; the rest of the table is Latin-1.
const WINANSI_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'),
    None,
    Some('\u{201A}'),
    Some('\u{0192}'),
    Some('\u{201E}'),
    Some('\u{2026}'),
    Some('\u{2020}'),
    Some('\u{2021}'),
    Some('\u{02C6}'),
    Some('\u{2030}'),
    Some('\u{0160}'),
    Some('\u{2039}'),
    Some('\u{0152}'),
    None,
    Some('\u{017D}'),
    None,
    None,
    Some('\u{2018}'),
    Some('\u{2019}'),
    Some('\u{201C}'),
    Some('\u{201D}'),
    Some('\u{2022}'),
    Some('\u{2013}'),
    Some('\u{2014}'),
    Some('\u{02DC}'),
    Some('\u{2122}'),
    Some('\u{0161}'),
    Some('\u{203A}'),
    Some('\u{0153}'),
    None,
    Some('\u{017E}'),
    Some('\u{0178}'),
];

pub(crate) fn winansi_char(code: u8) -> Option<char> {
    match code {
        0x20..=0x7E | 0xA0..=0xFF => Some(code as char),
        0x80..=0x9F => WINANSI_HIGH[(code - 0x80) as usize],
        _ => None,
    }
}

pub(crate) fn winansi_code(ch: char) -> Option<u8> {
    match ch as u32 {
        0x20..=0x7E | 0xA0..=0xFF => Some(ch as u8),
        _ => WINANSI_HIGH
            .iter()
            .position(|c| *c == Some(ch))
            .map(|idx| 0x80 + idx as u8),
    }
}

/// A parsed TrueType/OpenType font ready to be embedded into PDF pages.
#[derive(Clone, Debug)]
pub struct FontResource {
    data: Vec<u8>,
    postscript_name: String,
    /// Advance widths in 1/1000 em for codes `FIRST_CHAR..=LAST_CHAR`.
    widths: Vec<f64>,
    ascent: f64,
    descent: f64,
    cap_height: f64,
    bbox: [f64; 4],
}

impl FontResource {
    /// Load a font file. A missing or unparsable file is a hard error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => OverlayError::Format(FormatError::Font(format!(
                "font file {} not found",
                path.display()
            ))),
            _ => OverlayError::Io(err),
        })?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let face = Face::parse(&data, 0).map_err(|e| FormatError::Font(e.to_string()))?;
        let upm = face.units_per_em() as f64;
        let scale = 1000.0 / upm;

        let missing_width = face
            .glyph_index(' ')
            .and_then(|g| face.glyph_hor_advance(g))
            .unwrap_or(0) as f64;
        let widths = (FIRST_CHAR..=LAST_CHAR)
            .map(|code| {
                winansi_char(code)
                    .and_then(|ch| face.glyph_index(ch))
                    .and_then(|gid| face.glyph_hor_advance(gid))
                    .map(f64::from)
                    .unwrap_or(missing_width)
                    * scale
            })
            .collect();

        let postscript_name = face
            .names()
            .into_iter()
            .filter(|name| name.name_id == name_id::POST_SCRIPT_NAME)
            .find_map(|name| name.to_string())
            .map(|name| sanitize_name(&name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "OverlayFont".to_string());

        let bbox = face.global_bounding_box();
        let ascent = face.ascender() as f64 * scale;
        let descent = face.descender() as f64 * scale;
        let cap_height = face
            .capital_height()
            .map(|h| h as f64 * scale)
            .unwrap_or(ascent);

        debug!(font = %postscript_name, units_per_em = upm, "loaded font");
        Ok(Self {
            postscript_name,
            widths,
            ascent,
            descent,
            cap_height,
            bbox: [
                bbox.x_min as f64 * scale,
                bbox.y_min as f64 * scale,
                bbox.x_max as f64 * scale,
                bbox.y_max as f64 * scale,
            ],
            data,
        })
    }

    pub fn postscript_name(&self) -> &str {
        &self.postscript_name
    }

    /// Ascender in 1/1000 em.
    pub fn ascent(&self) -> f64 {
        self.ascent
    }

    /// Descender in 1/1000 em, negative below the baseline.
    pub fn descent(&self) -> f64 {
        self.descent
    }

    /// Encode `text` for a `WinAnsiEncoding` content stream.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        text.chars()
            .map(|ch| winansi_code(ch).ok_or_else(|| OverlayError::from(FormatError::Encoding(ch))))
            .collect()
    }

    /// Width of already-encoded text in 1/1000 em.
    pub fn encoded_width(&self, encoded: &[u8]) -> f64 {
        encoded
            .iter()
            .map(|&code| {
                if code < FIRST_CHAR {
                    0.0
                } else {
                    self.widths[(code - FIRST_CHAR) as usize]
                }
            })
            .sum()
    }

    /// Width in points of `text` set at `size` points.
    pub fn text_width(&self, text: &str, size: f64) -> Result<f64> {
        Ok(self.encoded_width(&self.encode(text)?) * size / 1000.0)
    }

    /// Write the font program, descriptor and font dictionary into `doc`.
    pub(crate) fn embed(&self, doc: &mut Document) -> Result<ObjectId> {
        let file = compressed_stream(
            dictionary! { "Length1" => self.data.len() as i64 },
            &self.data,
        )?;
        let file_id = doc.add_object(file);

        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => Object::Name(self.postscript_name.as_bytes().to_vec()),
            "Flags" => 32_i64,
            "FontBBox" => self.bbox.iter().map(|v| Object::Real(*v as f32)).collect::<Vec<_>>(),
            "ItalicAngle" => 0_i64,
            "Ascent" => Object::Real(self.ascent as f32),
            "Descent" => Object::Real(self.descent as f32),
            "CapHeight" => Object::Real(self.cap_height as f32),
            "StemV" => 80_i64,
            "FontFile2" => file_id,
        });

        let widths: Vec<Object> = self
            .widths
            .iter()
            .map(|w| Object::Integer(w.round() as i64))
            .collect();
        Ok(doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "TrueType",
            "BaseFont" => Object::Name(self.postscript_name.as_bytes().to_vec()),
            "FirstChar" => FIRST_CHAR as i64,
            "LastChar" => LAST_CHAR as i64,
            "Widths" => widths,
            "FontDescriptor" => descriptor_id,
            "Encoding" => "WinAnsiEncoding",
        }))
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
