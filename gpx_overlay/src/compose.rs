//! Stamping the rendered overlay onto the first page of a background PDF.

use std::collections::BTreeSet;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::pdf_backend::compressed_stream;
use crate::{FormatError, Result, POINTS_PER_INCH};

const OVERLAY_XOBJECT: &str = "GpxOverlay";

/// Physical page size in inches.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width_in: f64,
    pub height_in: f64,
}

impl PageSize {
    pub fn new(width_in: f64, height_in: f64) -> Self {
        Self {
            width_in,
            height_in,
        }
    }

    pub fn from_points(width_pt: f64, height_pt: f64) -> Self {
        Self::new(width_pt / POINTS_PER_INCH, height_pt / POINTS_PER_INCH)
    }

    pub fn width_pt(&self) -> f64 {
        self.width_in * POINTS_PER_INCH
    }

    pub fn height_pt(&self) -> f64 {
        self.height_in * POINTS_PER_INCH
    }
}

/// Where the overlay landed on the background page, in points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

/// The background document with the overlay stamped onto page 1.
#[derive(Clone, Debug)]
pub struct MergedPage {
    pub bytes: Vec<u8>,
    pub placement: Placement,
    pub page_size: PageSize,
}

/// Size of the first page of a PDF, from its crop box (or media box).
pub fn page_size(document: &[u8]) -> Result<PageSize> {
    let doc = load_document(document)?;
    let page_id = first_page(&doc)?;
    ensure_unrotated(&doc, page_id)?;
    let [x0, y0, x1, y1] = page_box(&doc, page_id)?;
    Ok(PageSize::from_points(x1 - x0, y1 - y0))
}

/// Draw the first page of `overlay` on top of the first page of
/// `background`, scaled uniformly and centered inside the page box.
///
/// All other pages of the background are written back untouched.
pub fn merge(background: &[u8], overlay: &[u8]) -> Result<MergedPage> {
    let mut doc = load_document(background)?;
    let page_id = first_page(&doc)?;
    ensure_unrotated(&doc, page_id)?;
    let target = page_box(&doc, page_id)?;

    let mut source = load_document(overlay)?;
    source.renumber_objects_with(doc.max_id + 1);
    let source_page = first_page(&source)?;
    let bbox = page_box(&source, source_page)?;
    let content = source.get_page_content(source_page)?;
    let resources = inherited(&source, source_page, b"Resources")?
        .unwrap_or_else(|| Object::Dictionary(Dictionary::new()));

    let mut reachable = BTreeSet::new();
    collect_references(&source, &resources, &mut reachable);
    for id in &reachable {
        if let Some(object) = source.objects.get(id) {
            doc.objects.insert(*id, object.clone());
        }
    }
    doc.max_id = doc.max_id.max(source.max_id);
    debug!(objects = reachable.len(), "imported overlay resources");

    let form = compressed_stream(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "FormType" => 1_i64,
            "BBox" => bbox.iter().map(|v| Object::Real(*v as f32)).collect::<Vec<_>>(),
            "Resources" => resources,
        },
        &content,
    )?;
    let form_id = doc.add_object(form);

    let placement = fit_inside(target, bbox)?;
    let name = attach_xobject(&mut doc, page_id, form_id)?;

    let matrix = [
        placement.scale,
        0.0,
        0.0,
        placement.scale,
        placement.x - bbox[0] * placement.scale,
        placement.y - bbox[1] * placement.scale,
    ];
    let stamp = Content {
        operations: vec![
            Operation::new("Q", vec![]),
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                matrix.iter().map(|v| Object::Real(*v as f32)).collect(),
            ),
            Operation::new("Do", vec![Object::Name(name.into_bytes())]),
            Operation::new("Q", vec![]),
        ],
    };
    let mut stamp_bytes = b"\n".to_vec();
    stamp_bytes.extend(stamp.encode()?);

    let existing = page_contents(&doc, page_id)?;
    let open_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let close_id = doc.add_object(Stream::new(Dictionary::new(), stamp_bytes));
    let mut contents: Vec<Object> = Vec::with_capacity(existing.len() + 2);
    contents.push(open_id.into());
    contents.extend(existing);
    contents.push(close_id.into());
    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Contents", contents);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    info!(
        x = placement.x,
        y = placement.y,
        width = placement.width,
        height = placement.height,
        "stamped overlay onto page 1"
    );

    Ok(MergedPage {
        bytes,
        placement,
        page_size: PageSize::from_points(target[2] - target[0], target[3] - target[1]),
    })
}

/// Uniformly scale `inner` to fit `outer` and center it.
fn fit_inside(outer: [f64; 4], inner: [f64; 4]) -> Result<Placement> {
    let (tw, th) = (outer[2] - outer[0], outer[3] - outer[1]);
    let (ow, oh) = (inner[2] - inner[0], inner[3] - inner[1]);
    if ow <= 0.0 || oh <= 0.0 || tw <= 0.0 || th <= 0.0 {
        return Err(FormatError::Page("empty page box".into()).into());
    }
    let scale = (tw / ow).min(th / oh);
    let (width, height) = (ow * scale, oh * scale);
    Ok(Placement {
        x: outer[0] + (tw - width) / 2.0,
        y: outer[1] + (th - height) / 2.0,
        width,
        height,
        scale,
    })
}

pub(crate) fn load_document(bytes: &[u8]) -> Result<Document> {
    if trailer_declares_encryption(bytes) {
        return Err(FormatError::Encrypted.into());
    }
    let doc = Document::load_mem(bytes)?;
    if doc.trailer.has(b"Encrypt") {
        return Err(FormatError::Encrypted.into());
    }
    Ok(doc)
}

/// Whether the newest trailer names an `/Encrypt` dictionary.
///
/// Checked on the raw bytes because lopdf decrypts on load. Only the trailer
/// (or the cross-reference stream dictionary) that `startxref` points at is
/// searched, never object bodies.
fn trailer_declares_encryption(bytes: &[u8]) -> bool {
    let Some(marker) = rfind(bytes, b"startxref") else {
        return false;
    };
    let offset: Option<usize> = std::str::from_utf8(
        &bytes[marker + b"startxref".len()..]
            .iter()
            .copied()
            .skip_while(u8::is_ascii_whitespace)
            .take_while(u8::is_ascii_digit)
            .collect::<Vec<u8>>(),
    )
    .ok()
    .and_then(|digits| digits.parse().ok());

    let trailer = match offset.filter(|&o| o < marker) {
        Some(o) => {
            let section = &bytes[o..marker];
            let body = section.trim_ascii_start();
            if body.starts_with(b"xref") {
                match find(section, b"trailer") {
                    Some(at) => &section[at..],
                    None => return false,
                }
            } else {
                // Cross-reference stream: its dictionary ends where the data starts.
                match find(section, b"stream") {
                    Some(end) => &section[..end],
                    None => section,
                }
            }
        }
        None => match rfind(&bytes[..marker], b"trailer") {
            Some(at) => &bytes[at..marker],
            None => return false,
        },
    };
    find(trailer, b"/Encrypt").is_some()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

pub(crate) fn first_page(doc: &Document) -> Result<ObjectId> {
    doc.get_pages()
        .values()
        .next()
        .copied()
        .ok_or_else(|| FormatError::NoPages.into())
}

fn ensure_unrotated(doc: &Document, page_id: ObjectId) -> Result<()> {
    let rotate = match inherited(doc, page_id, b"Rotate")? {
        Some(obj) => obj.as_i64()?,
        None => 0,
    };
    if rotate.rem_euclid(360) != 0 {
        return Err(FormatError::Rotated(rotate).into());
    }
    Ok(())
}

/// Crop box of a page (falling back to the media box), normalized to
/// `[x0, y0, x1, y1]` with `x0 < x1` and `y0 < y1`.
pub(crate) fn page_box(doc: &Document, page_id: ObjectId) -> Result<[f64; 4]> {
    let rect = match inherited(doc, page_id, b"CropBox")? {
        Some(rect) => rect,
        None => inherited(doc, page_id, b"MediaBox")?
            .ok_or_else(|| FormatError::Page("page has no MediaBox".into()))?,
    };
    let values = rect
        .as_array()?
        .iter()
        .map(|v| resolve(doc, v).and_then(|v| Ok(v.as_float()? as f64)))
        .collect::<Result<Vec<f64>>>()?;
    if values.len() != 4 {
        return Err(FormatError::Page(format!("page box has {} entries", values.len())).into());
    }
    Ok([
        values[0].min(values[2]),
        values[1].min(values[3]),
        values[0].max(values[2]),
        values[1].max(values[3]),
    ])
}

/// Follow references until a direct object is reached.
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Result<&'a Object> {
    let mut current = object;
    for _ in 0..32 {
        match current {
            Object::Reference(id) => current = doc.get_object(*id)?,
            _ => return Ok(current),
        }
    }
    Err(FormatError::Page("reference chain too long".into()).into())
}

/// Look up a page attribute, walking up the page tree for inheritable keys.
pub(crate) fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Result<Option<Object>> {
    let mut node = doc.get_dictionary(page_id)?;
    for _ in 0..64 {
        if let Ok(value) = node.get(key) {
            return Ok(Some(resolve(doc, value)?.clone()));
        }
        match node.get(b"Parent") {
            Ok(parent) => node = resolve(doc, parent)?.as_dict()?,
            Err(_) => return Ok(None),
        }
    }
    Err(FormatError::Page("page tree too deep".into()).into())
}

/// Content stream references of a page, in drawing order.
fn page_contents(doc: &Document, page_id: ObjectId) -> Result<Vec<Object>> {
    let page = doc.get_dictionary(page_id)?;
    let contents = match page.get(b"Contents") {
        Ok(contents) => contents,
        Err(_) => return Ok(Vec::new()),
    };
    match contents {
        Object::Array(items) => Ok(items.clone()),
        Object::Reference(id) => match doc.get_object(*id)? {
            Object::Array(items) => Ok(items.clone()),
            _ => Ok(vec![Object::Reference(*id)]),
        },
        _ => Err(FormatError::Page("unexpected /Contents type".into()).into()),
    }
}

/// Register `form_id` in the page's XObject resources under a fresh name.
fn attach_xobject(doc: &mut Document, page_id: ObjectId, form_id: ObjectId) -> Result<String> {
    let mut resources = match inherited(doc, page_id, b"Resources")? {
        Some(Object::Dictionary(dict)) => dict,
        Some(_) => return Err(FormatError::Page("/Resources is not a dictionary".into()).into()),
        None => Dictionary::new(),
    };
    let mut xobjects = match resources.get(b"XObject") {
        Ok(obj) => resolve(doc, obj)?.as_dict()?.clone(),
        Err(_) => Dictionary::new(),
    };

    let mut name = OVERLAY_XOBJECT.to_string();
    let mut suffix = 1;
    while xobjects.has(name.as_bytes()) {
        name = format!("{}{}", OVERLAY_XOBJECT, suffix);
        suffix += 1;
    }
    xobjects.set(name.clone(), form_id);
    resources.set("XObject", xobjects);

    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Resources", resources);
    Ok(name)
}

fn collect_references(doc: &Document, object: &Object, seen: &mut BTreeSet<ObjectId>) {
    match object {
        Object::Reference(id) => {
            if seen.insert(*id) {
                if let Ok(target) = doc.get_object(*id) {
                    collect_references(doc, target, seen);
                }
            }
        }
        Object::Array(items) => {
            for item in items {
                collect_references(doc, item, seen);
            }
        }
        Object::Dictionary(dict) => collect_dictionary(doc, dict, seen),
        Object::Stream(stream) => collect_dictionary(doc, &stream.dict, seen),
        _ => {}
    }
}

fn collect_dictionary(doc: &Document, dict: &Dictionary, seen: &mut BTreeSet<ObjectId>) {
    for (key, value) in dict.iter() {
        if key.as_slice() != b"Parent" {
            collect_references(doc, value, seen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OverlayError;

    const A4: (f64, f64) = (595.276, 841.89);

    fn blank_pdf(pages: &[(f64, f64)]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = pages
            .iter()
            .map(|(w, h)| {
                let content = doc.add_object(Stream::new(
                    Dictionary::new(),
                    b"0 0 1 rg 10 10 20 20 re f".to_vec(),
                ));
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0_i64.into(), 0_i64.into(), Object::Real(*w as f32), Object::Real(*h as f32)],
                    "Contents" => content,
                    "Resources" => dictionary! {},
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => kids.len() as i64,
                "Kids" => kids,
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn reads_a4_size_in_inches() {
        let size = page_size(&blank_pdf(&[A4])).unwrap();
        assert!((size.width_in - 8.27).abs() < 0.01);
        assert!((size.height_in - 11.69).abs() < 0.01);
    }

    #[test]
    fn square_overlay_keeps_aspect_on_portrait_page() {
        let merged = merge(&blank_pdf(&[A4]), &blank_pdf(&[(400.0, 400.0)])).unwrap();
        let p = merged.placement;
        assert!((p.width / p.height - 1.0).abs() < 1e-9);
        assert!((p.width - A4.0).abs() < 1e-3);
        assert!((p.x - 0.0).abs() < 1e-9);
        assert!((p.y - (A4.1 - A4.0) / 2.0).abs() < 1e-3);
    }

    #[test]
    fn wide_overlay_is_letterboxed_on_landscape_page() {
        let merged = merge(&blank_pdf(&[(800.0, 400.0)]), &blank_pdf(&[(300.0, 300.0)])).unwrap();
        let p = merged.placement;
        assert!((p.height - 400.0).abs() < 1e-9);
        assert!((p.width - 400.0).abs() < 1e-9);
        assert!((p.x - 200.0).abs() < 1e-9);
    }

    #[test]
    fn merge_keeps_page_count_and_appends_overlay() {
        let merged = merge(&blank_pdf(&[A4, A4, (300.0, 300.0)]), &blank_pdf(&[A4])).unwrap();
        let doc = Document::load_mem(&merged.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 3);

        let page_id = first_page(&doc).unwrap();
        let page = doc.get_dictionary(page_id).unwrap();
        let contents = page.get(b"Contents").unwrap().as_array().unwrap();
        assert_eq!(contents.len(), 3);

        let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
        let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
        assert!(xobjects.has(OVERLAY_XOBJECT.as_bytes()));

        let text = String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).to_string();
        assert!(text.contains("Do"));
        assert!(text.find("re f").unwrap() < text.find("Do").unwrap());
    }

    #[test]
    fn overlay_name_does_not_clash() {
        let once = merge(&blank_pdf(&[A4]), &blank_pdf(&[A4])).unwrap();
        let twice = merge(&once.bytes, &blank_pdf(&[A4])).unwrap();
        let doc = Document::load_mem(&twice.bytes).unwrap();
        let page = doc.get_dictionary(first_page(&doc).unwrap()).unwrap();
        let xobjects = page
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"XObject")
            .unwrap()
            .as_dict()
            .unwrap();
        assert_eq!(xobjects.len(), 2);
    }

    #[test]
    fn rejects_encrypted_background() {
        let mut doc = Document::load_mem(&blank_pdf(&[A4])).unwrap();
        doc.trailer.set(
            "Encrypt",
            dictionary! { "Filter" => "Standard", "V" => 1_i64, "R" => 2_i64 },
        );
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        let err = merge(&bytes, &blank_pdf(&[A4])).unwrap_err();
        assert!(matches!(err, OverlayError::Format(FormatError::Encrypted)));
    }

    #[test]
    fn encrypt_in_document_text_is_not_encryption() {
        let mut doc = Document::load_mem(&blank_pdf(&[A4])).unwrap();
        let info = doc.add_object(dictionary! {
            "Title" => Object::string_literal("How to /Encrypt a file"),
        });
        doc.trailer.set("Info", info);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let merged = merge(&bytes, &blank_pdf(&[A4])).unwrap();
        assert_eq!(Document::load_mem(&merged.bytes).unwrap().get_pages().len(), 1);
        assert!(page_size(&bytes).is_ok());
    }

    #[test]
    fn encryption_is_read_from_the_trailer_only() {
        let classic = b"%PDF-1.4\n1 0 obj\n(/Encrypt)\nendobj\nxref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 2 /Encrypt 3 0 R >>\nstartxref\n35\n%%EOF";
        assert!(trailer_declares_encryption(classic));
        let plain = b"%PDF-1.4\n1 0 obj\n(/Encrypt)\nendobj\nxref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 2 >>\nstartxref\n35\n%%EOF";
        assert!(!trailer_declares_encryption(plain));

        let xref_stream = b"%PDF-1.5\n5 0 obj\n<< /Type /XRef /Size 6 /Encrypt 4 0 R /Length 0 >>\nstream\n\nendstream\nendobj\nstartxref\n9\n%%EOF";
        assert!(trailer_declares_encryption(xref_stream));
    }

    #[test]
    fn rejects_rotated_page() {
        let mut doc = Document::load_mem(&blank_pdf(&[A4])).unwrap();
        let page_id = first_page(&doc).unwrap();
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Rotate", 90_i64);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        let err = page_size(&bytes).unwrap_err();
        assert!(matches!(err, OverlayError::Format(FormatError::Rotated(90))));
    }

    #[test]
    fn rejects_document_without_pages() {
        let err = page_size(&blank_pdf(&[])).unwrap_err();
        assert!(matches!(err, OverlayError::Format(FormatError::NoPages)));
    }

    #[test]
    fn garbage_is_a_pdf_error() {
        assert!(matches!(
            page_size(b"definitely not a pdf"),
            Err(OverlayError::Pdf(_))
        ));
    }

    #[test]
    fn media_box_is_inherited_from_page_tree() {
        let mut doc = Document::load_mem(&blank_pdf(&[(200.0, 100.0)])).unwrap();
        let page_id = first_page(&doc).unwrap();
        let parent = doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Parent")
            .unwrap()
            .as_reference()
            .unwrap();
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .remove(b"MediaBox");
        doc.get_object_mut(parent).unwrap().as_dict_mut().unwrap().set(
            "MediaBox",
            vec![0_i64.into(), 0_i64.into(), 144_i64.into(), 72_i64.into()],
        );
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        assert_eq!(page_size(&bytes).unwrap(), PageSize::new(2.0, 1.0));
    }
}
