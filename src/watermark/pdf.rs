use lopdf::{
    Dictionary, Document, Object, ObjectId, Stream, StringFormat,
    content::{Content, Operation},
    dictionary,
};

use super::WatermarkResult;

const FONT_KEY: &str = "DsWmF";
const DIAGONAL_GS: &str = "DsGsDiag";
const FOOTER_GS: &str = "DsGsFoot";

const DIAGONAL_SIZE: f32 = 30.0;
const DIAGONAL_X: f32 = 50.0;
const DIAGONAL_GRAY: f32 = 0.7;
const DIAGONAL_OPACITY: f32 = 0.5;

const FOOTER_SIZE: f32 = 12.0;
const FOOTER_OFFSET: f32 = 20.0;
const FOOTER_GRAY: f32 = 0.5;
const FOOTER_OPACITY: f32 = 0.8;

/// US Letter, used when no MediaBox is found anywhere up the page tree.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];
const MAX_INHERITANCE_DEPTH: usize = 64;

/// Stamps every page of a PDF.
///
/// Each page gets a 30pt diagonal line of text rotated 45 degrees from
/// `(50, height / 2)` and a 12pt footer at `(20, 20)`, both drawn with
/// the standard Helvetica font. The original content streams are wrapped
/// in `q`/`Q` so that whatever graphics state they leave behind cannot
/// move or hide the stamp.
///
/// # Arguments
///
/// * `source` - The original PDF bytes.
/// * `text` - The text to stamp. Characters outside Latin-1 are drawn as `?`.
///
/// # Returns
///
/// The serialized, stamped PDF.
pub fn stamp(source: &[u8], text: &str) -> WatermarkResult<Vec<u8>> {
    let mut doc = Document::load_mem(source)?;

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let diagonal_gs = doc.add_object(graphics_state(DIAGONAL_OPACITY));
    let footer_gs = doc.add_object(graphics_state(FOOTER_OPACITY));

    let encoded = encode_text(text);
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

    for page_id in page_ids {
        let [left, bottom, _right, top] = media_box(&doc, page_id);

        let mut resources = page_resources(&doc, page_id);
        let mut fonts = sub_dictionary(&doc, &resources, b"Font");
        fonts.set(FONT_KEY, font_id);
        let mut states = sub_dictionary(&doc, &resources, b"ExtGState");
        states.set(DIAGONAL_GS, diagonal_gs);
        states.set(FOOTER_GS, footer_gs);
        resources.set("Font", fonts);
        resources.set("ExtGState", states);

        let existing = content_refs(&doc, page_id);

        let save = Content {
            operations: vec![Operation::new("q", vec![])],
        };
        let overlay = Content {
            operations: stamp_operations(&encoded, left, bottom, top - bottom),
        };
        let save_id = doc.add_object(Stream::new(Dictionary::new(), save.encode()?));
        let overlay_id = doc.add_object(Stream::new(Dictionary::new(), overlay.encode()?));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(save_id));
        contents.extend(existing);
        contents.push(Object::Reference(overlay_id));

        let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
        page.set("Resources", resources);
        page.set("Contents", contents);
    }

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

fn graphics_state(opacity: f32) -> Dictionary {
    dictionary! {
        "Type" => "ExtGState",
        "ca" => Object::Real(opacity),
        "CA" => Object::Real(opacity),
    }
}

fn stamp_operations(text: &[u8], left: f32, bottom: f32, height: f32) -> Vec<Operation> {
    let (sin, cos) = 45f32.to_radians().sin_cos();
    let literal = || Object::String(text.to_vec(), StringFormat::Literal);
    let gray = |g: f32| vec![Object::Real(g), Object::Real(g), Object::Real(g)];

    vec![
        // Closes the q pushed in front of the original content.
        Operation::new("Q", vec![]),
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(DIAGONAL_GS.into())]),
        Operation::new("rg", gray(DIAGONAL_GRAY)),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(FONT_KEY.into()), Object::Real(DIAGONAL_SIZE)]),
        Operation::new(
            "Tm",
            vec![
                Object::Real(cos),
                Object::Real(sin),
                Object::Real(-sin),
                Object::Real(cos),
                Object::Real(left + DIAGONAL_X),
                Object::Real(bottom + height / 2.0),
            ],
        ),
        Operation::new("Tj", vec![literal()]),
        Operation::new("ET", vec![]),
        Operation::new("gs", vec![Object::Name(FOOTER_GS.into())]),
        Operation::new("rg", gray(FOOTER_GRAY)),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(FONT_KEY.into()), Object::Real(FOOTER_SIZE)]),
        Operation::new(
            "Td",
            vec![Object::Real(left + FOOTER_OFFSET), Object::Real(bottom + FOOTER_OFFSET)],
        ),
        Operation::new("Tj", vec![literal()]),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]
}

/// Latin-1 bytes for the standard-14 font; anything wider becomes `?`.
fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Looks `key` up on the page, then on each ancestor in the page tree.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(resolve(doc, value));
        }
        let parent = current.get(b"Parent").and_then(Object::as_reference).ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    inherited(doc, page_id, b"MediaBox")
        .and_then(|object| object.as_array().ok())
        .and_then(|items| {
            let values: Vec<f32> = items
                .iter()
                .filter_map(|item| resolve(doc, item).as_float().ok())
                .collect();
            <[f32; 4]>::try_from(values).ok()
        })
        .unwrap_or(DEFAULT_MEDIA_BOX)
}

fn page_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    inherited(doc, page_id, b"Resources")
        .and_then(|object| object.as_dict().ok())
        .cloned()
        .unwrap_or_else(Dictionary::new)
}

fn sub_dictionary(doc: &Document, resources: &Dictionary, key: &[u8]) -> Dictionary {
    resources
        .get(key)
        .ok()
        .map(|object| resolve(doc, object))
        .and_then(|object| object.as_dict().ok())
        .cloned()
        .unwrap_or_else(Dictionary::new)
}

fn content_refs(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    match page.get(b"Contents") {
        Ok(Object::Array(items)) => items.clone(),
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        _ => Vec::new(),
    }
}
