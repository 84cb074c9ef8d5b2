//! Page images of scanned PDFs, handed to OCR one page at a time.
//!
//! A scanned page is a single image XObject drawn over the page. The largest
//! image on each page is taken as the scan: JPEG streams pass through as-is,
//! anything else is decoded and re-encoded as PNG.

use image::ImageOutputFormat;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use super::types::EngineError;

/// One page scan, encoded as a file Tesseract can read.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    /// 1-based page number.
    pub page: u32,
    pub bytes: Vec<u8>,
    /// File extension matching `bytes` ("jpg" or "png").
    pub extension: &'static str,
}

/// Largest image of every page, in page order. Pages without an image
/// XObject (or whose image cannot be decoded) are skipped.
pub fn page_images(pdf: &[u8]) -> Result<Vec<PageImage>, EngineError> {
    let doc = Document::load_mem(pdf)
        .map_err(|e| EngineError::Corrupt(format!("failed to parse PDF: {e}")))?;
    if doc.is_encrypted() {
        return Err(EngineError::Encrypted);
    }

    let mut images = Vec::new();
    for (page, page_id) in doc.get_pages() {
        match largest_page_image(&doc, page_id) {
            Ok(Some((bytes, extension))) => images.push(PageImage {
                page,
                bytes,
                extension,
            }),
            Ok(None) => tracing::debug!(page, "PDF page has no image"),
            Err(e) => tracing::warn!(page, error = %e, "Skipping undecodable page image"),
        }
    }

    tracing::debug!(images = images.len(), "Extracted PDF page images");
    Ok(images)
}

/// Walks page → /Resources → /XObject and keeps the largest /Image stream.
fn largest_page_image(
    doc: &Document,
    page_id: ObjectId,
) -> Result<Option<(Vec<u8>, &'static str)>, EngineError> {
    let page = doc
        .get_dictionary(page_id)
        .map_err(|e| EngineError::Corrupt(format!("page object: {e}")))?;
    let Some(xobjects) = dict_entry(doc, page, b"Resources").and_then(|r| dict_entry(doc, r, b"XObject"))
    else {
        return Ok(None);
    };

    let mut largest: Option<(Vec<u8>, &'static str)> = None;
    for (_, entry) in xobjects.iter() {
        let Object::Stream(stream) = resolve(doc, entry) else {
            continue;
        };
        if !has_name(&stream.dict, b"Subtype", b"Image") {
            continue;
        }

        let image = encode_image(doc, stream)?;
        if largest.as_ref().map_or(true, |(prev, _)| image.0.len() > prev.len()) {
            largest = Some(image);
        }
    }
    Ok(largest)
}

fn encode_image(doc: &Document, stream: &Stream) -> Result<(Vec<u8>, &'static str), EngineError> {
    let content = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    if has_name(&stream.dict, b"Filter", b"DCTDecode") {
        return Ok((content, "jpg"));
    }

    let decoded = match image::load_from_memory(&content) {
        Ok(img) => img,
        Err(_) => raw_pixels(doc, &stream.dict, content)?,
    };
    let mut png = std::io::Cursor::new(Vec::new());
    decoded
        .write_to(&mut png, ImageOutputFormat::Png)
        .map_err(|e| EngineError::Internal(format!("PNG encode failed: {e}")))?;
    Ok((png.into_inner(), "png"))
}

/// Rebuild an 8-bit image from raw samples using /Width, /Height and the
/// colour space's channel count.
fn raw_pixels(
    doc: &Document,
    dict: &Dictionary,
    samples: Vec<u8>,
) -> Result<image::DynamicImage, EngineError> {
    let int = |key: &[u8]| dict.get(key).and_then(Object::as_i64).ok();
    let (Some(width), Some(height)) = (int(b"Width"), int(b"Height")) else {
        return Err(EngineError::Corrupt("image without /Width or /Height".into()));
    };
    let bits = int(b"BitsPerComponent").unwrap_or(8);
    if bits != 8 {
        return Err(EngineError::Unsupported(format!("{bits}-bit image samples")));
    }

    let (width, height) = (width as u32, height as u32);
    let channels = channel_count(doc, dict);
    let expected = width as usize * height as usize * channels as usize;
    if samples.len() < expected {
        return Err(EngineError::Corrupt(format!(
            "{} sample bytes do not fill a {width}x{height}x{channels} image",
            samples.len()
        )));
    }

    let mut samples = samples;
    samples.truncate(expected);
    let image = match channels {
        1 => image::GrayImage::from_raw(width, height, samples).map(image::DynamicImage::ImageLuma8),
        3 => image::RgbImage::from_raw(width, height, samples).map(image::DynamicImage::ImageRgb8),
        // CMYK samples read as RGBA; colour accuracy does not matter to OCR.
        4 => image::RgbaImage::from_raw(width, height, samples).map(image::DynamicImage::ImageRgba8),
        _ => None,
    };
    image.ok_or_else(|| EngineError::Unsupported(format!("{channels}-channel image")))
}

fn channel_count(doc: &Document, dict: &Dictionary) -> u32 {
    let Ok(space) = dict.get(b"ColorSpace") else {
        return 3;
    };
    match resolve(doc, space) {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" => 1,
            b"DeviceCMYK" => 4,
            _ => 3,
        },
        Object::Array(parts) => match parts.first() {
            Some(Object::Name(n)) if n == b"Indexed" => 1,
            Some(Object::Name(n)) if n == b"ICCBased" => parts
                .get(1)
                .map(|icc| resolve(doc, icc))
                .and_then(|icc| icc.as_stream().ok())
                .and_then(|icc| icc.dict.get(b"N").and_then(Object::as_i64).ok())
                .map_or(3, |n| n as u32),
            _ => 3,
        },
        _ => 3,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn dict_entry<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    dict.get(key).ok().and_then(|obj| resolve(doc, obj).as_dict().ok())
}

/// True when `key` is the name `value`, or an array containing it.
fn has_name(dict: &Dictionary, key: &[u8], value: &[u8]) -> bool {
    match dict.get(key) {
        Ok(Object::Name(n)) => n == value,
        Ok(Object::Array(items)) => items
            .iter()
            .any(|o| matches!(o, Object::Name(n) if n == value)),
        _ => false,
    }
}
