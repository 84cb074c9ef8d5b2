//! Scripted engines for unit testing without real backends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use image::ImageOutputFormat;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use super::types::{EngineError, EngineOutput, OcrEngine, OcrOutput, TextEngine};

/// Text engine that replays a script of results, then repeats a fallback.
pub struct ScriptedEngine {
    name: String,
    script: Mutex<VecDeque<Result<EngineOutput, EngineError>>>,
    fallback: Result<EngineOutput, EngineError>,
    sample: Option<Result<EngineOutput, EngineError>>,
    delay: Option<Duration>,
    calls: AtomicU32,
    sample_calls: AtomicU32,
}

impl ScriptedEngine {
    pub fn succeeding(name: &str, text: &str) -> Self {
        Self::with_fallback(name, Ok(EngineOutput::new(text).with_pages(1)))
    }

    pub fn failing(name: &str, error: EngineError) -> Self {
        Self::with_fallback(name, Err(error))
    }

    pub fn with_fallback(name: &str, fallback: Result<EngineOutput, EngineError>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            sample: None,
            delay: None,
            calls: AtomicU32::new(0),
            sample_calls: AtomicU32::new(0),
        }
    }

    /// Results returned, in order, before the fallback takes over.
    pub fn with_script(self, script: Vec<Result<EngineOutput, EngineError>>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    /// Result for sampling calls (`max_pages` set). Defaults to the fallback.
    pub fn with_sample(mut self, sample: Result<EngineOutput, EngineError>) -> Self {
        self.sample = Some(sample);
        self
    }

    /// Block each call for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Full extraction calls made.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sample_calls(&self) -> u32 {
        self.sample_calls.load(Ordering::SeqCst)
    }
}

impl TextEngine for ScriptedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, _bytes: &[u8], max_pages: Option<usize>) -> Result<EngineOutput, EngineError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if max_pages.is_some() {
            self.sample_calls.fetch_add(1, Ordering::SeqCst);
            return self.sample.clone().unwrap_or_else(|| self.fallback.clone());
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

/// OCR engine returning fixed text and confidence.
pub struct ScriptedOcrEngine {
    result: Result<OcrOutput, EngineError>,
    calls: AtomicU32,
}

impl ScriptedOcrEngine {
    pub fn new(text: &str, confidence: f64) -> Self {
        Self {
            result: Ok(OcrOutput {
                text: text.to_string(),
                confidence,
                page_count: Some(1),
            }),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(error: EngineError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for ScriptedOcrEngine {
    fn name(&self) -> &str {
        "scripted_ocr"
    }

    fn recognize(&self, _bytes: &[u8]) -> Result<OcrOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// `n` distinct words separated by spaces.
pub fn words(n: usize) -> String {
    (0..n)
        .map(|i| format!("word{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ═══════════════════════════════════════════════════════════
// PDF fixtures
// ═══════════════════════════════════════════════════════════

/// Digital PDF with one Helvetica text line per page.
pub fn text_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.4");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources = dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    };

    let kids: Vec<ObjectId> = pages
        .iter()
        .map(|text| {
            let escaped = text.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)");
            let content = format!("BT /F1 12 Tf 72 712 Td ({escaped}) Tj ET");
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            doc.add_object(dictionary! {
                "Type" => "Page",
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
                "Resources" => resources.clone(),
            })
        })
        .collect();

    finish_pdf(doc, kids)
}

/// Scanned PDF: each page carries one grey JPEG image XObject and no text.
pub fn scanned_pdf(pages: usize) -> Vec<u8> {
    let jpeg = grey_jpeg(120, 160);
    let mut doc = Document::with_version("1.4");

    let kids: Vec<ObjectId> = (0..pages)
        .map(|_| {
            let mut image = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 120,
                    "Height" => 160,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                jpeg.clone(),
            );
            image.allows_compression = false;
            let image_id = doc.add_object(image);
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                b"q 612 0 0 792 0 0 cm /Im1 Do Q".to_vec(),
            ));
            doc.add_object(dictionary! {
                "Type" => "Page",
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Im1" => image_id },
                },
            })
        })
        .collect();

    finish_pdf(doc, kids)
}

/// One-page PDF whose trailer names a standard security handler.
pub fn encrypted_pdf() -> Vec<u8> {
    let mut doc = Document::load_mem(&text_pdf(&["sealed"])).unwrap();
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "O" => Object::string_literal(vec![0u8; 32]),
        "U" => Object::string_literal(vec![0u8; 32]),
        "P" => -4,
    });
    doc.trailer.set("Encrypt", Object::Reference(encrypt_id));
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

pub fn grey_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([128u8, 128, 128]));
    let mut jpeg = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut jpeg, ImageOutputFormat::Jpeg(85))
        .unwrap();
    jpeg.into_inner()
}

fn finish_pdf(mut doc: Document, kids: Vec<ObjectId>) -> Vec<u8> {
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => kids.iter().map(|&id| Object::Reference(id)).collect::<Vec<_>>(),
        "Count" => kids.len() as i64,
    });
    for id in &kids {
        if let Ok(Object::Dictionary(ref mut dict)) = doc.get_object_mut(*id) {
            dict.set("Parent", Object::Reference(pages_id));
        }
    }
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}
