use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::engines::looks_like_pdf;
use super::page_images::page_images;
use super::types::{EngineError, OcrEngine, OcrOutput, PAGE_BREAK};

pub const TESSERACT: &str = "tesseract";

/// Tesseract and Leptonica messages for input they cannot decode.
const UNREADABLE_INPUT: [&str; 4] = [
    "Unknown format",
    "pixRead",
    "cannot be read",
    "Unsupported image type",
];

/// Tesseract OCR via its command-line binary.
/// Images are recognized directly; PDFs are split into page images first,
/// since Tesseract cannot read PDF. Output is TSV so per-word confidences
/// are available.
pub struct TesseractCliEngine {
    binary: PathBuf,
    languages: String,
}

impl TesseractCliEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            languages: "eng".to_string(),
        }
    }

    /// Set language(s) for OCR (e.g., "eng", "eng+ben")
    pub fn with_languages(mut self, langs: &str) -> Self {
        self.languages = langs.to_string();
        self
    }

    fn run(&self, input: &Path) -> Result<String, EngineError> {
        let output = Command::new(&self.binary)
            .arg(input)
            .arg("stdout")
            .args(["-l", &self.languages])
            .arg("tsv")
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let message = format!("tesseract exited with {}: {}", output.status, stderr.trim());
                if UNREADABLE_INPUT.iter().any(|m| stderr.contains(m)) {
                    Err(EngineError::Unsupported(message))
                } else {
                    Err(EngineError::Process(message))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EngineError::Unavailable(
                format!("{} not found (install tesseract-ocr)", self.binary.display()),
            )),
            Err(e) => Err(EngineError::from(e)),
        }
    }

    /// Recognize one image file's bytes.
    fn recognize_image(&self, bytes: &[u8], extension: &str) -> Result<TsvParse, EngineError> {
        let mut input = tempfile::Builder::new()
            .prefix("casemeta-ocr-")
            .suffix(&format!(".{extension}"))
            .tempfile()?;
        input.write_all(bytes)?;
        input.flush()?;

        let tsv = self.run(input.path())?;
        Ok(parse_tsv(&tsv))
    }
}

impl Default for TesseractCliEngine {
    fn default() -> Self {
        Self::new(TESSERACT)
    }
}

impl OcrEngine for TesseractCliEngine {
    fn name(&self) -> &str {
        TESSERACT
    }

    fn recognize(&self, bytes: &[u8]) -> Result<OcrOutput, EngineError> {
        if !looks_like_pdf(bytes) {
            let parsed = self.recognize_image(bytes, "img")?;
            tracing::debug!(
                words = parsed.word_count,
                pages = parsed.page_count,
                confidence = parsed.confidence,
                "Tesseract recognition complete"
            );
            return Ok(OcrOutput {
                text: parsed.text,
                confidence: parsed.confidence,
                page_count: Some(parsed.page_count.max(1)),
            });
        }

        let images = page_images(bytes)?;
        if images.is_empty() {
            return Err(EngineError::Unsupported("PDF has no page images to OCR".into()));
        }

        let mut pages = Vec::with_capacity(images.len());
        for image in &images {
            let parsed = self.recognize_image(&image.bytes, image.extension)?;
            tracing::debug!(
                page = image.page,
                words = parsed.word_count,
                confidence = parsed.confidence,
                "Tesseract page recognized"
            );
            pages.push(parsed);
        }

        let combined = combine_pages(&pages);
        tracing::debug!(
            words = combined.word_count,
            pages = combined.page_count,
            confidence = combined.confidence,
            "Tesseract recognition complete"
        );
        Ok(OcrOutput {
            text: combined.text,
            confidence: combined.confidence,
            page_count: Some(combined.page_count),
        })
    }
}

/// Join per-page results. Confidence is the word-weighted mean.
fn combine_pages(pages: &[TsvParse]) -> TsvParse {
    let word_count: usize = pages.iter().map(|p| p.word_count).sum();
    let weighted: f64 = pages.iter().map(|p| p.confidence * p.word_count as f64).sum();
    TsvParse {
        text: pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(&PAGE_BREAK.to_string()),
        confidence: if word_count == 0 {
            0.0
        } else {
            weighted / word_count as f64
        },
        word_count,
        page_count: pages.len(),
    }
}

/// Text and confidence recovered from Tesseract TSV output.
#[derive(Debug, Clone, PartialEq)]
pub struct TsvParse {
    pub text: String,
    /// Mean word confidence scaled to [0, 1].
    pub confidence: f64,
    pub word_count: usize,
    pub page_count: usize,
}

/// Parse Tesseract TSV output.
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 = individual word entries. Confidence is 0-100, scaled to 0.0-1.0;
/// words Tesseract could not score (-1) do not count toward the mean.
pub fn parse_tsv(tsv: &str) -> TsvParse {
    let mut text = String::new();
    let mut last_page = None;
    let mut last_line: Option<(u32, u32, u32)> = None;
    let mut conf_sum = 0.0;
    let mut conf_count = 0usize;
    let mut word_count = 0usize;
    let mut page_count = 0usize;

    // Skip header row
    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }
        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }

        let num = |i: usize| fields[i].parse::<u32>().unwrap_or(0);
        let page = num(1);
        let line_key = (num(2), num(3), num(4));

        if last_page != Some(page) {
            if last_page.is_some() {
                text.push(PAGE_BREAK);
            }
            page_count += 1;
            last_page = Some(page);
            last_line = Some(line_key);
        } else if last_line != Some(line_key) {
            text.push('\n');
            last_line = Some(line_key);
        } else {
            text.push(' ');
        }
        text.push_str(word);
        word_count += 1;

        if let Ok(conf) = fields[10].parse::<f64>() {
            if conf >= 0.0 {
                conf_sum += conf.min(100.0) / 100.0;
                conf_count += 1;
            }
        }
    }

    TsvParse {
        text,
        confidence: if conf_count == 0 {
            0.0
        } else {
            conf_sum / conf_count as f64
        },
        word_count,
        page_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::testing::{scanned_pdf, text_pdf};

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        std::iter::once(HEADER)
            .chain(rows.iter().copied())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn parses_words_lines_and_confidence() {
        let input = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t2480\t3508\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t96\tIN",
            "5\t1\t1\t1\t1\t2\t70\t10\t50\t20\t90\tTHE",
            "5\t1\t1\t1\t2\t1\t10\t40\t80\t20\t84\tCOURT",
        ]);
        let parsed = parse_tsv(&input);
        assert_eq!(parsed.text, "IN THE\nCOURT");
        assert_eq!(parsed.word_count, 3);
        assert_eq!(parsed.page_count, 1);
        assert!((parsed.confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn page_changes_insert_page_break() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t0\t0\t0\t0\t80\tone",
            "5\t2\t1\t1\t1\t1\t0\t0\t0\t0\t60\ttwo",
        ]);
        let parsed = parse_tsv(&input);
        assert_eq!(parsed.text, "one\x0ctwo");
        assert_eq!(parsed.page_count, 2);
    }

    #[test]
    fn unscored_words_do_not_drag_the_mean() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t0\t0\t0\t0\t-1\tsmudge",
            "5\t1\t1\t1\t1\t2\t0\t0\t0\t0\t70\tword",
        ]);
        let parsed = parse_tsv(&input);
        assert_eq!(parsed.word_count, 2);
        assert!((parsed.confidence - 0.70).abs() < 1e-9);
    }

    #[test]
    fn empty_output_has_zero_confidence() {
        let parsed = parse_tsv(HEADER);
        assert!(parsed.text.is_empty());
        assert_eq!(parsed.confidence, 0.0);
    }

    #[test]
    fn pages_combine_with_word_weighted_confidence() {
        let pages = [
            TsvParse {
                text: "IN THE COURT".into(),
                confidence: 0.9,
                word_count: 3,
                page_count: 1,
            },
            TsvParse {
                text: "Order".into(),
                confidence: 0.5,
                word_count: 1,
                page_count: 1,
            },
        ];
        let combined = combine_pages(&pages);
        assert_eq!(combined.text, "IN THE COURT\x0cOrder");
        assert_eq!(combined.page_count, 2);
        assert_eq!(combined.word_count, 4);
        assert!((combined.confidence - 0.8).abs() < 1e-9);
    }

    /// Executable shell script standing in for the tesseract binary.
    #[cfg(unix)]
    fn fake_tesseract(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("tesseract");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_input_is_permanent_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_tesseract(
            &dir,
            "echo 'Error in pixReadStream: Unknown format: no pix returned' >&2\nexit 1",
        );
        let err = TesseractCliEngine::new(binary)
            .recognize(b"Memo: adjourned to Monday.")
            .unwrap_err();
        assert!(matches!(err, EngineError::Unsupported(_)), "{err}");
        assert!(!err.is_transient());
    }

    #[cfg(unix)]
    #[test]
    fn other_process_failures_stay_transient() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_tesseract(&dir, "echo 'killed: out of memory' >&2\nexit 137");
        let err = TesseractCliEngine::new(binary).recognize(b"image").unwrap_err();
        assert!(matches!(err, EngineError::Process(_)), "{err}");
        assert!(err.is_transient());
    }

    #[cfg(unix)]
    #[test]
    fn scanned_pdf_is_recognized_page_by_page() {
        let dir = tempfile::tempdir().unwrap();
        // Refuses anything that is not a page image, then reports one word.
        let binary = fake_tesseract(
            &dir,
            "case \"$1\" in *.jpg|*.png) ;; *) echo 'pixReadStream: Unknown format' >&2; exit 1;; esac\n\
             printf 'level\\tpage_num\\tblock_num\\tpar_num\\tline_num\\tword_num\\tleft\\ttop\\twidth\\theight\\tconf\\ttext\\n'\n\
             printf '5\\t1\\t1\\t1\\t1\\t1\\t0\\t0\\t10\\t10\\t88\\tJudgment\\n'",
        );

        let out = TesseractCliEngine::new(binary)
            .recognize(&scanned_pdf(2))
            .unwrap();
        assert_eq!(out.text, "Judgment\x0cJudgment");
        assert_eq!(out.page_count, Some(2));
        assert!((out.confidence - 0.88).abs() < 1e-9);
    }

    #[cfg(unix)]
    #[test]
    fn pdf_without_page_images_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_tesseract(&dir, "exit 0");
        let err = TesseractCliEngine::new(binary)
            .recognize(&text_pdf(&["Judgment"]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Unsupported(_)), "{err}");
    }

    #[test]
    fn missing_binary_is_permanent_unavailable() {
        let engine = TesseractCliEngine::new("/nonexistent/casemeta-tesseract");
        let err = engine.recognize(b"not an image").unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)), "{err}");
        assert!(!err.is_transient());
    }
}
