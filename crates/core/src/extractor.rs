use crate::error::IngestError;
use crate::models::{ExtractionResult, IndexSettings, Page};
use lopdf::Document;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

const BOUNDARY_WINDOW: usize = 200;
const PARAGRAPH_BREAK: [char; 2] = ['\n', '\n'];
const SENTENCE_END: [char; 2] = ['.', ' '];

/// Source of raw per-page text for paginated formats.
pub trait PageExtractor {
    fn extract_pages(&self, path: &Path) -> Result<ExtractionResult, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PageExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<ExtractionResult, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        let (file_name, file_path) = describe_path(path)?;

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        let mut pages = Vec::with_capacity(page_numbers.len());
        let mut extraction_errors = Vec::new();

        for (position, page_no) in page_numbers.iter().enumerate() {
            let page_number = (position + 1) as u32;
            let text = match document.extract_text(&[*page_no]) {
                Ok(text) => clean_extracted_text(&text),
                Err(error) => {
                    let message = format!("error extracting page {page_number}: {error}");
                    warn!(file = %file_name, "{message}");
                    extraction_errors.push(message);
                    String::new()
                }
            };
            pages.push(Page::new(page_number, text));
        }

        Ok(ExtractionResult {
            file_name,
            file_path,
            total_pages: pages.len(),
            pages,
            extraction_errors,
        })
    }
}

/// Reads `.txt`/`.md` files. Long files are broken into synthetic pages so
/// page-level attribution stays meaningful.
#[derive(Debug, Clone, Copy)]
pub struct PlainTextExtractor {
    pub chars_per_page: usize,
    pub synthetic_page_threshold: usize,
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        let settings = IndexSettings::default();
        Self::from(&settings)
    }
}

impl From<&IndexSettings> for PlainTextExtractor {
    fn from(settings: &IndexSettings) -> Self {
        Self {
            chars_per_page: settings.chars_per_synthetic_page,
            synthetic_page_threshold: settings.synthetic_page_threshold,
        }
    }
}

impl PageExtractor for PlainTextExtractor {
    fn extract_pages(&self, path: &Path) -> Result<ExtractionResult, IngestError> {
        let (file_name, file_path) = describe_path(path)?;
        let text = clean_extracted_text(&fs::read_to_string(path)?);

        let pages: Vec<Page> = if text.chars().count() > self.synthetic_page_threshold {
            synthetic_pages(&text, self.chars_per_page)
                .into_iter()
                .enumerate()
                .map(|(index, page_text)| Page::new((index + 1) as u32, page_text))
                .collect()
        } else {
            vec![Page::new(1, text)]
        };

        Ok(ExtractionResult {
            file_name,
            file_path,
            total_pages: pages.len(),
            pages,
            extraction_errors: Vec::new(),
        })
    }
}

/// Routes a file to the matching extractor by extension.
pub fn extract_document(path: &Path, settings: &IndexSettings) -> Result<ExtractionResult, IngestError> {
    if !path.exists() {
        return Err(IngestError::NotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if !is_supported_extension(&extension) {
        return Err(IngestError::UnsupportedFormat {
            extension,
            supported: SUPPORTED_EXTENSIONS.join(", "),
        });
    }

    let size = fs::metadata(path)?.len();
    if size > settings.max_file_size_bytes {
        return Err(IngestError::FileTooLarge {
            size,
            limit: settings.max_file_size_bytes,
        });
    }

    let result = match extension.as_str() {
        "pdf" => LopdfExtractor.extract_pages(path)?,
        _ => PlainTextExtractor::from(settings).extract_pages(path)?,
    };

    info!(
        file = %result.file_name,
        non_empty_pages = result.non_empty_pages(),
        total_pages = result.total_pages,
        total_chars = result.total_chars(),
        "extracted document"
    );
    Ok(result)
}

pub fn is_supported_extension(extension: &str) -> bool {
    SUPPORTED_EXTENSIONS
        .iter()
        .any(|supported| supported.eq_ignore_ascii_case(extension))
}

fn describe_path(path: &Path) -> Result<(String, String), IngestError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
    Ok((name.to_string(), path.to_string_lossy().to_string()))
}

/// Normalises extraction artifacts: form feeds and vertical tabs become
/// newlines, runs of 3+ newlines collapse to a paragraph break, trailing
/// whitespace is dropped per line and around the whole text.
pub fn clean_extracted_text(text: &str) -> String {
    let unified = text.replace(['\u{000c}', '\u{000b}'], "\n");

    let mut collapsed = String::with_capacity(unified.len());
    let mut newline_run = 0usize;
    for ch in unified.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run > 2 {
                continue;
            }
        } else {
            newline_run = 0;
        }
        collapsed.push(ch);
    }

    collapsed
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Splits flat text into pages of roughly `chars_per_page` characters,
/// cutting at the paragraph break closest to each target offset, else the
/// closest sentence end, else exactly at the target.
pub fn synthetic_pages(text: &str, chars_per_page: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chars_per_page || chars_per_page == 0 {
        return vec![text.to_string()];
    }

    let mut pages = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let target = start + chars_per_page;

        if target >= chars.len() {
            push_page(&mut pages, &chars[start..]);
            break;
        }

        let window_start = start.max(target.saturating_sub(BOUNDARY_WINDOW));
        let window_end = chars.len().min(target + BOUNDARY_WINDOW);
        let window = &chars[window_start..window_end];

        let split_at = nearest_boundary(window, &PARAGRAPH_BREAK, target - window_start)
            .or_else(|| nearest_boundary(window, &SENTENCE_END, target - window_start))
            .map(|cut| window_start + cut)
            .filter(|cut| *cut > start)
            .unwrap_or(target);

        push_page(&mut pages, &chars[start..split_at]);
        start = split_at;
    }

    pages
}

/// Cut offset (just after the marker) of the occurrence of `marker` in
/// `window` whose cut lies closest to `target`. Ties keep the earlier cut.
fn nearest_boundary(window: &[char], marker: &[char], target: usize) -> Option<usize> {
    window
        .windows(marker.len())
        .enumerate()
        .filter(|(_, candidate)| *candidate == marker)
        .map(|(position, _)| position + marker.len())
        .min_by_key(|cut| cut.abs_diff(target))
}

fn push_page(pages: &mut Vec<String>, slice: &[char]) {
    let page: String = slice.iter().collect();
    let trimmed = page.trim();
    if !trimmed.is_empty() {
        pages.push(trimmed.to_string());
    }
}
