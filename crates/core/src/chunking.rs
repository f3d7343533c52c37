use crate::error::IngestError;
use crate::models::{Chunk, ChunkingResult, IndexSettings, Page};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Boundary markers in priority order. The empty separator means
/// "split between characters" and is always the last resort.
pub const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

const CHUNK_ID_PREFIX_CHARS: usize = 200;
const CHUNK_ID_HEX_LEN: usize = 16;
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

impl TryFrom<&IndexSettings> for ChunkingConfig {
    type Error = IngestError;

    fn try_from(value: &IndexSettings) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap)
    }
}

/// Splits every non-blank page into overlapping chunks. `chunk_index` runs
/// across the whole document; each chunk belongs to exactly one page.
pub fn segment(
    doc_name: &str,
    doc_path: &str,
    pages: &[Page],
    config: ChunkingConfig,
) -> ChunkingResult {
    let mut chunks = Vec::new();
    let mut chunk_index = 0u64;

    for page in pages {
        if page.is_blank() {
            continue;
        }

        for piece in split_text(&page.text, config) {
            let text = piece.trim();
            if text.is_empty() {
                continue;
            }

            let char_count = text.chars().count();
            chunks.push(Chunk {
                chunk_id: make_chunk_id(doc_name, chunk_index, text),
                text: text.to_string(),
                doc_name: doc_name.to_string(),
                doc_path: doc_path.to_string(),
                page_number: page.page_number,
                chunk_index,
                char_count,
                token_estimate: char_count / CHARS_PER_TOKEN,
            });
            chunk_index += 1;
        }
    }

    let result = ChunkingResult::new(doc_name, chunks);
    debug!(
        doc_name,
        total_chunks = result.total_chunks,
        avg_chunk_size = result.avg_chunk_size,
        "segmented document"
    );
    result
}

/// Splits text along the separator hierarchy. Every returned piece is trimmed,
/// non-empty and at most `chunk_size` characters long.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let (separator, remaining) = pick_separator(text, separators);
    let splits = split_keeping_separator(text, separator);

    let mut output = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for split in splits {
        if char_len(split) < config.chunk_size {
            pending.push(split);
            continue;
        }

        if !pending.is_empty() {
            output.extend(merge_splits(&pending, config));
            pending.clear();
        }

        if remaining.is_empty() {
            output.push(split.trim().to_string());
        } else {
            output.extend(split_recursive(split, remaining, config));
        }
    }

    if !pending.is_empty() {
        output.extend(merge_splits(&pending, config));
    }

    output.retain(|piece| !piece.is_empty());
    output
}

/// First separator present in `text`, plus the lower-priority ones left to
/// try on oversized pieces.
fn pick_separator<'a, 's>(text: &str, separators: &'a [&'s str]) -> (&'s str, &'a [&'s str]) {
    for (position, separator) in separators.iter().copied().enumerate() {
        if separator.is_empty() {
            return (separator, &[]);
        }
        if text.contains(separator) {
            return (separator, &separators[position + 1..]);
        }
    }
    ("", &[])
}

/// Splits on `separator`, attaching each occurrence to the start of the piece
/// that follows it. Empty pieces are dropped.
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (position, _) in text.match_indices(separator) {
        if position > start {
            pieces.push(&text[start..position]);
        }
        start = position;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

/// Greedily packs small splits into segments of at most `chunk_size`
/// characters, carrying up to `overlap` characters of trailing splits into
/// the next segment.
fn merge_splits(splits: &[&str], config: ChunkingConfig) -> Vec<String> {
    let mut segments = Vec::new();
    let mut window: Vec<(&str, usize)> = Vec::new();
    let mut total = 0usize;

    for split in splits {
        let length = char_len(split);

        if total + length > config.chunk_size && !window.is_empty() {
            push_joined(&mut segments, &window);

            while total > config.overlap || (total + length > config.chunk_size && total > 0) {
                let (_, dropped) = window.remove(0);
                total -= dropped;
            }
        }

        window.push((split, length));
        total += length;
    }

    push_joined(&mut segments, &window);
    segments
}

fn push_joined(segments: &mut Vec<String>, window: &[(&str, usize)]) {
    let joined: String = window.iter().map(|(split, _)| *split).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// First 16 hex characters of SHA-256 over
/// `"{doc_name}::{chunk_index}::{first 200 chars of text}"`.
pub fn make_chunk_id(doc_name: &str, chunk_index: u64, text: &str) -> String {
    let prefix: String = text.chars().take(CHUNK_ID_PREFIX_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(format!("{doc_name}::{chunk_index}::{prefix}").as_bytes());
    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(CHUNK_ID_HEX_LEN);
    digest
}
