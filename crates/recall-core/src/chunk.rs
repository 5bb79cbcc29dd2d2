//! Paragraph-boundary text chunker with word-based overlap.
//!
//! Splits long item content into ordered chunk strings sized in words.
//! Splitting happens on paragraph boundaries (blank lines), falling back
//! to single lines, and finally to the whole text as one paragraph.
//!
//! # Algorithm
//!
//! 1. Split text into paragraphs (blank lines), else lines, else the whole text.
//! 2. Hard-split any paragraph longer than `chunk_size_words - overlap_words`
//!    into word windows, so an overlap seed plus one paragraph always fits.
//! 3. Accumulate paragraphs into a buffer until adding the next one would
//!    exceed `chunk_size_words`.
//! 4. Flush the buffer as a chunk and seed the next buffer with the whole
//!    last paragraph of the flushed chunk. Only when that paragraph plus the
//!    incoming one would overflow `chunk_size_words` is the seed cut to its
//!    trailing `overlap_words` words.
//! 5. Drop the final chunk only if it is shorter than `min_chunk_words` and
//!    an earlier chunk exists.
//!
//! # Example
//!
//! ```rust
//! use companion_recall_core::chunk::{chunk_text, ChunkParams};
//!
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", &ChunkParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert!(chunks[0].starts_with("Hello world."));
//! ```

use sha2::{Digest, Sha256};

/// Word-based sizing for [`chunk_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub chunk_size_words: usize,
    pub overlap_words: usize,
    pub min_chunk_words: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size_words: 500,
            overlap_words: 50,
            min_chunk_words: 50,
        }
    }
}

#[derive(Debug, Clone)]
struct Segment {
    text: String,
    words: usize,
}

impl Segment {
    fn new(text: String) -> Self {
        let words = word_count(&text);
        Self { text, words }
    }
}

/// Count whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split `text` into ordered, overlapping chunk strings.
///
/// Returns an empty vector only for blank input. Any non-blank input
/// yields at least one chunk. The output is a pure function of the input
/// and parameters.
pub fn chunk_text(text: &str, params: &ChunkParams) -> Vec<String> {
    let text = text.replace("\r\n", "\n");
    if text.trim().is_empty() {
        return Vec::new();
    }

    let size = params.chunk_size_words.max(1);
    let window = size.saturating_sub(params.overlap_words).max(1);

    let segments: Vec<Segment> = split_paragraphs(&text)
        .into_iter()
        .flat_map(|p| hard_split(p, window))
        .collect();

    let mut chunks: Vec<String> = Vec::new();
    let mut buf: Vec<Segment> = Vec::new();
    let mut buf_words = 0usize;
    // True once the buffer holds more than the overlap seed.
    let mut fresh = false;

    for seg in segments {
        if fresh && buf_words >= params.min_chunk_words && buf_words + seg.words > size {
            chunks.push(join_segments(&buf));
            let seed = buf
                .last()
                .and_then(|last| overlap_seed(last, seg.words, size, params.overlap_words));
            buf.clear();
            buf_words = 0;
            if let Some(seed) = seed {
                buf_words = seed.words;
                buf.push(seed);
            }
            fresh = false;
        }
        buf_words += seg.words;
        buf.push(seg);
        fresh = true;
    }

    if fresh && (chunks.is_empty() || buf_words >= params.min_chunk_words) {
        chunks.push(join_segments(&buf));
    }

    chunks
}

/// Paragraphs on blank lines; lines if there is only one paragraph;
/// otherwise the whole text.
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    if paragraphs.len() > 1 {
        return paragraphs;
    }

    let lines: Vec<String> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    if lines.len() > 1 {
        return lines;
    }

    vec![text.trim().to_string()]
}

/// Break a paragraph longer than `window` words into word windows.
fn hard_split(paragraph: String, window: usize) -> Vec<Segment> {
    let seg = Segment::new(paragraph);
    if seg.words <= window {
        return vec![seg];
    }
    let words: Vec<&str> = seg.text.split_whitespace().collect();
    words
        .chunks(window)
        .map(|piece| Segment::new(piece.join(" ")))
        .collect()
}

/// Seed for the next buffer: the whole last paragraph if it fits next to
/// the incoming one, else its trailing `overlap_words` words.
fn overlap_seed(
    last: &Segment,
    incoming_words: usize,
    size: usize,
    overlap_words: usize,
) -> Option<Segment> {
    if overlap_words == 0 {
        return None;
    }
    if last.words <= overlap_words || last.words + incoming_words <= size {
        return Some(last.clone());
    }
    let words: Vec<&str> = last.text.split_whitespace().collect();
    Some(Segment::new(words[words.len() - overlap_words..].join(" ")))
}

fn join_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Full searchable text of an item: title and content.
pub fn item_text(title: &str, content: &str) -> String {
    let title = title.trim();
    let content = content.trim();
    match (title.is_empty(), content.is_empty()) {
        (true, _) => content.to_string(),
        (false, true) => title.to_string(),
        (false, false) => format!("{title}\n\n{content}"),
    }
}

/// SHA-256 digest of the normalized full text of an item.
///
/// Normalization unifies line endings, strips trailing whitespace on each
/// line and trims the whole text, so cosmetic edits do not trigger a
/// re-embed.
pub fn content_hash(title: &str, content: &str) -> String {
    let full = item_text(title, content).replace("\r\n", "\n");
    let normalized = full
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");

    let mut hasher = Sha256::new();
    hasher.update(normalized.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}
