//! Text chunking (spec §4.8).
//!
//! Two stages: noise reduction (seven deterministic cleanup passes over
//! extracted text) followed by adaptive chunking, which tries
//! heading-boundary sections first, then paragraphs, then sentences, and
//! finally hard character splits, grouping the result into chunks that
//! respect `max_chunk_size`/`min_chunk_size`. A fixed-window chunker with
//! overlap is kept as a simpler fallback for callers that want it directly.
//!
//! Generalizes the teacher's `chunk_text` paragraph splitter (now the
//! "paragraph" refinement tier below) but drops its SHA-256/`Uuid::new_v4`
//! chunk identity scheme — the lake assigns chunk identity as
//! `nodeId + "_chunk_" + index`, not a content hash.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::Chunk;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingOptions {
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            min_chunk_size: 250,
            overlap: 100,
        }
    }
}

// ---------------------------------------------------------------------
// Noise reduction
// ---------------------------------------------------------------------

fn encoding_artifact_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[�\x00-\x08\x0B\x0C\x0E-\x1F]").unwrap())
}

/// Collapses any run of more than 10 identical consecutive characters down
/// to 3 (the `regex` crate has no backreference support, so this is a
/// manual scan rather than a `(.)\1{10,}`-style pattern).
fn collapse_character_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let mut run = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            run += 1;
        }
        let keep = if run > 10 { 3 } else { run };
        for _ in 0..keep {
            out.push(c);
        }
    }
    out
}

fn whitespace_dot_dash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]{2,}|\.{4,}|-{4,}").unwrap())
}

fn page_number_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(Page\s+)?\d+(\s*/\s*\d+)?\s*$").unwrap())
}

fn blank_line_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

/// Lines that look like boilerplate (footer/header repeats) — short lines
/// with no lowercase-letter words, likely a running header or separator.
fn is_boilerplate_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.chars().count() > 80 {
        return false;
    }
    let has_word = trimmed.split_whitespace().any(|w| w.chars().any(|c| c.is_lowercase()));
    !has_word && !trimmed.chars().any(|c| c.is_numeric())
}

#[derive(Debug, Clone, Copy)]
pub enum NoiseReductionMode {
    Standard,
    Aggressive,
}

impl Default for NoiseReductionMode {
    fn default() -> Self {
        NoiseReductionMode::Aggressive
    }
}

/// Runs the seven-step noise-reduction pipeline over extracted text:
/// 1. drop encoding artifacts/control characters
/// 2. collapse character runs longer than 10
/// 3. collapse repeated whitespace/dots/dashes
/// 4. remove standalone page-number lines
/// 5. remove lines that look like boilerplate headers/footers
/// 6. (aggressive mode only) drop lines that recur more often than a
///    frequency threshold, a cheap proxy for running headers/footers that
///    step 5 missed
/// 7. collapse blank-line runs down to a single blank line
pub fn reduce_noise(text: &str, mode: NoiseReductionMode) -> String {
    let step1 = encoding_artifact_re().replace_all(text, "");
    let step2 = collapse_character_runs(&step1);
    let step3 = whitespace_dot_dash_re().replace_all(&step2, " ");
    let step4 = page_number_line_re().replace_all(&step3, "");

    let lines: Vec<&str> = step4.lines().collect();
    let step5: Vec<&str> = lines.into_iter().filter(|l| !is_boilerplate_line(l)).collect();

    let step6 = match mode {
        NoiseReductionMode::Aggressive => drop_frequent_lines(&step5),
        NoiseReductionMode::Standard => step5.iter().map(|s| s.to_string()).collect(),
    };

    let joined = step6.join("\n");
    blank_line_run_re().replace_all(&joined, "\n\n").trim().to_string()
}

/// Drops non-blank lines that recur more than `threshold` times across the
/// document — a proxy for repeated headers/footers that survived the
/// boilerplate-line heuristic because they contain real words.
fn drop_frequent_lines(lines: &[&str]) -> Vec<String> {
    use std::collections::HashMap;

    const THRESHOLD: usize = 3;

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in lines {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            *counts.entry(trimmed).or_insert(0) += 1;
        }
    }

    lines
        .iter()
        .filter(|line| {
            let trimmed = line.trim();
            trimmed.is_empty() || counts.get(trimmed).copied().unwrap_or(0) <= THRESHOLD
        })
        .map(|s| s.to_string())
        .collect()
}

// ---------------------------------------------------------------------
// Adaptive chunking
// ---------------------------------------------------------------------

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,6}\s+.+|[A-Z][A-Za-z0-9 ]{3,80})$").unwrap())
}

fn sentence_boundary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([.!?])\s+").unwrap())
}

/// Splits `text` into sentences, keeping the terminating punctuation with
/// the sentence it ends (the `regex` crate has no lookbehind, so the split
/// boundary is found by capturing the punctuation and re-attaching it
/// rather than asserting on it).
fn split_into_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last_end = 0;
    for caps in sentence_boundary_re().captures_iter(text) {
        let m = caps.get(0).unwrap();
        let punct_end = caps.get(1).unwrap().end();
        sentences.push(text[last_end..punct_end].trim().to_string());
        last_end = m.end();
    }
    if last_end < text.len() {
        sentences.push(text[last_end..].trim().to_string());
    }
    sentences.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Chunks `text` for `node_id`, first cleaning it with `reduce_noise`, then
/// adaptively grouping refined units (heading sections, paragraphs,
/// sentences, hard splits) into chunks of `options.max_chunk_size`,
/// preferring not to emit a trailing chunk smaller than
/// `options.min_chunk_size` unless it's the only content.
pub fn chunk_text(node_id: &str, text: &str, options: &ChunkingOptions) -> Vec<Chunk> {
    let cleaned = reduce_noise(text, NoiseReductionMode::Aggressive);

    if cleaned.is_empty() {
        return vec![make_chunk(node_id, 0, "", 0, 0)];
    }

    let units = split_into_units(&cleaned, options.max_chunk_size);
    group_units_into_chunks(node_id, &units, options)
}

/// Refines `text` into a sequence of units no larger than `max_unit_size`,
/// trying progressively finer boundaries: heading sections, then
/// paragraphs, then sentences, then a hard character split as a last
/// resort.
fn split_into_units(text: &str, max_unit_size: usize) -> Vec<String> {
    let sections = split_on_regex_boundary(text, heading_re(), max_unit_size);
    let mut units = Vec::new();
    for section in sections {
        if section.chars().count() <= max_unit_size {
            units.push(section);
            continue;
        }
        for para in section.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }
            if para.chars().count() <= max_unit_size {
                units.push(para.to_string());
                continue;
            }
            for sentence in split_into_sentences(para) {
                if sentence.chars().count() <= max_unit_size {
                    units.push(sentence);
                } else {
                    units.extend(hard_split(&sentence, max_unit_size));
                }
            }
        }
    }
    units
}

fn split_on_regex_boundary(text: &str, boundary: &Regex, max_unit_size: usize) -> Vec<String> {
    if text.chars().count() <= max_unit_size {
        return vec![text.to_string()];
    }
    let positions: Vec<usize> = boundary.find_iter(text).map(|m| m.start()).collect();
    if positions.is_empty() {
        return vec![text.to_string()];
    }
    let mut sections = Vec::new();
    let mut start = 0;
    for &pos in &positions {
        if pos > start {
            sections.push(text[start..pos].trim().to_string());
        }
        start = pos;
    }
    if start < text.len() {
        sections.push(text[start..].trim().to_string());
    }
    sections.into_iter().filter(|s| !s.is_empty()).collect()
}

fn hard_split(text: &str, max_unit_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_unit_size)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

fn group_units_into_chunks(node_id: &str, units: &[String], options: &ChunkingOptions) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut index = 0u32;
    let mut start_offset = 0usize;

    for unit in units {
        let would_be = if buffer.is_empty() {
            unit.chars().count()
        } else {
            buffer.chars().count() + 1 + unit.chars().count()
        };

        if would_be > options.max_chunk_size && !buffer.is_empty() {
            let end_offset = start_offset + buffer.chars().count();
            chunks.push(make_chunk(node_id, index, &buffer, start_offset, end_offset));
            index += 1;
            start_offset = end_offset;
            buffer.clear();
        }

        if !buffer.is_empty() {
            buffer.push(' ');
        }
        buffer.push_str(unit);
    }

    if !buffer.is_empty() {
        let fits_in_last = chunks
            .last()
            .is_some_and(|last| last.text.chars().count() + 1 + buffer.chars().count() <= options.max_chunk_size);

        if buffer.chars().count() < options.min_chunk_size && fits_in_last {
            if let Some(last) = chunks.last_mut() {
                last.text.push(' ');
                last.text.push_str(&buffer);
                last.end_offset += 1 + buffer.chars().count();
            }
        } else {
            let end_offset = start_offset + buffer.chars().count();
            chunks.push(make_chunk(node_id, index, &buffer, start_offset, end_offset));
        }
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(node_id, 0, "", 0, 0));
    }

    chunks
}

fn make_chunk(node_id: &str, index: u32, text: &str, start_offset: usize, end_offset: usize) -> Chunk {
    Chunk {
        node_id: node_id.to_string(),
        text: text.to_string(),
        index,
        start_offset,
        end_offset,
    }
}

// ---------------------------------------------------------------------
// Fixed-window fallback
// ---------------------------------------------------------------------

/// A simpler fixed-window chunker with overlap, for callers that don't
/// want adaptive boundary detection. `overlap` must be strictly less than
/// `chunk_size`, enforced at construction time rather than silently
/// clamped, since a misconfigured overlap would otherwise loop forever.
pub fn chunk_fixed_window(node_id: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    assert!(overlap < chunk_size, "overlap must be smaller than chunk_size");

    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![make_chunk(node_id, 0, "", 0, 0)];
    }

    let mut chunks = Vec::new();
    let mut index = 0u32;
    let mut start = 0usize;
    let step = chunk_size - overlap;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        chunks.push(make_chunk(node_id, index, &piece, start, end));
        index += 1;
        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_noise_strips_control_characters() {
        let text = "hello\x00world";
        assert_eq!(reduce_noise(text, NoiseReductionMode::Standard), "helloworld");
    }

    #[test]
    fn reduce_noise_collapses_long_character_runs() {
        let text = "a".repeat(50);
        let reduced = reduce_noise(&text, NoiseReductionMode::Standard);
        assert_eq!(reduced, "aaa");
    }

    #[test]
    fn reduce_noise_strips_page_number_lines() {
        let text = "Some real content.\nPage 3\nMore content.";
        let reduced = reduce_noise(text, NoiseReductionMode::Standard);
        assert!(!reduced.contains("Page 3"));
        assert!(reduced.contains("Some real content."));
    }

    #[test]
    fn reduce_noise_collapses_blank_line_runs() {
        let text = "a\n\n\n\n\nb";
        let reduced = reduce_noise(text, NoiseReductionMode::Standard);
        assert_eq!(reduced, "a\n\nb");
    }

    #[test]
    fn reduce_noise_is_idempotent() {
        let text = "Line one.\n\n\nPage 1\nLine two.   Too   many   spaces.";
        let once = reduce_noise(text, NoiseReductionMode::Aggressive);
        let twice = reduce_noise(&once, NoiseReductionMode::Aggressive);
        assert_eq!(once, twice);
    }

    #[test]
    fn chunk_text_guarantees_at_least_one_chunk_for_empty_input() {
        let chunks = chunk_text("doc1", "", &ChunkingOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn chunk_text_keeps_short_text_as_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", &ChunkingOptions::default());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Hello, world!"));
    }

    #[test]
    fn chunk_text_produces_contiguous_indices() {
        let text = (0..80)
            .map(|i| format!("Paragraph number {i} with a bit of extra text to pad it out."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let options = ChunkingOptions { max_chunk_size: 120, min_chunk_size: 30, overlap: 10 };
        let chunks = chunk_text("doc1", &text, &options);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i as u32);
        }
    }

    #[test]
    fn chunk_text_respects_max_chunk_size_with_margin_for_unit_boundaries() {
        let text = (0..200)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let options = ChunkingOptions { max_chunk_size: 50, min_chunk_size: 10, overlap: 5 };
        let chunks = chunk_text("doc1", &text, &options);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= options.max_chunk_size);
        }
    }

    #[test]
    fn chunk_fixed_window_overlaps_adjacent_chunks() {
        let text = "0123456789".repeat(5);
        let chunks = chunk_fixed_window("doc1", &text, 20, 5);
        assert!(chunks.len() > 1);
        assert_eq!(&chunks[0].text[15..20], &chunks[1].text[0..5]);
    }

    #[test]
    fn chunk_fixed_window_terminates_and_covers_whole_text() {
        let text = "x".repeat(103);
        let chunks = chunk_fixed_window("doc1", &text, 30, 10);
        assert_eq!(chunks.last().unwrap().end_offset, text.chars().count());
    }

    #[test]
    #[should_panic(expected = "overlap must be smaller than chunk_size")]
    fn chunk_fixed_window_rejects_overlap_not_smaller_than_chunk_size() {
        chunk_fixed_window("doc1", "some text", 10, 10);
    }

    #[test]
    fn chunk_id_uses_node_and_index() {
        let chunks = chunk_text("abc", "short text", &ChunkingOptions::default());
        assert_eq!(chunks[0].id(), "abc_chunk_0");
    }
}
