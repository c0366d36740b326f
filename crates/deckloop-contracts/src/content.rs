//! Splitting document text into slide-content units.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::slides::SlideContentUnit;

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_unit_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 300,
            chunk_overlap: 50,
            max_unit_chars: 1000,
        }
    }
}

/// Chunks `text` and groups the chunks into ordered slide-content units.
pub fn content_units(text: &str, config: &ChunkingConfig) -> Vec<SlideContentUnit> {
    let chunks = split_into_chunks(text, config.chunk_size, config.chunk_overlap);
    group_into_units(&chunks, config.max_unit_chars)
}

/// Recursive character splitting: try paragraph breaks, then line breaks,
/// then spaces, then single characters, merging neighbours back up to
/// `chunk_size` characters with `chunk_overlap` characters carried over.
pub fn split_into_chunks(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size.saturating_sub(1));
    split_recursive(text, SEPARATORS, chunk_size, chunk_overlap)
}

/// Joins consecutive chunks with `\n` while the unit stays within `max_chars`.
pub fn group_into_units(chunks: &[String], max_chars: usize) -> Vec<SlideContentUnit> {
    let mut units = Vec::new();
    let mut current = String::new();
    for chunk in chunks {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        if current.is_empty() {
            current = chunk.to_string();
        } else if char_len(&current) + char_len(chunk) <= max_chars {
            current.push('\n');
            current.push_str(chunk);
        } else {
            units.push(SlideContentUnit::new(units.len(), std::mem::take(&mut current)));
            current = chunk.to_string();
        }
    }
    if !current.is_empty() {
        units.push(SlideContentUnit::new(units.len(), current));
    }
    units
}

fn split_recursive(text: &str, separators: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let (index, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
        .map(|(index, sep)| (index, *sep))
        .unwrap_or((separators.len(), ""));
    let remaining = separators.get(index + 1..).unwrap_or(&[]);

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator)
            .filter(|piece| !piece.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut chunks = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    for piece in pieces {
        if char_len(&piece) < chunk_size {
            pending.push(piece);
            continue;
        }
        if !pending.is_empty() {
            chunks.extend(merge_pieces(&pending, separator, chunk_size, overlap));
            pending.clear();
        }
        if remaining.is_empty() {
            chunks.push(piece);
        } else {
            chunks.extend(split_recursive(&piece, remaining, chunk_size, overlap));
        }
    }
    if !pending.is_empty() {
        chunks.extend(merge_pieces(&pending, separator, chunk_size, overlap));
    }
    chunks
}

fn merge_pieces(pieces: &[String], separator: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut docs = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    let joiner = |window: &VecDeque<&str>| if window.is_empty() { 0 } else { sep_len };

    for piece in pieces {
        let len = char_len(piece);
        if !window.is_empty() && total + len + joiner(&window) > chunk_size {
            push_doc(&mut docs, &window, separator);
            while total > overlap || (total > 0 && total + len + joiner(&window) > chunk_size) {
                let Some(front) = window.pop_front() else {
                    break;
                };
                total -= char_len(front) + joiner(&window);
            }
        }
        total += len + joiner(&window);
        window.push_back(piece.as_str());
    }
    push_doc(&mut docs, &window, separator);
    docs
}

fn push_doc(docs: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let doc = window.iter().copied().collect::<Vec<&str>>().join(separator);
    let doc = doc.trim();
    if !doc.is_empty() {
        docs.push(doc.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::{content_units, group_into_units, split_into_chunks, ChunkingConfig};

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_into_chunks("Hello world.\n\nSecond paragraph.", 300, 50);
        assert_eq!(chunks, vec!["Hello world.\n\nSecond paragraph."]);
    }

    #[test]
    fn chunks_respect_size_and_carry_overlap() {
        let words: Vec<String> = (0..200).map(|idx| format!("w{idx:03}")).collect();
        let text = words.join(" ");
        let chunks = split_into_chunks(&text, 100, 20);
        assert!(chunks.len() > 5);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100, "{chunk}");
        }
        for pair in chunks.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap_or("");
            assert!(pair[1].contains(last_word), "no overlap between {pair:?}");
        }
        assert!(chunks[0].starts_with("w000"));
        assert!(chunks[chunks.len() - 1].ends_with("w199"));
    }

    #[test]
    fn long_words_fall_back_to_characters() {
        let text = "x".repeat(25);
        let chunks = split_into_chunks(&text, 10, 0);
        assert_eq!(chunks, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn units_group_chunks_up_to_the_limit() {
        let chunks = vec![
            "a".repeat(400),
            "  ".to_string(),
            "b".repeat(400),
            "c".repeat(400),
        ];
        let units = group_into_units(&chunks, 1000);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].index, 0);
        assert_eq!(units[0].text, format!("{}\n{}", "a".repeat(400), "b".repeat(400)));
        assert_eq!(units[1].index, 1);
        assert_eq!(units[1].text, "c".repeat(400));
    }

    #[test]
    fn empty_text_yields_no_units() {
        assert!(content_units("   \n\n  ", &ChunkingConfig::default()).is_empty());
    }
}
