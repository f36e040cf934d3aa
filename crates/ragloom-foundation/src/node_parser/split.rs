//! Lossless text splitting and greedy chunk packing.
//!
//! Every split is a byte span into the source text, and the spans of one
//! level concatenate back to the segment they came from. Packing works on
//! spans too, so chunk boundaries map straight back to character indices.

use ragloom_kernel::llm::Tokenizer;
use regex::Regex;
use std::ops::Range;
use std::sync::Arc;

/// Default sentence pattern: a run of non-terminators plus its terminators
/// and trailing whitespace.
pub const SENTENCE_REGEX: &str = r"[^.?!。？！]+[.?!。？！]*\s*";
/// Default secondary (clause) pattern.
pub const CHUNKING_REGEX: &str = r"[^,.;。？！]+[,.;。？！]?";
/// A word and the whitespace after it.
pub const WORD_REGEX: &str = r"\S+\s*";

/// Splits text into sentences. Implemented for closures returning the
/// sentence strings in order.
pub trait SentenceTokenizer: Send + Sync {
    fn sentences(&self, text: &str) -> Vec<String>;
}

impl<F> SentenceTokenizer for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn sentences(&self, text: &str) -> Vec<String> {
        self(text)
    }
}

/// One refinement step of the splitter.
#[derive(Clone)]
pub enum SplitLevel {
    /// Split after every occurrence of a literal separator.
    Separator(String),
    /// Split after every regex match.
    Pattern(Regex),
    /// Split where each tokenizer-produced sentence starts.
    Sentences(Arc<dyn SentenceTokenizer>),
    /// One split per character.
    Chars,
}

impl std::fmt::Debug for SplitLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Separator(sep) => f.debug_tuple("Separator").field(sep).finish(),
            Self::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Self::Sentences(_) => f.write_str("Sentences"),
            Self::Chars => f.write_str("Chars"),
        }
    }
}

impl SplitLevel {
    /// Byte offsets (relative to `segment`) where a new piece begins, excluding 0.
    fn cut_points(&self, segment: &str) -> Vec<usize> {
        let mut cuts: Vec<usize> = match self {
            Self::Separator(sep) if !sep.is_empty() => segment
                .match_indices(sep.as_str())
                .map(|(at, m)| at + m.len())
                .collect(),
            Self::Separator(_) => Vec::new(),
            Self::Pattern(re) => re.find_iter(segment).map(|m| m.end()).collect(),
            Self::Sentences(tokenizer) => {
                let mut cursor = 0;
                let mut starts = Vec::new();
                for sentence in tokenizer.sentences(segment) {
                    let needle = sentence.trim();
                    if needle.is_empty() {
                        continue;
                    }
                    if let Some(found) = segment[cursor..].find(needle) {
                        starts.push(cursor + found);
                        cursor += found + needle.len();
                    }
                }
                starts
            }
            Self::Chars => segment.char_indices().map(|(i, _)| i).collect(),
        };
        cuts.retain(|&c| c > 0 && c < segment.len());
        cuts.dedup();
        cuts
    }

    /// Lossless pieces of `span` within `text`.
    fn split(&self, text: &str, span: Range<usize>) -> Vec<Range<usize>> {
        let segment = &text[span.clone()];
        let mut pieces = Vec::new();
        let mut start = 0;
        for cut in self.cut_points(segment) {
            if cut > start {
                pieces.push(span.start + start..span.start + cut);
                start = cut;
            }
        }
        if start < segment.len() {
            pieces.push(span.start + start..span.end);
        }
        pieces
    }
}

/// Splitting and packing engine shared by the text splitters.
#[derive(Clone)]
pub struct ChunkPacker {
    pub levels: Vec<SplitLevel>,
    pub tokenizer: Arc<dyn Tokenizer>,
}

impl ChunkPacker {
    pub fn new(levels: Vec<SplitLevel>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { levels, tokenizer }
    }

    fn count(&self, text: &str, span: &Range<usize>) -> usize {
        self.tokenizer.count(&text[span.clone()])
    }

    /// Split `span` until every piece fits `budget`, refining level by level.
    fn refine(&self, text: &str, span: Range<usize>, budget: usize, level: usize, out: &mut Vec<Range<usize>>) {
        if span.is_empty() {
            return;
        }
        if self.count(text, &span) <= budget {
            out.push(span);
            return;
        }
        let mut level = level;
        while level < self.levels.len() {
            let pieces = self.levels[level].split(text, span.clone());
            if pieces.len() > 1 {
                for piece in pieces {
                    self.refine(text, piece, budget, level + 1, out);
                }
                return;
            }
            level += 1;
        }
        // Nothing splits further; keep the oversized piece whole.
        out.push(span);
    }

    /// Pack `text` into chunk spans of at most `chunk_size` units.
    ///
    /// The first chunk packs up to `chunk_size` units. Every later chunk packs
    /// at most `chunk_size - chunk_overlap` units of new content and is then
    /// extended backwards into the previous chunk as far as `chunk_size`
    /// allows. An overlap of zero disables the backward extension.
    pub fn pack(&self, text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Range<usize>> {
        let chunk_size = chunk_size.max(1);
        let chunk_overlap = chunk_overlap.min(chunk_size - 1);
        let follow_budget = chunk_size - chunk_overlap;

        let mut splits = Vec::new();
        self.refine(text, 0..text.len(), follow_budget, 0, &mut splits);

        let mut chunks: Vec<Range<usize>> = Vec::new();
        let mut idx = 0;
        while idx < splits.len() {
            let budget = if chunks.is_empty() { chunk_size } else { follow_budget };
            let new_start = splits[idx].start;
            let mut used = self.count(text, &splits[idx]);
            let mut new_end = splits[idx].end;
            idx += 1;
            while idx < splits.len() {
                let next = self.count(text, &splits[idx]);
                if used + next > budget {
                    break;
                }
                used += next;
                new_end = splits[idx].end;
                idx += 1;
            }

            let start = match chunks.last() {
                Some(prev) if chunk_overlap > 0 => {
                    self.prefix_start(text, prev.start, new_start, new_end, chunk_size)
                }
                _ => new_start,
            };
            chunks.push(start..new_end);
        }
        chunks
    }

    /// Smallest char boundary `p` in `[floor, new_start]` with
    /// `count(text[p..new_end]) <= chunk_size`.
    fn prefix_start(&self, text: &str, floor: usize, new_start: usize, new_end: usize, chunk_size: usize) -> usize {
        let candidates: Vec<usize> = text[floor..new_start]
            .char_indices()
            .map(|(i, _)| floor + i)
            .chain(std::iter::once(new_start))
            .collect();

        let (mut lo, mut hi) = (0, candidates.len() - 1);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.count(text, &(candidates[mid]..new_end)) <= chunk_size {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        candidates[lo]
    }
}

/// A packed chunk with whitespace trimmed and char offsets resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub start_char_idx: usize,
    pub end_char_idx: usize,
}

/// Trim each span and convert byte offsets to char offsets. Blank chunks are dropped.
pub fn resolve_chunks(text: &str, spans: &[Range<usize>]) -> Vec<TextChunk> {
    spans
        .iter()
        .filter_map(|span| {
            let raw = &text[span.clone()];
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            let lead = raw.len() - raw.trim_start().len();
            let start = span.start + lead;
            let end = start + trimmed.len();
            let start_char_idx = text[..start].chars().count();
            Some(TextChunk {
                text: trimmed.to_string(),
                start_char_idx,
                end_char_idx: start_char_idx + trimmed.chars().count(),
            })
        })
        .collect()
}

/// Compile a pattern, mapping failures to `ConfigInvalid`.
pub fn compile(pattern: &str) -> ragloom_kernel::KernelResult<Regex> {
    Regex::new(pattern).map_err(|e| {
        ragloom_kernel::KernelError::ConfigInvalid(format!("invalid split pattern '{pattern}': {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloom_kernel::llm::{CharTokenizer, WhitespaceTokenizer};

    fn sentence_packer() -> ChunkPacker {
        ChunkPacker::new(
            vec![
                SplitLevel::Separator("\n\n\n".into()),
                SplitLevel::Pattern(compile(SENTENCE_REGEX).unwrap()),
                SplitLevel::Pattern(compile(CHUNKING_REGEX).unwrap()),
                SplitLevel::Pattern(compile(WORD_REGEX).unwrap()),
                SplitLevel::Chars,
            ],
            Arc::new(CharTokenizer),
        )
    }

    #[test]
    fn levels_are_lossless() {
        let text = "Alpha beta. Gamma!\n\n\nDelta, epsilon; zeta";
        for level in sentence_packer().levels {
            let pieces = level.split(text, 0..text.len());
            let joined: String = pieces.iter().map(|r| &text[r.clone()]).collect();
            assert_eq!(joined, text, "{level:?}");
        }
    }

    #[test]
    fn sentence_pattern_pieces() {
        let text = "One. Two. Three.";
        let level = SplitLevel::Pattern(compile(SENTENCE_REGEX).unwrap());
        let pieces: Vec<&str> = level.split(text, 0..text.len()).into_iter().map(|r| &text[r]).collect();
        assert_eq!(pieces, vec!["One. ", "Two. ", "Three."]);
    }

    #[test]
    fn pack_with_prefix_fill() {
        let text = "One. Two. Three.";
        let spans = sentence_packer().pack(text, 10, 2);
        let chunks = resolve_chunks(text, &spans);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["One. Two.", "wo. Three."]);
        assert_eq!((chunks[0].start_char_idx, chunks[0].end_char_idx), (0, 9));
        assert_eq!((chunks[1].start_char_idx, chunks[1].end_char_idx), (6, 16));
    }

    #[test]
    fn zero_overlap_is_contiguous() {
        let text = "One. Two. Three. Four.";
        let spans = sentence_packer().pack(text, 10, 0);
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        let joined: String = spans.iter().map(|r| &text[r.clone()]).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn chunks_respect_size() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let spans = sentence_packer().pack(&text, 64, 16);
        for span in &spans {
            assert!(text[span.clone()].chars().count() <= 64);
        }
        let chunks = resolve_chunks(&text, &spans);
        for pair in chunks.windows(2) {
            assert!(pair[0].start_char_idx <= pair[1].start_char_idx);
            assert!(pair[1].start_char_idx < pair[0].end_char_idx, "chunks overlap");
        }
    }

    #[test]
    fn oversized_word_falls_back_to_chars() {
        let text = "abcdefghijklmnop";
        let spans = sentence_packer().pack(text, 5, 0);
        let pieces: Vec<&str> = spans.iter().map(|r| &text[r.clone()]).collect();
        assert_eq!(pieces, vec!["abcde", "fghij", "klmno", "p"]);
    }

    #[test]
    fn tokenizer_sentences_are_located_in_order() {
        let tokenizer: Arc<dyn SentenceTokenizer> = Arc::new(|text: &str| {
            text.split('|').map(|s| s.to_string()).collect::<Vec<_>>()
        });
        let level = SplitLevel::Sentences(tokenizer);
        let text = "a b|c d|e";
        let pieces: Vec<&str> = level.split(text, 0..text.len()).into_iter().map(|r| &text[r]).collect();
        assert_eq!(pieces, vec!["a b|", "c d|", "e"]);
    }

    #[test]
    fn word_tokenizer_prefix_aligns_to_words() {
        let packer = ChunkPacker::new(
            vec![SplitLevel::Pattern(compile(WORD_REGEX).unwrap()), SplitLevel::Chars],
            Arc::new(WhitespaceTokenizer),
        );
        let text = "a b c d e f g h";
        let chunks = resolve_chunks(text, &packer.pack(text, 4, 1));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c d", "d e f g", "e f g h"]);
    }

    #[test]
    fn unicode_offsets_are_chars() {
        let text = "Héllo wörld. Ça va?";
        let chunks = resolve_chunks(text, &sentence_packer().pack(text, 12, 0));
        for chunk in &chunks {
            let slice: String = text
                .chars()
                .skip(chunk.start_char_idx)
                .take(chunk.end_char_idx - chunk.start_char_idx)
                .collect();
            assert_eq!(slice, chunk.text);
        }
    }
}
