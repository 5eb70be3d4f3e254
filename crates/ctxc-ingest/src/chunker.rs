//! Structure-aware chunking.
//!
//! Text is segmented on markdown headings, blank-line paragraph breaks, and
//! page boundaries, then segments are greedily packed into chunks under the
//! token budgets. A chunk never crosses a section boundary, oversized
//! segments are split at sentence (then whitespace) boundaries, and the
//! trailing remainder is always flushed so no content is dropped.
//!
//! Every chunk's `(start_char, end_char)` span slices the document text
//! exactly; spans are byte offsets on char boundaries.

use ctxc_core::{defaults, Tokenizer};

use crate::loaders::PageSpan;

/// Token budgets for chunk packing.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Flush once a chunk reaches this many tokens.
    pub target_tokens: usize,
    /// Hard per-chunk ceiling (soft for undersized chunks, see below).
    pub max_tokens: usize,
    /// A chunk below this may absorb an overflowing segment rather than
    /// flush undersized.
    pub min_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens: defaults::CHUNK_TARGET_TOKENS,
            max_tokens: defaults::CHUNK_MAX_TOKENS,
            min_tokens: defaults::CHUNK_MIN_TOKENS,
        }
    }
}

/// One emitted chunk, before ids and ordinals are assigned.
#[derive(Debug, Clone)]
pub struct ChunkPiece {
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
    pub token_count: usize,
    pub section: Option<String>,
    pub page_from: Option<i64>,
    pub page_to: Option<i64>,
}

#[derive(Debug, Clone)]
struct Segment {
    start: usize,
    end: usize,
    section: Option<String>,
    page: Option<i64>,
    tokens: usize,
}

/// Structure-aware chunker.
pub struct Chunker {
    config: ChunkerConfig,
    tokenizer: Tokenizer,
}

impl Chunker {
    pub fn new(config: ChunkerConfig, tokenizer: Tokenizer) -> Self {
        Self { config, tokenizer }
    }

    /// Default budgets with the fast approximate tokenizer.
    pub fn approx() -> Self {
        Self::new(ChunkerConfig::default(), Tokenizer::approx())
    }

    /// Tokenizer identifier, recorded in chunk metadata.
    pub fn tokenizer_name(&self) -> &str {
        self.tokenizer.name()
    }

    /// Chunk the document text. `pages` comes from the loader when the
    /// format has page structure (empty otherwise).
    pub fn chunk(&self, text: &str, pages: &[PageSpan]) -> Vec<ChunkPiece> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut segments = self.segment(text);
        if !pages.is_empty() {
            segments = split_on_pages(segments, pages, text, &self.tokenizer);
        }
        let segments = self.shrink_oversized(segments, text);

        let mut chunks: Vec<ChunkPiece> = Vec::new();
        let mut current: Vec<Segment> = Vec::new();
        let mut current_tokens = 0usize;

        for segment in segments {
            if let Some(first) = current.first() {
                let section_change = first.section != segment.section;
                let overflow = current_tokens + segment.tokens > self.config.max_tokens;
                // A chunk never crosses a section boundary; on plain
                // overflow an undersized chunk keeps absorbing instead.
                if section_change || (overflow && current_tokens >= self.config.min_tokens) {
                    self.flush(text, &mut current, &mut chunks);
                    current_tokens = 0;
                }
            }
            current_tokens += segment.tokens;
            current.push(segment);
            if current_tokens >= self.config.target_tokens {
                self.flush(text, &mut current, &mut chunks);
                current_tokens = 0;
            }
        }
        // Trailing remainder is kept even below min_tokens.
        self.flush(text, &mut current, &mut chunks);
        chunks
    }

    fn flush(&self, text: &str, current: &mut Vec<Segment>, chunks: &mut Vec<ChunkPiece>) {
        if current.is_empty() {
            return;
        }
        let start = current[0].start;
        let end = current[current.len() - 1].end;
        let chunk_text = &text[start..end];
        let pages: Vec<i64> = current.iter().filter_map(|s| s.page).collect();
        chunks.push(ChunkPiece {
            start_char: start,
            end_char: end,
            text: chunk_text.to_string(),
            token_count: self.tokenizer.count(chunk_text),
            section: current[0].section.clone(),
            page_from: pages.iter().min().copied(),
            page_to: pages.iter().max().copied(),
        });
        current.clear();
    }

    /// Split on headings and blank-line paragraph breaks, carrying the
    /// active section through following segments.
    fn segment(&self, text: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut section: Option<String> = None;
        let mut block_start: Option<usize> = None;
        let mut offset = 0;

        let close_block = |start: Option<usize>, end: usize, section: &Option<String>, segments: &mut Vec<Segment>| {
            if let Some(start) = start {
                if let Some((s, e)) = trim_span(text, start, end) {
                    segments.push(Segment {
                        start: s,
                        end: e,
                        section: section.clone(),
                        page: None,
                        tokens: self.tokenizer.count(&text[s..e]),
                    });
                }
            }
        };

        for line in text.split_inclusive('\n') {
            let line_start = offset;
            offset += line.len();
            let trimmed = line.trim();

            if trimmed.is_empty() {
                close_block(block_start.take(), line_start, &section, &mut segments);
                continue;
            }
            if trimmed.starts_with('#') {
                close_block(block_start.take(), line_start, &section, &mut segments);
                section = Some(heading_title(trimmed));
                // The heading line is its own segment under the new section.
                if let Some((s, e)) = trim_span(text, line_start, offset) {
                    segments.push(Segment {
                        start: s,
                        end: e,
                        section: section.clone(),
                        page: None,
                        tokens: self.tokenizer.count(&text[s..e]),
                    });
                }
                continue;
            }
            if block_start.is_none() {
                block_start = Some(line_start);
            }
        }
        close_block(block_start.take(), text.len(), &section, &mut segments);
        segments
    }

    /// Break any segment over the max budget at sentence boundaries,
    /// falling back to whitespace.
    fn shrink_oversized(&self, segments: Vec<Segment>, text: &str) -> Vec<Segment> {
        let mut result = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment.tokens <= self.config.max_tokens {
                result.push(segment);
                continue;
            }
            for (start, end) in split_sentences(text, segment.start, segment.end) {
                let tokens = self.tokenizer.count(&text[start..end]);
                if tokens <= self.config.max_tokens {
                    result.push(Segment {
                        start,
                        end,
                        section: segment.section.clone(),
                        page: segment.page,
                        tokens,
                    });
                } else {
                    for (ws, we) in self.split_whitespace(text, start, end) {
                        result.push(Segment {
                            start: ws,
                            end: we,
                            section: segment.section.clone(),
                            page: segment.page,
                            tokens: self.tokenizer.count(&text[ws..we]),
                        });
                    }
                }
            }
        }
        result
    }

    /// Greedy whitespace packing into pieces of at most max_tokens each.
    fn split_whitespace(&self, text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
        let slice = &text[start..end];
        let mut words: Vec<(usize, usize)> = Vec::new();
        let mut word_start: Option<usize> = None;
        for (i, c) in slice.char_indices() {
            if c.is_whitespace() {
                if let Some(ws) = word_start.take() {
                    words.push((start + ws, start + i));
                }
            } else if word_start.is_none() {
                word_start = Some(i);
            }
        }
        if let Some(ws) = word_start {
            words.push((start + ws, end));
        }
        if words.is_empty() {
            return vec![(start, end)];
        }

        let mut pieces = Vec::new();
        let mut piece_start = words[0].0;
        let mut piece_end = words[0].1;
        for &(ws, we) in &words[1..] {
            let candidate = &text[piece_start..we];
            if self.tokenizer.count(candidate) > self.config.max_tokens {
                pieces.push((piece_start, piece_end));
                piece_start = ws;
            }
            piece_end = we;
        }
        pieces.push((piece_start, piece_end));
        pieces
    }
}

fn heading_title(line: &str) -> String {
    line.trim_start_matches('#').trim().to_string()
}

/// Shrink a span to exclude surrounding whitespace; `None` when empty.
fn trim_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let slice = &text[start..end];
    let trimmed = slice.trim_start();
    let lead = slice.len() - trimmed.len();
    let trimmed = trimmed.trim_end();
    if trimmed.is_empty() {
        return None;
    }
    let s = start + lead;
    Some((s, s + trimmed.len()))
}

/// Sentence spans within `[start, end)`: boundaries after `.`, `!`, `?`
/// followed by whitespace.
fn split_sentences(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let slice = &text[start..end];
    let mut spans = Vec::new();
    let mut sentence_start = 0usize;
    let mut prev_was_terminator = false;

    for (i, c) in slice.char_indices() {
        if prev_was_terminator && c.is_whitespace() {
            if let Some((s, e)) = trim_span(text, start + sentence_start, start + i) {
                spans.push((s, e));
            }
            sentence_start = i;
        }
        prev_was_terminator = matches!(c, '.' | '!' | '?');
    }
    if let Some((s, e)) = trim_span(text, start + sentence_start, end) {
        spans.push((s, e));
    }
    if spans.is_empty() {
        vec![(start, end)]
    } else {
        spans
    }
}

/// Split segments at page boundaries and stamp each with its page number.
fn split_on_pages(
    segments: Vec<Segment>,
    pages: &[PageSpan],
    text: &str,
    tokenizer: &Tokenizer,
) -> Vec<Segment> {
    let mut result = Vec::with_capacity(segments.len());
    for segment in segments {
        let mut cursor = segment.start;
        while cursor < segment.end {
            let page = page_at(pages, cursor);
            let boundary = pages
                .iter()
                .map(|p| p.end_char as usize)
                .filter(|&e| e > cursor && e < segment.end)
                .min()
                .unwrap_or(segment.end);
            if let Some((s, e)) = trim_span(text, cursor, boundary) {
                result.push(Segment {
                    start: s,
                    end: e,
                    section: segment.section.clone(),
                    page,
                    tokens: tokenizer.count(&text[s..e]),
                });
            }
            cursor = boundary.max(cursor + 1);
        }
    }
    result
}

fn page_at(pages: &[PageSpan], offset: usize) -> Option<i64> {
    pages
        .iter()
        .find(|p| (p.start_char as usize) <= offset && offset < p.end_char as usize)
        .or_else(|| pages.iter().rev().find(|p| (p.start_char as usize) <= offset))
        .map(|p| p.index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_chunker() -> Chunker {
        Chunker::approx()
    }

    fn small_chunker(target: usize, max: usize, min: usize) -> Chunker {
        Chunker::new(
            ChunkerConfig {
                target_tokens: target,
                max_tokens: max,
                min_tokens: min,
            },
            Tokenizer::approx(),
        )
    }

    #[test]
    fn test_two_sections_become_two_chunks() {
        let text = "# A\n\nparagraph one.\n\n# B\n\nparagraph two.";
        let chunks = approx_chunker().chunk(text, &[]);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section.as_deref(), Some("A"));
        assert_eq!(chunks[1].section.as_deref(), Some("B"));
        assert_eq!(&text[chunks[0].start_char..chunks[0].end_char], chunks[0].text);
        assert_eq!(&text[chunks[1].start_char..chunks[1].end_char], chunks[1].text);
        assert!(chunks[0].text.contains("paragraph one."));
        assert!(chunks[1].text.contains("paragraph two."));
    }

    #[test]
    fn test_spans_are_exact_slices() {
        let text = "intro paragraph.\n\n# Heading\n\nbody text here.\n\nmore body.";
        let chunks = approx_chunker().chunk(text, &[]);
        for chunk in &chunks {
            assert_eq!(&text[chunk.start_char..chunk.end_char], chunk.text);
        }
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(approx_chunker().chunk("", &[]).is_empty());
        assert!(approx_chunker().chunk("   \n\n  ", &[]).is_empty());
    }

    #[test]
    fn test_oversized_paragraph_splits_under_max() {
        // One paragraph of ~200 tokens against a max of 32.
        let text = "word ".repeat(160);
        let chunker = small_chunker(24, 32, 8);
        let chunks = chunker.chunk(&text, &[]);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.token_count <= 32,
                "chunk has {} tokens",
                chunk.token_count
            );
            assert_eq!(&text[chunk.start_char..chunk.end_char], chunk.text);
        }
    }

    #[test]
    fn test_sentences_preferred_over_mid_word_splits() {
        let text = format!(
            "{} {} {}",
            "First sentence words here.",
            "Second sentence words here.",
            "Third sentence words here."
        );
        let chunker = small_chunker(6, 8, 2);
        let chunks = chunker.chunk(&text, &[]);
        // Every piece ends on a sentence terminator.
        for chunk in &chunks {
            assert!(chunk.text.ends_with('.'), "piece: {:?}", chunk.text);
        }
    }

    #[test]
    fn test_trailing_remainder_kept() {
        let text = "# Top\n\nshort tail";
        let chunks = approx_chunker().chunk(text, &[]);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.ends_with("short tail"));
    }

    #[test]
    fn test_greedy_accumulation_until_target() {
        // Several small paragraphs under one section pack into one chunk.
        let text = "para one words.\n\npara two words.\n\npara three words.";
        let chunks = approx_chunker().chunk(text, &[]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[0].end_char, text.len());
    }

    #[test]
    fn test_page_mapping() {
        // Two "pages" joined by the loader with a blank line.
        let page_one = "alpha beta gamma delta.";
        let page_two = "epsilon zeta eta theta.";
        let text = format!("{page_one}\n\n{page_two}");
        let pages = vec![
            PageSpan {
                index: 1,
                start_char: 0,
                end_char: page_one.len() as i64,
            },
            PageSpan {
                index: 2,
                start_char: (page_one.len() + 2) as i64,
                end_char: text.len() as i64,
            },
        ];

        let chunks = approx_chunker().chunk(&text, &pages);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_from, Some(1));
        assert_eq!(chunks[0].page_to, Some(2));
    }

    #[test]
    fn test_undersized_chunk_absorbs_overflow() {
        // The first paragraph alone is below min, so the overflowing next
        // segment is absorbed rather than flushed undersized; nothing is
        // ever dropped.
        let text = "tiny.\n\nanother modest paragraph of words.";
        let chunker = small_chunker(100, 6, 4);
        let chunks = chunker.chunk(text, &[]);
        assert!(chunks[0].text.starts_with("tiny."));
        assert!(chunks[0].text.contains("another"));
        assert_eq!(chunks.last().unwrap().end_char, text.len());
    }

    #[test]
    fn test_heading_depth_is_stripped_from_section() {
        let text = "### Deep Section\n\ncontent";
        let chunks = approx_chunker().chunk(text, &[]);
        assert_eq!(chunks[0].section.as_deref(), Some("Deep Section"));
    }
}
