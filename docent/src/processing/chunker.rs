use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::models::{SourceType, TextChunk};

/// Approximate token count of a string: characters / 4, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// A chunk is valid while it stays within 1.5x the target token budget.
/// Oversize chunks are a diagnostic signal, not an error.
pub fn validate_chunk_size(content: &str, target_tokens: usize) -> bool {
    estimate_tokens(content) * 2 <= target_tokens * 3
}

/// Document-level context used to synthesize chunk headers.
#[derive(Debug, Clone, Default)]
pub struct ChunkContext {
    pub title: Option<String>,
    pub mime_type: Option<String>,
}

/// Splits document text into overlapping, size-bounded chunks.
///
/// Boundaries prefer natural breakpoints in order: paragraph, sentence, word,
/// then a hard character cut. Each chunk's content is paired with a
/// contextual variant (title, file-type label, section marker) which is what
/// gets embedded; section-free chunks retrieve poorly without it.
pub struct TextChunker {
    target_chars: usize,
    overlap_chars: usize,
}

impl TextChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        let target_chars = config.target_tokens * 4;
        Self {
            target_chars,
            // Overlap is capped below half the target so overlap + joiner +
            // fresh content can never exceed the 1.5x hard ceiling.
            overlap_chars: config
                .overlap_chars
                .min((target_chars / 2).saturating_sub(1)),
        }
    }

    /// Pure transform: identical input always yields identical chunks.
    /// Empty or whitespace-only content yields an empty vec.
    pub fn chunk(&self, content: &str, context: Option<&ChunkContext>) -> Vec<TextChunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let segments = self.split_into_segments(content);
        let pieces = self.merge_segments(segments);
        let total = pieces.len();

        pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| {
                let contextual = format!(
                    "{}\n\n{}",
                    contextual_header(context, index, total),
                    piece
                );
                let token_count = estimate_tokens(&piece);
                TextChunk {
                    content: piece,
                    contextual_content: contextual,
                    chunk_index: index,
                    total_chunks: total,
                    token_count,
                }
            })
            .collect()
    }

    /// Break text into atomic segments, each at most `target_chars` long,
    /// descending through paragraph, sentence, word, and hard-cut granularity
    /// only as needed.
    fn split_into_segments(&self, text: &str) -> Vec<String> {
        let mut segments = Vec::new();

        for paragraph in text.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            if paragraph.len() <= self.target_chars {
                segments.push(paragraph.to_string());
                continue;
            }

            for sentence in split_into_sentences(paragraph) {
                if sentence.len() <= self.target_chars {
                    segments.push(sentence);
                    continue;
                }

                for word in sentence.split_whitespace() {
                    if word.len() <= self.target_chars {
                        segments.push(word.to_string());
                    } else {
                        segments.extend(hard_cut(word, self.target_chars));
                    }
                }
            }
        }

        segments
    }

    fn merge_segments(&self, segments: Vec<String>) -> Vec<String> {
        if segments.is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        let mut current = String::new();
        let mut current_segments: Vec<String> = Vec::new();

        for segment in segments {
            let potential_length = if current.is_empty() {
                segment.len()
            } else {
                current.len() + 1 + segment.len()
            };

            if potential_length > self.target_chars && !current.is_empty() {
                pieces.push(current.clone());

                let overlap = self.overlap_segments(&current_segments);
                current = overlap.join(" ");
                current_segments = overlap;
            }

            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&segment);
            current_segments.push(segment);
        }

        if !current.is_empty() {
            pieces.push(current);
        }

        pieces
    }

    /// Trailing segments of the previous chunk carried into the next one.
    fn overlap_segments(&self, segments: &[String]) -> Vec<String> {
        if self.overlap_chars == 0 {
            return Vec::new();
        }

        let mut overlap_len = 0;
        let mut overlap = Vec::new();

        for segment in segments.iter().rev() {
            if overlap_len + segment.len() > self.overlap_chars {
                break;
            }
            overlap_len += segment.len() + 1;
            overlap.push(segment.clone());
        }

        overlap.reverse();
        overlap
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(&ChunkingConfig::default())
    }
}

fn contextual_header(context: Option<&ChunkContext>, index: usize, total: usize) -> String {
    let mut parts = Vec::new();

    if let Some(context) = context {
        if let Some(ref title) = context.title {
            if !title.is_empty() {
                parts.push(format!("Document: {title}"));
            }
        }
        if let Some(ref mime) = context.mime_type {
            parts.push(format!("Type: {}", SourceType::from_mime(mime).label()));
        }
    }

    parts.push(format!("Section {} of {}", index + 1, total));
    parts.join(" | ")
}

fn split_into_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for grapheme in text.graphemes(true) {
        current.push_str(grapheme);

        if is_sentence_boundary(&current) {
            let trimmed = current.trim().to_string();
            if !trimmed.is_empty() {
                sentences.push(trimmed);
            }
            current.clear();
        }
    }

    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }

    sentences
}

fn is_sentence_boundary(text: &str) -> bool {
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        return false;
    }

    let last_char = trimmed.chars().last().unwrap();

    if !matches!(last_char, '.' | '!' | '?' | '\n') {
        return false;
    }

    if last_char == '\n' {
        return true;
    }

    let words: Vec<&str> = trimmed.split_whitespace().collect();
    if let Some(last_word) = words.last() {
        let abbreviations = [
            "Mr.", "Mrs.", "Ms.", "Dr.", "Prof.", "Sr.", "Jr.", "vs.", "etc.", "i.e.", "e.g.",
            "Inc.", "Ltd.", "Corp.", "Co.", "No.", "Vol.", "Ch.", "Fig.", "Eq.", "Sec.",
        ];

        if abbreviations.contains(last_word) {
            return false;
        }
    }

    true
}

/// Last resort: cut an unbroken run at character boundaries.
fn hard_cut(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if current.len() + ch.len_utf8() > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_chunker() -> TextChunker {
        TextChunker::new(&ChunkingConfig {
            target_tokens: 25, // 100 chars
            overlap_chars: 40,
        })
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_validate_chunk_size() {
        let target = 100; // 400 chars nominal, 600 chars ceiling
        assert!(validate_chunk_size(&"x".repeat(400), target));
        assert!(validate_chunk_size(&"x".repeat(600), target));
        assert!(!validate_chunk_size(&"x".repeat(2000), target));
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let chunker = TextChunker::default();
        assert!(chunker.chunk("", None).is_empty());
        assert!(chunker.chunk("   \n\t ", None).is_empty());
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let chunker = small_chunker();
        let text = "First sentence about procedures. Second sentence about keys. \
                    Third sentence about access. Fourth sentence about audits.";
        let a = chunker.chunk(text, None);
        let b = chunker.chunk(text, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_metadata_consistency() {
        let chunker = small_chunker();
        let text = "One sentence here. Another sentence there. More text follows now. \
                    Even more text continues. The final sentence closes it out completely.";
        let chunks = chunker.chunk(text, None);

        assert!(!chunks.is_empty());
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.total_chunks, total);
        }
    }

    #[test]
    fn test_chunks_respect_hard_ceiling() {
        let chunker = small_chunker();
        let text = "word ".repeat(500);
        for chunk in chunker.chunk(&text, None) {
            assert!(
                validate_chunk_size(&chunk.content, 25),
                "chunk of {} chars exceeds ceiling",
                chunk.content.len()
            );
        }
    }

    #[test]
    fn test_coverage_no_foreign_characters() {
        let chunker = small_chunker();
        let text = "The checkout procedure requires a manager key. Keys are stored in the \
                    office safe. Only supervisors may open the safe after hours.";
        let chunks = chunker.chunk(text, None);

        for chunk in &chunks {
            for word in chunk.content.split_whitespace() {
                assert!(text.contains(word), "chunk introduced '{word}'");
            }
        }
        // Every source word survives somewhere.
        for word in text.split_whitespace() {
            assert!(
                chunks.iter().any(|c| c.content.contains(word)),
                "source word '{word}' was dropped"
            );
        }
    }

    #[test]
    fn test_contextual_header_fields() {
        let chunker = TextChunker::default();
        let context = ChunkContext {
            title: Some("Store Handbook".to_string()),
            mime_type: Some("application/pdf".to_string()),
        };
        let chunks = chunker.chunk("Short content.", Some(&context));

        assert_eq!(chunks.len(), 1);
        let contextual = &chunks[0].contextual_content;
        assert!(contextual.contains("Document: Store Handbook"));
        assert!(contextual.contains("Type: PDF"));
        assert!(contextual.contains("Section 1 of 1"));
        assert!(contextual.ends_with("Short content."));
        assert_eq!(chunks[0].content, "Short content.");
    }

    #[test]
    fn test_header_without_context_still_has_section_marker() {
        let chunker = TextChunker::default();
        let chunks = chunker.chunk("Plain text.", None);
        assert!(chunks[0].contextual_content.starts_with("Section 1 of 1"));
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let chunker = small_chunker();
        let para_a = "Alpha paragraph is fairly short.";
        let para_b = "Beta paragraph is also fairly short.";
        let para_c = "Gamma paragraph rounds out the set.";
        let text = format!("{para_a}\n\n{para_b}\n\n{para_c}");

        let chunks = chunker.chunk(&text, None);
        // Paragraph text is never split mid-sentence when it fits the budget.
        for para in [para_a, para_b, para_c] {
            assert!(chunks.iter().any(|c| c.content.contains(para)));
        }
    }

    #[test]
    fn test_overlap_between_adjacent_chunks() {
        let chunker = small_chunker();
        let text = "One sentence here. Another sentence there. More text follows now. \
                    Even more text continues. The final sentence closes it out completely.";
        let chunks = chunker.chunk(text, None);
        assert!(chunks.len() >= 2);

        // The tail segment of chunk N reappears at the head of chunk N+1.
        let first = &chunks[0].content;
        let second = &chunks[1].content;
        let tail = first.split(". ").last().unwrap().trim_end_matches('.');
        assert!(
            second.contains(tail),
            "expected overlap '{tail}' in '{second}'"
        );
    }

    #[test]
    fn test_unbroken_run_is_hard_cut() {
        let chunker = small_chunker();
        let text = "x".repeat(350);
        let chunks = chunker.chunk(&text, None);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.content.len() <= 100);
        }
    }

    #[test]
    fn test_token_count_matches_estimate() {
        let chunker = TextChunker::default();
        let chunks = chunker.chunk("Some short content here.", None);
        assert_eq!(
            chunks[0].token_count,
            estimate_tokens(&chunks[0].content)
        );
    }
}
