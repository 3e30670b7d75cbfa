//! Text chunking with configurable size and overlap.
//!
//! Windows are measured in characters (Unicode scalar values). Each window is
//! cut at the best boundary it contains, trying paragraph breaks, then
//! sentence ends, then whitespace, and only then a hard cut. The next window
//! starts exactly `chunk_overlap` characters before the previous one ended.

use unicode_segmentation::UnicodeSegmentation;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// A slice of the source text, with character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
}

/// Recursive character splitter.
#[derive(Debug, Clone, Copy)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

/// Candidate cut positions, as sorted character indices.
struct Boundaries {
    paragraphs: Vec<usize>,
    sentences: Vec<usize>,
    words: Vec<usize>,
}

impl Boundaries {
    fn scan(text: &str) -> Self {
        let mut paragraphs = Vec::new();
        let mut words = Vec::new();
        let mut byte_to_char = Vec::with_capacity(text.len() + 1);

        let mut prev = None;
        for (char_idx, (byte_idx, c)) in text.char_indices().enumerate() {
            byte_to_char.resize(byte_idx + 1, char_idx);
            if c == '\n' && prev == Some('\n') {
                paragraphs.push(char_idx + 1);
            }
            if c.is_whitespace() {
                words.push(char_idx + 1);
            }
            prev = Some(c);
        }
        byte_to_char.resize(text.len() + 1, text.chars().count());

        let sentences = text
            .split_sentence_bound_indices()
            .map(|(byte_idx, _)| byte_to_char[byte_idx])
            .filter(|&idx| idx > 0)
            .collect();

        Self {
            paragraphs,
            sentences,
            words,
        }
    }

    /// Best cut in `[min_end, limit]`, by separator priority.
    fn best_cut(&self, min_end: usize, limit: usize) -> Option<usize> {
        [&self.paragraphs, &self.sentences, &self.words]
            .into_iter()
            .find_map(|positions| last_in_range(positions, min_end, limit))
    }
}

fn last_in_range(sorted: &[usize], min: usize, max: usize) -> Option<usize> {
    let upto = sorted.partition_point(|&p| p <= max);
    match upto.checked_sub(1).map(|i| sorted[i]) {
        Some(pos) if pos >= min => Some(pos),
        _ => None,
    }
}

impl RecursiveSplitter {
    /// Create a splitter. An overlap that would prevent progress is clamped
    /// to `chunk_size - 1`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into overlapping spans. Whitespace-only spans are dropped.
    pub fn split(&self, text: &str) -> Vec<TextSpan> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return Vec::new();
        }

        let boundaries = Boundaries::scan(text);
        let min_len = (self.chunk_overlap + 1).max(self.chunk_size / 2);

        let mut spans = Vec::new();
        let mut start = 0;

        loop {
            let limit = (start + self.chunk_size).min(total);
            let end = if limit == total {
                total
            } else {
                boundaries
                    .best_cut(start + min_len, limit)
                    .unwrap_or(limit)
            };

            let piece: String = chars[start..end].iter().collect();
            if !piece.trim().is_empty() {
                spans.push(TextSpan {
                    text: piece,
                    start_char: start,
                    end_char: end,
                });
            }

            if end == total {
                break;
            }
            start = end - self.chunk_overlap;
        }

        tracing::debug!(
            "Split {} chars into {} chunks (size: {}, overlap: {})",
            total,
            spans.len(),
            self.chunk_size,
            self.chunk_overlap
        );

        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tail(s: &str, n: usize) -> String {
        let chars: Vec<char> = s.chars().collect();
        chars[chars.len().saturating_sub(n)..].iter().collect()
    }

    fn head(s: &str, n: usize) -> String {
        s.chars().take(n).collect()
    }

    #[test]
    fn test_3000_chars_make_four_chunks() {
        let text = "a".repeat(3000);
        let spans = RecursiveSplitter::new(1000, 200).split(&text);

        assert_eq!(spans.len(), 4);
        let starts: Vec<usize> = spans.iter().map(|s| s.start_char).collect();
        assert_eq!(starts, vec![0, 800, 1600, 2400]);
        assert_eq!(spans[3].end_char, 3000);
    }

    #[test]
    fn test_consecutive_chunks_overlap_exactly() {
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let mut text = String::new();
        for i in 0..120 {
            text.push_str(sentence);
            if i % 7 == 6 {
                text.push_str("\n\n");
            }
        }

        let spans = RecursiveSplitter::new(500, 100).split(&text);
        assert!(spans.len() > 3);

        for pair in spans.windows(2) {
            let prev = &pair[0].text;
            let next = &pair[1].text;
            let n = 100.min(prev.chars().count());
            assert_eq!(head(next, n), tail(prev, n));
        }
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let first = "Alpha beta gamma. ".repeat(20);
        let second = "Delta epsilon zeta. ".repeat(20);
        let text = format!("{}\n\n{}", first.trim_end(), second);

        let spans = RecursiveSplitter::new(500, 50).split(&text);
        assert!(spans[0].text.ends_with("\n\n"));
    }

    #[test]
    fn test_falls_back_to_sentence_then_word() {
        let text = "One two three four five. ".repeat(40);
        let spans = RecursiveSplitter::new(300, 30).split(&text);
        assert!(spans[0].text.ends_with(". "));

        let text = "word ".repeat(200);
        let spans = RecursiveSplitter::new(203, 20).split(&text);
        assert!(spans[0].text.ends_with(' '));
        assert!(spans[0].text.chars().count() <= 203);
    }

    #[test]
    fn test_chunks_never_exceed_size() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(80);
        for span in RecursiveSplitter::new(250, 40).split(&text) {
            assert!(span.text.chars().count() <= 250);
        }
    }

    #[test]
    fn test_short_and_empty_input() {
        let splitter = RecursiveSplitter::default();
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("   \n\n  ").is_empty());

        let spans = splitter.split("Just one short line.");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Just one short line.");
    }

    #[test]
    fn test_multibyte_text() {
        let text = "日本語のテキスト。".repeat(300);
        let spans = RecursiveSplitter::new(100, 20).split(&text);
        assert!(spans.len() > 1);
        for span in &spans {
            assert!(span.text.chars().count() <= 100);
        }
    }

    #[test]
    fn test_overlap_clamped() {
        let splitter = RecursiveSplitter::new(10, 50);
        assert_eq!(splitter.chunk_overlap(), 9);

        let spans = splitter.split(&"x".repeat(25));
        assert_eq!(spans.last().map(|s| s.end_char), Some(25));
    }
}
