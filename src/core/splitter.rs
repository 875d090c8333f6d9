//! Incremental sentence splitting over an LLM token stream.
//!
//! Text deltas accumulate in a buffer; whenever the buffer contains a
//! sentence boundary the complete sentence is handed to the TTS prefetcher so
//! synthesis can start long before the stream ends.
//!
//! A boundary is a run of `.?!` followed by whitespace (or a newline), with
//! two guards: no split directly after a common abbreviation, and no split
//! that would produce a sentence shorter than [`MIN_SENTENCE_CHARS`]. The
//! final flush at end-of-stream emits whatever remains.

/// Abbreviations that end in a period but do not end a sentence.
const ABBREVIATIONS: &[&str] = &["mr.", "mrs.", "dr.", "st.", "e.g.", "i.e."];

/// Minimum sentence length (trimmed chars) for a mid-stream split.
pub const MIN_SENTENCE_CHARS: usize = 8;

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '?' | '!')
}

/// Whether `text` ends with a known abbreviation (case-insensitive, checked
/// against the last whitespace-separated token, leading punctuation ignored).
fn ends_with_abbreviation(text: &str) -> bool {
    let last_token = match text.split_whitespace().next_back() {
        Some(token) => token.to_ascii_lowercase(),
        None => return false,
    };
    let token = last_token.trim_start_matches(|c: char| !c.is_alphanumeric());
    ABBREVIATIONS.contains(&token)
}

/// Streaming sentence splitter.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return every complete sentence it unlocked.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        while let Some(split_at) = self.find_boundary() {
            let rest = self.buffer.split_off(split_at);
            let sentence = std::mem::replace(&mut self.buffer, rest);
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Emit any residual text as the final sentence.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    /// Byte offset just past the first valid sentence boundary, if any.
    fn find_boundary(&self) -> Option<usize> {
        let buf = self.buffer.as_str();
        let mut chars = buf.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            if c == '\n' {
                if self.valid_candidate(&buf[..i]) {
                    return Some(i + c.len_utf8());
                }
                continue;
            }

            if !is_terminal(c) {
                continue;
            }

            // Extend through the whole punctuation run ("?!", "...").
            let mut end = i + c.len_utf8();
            while let Some(&(j, next)) = chars.peek() {
                if is_terminal(next) {
                    end = j + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }

            // A split needs the following character: mid-stream we cannot
            // know whether "e.g" continues, so wait for more input.
            match buf[end..].chars().next() {
                Some(next) if next.is_whitespace() => {
                    let candidate = &buf[..end];
                    if self.valid_candidate(candidate) && !ends_with_abbreviation(candidate) {
                        return Some(end);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn valid_candidate(&self, candidate: &str) -> bool {
        candidate.trim().chars().count() >= MIN_SENTENCE_CHARS
    }

    /// Text accumulated but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
