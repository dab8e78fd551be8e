/// A bounded window of a document's extracted text.
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub text: String,
    pub index: usize,
}

/// Round a byte position up to the next char boundary.
fn ceil_char_boundary(text: &str, byte_pos: usize) -> usize {
    if byte_pos >= text.len() {
        return text.len();
    }
    let mut pos = byte_pos;
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

/// Round a byte position down to the previous char boundary.
fn floor_char_boundary(text: &str, byte_pos: usize) -> usize {
    if byte_pos >= text.len() {
        return text.len();
    }
    let mut pos = byte_pos;
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Split text into overlapping windows of at most `max_chunk_size` bytes.
///
/// Window ends prefer a paragraph, line, sentence or word break inside the
/// window. Each window after the first starts `overlap` bytes (clamped to a
/// char boundary) before the previous window's end, so consecutive chunks
/// share that region verbatim. Deterministic for identical input and
/// parameters; the leading/trailing whitespace of the input is dropped but
/// chunk interiors are kept byte-for-byte.
pub fn chunk_text(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if text.len() <= max_chunk_size {
        return vec![TextChunk {
            text: text.to_string(),
            index: 0,
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut index = 0;

    while start < text.len() {
        let end = ceil_char_boundary(text, (start + max_chunk_size).min(text.len()));

        let actual_end = if end < text.len() {
            find_break_point(text, start, end)
        } else {
            end
        };

        chunks.push(TextChunk {
            text: text[start..actual_end].to_string(),
            index,
        });
        index += 1;

        if actual_end >= text.len() {
            break;
        }

        let next_start = if actual_end.saturating_sub(overlap) > start {
            floor_char_boundary(text, actual_end - overlap)
        } else {
            actual_end
        };

        // Guarantee forward progress even when the overlap step lands on or
        // before the current start.
        start = if next_start <= start { actual_end } else { next_start };
    }

    chunks
}

/// Pick the last natural break inside `text[start..max_end]`, falling back
/// to the hard byte limit when the window has none.
fn find_break_point(text: &str, start: usize, max_end: usize) -> usize {
    let segment = &text[start..max_end];

    if let Some(pos) = segment.rfind("\n\n") {
        return start + pos + 2;
    }
    if let Some(pos) = segment.rfind('\n') {
        return start + pos + 1;
    }
    for sentinel in [". ", "? ", "! "] {
        if let Some(pos) = segment.rfind(sentinel) {
            return start + pos + sentinel.len();
        }
    }
    if let Some(pos) = segment.rfind(' ') {
        return start + pos + 1;
    }
    max_end
}
