/// Split `text` into pieces of at most `max_chars` characters.
///
/// Cuts prefer the last whitespace inside the window. Consecutive pieces
/// share about `overlap` characters; the overlap is clamped below
/// `max_chars` so every step moves forward. Pieces are trimmed and empty
/// pieces are dropped.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let max_chars = max_chars.max(1);
    let overlap = overlap.min(max_chars.saturating_sub(1));

    if chars.len() <= max_chars {
        let whole = text.trim();
        return if whole.is_empty() {
            Vec::new()
        } else {
            vec![whole.to_string()]
        };
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + max_chars).min(chars.len());
        if end < chars.len() {
            // Back off to a word boundary unless the window has none.
            if let Some(space) = chars[start..end].iter().rposition(|c| c.is_whitespace()) {
                if space > 0 {
                    end = start + space;
                }
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        if end >= chars.len() {
            break;
        }

        let mut next = end.saturating_sub(overlap);
        if next > 0 && !chars[next - 1].is_whitespace() {
            // Start the overlap on a word boundary when one is in reach.
            if let Some(space) = chars[next..end].iter().position(|c| c.is_whitespace()) {
                next += space;
            }
        }
        start = if next > start { next } else { end };
    }
    chunks
}
