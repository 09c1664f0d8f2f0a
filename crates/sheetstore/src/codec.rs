//! Cell chunk codec
//!
//! A cell holds at most `max_len` characters, so long text is split into
//! chunks and spread over parallel columns. For a group of K fields the
//! layout is breadth-first: columns `0..K` hold chunk 0 of every field,
//! columns `K..2K` hold chunk 1, and so on. Rows of the same tab may use a
//! different number of groups; decoding strides by K and treats missing
//! cells as empty.

/// Largest number of characters the remote service accepts in one cell
pub const DEFAULT_MAX_CELL_LEN: usize = 50_000;

/// Split `text` into chunks of at most `max_len` characters.
///
/// Empty text yields one empty chunk so every field keeps its column.
/// A length that is an exact multiple of `max_len` yields no trailing
/// empty chunk.
#[must_use]
pub fn encode(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::with_capacity(text.len() / max_len + 1);
    let mut start = 0;
    let mut count = 0;
    for (i, _) in text.char_indices() {
        if count == max_len {
            chunks.push(text[start..i].to_string());
            start = i;
            count = 0;
        }
        count += 1;
    }
    chunks.push(text[start..].to_string());
    chunks
}

pub(crate) fn as_str<S: AsRef<str>>(s: &S) -> &str {
    s.as_ref()
}

/// Concatenate chunks in order
#[must_use]
pub fn decode<S: AsRef<str>>(chunks: &[S]) -> String {
    chunks.iter().map(as_str).collect()
}

/// Lay out several fields breadth-first over as many groups as the longest needs
#[must_use]
pub fn encode_group<S: AsRef<str>>(fields: &[S], max_len: usize) -> Vec<String> {
    let encoded: Vec<Vec<String>> = fields
        .iter()
        .map(|f| encode(f.as_ref(), max_len))
        .collect();
    let groups = encoded.iter().map(Vec::len).max().unwrap_or(0);

    let mut cells = Vec::with_capacity(groups * fields.len());
    for g in 0..groups {
        for chunks in &encoded {
            cells.push(chunks.get(g).cloned().unwrap_or_default());
        }
    }
    cells
}

/// Inverse of [`encode_group`] for a group of `width` fields
#[must_use]
pub fn decode_group<S: AsRef<str>>(cells: &[S], width: usize) -> Vec<String> {
    if width == 0 {
        return Vec::new();
    }
    let groups = cells.len().div_ceil(width);
    (0..width)
        .map(|k| {
            (0..groups)
                .filter_map(|g| cells.get(g * width + k))
                .map(as_str)
                .collect()
        })
        .collect()
}
