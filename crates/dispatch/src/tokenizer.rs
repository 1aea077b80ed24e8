/// Splits text into words on runs of whitespace.
///
/// Empty or whitespace-only input yields an empty sequence.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Number of words `tokenize` would produce, without allocating.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Joins tokens back into a single-space separated payload.
pub fn join_tokens(tokens: &[&str]) -> String {
    tokens.join(" ")
}
