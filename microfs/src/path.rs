//! Slash-separated path handling for the resolver. Paths are plain byte
//! strings; there is no normalization beyond dropping empty segments, and
//! `.`/`..` are ordinary names resolved through directory entries.

/// The non-empty segments of `path`, in order. An empty or all-slash path
/// yields nothing and resolves to the root.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Splits `path` into its parent portion and final segment.
///
/// The parent of a top-level name is the empty string (the root); a path
/// with no final segment, like `/`, yields an empty name.
pub fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    }
}

/// Path form used in messages: the root's parent portion is empty internally
/// but reads as `/`.
pub fn display(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}
