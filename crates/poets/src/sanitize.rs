//! Helpers for trimming data before it is logged or stored.
//!
//! Span fields carry file names only, never full paths, and captured
//! process output is capped before it lands in `error_message` or the
//! run summary.

use std::path::Path;

/// Characters of stdout/stderr kept from a generator run.
pub const OUTPUT_TAIL_CHARS: usize = 2000;

/// Returns only the filename component of a path (no directory).
///
/// Used for span fields and log lines that mention generated files.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Last `max_chars` characters of `text`, split on a char boundary.
pub fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

/// Tail of captured process output, capped at [`OUTPUT_TAIL_CHARS`].
pub fn output_tail(text: &str) -> String {
    tail(text.trim_end(), OUTPUT_TAIL_CHARS)
}
