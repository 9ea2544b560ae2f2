// G-code line filtering for streamed jobs

/// Removes a `;` comment from `line`. A backslash escapes the next `;`.
pub fn strip_comment(line: &str) -> &str {
    if !line.contains(';') {
        return line;
    }
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        if c == ';' && !escaped {
            return line[..idx].trim();
        }
        escaped = c == '\\' && !escaped;
    }
    line.trim()
}

/// Trims and strips comments; `None` for blank and comment-only lines.
pub fn process_line(line: &str) -> Option<String> {
    let processed = strip_comment(line.trim());
    if processed.is_empty() {
        None
    } else {
        Some(processed.to_string())
    }
}
