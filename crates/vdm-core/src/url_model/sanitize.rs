/// Make a filename safe to create on Linux.
///
/// Separators, NUL, whitespace and control characters become `_` (runs are
/// collapsed); leading and trailing dots, spaces and underscores are trimmed;
/// the result is capped at 255 bytes on a char boundary.
pub fn sanitize_filename(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let unsafe_char = matches!(c, '/' | '\\' | '\0') || c.is_control() || c.is_whitespace();
        if !unsafe_char {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut end = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_separators() {
        assert_eq!(sanitize_filename("a/b\\c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("file\x00name.txt"), "file_name.txt");
    }

    #[test]
    fn trims_and_collapses() {
        assert_eq!(sanitize_filename("  ..  file.txt  ..  "), "file.txt");
        assert_eq!(sanitize_filename("my   file.txt"), "my_file.txt");
        assert_eq!(sanitize_filename(".."), "");
    }

    #[test]
    fn caps_length_on_char_boundary() {
        let long = "é".repeat(200);
        let out = sanitize_filename(&long);
        assert!(out.len() <= 255);
        assert_eq!(out.len() % 2, 0);
    }
}
