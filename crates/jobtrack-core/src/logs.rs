//! Console log helpers.

/// Return the last `tail` lines of `text`.
///
/// A trailing newline terminates the last line rather than starting an empty
/// one. When the text has `tail` lines or fewer it is returned unmodified, as
/// it is for `tail == 0`.
pub fn tail_lines(text: &str, tail: usize) -> &str {
    if tail == 0 {
        return text;
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    let mut start = body.len();
    for _ in 0..tail {
        match body[..start].rfind('\n') {
            Some(idx) => start = idx,
            None => return text,
        }
    }
    &text[start + 1..]
}

/// Split console output into lines for display.
///
/// Lines end at `\n` or `\r\n`, so Windows agents' carriage returns are dropped.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "line 1\nline 2\nline 3\nline 4\nline 5";

    #[test]
    fn test_tail_returns_last_lines_in_order() {
        assert_eq!(tail_lines(LOG, 2), "line 4\nline 5");
    }

    #[test]
    fn test_tail_keeps_trailing_newline() {
        let log = format!("{}\n", LOG);
        assert_eq!(tail_lines(&log, 2), "line 4\nline 5\n");
    }

    #[test]
    fn test_tail_longer_than_log_returns_everything() {
        assert_eq!(tail_lines(LOG, 5), LOG);
        assert_eq!(tail_lines(LOG, 50), LOG);
        assert_eq!(tail_lines("", 3), "");
    }

    #[test]
    fn test_tail_zero_is_whole_log() {
        assert_eq!(tail_lines(LOG, 0), LOG);
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("a\nb\n"), vec!["a", "b"]);
        assert!(split_lines("").is_empty());
        assert_eq!(split_lines("a\r\nb\r\n"), vec!["a", "b"]);
    }
}
