//! Middle-omission truncation for shell output (spec §4.5 output bound):
//! keeps the command's head (what ran) and tail (the result) and drops the
//! middle, rather than truncating head- or tail-only.

use crate::types::MAX_OUTPUT_CHARS;

/// Truncate `output` to at most `max_chars` characters, keeping the first
/// and last `max_chars / 2` characters and collapsing the middle into a
/// marker noting how many characters were omitted.
///
/// Splits on `char` boundaries, not bytes, so multi-byte sequences are
/// never cut in half.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    let chars: Vec<char> = output.chars().collect();
    let total = chars.len();
    if total <= max_chars {
        return output.to_owned();
    }

    let half = max_chars / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[total - half..].iter().collect();
    let omitted = total - max_chars;

    format!("{head}\n\n... [OUTPUT TRUNCATED: {omitted} chars omitted] ...\n\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_returned_as_is() {
        let s = "hello world";
        assert_eq!(truncate_output(s, MAX_OUTPUT_CHARS), s);
    }

    #[test]
    fn exact_boundary_returned_as_is() {
        let s: String = "x".repeat(MAX_OUTPUT_CHARS);
        let result = truncate_output(&s, MAX_OUTPUT_CHARS);
        assert_eq!(result.chars().count(), MAX_OUTPUT_CHARS);
        assert!(!result.contains("TRUNCATED"));
    }

    #[test]
    fn one_over_boundary_is_truncated() {
        let s: String = "a".repeat(MAX_OUTPUT_CHARS + 1);
        let result = truncate_output(&s, MAX_OUTPUT_CHARS);
        assert!(result.contains("OUTPUT TRUNCATED"));
        assert!(result.contains("1 chars omitted"));
    }

    #[test]
    fn large_input_preserves_head_and_tail() {
        let head_marker: String = "A".repeat(10_000);
        let body: String = "B".repeat(20_000);
        let tail_marker: String = "C".repeat(10_000);
        let input = format!("{head_marker}{body}{tail_marker}");

        let result = truncate_output(&input, MAX_OUTPUT_CHARS);
        assert!(result.starts_with('A'));
        assert!(result.ends_with('C'));
    }

    #[test]
    fn custom_max_chars_respected() {
        let s: String = "z".repeat(200);
        let result = truncate_output(&s, 100);
        assert!(result.contains("100 chars omitted"));
    }

    #[test]
    fn unicode_does_not_break_on_a_char_boundary() {
        let s: String = "€".repeat(40_000);
        let result = truncate_output(&s, MAX_OUTPUT_CHARS);
        assert!(result.contains("OUTPUT TRUNCATED"));
    }

    #[test]
    fn empty_input_returned_as_is() {
        assert_eq!(truncate_output("", MAX_OUTPUT_CHARS), "");
    }
}
