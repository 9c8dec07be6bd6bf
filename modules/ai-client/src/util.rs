/// Truncate to at most `max_bytes` bytes without splitting a character.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Strip a markdown code-fence wrapper (```json ... ``` or ``` ... ```)
/// from a model response, leaving the inner payload.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_multibyte_text_on_a_boundary() {
        let text = "Hello 世界";
        let truncated = truncate_to_char_boundary(text, 8);
        assert!(truncated.len() <= 8);
        assert!(text.starts_with(truncated));
    }

    #[test]
    fn short_text_is_returned_unchanged() {
        assert_eq!(truncate_to_char_boundary("Hello", 100), "Hello");
    }

    #[test]
    fn strips_json_fences() {
        assert_eq!(strip_code_blocks("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
    }

    #[test]
    fn leaves_bare_json_alone() {
        assert_eq!(strip_code_blocks("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn strips_fence_with_surrounding_whitespace() {
        assert_eq!(strip_code_blocks("  ```json\n{}\n```  "), "{}");
    }
}
