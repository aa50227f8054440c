//! Canned output used when no credential is configured.

use flowrun_core::types::CompletionRequest;

/// Characters per emulated stream slice.
pub const SLICE_CHARS: usize = 10;

/// Marker every placeholder response starts with.
pub const MARKER: &str = "[Placeholder response for";

pub fn text(request: &CompletionRequest) -> String {
    format!(
        "{} {}]\n\nSystem: {}\n\nUser: {}\n\nThis is a placeholder response. Configure an API key to enable real completions.",
        MARKER, request.model, request.system_prompt, request.user_prompt
    )
}

pub fn is_placeholder(output: &str) -> bool {
    output.starts_with(MARKER)
}

/// Split `text` into slices of at most `size` characters, never inside a
/// UTF-8 sequence.
pub fn slices(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_core::types::Sampling;

    #[test]
    fn test_text_is_marked_and_echoes_prompts() {
        let req = CompletionRequest {
            model: "gpt-4o".into(),
            system_prompt: "Be brief.".into(),
            user_prompt: "Hi".into(),
            sampling: Sampling::Temperature(0.7),
            max_tokens: 10,
        };
        let out = text(&req);
        assert!(is_placeholder(&out));
        assert!(out.contains("gpt-4o"));
        assert!(out.contains("System: Be brief."));
        assert!(out.contains("User: Hi"));
    }

    #[test]
    fn test_slices_respect_char_boundaries() {
        let parts = slices("héllo wörld!", 5);
        assert_eq!(parts, vec!["héllo", " wörl", "d!"]);
        assert_eq!(parts.concat(), "héllo wörld!");
        assert!(slices("", 10).is_empty());
    }
}
