//! Token budgeting for generation prompts.
//!
//! Uses tiktoken-rs with cl100k_base encoding. If the tokenizer cannot be
//! loaded, falls back to a character budget of four characters per token.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;
use tracing::warn;

const CHARS_PER_TOKEN: usize = 4;

fn tokenizer() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            warn!(error = %e, "Failed to load cl100k_base tokenizer, using character budget");
            None
        }
    })
    .as_ref()
}

/// Count tokens, estimating from characters when no tokenizer is available.
pub fn count_tokens(text: &str) -> usize {
    match tokenizer() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(CHARS_PER_TOKEN),
    }
}

/// Truncate `text` to at most `max_tokens` tokens.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if let Some(bpe) = tokenizer() {
        let tokens = bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        if let Ok(decoded) = bpe.decode(tokens[..max_tokens].to_vec()) {
            return decoded;
        }
    }
    truncate_chars(text, max_tokens * CHARS_PER_TOKEN)
}

/// Truncate on a character boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_untouched() {
        assert_eq!(truncate_to_tokens("market trends", 100), "market trends");
    }

    #[test]
    fn test_long_text_is_cut() {
        let text = "growth ".repeat(500);
        let cut = truncate_to_tokens(&text, 20);
        assert!(cut.len() < text.len());
        assert!(count_tokens(&cut) <= 20);
    }

    #[test]
    fn test_truncate_chars_respects_utf8() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
