//! Common English function words.
//!
//! List from the Stanford IR book, plus the sentence-final period.

/// Words that carry little content on their own.
pub const STOP_WORDS: [&str; 23] = [
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "of",
    "on", "that", "the", "to", "was", "were", "will", "with", ".",
];

/// Case-sensitive membership test.
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words() {
        assert!(is_stop_word("the"));
        assert!(is_stop_word("."));
        assert!(!is_stop_word("cat"));
        assert!(!is_stop_word("The"));
    }
}
