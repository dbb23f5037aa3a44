//! Query and document tokenization for the BM25 index.
//!
//! Case-folded, split on whitespace and punctuation, stop-word filtered.
//! The same tokenizer runs on both sides so scores stay comparable.

/// English and code noise words excluded from the index.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "if",
    "in", "into", "is", "it", "its", "not", "of", "on", "or", "that", "the", "then", "this", "to",
    "was", "we", "were", "which", "will", "with", "you",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Tokenize into lowercase alphanumeric terms. Underscores split identifiers
/// the same way whitespace splits prose.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            if !is_stop_word(&current) {
                tokens.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if !current.is_empty() && !is_stop_word(&current) {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stop_word_table_is_sorted() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }

    #[test]
    fn splits_identifiers_and_folds_case() {
        assert_eq!(
            tokenize("fn Compute_Factorial(n: u64)"),
            vec!["fn", "compute", "factorial", "n", "u64"]
        );
    }

    #[test]
    fn drops_stop_words() {
        assert_eq!(
            tokenize("the factorial of a number"),
            vec!["factorial", "number"]
        );
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \t\n").is_empty());
    }
}
