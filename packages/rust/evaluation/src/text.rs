//! Text normalization primitives shared by the evaluation metrics.
//!
//! All functions are pure and order-stable: identical inputs always produce
//! identical outputs, which the engine's determinism guarantee depends on.

use std::collections::BTreeSet;

/// Tokenize a string: lowercase, punctuation to spaces, light suffix stemming.
pub fn tokenize(value: &str) -> BTreeSet<String> {
    let lowered = value.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
        .collect();

    stripped
        .split_whitespace()
        .map(normalize_token)
        .filter(|token| !token.is_empty())
        .collect()
}

/// Tokenize a slice of strings into one combined token set.
pub fn tokenize_all<S: AsRef<str>>(values: &[S]) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for value in values {
        tokens.extend(tokenize(value.as_ref()));
    }
    tokens
}

/// Light stemmer: strips common verb/plural suffixes with length guards so
/// short words ("ring", "red", "yes") survive intact.
fn normalize_token(token: &str) -> String {
    let token = token.trim();
    let len = token.chars().count();

    if let Some(stem) = token.strip_suffix("ing") {
        if len > 4 {
            return stem.to_string();
        }
    }
    if let Some(stem) = token.strip_suffix("ed") {
        if len > 3 {
            return stem.to_string();
        }
    }
    if let Some(stem) = token.strip_suffix("es") {
        if len > 4 {
            return stem.to_string();
        }
    }
    if let Some(stem) = token.strip_suffix("s") {
        if len > 3 {
            return stem.to_string();
        }
    }
    token.to_string()
}

/// Fraction of `needle` tokens present in `haystack`. Empty needles score 0.
pub fn overlap_ratio(needle: &BTreeSet<String>, haystack: &BTreeSet<String>) -> f64 {
    if needle.is_empty() {
        return 0.0;
    }
    let hits = needle.iter().filter(|token| haystack.contains(*token)).count();
    hits as f64 / needle.len() as f64
}

/// Approximate syllable count: vowel groups, with a trailing-e discount.
pub fn approx_syllables(word: &str) -> usize {
    const VOWELS: [char; 6] = ['a', 'e', 'i', 'o', 'u', 'y'];
    let word = word.to_lowercase();

    let mut count = 0;
    let mut prev_was_vowel = false;
    for c in word.chars() {
        let is_vowel = VOWELS.contains(&c);
        if is_vowel && !prev_was_vowel {
            count += 1;
        }
        prev_was_vowel = is_vowel;
    }

    if word.ends_with('e') && count > 1 {
        count -= 1;
    }
    count.max(1)
}

/// Round to three decimal places (score resolution on the wire).
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Round to two decimal places (readability grade resolution).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_punctuation_and_stems() {
        let tokens = tokenize("Building data-governance dashboards, quickly!");
        assert!(tokens.contains("build"));
        assert!(tokens.contains("data"));
        assert!(tokens.contains("governance"));
        assert!(tokens.contains("dashboard"));
        assert!(tokens.contains("quickly"));
    }

    #[test]
    fn short_words_survive_stemming() {
        let tokens = tokenize("ring red yes gas");
        assert!(tokens.contains("ring"));
        assert!(tokens.contains("red"));
        assert!(tokens.contains("yes"));
        assert!(tokens.contains("gas"));
    }

    #[test]
    fn overlap_ratio_bounds() {
        let needle = tokenize("snowflake airflow");
        let haystack = tokenize("airflow pipelines in production");
        let ratio = overlap_ratio(&needle, &haystack);
        assert_eq!(ratio, 0.5);

        assert_eq!(overlap_ratio(&BTreeSet::new(), &haystack), 0.0);
        assert_eq!(overlap_ratio(&needle, &needle), 1.0);
    }

    #[test]
    fn syllable_approximation() {
        assert_eq!(approx_syllables("data"), 2);
        assert_eq!(approx_syllables("pipeline"), 3);
        assert_eq!(approx_syllables("a"), 1);
        // Trailing-e discount applies only with more than one group.
        assert_eq!(approx_syllables("date"), 1);
        assert_eq!(approx_syllables("e"), 1);
    }

    #[test]
    fn rounding() {
        assert_eq!(round3(2.0 / 3.0), 0.667);
        assert_eq!(round2(9.10499), 9.1);
    }
}
