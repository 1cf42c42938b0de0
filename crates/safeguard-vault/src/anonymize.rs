//! Text anonymization.
//!
//! Digits become `*` and every run of three or more ASCII letters becomes
//! `***`. Shorter letter runs, whitespace and punctuation pass through.

use std::sync::LazyLock;

use regex::Regex;

// Literal patterns; `patterns_compile` below forces both.
static DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]").expect("static pattern"));

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]{3,}").expect("static pattern"));

/// Character substituted for each digit.
pub const DIGIT_MASK: &str = "*";

/// Token substituted for each letter run of length three or more.
pub const WORD_MASK: &str = "***";

/// Mask digits and long letter runs in `text`.
pub fn anonymize(text: &str) -> String {
    let masked = DIGIT.replace_all(text, DIGIT_MASK);
    WORD.replace_all(&masked, WORD_MASK).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_compile() {
        LazyLock::force(&DIGIT);
        LazyLock::force(&WORD);
    }

    #[test]
    fn masks_digits_and_words() {
        assert_eq!(
            anonymize("John123 lives at 42 Main Street"),
            "****** *** at ** *** ***"
        );
    }

    #[test]
    fn short_runs_survive() {
        assert_eq!(anonymize("Al is ok"), "Al is ok");
    }

    #[test]
    fn punctuation_and_non_ascii_untouched() {
        assert_eq!(anonymize("café, 7!"), "***é, *!");
    }

    #[test]
    fn empty_input() {
        assert_eq!(anonymize(""), "");
    }

    #[test]
    fn deterministic() {
        let input = "Order 9981 for Alice";
        assert_eq!(anonymize(input), anonymize(input));
    }
}
