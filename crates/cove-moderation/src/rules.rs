//! Built-in moderation rules.
//!
//! The banned-term list and spam patterns ship as defaults on
//! [`ModerationConfig`](crate::ModerationConfig); deployments override them
//! through server configuration. Patterns are compiled once at engine
//! construction.

use regex::Regex;

/// Default banned terms, matched case-insensitively as substrings.
///
/// The list mixes Korean and English profanity because the platform's
/// communities are bilingual. Every *occurrence* of a term counts as one
/// finding.
pub const DEFAULT_BANNED_TERMS: &[&str] = &[
    "시발",
    "씨발",
    "병신",
    "지랄",
    "개새끼",
    "fuck",
    "shit",
    "bitch",
    "asshole",
];

/// Severe subset used by the keystroke-level quick check.
///
/// Kept short on purpose: the quick check runs per typing event and trades
/// precision for latency.
pub const DEFAULT_SEVERE_TERMS: &[&str] = &["시발", "씨발", "fuck"];

/// A compiled spam-detection rule.
pub struct SpamRule {
    /// Finding label appended to the verdict when the rule matches.
    pub label: &'static str,
    pub pattern: Regex,
}

/// Builds a single case-insensitive alternation over the banned terms.
///
/// Returns `None` when the term list is empty (an empty alternation would
/// match the empty string at every position).
pub fn compile_banned_terms(terms: &[String]) -> Option<Regex> {
    if terms.is_empty() {
        return None;
    }
    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    match Regex::new(&format!("(?i){alternation}")) {
        Ok(re) => Some(re),
        Err(e) => {
            // Escaped terms should always compile; a failure here means a
            // pathological config value. Refusing to match is safer than
            // panicking inside the message path.
            tracing::error!("failed to compile banned-term pattern: {e}");
            None
        }
    }
}

/// Compiles the pattern-based spam rules.
///
/// The repeated-character-run rule is not here: the `regex` crate has no
/// backreferences, so runs are detected by a direct scan in the engine.
pub fn compile_spam_rules() -> Vec<SpamRule> {
    [
        (
            "spam:short_link",
            r"(?i)\b(?:bit\.ly|tinyurl\.com|goo\.gl|t\.co|is\.gd|ow\.ly)\b",
        ),
        (
            "spam:phone_number",
            r"\b\d{2,3}[-. ]?\d{3,4}[-. ]?\d{4}\b",
        ),
        (
            "spam:email",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        ),
        (
            "spam:financial",
            r"(?i)송금|계좌\s*이체|계좌\s*번호|입금\s*요청|western union|wire transfer|bank transfer|moneygram",
        ),
    ]
    .into_iter()
    .filter_map(|(label, pattern)| match Regex::new(pattern) {
        Ok(re) => Some(SpamRule { label, pattern: re }),
        Err(e) => {
            tracing::error!(label, "failed to compile spam pattern: {e}");
            None
        }
    })
    .collect()
}

/// Returns true if `text` contains a run of `len` or more identical
/// characters ("ㅋㅋㅋㅋㅋ", "!!!!!!").
pub fn has_repeated_run(text: &str, len: usize) -> bool {
    if len == 0 {
        return false;
    }
    let mut run = 0usize;
    let mut prev: Option<char> = None;
    for ch in text.chars() {
        if Some(ch) == prev {
            run += 1;
        } else {
            run = 1;
            prev = Some(ch);
        }
        if run >= len {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banned_pattern_matches_case_insensitive_occurrences() {
        let terms: Vec<String> = DEFAULT_BANNED_TERMS.iter().map(|s| s.to_string()).collect();
        let re = compile_banned_terms(&terms).expect("pattern should compile");

        assert_eq!(re.find_iter("시발 시발 시발").count(), 3);
        assert_eq!(re.find_iter("FUCK this").count(), 1);
        assert_eq!(re.find_iter("hello world").count(), 0);
    }

    #[test]
    fn empty_term_list_compiles_to_none() {
        assert!(compile_banned_terms(&[]).is_none());
    }

    #[test]
    fn repeated_run_detection() {
        assert!(has_repeated_run("ㅋㅋㅋㅋㅋ", 5));
        assert!(has_repeated_run("aaaaaa", 5));
        assert!(!has_repeated_run("ㅋㅋㅋㅋ", 5));
        assert!(!has_repeated_run("abcde", 5));
        assert!(!has_repeated_run("", 5));
    }

    #[test]
    fn spam_rules_match_expected_shapes() {
        let rules = compile_spam_rules();
        let find = |label: &str| {
            rules
                .iter()
                .find(|r| r.label == label)
                .unwrap_or_else(|| panic!("missing rule {label}"))
        };

        assert!(find("spam:short_link").pattern.is_match("visit bit.ly/x9z now"));
        assert!(find("spam:phone_number").pattern.is_match("call 010-1234-5678"));
        assert!(find("spam:email").pattern.is_match("reach me at win@prize.io"));
        assert!(find("spam:financial").pattern.is_match("wire transfer today"));
        assert!(find("spam:financial").pattern.is_match("계좌 이체 부탁"));

        for rule in &rules {
            assert!(
                !rule.pattern.is_match("normal hello world"),
                "{} should not match plain text",
                rule.label
            );
        }
    }
}
