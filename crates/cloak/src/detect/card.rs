//! Payment card number detection.

use super::{digits_of, is_isolated, Detector};
use regex::Regex;
use std::sync::LazyLock;

/// 13-19 digits, optionally grouped with spaces or dashes.
static CARD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9](?:[ -]?[0-9]){12,18}").expect("card pattern should compile")
});

/// Detects card numbers with a known issuer prefix and a valid Luhn
/// checksum.
#[derive(Debug, Clone, Default)]
pub struct CreditCardDetector;

impl CreditCardDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for CreditCardDetector {
    fn detect(&self, text: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut pos = 0;

        while let Some(m) = CARD_PATTERN.find_at(text, pos) {
            if let Some(end) = longest_valid_card(text, m.start(), m.end()) {
                found.push(text[m.start()..end].to_string());
                pos = end;
                continue;
            }
            // Retry from the next digit group, so a card following another
            // number in the same run is still found
            pos = match text[m.start()..m.end()].find([' ', '-']) {
                Some(offset) => m.start() + offset + 1,
                None => m.end(),
            };
        }

        found
    }

    fn type_tag(&self) -> &str {
        "CREDIT_CARD"
    }
}

/// End of the longest valid card starting at `start` within `start..end`.
///
/// Candidates end either at `end` or just before a separator.
fn longest_valid_card(text: &str, start: usize, end: usize) -> Option<usize> {
    let mut ends: Vec<usize> = text[start..end]
        .match_indices([' ', '-'])
        .map(|(offset, _)| start + offset)
        .collect();
    ends.push(end);

    ends.into_iter().rev().find(|&candidate_end| {
        let range = start..candidate_end;
        let digits = digits_of(&text[range.clone()]);
        is_isolated(text, &range) && has_issuer_prefix(&digits) && luhn_check(&digits)
    })
}

/// Visa, Mastercard, American Express, Discover, JCB and Diners Club.
fn has_issuer_prefix(digits: &[u32]) -> bool {
    let prefix = |n: usize| digits.iter().take(n).fold(0u32, |acc, &d| acc * 10 + d);
    match digits.len() {
        13 | 16 | 19 if digits[0] == 4 => true,
        16 => {
            matches!(prefix(2), 51..=55 | 65 | 35)
                || matches!(prefix(4), 2221..=2720 | 6011)
                || matches!(prefix(3), 644..=649)
        }
        15 => matches!(prefix(2), 34 | 37),
        14 => matches!(prefix(2), 36 | 38 | 39) || matches!(prefix(3), 300..=305),
        _ => false,
    }
}

/// Luhn algorithm check for credit card validation.
fn luhn_check(digits: &[u32]) -> bool {
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}
