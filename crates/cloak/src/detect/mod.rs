//! Sensitive value detectors.
//!
//! A detector scans text for one semantic kind of value and tags what it
//! finds. Built-in detectors cover email addresses, phone numbers, national
//! ID numbers and payment cards; callers add their own by implementing
//! [`Detector`] or by using [`pattern`] and [`from_fn`].

mod card;
mod email;
mod national_id;
mod pattern;
mod phone;

pub use card::CreditCardDetector;
pub use email::EmailDetector;
pub use national_id::NationalIdDetector;
pub use pattern::{FnDetector, PatternDetector};
pub use phone::{PhoneDetector, PhoneRegion};

use crate::errors::{CloakResult, DetectionError};
use std::ops::Range;
use std::sync::Arc;

/// Trait for locating sensitive substrings of one type.
pub trait Detector: Send + Sync {
    /// All non-overlapping matches in `text`, in order of appearance.
    ///
    /// Must not panic or fail; a detector that cannot evaluate the text
    /// returns an empty list.
    fn detect(&self, text: &str) -> Vec<String>;

    /// Stable uppercase tag embedded in tokens, e.g. `EMAIL`.
    fn type_tag(&self) -> &str;
}

/// A matched substring tagged with the detector that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitiveMatch {
    pub type_tag: String,
    pub value: String,
}

/// Run every detector over `text`, keeping the first claim on each
/// distinct value.
pub fn collect_matches(text: &str, detectors: &[Arc<dyn Detector>]) -> Vec<SensitiveMatch> {
    let mut matches: Vec<SensitiveMatch> = Vec::new();

    for detector in detectors {
        for value in detector.detect(text) {
            if value.is_empty() {
                continue;
            }
            if matches.iter().any(|m| m.value == value) {
                tracing::trace!(
                    type_tag = detector.type_tag(),
                    "Value already claimed by an earlier detector"
                );
                continue;
            }
            matches.push(SensitiveMatch {
                type_tag: detector.type_tag().to_string(),
                value,
            });
        }
    }

    // First-appearance order in the text, stable for ties
    matches.sort_by_key(|m| text.find(&m.value).unwrap_or(usize::MAX));
    matches
}

/// Every built-in detector with default settings.
pub fn all() -> Vec<Arc<dyn Detector>> {
    vec![
        Arc::new(email()),
        Arc::new(phone_default()),
        Arc::new(national_id()),
        Arc::new(credit_card()),
    ]
}

/// Email address detector.
pub fn email() -> EmailDetector {
    EmailDetector::new()
}

/// Phone detector validating against the given numbering regions.
pub fn phone(regions: &[&str]) -> CloakResult<PhoneDetector> {
    let regions = regions
        .iter()
        .map(|r| r.parse::<PhoneRegion>())
        .collect::<CloakResult<Vec<_>>>()?;
    Ok(PhoneDetector::new(regions))
}

/// Phone detector for the North American Numbering Plan.
pub fn phone_default() -> PhoneDetector {
    PhoneDetector::new(vec![PhoneRegion::NorthAmerica])
}

/// US social security number style detector.
pub fn national_id() -> NationalIdDetector {
    NationalIdDetector::new()
}

/// Payment card number detector.
pub fn credit_card() -> CreditCardDetector {
    CreditCardDetector::new()
}

/// Regex-backed custom detector.
pub fn pattern(type_tag: &str, regex: &str) -> CloakResult<PatternDetector> {
    PatternDetector::new(type_tag, regex)
}

/// Closure-backed custom detector. Errors from the closure yield no matches.
pub fn from_fn<F>(type_tag: &str, f: F) -> FnDetector<F>
where
    F: Fn(&str) -> Result<Vec<String>, DetectionError> + Send + Sync,
{
    FnDetector::new(type_tag, f)
}

/// True if the characters around `range` do not continue a word or number.
pub(crate) fn is_isolated(text: &str, range: &Range<usize>) -> bool {
    let before = text[..range.start].chars().next_back();
    let after = text[range.end..].chars().next();
    !before.is_some_and(|c| c.is_alphanumeric() || c == '+')
        && !after.is_some_and(|c| c.is_alphanumeric())
}

/// Digits of `value`, ignoring separators.
pub(crate) fn digits_of(value: &str) -> Vec<u32> {
    value.chars().filter_map(|c| c.to_digit(10)).collect()
}
