//! National identification number detection (US SSN layout).

use super::{is_isolated, Detector};
use regex::Regex;
use std::sync::LazyLock;

static SSN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]{3})-([0-9]{2})-([0-9]{4})").expect("SSN pattern should compile")
});

/// Detects `AAA-GG-SSSS` numbers with a structurally valid area, group and
/// serial.
#[derive(Debug, Clone, Default)]
pub struct NationalIdDetector;

impl NationalIdDetector {
    pub fn new() -> Self {
        Self
    }
}

/// Area 000, 666 and 900-999 are never issued; group 00 and serial 0000
/// are invalid.
fn is_issuable(area: &str, group: &str, serial: &str) -> bool {
    area != "000" && area != "666" && !area.starts_with('9') && group != "00" && serial != "0000"
}

impl Detector for NationalIdDetector {
    fn detect(&self, text: &str) -> Vec<String> {
        SSN_PATTERN
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                if !is_isolated(text, &whole.range()) {
                    return None;
                }
                is_issuable(&caps[1], &caps[2], &caps[3]).then(|| whole.as_str().to_string())
            })
            .collect()
    }

    fn type_tag(&self) -> &str {
        "SSN"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssn_detection() {
        let detector = NationalIdDetector::new();
        assert_eq!(detector.detect("SSN: 123-45-6789."), vec!["123-45-6789"]);
        assert!(detector.detect("12-345-6789").is_empty());
        assert!(detector.detect("1123-45-67890").is_empty());
    }

    #[test]
    fn test_rejects_unissued_numbers() {
        let detector = NationalIdDetector::new();
        assert!(detector.detect("000-12-3456").is_empty());
        assert!(detector.detect("666-12-3456").is_empty());
        assert!(detector.detect("912-12-3456").is_empty());
        assert!(detector.detect("123-00-3456").is_empty());
        assert!(detector.detect("123-45-0000").is_empty());
    }
}
