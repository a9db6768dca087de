//! Email address detection.

use super::Detector;
use regex::Regex;
use std::sync::LazyLock;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("email pattern should compile")
});

/// Detects email addresses.
#[derive(Debug, Clone, Default)]
pub struct EmailDetector;

impl EmailDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for EmailDetector {
    fn detect(&self, text: &str) -> Vec<String> {
        EMAIL_PATTERN
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    fn type_tag(&self) -> &str {
        "EMAIL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_detection() {
        let detector = EmailDetector::new();
        assert_eq!(detector.detect("test@example.com"), vec!["test@example.com"]);
        assert_eq!(
            detector.detect("write to user.name+tag@domain.co.uk today"),
            vec!["user.name+tag@domain.co.uk"]
        );
        assert!(detector.detect("not-an-email").is_empty());
        assert!(detector.detect("user@localhost").is_empty());
    }

    #[test]
    fn test_multiple_in_order() {
        let detector = EmailDetector::new();
        assert_eq!(
            detector.detect("b@x.io, a@y.org and b@x.io"),
            vec!["b@x.io", "a@y.org", "b@x.io"]
        );
    }
}
