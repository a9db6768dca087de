//! Caller-defined detectors.

use super::Detector;
use crate::errors::{CloakError, CloakResult, DetectionError};
use crate::token::is_valid_type_tag;
use regex::Regex;
use std::fmt;

/// Detector backed by a custom regular expression.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    type_tag: String,
    regex: Regex,
}

impl PatternDetector {
    /// Compile a detector. The tag must be usable inside a token.
    pub fn new(type_tag: &str, pattern: &str) -> CloakResult<Self> {
        if !is_valid_type_tag(type_tag) {
            return Err(CloakError::InvalidTypeTag(type_tag.to_string()));
        }
        let regex = Regex::new(pattern)
            .map_err(|e| CloakError::InvalidRegex(format!("{}: {}", type_tag, e)))?;
        Ok(Self {
            type_tag: type_tag.to_string(),
            regex,
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

impl Detector for PatternDetector {
    fn detect(&self, text: &str) -> Vec<String> {
        self.regex
            .find_iter(text)
            .filter(|m| !m.is_empty())
            .map(|m| m.as_str().to_string())
            .collect()
    }

    fn type_tag(&self) -> &str {
        &self.type_tag
    }
}

/// Detector backed by a closure.
///
/// A closure error is logged and treated as "no matches".
pub struct FnDetector<F> {
    type_tag: String,
    f: F,
}

impl<F> FnDetector<F>
where
    F: Fn(&str) -> Result<Vec<String>, DetectionError> + Send + Sync,
{
    pub fn new(type_tag: &str, f: F) -> Self {
        Self {
            type_tag: type_tag.to_string(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnDetector<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnDetector")
            .field("type_tag", &self.type_tag)
            .finish_non_exhaustive()
    }
}

impl<F> Detector for FnDetector<F>
where
    F: Fn(&str) -> Result<Vec<String>, DetectionError> + Send + Sync,
{
    fn detect(&self, text: &str) -> Vec<String> {
        match (self.f)(text) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    type_tag = %self.type_tag,
                    error = %e,
                    "Detector failed, treating as no matches"
                );
                Vec::new()
            }
        }
    }

    fn type_tag(&self) -> &str {
        &self.type_tag
    }
}
