//! Phone number detection with numbering plan validation.
//!
//! Each region contributes a candidate pattern. Candidates are then checked
//! against the region's numbering plan (length, leading digits, reserved
//! codes) so that order numbers and other digit runs are not reported.

use super::{digits_of, is_isolated, Detector};
use crate::errors::CloakError;
use regex::Regex;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::LazyLock;

static NANP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?1[ .-]?)?(?:\([0-9]{3}\)|[0-9]{3})[ .-]?[0-9]{3}[ .-]?[0-9]{4}")
        .expect("NANP pattern should compile")
});

static GB_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+44 ?(?:\(0\) ?)?|0)[0-9]{2,4}[ .-]?[0-9]{3,4}[ .-]?[0-9]{3,4}")
        .expect("GB pattern should compile")
});

static NL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+31 ?(?:\(0\) ?)?|0)[0-9]{1,3}[ .-]?[0-9]{3,4}[ .-]?[0-9]{2,4}")
        .expect("NL pattern should compile")
});

static DE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+49 ?(?:\(0\) ?)?|0)[0-9]{2,5}[ /.-]?[0-9]{3,8}(?:[ .-]?[0-9]{1,4})?")
        .expect("DE pattern should compile")
});

static INTL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+[1-9](?:[ .-]?[0-9]){7,14}").expect("international pattern should compile")
});

/// Numbering region used to validate phone candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhoneRegion {
    /// North American Numbering Plan (US, CA and neighbours).
    NorthAmerica,
    UnitedKingdom,
    Netherlands,
    Germany,
    /// Any `+`-prefixed E.164 number.
    International,
}

impl PhoneRegion {
    fn pattern(&self) -> &'static Regex {
        match self {
            Self::NorthAmerica => &NANP_PATTERN,
            Self::UnitedKingdom => &GB_PATTERN,
            Self::Netherlands => &NL_PATTERN,
            Self::Germany => &DE_PATTERN,
            Self::International => &INTL_PATTERN,
        }
    }

    /// Country calling code for the region, if it has exactly one.
    fn calling_code(&self) -> Option<&'static [u32]> {
        match self {
            Self::NorthAmerica => Some(&[1]),
            Self::UnitedKingdom => Some(&[4, 4]),
            Self::Netherlands => Some(&[3, 1]),
            Self::Germany => Some(&[4, 9]),
            Self::International => None,
        }
    }

    /// Check a candidate against the region's numbering plan.
    pub fn is_valid(&self, candidate: &str) -> bool {
        let digits = digits_of(candidate);
        if digits.iter().all(|&d| Some(&d) == digits.first()) {
            return false;
        }

        if *self == Self::International {
            return (8..=15).contains(&digits.len()) && digits[0] != 0;
        }

        let national = self.national_digits(candidate, &digits);
        match self {
            Self::NorthAmerica => {
                national.len() == 10
                    && national[0] >= 2
                    && !is_service_code(&national[0..3])
                    && !is_service_code(&national[3..6])
            }
            Self::UnitedKingdom => {
                national.len() == 10 && matches!(national[0], 1 | 2 | 3 | 7 | 8)
            }
            Self::Netherlands => national.len() == 9 && national[0] != 0,
            Self::Germany => (7..=11).contains(&national.len()) && national[0] != 0,
            Self::International => false,
        }
    }

    /// Digits after stripping the country code or trunk prefix.
    fn national_digits<'a>(&self, candidate: &str, digits: &'a [u32]) -> &'a [u32] {
        let Some(code) = self.calling_code() else {
            return digits;
        };

        if candidate.trim_start().starts_with('+') {
            let rest = digits.strip_prefix(code).unwrap_or(digits);
            // "+44 (0)20 ..." carries the trunk zero in parentheses
            if candidate.contains("(0)") {
                return rest.strip_prefix(&[0]).unwrap_or(rest);
            }
            return rest;
        }

        match self {
            Self::NorthAmerica if digits.len() == 11 => digits.strip_prefix(code).unwrap_or(digits),
            Self::NorthAmerica => digits,
            _ => digits.strip_prefix(&[0]).unwrap_or(digits),
        }
    }
}

/// N11 codes (211, 411, 911, ...) are reserved for services.
fn is_service_code(code: &[u32]) -> bool {
    code.len() == 3 && code[1] == 1 && code[2] == 1
}

impl FromStr for PhoneRegion {
    type Err = CloakError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" | "CA" | "NANP" => Ok(Self::NorthAmerica),
            "GB" | "UK" => Ok(Self::UnitedKingdom),
            "NL" => Ok(Self::Netherlands),
            "DE" => Ok(Self::Germany),
            "INTL" | "E164" => Ok(Self::International),
            other => Err(CloakError::UnsupportedRegion(other.to_string())),
        }
    }
}

impl fmt::Display for PhoneRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::NorthAmerica => "US",
            Self::UnitedKingdom => "GB",
            Self::Netherlands => "NL",
            Self::Germany => "DE",
            Self::International => "INTL",
        };
        f.write_str(code)
    }
}

/// Detects phone numbers valid in at least one configured region.
#[derive(Debug, Clone)]
pub struct PhoneDetector {
    regions: Vec<PhoneRegion>,
}

impl PhoneDetector {
    pub fn new(regions: Vec<PhoneRegion>) -> Self {
        Self { regions }
    }

    pub fn regions(&self) -> &[PhoneRegion] {
        &self.regions
    }
}

impl Detector for PhoneDetector {
    fn detect(&self, text: &str) -> Vec<String> {
        let mut spans: Vec<Range<usize>> = Vec::new();
        for region in &self.regions {
            for m in region.pattern().find_iter(text) {
                let range = m.range();
                if is_isolated(text, &range) && region.is_valid(m.as_str()) {
                    spans.push(range);
                }
            }
        }

        // Regions may report overlapping candidates; keep the earliest, longest
        spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        let mut kept: Vec<Range<usize>> = Vec::with_capacity(spans.len());
        for span in spans {
            if kept.last().is_some_and(|last| span.start < last.end) {
                continue;
            }
            kept.push(span);
        }

        kept.into_iter().map(|r| text[r].to_string()).collect()
    }

    fn type_tag(&self) -> &str {
        "PHONE"
    }
}
