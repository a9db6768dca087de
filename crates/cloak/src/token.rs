//! Placeholder token grammar and per-call token minting.
//!
//! Tokens have the shape `{{TYPE_sessionId_sequence}}`:
//!
//! - `TYPE` is the detector's tag, uppercase letters and digits, optionally
//!   split into words by `_` (`EMAIL`, `CREDIT_CARD`)
//! - `sessionId` is a random 128-bit id in lowercase hex, shared by every
//!   token minted in one masking call
//! - `sequence` is a positive decimal integer, unique per distinct value
//!   within that call
//!
//! Because the last two fields never contain `_`, the type is always
//! everything between `{{` and the second-to-last separator.

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Opening token delimiter.
pub const TOKEN_OPEN: &str = "{{";
/// Closing token delimiter.
pub const TOKEN_CLOSE: &str = "}}";
/// Separator between token fields.
pub const TOKEN_SEPARATOR: char = '_';

/// Length of generated session identifiers (a full v4 UUID in hex).
const SESSION_ID_LEN: usize = 32;

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([A-Z0-9]+(?:_[A-Z0-9]+)*)_([A-Za-z0-9]+)_([1-9][0-9]*)\}\}")
        .expect("token pattern should compile")
});

static TYPE_TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z0-9]+(?:_[A-Z0-9]+)*$").expect("type tag pattern should compile")
});

/// Check whether a detector type tag can be embedded in a token.
pub fn is_valid_type_tag(tag: &str) -> bool {
    TYPE_TAG_PATTERN.is_match(tag)
}

/// The regex matching any well-formed token.
pub fn token_pattern() -> &'static Regex {
    &TOKEN_PATTERN
}

/// Distinct token strings in `text`, in order of first appearance.
pub fn find_tokens(text: &str) -> Vec<&str> {
    let mut seen = Vec::new();
    for m in TOKEN_PATTERN.find_iter(text) {
        let token = m.as_str();
        if !seen.contains(&token) {
            seen.push(token);
        }
    }
    seen
}

/// Parsed fields of a placeholder token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenParts {
    pub type_tag: String,
    pub session_id: String,
    pub sequence: u64,
}

impl TokenParts {
    /// Parse a complete token string. Returns `None` if it is not exactly
    /// one well-formed token.
    pub fn parse(token: &str) -> Option<Self> {
        let caps = TOKEN_PATTERN.captures(token)?;
        let whole = caps.get(0)?;
        if whole.start() != 0 || whole.end() != token.len() {
            return None;
        }
        Some(Self {
            type_tag: caps[1].to_string(),
            session_id: caps[2].to_string(),
            sequence: caps[3].parse().ok()?,
        })
    }
}

impl fmt::Display for TokenParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{TOKEN_OPEN}{}{TOKEN_SEPARATOR}{}{TOKEN_SEPARATOR}{}{TOKEN_CLOSE}",
            self.type_tag, self.session_id, self.sequence
        )
    }
}

/// Token generator scoped to a single masking call.
///
/// Holds the random session id and the sequence counter. A fresh session is
/// created for every call, so concurrent calls never share either.
#[derive(Debug)]
pub struct MaskSession {
    session_id: String,
    last_sequence: u64,
    minted: HashMap<String, String>,
}

impl MaskSession {
    /// Start a session with a random identifier.
    pub fn new() -> Self {
        Self::with_session_id(&uuid::Uuid::new_v4().simple().to_string())
    }

    /// Start a session with a fixed identifier.
    pub(crate) fn with_session_id(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            last_sequence: 0,
            minted: HashMap::new(),
        }
    }

    /// The identifier embedded in every token of this session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Mint the next token for `type_tag`, advancing the sequence.
    pub fn next(&mut self, type_tag: &str) -> String {
        self.last_sequence += 1;
        TokenParts {
            type_tag: type_tag.to_string(),
            session_id: self.session_id.clone(),
            sequence: self.last_sequence,
        }
        .to_string()
    }

    /// Token for `value`, minting one on first sight.
    ///
    /// Returns the token and whether it was newly minted. A value keeps the
    /// type tag of the first detector that claimed it.
    pub fn token_for(&mut self, type_tag: &str, value: &str) -> (String, bool) {
        if let Some(token) = self.minted.get(value) {
            return (token.clone(), false);
        }
        let token = self.next(type_tag);
        self.minted.insert(value.to_string(), token.clone());
        (token, true)
    }

    /// Number of distinct values tokenized so far.
    pub fn len(&self) -> usize {
        self.minted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.minted.is_empty()
    }
}

impl Default for MaskSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_full_width_and_random() {
        let a = MaskSession::new();
        assert_eq!(a.session_id().len(), SESSION_ID_LEN);
        assert!(a
            .session_id()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let ids: std::collections::HashSet<String> = (0..300_000)
            .map(|_| MaskSession::new().session_id().to_string())
            .collect();
        assert_eq!(ids.len(), 300_000);
    }

    #[test]
    fn test_sequence_increments() {
        let mut session = MaskSession::with_session_id("ab12cd");
        assert_eq!(session.next("EMAIL"), "{{EMAIL_ab12cd_1}}");
        assert_eq!(session.next("PHONE"), "{{PHONE_ab12cd_2}}");
    }

    #[test]
    fn test_token_for_dedupes_by_value() {
        let mut session = MaskSession::with_session_id("s1");
        let (first, fresh) = session.token_for("EMAIL", "a@b.co");
        assert!(fresh);
        let (again, fresh) = session.token_for("OTHER", "a@b.co");
        assert!(!fresh);
        assert_eq!(first, again);
        let (second, _) = session.token_for("EMAIL", "c@d.co");
        assert_eq!(second, "{{EMAIL_s1_2}}");
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_parse_token() {
        let parts = TokenParts::parse("{{CREDIT_CARD_x9y8z7_12}}").unwrap();
        assert_eq!(parts.type_tag, "CREDIT_CARD");
        assert_eq!(parts.session_id, "x9y8z7");
        assert_eq!(parts.sequence, 12);
        assert_eq!(parts.to_string(), "{{CREDIT_CARD_x9y8z7_12}}");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TokenParts::parse("{{EMAIL_abc}}").is_none());
        assert!(TokenParts::parse("{{email_abc_1}}").is_none());
        assert!(TokenParts::parse("{{EMAIL_abc_0}}").is_none());
        assert!(TokenParts::parse("x{{EMAIL_abc_1}}").is_none());
        assert!(TokenParts::parse("{EMAIL_abc_1}").is_none());
    }

    #[test]
    fn test_find_tokens_distinct_in_order() {
        let text = "{{PHONE_s_2}} then {{EMAIL_s_1}} and {{PHONE_s_2}} again";
        assert_eq!(find_tokens(text), vec!["{{PHONE_s_2}}", "{{EMAIL_s_1}}"]);
        assert!(find_tokens("no tokens {{here}}").is_empty());
    }

    #[test]
    fn test_type_tag_validation() {
        assert!(is_valid_type_tag("EMAIL"));
        assert!(is_valid_type_tag("CREDIT_CARD"));
        assert!(is_valid_type_tag("IPV4"));
        assert!(!is_valid_type_tag("email"));
        assert!(!is_valid_type_tag("_EMAIL"));
        assert!(!is_valid_type_tag("EMAIL_"));
        assert!(!is_valid_type_tag("A__B"));
        assert!(!is_valid_type_tag("A}}"));
        assert!(!is_valid_type_tag(""));
    }
}
