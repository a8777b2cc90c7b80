//! Pattern library
//!
//! An ordered table of entity kinds and the rules that match them. The
//! built-in table is compiled once; callers hold it as a plain value, so a
//! reduced rule set can be swapped in anywhere a library is expected.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Kind of intelligence entity. Action-link templates key off these tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Phone,
    Email,
    Crypto,
    Url,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Phone,
        EntityKind::Email,
        EntityKind::Crypto,
        EntityKind::Url,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Phone => "phone",
            EntityKind::Email => "email",
            EntityKind::Crypto => "crypto",
            EntityKind::Url => "url",
        }
    }

    /// Human-readable label for the detail overlay
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Phone => "Phone number",
            EntityKind::Email => "Email address",
            EntityKind::Crypto => "Crypto address",
            EntityKind::Url => "URL",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "phone" => Ok(EntityKind::Phone),
            "email" => Ok(EntityKind::Email),
            "crypto" => Ok(EntityKind::Crypto),
            "url" => Ok(EntityKind::Url),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

lazy_static! {
    // International formats only: "+" or "00", then 8-33 digits/separators
    // starting and ending on a digit
    static ref PHONE_REGEX: Regex = Regex::new(
        r"(?:\+|\b00)\d[\d\s\-().]{6,31}\d"
    ).unwrap();

    static ref EMAIL_REGEX: Regex = Regex::new(
        r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b"
    ).unwrap();

    // EVM address, or legacy base58 Bitcoin address (no 0, O, I, l)
    static ref CRYPTO_REGEX: Regex = Regex::new(
        r"\b(?:0x[a-fA-F0-9]{40}|[13][a-km-zA-HJ-NP-Z1-9]{24,33})\b"
    ).unwrap();

    static ref URL_REGEX: Regex = Regex::new(
        r"(?i)\b(?:https?://)?(?:www\.)?(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z]{2,}(?:[/?#][a-z0-9\-._~:/?#\[\]@!$&'()*+,;=%]*)?"
    ).unwrap();
}

/// Predicate deciding whether a raw regex hit is kept
pub type MatchGuard = fn(text: &str, start: usize, end: usize) -> bool;

/// A single compiled rule
#[derive(Debug, Clone)]
pub struct MatchRule {
    kind: EntityKind,
    pattern: Regex,
    guard: Option<MatchGuard>,
}

impl MatchRule {
    pub fn new(kind: EntityKind, pattern: Regex) -> Self {
        Self {
            kind,
            pattern,
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: MatchGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// All accepted, non-overlapping hits as `(offset, value)`, left to right
    pub fn find_iter<'t>(&'t self, text: &'t str) -> impl Iterator<Item = (usize, &'t str)> + 't {
        self.pattern
            .find_iter(text)
            .filter(move |m| match self.guard {
                Some(guard) => guard(text, m.start(), m.end()),
                None => true,
            })
            .map(|m| (m.start(), m.as_str()))
    }
}

/// Rejects a host that is really one side of an email address
fn not_part_of_email(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    before != Some('@') && after != Some('@')
}

/// Ordered, immutable rule table
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    rules: Vec<MatchRule>,
}

impl PatternLibrary {
    /// phone, email, crypto, url, in that order
    pub fn builtin() -> Self {
        Self {
            rules: vec![
                MatchRule::new(EntityKind::Phone, PHONE_REGEX.clone()),
                MatchRule::new(EntityKind::Email, EMAIL_REGEX.clone()),
                MatchRule::new(EntityKind::Crypto, CRYPTO_REGEX.clone()),
                MatchRule::new(EntityKind::Url, URL_REGEX.clone()).with_guard(not_part_of_email),
            ],
        }
    }

    pub fn with_rules(rules: Vec<MatchRule>) -> Self {
        Self { rules }
    }

    /// Built-in rules restricted to the given kinds, order preserved
    pub fn only(kinds: &[EntityKind]) -> Self {
        let rules = Self::builtin()
            .rules
            .into_iter()
            .filter(|r| kinds.contains(&r.kind))
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}
