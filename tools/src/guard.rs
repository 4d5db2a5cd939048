//! Read-only, single-statement policy for caller-supplied SQL.
//!
//! This is a blocklist over normalized text, not a parser. Identifiers that
//! merely contain a blocked verb (`created_at`, `dropdown_count`) pass
//! because verbs are matched on word boundaries.

use regex::{Captures, Regex};
use serde::Serialize;
use std::sync::LazyLock;

pub const DISALLOWED_VERBS: [&str; 12] = [
    "insert", "update", "delete", "drop", "create", "alter", "truncate", "grant", "revoke", "merge",
    "copy", "call",
];

pub const DANGEROUS_TOKENS: [&str; 4] = ["load_file", "load_data", "outfile", "dumpfile"];

// Literals are matched so that comment markers inside them are left alone;
// comments are matched leftmost-first so `/* -- */` and `-- /*` both strip
// the construct the engine would actually see as a comment.
static LITERALS_AND_COMMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|`[^`]*`|--[^\n]*|(?s:/\*.*?\*/)"#)
        .expect("comment pattern is valid")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Verdict for one query. Produced fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryGuard {
    verbs: Vec<(String, Regex)>,
    tokens: Vec<String>,
}

impl Default for QueryGuard {
    fn default() -> Self {
        let guard = Self {
            verbs: Vec::new(),
            tokens: Vec::new(),
        };

        let guard = DISALLOWED_VERBS
            .iter()
            .fold(guard, |guard, verb| guard.with_disallowed_verb(verb));

        DANGEROUS_TOKENS
            .iter()
            .fold(guard, |guard, token| guard.with_dangerous_token(token))
    }
}

impl QueryGuard {
    /// Blocks `verb` wherever it appears as a whole word.
    #[must_use]
    pub fn with_disallowed_verb(mut self, verb: &str) -> Self {
        let verb = verb.to_lowercase();
        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(&verb)))
            .expect("escaped verb is a valid pattern");

        self.verbs.push((verb, pattern));
        self
    }

    /// Blocks `token` wherever it appears, even inside a longer word.
    #[must_use]
    pub fn with_dangerous_token(mut self, token: &str) -> Self {
        self.tokens.push(token.to_lowercase());
        self
    }

    #[must_use]
    pub fn validate(&self, raw_query: &str) -> ValidationResult {
        let normalized = normalize(raw_query);

        if let Some((verb, _)) = self
            .verbs
            .iter()
            .find(|(_, pattern)| pattern.is_match(&normalized))
        {
            return ValidationResult::rejected(format!(
                "{} operations are not allowed",
                verb.to_uppercase()
            ));
        }

        if let Some(token) = self
            .tokens
            .iter()
            .find(|token| normalized.contains(token.as_str()))
        {
            return ValidationResult::rejected(format!(
                "{} function is not allowed",
                token.to_uppercase()
            ));
        }

        if normalized.contains(';') {
            return ValidationResult::rejected("Multiple statements not allowed (found semicolon)");
        }

        ValidationResult::accepted()
    }
}

/// Lowercases, replaces `--` and `/* */` comments with a space, collapses
/// whitespace and trims.
#[must_use]
pub fn normalize(raw_query: &str) -> String {
    let lowered = raw_query.to_lowercase();

    let uncommented = LITERALS_AND_COMMENTS.replace_all(&lowered, |captures: &Captures<'_>| {
        let matched = &captures[0];
        if matched.starts_with("--") || matched.starts_with("/*") {
            " ".to_string()
        } else {
            matched.to_string()
        }
    });

    WHITESPACE.replace_all(&uncommented, " ").trim().to_string()
}
