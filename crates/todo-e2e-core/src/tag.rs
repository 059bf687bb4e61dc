//! Scope tags embedded in item text.
//!
//! The TODO service stores nothing but `{id, text}`, so ownership of an
//! item is recorded inside its text. A [`Label`] carries the worker
//! identity and test name verbatim plus a random nonce. In the
//! [`TagStyle::Structured`] form it also ends with a delimited key,
//!
//! ```text
//! TODO for chromium can add a new TODO entry 1a2b3c4d [[e2e chromium can%20add%20a%20new%20TODO%20entry 1a2b3c4d]]
//! ```
//!
//! which [`ScopedKey::parse`] recovers so that cleanup filters can compare
//! scopes exactly instead of by substring.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

const NONCE_LEN: usize = 8;
const NONCE_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const KEY_OPEN: &str = "[[e2e ";
const KEY_CLOSE: &str = "]]";

/// Owner of test-created items: one test running on one worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeTag {
    pub worker: String,
    pub test: String,
}

impl ScopeTag {
    #[must_use]
    pub fn new(worker: impl Into<String>, test: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            test: test.into(),
        }
    }
}

impl fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.worker, self.test)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagStyle {
    /// `"{prefix} {worker} {test} {nonce}"` only.
    Legacy,
    /// Legacy text followed by a parseable `[[e2e ...]]` key.
    #[default]
    Structured,
}

/// How a scoped filter decides that an item belongs to a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    /// Text contains the worker identity AND the test name.
    Contains,
    /// Text ends with a structured key naming exactly this scope.
    #[default]
    Exact,
}

/// A rendered item text owned by one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    scope: ScopeTag,
    nonce: String,
    text: String,
}

impl Label {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn scope(&self) -> &ScopeTag {
        &self.scope
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Produces labels for a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagger {
    style: TagStyle,
    prefix: String,
}

impl Default for Tagger {
    fn default() -> Self {
        Self::new(TagStyle::default(), "TODO for")
    }
}

impl Tagger {
    #[must_use]
    pub fn new(style: TagStyle, prefix: impl Into<String>) -> Self {
        Self {
            style,
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub const fn style(&self) -> TagStyle {
        self.style
    }

    /// Build a fresh label for `scope`. Only the nonce depends on `rng`.
    pub fn label<R: Rng + ?Sized>(&self, scope: &ScopeTag, rng: &mut R) -> Label {
        let nonce = random_nonce(rng);
        let mut text = format!("{} {} {} {}", self.prefix, scope.worker, scope.test, nonce);
        if self.style == TagStyle::Structured {
            let key = ScopedKey {
                worker: scope.worker.clone(),
                test: scope.test.clone(),
                nonce: nonce.clone(),
            };
            text.push(' ');
            text.push_str(&key.render());
        }

        Label {
            scope: scope.clone(),
            nonce,
            text,
        }
    }
}

/// Convenience label in the default style, seeded from the OS.
#[must_use]
pub fn make_label(worker: &str, test: &str) -> String {
    Tagger::default()
        .label(&ScopeTag::new(worker, test), &mut rand::thread_rng())
        .into_string()
}

/// Eight lowercase base36 characters.
pub fn random_nonce<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..NONCE_LEN)
        .map(|_| char::from(NONCE_ALPHABET[rng.gen_range(0..NONCE_ALPHABET.len())]))
        .collect()
}

/// The structured suffix of a [`TagStyle::Structured`] label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopedKey {
    pub worker: String,
    pub test: String,
    pub nonce: String,
}

impl ScopedKey {
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "{KEY_OPEN}{} {} {}{KEY_CLOSE}",
            escape(&self.worker),
            escape(&self.test),
            escape(&self.nonce)
        )
    }

    /// Recover the key from the end of an item text.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidTag`] when the text carries no key or
    /// the key is malformed.
    pub fn parse(text: &str) -> Result<Self, HarnessError> {
        let invalid = |reason| HarnessError::InvalidTag {
            input: text.to_string(),
            reason,
        };

        let body = text
            .strip_suffix(KEY_CLOSE)
            .ok_or_else(|| invalid("missing closing delimiter"))?;
        let start = body
            .rfind(KEY_OPEN)
            .ok_or_else(|| invalid("missing opening delimiter"))?;
        let inner = &body[start + KEY_OPEN.len()..];

        let mut fields = inner.split(' ');
        let (Some(worker), Some(test), Some(nonce), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(invalid("expected three fields"));
        };
        if worker.is_empty() || nonce.is_empty() {
            return Err(invalid("empty field"));
        }

        Ok(Self {
            worker: unescape(worker).ok_or_else(|| invalid("bad escape"))?,
            test: unescape(test).ok_or_else(|| invalid("bad escape"))?,
            nonce: unescape(nonce).ok_or_else(|| invalid("bad escape"))?,
        })
    }

    #[must_use]
    pub fn scope(&self) -> ScopeTag {
        ScopeTag::new(self.worker.clone(), self.test.clone())
    }
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for ch in field.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '[' => out.push_str("%5B"),
            ']' => out.push_str("%5D"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(field: &str) -> Option<String> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let hex: String = chars.by_ref().take(2).collect();
        let byte = u8::from_str_radix(&hex, 16).ok()?;
        if hex.len() != 2 || !byte.is_ascii() {
            return None;
        }
        out.push(char::from(byte));
    }
    Some(out)
}

/// Which items of the shared collection a cleanup or count applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    /// Every item regardless of owner. Only safe with a single worker.
    All,
    /// Items owned by one scope.
    Scoped { scope: ScopeTag, mode: MatchMode },
    /// Items whose text contains one exact label.
    Label(String),
}

impl ScopeFilter {
    #[must_use]
    pub const fn scoped(scope: ScopeTag, mode: MatchMode) -> Self {
        Self::Scoped { scope, mode }
    }

    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::All => true,
            Self::Scoped {
                scope,
                mode: MatchMode::Contains,
            } => text.contains(&scope.worker) && text.contains(&scope.test),
            Self::Scoped {
                scope,
                mode: MatchMode::Exact,
            } => ScopedKey::parse(text)
                .is_ok_and(|key| key.worker == scope.worker && key.test == scope.test),
            Self::Label(label) => text.contains(label.as_str()),
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::All => "all items".to_string(),
            Self::Scoped { scope, .. } => format!("items tagged for {scope}"),
            Self::Label(label) => format!("items labelled {label:?}"),
        }
    }
}
