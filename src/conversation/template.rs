//! Placeholder substitution.
//!
//! Text is split on boundary characters (whitespace and common punctuation)
//! with the delimiters kept; a token is replaced only when it equals a
//! registered key exactly. Braces and underscores are not boundaries, so the
//! key `{x}` never touches `{xy}` or `{x}_suffix`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\s.,;:!?()\[\]"'<>/\\]+"#).expect("valid boundary pattern"));

/// Registered placeholder keys and their replacements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders {
    values: HashMap<String, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn extend<K, V>(&mut self, entries: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in entries {
            self.insert(k, v);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Replace every token that exactly equals a registered key.
    pub fn apply(&self, text: &str) -> String {
        if self.values.is_empty() || text.is_empty() {
            return text.to_string();
        }
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for m in BOUNDARY.find_iter(text) {
            self.push_token(&mut out, &text[last..m.start()]);
            out.push_str(m.as_str());
            last = m.end();
        }
        self.push_token(&mut out, &text[last..]);
        out
    }

    fn push_token(&self, out: &mut String, token: &str) {
        match self.values.get(token) {
            Some(value) if !token.is_empty() => out.push_str(value),
            _ => out.push_str(token),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Placeholders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut p = Placeholders::new();
        p.extend(iter);
        p
    }
}
