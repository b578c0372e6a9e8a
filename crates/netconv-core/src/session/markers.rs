//! Output markers recognised by the session protocol loop
//!
//! Devices signal "more output follows" and "command rejected" only through
//! text in the output stream. Which strings those are depends on the vendor,
//! so the markers are data: an ordered list of rules, first match wins.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// What a matched marker means to the protocol loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// Pagination prompt: send the pager-advance keystroke and keep reading
    Pager,
    /// Command rejected: abandon the remaining commands
    Error,
}

/// Textual pattern of a marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerPattern {
    /// Plain substring search
    Substring(String),
    /// Regular expression search
    Regex(String),
}

/// One entry of a marker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRule {
    pub kind: MarkerKind,
    pub pattern: MarkerPattern,
}

impl MarkerRule {
    pub fn substring(kind: MarkerKind, needle: impl Into<String>) -> Self {
        Self {
            kind,
            pattern: MarkerPattern::Substring(needle.into()),
        }
    }

    pub fn regex(kind: MarkerKind, expr: impl Into<String>) -> Self {
        Self {
            kind,
            pattern: MarkerPattern::Regex(expr.into()),
        }
    }

    /// IOS-style defaults: error marker checked before the pager prompt
    pub fn defaults() -> Vec<MarkerRule> {
        vec![
            MarkerRule::substring(MarkerKind::Error, "syntax error"),
            MarkerRule::substring(MarkerKind::Pager, "More"),
        ]
    }
}

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
enum Matcher {
    Substring(String),
    Regex(Regex),
    Predicate(Predicate),
}

impl Matcher {
    fn is_match(&self, chunk: &str) -> bool {
        match self {
            Matcher::Substring(needle) => chunk.contains(needle.as_str()),
            Matcher::Regex(re) => re.is_match(chunk),
            Matcher::Predicate(f) => f(chunk),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Substring(needle) => write!(f, "Substring({:?})", needle),
            Matcher::Regex(re) => write!(f, "Regex({:?})", re.as_str()),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Ordered list of compiled marker matchers
#[derive(Debug, Clone)]
pub struct MarkerSet {
    matchers: Vec<(MarkerKind, Matcher)>,
}

impl MarkerSet {
    /// Compile a rule list, keeping its order
    pub fn new(rules: &[MarkerRule]) -> Result<Self> {
        let mut matchers = Vec::with_capacity(rules.len());
        for rule in rules {
            let matcher = match &rule.pattern {
                MarkerPattern::Substring(needle) => {
                    if needle.is_empty() {
                        return Err(Error::config("Marker substring cannot be empty"));
                    }
                    Matcher::Substring(needle.clone())
                }
                MarkerPattern::Regex(expr) => Matcher::Regex(Regex::new(expr).map_err(|e| {
                    Error::config(format!("Invalid marker regex '{}': {}", expr, e))
                })?),
            };
            matchers.push((rule.kind, matcher));
        }
        Ok(Self { matchers })
    }

    /// A set that never matches
    pub fn empty() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    /// Append a custom predicate after the existing rules
    pub fn with_predicate<F>(mut self, kind: MarkerKind, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.matchers.push((kind, Matcher::Predicate(Arc::new(predicate))));
        self
    }

    /// Kind of the first rule matching `chunk`, if any
    pub fn classify(&self, chunk: &str) -> Option<MarkerKind> {
        self.matchers
            .iter()
            .find(|(_, matcher)| matcher.is_match(chunk))
            .map(|(kind, _)| *kind)
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl Default for MarkerSet {
    fn default() -> Self {
        // The built-in rules are non-empty substrings and always compile
        Self::new(&MarkerRule::defaults()).unwrap_or_else(|_| Self::empty())
    }
}
