//! Branch, tag and ref glob patterns.
//!
//! `*` matches any run of characters inside one `/`-separated segment,
//! `**` matches across segments and `?` matches a single non-`/` character.
//! Everything else is literal.

use crate::{Error, Result};
use regex::Regex;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(Error::InvalidPattern {
                pattern,
                reason: "pattern is empty".to_string(),
            });
        }

        let regex = Regex::new(&Self::translate(&pattern)).map_err(|e| Error::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self { pattern, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// True when any of the patterns matches `text`.
    pub fn any_matches(patterns: &[Glob], text: &str) -> bool {
        patterns.iter().any(|p| p.matches(text))
    }

    fn translate(pattern: &str) -> String {
        let mut out = String::with_capacity(pattern.len() * 2 + 2);
        out.push('^');

        let mut buf = [0u8; 4];
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str(".*");
                }
                '*' => out.push_str("[^/]*"),
                '?' => out.push_str("[^/]"),
                other => out.push_str(&regex::escape(other.encode_utf8(&mut buf))),
            }
        }

        out.push('$');
        out
    }
}

impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for Glob {}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl TryFrom<String> for Glob {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Glob::new(value)
    }
}

impl TryFrom<&str> for Glob {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Glob::new(value)
    }
}

impl From<Glob> for String {
    fn from(glob: Glob) -> Self {
        glob.pattern
    }
}

impl JsonSchema for Glob {
    fn schema_name() -> String {
        "Glob".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        String::json_schema(generator)
    }
}
