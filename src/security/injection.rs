//! SQL injection heuristics
//!
//! A first line of defense only. Storage code must still use parameterized
//! queries; false positives and misses are both expected.

use regex::RegexSet;
use serde_json::Value;
use std::collections::HashSet;

/// Heuristics in evaluation order. Any match flags the text.
pub const SQL_PATTERNS: &[&str] = &[
    // statement keyword followed by a terminator
    r"(?i)(SELECT|INSERT|UPDATE|DELETE|DROP|UNION|ALTER).*?;",
    // boolean tautology
    r"(?i)(\b(AND|OR)\b\s+\w+\s*=\s*\w+)",
    // comment markers
    r"(--|#|/\*|\*/)",
    // string escape then comment
    r"'.*?';\s*--",
    // database function calls
    r"(?i)\b(CONCAT|CHAR|ASCII)\b.*?\(",
];

/// Which part of the request a piece of text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestPart {
    Query,
    Path,
    Body,
}

impl RequestPart {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPart::Query => "query",
            RequestPart::Path => "path",
            RequestPart::Body => "body",
        }
    }
}

/// The screenable text of one request, one flattened string per part.
#[derive(Debug, Clone, Default)]
pub struct FlattenedRequestText {
    parts: Vec<(RequestPart, String)>,
}

impl FlattenedRequestText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, part: RequestPart, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.parts.push((part, text));
        }
    }

    /// Decoded `key=value` pairs of a raw query string.
    pub fn with_query(mut self, raw_query: &str, exempt_fields: &HashSet<String>) -> Self {
        let pairs = url::form_urlencoded::parse(raw_query.as_bytes())
            .filter(|(key, _)| !exempt_fields.contains(&**key))
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>();
        self.push(RequestPart::Query, pairs.join("&"));
        self
    }

    /// The percent-decoded request path.
    pub fn with_path(mut self, raw_path: &str) -> Self {
        let decoded = urlencoding::decode(raw_path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| raw_path.to_string());
        self.push(RequestPart::Path, decoded);
        self
    }

    /// JSON or form body flattened to `key=value` pairs.
    ///
    /// Other media types and unparseable JSON are left out; the handler's own
    /// extractor rejects the latter.
    pub fn with_body(
        mut self,
        content_type: Option<&str>,
        body: &[u8],
        exempt_fields: &HashSet<String>,
    ) -> Self {
        if body.is_empty() {
            return self;
        }
        let media_type = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase());

        match media_type.as_deref() {
            Some("application/x-www-form-urlencoded") => {
                let pairs = url::form_urlencoded::parse(body)
                    .filter(|(key, _)| !exempt_fields.contains(&**key))
                    .map(|(key, value)| format!("{}={}", key, value))
                    .collect::<Vec<_>>();
                self.push(RequestPart::Body, pairs.join("&"));
            }
            Some(ct) if ct == "application/json" || ct.ends_with("+json") => {
                if let Ok(value) = serde_json::from_slice::<Value>(body) {
                    let mut pairs = Vec::new();
                    flatten_json(None, &value, exempt_fields, &mut pairs);
                    self.push(RequestPart::Body, pairs.join("&"));
                }
            }
            _ => {}
        }
        self
    }

    pub fn parts(&self) -> impl Iterator<Item = (RequestPart, &str)> {
        self.parts.iter().map(|(part, text)| (*part, text.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

fn flatten_json(
    key: Option<&str>,
    value: &Value,
    exempt_fields: &HashSet<String>,
    out: &mut Vec<String>,
) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if exempt_fields.contains(k) {
                    continue;
                }
                flatten_json(Some(k.as_str()), v, exempt_fields, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten_json(key, item, exempt_fields, out);
            }
        }
        Value::String(s) => out.push(format!("{}={}", key.unwrap_or_default(), s)),
        Value::Null => {}
        other => out.push(format!("{}={}", key.unwrap_or_default(), other)),
    }
}

/// A positive screen result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub part: RequestPart,
    /// Index into [`SQL_PATTERNS`] of the first matching heuristic
    pub pattern: usize,
}

/// Pre-compiled SQL injection heuristics.
#[derive(Debug, Clone)]
pub struct InjectionScreen {
    patterns: RegexSet,
}

impl InjectionScreen {
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_patterns(SQL_PATTERNS)
    }

    pub fn with_patterns<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            patterns: RegexSet::new(patterns)?,
        })
    }

    pub fn is_suspicious(&self, text: &str) -> bool {
        self.patterns.is_match(text)
    }

    /// First part (in query, path, body order of insertion) that matches.
    pub fn scan(&self, text: &FlattenedRequestText) -> Option<Detection> {
        text.parts().find_map(|(part, value)| {
            self.patterns
                .matches(value)
                .iter()
                .next()
                .map(|pattern| Detection { part, pattern })
        })
    }
}
