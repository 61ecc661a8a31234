//! Tokenizing and classifying frame bodies.
//!
//! A body is ASCII text split on whitespace. The first token is the verb
//! (`LOGIN`, `Room`, `SNAPSHOT`, …); the rest are positional arguments or
//! `key=value` pairs. Values contain no whitespace and no `=`. Replies
//! start with `OK` or `ERR`.

use std::collections::HashMap;

use crate::WireError;

/// Splits a body into its verb and the remainder.
///
/// Leading and trailing whitespace is tolerated; an empty body yields an
/// empty verb.
pub fn split_verb(body: &str) -> (&str, &str) {
    let body = body.trim_start();
    match body.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (body.trim_end(), ""),
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// The `key=value` pairs of one message.
///
/// Tokens without a `=` are skipped, mirroring the tolerant parsers on the
/// other side of every pipe.
#[derive(Debug, Default, Clone)]
pub struct Fields {
    map: HashMap<String, String>,
}

impl Fields {
    /// Parses every `key=value` token in `text`.
    pub fn parse(text: &str) -> Self {
        let mut map = HashMap::new();
        for token in text.split_whitespace() {
            if let Some((key, value)) = token.split_once('=') {
                map.insert(key.to_string(), value.to_string());
            }
        }
        Self { map }
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Returns the value for `key`, or `""` when absent.
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Returns the value for `key`, or a [`WireError::MissingField`].
    ///
    /// Empty values count as missing; the protocols never carry
    /// intentionally empty fields in requests.
    pub fn require(&self, key: &'static str) -> Result<&str, WireError> {
        match self.get(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(WireError::MissingField(key)),
        }
    }

    /// Parses the value for `key` as a non-negative integer.
    pub fn require_u64(&self, key: &'static str) -> Result<u64, WireError> {
        self.require(key)?
            .parse()
            .map_err(|_| WireError::MissingField(key))
    }

    /// Whether `key` is present at all.
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// A parsed `OK …` / `ERR …` reply body.
#[derive(Debug, Clone)]
pub struct Reply {
    raw: String,
}

impl Reply {
    /// Wraps a raw reply body.
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Whether the reply starts with `OK`.
    pub fn is_ok(&self) -> bool {
        self.raw == "OK" || self.raw.starts_with("OK ")
    }

    /// The text after the `OK`/`ERR` marker (may be empty).
    pub fn payload(&self) -> &str {
        match self.raw.split_once(char::is_whitespace) {
            Some((_, rest)) => rest.trim(),
            None => "",
        }
    }

    /// The `key=value` fields of an `OK` reply.
    ///
    /// Returns empty fields for `ERR` replies.
    pub fn fields(&self) -> Fields {
        if self.is_ok() {
            Fields::parse(self.payload())
        } else {
            Fields::default()
        }
    }

    /// The full reply body, for forwarding verbatim.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

// ---------------------------------------------------------------------------
// Redaction
// ---------------------------------------------------------------------------

/// Keys whose values are masked before a body reaches a log line.
const SECRET_KEYS: [&str; 3] = ["pass=", "password=", "token="];

/// Returns `body` with credential and token values replaced by `***`.
///
/// Positional secrets (`REGISTER u p` / `LOGIN u p`) are masked too.
pub fn redact(body: &str) -> String {
    let (verb, _) = split_verb(body);
    if verb == "REGISTER" || verb == "LOGIN" {
        let mut tokens: Vec<&str> = body.split_whitespace().collect();
        if tokens.len() >= 3 {
            tokens[2] = "***";
        }
        return tokens.join(" ");
    }

    body.split_whitespace()
        .map(|token| {
            for key in SECRET_KEYS {
                if let Some(rest) = token.strip_prefix(key) {
                    if !rest.is_empty() {
                        return format!("{key}***");
                    }
                }
            }
            token.to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// =========================================================================
// Tests
// =========================================================================
