//! Prometheus-style label selector matchers
//!
//! Parses `name{label="value", other!="x"}` selectors into matcher triples
//! and formats matcher lists back into selector strings. A bare leading
//! metric name becomes an equality matcher on `__name__`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ModelError;
use crate::types::labels::{valid_label_name, METRIC_NAME_LABEL};

/// Metric names additionally allow colons, which is how profile-type IDs
/// appear in the metric position of a selector.
fn valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatcherOp {
    Eq,
    NotEq,
    Re,
    NotRe,
}

impl fmt::Display for MatcherOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatcherOp::Eq => "=",
            MatcherOp::NotEq => "!=",
            MatcherOp::Re => "=~",
            MatcherOp::NotRe => "!~",
        };
        f.write_str(s)
    }
}

/// One `(name, op, value)` matcher triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matcher {
    pub name: String,
    pub op: MatcherOp,
    pub value: String,
}

impl Matcher {
    pub fn eq(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatcherOp::Eq,
            value: value.into(),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

/// Formats matchers back into a `{...}` selector string.
pub fn matchers_to_string(matchers: &[Matcher]) -> String {
    let mut out = String::from("{");
    for (i, m) in matchers.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&m.to_string());
    }
    out.push('}');
    out
}

/// Parses a selector into matcher triples.
///
/// Accepted forms: `name`, `{m, ...}`, `name{m, ...}`, and the empty
/// selectors `""` and `"{}"`.
pub fn parse_selector(input: &str) -> Result<Vec<Matcher>, ModelError> {
    let fail = |reason: &str| ModelError::InvalidSelector {
        selector: input.to_string(),
        reason: reason.to_string(),
    };

    let s = input.trim();
    let mut matchers = Vec::new();

    let body = match s.find('{') {
        None => {
            if !s.is_empty() {
                if !valid_metric_name(s) {
                    return Err(fail("invalid metric name"));
                }
                matchers.push(Matcher::eq(METRIC_NAME_LABEL, s));
            }
            return Ok(matchers);
        }
        Some(open) => {
            let name = s[..open].trim();
            if !name.is_empty() {
                if !valid_metric_name(name) {
                    return Err(fail("invalid metric name"));
                }
                matchers.push(Matcher::eq(METRIC_NAME_LABEL, name));
            }
            let rest = &s[open + 1..];
            let close = rest.rfind('}').ok_or_else(|| fail("missing closing brace"))?;
            if !rest[close + 1..].trim().is_empty() {
                return Err(fail("trailing characters after closing brace"));
            }
            rest[..close].trim()
        }
    };

    let mut chars = body.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() || c == ',' {
            chars.next();
            continue;
        }

        // label name
        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let name = &body[start..end];
        if !valid_label_name(name) {
            return Err(fail("invalid label name"));
        }

        // operator
        while matches!(chars.peek(), Some(&(_, c)) if c.is_whitespace()) {
            chars.next();
        }
        let op = match chars.next() {
            Some((_, '=')) => {
                if matches!(chars.peek(), Some(&(_, '~'))) {
                    chars.next();
                    MatcherOp::Re
                } else {
                    MatcherOp::Eq
                }
            }
            Some((_, '!')) => match chars.next() {
                Some((_, '=')) => MatcherOp::NotEq,
                Some((_, '~')) => MatcherOp::NotRe,
                _ => return Err(fail("expected != or !~")),
            },
            _ => return Err(fail("expected matcher operator")),
        };

        // quoted value
        while matches!(chars.peek(), Some(&(_, c)) if c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            Some((_, '"')) => {}
            _ => return Err(fail("expected quoted value")),
        }
        let mut value = String::new();
        loop {
            match chars.next() {
                Some((_, '"')) => break,
                Some((_, '\\')) => match chars.next() {
                    Some((_, c)) => value.push(c),
                    None => return Err(fail("unterminated escape")),
                },
                Some((_, c)) => value.push(c),
                None => return Err(fail("unterminated value")),
            }
        }

        matchers.push(Matcher {
            name: name.to_string(),
            op,
            value,
        });
    }

    Ok(matchers)
}
