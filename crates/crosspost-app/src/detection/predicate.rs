//! Login predicates and profile extraction over JSON and HTML responses

use regex::Regex;
use serde_json::Value;

use crosspost_core::{FieldSource, LoginPredicate, ProfileExtractor};

/// Look up a dotted path; numeric segments index into arrays
///
/// An empty path yields the root.
pub fn json_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Truthiness as the page scripts see it
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

/// Evaluate `predicate` against a parsed body and its raw text
pub fn evaluate(predicate: &LoginPredicate, json: &Value, body: &str) -> bool {
    match predicate {
        LoginPredicate::Truthy { path } => is_truthy(json_path(json, path)),
        LoginPredicate::Equals { path, value } => {
            json_path(json, path).is_some_and(|actual| loosely_equal(actual, value))
        }
        LoginPredicate::All { of } => of.iter().all(|p| evaluate(p, json, body)),
        LoginPredicate::Any { of } => of.iter().any(|p| evaluate(p, json, body)),
        LoginPredicate::Not { predicate } => !evaluate(predicate, json, body),
        LoginPredicate::BodyContains { needle } => body.contains(needle.as_str()),
    }
}

/// Extracted username and avatar, both optional
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub username: Option<String>,
    pub avatar: Option<String>,
}

pub fn extract_profile(extractor: &ProfileExtractor, json: &Value, body: &str) -> Profile {
    Profile {
        username: first_field(&extractor.username, json, body),
        avatar: first_field(&extractor.avatar, json, body).map(|a| normalize_url(&a)),
    }
}

fn first_field(sources: &[FieldSource], json: &Value, body: &str) -> Option<String> {
    sources.iter().find_map(|source| match source {
        FieldSource::Path { path } => json_path(json, path).and_then(scalar_string),
        FieldSource::Pattern { regex } => first_capture(std::slice::from_ref(regex), body),
    })
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty capture group 1 across `patterns`, unescaped
///
/// Patterns that fail to compile are skipped.
pub fn first_capture(patterns: &[String], text: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        let re = Regex::new(pattern).ok()?;
        let captured = re.captures(text)?.get(1)?.as_str();
        let decoded = unescape(captured);
        let trimmed = decoded.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// Whether any of `patterns` matches `text`
pub fn any_match(patterns: &[String], text: &str) -> bool {
    patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .any(|re| re.is_match(text))
}

/// Decode `\xHH`, `\uHHHH` and `\/` escapes left by inline scripts
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('/') => {
                chars.next();
                out.push('/');
            }
            Some(kind @ ('x' | 'u')) => {
                let width = if kind == 'x' { 2 } else { 4 };
                let digits: String = chars.clone().skip(1).take(width).collect();
                match (digits.len() == width)
                    .then(|| u32::from_str_radix(&digits, 16).ok())
                    .flatten()
                    .and_then(char::from_u32)
                {
                    Some(decoded) => {
                        for _ in 0..=width {
                            chars.next();
                        }
                        out.push(decoded);
                    }
                    None => out.push('\\'),
                }
            }
            _ => out.push('\\'),
        }
    }
    out
}

/// Give protocol-relative URLs an explicit `https:` scheme
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}
