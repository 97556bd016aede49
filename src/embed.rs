//! Template merge primitive.
//!
//! # Placeholder Format
//!
//! A fragment is a JSON object; each member `name: value` defines a token.
//! In the target document:
//!
//! - A string whose whole content is `$name` or `${name}` is an embed point
//!   and is replaced by the token's JSON value, whatever its type. Objects
//!   and arrays are spliced in structurally.
//! - `${name}` inside a longer string is interpolated with the token's
//!   scalar text.
//! - `$${name}` is an escaped literal. It is never interpolated and renders
//!   as `${name}` once [`unescape_literals`] runs at the end of a merge.
//!
//! Tokens the fragment does not define are left for later fragments.
//! Substitution works on the parsed document, so the result is always valid
//! JSON and key order is preserved.
//!
//! # Example
//!
//! ```
//! use deckhand::embed::embed;
//!
//! # fn main() -> deckhand::Result<()> {
//! let base = r#"{"Image": "web:${tag}", "Env": "$env"}"#;
//! let merged = embed(base, r#"{"tag": "v2", "env": [{"Name": "MODE", "Value": "prod"}]}"#)?;
//!
//! let parsed: serde_json::Value = serde_json::from_str(&merged).unwrap();
//! assert_eq!(parsed["Image"], "web:v2");
//! assert_eq!(parsed["Env"][0]["Value"], "prod");
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

fn interpolation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(\$?)\{([A-Za-z_][A-Za-z0-9_.\-]*)\}")
            .expect("interpolation pattern is valid")
    })
}

/// Embed the tokens defined by `fragment` into `target`.
///
/// # Errors
///
/// Returns [`Error::Embed`] if:
/// - `target` is not valid JSON
/// - `fragment` is not a JSON object
/// - An object, array or null token is interpolated into a longer string
pub fn embed(target: &str, fragment: &str) -> Result<String> {
    let mut document: Value = serde_json::from_str(target)
        .map_err(|e| Error::embed("target document", format!("not valid JSON: {}", e)))?;
    let tokens = parse_tokens(fragment)?;

    substitute(&mut document, &tokens)?;

    serde_json::to_string_pretty(&document)
        .map_err(|e| Error::embed("merged document", e.to_string()))
}

/// Names of the embed points still present in `text`, sorted.
///
/// Both whole-string placeholders and `${name}` inside longer strings
/// count. Escaped `$${name}` does not, and neither does a bare `$name`
/// inside a longer string (e.g. the `repo:$tag` image form).
///
/// # Errors
///
/// Returns [`Error::Parse`] if `text` is not valid JSON.
pub fn unresolved_placeholders(text: &str) -> Result<Vec<String>> {
    let document: Value = serde_json::from_str(text).map_err(Error::Parse)?;
    let mut names = BTreeSet::new();
    collect_placeholders(&document, &mut names);
    Ok(names.into_iter().collect())
}

/// Turn every escaped `$${name}` back into literal `${name}`.
///
/// # Errors
///
/// Returns [`Error::Parse`] if `text` is not valid JSON.
pub fn unescape_literals(text: &str) -> Result<String> {
    let mut document: Value = serde_json::from_str(text).map_err(Error::Parse)?;
    unescape_value(&mut document);
    serde_json::to_string_pretty(&document).map_err(Error::Serialization)
}

/// Extract the token name from a whole-string placeholder.
///
/// Supports:
/// - `$KEY` -> `Some("KEY")`
/// - `${KEY}` -> `Some("KEY")`
/// - anything else -> `None`
pub fn placeholder_name(s: &str) -> Option<&str> {
    let name = if let Some(inner) = s.strip_prefix("${") {
        inner.strip_suffix('}')?
    } else {
        s.strip_prefix('$')?
    };
    is_token_name(name).then_some(name)
}

fn is_token_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn parse_tokens(fragment: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(fragment)
        .map_err(|e| Error::embed("fragment", format!("not valid JSON: {}", e)))?;
    match value {
        Value::Object(tokens) => Ok(tokens),
        other => Err(Error::embed(
            "fragment",
            format!("must be a JSON object, found {}", type_name(&other)),
        )),
    }
}

fn substitute(value: &mut Value, tokens: &Map<String, Value>) -> Result<()> {
    let replacement = match value {
        Value::String(s) => match placeholder_name(s).and_then(|name| tokens.get(name)) {
            Some(found) => Some(found.clone()),
            None if s.contains("${") => Some(Value::String(interpolate(s, tokens)?)),
            None => None,
        },
        Value::Array(items) => {
            for item in items {
                substitute(item, tokens)?;
            }
            None
        }
        Value::Object(members) => {
            for (_, member) in members.iter_mut() {
                substitute(member, tokens)?;
            }
            None
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => None,
    };

    if let Some(replacement) = replacement {
        *value = replacement;
    }
    Ok(())
}

fn interpolate(s: &str, tokens: &Map<String, Value>) -> Result<String> {
    let mut failure = None;

    let replaced = interpolation_pattern().replace_all(s, |caps: &Captures| {
        if !caps[1].is_empty() {
            return caps[0].to_string();
        }
        let name = &caps[2];
        match tokens.get(name) {
            None => caps[0].to_string(),
            Some(Value::String(text)) => text.clone(),
            Some(scalar @ (Value::Number(_) | Value::Bool(_))) => scalar.to_string(),
            Some(other) => {
                failure.get_or_insert_with(|| {
                    Error::embed(
                        format!("token '{}'", name),
                        format!(
                            "cannot interpolate {} into string \"{}\"",
                            type_name(other),
                            s
                        ),
                    )
                });
                caps[0].to_string()
            }
        }
    });

    match failure {
        Some(err) => Err(err),
        None => Ok(replaced.into_owned()),
    }
}

fn collect_placeholders(value: &Value, names: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => match placeholder_name(s) {
            Some(name) => {
                names.insert(name.to_string());
            }
            None => {
                for caps in interpolation_pattern().captures_iter(s) {
                    if caps[1].is_empty() {
                        names.insert(caps[2].to_string());
                    }
                }
            }
        },
        Value::Array(items) => items.iter().for_each(|item| collect_placeholders(item, names)),
        Value::Object(members) => members
            .values()
            .for_each(|member| collect_placeholders(member, names)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn unescape_value(value: &mut Value) {
    match value {
        Value::String(s) if s.contains("$${") => {
            let unescaped = interpolation_pattern()
                .replace_all(s, |caps: &Captures| {
                    if caps[1].is_empty() {
                        caps[0].to_string()
                    } else {
                        format!("${{{}}}", &caps[2])
                    }
                })
                .into_owned();
            *s = unescaped;
        }
        Value::Array(items) => items.iter_mut().for_each(unescape_value),
        Value::Object(members) => members.values_mut().for_each(unescape_value),
        _ => {}
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
