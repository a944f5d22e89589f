//! `[param]` token expansion.
//!
//! Supported forms, where `k` is a bound parameter:
//! - `[k]` inserts the value verbatim
//! - `[k+N]` / `[k-N]` integer arithmetic
//! - `[k(i:j)]` character slice with half-open, negative-aware bounds
//!
//! Tokens naming unbound parameters are left as-is. Expansion is a single
//! left-to-right pass, so inserted text is never scanned again.

use super::{ParamValue, ParameterMap};
use crate::error::{LedgerError, Result};

/// Expands every token in `text` against `params`.
pub fn substitute(text: &str, params: &ParameterMap) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find(['[', ']']) {
            Some(close) if after[close..].starts_with(']') => {
                let inner = &after[..close];
                match expand_token(inner, params)? {
                    Some(replacement) => out.push_str(&replacement),
                    None => {
                        out.push('[');
                        out.push_str(inner);
                        out.push(']');
                    }
                }
                rest = &after[close + 1..];
            }
            // No closing bracket before the next opening one.
            _ => {
                out.push('[');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Expands one token body. The key is the longest bound name the body
/// starts with, so names may contain any character except brackets.
fn expand_token(inner: &str, params: &ParameterMap) -> Result<Option<String>> {
    let Some((key, value)) = params
        .iter()
        .filter(|(key, _)| !key.is_empty() && inner.starts_with(*key))
        .max_by_key(|(key, _)| key.len())
    else {
        return Ok(None);
    };
    let tail = &inner[key.len()..];

    match tail.chars().next() {
        None => Ok(Some(value.to_string())),
        Some('+') | Some('-') => apply_offset(key, value, tail).map(Some),
        Some('(') => apply_slice(key, value, tail).map(Some),
        Some('*') | Some('/') | Some('%') => Err(LedgerError::definition(format!(
            "Unsupported expression '[{inner}]': only + and - are allowed"
        ))),
        Some(_) => Ok(None),
    }
}

fn apply_offset(key: &str, value: &ParamValue, tail: &str) -> Result<String> {
    let (op, digits) = tail.split_at(1);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LedgerError::definition(format!(
            "Invalid arithmetic '[{key}{tail}]'"
        )));
    }

    let offset: i64 = digits.parse().map_err(|_| {
        LedgerError::definition(format!("Offset out of range in '[{key}{tail}]'"))
    })?;
    let base = value.as_int().ok_or_else(|| {
        LedgerError::definition(format!(
            "Parameter '{key}' is not numeric ('{value}') but is used in '[{key}{tail}]'"
        ))
    })?;

    let result = if op == "+" {
        base.checked_add(offset)
    } else {
        base.checked_sub(offset)
    };
    result
        .map(|v| v.to_string())
        .ok_or_else(|| LedgerError::definition(format!("Overflow in '[{key}{tail}]'")))
}

fn apply_slice(key: &str, value: &ParamValue, tail: &str) -> Result<String> {
    let invalid = || LedgerError::definition(format!("Invalid slice '[{key}{tail}]'"));

    let bounds = tail
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(invalid)?;
    let (start, end) = bounds.split_once(':').ok_or_else(invalid)?;
    let start = parse_bound(start).ok_or_else(invalid)?;
    let end = parse_bound(end).ok_or_else(invalid)?;

    Ok(slice_chars(&value.to_string(), start, end))
}

/// `""` means an open bound; anything else must be a signed integer.
fn parse_bound(raw: &str) -> Option<Option<i64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(None);
    }
    raw.parse().ok().map(Some)
}

fn slice_chars(s: &str, start: Option<i64>, end: Option<i64>) -> String {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let clamp = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len) };

    let from = start.map(clamp).unwrap_or(0);
    let to = end.map(clamp).unwrap_or(len);
    if from >= to {
        return String::new();
    }
    chars[from as usize..to as usize].iter().collect()
}
