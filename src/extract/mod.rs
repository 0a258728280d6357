//! Path-based variable extraction from schema-less JSON payloads.
//!
//! Paths are dot separated (`data.temp`) with `name[idx]` sugar for array
//! indexing (`sensors[0].value`). Bracket indices are normalized to dot
//! segments before resolution, so `sensors[0].value` and `sensors.0.value`
//! are the same path.

use serde_json::{Map, Value};

/// Largest index `build_nested` will materialize as an array slot. Larger
/// indices are written as numeric-string object keys instead, which `extract`
/// resolves through its property-lookup fallback.
const MAX_ARRAY_INDEX: usize = 4096;

/// Deepest path `build_nested` will materialize and `is_valid_path` accepts
pub const MAX_PATH_DEPTH: usize = 32;

/// Split a path into its segments, normalizing `name[idx]` to `name.idx`.
///
/// Empty segments (leading, trailing or doubled dots) are dropped.
pub fn split_path(path: &str) -> Vec<String> {
    normalize(path)
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rewrite every `[digits]` group as `.digits`. Brackets holding anything
/// else are left untouched and become part of the segment name.
fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 4);
    let mut rest = path;

    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();

        if digits > 0 && after.as_bytes().get(digits) == Some(&b']') {
            out.push('.');
            out.push_str(&after[..digits]);
            rest = &after[digits + 1..];
        } else {
            out.push('[');
            rest = after;
        }
    }

    out.push_str(rest);
    out
}

/// Resolve `path` against `payload`.
///
/// Returns `None` when the path is empty, when any intermediate step is
/// `null` or missing, or when a segment cannot apply to the current value.
/// A numeric segment against an object falls through to a property lookup
/// by that numeric string.
pub fn extract<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = split_path(path);
    if segments.is_empty() {
        return None;
    }

    let mut current = payload;
    for segment in &segments {
        current = match current {
            Value::Object(map) => map.get(segment.as_str())?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Resolve `path` and coerce the result to a finite `f64`.
///
/// Strings, booleans and non-finite numbers yield `None`.
pub fn extract_number(payload: &Value, path: &str) -> Option<f64> {
    extract(payload, path)
        .and_then(Value::as_f64)
        .filter(|value| value.is_finite())
}

/// Build the minimal nested value that places `value` at `path`.
///
/// The root is always an object. Below the root, a numeric segment is
/// materialized as an array slot (padded with `null`), anything else as an
/// object key. An empty path returns `value` unchanged.
///
/// Returns `None` for paths deeper than [`MAX_PATH_DEPTH`] segments.
/// Otherwise `extract(&build_nested(path, v.clone())?, path) == Some(&v)`
/// holds for every non-empty path.
pub fn build_nested(path: &str, value: Value) -> Option<Value> {
    let segments = split_path(path);
    if segments.is_empty() {
        return Some(value);
    }
    if segments.len() > MAX_PATH_DEPTH {
        return None;
    }

    let mut inner = value;
    for (depth, segment) in segments.iter().enumerate().rev() {
        inner = match array_index(segment) {
            Some(index) if depth > 0 => {
                let mut items = vec![Value::Null; index + 1];
                items[index] = inner;
                Value::Array(items)
            }
            _ => {
                let mut map = Map::new();
                map.insert(segment.clone(), inner);
                Value::Object(map)
            }
        };
    }

    Some(inner)
}

fn array_index(segment: &str) -> Option<usize> {
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment
        .parse::<usize>()
        .ok()
        .filter(|index| *index <= MAX_ARRAY_INDEX)
}

/// Check that `path` follows the variable grammar:
/// `ident ( '.' ident | '[' digits ']' )*` with `ident = [A-Za-z_$][A-Za-z0-9_$]*`.
///
/// Paths with more than [`MAX_PATH_DEPTH`] segments are rejected. This only
/// validates shape; it says nothing about whether the path exists in any
/// payload.
pub fn is_valid_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    let mut pos = match take_ident(bytes, 0) {
        Some(end) => end,
        None => return false,
    };

    let mut depth = 1;
    while pos < bytes.len() {
        depth += 1;
        if depth > MAX_PATH_DEPTH {
            return false;
        }
        match bytes[pos] {
            b'.' => match take_ident(bytes, pos + 1) {
                Some(end) => pos = end,
                None => return false,
            },
            b'[' => {
                let digits = bytes[pos + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                if digits == 0 || bytes.get(pos + 1 + digits) != Some(&b']') {
                    return false;
                }
                pos += digits + 2;
            }
            _ => return false,
        }
    }

    true
}

fn take_ident(bytes: &[u8], start: usize) -> Option<usize> {
    let first = *bytes.get(start)?;
    if !(first.is_ascii_alphabetic() || first == b'_' || first == b'$') {
        return None;
    }
    let len = bytes[start + 1..]
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_' || **b == b'$')
        .count();
    Some(start + 1 + len)
}
