//! Key-addressable access to JSON payloads.
//!
//! Paths are dot separated (`a.b.c`). Numeric segments index into arrays,
//! the segment `-1` appends to an array (creating it when absent), and a
//! literal dot inside a key is written as `\.`. The empty path and `@this`
//! both address the whole payload.
//!
//! Reads never fail: a path that does not resolve yields a [`Value`] for
//! which [`Value::exists`] is false, which is distinct from a JSON `null`.
//! Writes operate on a parsed copy of the document and are only committed
//! by the caller once the whole write succeeded.

use crate::error::{Error, Result};
use serde_json::{Map, Value as Json};

/// Path segment that appends to the end of an array.
pub const APPEND: &str = "-1";

/// Alias for the empty (whole payload) path.
pub const THIS: &str = "@this";

/// The result of reading a path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Value(Option<Json>);

impl Value {
    #[must_use]
    pub fn missing() -> Self {
        Value(None)
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.0.is_some()
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.0, Some(Json::Null))
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.0, Some(Json::Array(_)))
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self.0, Some(Json::Object(_)))
    }

    #[must_use]
    pub fn json(&self) -> Option<&Json> {
        self.0.as_ref()
    }

    #[must_use]
    pub fn into_json(self) -> Option<Json> {
        self.0
    }

    /// Strings are returned unquoted, containers as compact JSON, and
    /// missing or null values as the empty string.
    #[must_use]
    pub fn string(&self) -> String {
        match &self.0 {
            None | Some(Json::Null) => String::new(),
            Some(Json::String(s)) => s.clone(),
            Some(Json::Bool(b)) => b.to_string(),
            Some(Json::Number(n)) => n.to_string(),
            Some(other) => other.to_string(),
        }
    }

    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.string().into_bytes()
    }

    #[must_use]
    pub fn int(&self) -> i64 {
        match &self.0 {
            Some(Json::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
                .unwrap_or_else(|| n.as_f64().unwrap_or_default() as i64),
            Some(Json::String(s)) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or_default(),
            Some(Json::Bool(b)) => i64::from(*b),
            _ => 0,
        }
    }

    #[must_use]
    pub fn float(&self) -> f64 {
        match &self.0 {
            Some(Json::Number(n)) => n.as_f64().unwrap_or_default(),
            Some(Json::String(s)) => s.trim().parse().unwrap_or_default(),
            Some(Json::Bool(b)) => f64::from(u8::from(*b)),
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn bool(&self) -> bool {
        match &self.0 {
            Some(Json::Bool(b)) => *b,
            Some(Json::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Json::String(s)) => matches!(s.trim(), "true" | "1" | "t" | "T" | "TRUE" | "True"),
            _ => false,
        }
    }

    /// Elements of an array. A scalar yields itself, a missing value nothing.
    #[must_use]
    pub fn array(&self) -> Vec<Value> {
        match &self.0 {
            None => Vec::new(),
            Some(Json::Array(items)) => items.iter().cloned().map(Value::from).collect(),
            Some(other) => vec![Value::from(other.clone())],
        }
    }
}

impl From<Json> for Value {
    fn from(v: Json) -> Self {
        Value(Some(v))
    }
}

impl From<Option<Json>> for Value {
    fn from(v: Option<Json>) -> Self {
        Value(v)
    }
}

/// Split a path into segments, honoring `\.` escapes.
#[must_use]
pub fn parse_path(path: &str) -> Vec<String> {
    let path = path.trim();
    if path.is_empty() || path == THIS {
        return Vec::new();
    }

    let mut segs = Vec::new();
    let mut cur = String::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                cur.push('.');
                chars.next();
            }
            '.' => segs.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    segs.push(cur);
    segs
}

/// Resolve `segs` against `root`.
#[must_use]
pub fn lookup(root: &Json, segs: &[String]) -> Value {
    let mut cur = root;
    for seg in segs {
        let next = match cur {
            Json::Object(map) => map.get(seg),
            Json::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => cur = v,
            None => return Value::missing(),
        }
    }
    Value::from(cur.clone())
}

/// Write `value` at `segs`, creating intermediate objects as needed.
///
/// Any scalar standing where a container is required is replaced by an
/// object, or by an array when the next segment is [`APPEND`]. A numeric
/// segment may address an existing element or the one just past the end.
///
/// # Errors
///
/// Returns [`Error::InvalidPath`] when `segs` is empty or an index lies
/// beyond the end of its array.
pub fn insert(root: &mut Json, segs: &[String], value: Json) -> Result<()> {
    let Some((head, rest)) = segs.split_first() else {
        return Err(Error::InvalidPath {
            path: String::new(),
            reason: "empty path".into(),
        });
    };

    if head == APPEND {
        if !root.is_array() {
            *root = Json::Array(Vec::new());
        }
        if let Json::Array(items) = root {
            if rest.is_empty() {
                items.push(value);
                return Ok(());
            }
            items.push(Json::Null);
            if let Some(last) = items.last_mut() {
                return insert(last, rest, value);
            }
        }
        return Ok(());
    }

    if let Json::Array(items) = root
        && let Ok(idx) = head.parse::<usize>()
    {
        if idx > items.len() {
            return Err(Error::InvalidPath {
                path: segs.join("."),
                reason: format!("index {idx} is past the end of an array of {}", items.len()),
            });
        }
        if idx == items.len() {
            items.push(Json::Null);
        }
        if rest.is_empty() {
            items[idx] = value;
            return Ok(());
        }
        return insert(&mut items[idx], rest, value);
    }

    if !root.is_object() {
        *root = Json::Object(Map::new());
    }
    if let Json::Object(map) = root {
        if rest.is_empty() {
            map.insert(head.clone(), value);
        } else {
            let child = map.entry(head.clone()).or_insert(Json::Null);
            insert(child, rest, value)?;
        }
    }
    Ok(())
}

/// Remove the value at `segs`. Missing paths are not an error.
pub fn remove(root: &mut Json, segs: &[String]) {
    let Some((last, parents)) = segs.split_last() else {
        *root = Json::Null;
        return;
    };

    let mut cur = root;
    for seg in parents {
        let next = match cur {
            Json::Object(map) => map.get_mut(seg),
            Json::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        };
        match next {
            Some(v) => cur = v,
            None => return,
        }
    }

    match cur {
        Json::Object(map) => {
            map.shift_remove(last);
        }
        Json::Array(items) => {
            if last == APPEND {
                items.pop();
            } else if let Ok(idx) = last.parse::<usize>()
                && idx < items.len()
            {
                items.remove(idx);
            }
        }
        _ => {}
    }
}

/// Convert raw bytes into the JSON value stored by a write.
///
/// JSON objects and arrays are stored as-is; anything else becomes a string.
#[must_use]
pub fn bytes_to_json(b: &[u8]) -> Json {
    let trimmed = b.trim_ascii_start();
    if (trimmed.starts_with(b"{") || trimmed.starts_with(b"["))
        && let Ok(v) = serde_json::from_slice::<Json>(b)
    {
        return v;
    }
    Json::String(String::from_utf8_lossy(b).into_owned())
}

/// Parse raw bytes as any JSON value, falling back to a string.
///
/// Unlike [`bytes_to_json`], scalars such as `1` or `true` keep their type.
#[must_use]
pub fn infer_json(b: &[u8]) -> Json {
    serde_json::from_slice(b).unwrap_or_else(|_| Json::String(String::from_utf8_lossy(b).into_owned()))
}

/// Encode a JSON value as a whole payload: strings are written raw.
#[must_use]
pub fn json_to_bytes(v: &Json) -> Vec<u8> {
    match v {
        Json::String(s) => s.clone().into_bytes(),
        other => other.to_string().into_bytes(),
    }
}
