//! Request parameter extraction.
//!
//! Action bodies, action query strings and MCP tool arguments all arrive as
//! loosely-typed JSON. [`Params`] wraps them and produces the validation
//! messages callers see, so both surfaces reject bad input identically.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::error::{BridgeError, BridgeResult};
use crate::resolution::StatusToken;

/// A field in a partial update.
///
/// Distinguishes "leave unchanged" from "clear the field".
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Patch<T> {
    /// Field absent from the request.
    #[default]
    Unset,
    /// Field present with `null`.
    Null,
    /// Field present with a value.
    Value(T),
}

impl<T> Patch<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// The value, if one was supplied.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Convert into the JSON to send upstream, or `None` when unset.
    pub fn into_json(self) -> Option<Value>
    where
        T: Into<Value>,
    {
        match self {
            Self::Unset => None,
            Self::Null => Some(Value::Null),
            Self::Value(v) => Some(v.into()),
        }
    }
}

/// Where a parameter set came from; decides the wording of some errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Origin {
    /// JSON request body
    Body,
    /// URL query string
    Query,
    /// MCP tool arguments
    #[default]
    Arguments,
}

/// Loosely-typed request parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Map<String, Value>,
    origin: Origin,
}

impl Params {
    /// Parse a JSON request body; it must be an object.
    pub fn from_body(body: &[u8]) -> BridgeResult<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|_| BridgeError::validation("Request body must be valid JSON"))?;
        match value {
            Value::Object(values) => Ok(Self {
                values,
                origin: Origin::Body,
            }),
            _ => Err(BridgeError::validation("Request body must be a JSON object")),
        }
    }

    /// Build from query-string pairs; repeated keys become arrays.
    pub fn from_query(pairs: Vec<(String, String)>) -> Self {
        let mut map = Map::new();
        for (key, value) in pairs {
            match map.get_mut(&key) {
                None => {
                    map.insert(key, Value::String(value));
                }
                Some(Value::Array(items)) => items.push(Value::String(value)),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(value)]);
                }
            }
        }
        Self {
            values: map,
            origin: Origin::Query,
        }
    }

    /// Wrap MCP tool arguments; `null` or absent arguments are empty.
    pub fn from_arguments(arguments: Option<Value>) -> BridgeResult<Self> {
        match arguments {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::Object(values)) => Ok(Self {
                values,
                origin: Origin::Arguments,
            }),
            Some(_) => Err(BridgeError::validation("Tool arguments must be a JSON object")),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Present and not `null`.
    fn present(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// Insert a value; used when aliases are folded into canonical names.
    pub fn insert(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// First present key among `keys`.
    pub fn first_of<'a>(&self, keys: &[&'a str]) -> Option<&'a str> {
        keys.iter().copied().find(|key| self.present(key).is_some())
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Error for a missing required key.
    pub fn missing(&self, key: &str) -> BridgeError {
        match self.origin {
            Origin::Query => BridgeError::validation(format!("{key} is required")),
            Origin::Body | Origin::Arguments => {
                BridgeError::validation(format!("Field '{key}' is required"))
            }
        }
    }

    fn integer_error(key: &str) -> BridgeError {
        BridgeError::validation(format!("{key} must be an integer"))
    }

    /// Required non-negative integer; numeric strings are accepted.
    pub fn require_u64(&self, key: &str) -> BridgeResult<u64> {
        let value = self.present(key).ok_or_else(|| self.missing(key))?;
        as_u64(value).ok_or_else(|| Self::integer_error(key))
    }

    /// Optional non-negative integer; `null` counts as absent.
    pub fn opt_u64(&self, key: &str) -> BridgeResult<Option<u64>> {
        match self.present(key) {
            None => Ok(None),
            Some(value) => as_u64(value).map(Some).ok_or_else(|| Self::integer_error(key)),
        }
    }

    /// Integer for a partial update; `null` clears.
    pub fn patch_u64(&self, key: &str) -> BridgeResult<Patch<u64>> {
        match self.values.get(key) {
            None => Ok(Patch::Unset),
            Some(Value::Null) => Ok(Patch::Null),
            Some(value) => as_u64(value)
                .map(Patch::Value)
                .ok_or_else(|| Self::integer_error(key)),
        }
    }

    /// All integers under `key` (single value or array).
    pub fn u64_list(&self, key: &str) -> BridgeResult<Vec<u64>> {
        match self.present(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| as_u64(item).ok_or_else(|| Self::integer_error(key)))
                .collect(),
            Some(value) => as_u64(value)
                .map(|id| vec![id])
                .ok_or_else(|| Self::integer_error(key)),
        }
    }

    /// Required string; numbers are rendered as text.
    pub fn require_str(&self, key: &str) -> BridgeResult<String> {
        self.opt_str(key).ok_or_else(|| self.missing(key))
    }

    /// Optional string; empty strings count as absent.
    pub fn opt_str(&self, key: &str) -> Option<String> {
        match self.present(key)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
            other => Some(other.to_string()),
        }
    }

    /// Raw JSON for a partial update.
    pub fn patch_value(&self, key: &str) -> Patch<Value> {
        match self.values.get(key) {
            None => Patch::Unset,
            Some(Value::Null) => Patch::Null,
            Some(value) => Patch::Value(value.clone()),
        }
    }

    /// String for a partial update; non-strings are rendered as text.
    pub fn patch_string(&self, key: &str) -> Patch<String> {
        match self.values.get(key) {
            None => Patch::Unset,
            Some(Value::Null) => Patch::Null,
            Some(Value::String(s)) => Patch::Value(s.clone()),
            Some(other) => Patch::Value(other.to_string()),
        }
    }

    /// Tag list for a body or tool argument; must be an array when present.
    pub fn tags(&self, key: &str) -> BridgeResult<Patch<Vec<Value>>> {
        match self.values.get(key) {
            None => Ok(Patch::Unset),
            Some(Value::Null) => Ok(Patch::Null),
            Some(Value::Array(items)) => Ok(Patch::Value(items.clone())),
            Some(_) => Err(BridgeError::validation(format!("{key} must be a list"))),
        }
    }

    /// Strings under the first present key of `keys` (query-string lists).
    pub fn str_list(&self, keys: &[&str]) -> Vec<String> {
        let Some(key) = self.first_of(keys) else {
            return Vec::new();
        };
        match self.present(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    Value::String(_) | Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            Some(Value::String(_)) | None => Vec::new(),
            Some(other) => vec![other.to_string()],
        }
    }

    /// Status reference for a create or filter; absent or `null` is `None`.
    pub fn status(&self, key: &str) -> BridgeResult<Option<StatusToken>> {
        match self.present(key) {
            None => Ok(None),
            Some(value) => StatusToken::from_value(value).map(Some).ok_or_else(|| {
                BridgeError::validation(format!("{key} must be an integer or string"))
            }),
        }
    }

    /// Status reference for an update; `null` is rejected.
    pub fn status_update(&self, key: &str) -> BridgeResult<Option<StatusToken>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Null) => Err(BridgeError::validation(format!("{key} cannot be null"))),
            Some(_) => self.status(key),
        }
    }

    /// Calendar date in `YYYY-MM-DD` form for a partial update.
    pub fn date(&self, key: &str) -> BridgeResult<Patch<String>> {
        match self.values.get(key) {
            None => Ok(Patch::Unset),
            Some(Value::Null) => Ok(Patch::Null),
            Some(Value::String(raw)) => parse_date(raw)
                .map(Patch::Value)
                .ok_or_else(|| Self::date_error(key)),
            Some(_) => Err(Self::date_error(key)),
        }
    }

    fn date_error(key: &str) -> BridgeError {
        BridgeError::validation(format!("{key} must be in YYYY-MM-DD format"))
    }
}

fn parse_date(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(items) if items.len() == 1 => as_u64(&items[0]),
        _ => None,
    }
}
