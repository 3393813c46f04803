//! Minimal JSON engine for Property Exchange headers and bodies
//!
//! Property Exchange carries JSON over a 7-bit SysEx channel, so this engine
//! differs from a general purpose JSON library in a few deliberate ways:
//!
//! - **Scanning parser**: object/array boundaries are located by scanning for
//!   delimiters while tracking quote/escape state, then each delimited
//!   substring is parsed recursively.
//! - **Lazy strings**: string values keep their escaped source text and are
//!   unescaped only when read.
//! - **ASCII output**: the serializer escapes everything outside printable
//!   ASCII to `\uXXXX`, so output is always SysEx-safe.
//! - **Ordered objects**: members keep their insertion order.

mod parser;
mod serializer;

use indexmap::IndexMap;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

pub use parser::parse;
pub use serializer::{escape_string, unescape_string};

/// Object member map, in insertion order
pub type JsonObject = IndexMap<String, JsonValue>;

/// What went wrong while parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonErrorKind {
    /// Input was empty or whitespace only
    Empty,
    /// A byte that cannot start or continue a value here
    UnexpectedCharacter(char),
    /// String without a closing quote
    UnterminatedString,
    /// Closing delimiter does not match the open one
    MismatchedDelimiter { expected: char, found: char },
    /// Object or array never closed
    UnclosedDelimiter(char),
    /// Object member without a string key
    MissingKey,
    /// Object member without a `:` separator
    MissingColon,
    /// Empty slot between separators (`[1,,2]`, trailing comma)
    EmptyElement,
    /// Number that does not parse
    InvalidNumber,
    /// Malformed backslash escape
    InvalidEscape,
    /// Unknown bare word
    InvalidLiteral,
    /// Containers nested deeper than the given limit
    TooDeep(usize),
}

impl fmt::Display for JsonErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonErrorKind::Empty => write!(f, "empty input"),
            JsonErrorKind::UnexpectedCharacter(c) => write!(f, "unexpected character '{}'", c),
            JsonErrorKind::UnterminatedString => write!(f, "unterminated string"),
            JsonErrorKind::MismatchedDelimiter { expected, found } => {
                write!(f, "expected '{}' but found '{}'", expected, found)
            }
            JsonErrorKind::UnclosedDelimiter(c) => write!(f, "'{}' is never closed", c),
            JsonErrorKind::MissingKey => write!(f, "object member has no string key"),
            JsonErrorKind::MissingColon => write!(f, "object member has no ':'"),
            JsonErrorKind::EmptyElement => write!(f, "empty element"),
            JsonErrorKind::InvalidNumber => write!(f, "invalid number"),
            JsonErrorKind::InvalidEscape => write!(f, "invalid escape sequence"),
            JsonErrorKind::InvalidLiteral => write!(f, "invalid literal"),
            JsonErrorKind::TooDeep(limit) => write!(f, "nesting deeper than {}", limit),
        }
    }
}

/// JSON parse failure with the byte offset where it was detected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("JSON parse error at byte {offset}: {kind}")]
pub struct JsonError {
    pub offset: usize,
    pub kind: JsonErrorKind,
}

impl JsonError {
    pub(crate) fn new(offset: usize, kind: JsonErrorKind) -> Self {
        Self { offset, kind }
    }
}

/// A JSON string that is unescaped on demand
#[derive(Debug, Clone)]
pub struct JsonString {
    /// Source text between the quotes, or the plain value
    text: String,
    /// True when `text` still contains backslash escapes
    escaped: bool,
}

impl JsonString {
    /// Wrap escaped source text (already validated by the parser)
    pub(crate) fn from_source(text: &str) -> Self {
        Self {
            text: text.to_string(),
            escaped: text.contains('\\'),
        }
    }

    /// Decoded string value
    pub fn as_str(&self) -> Cow<'_, str> {
        if self.escaped {
            Cow::Owned(unescape_string(&self.text))
        } else {
            Cow::Borrowed(&self.text)
        }
    }

    /// Decoded string value, consuming self
    pub fn into_string(self) -> String {
        if self.escaped {
            unescape_string(&self.text)
        } else {
            self.text
        }
    }
}

impl PartialEq for JsonString {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl From<&str> for JsonString {
    fn from(value: &str) -> Self {
        Self {
            text: value.to_string(),
            escaped: false,
        }
    }
}

impl From<String> for JsonString {
    fn from(value: String) -> Self {
        Self {
            text: value,
            escaped: false,
        }
    }
}

/// Parsed JSON value tree
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JsonValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(JsonString),
    Array(Vec<JsonValue>),
    Object(JsonObject),
}

impl JsonValue {
    /// Parse JSON text
    pub fn parse(text: &str) -> Result<Self, JsonError> {
        parse(text)
    }

    /// Parse JSON from raw bytes (must be UTF-8)
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, JsonError> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            let offset = e.valid_up_to();
            let bad = bytes.get(offset).copied().unwrap_or_default();
            JsonError::new(offset, JsonErrorKind::UnexpectedCharacter(char::from(bad)))
        })?;
        parse(text)
    }

    /// Serialize to compact, ASCII-only JSON text
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        serializer::write_value(&mut out, self);
        out
    }

    /// Serialize to bytes ready for a Property Exchange header or body
    pub fn to_bytes(&self) -> Vec<u8> {
        self.serialize().into_bytes()
    }

    /// Build an object from key/value pairs
    pub fn object<K, I>(members: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, JsonValue)>,
    {
        JsonValue::Object(members.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Empty object
    pub fn empty_object() -> Self {
        JsonValue::Object(JsonObject::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JsonValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsonValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JsonValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Number as integer, if it has no fractional part
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JsonValue::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<Cow<'_, str>> {
        match self {
            JsonValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<JsonValue>> {
        match self {
            JsonValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&JsonObject> {
        match self {
            JsonValue::Object(members) => Some(members),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut JsonObject> {
        match self {
            JsonValue::Object(members) => Some(members),
            _ => None,
        }
    }

    /// Member lookup on objects; `None` for anything else
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.as_object().and_then(|members| members.get(key))
    }

    /// String member, decoded
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str()).map(Cow::into_owned)
    }

    /// Integer member
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(JsonValue::as_i64)
    }

    /// Boolean member
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(JsonValue::as_bool)
    }
}

impl fmt::Display for JsonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl From<bool> for JsonValue {
    fn from(value: bool) -> Self {
        JsonValue::Bool(value)
    }
}

impl From<f64> for JsonValue {
    fn from(value: f64) -> Self {
        JsonValue::Number(value)
    }
}

impl From<i64> for JsonValue {
    fn from(value: i64) -> Self {
        JsonValue::Number(value as f64)
    }
}

impl From<u32> for JsonValue {
    fn from(value: u32) -> Self {
        JsonValue::Number(f64::from(value))
    }
}

impl From<u16> for JsonValue {
    fn from(value: u16) -> Self {
        JsonValue::Number(f64::from(value))
    }
}

impl From<u8> for JsonValue {
    fn from(value: u8) -> Self {
        JsonValue::Number(f64::from(value))
    }
}

impl From<&str> for JsonValue {
    fn from(value: &str) -> Self {
        JsonValue::String(JsonString::from(value))
    }
}

impl From<String> for JsonValue {
    fn from(value: String) -> Self {
        JsonValue::String(JsonString::from(value))
    }
}

impl From<Vec<JsonValue>> for JsonValue {
    fn from(value: Vec<JsonValue>) -> Self {
        JsonValue::Array(value)
    }
}

impl From<JsonObject> for JsonValue {
    fn from(value: JsonObject) -> Self {
        JsonValue::Object(value)
    }
}

/// Conversion from serde_json values (configuration files, host code)
impl From<&serde_json::Value> for JsonValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => JsonValue::Null,
            serde_json::Value::Bool(b) => JsonValue::Bool(*b),
            serde_json::Value::Number(n) => JsonValue::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => JsonValue::from(s.as_str()),
            serde_json::Value::Array(items) => {
                JsonValue::Array(items.iter().map(JsonValue::from).collect())
            }
            serde_json::Value::Object(members) => JsonValue::Object(
                members
                    .iter()
                    .map(|(k, v)| (k.clone(), JsonValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Conversion to serde_json values (pretty printing, host code)
impl From<&JsonValue> for serde_json::Value {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => serde_json::Value::Null,
            JsonValue::Bool(b) => serde_json::Value::Bool(*b),
            JsonValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            JsonValue::String(s) => serde_json::Value::String(s.as_str().into_owned()),
            JsonValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            JsonValue::Object(members) => serde_json::Value::Object(
                members
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_string_decoding() {
        let value = parse(r#""line\nbreak A""#).unwrap();
        match &value {
            JsonValue::String(s) => {
                assert!(s.escaped);
                assert_eq!(s.as_str(), "line\nbreak A");
            }
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_string_equality_uses_decoded_value() {
        let escaped = parse(r#""ab""#).unwrap();
        assert_eq!(escaped, JsonValue::from("ab"));
    }

    #[test]
    fn test_accessors() {
        let value = parse(r#"{"status":200,"resource":"DeviceInfo","setPartial":true}"#).unwrap();
        assert_eq!(value.get_i64("status"), Some(200));
        assert_eq!(value.get_str("resource").as_deref(), Some("DeviceInfo"));
        assert_eq!(value.get_bool("setPartial"), Some(true));
        assert_eq!(value.get("missing"), None);
        assert_eq!(JsonValue::from(1.5).as_i64(), None);
    }

    #[test]
    fn test_serde_json_interop() {
        let original = serde_json::json!({"b": [1, 2.5, "x"], "a": null, "c": {"d": true}});
        let ours = JsonValue::from(&original);
        assert_eq!(ours.serialize(), r#"{"b":[1,2.5,"x"],"a":null,"c":{"d":true}}"#);
        assert_eq!(serde_json::Value::from(&ours), original);
    }
}
