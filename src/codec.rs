//! Body encoding.
//!
//! Plain text travels verbatim. Anything else is serialized to YAML and the
//! `encoding` header is set to [`YAML_ENCODING`] so the receiver knows to parse
//! it. Decoding goes through `serde_yaml::Value`, a data-only model: tags in
//! the payload are kept as data and never resolved to native types.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::Value;

use crate::headers::ENCODING;
use crate::{Headers, MessagingError, Result};

/// Marker stored in the `encoding` header for structured bodies.
pub const YAML_ENCODING: &str = "yaml";

/// A message body before encoding or after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Plain text, sent as-is.
    Text(String),

    /// A structured value: nested mappings, sequences and scalars.
    Structured(Value),
}

impl Body {
    /// Build a structured body from any serializable value.
    pub fn structured<T: Serialize>(value: &T) -> Result<Self> {
        // ---
        serde_yaml::to_value(value)
            .map(Body::Structured)
            .map_err(MessagingError::Encode)
    }

    /// Convert the body into a typed value.
    ///
    /// Text bodies are offered to `T` as a YAML string scalar, so a `String`
    /// target always accepts them.
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T> {
        // ---
        let value = match self {
            Body::Text(text) => Value::String(text),
            Body::Structured(value) => value,
        };
        serde_yaml::from_value(value).map_err(MessagingError::Conversion)
    }

    /// The text, if this is a plain text body.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            Body::Structured(_) => None,
        }
    }

    /// The value, if this is a structured body.
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Body::Text(_) => None,
            Body::Structured(value) => Some(value),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Body::Text(_))
    }
}

impl Default for Body {
    /// The empty text body.
    fn default() -> Self {
        Body::Text(String::new())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_owned())
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Structured(value)
    }
}

/// Encode a body into its transport payload.
///
/// Text is returned unchanged and `headers` is left untouched. Structured
/// values are serialized to YAML and `encoding: yaml` is added to `headers`.
pub fn encode_body(headers: &mut Headers, body: &Body) -> Result<String> {
    // ---
    match body {
        Body::Text(text) => Ok(text.clone()),
        Body::Structured(value) => {
            let raw = serde_yaml::to_string(value).map_err(MessagingError::Encode)?;
            headers.insert(ENCODING, YAML_ENCODING);
            Ok(raw)
        }
    }
}

/// Decode a transport payload.
///
/// Unless `headers` carries `encoding: yaml`, `raw` is returned verbatim as
/// [`Body::Text`]. A payload flagged as YAML that fails to parse is an error;
/// it is never passed through as text.
pub fn decode_body(headers: &Headers, raw: String) -> Result<Body> {
    // ---
    if headers.get(ENCODING) != Some(YAML_ENCODING) {
        return Ok(Body::Text(raw));
    }

    serde_yaml::from_str::<Value>(&raw)
        .map(Body::Structured)
        .map_err(MessagingError::Decode)
}
