use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::error::{DecodeError, Error};

/// A user supplied decode function.
pub type DecodeFn = dyn Fn(&str) -> Result<Value, DecodeError> + Send + Sync;

/// The built-in codecs, nameable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Number,
    String,
    Json,
}

/// Decodes the cached string representation of a fetched value.
///
/// Values are always written to the store as their JSON representation, except for strings which
/// are written verbatim. The codec is the read half of that mapping.
#[derive(Clone)]
pub enum Codec {
    /// Parses the cached string as a JSON number.
    Number,
    /// Returns the cached string as is.
    String,
    /// Parses the cached string as arbitrary JSON.
    Json,
    /// A custom decode function.
    Custom(Arc<DecodeFn>),
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number => f.write_str("Number"),
            Self::String => f.write_str("String"),
            Self::Json => f.write_str("Json"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<CodecKind> for Codec {
    fn from(kind: CodecKind) -> Self {
        match kind {
            CodecKind::Number => Self::Number,
            CodecKind::String => Self::String,
            CodecKind::Json => Self::Json,
        }
    }
}

impl Codec {
    pub fn custom<F>(decode: F) -> Self
    where
        F: Fn(&str) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(decode))
    }

    /// Derives the default codec from a freshly fetched `sample` value of `fetcher`.
    ///
    /// Booleans are not supported, as their cached representation is ambiguous.
    pub fn for_sample(fetcher: &str, sample: &Value) -> Result<Self, Error> {
        match sample {
            Value::Number(_) => Ok(Self::Number),
            Value::String(_) => Ok(Self::String),
            Value::Null | Value::Array(_) | Value::Object(_) => Ok(Self::Json),
            Value::Bool(_) => Err(Error::UnsupportedValueType {
                fetcher: fetcher.to_owned(),
                value_type: "boolean",
            }),
        }
    }

    pub fn decode(&self, raw: &str) -> Result<Value, DecodeError> {
        match self {
            Self::Number => decode_number(raw),
            Self::String => Ok(Value::String(raw.to_owned())),
            Self::Json => Ok(serde_json::from_str(raw)?),
            Self::Custom(decode) => decode(raw),
        }
    }
}

fn decode_number(raw: &str) -> Result<Value, DecodeError> {
    let raw = raw.trim();
    if let Ok(int) = raw.parse::<i64>() {
        return Ok(int.into());
    }
    if let Ok(uint) = raw.parse::<u64>() {
        return Ok(uint.into());
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| DecodeError::new(format_args!("`{raw}` is not a number")))
}

/// Returns the string representation under which `value` is written to the store.
pub fn encode_value(value: &Value) -> String {
    match value {
        Value::String(string) => string.clone(),
        other => other.to_string(),
    }
}

/// The registry of value processors (codecs), keyed by fetcher key.
///
/// Codecs are either registered explicitly, or installed lazily from the first value a fetcher
/// resolves with. An explicitly registered codec always replaces whatever was there before.
#[derive(Debug, Default)]
pub struct ValueProcessors {
    codecs: RwLock<HashMap<String, Codec>>,
}

impl ValueProcessors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates processors from the built-in codecs named in configuration.
    pub fn from_kinds(kinds: &BTreeMap<String, CodecKind>) -> Self {
        let codecs = kinds
            .iter()
            .map(|(fetcher, kind)| (fetcher.clone(), Codec::from(*kind)))
            .collect();
        Self {
            codecs: RwLock::new(codecs),
        }
    }

    /// Adds a codec for `fetcher`.
    pub fn with(self, fetcher: impl Into<String>, codec: Codec) -> Self {
        self.set(fetcher, codec);
        self
    }

    pub fn get(&self, fetcher: &str) -> Option<Codec> {
        self.codecs.read().get(fetcher).cloned()
    }

    /// Registers `codec` for `fetcher`, replacing any existing codec.
    pub fn set(&self, fetcher: impl Into<String>, codec: Codec) {
        self.codecs.write().insert(fetcher.into(), codec);
    }

    /// Registers all codecs of `other`, replacing existing ones for the same fetchers.
    pub fn extend(&self, other: ValueProcessors) {
        let other = other.codecs.into_inner();
        self.codecs.write().extend(other);
    }

    /// Returns the codec for `fetcher`, installing the default codec for `sample` if there is
    /// none yet.
    ///
    /// Lookup and installation happen under a single lock, so a concurrently registered codec is
    /// never overwritten by a default.
    pub fn get_or_install_default(&self, fetcher: &str, sample: &Value) -> Result<Codec, Error> {
        let mut codecs = self.codecs.write();
        if let Some(codec) = codecs.get(fetcher) {
            return Ok(codec.clone());
        }

        let codec = Codec::for_sample(fetcher, sample)?;
        tracing::debug!(fetcher, codec = ?codec, "Installing default cache value processor");
        codecs.insert(fetcher.to_owned(), codec.clone());
        Ok(codec)
    }
}
