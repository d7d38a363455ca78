//! Opaque encoded values carried by every request and response.
//!
//! Values are encoded one payload per argument. Payload metadata names the encoding; only the
//! JSON and null encodings are understood here.

use crate::errors::PayloadConversionError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::HashMap, fmt::Debug};

pub(crate) const METADATA_ENCODING_KEY: &str = "encoding";
pub(crate) const JSON_ENCODING: &str = "json/plain";
pub(crate) const NULL_ENCODING: &str = "binary/null";

/// A single encoded value
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(
        default,
        serialize_with = "serialize_b64",
        deserialize_with = "deserialize_b64"
    )]
    pub data: Vec<u8>,
}

impl Payload {
    /// Encode a value with the JSON converter. Values serializing to `null` use the null
    /// encoding.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, PayloadConversionError> {
        let json = serde_json::to_value(value)?;
        if json.is_null() {
            return Ok(Self::null());
        }
        Ok(Self {
            metadata: HashMap::from([(
                METADATA_ENCODING_KEY.to_string(),
                JSON_ENCODING.to_string(),
            )]),
            data: serde_json::to_vec(&json)?,
        })
    }

    /// A payload representing the absence of a value
    pub fn null() -> Self {
        Self {
            metadata: HashMap::from([(
                METADATA_ENCODING_KEY.to_string(),
                NULL_ENCODING.to_string(),
            )]),
            data: vec![],
        }
    }

    pub fn encoding(&self) -> Option<&str> {
        self.metadata.get(METADATA_ENCODING_KEY).map(String::as_str)
    }

    pub fn is_null(&self) -> bool {
        self.encoding() == Some(NULL_ENCODING)
    }

    /// Decode the payload into the requested type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PayloadConversionError> {
        match self.encoding() {
            Some(NULL_ENCODING) => Ok(serde_json::from_value(serde_json::Value::Null)?),
            Some(JSON_ENCODING) => Ok(serde_json::from_slice(&self.data)?),
            Some(other) => Err(PayloadConversionError::UnsupportedEncoding(
                other.to_string(),
            )),
            None => Err(PayloadConversionError::UnsupportedEncoding(String::new())),
        }
    }
}

impl Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.encoding() {
            Some(JSON_ENCODING) => write!(f, "{}", String::from_utf8_lossy(&self.data)),
            Some(NULL_ENCODING) => write!(f, "null"),
            _ => write!(f, "[{}..{}]", self.metadata.len(), self.data.len()),
        }
    }
}

fn serialize_b64<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&BASE64.encode(data))
}

fn deserialize_b64<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(d)?;
    BASE64.decode(s).map_err(serde::de::Error::custom)
}

/// An ordered list of encoded values, typically the arguments of a call or its result
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedValues(Vec<Payload>);

impl EncodedValues {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Encode a single value
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> Result<Self, PayloadConversionError> {
        Ok(Self(vec![Payload::encode(value)?]))
    }

    /// Encode each value of an iterator as its own payload
    pub fn from_values<T: Serialize>(
        values: impl IntoIterator<Item = T>,
    ) -> Result<Self, PayloadConversionError> {
        values
            .into_iter()
            .map(|v| Payload::encode(&v))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Append a value, returning self. Allows building heterogeneous argument lists.
    pub fn with<T: Serialize + ?Sized>(
        mut self,
        value: &T,
    ) -> Result<Self, PayloadConversionError> {
        self.0.push(Payload::encode(value)?);
        Ok(self)
    }

    pub fn push(&mut self, payload: Payload) {
        self.0.push(payload);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.0
    }

    /// Decode the value at `index`. A missing value decodes as if it were `null`, so optional
    /// types produce `None` and unit decodes successfully.
    pub fn get_value<T: DeserializeOwned>(
        &self,
        index: usize,
    ) -> Result<T, PayloadConversionError> {
        match self.0.get(index) {
            Some(p) => p.decode(),
            None => Ok(serde_json::from_value(serde_json::Value::Null)?),
        }
    }

    /// True if there is no value at `index` or the value there is null
    pub fn is_null_at(&self, index: usize) -> bool {
        self.0.get(index).map_or(true, Payload::is_null)
    }
}

impl Debug for EncodedValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl From<Vec<Payload>> for EncodedValues {
    fn from(v: Vec<Payload>) -> Self {
        Self(v)
    }
}

impl From<Payload> for EncodedValues {
    fn from(p: Payload) -> Self {
        Self(vec![p])
    }
}

impl IntoIterator for EncodedValues {
    type Item = Payload;
    type IntoIter = std::vec::IntoIter<Payload>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
