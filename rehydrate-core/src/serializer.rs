/*!
Document serializer: values to tagged envelopes and back.

The default strategy walks values into [`TaggedValue`]s. A
[`CustomSerializer`] may be installed to take over whole documents; when one
is installed it always takes precedence over the walker.
*/

use crate::codec::{from_base64, to_base64};
use crate::compression::{CompressionAdapter, GzipCompressor};
use crate::digest;
use crate::value::{to_tagged, TaggedValue};
use crate::{HydrateError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Prefix of the `custom` tag name wrapping a converter's output
pub const CONVERTER_TAG_PREFIX: &str = "$converter:";

/// Serializer output
///
/// Wire shapes: `{"data": <tagged>, "version": n}` or
/// `{"compressed": true, "data": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Compressed { compressed: bool, data: String },
    Plain { data: TaggedValue, version: u32 },
}

impl Envelope {
    pub fn is_compressed(&self) -> bool {
        matches!(self, Envelope::Compressed { .. })
    }
}

/// Whole-document conversion strategy that bypasses the tagged walk
pub trait CustomSerializer: Send + Sync {
    /// Stable converter name, recorded in the envelope
    fn name(&self) -> &str;

    /// Turn the JSON form of a value into the converter's stored form
    fn encode(&self, document: &Value) -> Result<Value>;

    /// Inverse of [`CustomSerializer::encode`]
    fn decode(&self, encoded: &Value) -> Result<Value>;
}

/// Converts values to and from [`Envelope`]s
#[derive(Clone)]
pub struct Serializer {
    custom: Option<Arc<dyn CustomSerializer>>,
    compressor: GzipCompressor,
}

impl Serializer {
    pub fn new() -> Self {
        Self {
            custom: None,
            compressor: GzipCompressor::new(),
        }
    }

    pub fn with_custom<C: CustomSerializer + 'static>(mut self, converter: C) -> Self {
        self.custom = Some(Arc::new(converter));
        self
    }

    pub fn set_custom(&mut self, converter: Option<Arc<dyn CustomSerializer>>) {
        self.custom = converter;
    }

    pub fn has_custom(&self) -> bool {
        self.custom.is_some()
    }

    /// Walk a value into its tagged form
    pub fn to_tagged<T: Serialize + ?Sized>(&self, value: &T) -> TaggedValue {
        to_tagged(value)
    }

    /// Plain JSON form of a tagged value; unreadable leaves become `null`
    pub fn from_tagged(&self, value: &TaggedValue) -> Value {
        value.to_json()
    }

    /// Serialize `value` into an envelope stamped with `version`
    pub fn serialize<T: Serialize + ?Sized>(
        &self,
        value: &T,
        version: u32,
        compress: bool,
    ) -> Result<Envelope> {
        let data = match &self.custom {
            Some(converter) => {
                let document = serde_json::to_value(value)?;
                let encoded = converter.encode(&document)?;
                TaggedValue::Custom {
                    name: format!("{CONVERTER_TAG_PREFIX}{}", converter.name()),
                    value: Box::new(TaggedValue::from_json(&encoded)),
                }
            }
            None => to_tagged(value),
        };

        let plain = Envelope::Plain { data, version };
        if !compress {
            return Ok(plain);
        }

        let text = serde_json::to_string(&plain)?;
        let compressed = self.compressor.compress(text.as_bytes())?;
        debug!(
            "Compressed envelope from {} to {} bytes",
            text.len(),
            compressed.len()
        );
        Ok(Envelope::Compressed {
            compressed: true,
            data: to_base64(&compressed),
        })
    }

    /// Recover the JSON document and its format version
    pub fn decode(&self, envelope: &Envelope) -> Result<(Value, u32)> {
        match envelope {
            Envelope::Plain { data, version } => Ok((self.decode_data(data)?, *version)),
            Envelope::Compressed { data, .. } => {
                let bytes = self.compressor.decompress(&from_base64(data)?)?;
                match serde_json::from_slice::<Envelope>(&bytes)? {
                    Envelope::Plain { data, version } => Ok((self.decode_data(&data)?, version)),
                    Envelope::Compressed { .. } => Err(HydrateError::invalid_format(
                        "nested compressed envelope",
                    )),
                }
            }
        }
    }

    /// Decode an envelope straight into `T`
    pub fn deserialize<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<T> {
        let (document, _) = self.decode(envelope)?;
        Ok(serde_json::from_value(document)?)
    }

    /// Deterministic digest of a value's canonical JSON encoding
    pub fn generate_hash<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        digest::generate_hash(value)
    }

    fn decode_data(&self, data: &TaggedValue) -> Result<Value> {
        if let TaggedValue::Custom { name, value } = data {
            if let Some(converter_name) = name.strip_prefix(CONVERTER_TAG_PREFIX) {
                let converter = self.custom.as_ref().ok_or_else(|| {
                    HydrateError::configuration(format!(
                        "document was written by converter '{converter_name}' but none is installed"
                    ))
                })?;
                if converter.name() != converter_name {
                    return Err(HydrateError::configuration(format!(
                        "document was written by converter '{converter_name}', installed converter is '{}'",
                        converter.name()
                    )));
                }
                return converter.decode(&value.to_json());
            }
        }
        Ok(data.to_json())
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("custom", &self.custom.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Timestamp;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Priority {
        Low,
        High,
        Custom(u8),
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Todo {
        title: String,
        done: bool,
        priority: Priority,
        due: Option<Timestamp>,
        estimate_hours: f64,
        labels: BTreeMap<String, i32>,
        position: (i32, i32),
    }

    fn sample() -> Todo {
        let mut labels = BTreeMap::new();
        labels.insert("home".into(), 1);
        Todo {
            title: "water plants".into(),
            done: false,
            priority: Priority::Custom(7),
            due: Some(Timestamp(Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap())),
            estimate_hours: 0.5,
            labels,
            position: (3, -4),
        }
    }

    /// Stores documents as a single JSON string
    struct StringConverter;

    impl CustomSerializer for StringConverter {
        fn name(&self) -> &str {
            "json-string"
        }

        fn encode(&self, document: &Value) -> Result<Value> {
            Ok(Value::String(document.to_string()))
        }

        fn decode(&self, encoded: &Value) -> Result<Value> {
            let text = encoded
                .as_str()
                .ok_or_else(|| HydrateError::invalid_format("expected string"))?;
            Ok(serde_json::from_str(text)?)
        }
    }

    #[test]
    fn test_roundtrip_through_tagged_envelope() {
        let serializer = Serializer::new();
        let todos = vec![sample(), Todo { priority: Priority::Low, due: None, ..sample() }];

        let envelope = serializer.serialize(&todos, 3, false).unwrap();
        assert!(!envelope.is_compressed());

        let restored: Vec<Todo> = serializer.deserialize(&envelope).unwrap();
        assert_eq!(restored, todos);
        assert_eq!(serializer.decode(&envelope).unwrap().1, 3);
    }

    #[test]
    fn test_timestamp_tag_survives_envelope() {
        let serializer = Serializer::new();
        let envelope = serializer.serialize(&sample(), 1, false).unwrap();

        let Envelope::Plain { data: TaggedValue::Mapping(map), .. } = &envelope else {
            panic!("expected plain mapping envelope");
        };
        assert!(matches!(map["due"], TaggedValue::Timestamp(_)));
        assert!(matches!(map["priority"], TaggedValue::Custom { .. }));
    }

    #[test]
    fn test_compressed_envelope_roundtrip() {
        let serializer = Serializer::new();
        let todo = sample();

        let envelope = serializer.serialize(&todo, 2, true).unwrap();
        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["compressed"], json!(true));
        assert!(wire["data"].is_string());

        let parsed: Envelope = serde_json::from_value(wire).unwrap();
        let restored: Todo = serializer.deserialize(&parsed).unwrap();
        assert_eq!(restored, todo);
        assert_eq!(serializer.decode(&parsed).unwrap().1, 2);
    }

    #[test]
    fn test_plain_envelope_wire_shape() {
        let envelope = Serializer::new().serialize(&json!({"n": 1}), 1, false).unwrap();
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "data": {"type": "mapping", "value": {"n": {"type": "int", "value": 1}}},
                "version": 1
            })
        );
    }

    #[test]
    fn test_corrupt_compressed_envelope_is_codec_error() {
        let envelope = Envelope::Compressed {
            compressed: true,
            data: to_base64(b"definitely not gzip"),
        };
        let result = Serializer::new().decode(&envelope);
        assert!(matches!(result, Err(HydrateError::Codec(_))));
    }

    #[test]
    fn test_custom_converter_takes_precedence() {
        let serializer = Serializer::new().with_custom(StringConverter);
        let todo = sample();

        let envelope = serializer.serialize(&todo, 1, false).unwrap();
        let Envelope::Plain { data: TaggedValue::Custom { name, value }, .. } = &envelope else {
            panic!("expected converter envelope");
        };
        assert_eq!(name, "$converter:json-string");
        assert!(matches!(**value, TaggedValue::String(_)));

        let restored: Todo = serializer.deserialize(&envelope).unwrap();
        assert_eq!(restored, todo);
    }

    #[test]
    fn test_converter_envelope_without_converter_fails() {
        let envelope = Serializer::new()
            .with_custom(StringConverter)
            .serialize(&json!({"n": 1}), 1, false)
            .unwrap();

        let result = Serializer::new().decode(&envelope);
        assert!(matches!(result, Err(HydrateError::Configuration(_))));
    }

    #[test]
    fn test_generate_hash_is_stable() {
        let serializer = Serializer::new();
        assert_eq!(
            serializer.generate_hash(&json!({"b": 2, "a": 1})).unwrap(),
            serializer.generate_hash(&json!({"a": 1, "b": 2})).unwrap()
        );
    }
}
