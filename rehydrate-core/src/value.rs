/*!
Tagged, type-preserving intermediate representation.

Any `serde::Serialize` value can be walked into a [`TaggedValue`]. The walk
never fails as a whole: a field whose serialization errors, or whose type has
no tagged form, becomes an [`TaggedValue::Error`] leaf and its siblings are
unaffected.

Wire shape: `{"type": "<tag>", "value": <payload>}`.
*/

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{Deserialize, Deserializer};
use serde::ser::{self, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Newtype name the walker recognises as a timestamp
pub const TIMESTAMP_TOKEN: &str = "$rehydrate::Timestamp";

/// Closed set of tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Null,
    Int,
    Float,
    String,
    Bool,
    Sequence,
    Mapping,
    Timestamp,
    Error,
    Custom,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Null => "null",
            Tag::Int => "int",
            Tag::Float => "float",
            Tag::String => "string",
            Tag::Bool => "bool",
            Tag::Sequence => "sequence",
            Tag::Mapping => "mapping",
            Tag::Timestamp => "timestamp",
            Tag::Error => "error",
            Tag::Custom => "custom",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value with its type tag attached
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TaggedValue {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Sequence(Vec<TaggedValue>),
    Mapping(BTreeMap<String, TaggedValue>),
    Timestamp(DateTime<Utc>),
    Error(String),
    Custom {
        name: String,
        value: Box<TaggedValue>,
    },
}

impl TaggedValue {
    pub fn tag(&self) -> Tag {
        match self {
            TaggedValue::Null => Tag::Null,
            TaggedValue::Int(_) => Tag::Int,
            TaggedValue::Float(_) => Tag::Float,
            TaggedValue::String(_) => Tag::String,
            TaggedValue::Bool(_) => Tag::Bool,
            TaggedValue::Sequence(_) => Tag::Sequence,
            TaggedValue::Mapping(_) => Tag::Mapping,
            TaggedValue::Timestamp(_) => Tag::Timestamp,
            TaggedValue::Error(_) => Tag::Error,
            TaggedValue::Custom { .. } => Tag::Custom,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TaggedValue::Error(_))
    }

    /// Walk any serializable value into its tagged form
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        to_tagged(value)
    }

    /// Lift a plain JSON document without type inference beyond JSON's own
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => TaggedValue::Null,
            Value::Bool(b) => TaggedValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    TaggedValue::Int(i)
                } else if n.is_u64() {
                    TaggedValue::Error(format!("Unsupported type: u64 value {n} exceeds i64 range"))
                } else {
                    n.as_f64()
                        .map(TaggedValue::Float)
                        .unwrap_or_else(|| TaggedValue::Error(format!("Unsupported number: {n}")))
                }
            }
            Value::String(s) => TaggedValue::String(s.clone()),
            Value::Array(items) => TaggedValue::Sequence(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => TaggedValue::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back to plain JSON
    ///
    /// `error` leaves become `null` and are logged. `custom` leaves become
    /// externally tagged `{name: value}` objects, which is the shape serde
    /// expects for data-carrying enum variants.
    pub fn to_json(&self) -> Value {
        match self {
            TaggedValue::Null => Value::Null,
            TaggedValue::Int(i) => Value::from(*i),
            TaggedValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            TaggedValue::String(s) => Value::String(s.clone()),
            TaggedValue::Bool(b) => Value::Bool(*b),
            TaggedValue::Sequence(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            TaggedValue::Mapping(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            TaggedValue::Timestamp(ts) => Value::String(format_timestamp(ts)),
            TaggedValue::Error(msg) => {
                warn!("Replacing unreadable value with null: {}", msg);
                Value::Null
            }
            TaggedValue::Custom { name, value } => {
                let mut object = Map::new();
                object.insert(name.clone(), value.to_json());
                Value::Object(object)
            }
        }
    }

    /// Parse the wire shape; malformed or unknown entries become `error` leaves
    pub fn from_wire(raw: &Value) -> Self {
        let Some(object) = raw.as_object() else {
            return TaggedValue::Error(format!("Malformed tagged value: {raw}"));
        };
        let tag = object.get("type").and_then(Value::as_str);
        let payload = object.get("value");

        match (tag, payload) {
            (Some("null"), _) => TaggedValue::Null,
            (Some("int"), Some(v)) => v
                .as_i64()
                .map(TaggedValue::Int)
                .unwrap_or_else(|| malformed(Tag::Int, v)),
            (Some("float"), Some(v)) => v
                .as_f64()
                .map(TaggedValue::Float)
                .unwrap_or_else(|| malformed(Tag::Float, v)),
            (Some("string"), Some(Value::String(s))) => TaggedValue::String(s.clone()),
            (Some("bool"), Some(Value::Bool(b))) => TaggedValue::Bool(*b),
            (Some("sequence"), Some(Value::Array(items))) => {
                TaggedValue::Sequence(items.iter().map(Self::from_wire).collect())
            }
            (Some("mapping"), Some(Value::Object(map))) => TaggedValue::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_wire(v)))
                    .collect(),
            ),
            (Some("timestamp"), Some(Value::String(s))) => match parse_timestamp(s) {
                Some(ts) => TaggedValue::Timestamp(ts),
                None => TaggedValue::Error(format!("Invalid timestamp: {s}")),
            },
            (Some("error"), Some(Value::String(msg))) => TaggedValue::Error(msg.clone()),
            (Some("custom"), Some(Value::Object(custom))) => {
                match (custom.get("name").and_then(Value::as_str), custom.get("value")) {
                    (Some(name), Some(value)) => TaggedValue::Custom {
                        name: name.to_string(),
                        value: Box::new(Self::from_wire(value)),
                    },
                    _ => TaggedValue::Error(format!("Malformed custom value: {raw}")),
                }
            }
            (Some(tag), Some(v)) if is_known_tag(tag) => TaggedValue::Error(format!(
                "Malformed {tag} value: {v}"
            )),
            (Some(tag), None) if is_known_tag(tag) => {
                TaggedValue::Error(format!("Missing payload for {tag} value"))
            }
            (Some(tag), _) => TaggedValue::Error(format!("Unknown tag: {tag}")),
            (None, _) => TaggedValue::Error(format!("Missing tag: {raw}")),
        }
    }
}

impl<'de> Deserialize<'de> for TaggedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(TaggedValue::from_wire(&raw))
    }
}

fn is_known_tag(tag: &str) -> bool {
    matches!(
        tag,
        "null" | "int" | "float" | "string" | "bool" | "sequence" | "mapping" | "timestamp"
            | "error" | "custom"
    )
}

fn malformed(tag: Tag, payload: &Value) -> TaggedValue {
    TaggedValue::Error(format!("Malformed {tag} value: {payload}"))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// A point in time the tagged walker encodes with the `timestamp` tag
///
/// Other serde formats see a plain RFC 3339 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(TIMESTAMP_TOKEN, &self.0)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        DateTime::<Utc>::deserialize(deserializer).map(Timestamp)
    }
}

/// Walk a value into its tagged form; a failure becomes an `error` leaf
pub fn to_tagged<T: Serialize + ?Sized>(value: &T) -> TaggedValue {
    value
        .serialize(TaggedSerializer)
        .unwrap_or_else(|e| TaggedValue::Error(e.0))
}

/// Failure inside the tagged walk. Never escapes [`to_tagged`].
#[derive(Debug)]
pub struct WalkError(String);

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for WalkError {}

impl ser::Error for WalkError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        WalkError(msg.to_string())
    }
}

fn unsupported(what: impl fmt::Display) -> WalkError {
    WalkError(format!("Unsupported type: {what}"))
}

/// Coerce a tagged mapping key to a string
fn key_to_string(key: TaggedValue) -> String {
    match key {
        TaggedValue::String(s) => s,
        TaggedValue::Int(i) => i.to_string(),
        TaggedValue::Float(f) => f.to_string(),
        TaggedValue::Bool(b) => b.to_string(),
        TaggedValue::Null => "null".to_string(),
        TaggedValue::Timestamp(ts) => format_timestamp(&ts),
        TaggedValue::Error(msg) => msg,
        composite => crate::digest::canonical_json(&composite.to_json()),
    }
}

struct TaggedSerializer;

impl ser::Serializer for TaggedSerializer {
    type Ok = TaggedValue;
    type Error = WalkError;
    type SerializeSeq = SeqWalker;
    type SerializeTuple = SeqWalker;
    type SerializeTupleStruct = SeqWalker;
    type SerializeTupleVariant = VariantSeqWalker;
    type SerializeMap = MapWalker;
    type SerializeStruct = MapWalker;
    type SerializeStructVariant = VariantMapWalker;

    fn serialize_bool(self, v: bool) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Int(v.into()))
    }

    fn serialize_i64(self, v: i64) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Int(v))
    }

    fn serialize_i128(self, v: i128) -> Result<TaggedValue, WalkError> {
        i64::try_from(v)
            .map(TaggedValue::Int)
            .map_err(|_| unsupported(format_args!("i128 value {v} exceeds i64 range")))
    }

    fn serialize_u8(self, v: u8) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Int(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Int(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Int(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<TaggedValue, WalkError> {
        i64::try_from(v)
            .map(TaggedValue::Int)
            .map_err(|_| unsupported(format_args!("u64 value {v} exceeds i64 range")))
    }

    fn serialize_u128(self, v: u128) -> Result<TaggedValue, WalkError> {
        i64::try_from(v)
            .map(TaggedValue::Int)
            .map_err(|_| unsupported(format_args!("u128 value {v} exceeds i64 range")))
    }

    fn serialize_f32(self, v: f32) -> Result<TaggedValue, WalkError> {
        self.serialize_f64(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<TaggedValue, WalkError> {
        if v.is_finite() {
            Ok(TaggedValue::Float(v))
        } else {
            Err(unsupported(format_args!("non-finite float {v}")))
        }
    }

    fn serialize_char(self, v: char) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Sequence(
            v.iter().map(|b| TaggedValue::Int(i64::from(*b))).collect(),
        ))
    }

    fn serialize_none(self) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<TaggedValue, WalkError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<TaggedValue, WalkError> {
        if name != TIMESTAMP_TOKEN {
            return value.serialize(self);
        }
        match value.serialize(TaggedSerializer)? {
            TaggedValue::String(s) => parse_timestamp(&s)
                .map(TaggedValue::Timestamp)
                .ok_or_else(|| WalkError(format!("Invalid timestamp: {s}"))),
            other => Err(WalkError(format!("Invalid timestamp payload: {}", other.tag()))),
        }
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Custom {
            name: variant.to_string(),
            value: Box::new(to_tagged(value)),
        })
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqWalker, WalkError> {
        Ok(SeqWalker {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqWalker, WalkError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqWalker, WalkError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantSeqWalker, WalkError> {
        Ok(VariantSeqWalker {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapWalker, WalkError> {
        Ok(MapWalker::default())
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<MapWalker, WalkError> {
        Ok(MapWalker::default())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<VariantMapWalker, WalkError> {
        Ok(VariantMapWalker {
            variant,
            entries: BTreeMap::new(),
        })
    }
}

struct SeqWalker {
    items: Vec<TaggedValue>,
}

impl ser::SerializeSeq for SeqWalker {
    type Ok = TaggedValue;
    type Error = WalkError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), WalkError> {
        self.items.push(to_tagged(value));
        Ok(())
    }

    fn end(self) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Sequence(self.items))
    }
}

impl ser::SerializeTuple for SeqWalker {
    type Ok = TaggedValue;
    type Error = WalkError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), WalkError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<TaggedValue, WalkError> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqWalker {
    type Ok = TaggedValue;
    type Error = WalkError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), WalkError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<TaggedValue, WalkError> {
        ser::SerializeSeq::end(self)
    }
}

struct VariantSeqWalker {
    variant: &'static str,
    items: Vec<TaggedValue>,
}

impl ser::SerializeTupleVariant for VariantSeqWalker {
    type Ok = TaggedValue;
    type Error = WalkError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), WalkError> {
        self.items.push(to_tagged(value));
        Ok(())
    }

    fn end(self) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Custom {
            name: self.variant.to_string(),
            value: Box::new(TaggedValue::Sequence(self.items)),
        })
    }
}

#[derive(Default)]
struct MapWalker {
    entries: BTreeMap<String, TaggedValue>,
    pending_key: Option<String>,
}

impl ser::SerializeMap for MapWalker {
    type Ok = TaggedValue;
    type Error = WalkError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), WalkError> {
        self.pending_key = Some(key_to_string(to_tagged(key)));
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), WalkError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| WalkError("map value serialized before its key".to_string()))?;
        self.entries.insert(key, to_tagged(value));
        Ok(())
    }

    fn end(self) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Mapping(self.entries))
    }
}

impl ser::SerializeStruct for MapWalker {
    type Ok = TaggedValue;
    type Error = WalkError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), WalkError> {
        self.entries.insert(key.to_string(), to_tagged(value));
        Ok(())
    }

    fn end(self) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Mapping(self.entries))
    }
}

struct VariantMapWalker {
    variant: &'static str,
    entries: BTreeMap<String, TaggedValue>,
}

impl ser::SerializeStructVariant for VariantMapWalker {
    type Ok = TaggedValue;
    type Error = WalkError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), WalkError> {
        self.entries.insert(key.to_string(), to_tagged(value));
        Ok(())
    }

    fn end(self) -> Result<TaggedValue, WalkError> {
        Ok(TaggedValue::Custom {
            name: self.variant.to_string(),
            value: Box::new(TaggedValue::Mapping(self.entries)),
        })
    }
}
