//! Argument serialization and envelope splitting.
//!
//! Arguments travel as JSON text. Values the embedder cannot serialize by
//! value (entity handles and the like) pass through a [`RefCodec`], which
//! swaps them for a stub on the way out and resolves the stub on the way in.
//! The text is then cut into `chunk_size`-character slices, one per envelope.

use serde_json::{Map, Value};

use crate::envelope::{Envelope, Header};
use crate::error::Result;

/// Object key wrapping an encoded reference stub.
pub const REF_MARKER: &str = "__ref";

/// Object key wrapping a user object that would otherwise read as a marker.
pub const LITERAL_MARKER: &str = "__lit";

/// Converts embedder-specific references to and from serializable stubs.
pub trait RefCodec: Send + Sync + 'static {
    /// Return a stub for `value` if it is a reference, `None` to serialize it
    /// as-is.
    fn encode_ref(&self, value: &Value) -> Option<Value>;

    /// Resolve a stub produced by the remote `encode_ref`. `None` means the
    /// referent no longer exists; it decodes as null.
    fn decode_ref(&self, stub: &Value) -> Option<Value>;
}

/// Codec that treats every value as plain data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRefs;

impl RefCodec for NoRefs {
    fn encode_ref(&self, _value: &Value) -> Option<Value> {
        None
    }

    fn decode_ref(&self, _stub: &Value) -> Option<Value> {
        None
    }
}

/// Serialize call arguments or a result to wire text.
pub fn serialize_args(value: &Value, refs: &dyn RefCodec) -> Result<String> {
    Ok(serde_json::to_string(&to_wire(value, refs))?)
}

/// Parse wire text back into a value, resolving reference stubs.
pub fn deserialize_args(text: &str, refs: &dyn RefCodec) -> Result<Value> {
    let value: Value = serde_json::from_str(text)?;
    Ok(from_wire(value, refs))
}

fn to_wire(value: &Value, refs: &dyn RefCodec) -> Value {
    if let Some(stub) = refs.encode_ref(value) {
        return wrap(REF_MARKER, stub);
    }
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| to_wire(v, refs)).collect()),
        Value::Object(map) => {
            let object = Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), to_wire(v, refs)))
                    .collect(),
            );
            if is_marked(map) {
                wrap(LITERAL_MARKER, object)
            } else {
                object
            }
        }
        other => other.clone(),
    }
}

fn from_wire(value: Value, refs: &dyn RefCodec) -> Value {
    match value {
        Value::Object(mut map) if is_marked(&map) => {
            if let Some(stub) = map.remove(REF_MARKER) {
                return refs.decode_ref(&stub).unwrap_or(Value::Null);
            }
            match map.remove(LITERAL_MARKER) {
                // The literal's own keys are data, not markers.
                Some(Value::Object(literal)) => Value::Object(
                    literal
                        .into_iter()
                        .map(|(k, v)| (k, from_wire(v, refs)))
                        .collect(),
                ),
                Some(other) => from_wire(other, refs),
                None => Value::Null,
            }
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, from_wire(v, refs)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| from_wire(v, refs)).collect())
        }
        other => other,
    }
}

/// A single-key object whose key is one of the codec's markers.
fn is_marked(map: &Map<String, Value>) -> bool {
    map.len() == 1 && (map.contains_key(REF_MARKER) || map.contains_key(LITERAL_MARKER))
}

fn wrap(marker: &str, inner: Value) -> Value {
    let mut wrapped = Map::with_capacity(1);
    wrapped.insert(marker.to_string(), inner);
    Value::Object(wrapped)
}

/// Split `text` into slices of at most `limit` characters.
///
/// Always yields at least one slice, so an empty payload still travels.
pub fn split_chars(text: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let mut parts = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == limit {
            parts.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    parts.push(&text[start..]);
    parts
}

/// Build the envelopes carrying one logical message.
///
/// `chunk_size` of `None` sends the payload whole, for transports that do not
/// guarantee ordered delivery.
pub fn encode(header: &Header, payload: Option<&str>, chunk_size: Option<usize>) -> Vec<Envelope> {
    let Some(payload) = payload else {
        return vec![header.envelope(1, 1, None)];
    };
    let slices = match chunk_size {
        Some(limit) => split_chars(payload, limit),
        None => vec![payload],
    };
    let total = slices.len() as u32;
    slices
        .into_iter()
        .zip(1..)
        .map(|(slice, part)| header.envelope(part, total, Some(slice.to_string())))
        .collect()
}
