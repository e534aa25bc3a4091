//! Canonical CBOR encoding of [`Value`]s.
//!
//! Encoding goes through [`ciborium::Value`] so that the wire format is plain
//! RFC 8949 CBOR, readable by any CBOR tool. Output is deterministic:
//! - map keys are ordered length-first, then bytewise (RFC 8949 §4.2.1),
//! - integers use the shortest encoding (ciborium's default),
//! - floats are rejected on decode.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::{Integer, Value as Cbor};
use std::collections::BTreeMap;

/// Encode a value to canonical CBOR bytes.
///
/// # Errors
///
/// Returns an error if the underlying writer fails.
pub fn to_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(&to_ciborium(value), &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decode a value from CBOR bytes.
///
/// Tags are stripped; the tagged content is decoded in place.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR, contain floats,
/// integers outside the `i64` range, or maps with non-text keys.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let raw: Cbor = ciborium::de::from_reader(bytes)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    from_ciborium(raw)
}

fn to_ciborium(value: &Value) -> Cbor {
    match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Integer(n) => Cbor::Integer(Integer::from(*n)),
        Value::Bytes(b) => Cbor::Bytes(b.clone()),
        Value::Text(s) => Cbor::Text(s.clone()),
        Value::Array(items) => Cbor::Array(items.iter().map(to_ciborium).collect()),
        Value::Map(entries) => {
            let mut pairs: Vec<(&String, &Value)> = entries.iter().collect();
            // Text keys share a major type, so canonical order is length then bytes.
            pairs.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(b.0)));
            Cbor::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| (Cbor::Text(k.clone()), to_ciborium(v)))
                    .collect(),
            )
        }
    }
}

fn from_ciborium(raw: Cbor) -> CodecResult<Value> {
    match raw {
        Cbor::Null => Ok(Value::Null),
        Cbor::Bool(b) => Ok(Value::Bool(b)),
        Cbor::Integer(n) => i64::try_from(i128::from(n))
            .map(Value::Integer)
            .map_err(|_| CodecError::IntegerOverflow),
        Cbor::Bytes(b) => Ok(Value::Bytes(b)),
        Cbor::Text(s) => Ok(Value::Text(s)),
        Cbor::Float(_) => Err(CodecError::FloatForbidden),
        Cbor::Tag(_, inner) => from_ciborium(*inner),
        Cbor::Array(items) => items
            .into_iter()
            .map(from_ciborium)
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::Array),
        Cbor::Map(pairs) => {
            let mut out = BTreeMap::new();
            for (k, v) in pairs {
                let key = match k {
                    Cbor::Text(s) => s,
                    _ => return Err(CodecError::invalid_structure("map keys must be text")),
                };
                out.insert(key, from_ciborium(v)?);
            }
            Ok(Value::Map(out))
        }
        _ => Err(CodecError::decoding_failed("unsupported CBOR item")),
    }
}
