//! # kvtxn codec
//!
//! Attribute values and their encodings for kvtxn.
//!
//! This crate provides:
//! - [`Value`] and [`Bins`], the typed attribute model shared by the store
//!   contract and the transaction log
//! - Canonical CBOR encoding of values (via `ciborium`)
//! - Fixed-width hex helpers used by record identity strings
//!
//! ## Usage
//!
//! ```
//! use kvtxn_codec::{from_cbor, to_cbor, Value};
//!
//! let value = Value::Integer(42);
//! let bytes = to_cbor(&value).unwrap();
//! let decoded = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
pub mod hex;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use value::{bins, Bins, Value};

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

impl Encode for Bins {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(&Value::Map(self.clone()))
    }
}

impl Decode for Bins {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        match from_cbor(bytes)? {
            Value::Map(m) => Ok(m),
            other => Err(CodecError::invalid_structure(format!(
                "expected a map of bins, found {}",
                other.kind()
            ))),
        }
    }
}
