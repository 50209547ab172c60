//! Value codec.
//!
//! Integers (and floats with no fractional part) are encoded as their
//! decimal-ASCII representation, never pickled, so that the stored form
//! remains a valid argument to the driver's `INCRBY` and atomic
//! increment/decrement stay well-defined server-side. Everything else is
//! serialized with `bincode`, optionally zlib-compressed.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// What actually crosses the wire to a node: either the decimal text of an
/// integer, or an opaque (possibly compressed) byte blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedValue {
    Int(i64),
    Bytes(Vec<u8>),
}

impl EncodedValue {
    /// The bytes a driver should actually store.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            EncodedValue::Int(n) => n.to_string().into_bytes(),
            EncodedValue::Bytes(b) => b,
        }
    }
}

/// A value that can either be stored as a bare integer (to keep `INCRBY`
/// well-defined) or pickled like anything else.
pub trait AsCacheInt {
    /// Returns `Some(n)` if this value should be stored as the decimal
    /// integer `n` rather than pickled.
    fn as_cache_int(&self) -> Option<i64>;
}

impl AsCacheInt for i64 {
    fn as_cache_int(&self) -> Option<i64> {
        Some(*self)
    }
}

impl AsCacheInt for f64 {
    fn as_cache_int(&self) -> Option<i64> {
        if *self == self.floor() {
            Some(*self as i64)
        } else {
            None
        }
    }
}

/// Default: not an integer shortcut, always pickled.
macro_rules! not_an_int {
    ($t:ty) => {
        impl AsCacheInt for $t {
            fn as_cache_int(&self) -> Option<i64> {
                None
            }
        }
    };
}
not_an_int!(String);
not_an_int!(&str);
not_an_int!(Vec<u8>);

/// Encodes `value` for storage, per the policy above.
pub fn dumps<T>(value: &T, compress: bool) -> Result<EncodedValue>
where
    T: Serialize + AsCacheInt,
{
    if let Some(n) = value.as_cache_int() {
        return Ok(EncodedValue::Int(n));
    }
    let mut bytes = bincode::serialize(value)
        .map_err(|e| Error::PickleError(e.to_string()))?;
    if compress {
        bytes = zlib_compress(&bytes)?;
    }
    Ok(EncodedValue::Bytes(bytes))
}

/// Decodes a value previously written by [`dumps`].
///
/// `loads` tries parsing the raw bytes as an `i64` first, so integers
/// written by a server-side `INCRBY` round-trip through `get` without ever
/// going through the general codec path.
pub fn loads<T>(bytes: Option<&[u8]>, compress: bool) -> Result<Option<DecodedValue<T>>>
where
    T: DeserializeOwned,
{
    let bytes = match bytes {
        None => return Ok(None),
        Some(b) => b,
    };
    if let Ok(text) = std::str::from_utf8(bytes) {
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Some(DecodedValue::Int(n)));
        }
    }
    let raw = if compress {
        zlib_decompress(bytes)?
    } else {
        bytes.to_vec()
    };
    let value: T = bincode::deserialize(&raw).map_err(|e| Error::PickleError(e.to_string()))?;
    Ok(Some(DecodedValue::Value(value)))
}

/// Result of [`loads`]: either the integer fast path or a deserialized
/// value of the caller's requested type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedValue<T> {
    Int(i64),
    Value(T),
}

fn zlib_compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| Error::PickleError(e.to_string()))?;
    encoder.finish().map_err(|e| Error::PickleError(e.to_string()))
}

fn zlib_decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::PickleError(e.to_string()))?;
    Ok(out)
}
