//! Key and value serializers.
//!
//! A [`Serializer<T>`] turns a caller's key or value into the bytes that go
//! on the wire. The producer is generic over its key and value types and is
//! bound to one serializer for each at build time, so a mismatch between the
//! value type and its encoding is a compile error rather than a runtime type
//! inspection. Serializers may still reject individual values (invalid UTF-8
//! policies, JSON maps with non-string keys, size limits, ...); such failures
//! are reported on the record's delivery future without touching the
//! pipeline.

use bytes::Bytes;
use serde::Serialize;
use std::marker::PhantomData;

use crate::error::{ClientError, Result};

/// Stateless conversion of a `T` into encoded bytes.
pub trait Serializer<T: ?Sized>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<Bytes>;
}

impl<T, F> Serializer<T> for F
where
    T: ?Sized,
    F: Fn(&T) -> Result<Bytes> + Send + Sync,
{
    fn serialize(&self, value: &T) -> Result<Bytes> {
        self(value)
    }
}

/// Passes raw bytes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer<Bytes> for BytesSerializer {
    fn serialize(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }
}

impl Serializer<Vec<u8>> for BytesSerializer {
    fn serialize(&self, value: &Vec<u8>) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(value))
    }
}

/// Encodes text as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl Serializer<String> for StringSerializer {
    fn serialize(&self, value: &String) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl Serializer<str> for StringSerializer {
    fn serialize(&self, value: &str) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }
}

/// Encodes any `serde::Serialize` value as JSON.
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn(&T)>,
}

impl<T> JsonSerializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonSerializer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonSerializer")
    }
}

impl<T: Serialize> Serializer<T> for JsonSerializer<T> {
    fn serialize(&self, value: &T) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| ClientError::SerializationError(e.to_string()))
    }
}
