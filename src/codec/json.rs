//! JSON codec for command bodies.
//!
//! Mirrors the three operations a command body needs: `encode` a value to text,
//! `decode` text into a registered payload type, and `convert` an already parsed
//! generic value (for example the `result` field of a sync reply) into a concrete type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// JSON codec for command bodies.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON text.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    /// Decode JSON text into `T`.
    #[inline]
    pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
        Ok(serde_json::from_str(text)?)
    }

    /// Convert a generic JSON value into `T`.
    #[inline]
    pub fn convert<T: DeserializeOwned>(value: Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize a value into a generic JSON value.
    #[inline]
    pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
        Ok(serde_json::to_value(value)?)
    }
}
