//! Per-type value encoding
//!
//! `StoreValue` decides how a type crosses the wire. Primitives keep their
//! canonical text or raw-byte form so Redis-side operations (INCRBY, APPEND)
//! still work on them; everything else opts in through the `Json<T>` wrapper,
//! which routes through the collection's codec.

use datakit_common::{DataKitError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{Codec, Compressor, Serializer};

/// How a value is encoded into and decoded from a cache payload
pub trait StoreValue: Sized + Send + Sync {
    fn to_payload<S: Serializer, C: Compressor>(&self, codec: &Codec<S, C>) -> Result<Vec<u8>>;
    fn from_payload<S: Serializer, C: Compressor>(
        codec: &Codec<S, C>,
        payload: &[u8],
    ) -> Result<Self>;
}

// Numeric and boolean types store their decimal/text form. Integers stay
// INCRBY/DECRBY-compatible this way.
macro_rules! text_store_value {
    ($($ty:ty),* $(,)?) => {$(
        impl StoreValue for $ty {
            fn to_payload<S: Serializer, C: Compressor>(
                &self,
                _codec: &Codec<S, C>,
            ) -> Result<Vec<u8>> {
                Ok(self.to_string().into_bytes())
            }

            fn from_payload<S: Serializer, C: Compressor>(
                _codec: &Codec<S, C>,
                payload: &[u8],
            ) -> Result<Self> {
                let text = std::str::from_utf8(payload).map_err(|e| {
                    DataKitError::Deserialization(format!(
                        "Payload is not valid UTF-8: {}",
                        e
                    ))
                })?;
                text.trim().parse::<$ty>().map_err(|e| {
                    DataKitError::Deserialization(format!(
                        "Cannot parse '{}' as {}: {}",
                        text,
                        stringify!($ty),
                        e
                    ))
                })
            }
        }
    )*};
}

text_store_value!(bool, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64);

impl StoreValue for String {
    fn to_payload<S: Serializer, C: Compressor>(&self, _codec: &Codec<S, C>) -> Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn from_payload<S: Serializer, C: Compressor>(
        _codec: &Codec<S, C>,
        payload: &[u8],
    ) -> Result<Self> {
        String::from_utf8(payload.to_vec())
            .map_err(|e| DataKitError::Deserialization(format!("Payload is not valid UTF-8: {}", e)))
    }
}

impl StoreValue for Vec<u8> {
    fn to_payload<S: Serializer, C: Compressor>(&self, _codec: &Codec<S, C>) -> Result<Vec<u8>> {
        Ok(self.clone())
    }

    fn from_payload<S: Serializer, C: Compressor>(
        _codec: &Codec<S, C>,
        payload: &[u8],
    ) -> Result<Self> {
        Ok(payload.to_vec())
    }
}

/// Routes any serde type through the collection's serializer + compressor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> StoreValue for Json<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn to_payload<S: Serializer, C: Compressor>(&self, codec: &Codec<S, C>) -> Result<Vec<u8>> {
        codec.encode(&self.0)
    }

    fn from_payload<S: Serializer, C: Compressor>(
        codec: &Codec<S, C>,
        payload: &[u8],
    ) -> Result<Self> {
        codec.decode(payload).map(Json)
    }
}
