//! Redis caching-collection layer for datakit
//!
//! Keys are namespaced per collection as `{database}({index}).{collection}[{id}]`.
//! Values go through a `Codec` (serializer + compressor, both pluggable at the
//! type level); primitives bypass the codec and keep their native Redis
//! representation so INCR/DECR stay usable.

pub mod codec;
pub mod collection;
pub mod database;
pub mod ttl;
pub mod value;

pub use codec::{Codec, Compressor, GzipCompressor, JsonCodec, JsonSerializer, NoopCompressor, Serializer};
pub use collection::RedisCollection;
pub use database::{RedisConfig, RedisDatabase};
pub use datakit_common::{DataKitError, Result};
pub use ttl::TimeToLive;
pub use value::{Json, StoreValue};
