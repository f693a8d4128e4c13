//! Binary codec engine for cfgcache.
//!
//! Serializes a graph of [`Value`]s to an async byte stream and back,
//! preserving shared references and closing cycles through
//! [`SharedCell`]s.
//!
//! # Architecture
//!
//! - **Header** (`CFGC`): magic, schema version, feature flags, registry fingerprint
//! - **BindingRegistry**: codecs in registration order; the position is the wire tag
//! - **WriteContext / ReadContext**: one session each, with identity tables and a problem reporter
//! - **GenericCodec**: catch-all for [`Describable`] types registered in a [`ShapeTable`]
//! - **PrimitiveWriter / PrimitiveReader**: varints, zig-zag, strings, optional zstd body
//!
//! Values that cannot be encoded or rebuilt become [`Problem`]s and a null
//! placeholder; everything else about the stream stays intact.
//!
//! [`Value`]: cfgcache_types::Value
//! [`SharedCell`]: cfgcache_types::SharedCell
//! [`Problem`]: cfgcache_types::Problem

pub mod codec;
pub mod codecs;
pub mod context;
pub mod error;
pub mod generic;
pub mod header;
pub mod identity;
pub mod memory;
pub mod primitive;
pub mod registry;

#[cfg(test)]
mod testing;

pub use codec::{Codec, DynCodec, TypedCodec};
pub use codecs::bind_builtin_types;
pub use context::{ReadContext, ReadSummary, SessionOptions, WriteContext, WriteSummary};
pub use error::{
    DecodeError, DecodeResult, EncodeError, EncodeResult, FormatError, FormatResult, ShapeError,
};
pub use generic::{Describable, Field, Fields, GenericCodec, ShapeTable};
pub use header::{
    Compression, FeatureFlags, SchemaFingerprint, StreamHeader, ENGINE_VERSION, HEADER_LEN, MAGIC,
};
pub use memory::SharedBuffer;
pub use primitive::{PrimitiveReader, PrimitiveWriter};
pub use registry::{Binding, BindingRegistry, BindingsBuilder};
