//! Built-in codecs.
//!
//! Each submodule exposes a `bind_*` function that appends its codecs to a
//! [`BindingsBuilder`]. The order of these calls is part of the wire format.

pub mod cell;
pub mod collections;
pub mod scalars;
pub mod time;

use std::sync::Arc;

use crate::registry::BindingsBuilder;

pub use cell::SharedCellCodec;
pub use collections::{bind_collection_types, ListCodec, MapCodec, StringSetCodec};
pub use scalars::{
    bind_scalar_types, BoolCodec, BytesCodec, CharCodec, F64Codec, I32Codec, I64Codec, PathCodec,
    StringCodec, U32Codec, U64Codec, U8Codec, UsizeCodec, UuidCodec,
};
pub use time::{bind_time_types, DateTimeCodec, DurationCodec, NaiveDateCodec, TimeDeltaCodec};

/// Every built-in codec: scalars, time values, containers, then shared cells.
pub fn bind_builtin_types(builder: BindingsBuilder) -> BindingsBuilder {
    let builder = bind_scalar_types(builder);
    let builder = bind_time_types(builder);
    let builder = bind_collection_types(builder);
    builder.bind_dyn(Arc::new(SharedCellCodec))
}
