//! Fixed-type codecs for primitive values.

use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use crate::codec::Codec;
use crate::context::{ReadContext, WriteContext};
use crate::error::{DecodeResult, EncodeError, EncodeResult, FormatError};
use crate::registry::BindingsBuilder;

macro_rules! scalar_codec {
    (
        $(#[$meta:meta])*
        $codec:ident, $ty:ty, $name:literal,
        encode($w:ident, $v:ident) $enc:block,
        decode($r:ident) $dec:block
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default)]
        pub struct $codec;

        #[async_trait]
        impl Codec for $codec {
            type Target = $ty;

            fn name(&self) -> &'static str {
                $name
            }

            async fn encode(&self, ctx: &mut WriteContext, $v: &$ty) -> EncodeResult<()> {
                let $w = ctx.writer();
                $enc;
                Ok(())
            }

            async fn decode(&self, ctx: &mut ReadContext) -> DecodeResult<$ty> {
                let $r = ctx.reader();
                $dec
            }
        }
    };
}

fn out_of_range(what: &str, raw: impl std::fmt::Display) -> FormatError {
    FormatError::OutOfRange(format!("{raw} does not fit {what}"))
}

scalar_codec!(
    BoolCodec, bool, "bool",
    encode(w, v) { w.write_bool(*v); },
    decode(r) { r.read_bool().await }
);

scalar_codec!(
    U8Codec, u8, "u8",
    encode(w, v) { w.write_u8(*v); },
    decode(r) { r.read_u8().await }
);

scalar_codec!(
    I32Codec, i32, "i32",
    encode(w, v) { w.write_zigzag(i64::from(*v)); },
    decode(r) {
        let raw = r.read_zigzag().await?;
        Ok(i32::try_from(raw).map_err(|_| out_of_range("i32", raw))?)
    }
);

scalar_codec!(
    I64Codec, i64, "i64",
    encode(w, v) { w.write_zigzag(*v); },
    decode(r) { r.read_zigzag().await }
);

scalar_codec!(
    U32Codec, u32, "u32",
    encode(w, v) { w.write_small_int(*v); },
    decode(r) { r.read_small_int().await }
);

scalar_codec!(
    U64Codec, u64, "u64",
    encode(w, v) { w.write_varint(*v); },
    decode(r) { r.read_varint().await }
);

scalar_codec!(
    UsizeCodec, usize, "usize",
    encode(w, v) { w.write_varint(*v as u64); },
    decode(r) {
        let raw = r.read_varint().await?;
        Ok(usize::try_from(raw).map_err(|_| out_of_range("usize", raw))?)
    }
);

scalar_codec!(
    /// IEEE-754 bits, so NaN payloads and signed zeros survive.
    F64Codec, f64, "f64",
    encode(w, v) { w.write_f64(*v); },
    decode(r) { r.read_f64().await }
);

scalar_codec!(
    CharCodec, char, "char",
    encode(w, v) { w.write_small_int(u32::from(*v)); },
    decode(r) {
        let raw = r.read_small_int().await?;
        Ok(char::from_u32(raw)
            .ok_or_else(|| FormatError::Corrupt(format!("{raw:#x} is not a unicode scalar value")))?)
    }
);

scalar_codec!(
    StringCodec, String, "string",
    encode(w, v) { w.write_str(v); },
    decode(r) { r.read_string().await }
);

scalar_codec!(
    BytesCodec, Vec<u8>, "bytes",
    encode(w, v) { w.write_bytes(v); },
    decode(r) { r.read_bytes().await }
);

scalar_codec!(
    UuidCodec, Uuid, "uuid",
    encode(w, v) { w.write_raw(v.as_bytes()); },
    decode(r) {
        let mut raw = [0u8; 16];
        r.read_into(&mut raw).await?;
        Ok(Uuid::from_bytes(raw))
    }
);

/// Paths are stored as UTF-8 text; a path that is not valid UTF-8 is
/// rejected rather than stored lossily.
#[derive(Clone, Copy, Debug, Default)]
pub struct PathCodec;

#[async_trait]
impl Codec for PathCodec {
    type Target = PathBuf;

    fn name(&self) -> &'static str {
        "path"
    }

    async fn encode(&self, ctx: &mut WriteContext, value: &PathBuf) -> EncodeResult<()> {
        let text = value.to_str().ok_or_else(|| {
            EncodeError::Rejected(format!("path `{}` is not valid UTF-8", value.display()))
        })?;
        ctx.writer().write_str(text);
        Ok(())
    }

    async fn decode(&self, ctx: &mut ReadContext) -> DecodeResult<PathBuf> {
        Ok(PathBuf::from(ctx.reader().read_string().await?))
    }
}

/// Register the primitive codecs, in their canonical order.
pub fn bind_scalar_types(builder: BindingsBuilder) -> BindingsBuilder {
    builder
        .bind(BoolCodec)
        .bind(U8Codec)
        .bind(I32Codec)
        .bind(I64Codec)
        .bind(U32Codec)
        .bind(U64Codec)
        .bind(UsizeCodec)
        .bind(F64Codec)
        .bind(CharCodec)
        .bind(StringCodec)
        .bind(BytesCodec)
        .bind(PathCodec)
        .bind(UuidCodec)
}
