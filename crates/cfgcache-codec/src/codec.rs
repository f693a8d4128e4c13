use std::any::{Any, TypeId};

use async_trait::async_trait;
use cfgcache_types::Value;

use crate::context::{ReadContext, WriteContext};
use crate::error::{DecodeResult, EncodeError, EncodeResult};

/// Encode/decode strategy for one concrete type.
///
/// Codecs are stateless and may recurse into other values through the
/// context. Payload bytes are written with `ctx.writer()` and read with
/// `ctx.reader()`; nested graph values go through `ctx.encode` /
/// `ctx.decode` so that they get identity tracking.
///
/// Contract for recoverable failures: `encode` returns
/// [`EncodeError::Rejected`] only before it has written anything, and
/// `decode` returns `DecodeError::Rejected` only after it has consumed its
/// whole payload.
#[async_trait]
pub trait Codec: Send + Sync + 'static {
    type Target: Any + Send + Sync;

    /// Stable name, part of the registry fingerprint.
    fn name(&self) -> &'static str;

    async fn encode(&self, ctx: &mut WriteContext, value: &Self::Target) -> EncodeResult<()>;

    async fn decode(&self, ctx: &mut ReadContext) -> DecodeResult<Self::Target>;
}

/// Type-erased codec as stored in the binding registry.
#[async_trait]
pub trait DynCodec: Send + Sync {
    fn name(&self) -> &str;

    /// Exact type this codec claims; `None` for the catch-all fallback.
    fn target(&self) -> Option<TypeId>;

    /// Whether `decode_value` publishes its instance through
    /// [`ReadContext::publish`] before decoding nested values. Only such
    /// objects may be the target of a reference cycle.
    fn publishes_early(&self) -> bool {
        false
    }

    async fn encode_value(&self, ctx: &mut WriteContext, value: &Value) -> EncodeResult<()>;

    async fn decode_value(&self, ctx: &mut ReadContext) -> DecodeResult<Value>;
}

/// Adapts a typed [`Codec`] into a [`DynCodec`].
pub struct TypedCodec<C> {
    codec: C,
}

impl<C: Codec> TypedCodec<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl<C: Codec> DynCodec for TypedCodec<C> {
    fn name(&self) -> &str {
        self.codec.name()
    }

    fn target(&self) -> Option<TypeId> {
        Some(TypeId::of::<C::Target>())
    }

    async fn encode_value(&self, ctx: &mut WriteContext, value: &Value) -> EncodeResult<()> {
        let typed = value.downcast_ref::<C::Target>().ok_or_else(|| {
            EncodeError::Rejected(format!(
                "codec `{}` cannot encode `{}`",
                self.codec.name(),
                value.type_name()
            ))
        })?;
        self.codec.encode(ctx, typed).await
    }

    async fn decode_value(&self, ctx: &mut ReadContext) -> DecodeResult<Value> {
        Ok(Value::new(self.codec.decode(ctx).await?))
    }
}
