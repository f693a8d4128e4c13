//! Codecs for the container shapes of a configuration graph.
//!
//! Elements are graph values and go through the context, so shared
//! elements keep their identity and failures are reported at the element's
//! position.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use cfgcache_types::Value;

use crate::codec::Codec;
use crate::context::{ReadContext, WriteContext};
use crate::error::{DecodeResult, EncodeResult, FormatError};
use crate::registry::BindingsBuilder;

// Upper bound for preallocation from a length read off the stream.
const MAX_PREALLOC: usize = 1024;

async fn read_len(ctx: &mut ReadContext, what: &str) -> DecodeResult<usize> {
    let raw = ctx.reader().read_varint().await?;
    usize::try_from(raw).map_err(|_| FormatError::OutOfRange(format!("{what} length {raw}")).into())
}

/// Ordered list of values.
#[derive(Clone, Copy, Debug, Default)]
pub struct ListCodec;

#[async_trait]
impl Codec for ListCodec {
    type Target = Vec<Value>;

    fn name(&self) -> &'static str {
        "list"
    }

    async fn encode(&self, ctx: &mut WriteContext, value: &Vec<Value>) -> EncodeResult<()> {
        ctx.writer().write_varint(value.len() as u64);
        for (index, element) in value.iter().enumerate() {
            ctx.encode_element(index, element).await?;
        }
        Ok(())
    }

    async fn decode(&self, ctx: &mut ReadContext) -> DecodeResult<Vec<Value>> {
        let len = read_len(ctx, "list").await?;
        let mut out = Vec::with_capacity(len.min(MAX_PREALLOC));
        for index in 0..len {
            out.push(ctx.decode_element(index).await?);
        }
        Ok(out)
    }
}

/// String-keyed map of values, in key order.
#[derive(Clone, Copy, Debug, Default)]
pub struct MapCodec;

#[async_trait]
impl Codec for MapCodec {
    type Target = BTreeMap<String, Value>;

    fn name(&self) -> &'static str {
        "map"
    }

    async fn encode(
        &self,
        ctx: &mut WriteContext,
        value: &BTreeMap<String, Value>,
    ) -> EncodeResult<()> {
        ctx.writer().write_varint(value.len() as u64);
        for (key, element) in value {
            ctx.writer().write_str(key);
            ctx.encode_entry(key, element).await?;
        }
        Ok(())
    }

    async fn decode(&self, ctx: &mut ReadContext) -> DecodeResult<BTreeMap<String, Value>> {
        let len = read_len(ctx, "map").await?;
        let mut out = BTreeMap::new();
        for _ in 0..len {
            let key = ctx.reader().read_string().await?;
            let element = ctx.decode_entry(&key).await?;
            if out.insert(key.clone(), element).is_some() {
                return Err(FormatError::Corrupt(format!("duplicate map key {key:?}")).into());
            }
        }
        Ok(out)
    }
}

/// Set of strings, in sorted order.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringSetCodec;

#[async_trait]
impl Codec for StringSetCodec {
    type Target = BTreeSet<String>;

    fn name(&self) -> &'static str {
        "string-set"
    }

    async fn encode(&self, ctx: &mut WriteContext, value: &BTreeSet<String>) -> EncodeResult<()> {
        let writer = ctx.writer();
        writer.write_varint(value.len() as u64);
        for item in value {
            writer.write_str(item);
        }
        Ok(())
    }

    async fn decode(&self, ctx: &mut ReadContext) -> DecodeResult<BTreeSet<String>> {
        let len = read_len(ctx, "set").await?;
        let mut out = BTreeSet::new();
        for _ in 0..len {
            let item = ctx.reader().read_string().await?;
            if !out.insert(item) {
                return Err(FormatError::Corrupt("duplicate set element".into()).into());
            }
        }
        Ok(out)
    }
}

/// Register the container codecs, in their canonical order.
pub fn bind_collection_types(builder: BindingsBuilder) -> BindingsBuilder {
    builder
        .bind(ListCodec)
        .bind(MapCodec)
        .bind(StringSetCodec)
}
