//! Session helpers shared by the unit tests.

use std::any::Any;
use std::future::Future;
use std::io::Cursor;
use std::sync::Arc;

use cfgcache_types::Value;

use crate::codecs::bind_builtin_types;
use crate::context::{ReadContext, ReadSummary, SessionOptions, WriteContext, WriteSummary};
use crate::generic::{GenericCodec, ShapeTable};
use crate::memory::SharedBuffer;
use crate::registry::{BindingRegistry, BindingsBuilder};

pub(crate) fn registry_with(shapes: ShapeTable) -> Arc<BindingRegistry> {
    Arc::new(
        bind_builtin_types(BindingsBuilder::new()).build(Arc::new(GenericCodec::new(Arc::new(shapes)))),
    )
}

pub(crate) fn registry() -> Arc<BindingRegistry> {
    registry_with(ShapeTable::new())
}

pub(crate) async fn store_with(
    registry: &Arc<BindingRegistry>,
    options: SessionOptions,
    root: &Value,
) -> (Vec<u8>, WriteSummary) {
    let buffer = SharedBuffer::new();
    let mut ctx = WriteContext::new(buffer.clone(), registry.clone(), options);
    ctx.encode_root(root).await.unwrap();
    let summary = ctx.finish().await.unwrap();
    (buffer.contents(), summary)
}

pub(crate) async fn store(registry: &Arc<BindingRegistry>, root: &Value) -> (Vec<u8>, WriteSummary) {
    store_with(registry, SessionOptions::default(), root).await
}

pub(crate) async fn load(registry: &Arc<BindingRegistry>, bytes: Vec<u8>) -> (Value, ReadSummary) {
    let mut ctx = ReadContext::new(Cursor::new(bytes), registry.clone(), SessionOptions::default());
    let root = ctx.decode_root().await.unwrap();
    (root, ctx.finish())
}

/// Store `value` as the root and read it back.
pub(crate) async fn roundtrip<T: Any + Clone + Send + Sync>(value: T) -> T {
    let registry = registry();
    let (bytes, written) = store(&registry, &Value::new(value)).await;
    assert!(written.problems.is_empty(), "{:?}", written.problems);
    let (root, read) = load(&registry, bytes).await;
    assert!(read.problems.is_empty(), "{:?}", read.problems);
    root.cast::<T>().unwrap().clone()
}

/// Drive a session from a synchronous test (proptest bodies).
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}
