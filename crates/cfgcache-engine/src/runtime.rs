use tokio::runtime::{Builder, Runtime};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};

/// Multi-threaded runtime whose workers have `worker_stack_size` bytes of
/// stack.
///
/// Encoding and decoding recurse once per nesting level of the graph, so
/// deep graphs need more stack than tokio's default. Run sessions on this
/// runtime's workers (`spawn`), not on the thread calling `block_on`.
pub fn build_runtime(config: &CacheConfig) -> CacheResult<Runtime> {
    config.validate()?;
    Builder::new_multi_thread()
        .thread_name("cfgcache-worker")
        .thread_stack_size(config.worker_stack_size)
        .enable_all()
        .build()
        .map_err(|e| CacheError::Config(format!("cannot build runtime: {e}")))
}
