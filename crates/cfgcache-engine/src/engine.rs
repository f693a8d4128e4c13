use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use cfgcache_codec::{
    BindingRegistry, ReadContext, ReadSummary, SessionOptions, ShapeTable, SharedBuffer,
    StreamHeader, WriteContext, WriteSummary,
};
use cfgcache_types::{Problem, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::registry::default_registry;

/// Result of a completed store.
#[derive(Clone, Debug)]
pub struct StoreOutcome {
    pub summary: WriteSummary,
    /// Present when the store ran in `discard_after_store` mode: the stream
    /// was verified in memory and never written to its destination.
    pub verification: Option<RoundtripReport>,
}

impl StoreOutcome {
    pub fn problems(&self) -> &[Problem] {
        &self.summary.problems
    }

    pub fn is_degraded(&self) -> bool {
        self.summary.is_degraded()
    }

    pub fn was_discarded(&self) -> bool {
        self.verification.is_some()
    }
}

/// Result of a completed load.
#[derive(Clone, Debug)]
pub struct LoadOutcome {
    pub root: Value,
    pub summary: ReadSummary,
}

impl LoadOutcome {
    pub fn problems(&self) -> &[Problem] {
        &self.summary.problems
    }

    pub fn is_degraded(&self) -> bool {
        self.summary.is_degraded()
    }
}

/// Store, reload and store again, all in memory.
#[derive(Clone, Debug)]
pub struct RoundtripReport {
    pub stored: WriteSummary,
    pub loaded: ReadSummary,
    pub stream_len: usize,
    /// The reloaded graph encodes to exactly the same bytes.
    pub deterministic: bool,
}

/// Runs store and load sessions against one registry and configuration.
///
/// Sessions are independent: one engine can serve any number of concurrent
/// stores and loads, which share only the immutable registry.
pub struct CacheEngine {
    registry: Arc<BindingRegistry>,
    config: CacheConfig,
    cancel: CancellationToken,
}

impl CacheEngine {
    pub fn new(registry: Arc<BindingRegistry>, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        debug!(
            bindings = registry.len(),
            fingerprint = %registry.fingerprint(),
            "cache engine created"
        );
        Ok(Self {
            registry,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Engine over the canonical registry with `shapes` for the generic codec.
    pub fn with_shapes(shapes: ShapeTable, config: CacheConfig) -> CacheResult<Self> {
        Self::new(default_registry(shapes), config)
    }

    /// Use `cancel` to stop every session this engine runs.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Header of every stream this engine writes, and the only header it
    /// accepts on load.
    pub fn expected_header(&self) -> StreamHeader {
        StreamHeader {
            version: self.registry.version(),
            flags: self.config.compression.flags(),
            fingerprint: self.registry.fingerprint(),
        }
    }

    fn options(&self) -> SessionOptions {
        self.config.session_options(self.cancel.clone())
    }

    /// Encode the graph under `root` into `sink`.
    pub async fn store<W>(&self, root: &Value, sink: W) -> CacheResult<StoreOutcome>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let started = Instant::now();
        let mut ctx = WriteContext::new(sink, self.registry.clone(), self.options());
        if let Err(err) = ctx.encode_root(root).await {
            warn!(error = %err, "configuration cache store failed");
            return Err(err.into());
        }
        let summary = ctx.finish().await?;
        info!(
            bytes = summary.bytes_written,
            objects = summary.objects_written,
            references = summary.references_written,
            problems = summary.problems.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "configuration cache stored"
        );
        Ok(StoreOutcome {
            summary,
            verification: None,
        })
    }

    /// Decode a graph from `source`.
    pub async fn load<R>(&self, source: R) -> CacheResult<LoadOutcome>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let started = Instant::now();
        let mut ctx = ReadContext::new(source, self.registry.clone(), self.options());
        let root = match ctx.decode_root().await {
            Ok(root) => root,
            Err(err) => {
                warn!(error = %err, "configuration cache load failed");
                return Err(err.into());
            }
        };
        let summary = ctx.finish();
        info!(
            bytes = summary.bytes_read,
            objects = summary.objects_read,
            problems = summary.problems.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "configuration cache loaded"
        );
        Ok(LoadOutcome { root, summary })
    }

    /// Store into the file at `path`, creating or truncating it.
    ///
    /// With `discard_after_store` the file is not touched; the graph is
    /// verified in memory instead, and a graph that does not re-encode to
    /// the same bytes is a [`CacheError::Verification`].
    pub async fn store_to_path(&self, root: &Value, path: &Path) -> CacheResult<StoreOutcome> {
        if self.config.discard_after_store {
            let report = self.verify_roundtrip(root).await?;
            if !report.deterministic {
                return Err(CacheError::Verification(format!(
                    "{} byte stream re-encoded differently after reload",
                    report.stream_len
                )));
            }
            info!(path = %path.display(), "discard_after_store set, cache entry not written");
            return Ok(StoreOutcome {
                summary: report.stored.clone(),
                verification: Some(report),
            });
        }
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|source| CacheError::File {
                path: path.to_path_buf(),
                source,
            })?;
        self.store(root, file).await
    }

    pub async fn load_from_path(&self, path: &Path) -> CacheResult<LoadOutcome> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| CacheError::File {
                path: path.to_path_buf(),
                source,
            })?;
        self.load(file).await
    }

    /// Store `root` in memory, load it back, and store the loaded graph
    /// again, reporting whether both streams are identical.
    pub async fn verify_roundtrip(&self, root: &Value) -> CacheResult<RoundtripReport> {
        let first = SharedBuffer::new();
        let stored = self.store(root, first.clone()).await?.summary;
        let bytes = first.contents();

        let loaded = self.load(Cursor::new(bytes.clone())).await?;

        let second = SharedBuffer::new();
        self.store(&loaded.root, second.clone()).await?;
        let deterministic = second.contents() == bytes;
        if !deterministic {
            warn!(
                first = bytes.len(),
                second = second.len(),
                "reloaded graph encodes differently"
            );
        }

        Ok(RoundtripReport {
            stored,
            loaded: loaded.summary,
            stream_len: bytes.len(),
            deterministic,
        })
    }

    /// Read a stream's header without validating it or touching the body.
    pub async fn read_header<R>(&self, source: R) -> CacheResult<StreamHeader>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut ctx = ReadContext::new(source, self.registry.clone(), self.options());
        Ok(ctx.read_header().await?)
    }

    /// Check whether a stream with `header` can be loaded by this engine.
    pub fn check_header(&self, header: &StreamHeader) -> CacheResult<()> {
        header
            .validate(&self.expected_header())
            .map_err(|e| CacheError::Decode(e.into()))
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
