//! Per-session read and write contexts.
//!
//! Every value in the body is framed by a one-byte marker:
//!
//! ```text
//! 0x00                      null (also the placeholder for a value that failed)
//! 0x01 <varint id>          back-reference to an object written earlier
//! 0x02 <varint tag> <...>   fresh object: codec tag, then the codec's payload
//! ```

use std::sync::Arc;

use cfgcache_types::{Problem, ProblemPhase, ProblemReporter, PropertyTrace, TraceSegment, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DecodeError, DecodeResult, EncodeError, EncodeResult, FormatError};
use crate::header::{Compression, FeatureFlags, StreamHeader, HEADER_LEN};
use crate::identity::{ReadIdentityTable, WriteIdentityTable};
use crate::primitive::{PrimitiveReader, PrimitiveWriter};
use crate::registry::BindingRegistry;

const MARKER_NULL: u8 = 0x00;
const MARKER_REF: u8 = 0x01;
const MARKER_NEW: u8 = 0x02;

/// Settings fixed at the start of a session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub compression: Compression,
    /// Write buffer flush threshold, and read chunk size.
    pub buffer_size: usize,
    /// Abort the session once more problems than this were reported.
    pub max_problems: Option<usize>,
    pub cancel: CancellationToken,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            buffer_size: 64 * 1024,
            max_problems: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// What a completed write session produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub bytes_written: u64,
    pub objects_written: usize,
    pub references_written: u64,
    pub problems: Vec<Problem>,
}

impl WriteSummary {
    /// Some values were replaced by placeholders.
    pub fn is_degraded(&self) -> bool {
        !self.problems.is_empty()
    }
}

/// What a completed read session produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub bytes_read: u64,
    pub objects_read: usize,
    pub problems: Vec<Problem>,
}

impl ReadSummary {
    pub fn is_degraded(&self) -> bool {
        !self.problems.is_empty()
    }
}

/// Write half of a session.
pub struct WriteContext {
    writer: PrimitiveWriter,
    registry: Arc<BindingRegistry>,
    identities: WriteIdentityTable,
    problems: ProblemReporter,
    trace: PropertyTrace,
    options: SessionOptions,
    references: u64,
}

impl WriteContext {
    pub fn new<W>(sink: W, registry: Arc<BindingRegistry>, options: SessionOptions) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            writer: PrimitiveWriter::new(Box::new(sink), options.buffer_size),
            registry,
            identities: WriteIdentityTable::new(),
            problems: ProblemReporter::with_limit(options.max_problems),
            trace: PropertyTrace::new(),
            options,
            references: 0,
        }
    }

    /// Header this session writes.
    pub fn header(&self) -> StreamHeader {
        StreamHeader {
            version: self.registry.version(),
            flags: self.options.compression.flags(),
            fingerprint: self.registry.fingerprint(),
        }
    }

    /// Write the header, then the whole graph reachable from `root`.
    pub async fn encode_root(&mut self, root: &Value) -> EncodeResult<()> {
        let header = self.header();
        self.writer.write_raw(&header.to_bytes());
        if let Compression::Zstd { level } = self.options.compression {
            self.writer.start_compression(level).await?;
        }
        debug!(
            version = header.version,
            flags = header.flags.bits(),
            fingerprint = %header.fingerprint,
            "encoding root"
        );
        self.encode(root).await
    }

    /// Encode one value, recursing through its codec.
    pub async fn encode(&mut self, value: &Value) -> EncodeResult<()> {
        self.suspend().await?;

        let Some(type_id) = value.type_id() else {
            self.writer.write_u8(MARKER_NULL);
            return Ok(());
        };

        if let Some(known) = self.identities.lookup(value) {
            if !known.is_referenceable() {
                self.report_problem(format!(
                    "reference cycle through `{}` cannot be restored, cycles must pass through a SharedCell",
                    value.type_name()
                ))?;
                self.writer.write_u8(MARKER_NULL);
                return Ok(());
            }
            self.writer.write_u8(MARKER_REF);
            self.writer.write_small_int(known.id);
            self.references += 1;
            return Ok(());
        }

        let (tag, codec) = {
            let binding = self.registry.lookup_for_encode(type_id);
            (binding.tag(), Arc::clone(binding.codec()))
        };
        let mark = self.writer.mark();
        let problems_before = self.problems.len();
        let references_before = self.references;
        let id = self.identities.assign(value, codec.publishes_early());
        self.writer.write_u8(MARKER_NEW);
        self.writer.write_small_int(tag);

        match codec.encode_value(self, value).await {
            Ok(()) => {
                self.identities.complete(id);
                Ok(())
            }
            Err(EncodeError::Rejected(reason)) => {
                if !self.writer.rollback(mark) {
                    return Err(EncodeError::Unrecoverable {
                        location: self.trace.to_string(),
                        message: reason,
                    });
                }
                self.identities.truncate(id);
                self.problems.truncate(problems_before);
                self.references = references_before;
                self.record(
                    Problem::new(
                        ProblemPhase::Store,
                        self.trace.to_string(),
                        format!("`{}` was not stored", value.type_name()),
                    )
                    .with_cause(reason),
                )?;
                self.writer.write_u8(MARKER_NULL);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Encode a named field of a structured object.
    pub async fn encode_field(&mut self, name: &str, value: &Value) -> EncodeResult<()> {
        self.trace.push(TraceSegment::Field(name.to_string()));
        let result = self.encode(value).await;
        self.trace.pop();
        result
    }

    /// Encode an element of a sequence.
    pub async fn encode_element(&mut self, index: usize, value: &Value) -> EncodeResult<()> {
        self.trace.push(TraceSegment::Index(index));
        let result = self.encode(value).await;
        self.trace.pop();
        result
    }

    /// Encode the value stored under `key` in a map.
    pub async fn encode_entry(&mut self, key: &str, value: &Value) -> EncodeResult<()> {
        self.trace.push(TraceSegment::Key(key.to_string()));
        let result = self.encode(value).await;
        self.trace.pop();
        result
    }

    /// Encode the contents of a shared cell.
    pub async fn encode_cell(&mut self, value: &Value) -> EncodeResult<()> {
        self.trace.push(TraceSegment::Cell);
        let result = self.encode(value).await;
        self.trace.pop();
        result
    }

    /// Record a problem at the current trace location.
    pub fn report_problem(&mut self, message: impl Into<String>) -> EncodeResult<()> {
        self.record(Problem::new(
            ProblemPhase::Store,
            self.trace.to_string(),
            message,
        ))
    }

    fn record(&mut self, problem: Problem) -> EncodeResult<()> {
        self.problems.report(problem);
        if self.problems.limit_exceeded() {
            return Err(EncodeError::TooManyProblems(self.problems.len()));
        }
        Ok(())
    }

    /// Primitive writer for codec payloads.
    pub fn writer(&mut self) -> &mut PrimitiveWriter {
        &mut self.writer
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    pub fn trace(&self) -> &PropertyTrace {
        &self.trace
    }

    pub fn problems(&self) -> &[Problem] {
        self.problems.problems()
    }

    /// Flush everything to the sink and report what was written.
    pub async fn finish(self) -> EncodeResult<WriteSummary> {
        if self.options.cancel.is_cancelled() {
            return Err(EncodeError::Cancelled);
        }
        let objects_written = self.identities.len();
        let bytes_written = self.writer.finish().await?;
        Ok(WriteSummary {
            bytes_written,
            objects_written,
            references_written: self.references,
            problems: self.problems.into_problems(),
        })
    }

    async fn suspend(&mut self) -> EncodeResult<()> {
        if self.options.cancel.is_cancelled() {
            return Err(EncodeError::Cancelled);
        }
        if self.writer.should_flush() {
            self.writer.flush().await?;
        }
        Ok(())
    }
}

/// Read half of a session.
pub struct ReadContext {
    reader: PrimitiveReader,
    registry: Arc<BindingRegistry>,
    identities: ReadIdentityTable,
    problems: ProblemReporter,
    trace: PropertyTrace,
    options: SessionOptions,
    // Reserved id of the innermost object that has not published itself.
    publishing: Option<u32>,
}

impl ReadContext {
    pub fn new<R>(source: R, registry: Arc<BindingRegistry>, options: SessionOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            reader: PrimitiveReader::new(Box::new(source), options.buffer_size),
            registry,
            identities: ReadIdentityTable::new(),
            problems: ProblemReporter::with_limit(options.max_problems),
            trace: PropertyTrace::new(),
            options,
            publishing: None,
        }
    }

    /// Header a stream must carry to be readable by this session.
    pub fn expected_header(&self) -> StreamHeader {
        StreamHeader {
            version: self.registry.version(),
            flags: self.options.compression.flags(),
            fingerprint: self.registry.fingerprint(),
        }
    }

    /// Read the header without validating it.
    pub async fn read_header(&mut self) -> DecodeResult<StreamHeader> {
        let mut raw = [0u8; HEADER_LEN];
        match self.reader.read_into(&mut raw).await {
            Err(DecodeError::Format(FormatError::Truncated(_))) => {
                return Err(FormatError::Truncated("header").into());
            }
            other => other?,
        }
        Ok(StreamHeader::from_bytes(&raw)?)
    }

    /// Validate the header, then decode the root value. The stream must end
    /// exactly where the root value ends.
    pub async fn decode_root(&mut self) -> DecodeResult<Value> {
        let header = self.read_header().await?;
        header.validate(&self.expected_header())?;
        if header.flags.contains(FeatureFlags::COMPRESSED) {
            self.reader.start_decompression()?;
        }
        debug!(version = header.version, fingerprint = %header.fingerprint, "decoding root");

        let root = self.decode().await?;
        if !self.reader.is_at_end().await? {
            return Err(FormatError::TrailingBytes.into());
        }
        Ok(root)
    }

    /// Decode one value, recursing through its codec.
    pub async fn decode(&mut self) -> DecodeResult<Value> {
        if self.options.cancel.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }
        match self.reader.read_u8().await? {
            MARKER_NULL => Ok(Value::null()),
            MARKER_REF => {
                let id = self.reader.read_small_int().await?;
                Ok(self.identities.resolve(id)?)
            }
            MARKER_NEW => self.decode_fresh().await,
            other => Err(FormatError::InvalidMarker(other).into()),
        }
    }

    async fn decode_fresh(&mut self) -> DecodeResult<Value> {
        let tag = self.reader.read_small_int().await?;
        let codec = Arc::clone(self.registry.lookup_for_decode(tag)?.codec());

        let id = self.identities.reserve();
        let outer = self.publishing.replace(id);
        let result = codec.decode_value(self).await;
        self.publishing = outer;

        match result {
            Ok(value) => {
                self.identities.finalize(id, value.clone());
                Ok(value)
            }
            Err(DecodeError::Rejected(reason)) => {
                self.identities.finalize(id, Value::null());
                self.record(
                    Problem::new(
                        ProblemPhase::Load,
                        self.trace.to_string(),
                        format!("`{}` value was not restored", codec.name()),
                    )
                    .with_cause(reason),
                )?;
                Ok(Value::null())
            }
            Err(err) => Err(err),
        }
    }

    /// Make `value` the instance for the object currently being decoded,
    /// before its nested values are read.
    pub fn publish(&mut self, value: &Value) {
        if let Some(id) = self.publishing.take() {
            self.identities.publish(id, value.clone());
        }
    }

    pub async fn decode_field(&mut self, name: &str) -> DecodeResult<Value> {
        self.trace.push(TraceSegment::Field(name.to_string()));
        let result = self.decode().await;
        self.trace.pop();
        result
    }

    pub async fn decode_element(&mut self, index: usize) -> DecodeResult<Value> {
        self.trace.push(TraceSegment::Index(index));
        let result = self.decode().await;
        self.trace.pop();
        result
    }

    pub async fn decode_entry(&mut self, key: &str) -> DecodeResult<Value> {
        self.trace.push(TraceSegment::Key(key.to_string()));
        let result = self.decode().await;
        self.trace.pop();
        result
    }

    pub async fn decode_cell(&mut self) -> DecodeResult<Value> {
        self.trace.push(TraceSegment::Cell);
        let result = self.decode().await;
        self.trace.pop();
        result
    }

    pub fn report_problem(&mut self, message: impl Into<String>) -> DecodeResult<()> {
        self.record(Problem::new(
            ProblemPhase::Load,
            self.trace.to_string(),
            message,
        ))
    }

    fn record(&mut self, problem: Problem) -> DecodeResult<()> {
        self.problems.report(problem);
        if self.problems.limit_exceeded() {
            return Err(DecodeError::TooManyProblems(self.problems.len()));
        }
        Ok(())
    }

    /// Primitive reader for codec payloads.
    pub fn reader(&mut self) -> &mut PrimitiveReader {
        &mut self.reader
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    pub fn trace(&self) -> &PropertyTrace {
        &self.trace
    }

    pub fn problems(&self) -> &[Problem] {
        self.problems.problems()
    }

    pub fn finish(self) -> ReadSummary {
        ReadSummary {
            bytes_read: self.reader.bytes_read(),
            objects_read: self.identities.len(),
            problems: self.problems.into_problems(),
        }
    }
}
