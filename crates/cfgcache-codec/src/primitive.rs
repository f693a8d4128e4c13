//! Byte-level encoding of scalars over an async sink or source.
//!
//! Writes go to an in-memory buffer and only reach the sink on [`flush`];
//! reads refill from the source on demand. These are the only points at
//! which a session suspends.
//!
//! [`flush`]: PrimitiveWriter::flush

use std::io::Write;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{DecodeResult, FormatError};

/// Boxed byte sink accepted by a [`PrimitiveWriter`].
pub type ByteSink = Box<dyn AsyncWrite + Unpin + Send>;

/// Boxed byte source accepted by a [`PrimitiveReader`].
pub type ByteSource = Box<dyn AsyncRead + Unpin + Send>;

/// Position in the write buffer that can be rolled back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteMark {
    buffered: usize,
    flushes: u64,
}

/// Buffered writer of primitive values.
pub struct PrimitiveWriter {
    sink: ByteSink,
    buffer: Vec<u8>,
    capacity: usize,
    compressor: Option<zstd::stream::write::Encoder<'static, Vec<u8>>>,
    flushes: u64,
    bytes_written: u64,
}

impl PrimitiveWriter {
    /// Create a writer that flushes once `capacity` bytes are buffered.
    pub fn new(sink: ByteSink, capacity: usize) -> Self {
        Self {
            sink,
            buffer: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            compressor: None,
            flushes: 0,
            bytes_written: 0,
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    /// Unsigned LEB128.
    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value > 0 {
                byte |= 0x80;
            }
            self.buffer.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    /// Zig-zag encoded signed varint.
    pub fn write_zigzag(&mut self, value: i64) {
        self.write_varint(((value << 1) ^ (value >> 63)) as u64);
    }

    /// Varint for values known to fit in 32 bits (lengths, tags, nanos).
    pub fn write_small_int(&mut self, value: u32) {
        self.write_varint(u64::from(value));
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    /// Length-prefixed byte block.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    /// Length-prefixed UTF-8.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Bytes without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Remember the current position for a later [`rollback`](Self::rollback).
    pub fn mark(&self) -> WriteMark {
        WriteMark {
            buffered: self.buffer.len(),
            flushes: self.flushes,
        }
    }

    /// Discard everything written since `mark`.
    ///
    /// Returns `false` (and changes nothing) if a flush happened in between.
    pub fn rollback(&mut self, mark: WriteMark) -> bool {
        if mark.flushes != self.flushes || mark.buffered > self.buffer.len() {
            return false;
        }
        self.buffer.truncate(mark.buffered);
        true
    }

    /// Returns `true` when the buffer has reached its flush threshold.
    pub fn should_flush(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    /// Number of bytes waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes handed to the sink so far (after compression).
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush buffered bytes raw, then compress everything written afterwards.
    pub async fn start_compression(&mut self, level: i32) -> std::io::Result<()> {
        self.flush().await?;
        self.compressor = Some(zstd::stream::write::Encoder::new(Vec::new(), level)?);
        Ok(())
    }

    /// Hand buffered bytes to the sink.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        match self.compressor.as_mut() {
            Some(encoder) => {
                encoder.write_all(&self.buffer)?;
                let compressed = std::mem::take(encoder.get_mut());
                self.write_to_sink(&compressed).await?;
            }
            None => {
                let raw = std::mem::take(&mut self.buffer);
                self.write_to_sink(&raw).await?;
                self.buffer = raw;
            }
        }
        self.buffer.clear();
        self.flushes += 1;
        Ok(())
    }

    /// Flush everything, end the compressed frame, and flush the sink.
    /// Returns the total number of bytes written to the sink.
    pub async fn finish(mut self) -> std::io::Result<u64> {
        self.flush().await?;
        if let Some(encoder) = self.compressor.take() {
            let tail = encoder.finish()?;
            self.write_to_sink(&tail).await?;
        }
        self.sink.flush().await?;
        Ok(self.bytes_written)
    }

    async fn write_to_sink(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.sink.write_all(bytes).await?;
        self.bytes_written += bytes.len() as u64;
        debug!(bytes = bytes.len(), total = self.bytes_written, "flushed to sink");
        Ok(())
    }
}

/// Buffered reader of primitive values.
pub struct PrimitiveReader {
    source: ByteSource,
    buffer: Vec<u8>,
    pos: usize,
    chunk: Vec<u8>,
    decompressor: Option<zstd::stream::write::Decoder<'static, Vec<u8>>>,
    eof: bool,
    bytes_read: u64,
}

/// Feed compressed bytes through `decoder`, appending the output to `out`.
/// A decoder failure means the body is not valid zstd.
fn inflate(
    decoder: &mut zstd::stream::write::Decoder<'static, Vec<u8>>,
    input: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), FormatError> {
    decoder
        .write_all(input)
        .and_then(|()| decoder.flush())
        .map_err(|err| FormatError::Corrupt(format!("compressed body: {err}")))?;
    out.append(decoder.get_mut());
    Ok(())
}

impl PrimitiveReader {
    /// Create a reader that pulls `chunk_size` bytes at a time from `source`.
    pub fn new(source: ByteSource, chunk_size: usize) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            pos: 0,
            chunk: vec![0; chunk_size.max(1)],
            decompressor: None,
            eof: false,
            bytes_read: 0,
        }
    }

    /// Treat everything after the current position as a zstd stream.
    pub fn start_decompression(&mut self) -> DecodeResult<()> {
        let mut decoder = zstd::stream::write::Decoder::new(Vec::new())?;
        let pending = self.buffer.split_off(self.pos);
        self.buffer.clear();
        self.pos = 0;
        if !pending.is_empty() {
            inflate(&mut decoder, &pending, &mut self.buffer)?;
        }
        self.decompressor = Some(decoder);
        Ok(())
    }

    /// Make at least one byte available. Returns `false` at end of stream.
    async fn fill(&mut self) -> DecodeResult<bool> {
        while self.pos >= self.buffer.len() {
            if self.eof {
                return Ok(false);
            }
            self.buffer.clear();
            self.pos = 0;
            let n = self.source.read(&mut self.chunk).await?;
            self.bytes_read += n as u64;
            if n == 0 {
                self.eof = true;
                continue;
            }
            match self.decompressor.as_mut() {
                Some(decoder) => inflate(decoder, &self.chunk[..n], &mut self.buffer)?,
                None => self.buffer.extend_from_slice(&self.chunk[..n]),
            }
        }
        Ok(true)
    }

    /// Returns `true` if the source is exhausted at the current position.
    pub async fn is_at_end(&mut self) -> DecodeResult<bool> {
        Ok(!self.fill().await?)
    }

    pub async fn read_u8(&mut self) -> DecodeResult<u8> {
        if !self.fill().await? {
            return Err(FormatError::Truncated("byte").into());
        }
        let byte = self.buffer[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    pub async fn read_bool(&mut self) -> DecodeResult<bool> {
        match self.read_u8().await? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(FormatError::Corrupt(format!("invalid bool byte {other:#04x}")).into()),
        }
    }

    pub async fn read_varint(&mut self) -> DecodeResult<u64> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8().await?;
            if shift == 63 && byte > 1 {
                return Err(FormatError::VarintOverflow.into());
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(FormatError::VarintOverflow.into());
            }
        }
    }

    pub async fn read_zigzag(&mut self) -> DecodeResult<i64> {
        let raw = self.read_varint().await?;
        Ok((raw >> 1) as i64 ^ -((raw & 1) as i64))
    }

    pub async fn read_small_int(&mut self) -> DecodeResult<u32> {
        let raw = self.read_varint().await?;
        u32::try_from(raw).map_err(|_| FormatError::OutOfRange(format!("{raw} exceeds u32")).into())
    }

    pub async fn read_f64(&mut self) -> DecodeResult<f64> {
        let mut raw = [0u8; 8];
        self.read_into(&mut raw).await?;
        Ok(f64::from_bits(u64::from_le_bytes(raw)))
    }

    /// Length-prefixed byte block.
    pub async fn read_bytes(&mut self) -> DecodeResult<Vec<u8>> {
        let len = self.read_varint().await?;
        let len = usize::try_from(len)
            .map_err(|_| FormatError::OutOfRange(format!("block length {len}")))?;
        // Length comes from the stream: grow as data arrives instead of
        // trusting it for the allocation.
        let mut out = Vec::with_capacity(len.min(64 * 1024));
        while out.len() < len {
            if !self.fill().await? {
                return Err(FormatError::Truncated("byte block").into());
            }
            let take = (len - out.len()).min(self.buffer.len() - self.pos);
            out.extend_from_slice(&self.buffer[self.pos..self.pos + take]);
            self.pos += take;
        }
        Ok(out)
    }

    /// Length-prefixed UTF-8.
    pub async fn read_string(&mut self) -> DecodeResult<String> {
        let bytes = self.read_bytes().await?;
        String::from_utf8(bytes).map_err(|_| FormatError::InvalidUtf8.into())
    }

    /// Fill `out` completely.
    pub async fn read_into(&mut self, out: &mut [u8]) -> DecodeResult<()> {
        let mut filled = 0;
        while filled < out.len() {
            if !self.fill().await? {
                return Err(FormatError::Truncated("fixed-size field").into());
            }
            let take = (out.len() - filled).min(self.buffer.len() - self.pos);
            out[filled..filled + take].copy_from_slice(&self.buffer[self.pos..self.pos + take]);
            self.pos += take;
            filled += take;
        }
        Ok(())
    }

    /// Raw bytes pulled from the source so far (before decompression).
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::memory::SharedBuffer;

    fn reader_over(bytes: Vec<u8>, chunk: usize) -> PrimitiveReader {
        PrimitiveReader::new(Box::new(std::io::Cursor::new(bytes)), chunk)
    }

    async fn written(f: impl FnOnce(&mut PrimitiveWriter)) -> Vec<u8> {
        let buffer = SharedBuffer::new();
        let mut writer = PrimitiveWriter::new(Box::new(buffer.clone()), 16);
        f(&mut writer);
        writer.finish().await.unwrap();
        buffer.contents()
    }

    #[tokio::test]
    async fn varint_encoding_sizes() {
        assert_eq!(written(|w| w.write_varint(0)).await, [0x00]);
        assert_eq!(written(|w| w.write_varint(127)).await, [0x7F]);
        assert_eq!(written(|w| w.write_varint(128)).await, [0x80, 0x01]);
        assert_eq!(written(|w| w.write_varint(u64::MAX)).await.len(), 10);
    }

    #[tokio::test]
    async fn zigzag_small_magnitudes_stay_small() {
        assert_eq!(written(|w| w.write_zigzag(0)).await, [0]);
        assert_eq!(written(|w| w.write_zigzag(-1)).await, [1]);
        assert_eq!(written(|w| w.write_zigzag(1)).await, [2]);
    }

    #[tokio::test]
    async fn scalars_roundtrip_across_chunk_boundaries() {
        let bytes = written(|w| {
            w.write_varint(1_000_000);
            w.write_zigzag(i64::MIN);
            w.write_zigzag(i64::MAX);
            w.write_f64(-0.5);
            w.write_str("héllo wörld, this spans chunks");
            w.write_bool(true);
        })
        .await;
        let mut reader = reader_over(bytes, 3);
        assert_eq!(reader.read_varint().await.unwrap(), 1_000_000);
        assert_eq!(reader.read_zigzag().await.unwrap(), i64::MIN);
        assert_eq!(reader.read_zigzag().await.unwrap(), i64::MAX);
        assert_eq!(reader.read_f64().await.unwrap(), -0.5);
        assert_eq!(
            reader.read_string().await.unwrap(),
            "héllo wörld, this spans chunks"
        );
        assert!(reader.read_bool().await.unwrap());
        assert!(reader.is_at_end().await.unwrap());
    }

    #[tokio::test]
    async fn truncated_varint() {
        let mut reader = reader_over(vec![0x80], 8);
        let err = reader.read_varint().await.unwrap_err();
        assert!(matches!(err, DecodeError::Format(FormatError::Truncated(_))));
    }

    #[tokio::test]
    async fn overlong_varint() {
        let mut reader = reader_over(vec![0xFF; 11], 8);
        let err = reader.read_varint().await.unwrap_err();
        assert!(matches!(err, DecodeError::Format(FormatError::VarintOverflow)));
    }

    #[tokio::test]
    async fn small_int_out_of_range() {
        let bytes = written(|w| w.write_varint(u64::from(u32::MAX) + 1)).await;
        let err = reader_over(bytes, 8).read_small_int().await.unwrap_err();
        assert!(matches!(err, DecodeError::Format(FormatError::OutOfRange(_))));
    }

    #[tokio::test]
    async fn invalid_utf8() {
        let bytes = written(|w| w.write_bytes(&[0xC3, 0x28])).await;
        let err = reader_over(bytes, 8).read_string().await.unwrap_err();
        assert!(matches!(err, DecodeError::Format(FormatError::InvalidUtf8)));
    }

    #[tokio::test]
    async fn block_longer_than_stream() {
        let mut bytes = Vec::new();
        bytes.push(0x64); // claims 100 bytes
        bytes.extend_from_slice(b"short");
        let err = reader_over(bytes, 8).read_bytes().await.unwrap_err();
        assert!(matches!(err, DecodeError::Format(FormatError::Truncated(_))));
    }

    #[tokio::test]
    async fn rollback_before_flush() {
        let buffer = SharedBuffer::new();
        let mut writer = PrimitiveWriter::new(Box::new(buffer.clone()), 1024);
        writer.write_u8(1);
        let mark = writer.mark();
        writer.write_str("discard me");
        assert!(writer.rollback(mark));
        writer.write_u8(2);
        writer.finish().await.unwrap();
        assert_eq!(buffer.contents(), [1, 2]);
    }

    #[tokio::test]
    async fn rollback_refused_after_flush() {
        let buffer = SharedBuffer::new();
        let mut writer = PrimitiveWriter::new(Box::new(buffer.clone()), 1024);
        let mark = writer.mark();
        writer.write_u8(1);
        writer.flush().await.unwrap();
        writer.write_u8(2);
        assert!(!writer.rollback(mark));
        assert_eq!(writer.buffered(), 1);
    }

    #[tokio::test]
    async fn compressed_tail_roundtrip() {
        let buffer = SharedBuffer::new();
        let mut writer = PrimitiveWriter::new(Box::new(buffer.clone()), 64);
        writer.write_raw(b"HDR!");
        writer.start_compression(3).await.unwrap();
        for i in 0..500u64 {
            writer.write_varint(i);
            writer.write_str("repetitive payload");
            if writer.should_flush() {
                writer.flush().await.unwrap();
            }
        }
        writer.finish().await.unwrap();
        let bytes = buffer.contents();
        assert_eq!(&bytes[..4], b"HDR!");

        let mut reader = reader_over(bytes, 7);
        let mut magic = [0u8; 4];
        reader.read_into(&mut magic).await.unwrap();
        assert_eq!(&magic, b"HDR!");
        reader.start_decompression().unwrap();
        for i in 0..500u64 {
            assert_eq!(reader.read_varint().await.unwrap(), i);
            assert_eq!(reader.read_string().await.unwrap(), "repetitive payload");
        }
        assert!(reader.is_at_end().await.unwrap());
    }
}
