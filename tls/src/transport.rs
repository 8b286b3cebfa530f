//! Moving records over a runtime connection.
//!
//! Reads go through a [commonware_runtime::Stream]. Writes go through a [Writer], which reports
//! how many bytes it accepted so that a partial write can be detected (and treated as fatal)
//! instead of silently truncating a record.

use crate::{
    message::{RecordHeader, RECORD_HEADER_LENGTH},
    Error, RuntimeError,
};
use bytes::Bytes;
use commonware_codec::DecodeExt;
use commonware_runtime::{Sink, Stream};
use std::future::Future;
use tracing::trace;

/// The sending half of a transport.
pub trait Writer: Send + 'static {
    /// Write `buf`, returning the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = Result<usize, RuntimeError>> + Send;
}

/// A [Writer] backed by a runtime [Sink].
///
/// A [Sink] either delivers the whole buffer or fails.
pub struct SinkWriter<Si: Sink> {
    sink: Si,
}

impl<Si: Sink> SinkWriter<Si> {
    pub fn new(sink: Si) -> Self {
        Self { sink }
    }

    pub fn into_inner(self) -> Si {
        self.sink
    }
}

impl<Si: Sink> Writer for SinkWriter<Si> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, RuntimeError> {
        self.sink.send(buf.to_vec()).await?;
        Ok(buf.len())
    }
}

/// Write all of `buf` or fail.
pub async fn send_all<W: Writer>(writer: &mut W, buf: &[u8]) -> Result<(), Error> {
    let written = writer.write(buf).await.map_err(Error::SendFailed)?;
    if written != buf.len() {
        return Err(Error::ShortWrite {
            written,
            expected: buf.len(),
        });
    }
    trace!(len = written, "sent");
    Ok(())
}

/// Read exactly `len` bytes.
async fn recv_exact<St: Stream>(stream: &mut St, len: usize) -> Result<Bytes, Error> {
    if len == 0 {
        return Ok(Bytes::new());
    }
    let buf = stream
        .recv(vec![0u8; len])
        .await
        .map_err(Error::RecvFailed)?;
    Ok(Bytes::copy_from_slice(buf.as_ref()))
}

/// Read the next record, rejecting any fragment longer than `max_record_size`.
pub async fn recv_record<St: Stream>(
    stream: &mut St,
    max_record_size: usize,
) -> Result<(RecordHeader, Bytes), Error> {
    let raw = recv_exact(stream, RECORD_HEADER_LENGTH).await?;
    let header = RecordHeader::decode(raw)?;

    let len = header.length as usize;
    if len > max_record_size {
        return Err(Error::RecordTooLarge(len));
    }
    let fragment = recv_exact(stream, len).await?;
    trace!(content_type = ?header.content_type, len, "received record");
    Ok((header, fragment))
}
