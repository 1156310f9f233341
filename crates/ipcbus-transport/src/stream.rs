//! Line-delimited JSON transport over an async reader/writer pair.
//!
//! Each outbound value is serialized to one line. Each inbound line is decoded
//! into one value. A line that is not JSON, not UTF-8 or too long is delivered
//! as a string value so the bus can report it as an invalid message; the
//! stream carries on with the next line.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{
    AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead, FramedWrite, LinesCodec,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use ipcbus_core::{Inbound, Transport, TransportError, TransportResult};

/// Longest accepted inbound line, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// One inbound frame.
enum Frame {
    Line(Bytes),
    /// A line longer than the limit; its bytes were discarded.
    Oversized,
}

/// Newline framing where bad input yields a frame, never a stream error.
struct LineDecoder {
    inner: AnyDelimiterCodec,
}

impl LineDecoder {
    fn new(max_line_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\n".to_vec(),
                max_line_length,
            ),
        }
    }

    fn frame(
        decoded: Result<Option<Bytes>, AnyDelimiterCodecError>,
    ) -> Result<Option<Frame>, AnyDelimiterCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(Frame::Line)),
            // The codec skips the rest of the line by itself.
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Ok(Some(Frame::Oversized)),
            Err(e) => Err(e),
        }
    }
}

impl Decoder for LineDecoder {
    type Item = Frame;
    type Error = AnyDelimiterCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        Self::frame(self.inner.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        Self::frame(self.inner.decode_eof(src))
    }
}

/// Decodes one inbound line; `None` for a blank line.
fn decode_line(line: &[u8]) -> Option<Value> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let Ok(text) = std::str::from_utf8(line) else {
        warn!("Inbound line is not UTF-8, forwarding as string");
        return Some(Value::String(String::from_utf8_lossy(line).into_owned()));
    };
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|e| {
        warn!(error = %e, "Inbound line is not JSON, forwarding as string");
        Value::String(text.to_string())
    }))
}

/// Item queued for the writer task.
enum Outgoing {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Transport speaking newline-delimited JSON over a byte stream.
///
/// Reading and writing run on background tasks; [`send`](Transport::send)
/// only serializes and queues. Dropping the transport stops both tasks.
pub struct StreamTransport {
    outbound: mpsc::UnboundedSender<Outgoing>,
    inbound: Mutex<Option<Inbound>>,
    shutdown: CancellationToken,
}

impl StreamTransport {
    /// Creates a transport over `reader` and `writer`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_max_line_length(reader, writer, DEFAULT_MAX_LINE_LENGTH)
    }

    /// Creates a transport with a custom inbound line limit.
    pub fn with_max_line_length<R, W>(reader: R, writer: W, max_line_length: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let lines = FramedRead::new(reader, LineDecoder::new(max_line_length));
        tokio::spawn(run_reader(lines, max_line_length, inbound_tx, shutdown.clone()));

        let sink = FramedWrite::new(writer, LinesCodec::new());
        tokio::spawn(run_writer(sink, outbound_rx, shutdown.clone()));

        Self {
            outbound: outbound_tx,
            inbound: Mutex::new(Some(inbound_rx)),
            shutdown,
        }
    }

    /// Creates a transport over this process's stdin and stdout.
    ///
    /// This is the child side of a worker launched with
    /// [`process::spawn`](crate::process::spawn). Nothing else may write to
    /// stdout while it is in use.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Stops the reader and writer tasks.
    ///
    /// Values already queued may be lost; later sends fail.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Waits until every value sent so far has been written to the stream.
    pub async fn flush(&self) -> TransportResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.outbound
            .send(Outgoing::Flush(ack_tx))
            .map_err(|_| TransportError::closed("stream writer stopped"))?;
        ack_rx
            .await
            .map_err(|_| TransportError::closed("stream writer stopped"))
    }
}

impl Transport for StreamTransport {
    fn send(&self, value: Value) -> TransportResult<()> {
        let line = serde_json::to_string(&value)?;
        trace!(len = line.len(), "Queueing line");
        self.outbound
            .send(Outgoing::Line(line))
            .map_err(|_| TransportError::closed("stream writer stopped"))
    }

    fn take_inbound(&self) -> TransportResult<Inbound> {
        self.inbound
            .lock()
            .take()
            .ok_or(TransportError::AlreadySubscribed)
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_reader<R>(
    mut lines: FramedRead<R, LineDecoder>,
    max_line_length: usize,
    inbound: mpsc::UnboundedSender<Value>,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            frame = lines.next() => {
                let value = match frame {
                    Some(Ok(Frame::Line(line))) => match decode_line(&line) {
                        Some(value) => value,
                        None => continue,
                    },
                    Some(Ok(Frame::Oversized)) => {
                        warn!(max_line_length, "Inbound line exceeds maximum length, discarded");
                        Value::String(format!("line exceeds {max_line_length} bytes"))
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Stream read failed");
                        break;
                    }
                    None => {
                        debug!("Peer closed the stream");
                        break;
                    }
                };
                if inbound.send(value).is_err() {
                    debug!("Inbound consumer dropped, stopping reader");
                    break;
                }
            }
        }
    }
}

async fn run_writer<W>(
    mut sink: FramedWrite<W, LinesCodec>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            item = outbound.recv() => match item {
                Some(Outgoing::Line(line)) => {
                    if let Err(e) = sink.send(line).await {
                        warn!(error = %e, "Stream write failed");
                        break;
                    }
                }
                Some(Outgoing::Flush(ack)) => {
                    let _ = ack.send(());
                }
                None => break,
            },
        }
    }
    // Refuse further sends.
    outbound.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_writes_one_line_per_value() {
        let (local, remote) = tokio::io::duplex(1024);
        let (local_read, local_write) = tokio::io::split(local);
        let transport = StreamTransport::new(local_read, local_write);

        transport
            .send(json!({ "header": { "cmd": "tick", "type": 2 } }))
            .unwrap();

        let mut remote = BufReader::new(remote);
        let mut line = String::new();
        remote.read_line(&mut line).await.unwrap();
        assert_eq!(line, "{\"header\":{\"cmd\":\"tick\",\"type\":2}}\n");
    }

    #[tokio::test]
    async fn test_reads_values_and_forwards_garbage_as_string() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (local_read, local_write) = tokio::io::split(local);
        let transport = StreamTransport::new(local_read, local_write);
        let mut inbound = transport.take_inbound().unwrap();

        remote
            .write_all(b"{\"a\":1}\n\nThis is an invalid message!\n")
            .await
            .unwrap();

        assert_eq!(inbound.recv().await, Some(json!({ "a": 1 })));
        assert_eq!(
            inbound.recv().await,
            Some(json!("This is an invalid message!"))
        );
    }

    #[tokio::test]
    async fn test_non_utf8_line_does_not_end_stream() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (local_read, local_write) = tokio::io::split(local);
        let transport = StreamTransport::new(local_read, local_write);
        let mut inbound = transport.take_inbound().unwrap();

        remote.write_all(b"\xff\xfe\n{\"a\":1}\n").await.unwrap();

        assert_eq!(
            inbound.recv().await,
            Some(Value::String("\u{fffd}\u{fffd}".into()))
        );
        assert_eq!(inbound.recv().await, Some(json!({ "a": 1 })));
    }

    #[tokio::test]
    async fn test_oversized_line_is_reported_and_skipped() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (local_read, local_write) = tokio::io::split(local);
        let transport = StreamTransport::with_max_line_length(local_read, local_write, 16);
        let mut inbound = transport.take_inbound().unwrap();

        let long = format!("\"{}\"\n", "x".repeat(64));
        remote.write_all(long.as_bytes()).await.unwrap();
        remote.write_all(b"{\"a\":1}\r\n").await.unwrap();

        assert_eq!(
            inbound.recv().await,
            Some(json!("line exceeds 16 bytes"))
        );
        assert_eq!(inbound.recv().await, Some(json!({ "a": 1 })));
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b""), None);
        assert_eq!(decode_line(b"  \r"), None);
        assert_eq!(decode_line(b"[1,2]\r"), Some(json!([1, 2])));
        assert_eq!(decode_line(b"nope"), Some(json!("nope")));
    }

    #[tokio::test]
    async fn test_inbound_ends_when_peer_closes() {
        let (local, remote) = tokio::io::duplex(64);
        let (local_read, local_write) = tokio::io::split(local);
        let transport = StreamTransport::new(local_read, local_write);
        let mut inbound = transport.take_inbound().unwrap();

        drop(remote);
        assert_eq!(inbound.recv().await, None);
    }
}
