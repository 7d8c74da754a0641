use super::local::ChildProcess;
use crate::error::{Result, SwitchboardError};
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, trace, warn};

/// Upper bound on a single frame; longer lines are discarded
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub(crate) type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub(crate) type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes and was discarded")]
    Oversized,
    #[error("transport read failed: {0}")]
    Io(#[from] std::io::Error),
}

enum RawFrame {
    Line(String),
    Oversized,
}

/// Newline framing that yields oversized lines as items. `FramedRead` ends
/// its stream after a decode error, and one bad frame must not do that.
struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_FRAME_BYTES),
        }
    }

    fn map(
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> std::result::Result<Option<RawFrame>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(RawFrame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(RawFrame::Oversized)),
            Err(e) => Err(e),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<RawFrame>, Self::Error> {
        Self::map(self.lines.decode(src))
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<RawFrame>, Self::Error> {
        Self::map(self.lines.decode_eof(src))
    }
}

/// Received frames, in arrival order. Ends when the peer closes its side.
pub type FrameStream = BoxStream<'static, std::result::Result<String, FrameError>>;

/// One newline-framed duplex byte stream to an external server.
///
/// The session knows nothing about the messages it carries. It is closed
/// exactly once; later `close` calls are no-ops and `send` fails with
/// `ConnectionClosed`.
pub struct TransportSession {
    label: String,
    writer: Mutex<Option<FramedWrite<BoxedWriter, LinesCodec>>>,
    frames: Mutex<Option<FrameStream>>,
    process: Mutex<Option<ChildProcess>>,
    closed: AtomicBool,
    grace: Duration,
}

impl TransportSession {
    /// Build a session over an arbitrary reader/writer pair
    pub fn from_io<R, W>(label: impl Into<String>, reader: R, writer: W, grace: Duration) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        Self::from_parts(label.into(), Box::pin(reader), Box::pin(writer), None, grace)
    }

    pub(crate) fn from_parts(
        label: String,
        reader: BoxedReader,
        writer: BoxedWriter,
        process: Option<ChildProcess>,
        grace: Duration,
    ) -> Self {
        let frames = FramedRead::new(reader, FrameCodec::new())
            .filter_map(|item| async move {
                match item {
                    Ok(RawFrame::Line(line)) if line.trim().is_empty() => None,
                    Ok(RawFrame::Line(line)) => Some(Ok(line)),
                    Ok(RawFrame::Oversized) => Some(Err(FrameError::Oversized)),
                    Err(LinesCodecError::Io(e)) => Some(Err(FrameError::Io(e))),
                    Err(LinesCodecError::MaxLineLengthExceeded) => Some(Err(FrameError::Oversized)),
                }
            })
            .boxed();

        Self {
            label,
            writer: Mutex::new(Some(FramedWrite::new(writer, LinesCodec::new()))),
            frames: Mutex::new(Some(frames)),
            process: Mutex::new(process),
            closed: AtomicBool::new(false),
            grace,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Hand out the inbound frame sequence. Only the first call gets it.
    pub async fn take_frames(&self) -> Option<FrameStream> {
        self.frames.lock().await.take()
    }

    /// Write one frame followed by a newline
    pub async fn send(&self, frame: &str) -> Result<()> {
        if self.is_closed() {
            return Err(SwitchboardError::connection_closed(&self.label));
        }

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| SwitchboardError::connection_closed(&self.label))?;

        trace!("[{}] -> {}", self.label, frame);
        writer.send(frame).await.map_err(|e| match e {
            LinesCodecError::Io(io) if is_disconnect(&io) => {
                SwitchboardError::connection_closed(&self.label)
            }
            LinesCodecError::Io(io) => SwitchboardError::Io(io),
            LinesCodecError::MaxLineLengthExceeded => {
                SwitchboardError::protocol(&self.label, "outbound frame too long")
            }
        })
    }

    /// Tear the session down: close the write side, give the process the
    /// grace period to exit, then kill it.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!("Closing transport session: {}", self.label);

        // A sender stuck on a full pipe holds the writer; killing the
        // process below unblocks it.
        match tokio::time::timeout(self.grace, self.writer.lock()).await {
            Ok(mut guard) => {
                if let Some(mut writer) = guard.take()
                    && let Err(e) = SinkExt::<&str>::close(&mut writer).await
                {
                    debug!("[{}] error closing write side: {}", self.label, e);
                }
            }
            Err(_) => warn!(
                "[{}] writer busy during close, proceeding to terminate",
                self.label
            ),
        }

        if let Some(process) = self.process.lock().await.take() {
            process.terminate(&self.label, self.grace).await;
        }

        Ok(())
    }
}

fn is_disconnect(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    const GRACE: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_send_writes_newline_delimited_frames() {
        let writer = tokio_test::io::Builder::new()
            .write(b"{\"a\":1}\n")
            .write(b"{\"b\":2}\n")
            .build();
        let reader = tokio_test::io::Builder::new().build();

        let session = TransportSession::from_io("mock", reader, writer, GRACE);
        session.send(r#"{"a":1}"#).await.unwrap();
        session.send(r#"{"b":2}"#).await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_reads_are_buffered_into_frames() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"id\":1,")
            .read(b"\"result\":{}}\n\n{\"id\"")
            .read(b":2}\n")
            .build();
        let writer = tokio_test::io::Builder::new().build();

        let session = TransportSession::from_io("mock", reader, writer, GRACE);
        let mut frames = session.take_frames().await.unwrap();

        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            r#"{"id":1,"result":{}}"#
        );
        assert_eq!(frames.next().await.unwrap().unwrap(), r#"{"id":2}"#);
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_skipped_without_ending_the_stream() {
        let oversized = vec![b'x'; MAX_FRAME_BYTES + 1];
        let reader = tokio_test::io::Builder::new()
            .read(&oversized)
            .read(b"\n{\"id\":3}\n")
            .build();
        let writer = tokio_test::io::Builder::new().build();

        let session = TransportSession::from_io("mock", reader, writer, GRACE);
        let mut frames = session.take_frames().await.unwrap();

        assert!(matches!(
            frames.next().await.unwrap(),
            Err(FrameError::Oversized)
        ));
        assert_eq!(frames.next().await.unwrap().unwrap(), r#"{"id":3}"#);
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_frames_are_handed_out_once() {
        let (client, _server) = tokio::io::duplex(64);
        let (read, write) = tokio::io::split(client);
        let session = TransportSession::from_io("duplex", read, write, GRACE);

        assert!(session.take_frames().await.is_some());
        assert!(session.take_frames().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails_and_close_is_idempotent() {
        let (client, server) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(client);
        let session = TransportSession::from_io("duplex", read, write, GRACE);

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(session.is_closed());

        let err = session.send("{}").await.unwrap_err();
        assert!(matches!(err, SwitchboardError::ConnectionClosed { .. }));

        // The peer observes end of stream once the write side is shut down
        let mut lines = BufReader::new(server).lines();
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(client);
        let session = TransportSession::from_io("duplex", read, write, GRACE);
        let mut frames = session.take_frames().await.unwrap();

        let (server_read, mut server_write) = tokio::io::split(server);
        session.send("ping").await.unwrap();

        let mut lines = BufReader::new(server_read).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "ping");

        server_write.write_all(b"pong\n").await.unwrap();
        assert_eq!(frames.next().await.unwrap().unwrap(), "pong");
    }
}
