//! Framed stream I/O.
//!
//! # Frame Handling Invariants
//!
//! - Header is validated before the body buffer is allocated
//! - Each `send_frame()` writes exactly one encoded frame and flushes
//! - Each `recv_frame()` reads exactly one frame, no look-ahead buffering
//! - Every read and write is bounded by the configured timeouts

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;
use vaultwire_core::frame::{HEADER_LEN, TAG_LEN};
use vaultwire_core::session::unkeyed_frame;
use vaultwire_core::{FramingError, Frame, MessageType, StandardPrimitives};

use crate::config::TransportConfig;
use crate::error::TransportError;

/// Read one frame from `reader`.
///
/// A clean end of stream before the first header byte is `Disconnected`; an
/// end of stream anywhere later is `Truncated`.
///
/// # Errors
///
/// Every [`FramingError`], plus I/O failures.
pub async fn read_frame<R>(reader: &mut R, max_payload: usize) -> Result<Frame, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                TransportError::Disconnected
            } else {
                FramingError::Truncated.into()
            });
        }
        filled += n;
    }

    let (msg_type, length) = Frame::read_header(&header, max_payload)?;

    let mut body = vec![0u8; length + TAG_LEN];
    reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => FramingError::Truncated.into(),
        _ => TransportError::Io(e),
    })?;

    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&body[length..]);
    body.truncate(length);

    Ok(Frame::new(msg_type, body, tag)?)
}

/// A byte stream carrying VaultWire frames.
///
/// Does not implement `Clone` to prevent socket duplication.
pub struct FramedStream<S> {
    stream: S,
    config: TransportConfig,
}

impl<S> std::fmt::Debug for FramedStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedStream")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream.
    pub fn new(stream: S, config: TransportConfig) -> Self {
        Self { stream, config }
    }

    /// Limits in force on this stream.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Write one frame.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let wire = frame.encode();
        timeout(self.config.write_timeout, async {
            self.stream.write_all(&wire).await?;
            self.stream.flush().await
        })
        .await??;
        Ok(())
    }

    /// Read one frame.
    pub async fn recv_frame(&mut self) -> Result<Frame, TransportError> {
        let max_payload = self.config.max_payload;
        timeout(self.config.read_timeout, read_frame(&mut self.stream, max_payload)).await?
    }

    /// Best-effort ERROR frame, sent just before dropping the connection.
    pub async fn send_error(&mut self, code: u8) {
        let frame = match unkeyed_frame(&StandardPrimitives, MessageType::Error, vec![code]) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        if self.send_frame(&frame).await.is_err() {
            debug!("error frame not delivered");
        }
    }

    /// Best-effort shutdown of the write half.
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
