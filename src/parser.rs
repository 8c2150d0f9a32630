//! Stream parser: turns the transport's read half into a frame stream.
//!
//! A dedicated task blocks on the reader, decodes one frame at a time
//! and pushes it to the consumer. Frames arrive in the exact order the
//! peer wrote them. On the first decode or transport error the task
//! surfaces exactly one terminal error and stops; the stream is then
//! permanently closed and cannot be restarted.

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::{ProtocolError, Result};
use crate::wire::Frame;

/// Buffered frames between the decode task and the consumer.
const STREAM_DEPTH: usize = 32;

/// Lazy, unbounded, non-restartable sequence of decoded frames.
///
/// Dropping the stream aborts the decode task, which releases the
/// reader it owns.
pub(crate) struct FrameStream {
    rx: mpsc::Receiver<Result<Frame>>,
    decoder: AbortHandle,
}

impl FrameStream {
    /// Spawn the decode loop over `reader` and return the consumer end.
    pub(crate) fn spawn<R>(mut reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_DEPTH);

        let decoder = tokio::spawn(async move {
            loop {
                match Frame::decode(&mut reader).await {
                    Ok(frame) => {
                        if tx.send(Ok(frame)).await.is_err() {
                            // Consumer is gone; stop reading.
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
        })
        .abort_handle();

        Self { rx, decoder }
    }

    /// Next frame, a terminal error, or `None` once the sequence is closed.
    pub(crate) async fn next(&mut self) -> Option<Result<Frame>> {
        self.rx.recv().await
    }

    /// Convenience for the handshake phase: the next frame or an error.
    ///
    /// A closed sequence is reported as [`ProtocolError::Disconnected`].
    pub(crate) async fn expect_next(&mut self) -> Result<Frame> {
        self.next().await.unwrap_or(Err(ProtocolError::Disconnected))
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.decoder.abort();
    }
}
