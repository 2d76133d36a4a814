//! Per-session writer task

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Notification;
use crate::types::UserId;

/// Why a writer stopped
#[derive(Debug)]
pub enum WriterExit {
    /// Session was closed; undrained notifications were discarded
    Cancelled,
    /// Session asked for a drain and everything queued was written
    Drained,
    /// Every sender was dropped
    QueueClosed,
    /// Writing to the connection failed
    Failed(io::Error),
}

/// Drains one delivery queue onto one connection, in enqueue order
pub struct Writer<W> {
    client_id: UserId,
    rx: mpsc::Receiver<Notification>,
    sink: W,
    cancel: CancellationToken,
    drain: CancellationToken,
}

impl<W> Writer<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a writer.
    ///
    /// Cancelling `cancel` stops it at once; cancelling `drain` makes it
    /// refuse new notifications and stop after writing the queued ones.
    pub fn new(
        client_id: UserId,
        rx: mpsc::Receiver<Notification>,
        sink: W,
        cancel: CancellationToken,
        drain: CancellationToken,
    ) -> Self {
        Self {
            client_id,
            rx,
            sink,
            cancel,
            drain,
        }
    }

    /// Run until cancelled, drained, or the connection fails.
    ///
    /// The sink is shut down on every exit path except cancellation, where it
    /// is simply dropped.
    pub async fn run(mut self) -> WriterExit {
        let mut draining = false;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return WriterExit::Cancelled,

                _ = self.drain.cancelled(), if !draining => {
                    draining = true;
                    self.rx.close();
                }

                next = self.rx.recv() => {
                    let Some(notification) = next else {
                        let _ = self.sink.shutdown().await;
                        return if draining {
                            WriterExit::Drained
                        } else {
                            WriterExit::QueueClosed
                        };
                    };

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return WriterExit::Cancelled,
                        result = write_line(&mut self.sink, &notification) => {
                            if let Err(e) = result {
                                tracing::debug!(
                                    client_id = self.client_id,
                                    error = %e,
                                    "client write failed"
                                );
                                return WriterExit::Failed(e);
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(sink: &mut W, payload: &str) -> io::Result<()> {
    sink.write_all(payload.as_bytes()).await?;
    sink.write_all(b"\n").await?;
    sink.flush().await
}
