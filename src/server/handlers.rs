//! Per-connection handlers
//!
//! Event sources stream parsed events to the sequencer. Clients send one id
//! line and are outbound-only afterwards.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Ingest;
use crate::error::ServerError;
use crate::registry::ClientRegistry;
use crate::stats::Stats;
use crate::types::{parse_decimal, Event, UserId};

/// Event-source connection state
pub(crate) struct EventSourceHandler {
    pub peer: SocketAddr,
    pub ingest: mpsc::Sender<Ingest>,
    pub stats: Arc<Stats>,
    pub max_line_length: usize,
}

impl EventSourceHandler {
    /// Read lines until EOF, shutdown, or the sequencer rejects this source
    pub async fn handle(
        self,
        stream: TcpStream,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let source = shutdown.child_token();
        let mut reader = BufReader::new(stream);
        let mut line_buf = Vec::with_capacity(self.max_line_length);

        tracing::info!(peer = %self.peer, "event source connected");

        loop {
            let read = tokio::select! {
                biased;
                _ = source.cancelled() => break,
                read = read_bounded_line(&mut reader, &mut line_buf, self.max_line_length) => read?,
            };

            match read {
                ReadLine::Eof => break,
                ReadLine::TooLong => {
                    self.stats.parse_error();
                    tracing::debug!(
                        peer = %self.peer,
                        max = self.max_line_length,
                        "event line too long, dropped"
                    );
                }
                ReadLine::Line => {
                    let Some(event) = self.parse(&line_buf) else {
                        continue;
                    };
                    self.stats.event_received();

                    let ingest = Ingest {
                        event,
                        source: source.clone(),
                    };
                    tokio::select! {
                        biased;
                        _ = source.cancelled() => break,
                        sent = self.ingest.send(ingest) => {
                            if sent.is_err() {
                                // Sequencer is gone
                                break;
                            }
                        }
                    }
                }
            }
        }

        if source.is_cancelled() && !shutdown.is_cancelled() {
            tracing::warn!(peer = %self.peer, "event source rejected, closing connection");
        } else {
            tracing::info!(peer = %self.peer, "event source disconnected");
        }
        Ok(())
    }

    fn parse(&self, line: &[u8]) -> Option<Event> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(_) => {
                self.stats.parse_error();
                tracing::debug!(peer = %self.peer, "event line is not valid UTF-8");
                return None;
            }
        };
        if text.trim().is_empty() {
            return None;
        }

        match Event::parse(text) {
            Ok(event) => Some(event),
            Err(e) => {
                self.stats.parse_error();
                tracing::debug!(peer = %self.peer, error = %e, line = text, "malformed event");
                None
            }
        }
    }
}

/// Client connection state
pub(crate) struct ClientHandler {
    pub peer: SocketAddr,
    pub registry: ClientRegistry,
    pub handshake_timeout: Duration,
    pub max_line_length: usize,
}

impl ClientHandler {
    /// Register the client and hold the connection until either side ends it
    pub async fn handle(
        self,
        stream: TcpStream,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(error = %e, "failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let client_id = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            id = self.read_client_id(&mut reader) => match id? {
                Some(id) => id,
                None => return Ok(()),
            },
        };

        let session = self.registry.register(client_id, Some(self.peer), write_half);
        let closed = session.closed_token();
        tracing::info!(client_id, peer = %self.peer, "client connected");

        // Outbound only from here on; input is discarded until EOF
        let mut discard = [0u8; 512];
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = closed.cancelled() => break,
                read = reader.read(&mut discard) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                },
            }
        }

        if self.registry.remove_session(&session) {
            tracing::info!(client_id, peer = %self.peer, "client disconnected");
        }
        Ok(())
    }

    /// Read the id line. `None` means the handshake failed and was logged.
    async fn read_client_id<R>(&self, reader: &mut R) -> Result<Option<UserId>, ServerError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line_buf = Vec::with_capacity(32);
        let read = async {
            if self.handshake_timeout.is_zero() {
                Ok(read_bounded_line(reader, &mut line_buf, self.max_line_length).await)
            } else {
                tokio::time::timeout(
                    self.handshake_timeout,
                    read_bounded_line(reader, &mut line_buf, self.max_line_length),
                )
                .await
            }
        };

        let outcome = match read.await {
            Ok(result) => result?,
            Err(_) => {
                tracing::debug!(peer = %self.peer, "client handshake timed out");
                return Ok(None);
            }
        };

        match outcome {
            ReadLine::Line => {}
            ReadLine::Eof => return Ok(None),
            ReadLine::TooLong => {
                tracing::warn!(peer = %self.peer, "client handshake line too long");
                return Ok(None);
            }
        }

        let text = String::from_utf8_lossy(&line_buf);
        match parse_decimal(text.trim()) {
            Some(id) => Ok(Some(id)),
            None => {
                tracing::warn!(
                    peer = %self.peer,
                    line = %text.trim(),
                    "invalid client id in handshake"
                );
                Ok(None)
            }
        }
    }
}

/// Result of reading a bounded line
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReadLine {
    /// A line is in the buffer, without its newline
    Line,
    /// Line exceeded the limit and was consumed and discarded
    TooLong,
    /// End of stream
    Eof,
}

/// Read up to the next `\n`, keeping at most `max_len` bytes.
///
/// An over-long line is consumed to its end and reported as
/// [`ReadLine::TooLong`] so one bad line cannot exhaust memory. A final line
/// without a newline is still returned as a line.
pub(crate) async fn read_bounded_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_len: usize,
) -> io::Result<ReadLine>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut too_long = false;
    let mut saw_bytes = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match (saw_bytes, too_long) {
                (false, _) => ReadLine::Eof,
                (true, true) => ReadLine::TooLong,
                (true, false) => ReadLine::Line,
            });
        }
        saw_bytes = true;

        let (chunk_len, consumed, found_newline) =
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos, pos + 1, true),
                None => (available.len(), available.len(), false),
            };

        if !too_long {
            if buf.len() + chunk_len > max_len {
                too_long = true;
                buf.clear();
            } else {
                buf.extend_from_slice(&available[..chunk_len]);
            }
        }
        reader.consume(consumed);

        if found_newline {
            return Ok(if too_long {
                ReadLine::TooLong
            } else {
                ReadLine::Line
            });
        }
    }
}
