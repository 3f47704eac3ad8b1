//! Bridge from an async request body to a blocking [`Read`].
//!
//! Uploads are written by the inventory on a blocking thread; the handler
//! forwards body chunks through a bounded channel so large images are never
//! buffered in memory.
//!
//! The reader only reports end-of-body once the sender has called
//! [`BodySender::finish`]. A sender dropped without finishing (request timed
//! out, client went away) surfaces as [`io::ErrorKind::UnexpectedEof`], so a
//! truncated transfer is never mistaken for a complete image.

use axum::body::Bytes;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Async side of the bridge.
pub struct BodySender {
    tx: mpsc::Sender<io::Result<Bytes>>,
    complete: Arc<AtomicBool>,
}

impl BodySender {
    /// Forward one chunk. Returns `false` once the reader has gone away.
    pub async fn send(&self, chunk: io::Result<Bytes>) -> bool {
        self.tx.send(chunk).await.is_ok()
    }

    /// Mark the body as fully received and close the channel.
    pub fn finish(self) {
        self.complete.store(true, Ordering::Release);
    }
}

/// Blocking reader fed by a channel of body chunks.
pub struct BodyReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
    complete: Arc<AtomicBool>,
}

impl BodyReader {
    /// Create a sender/reader pair holding at most `depth` chunks in flight.
    pub fn channel(depth: usize) -> (BodySender, Self) {
        let (tx, rx) = mpsc::channel(depth);
        let complete = Arc::new(AtomicBool::new(false));
        (
            BodySender {
                tx,
                complete: complete.clone(),
            },
            Self {
                rx,
                current: Bytes::new(),
                complete,
            },
        )
    }
}

impl Read for BodyReader {
    /// Must not be called from an async context.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.current.is_empty() {
                let n = buf.len().min(self.current.len());
                buf[..n].copy_from_slice(&self.current[..n]);
                self.current = self.current.slice(n..);
                return Ok(n);
            }
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => return Err(e),
                None if self.complete.load(Ordering::Acquire) => return Ok(0),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "request body ended before completion",
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(tx: &BodySender, chunk: io::Result<Bytes>) {
        tx.tx.blocking_send(chunk).unwrap();
    }

    #[test]
    fn test_reads_chunks_in_order() {
        let (tx, mut reader) = BodyReader::channel(4);
        send(&tx, Ok(Bytes::from_static(b"hello ")));
        send(&tx, Ok(Bytes::from_static(b"world")));
        tx.finish();

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn test_propagates_stream_error() {
        let (tx, mut reader) = BodyReader::channel(4);
        send(&tx, Ok(Bytes::from_static(b"partial")));
        send(&tx, Err(io::Error::new(io::ErrorKind::ConnectionAborted, "reset")));
        drop(tx);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[test]
    fn test_dropped_sender_is_not_end_of_body() {
        let (tx, mut reader) = BodyReader::channel(4);
        send(&tx, Ok(Bytes::from_static(b"first half only")));
        drop(tx);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(out, b"first half only");
    }
}
