//! The bridge between the blocking telnet socket and the non-blocking tick loop.
//!
//! A [`Connection`] owns two unbounded FIFO queues of byte buffers. A dedicated
//! worker thread reads CRLF-delimited chunks from the socket into the inbound
//! queue and writes at most one buffer per iteration from the outbound queue.
//! A chunk is also handed over once it is [`MAX_CHUNK_AGE`] old or
//! [`MAX_CHUNK_LEN`] bytes long, so servers that end lines with `\n\r` still
//! deliver promptly.
//! Failure is terminal: when the socket reaches end-of-file or a write fails,
//! the worker marks the connection dead and exits, which disconnects the
//! inbound queue so [`Connection::poll`] reports [`Poll::Closed`] once drained.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Default socket read timeout for the worker loop.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest a partial chunk is held back waiting for CRLF, measured from its first byte.
pub const MAX_CHUNK_AGE: Duration = Duration::from_millis(500);

/// Largest inbound chunk handed to the engine.
pub const MAX_CHUNK_LEN: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to spawn connection worker for {addr}: {source}")]
    Spawn { addr: String, source: io::Error },
}

/// Outcome of a non-blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    Data(Vec<u8>),
    /// Nothing has arrived since the last read; the connection may still produce more.
    Empty,
    /// The worker has stopped and every buffer it delivered has been read.
    Closed,
}

/// Everything the worker thread needs, held until [`Connection::connect`] starts it.
struct PendingWorker {
    addr: String,
    read_timeout: Duration,
    inbound: Sender<Vec<u8>>,
    outbound: Receiver<Vec<u8>>,
}

pub struct Connection {
    inbound: Receiver<Vec<u8>>,
    outbound: Sender<Vec<u8>>,
    alive: Arc<AtomicBool>,
    pending: Option<PendingWorker>,
    worker: Option<JoinHandle<()>>,
}

impl Connection {
    /// A connection to `host:port`. No socket is opened until [`Connection::connect`].
    pub fn tcp(host: &str, port: u16, read_timeout: Duration) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        let (outbound_tx, outbound_rx) = mpsc::channel();
        Self {
            inbound: inbound_rx,
            outbound: outbound_tx,
            alive: Arc::new(AtomicBool::new(true)),
            pending: Some(PendingWorker {
                addr: format!("{host}:{port}"),
                read_timeout,
                inbound: inbound_tx,
                outbound: outbound_rx,
            }),
            worker: None,
        }
    }

    /// A connection with no socket behind it. The returned [`RemoteEnd`] plays
    /// the server: it feeds inbound buffers and collects what the fuzzer sends.
    pub fn in_memory() -> (Self, RemoteEnd) {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        let (outbound_tx, outbound_rx) = mpsc::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let connection = Self {
            inbound: inbound_rx,
            outbound: outbound_tx,
            alive: Arc::clone(&alive),
            pending: None,
            worker: None,
        };
        let remote = RemoteEnd {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
            alive,
        };
        (connection, remote)
    }

    /// Starts the worker thread. Calling it again, or on an in-memory connection, does nothing.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let addr = pending.addr.clone();
        let alive = Arc::clone(&self.alive);
        let handle = thread::Builder::new()
            .name("mudfuzz-connection".to_string())
            .spawn(move || run_worker(pending, alive))
            .map_err(|source| ConnectionError::Spawn { addr, source })?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Pops the next inbound buffer without blocking.
    pub fn poll(&self) -> Poll {
        match self.inbound.try_recv() {
            Ok(buffer) => Poll::Data(buffer),
            Err(TryRecvError::Empty) => Poll::Empty,
            Err(TryRecvError::Disconnected) => Poll::Closed,
        }
    }

    /// Pops the next inbound buffer, or `None` if there is nothing to read.
    pub fn read(&self) -> Option<Vec<u8>> {
        match self.poll() {
            Poll::Data(buffer) => Some(buffer),
            Poll::Empty | Poll::Closed => None,
        }
    }

    /// Queues `buffer` for the worker. Never blocks; a buffer written after the
    /// connection died is silently dropped.
    pub fn write(&self, buffer: Vec<u8>) {
        let _ = self.outbound.send(buffer);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn is_started(&self) -> bool {
        self.pending.is_none()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("alive", &self.is_alive())
            .field("started", &self.is_started())
            .field("has_worker", &self.worker.is_some())
            .finish()
    }
}

/// The server side of an in-memory [`Connection`].
#[derive(Debug)]
pub struct RemoteEnd {
    inbound: Option<Sender<Vec<u8>>>,
    outbound: Receiver<Vec<u8>>,
    alive: Arc<AtomicBool>,
}

impl RemoteEnd {
    /// Delivers one buffer to the fuzzer, as if the worker had read it from the socket.
    pub fn push(&self, buffer: impl Into<Vec<u8>>) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(buffer.into());
        }
    }

    /// Everything the fuzzer has written since the last call, in order.
    pub fn drain_sent(&self) -> Vec<Vec<u8>> {
        self.outbound.try_iter().collect()
    }

    /// Ends the stream, like a socket reaching end-of-file.
    pub fn close(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.inbound = None;
    }
}

fn run_worker(pending: PendingWorker, alive: Arc<AtomicBool>) {
    let PendingWorker {
        addr,
        read_timeout,
        inbound,
        outbound,
    } = pending;

    let stream = match TcpStream::connect(&addr) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%addr, error = %e, "connection failed");
            alive.store(false, Ordering::Release);
            return;
        }
    };
    let reader = stream
        .set_read_timeout(Some(read_timeout))
        .and_then(|_| stream.try_clone());
    let reader = match reader {
        Ok(reader) => reader,
        Err(e) => {
            warn!(%addr, error = %e, "failed to configure socket");
            alive.store(false, Ordering::Release);
            return;
        }
    };
    debug!(%addr, "connected");

    match pump(
        BufReader::new(reader),
        stream,
        &inbound,
        &outbound,
        &alive,
        MAX_CHUNK_AGE,
    ) {
        StopReason::EndOfStream => debug!(%addr, "server closed the connection"),
        StopReason::ReadFailed(e) => warn!(%addr, error = %e, "read failed"),
        StopReason::WriteFailed(e) => warn!(%addr, error = %e, "write failed"),
        StopReason::Abandoned => debug!(%addr, "connection dropped by owner"),
    }
    alive.store(false, Ordering::Release);
}

/// Why the worker loop ended.
#[derive(Debug)]
enum StopReason {
    EndOfStream,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
    /// The owning `Connection` was dropped or marked dead.
    Abandoned,
}

/// Shuttles data between the socket and the queues until the stream fails or
/// the owning connection goes away.
///
/// Inbound bytes are cut into chunks at CRLF, at `max_age` after a chunk's
/// first byte, at [`MAX_CHUNK_LEN`], or when a read times out.
fn pump<R: BufRead, W: Write>(
    mut reader: R,
    mut writer: W,
    inbound: &Sender<Vec<u8>>,
    outbound: &Receiver<Vec<u8>>,
    alive: &AtomicBool,
    max_age: Duration,
) -> StopReason {
    let mut chunk = Vec::new();
    let mut chunk_started = Instant::now();
    while alive.load(Ordering::Acquire) {
        let room = (MAX_CHUNK_LEN - chunk.len()) as u64;
        let was_empty = chunk.is_empty();
        match reader.by_ref().take(room).read_until(b'\n', &mut chunk) {
            Ok(0) => {
                if !chunk.is_empty() {
                    let _ = inbound.send(std::mem::take(&mut chunk));
                }
                return StopReason::EndOfStream;
            }
            Ok(_) => {
                if was_empty {
                    chunk_started = Instant::now();
                }
                let complete = chunk.ends_with(b"\r\n")
                    || chunk.len() >= MAX_CHUNK_LEN
                    || chunk_started.elapsed() >= max_age;
                if complete && inbound.send(std::mem::take(&mut chunk)).is_err() {
                    return StopReason::Abandoned;
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                // Prompts are usually not line-terminated; hand over what we have.
                if !chunk.is_empty() && inbound.send(std::mem::take(&mut chunk)).is_err() {
                    return StopReason::Abandoned;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return StopReason::ReadFailed(e),
        }

        match outbound.try_recv() {
            Ok(buffer) => {
                if let Err(e) = writer.write_all(&buffer).and_then(|_| writer.flush()) {
                    return StopReason::WriteFailed(e);
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return StopReason::Abandoned,
        }
    }
    StopReason::Abandoned
}
