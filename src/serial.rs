/* Serial engine: owns one byte-oriented link to a HIL device. Hosts a
 * reader task that feeds the incremental parser and exposes a
 * synchronous-response rendezvous (`await_response`) plus a per-bus CAN
 * frame queue to foreground callers.
 *
 * One spawned reader task owns the read half of the link and funnels
 * parsed frames into a mutex-protected table that foreground callers poll,
 * since a HIL device is addressed many times per second from several
 * logically independent foreground operations rather than one command
 * queue. */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::protocol::{FrameParser, RawCanFrame};

/// Bound on how long a single foreground poll for a response will run
/// before reporting a timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);
/// Polling interval used while waiting for a response to appear.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound on a single read's blocking duration; also bounds how long
/// `stop()` takes to be observed by the reader task.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Any transport the engine can drive: a real serial port, or (in tests) an
/// in-memory duplex pipe standing in for one.
pub trait SerialTransport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> SerialTransport for T {}

struct Shared {
    /* Only ever held for the duration of a parse/lookup, never across an
     * `.await`, so a blocking mutex is simpler than an async one here. */
    parser: StdMutex<FrameParser>,
    desynced: AtomicBool,
    cancel: AtomicBool,
}

/// Owns one HIL device's serial link: a background reader task plus the
/// rendezvous state foreground dispatch calls poll.
pub struct SerialEngine {
    device_name: String,
    write_half: AsyncMutex<Option<WriteHalf<Box<dyn SerialTransport>>>>,
    shared: Arc<Shared>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl SerialEngine {
    /// Split `transport` and spawn the reader task. `initial_bytes` is fed
    /// to the parser before the reader starts reading — discovery (C5) may
    /// have already consumed bytes past a sync preamble while probing this
    /// port, and those bytes must not be lost when the link is handed off.
    pub fn spawn(
        device_name: impl Into<String>,
        transport: Box<dyn SerialTransport>,
        initial_bytes: &[u8],
    ) -> Arc<Self> {
        let device_name = device_name.into();
        let (read_half, write_half) = tokio::io::split(transport);

        let mut parser = FrameParser::new();
        if !initial_bytes.is_empty() {
            if let Err(err) = parser.feed(initial_bytes) {
                warn!(device = %device_name, %err, "initial bytes desynchronized the parser");
            }
        }

        let shared = Arc::new(Shared {
            parser: StdMutex::new(parser),
            desynced: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        });

        let engine = Arc::new(Self {
            device_name: device_name.clone(),
            write_half: AsyncMutex::new(Some(write_half)),
            shared: Arc::clone(&shared),
            reader: StdMutex::new(None),
        });

        let handle = tokio::spawn(Self::reader_loop(device_name, read_half, shared));
        *engine.reader.lock().expect("reader mutex poisoned") = Some(handle);

        engine
    }

    async fn reader_loop(
        device_name: String,
        mut read_half: ReadHalf<Box<dyn SerialTransport>>,
        shared: Arc<Shared>,
    ) {
        let mut byte = [0u8; 1];
        while !shared.cancel.load(Ordering::Relaxed) {
            match tokio::time::timeout(READ_TIMEOUT, read_half.read_exact(&mut byte)).await {
                Ok(Ok(_)) => {
                    debug!(device = %device_name, byte = format!("{:#04x}", byte[0]), "RX");
                    let mut parser = shared.parser.lock().expect("parser mutex poisoned");
                    if let Err(err) = parser.feed(&byte) {
                        warn!(device = %device_name, %err, "link desynchronized, reader exiting");
                        shared.desynced.store(true, Ordering::SeqCst);
                        return;
                    }
                }
                Ok(Err(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!(device = %device_name, "link closed, reader exiting");
                    return;
                }
                Ok(Err(err)) => {
                    warn!(device = %device_name, %err, "read error, reader exiting");
                    return;
                }
                Err(_elapsed) => {
                    /* Nothing arrived within the read timeout; loop back
                     * around to re-check the cancellation flag. */
                    continue;
                }
            }
        }
        debug!(device = %device_name, "reader task cancelled");
    }

    /// Write a fully-formed outbound frame. Concurrent writers are
    /// serialized by `write_half`'s mutex, though in practice the
    /// dispatcher (C7) already admits only one foreground caller per
    /// device at a time.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.write_half.lock().await;
        let write_half = guard
            .as_mut()
            .ok_or_else(|| EngineError::serial(format!("link to '{}' is closed", self.device_name)))?;
        write_half.write_all(bytes).await?;
        write_half.flush().await?;
        debug!(device = %self.device_name, bytes = ?bytes, "TX");
        Ok(())
    }

    /// Poll for the last response received for `opcode`, consuming it, up
    /// to `timeout`. Fails immediately if the link has been found
    /// desynchronized by the reader task.
    pub async fn await_response(&self, opcode: u8, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.shared.desynced.load(Ordering::SeqCst) {
                return Err(EngineError::serial(format!(
                    "link to '{}' is desynchronized",
                    self.device_name
                )));
            }

            if let Some(resp) = self
                .shared
                .parser
                .lock()
                .expect("parser mutex poisoned")
                .take_response(opcode)
            {
                return Ok(resp);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::serial(format!(
                    "no response for opcode {opcode:#04x} from '{}' within {:?}",
                    self.device_name, timeout
                )));
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Drain every CAN frame queued for `bus`, oldest first.
    pub fn drain_can(&self, bus: u8) -> Vec<RawCanFrame> {
        self.shared
            .parser
            .lock()
            .expect("parser mutex poisoned")
            .drain_can(bus)
    }

    /// Idempotent: signal the reader task to exit and close the write
    /// half. Safe to call more than once or from any task.
    pub async fn stop(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        if let Some(mut write_half) = self.write_half.lock().await.take() {
            let _ = write_half.shutdown().await;
        }
    }
}
