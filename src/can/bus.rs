//! SocketCAN bus wrapper.
//!
//! Owns the write socket and a dedicated read task that polls a non-blocking
//! socket and hands every inbound frame to a single callback. Sends are
//! synchronous and safe under concurrent callers; in read-only mode they are
//! logged and dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame as _, Id, Socket, StandardId};
use tokio::task::JoinHandle;

use crate::can::frame::Frame;
use crate::core::error::{BridgeError, Result};

/// Poll interval for the non-blocking read loop.
const RX_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Abstract CAN sink shared by every sender (outputs, transition ticks).
///
/// Implementations must be safe under concurrent `send` calls.
pub trait CanSink: Send + Sync {
    /// Hand a frame to the bus. Errors are transient by contract: callers log
    /// and move on, the next tick or user command re-emits.
    fn send(&self, frame: &Frame) -> Result<()>;
}

/// Callback invoked for every inbound frame.
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// I/O counters for the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Frames received by the read loop.
    pub frames_received: u64,
    /// Frames handed to the kernel.
    pub frames_sent: u64,
}

/// SocketCAN endpoint wrapper.
pub struct CanBus {
    interface: String,
    read_only: bool,

    tx_socket: Mutex<Option<CanSocket>>,
    running: Arc<AtomicBool>,
    read_handle: Mutex<Option<JoinHandle<()>>>,

    frames_received: Arc<AtomicU64>,
    frames_sent: AtomicU64,
}

impl CanBus {
    /// Create a bus wrapper for the given interface. Nothing is opened until
    /// [`CanBus::start`].
    pub fn new(interface: impl Into<String>, read_only: bool) -> Self {
        Self {
            interface: interface.into(),
            read_only,
            tx_socket: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            read_handle: Mutex::new(None),
            frames_received: Arc::new(AtomicU64::new(0)),
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Interface name.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Whether sends are blocked.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current I/O counters.
    pub fn stats(&self) -> BusStats {
        BusStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
        }
    }

    /// Open the interface and start delivering inbound frames to `callback`
    /// from a dedicated read task.
    pub fn start(&self, callback: FrameCallback) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::Connection("bus already started".to_string()));
        }

        if !self.read_only {
            let socket = CanSocket::open(&self.interface).map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                BridgeError::Connection(format!(
                    "failed to open CAN interface {}: {}",
                    self.interface, e
                ))
            })?;
            *self.tx_socket.lock().expect("tx socket lock poisoned") = Some(socket);
        }

        let interface = self.interface.clone();
        let running = Arc::clone(&self.running);
        let frames_received = Arc::clone(&self.frames_received);

        let handle = tokio::spawn(async move {
            let socket = match CanSocket::open(&interface) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(interface = %interface, error = %e, "failed to open CAN read socket");
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            if let Err(e) = socket.set_nonblocking(true) {
                tracing::error!(interface = %interface, error = %e, "failed to set non-blocking mode");
                running.store(false, Ordering::SeqCst);
                return;
            }

            tracing::info!(interface = %interface, "CAN read loop started");

            let mut interval = tokio::time::interval(RX_POLL_INTERVAL);
            loop {
                interval.tick().await;

                if !running.load(Ordering::SeqCst) {
                    break;
                }

                // Drain everything the kernel has buffered for this tick.
                loop {
                    match socket.read_frame() {
                        Ok(raw) => {
                            frames_received.fetch_add(1, Ordering::Relaxed);
                            let frame = if raw.is_extended() {
                                Frame::extended(raw.raw_id(), raw.data())
                            } else {
                                Frame::standard(raw.raw_id(), raw.data())
                            };
                            tracing::trace!(frame = %frame, "CAN RX");
                            callback(frame);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            tracing::warn!(interface = %interface, error = %e, "CAN read error");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            break;
                        }
                    }
                }
            }

            tracing::info!(interface = %interface, "CAN read loop stopped");
        });

        *self.read_handle.lock().expect("read handle lock poisoned") = Some(handle);
        Ok(())
    }

    /// Stop the read loop and close the sockets.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self
            .read_handle
            .lock()
            .expect("read handle lock poisoned")
            .take()
        {
            handle.abort();
        }

        self.tx_socket
            .lock()
            .expect("tx socket lock poisoned")
            .take();
    }
}

impl CanSink for CanBus {
    fn send(&self, frame: &Frame) -> Result<()> {
        if self.read_only {
            tracing::warn!(frame = %frame, "send blocked in read-only mode");
            return Ok(());
        }

        let guard = self.tx_socket.lock().expect("tx socket lock poisoned");
        let socket = guard
            .as_ref()
            .ok_or_else(|| BridgeError::Connection("CAN bus not started".to_string()))?;

        // Scheiber devices only answer extended frames; a standard-ID send
        // truncates the arbitration ID on the wire.
        let id = if frame.is_extended() {
            Id::Extended(
                ExtendedId::new(frame.arb_id())
                    .ok_or_else(|| BridgeError::BusSend(format!("invalid extended id 0x{:08X}", frame.arb_id())))?,
            )
        } else {
            Id::Standard(
                StandardId::new(frame.arb_id() as u16)
                    .ok_or_else(|| BridgeError::BusSend(format!("invalid standard id 0x{:X}", frame.arb_id())))?,
            )
        };

        let raw = CanFrame::new(id, frame.data())
            .ok_or_else(|| BridgeError::BusSend("payload exceeds 8 bytes".to_string()))?;

        socket
            .write_frame(&raw)
            .map_err(|e| BridgeError::BusSend(e.to_string()))?;

        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(frame = %frame, "CAN TX");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_send_is_dropped() {
        let bus = CanBus::new("vcan0", true);
        let frame = Frame::extended(0x023606C0, &[4, 0x11, 0, 150]);
        // Dropped, not an error; nothing was counted as sent.
        bus.send(&frame).unwrap();
        assert_eq!(bus.stats().frames_sent, 0);
    }

    #[test]
    fn test_send_before_start_fails() {
        let bus = CanBus::new("vcan0", false);
        let frame = Frame::extended(0x023606C0, &[4, 0x00, 0, 0]);
        assert!(matches!(
            bus.send(&frame),
            Err(BridgeError::Connection(_))
        ));
    }

    #[test]
    fn test_stats_start_at_zero() {
        let bus = CanBus::new("can0", false);
        assert_eq!(bus.stats(), BusStats::default());
    }
}
