//! The single TCP connection slot.
//!
//! At most one control connection is installed at a time. Installing hands
//! out a [`ConnectionGuard`]; dropping the guard empties the slot and
//! publishes exactly one [`ConnectionEvent::Closed`], whoever closed the
//! connection.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TcpConnectionStats {
    pub connection_events: u32,
    pub unhealthy_events: u32,
    /// Peer of the live connection.
    pub ip_address: Option<IpAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    Unhealthy,
    Desynchronized,
    IoError,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened { peer: SocketAddr },
    Closed { peer: SocketAddr, reason: CloseReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("already got a TCP connection open from {active}")]
    Occupied { active: SocketAddr },
}

#[derive(Debug, Default)]
struct SlotInner {
    active: Option<SocketAddr>,
    stats: TcpConnectionStats,
}

#[derive(Debug, Clone)]
pub struct ConnectionSlot {
    inner: Arc<Mutex<SlotInner>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Default for ConnectionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSlot {
    /// An empty slot.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Mutex::new(SlotInner::default())),
            events,
        }
    }

    /// Claim the slot for `peer`. Fails without touching the installed
    /// connection if there is one.
    pub fn try_install(&self, peer: SocketAddr) -> Result<ConnectionGuard, SlotError> {
        {
            let mut inner = self.inner.lock();
            if let Some(active) = inner.active {
                return Err(SlotError::Occupied { active });
            }
            inner.active = Some(peer);
            inner.stats.connection_events += 1;
            inner.stats.ip_address = Some(peer.ip());
        }
        let _ = self.events.send(ConnectionEvent::Opened { peer });
        Ok(ConnectionGuard {
            slot: self.clone(),
            peer,
            reason: CloseReason::PeerClosed,
        })
    }

    /// The peer of the installed connection, if any.
    pub fn active_peer(&self) -> Option<SocketAddr> {
        self.inner.lock().active
    }

    /// A snapshot of the connection counters.
    pub fn stats(&self) -> TcpConnectionStats {
        self.inner.lock().stats.clone()
    }

    /// Receive open and close events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

/// Ownership of the installed connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    slot: ConnectionSlot,
    peer: SocketAddr,
    reason: CloseReason,
}

impl ConnectionGuard {
    /// The remote address of this connection.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Release the slot, recording why the connection ended.
    pub fn close(mut self, reason: CloseReason) {
        self.reason = reason;
        if reason == CloseReason::Unhealthy {
            self.slot.inner.lock().stats.unhealthy_events += 1;
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        {
            let mut inner = self.slot.inner.lock();
            inner.active = None;
            inner.stats.ip_address = None;
        }
        tracing::info!("TCP connection from {} closed ({:?})", self.peer, self.reason);
        let _ = self.slot.events.send(ConnectionEvent::Closed {
            peer: self.peer,
            reason: self.reason,
        });
    }
}
